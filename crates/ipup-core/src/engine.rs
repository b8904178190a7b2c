//! Event-driven update loop.
//!
//! The engine owns the validated configuration, the DNS backend, and
//! the known-address table seeded by the startup sync. It consumes the
//! address source's update stream until a termination signal arrives.
//!
//! Classification happens here, against the known-address table: a
//! `Present` for an address already in the table is a change
//! (lifetime refresh, duplicate-address detection settling) and is
//! ignored; an unknown `Present` is an addition; a `Gone` is a
//! deletion. Each addition or deletion sends exactly one single-record
//! UPDATE. Failures are logged and the loop keeps running.

use crate::config::Config;
use crate::error::Result;
use crate::reconcile::AddrTable;
use crate::traits::{AddrUpdate, DnsUpdater};
use std::pin::Pin;
use tokio_stream::{Stream, StreamExt};
use tracing::{debug, info, warn};

type UpdateStream = Pin<Box<dyn Stream<Item = AddrUpdate> + Send + 'static>>;

#[derive(Clone, Copy, PartialEq, Eq)]
enum LoopState {
    Running,
    Stopped,
}

pub struct Engine {
    config: Config,
    dns: Box<dyn DnsUpdater>,
    known: AddrTable,
}

impl Engine {
    pub fn new(config: Config, dns: Box<dyn DnsUpdater>, known: AddrTable) -> Self {
        Self { config, dns, known }
    }

    /// Runs until SIGTERM/SIGINT. The signal branches are polled ahead
    /// of the event branch, so a signal delivered while an event was
    /// being waited on wins the next iteration.
    pub async fn run(&mut self, mut updates: UpdateStream) -> Result<()> {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{SignalKind, signal};

            let mut sigterm = signal(SignalKind::terminate())?;
            let mut sigint = signal(SignalKind::interrupt())?;

            let mut state = LoopState::Running;
            while state == LoopState::Running {
                tokio::select! {
                    biased;
                    _ = sigterm.recv() => {
                        info!("received SIGTERM, stopping");
                        state = LoopState::Stopped;
                    }
                    _ = sigint.recv() => {
                        info!("received SIGINT, stopping");
                        state = LoopState::Stopped;
                    }
                    update = updates.next() => match update {
                        Some(update) => self.handle(update).await,
                        None => {
                            warn!("address update stream closed");
                            state = LoopState::Stopped;
                        }
                    }
                }
            }
        }

        #[cfg(not(unix))]
        {
            let mut state = LoopState::Running;
            while state == LoopState::Running {
                tokio::select! {
                    biased;
                    _ = tokio::signal::ctrl_c() => {
                        info!("received interrupt, stopping");
                        state = LoopState::Stopped;
                    }
                    update = updates.next() => match update {
                        Some(update) => self.handle(update).await,
                        None => {
                            warn!("address update stream closed");
                            state = LoopState::Stopped;
                        }
                    }
                }
            }
        }

        info!("event loop stopped");
        Ok(())
    }

    /// Same loop with a caller-provided shutdown channel instead of
    /// process signals. Used by tests to stop deterministically.
    pub async fn run_with_shutdown(
        &mut self,
        mut updates: UpdateStream,
        mut shutdown: tokio::sync::oneshot::Receiver<()>,
    ) -> Result<()> {
        let mut state = LoopState::Running;
        while state == LoopState::Running {
            tokio::select! {
                biased;
                _ = &mut shutdown => {
                    info!("shutdown requested, stopping");
                    state = LoopState::Stopped;
                }
                update = updates.next() => match update {
                    Some(update) => self.handle(update).await,
                    None => {
                        warn!("address update stream closed");
                        state = LoopState::Stopped;
                    }
                }
            }
        }

        info!("event loop stopped");
        Ok(())
    }

    async fn handle(&mut self, update: AddrUpdate) {
        match update {
            AddrUpdate::Present(host) => {
                let key = (host.ifname.clone(), host.addr);
                if self.known.get(&key).is_some() {
                    // Re-announcement of a known address; nothing to do.
                    debug!("{}: {} changed, ignoring", host.ifname, host.addr);
                    return;
                }
                self.known.set(key, ());

                let Some(target) = self.config.target(&host.ifname) else {
                    debug!("{}: not configured, ignoring {}", host.ifname, host.addr);
                    return;
                };
                let ttl = target.iface.update_ttl(host.valid_lft);
                info!(
                    "{}: address {} appeared, publishing (ttl {ttl})",
                    host.ifname, host.addr
                );
                if let Err(e) = self
                    .dns
                    .add_record(target.server, target.zone, target.record, host.addr, ttl)
                    .await
                {
                    warn!("{}: publishing {} failed: {e}", host.ifname, host.addr);
                }
            }
            AddrUpdate::Gone(host) => {
                self.known.remove(&(host.ifname.clone(), host.addr));

                let Some(target) = self.config.target(&host.ifname) else {
                    debug!("{}: not configured, ignoring {}", host.ifname, host.addr);
                    return;
                };
                info!("{}: address {} went away, deleting", host.ifname, host.addr);
                if let Err(e) = self
                    .dns
                    .delete_records(target.server, target.zone, target.record, &[host.addr])
                    .await
                {
                    warn!("{}: deleting {} failed: {e}", host.ifname, host.addr);
                }
            }
        }
    }
}
