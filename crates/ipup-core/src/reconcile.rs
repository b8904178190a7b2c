//! Startup reconciliation: one diff pass aligning published DNS state
//! with the host's live addresses before event-driven updates begin.
//!
//! For each live address on a configured interface the current AAAA
//! answer set is fetched once per interface and matched entry by entry.
//! Addresses already published need no traffic; answers left unmatched
//! are stale and are removed in one batched UPDATE per interface (when
//! that interface allows deletions); live addresses with no answer are
//! published individually.

use crate::config::Config;
use crate::error::Result;
use crate::map::Map;
use crate::traits::{DnsUpdater, HostAddr};
use std::net::Ipv6Addr;
use tracing::{debug, info, warn};

/// Addresses confirmed live during the pass, keyed by interface name
/// and address. This becomes the event loop's known-address table.
pub type AddrTable = Map<(String, Ipv6Addr), ()>;

/// Runs the one-shot sync. Per-interface DNS failures are logged and
/// abandoned; the pass itself only fails on unrecoverable setup errors.
pub async fn reconcile(
    config: &Config,
    addrs: &[HostAddr],
    dns: &dyn DnsUpdater,
) -> Result<AddrTable> {
    // Answer memo: one query per interface no matter how many addresses
    // it carries. `None` records a failed query so the interface is
    // skipped without being asked again.
    let mut answers: Map<String, Option<Vec<Ipv6Addr>>> = Map::new();
    let mut live = AddrTable::new();
    let mut missing: Vec<&HostAddr> = Vec::new();

    for host in addrs {
        live.set((host.ifname.clone(), host.addr), ());

        let Some(target) = config.target(&host.ifname) else {
            debug!("{}: not configured, skipping {}", host.ifname, host.addr);
            continue;
        };

        if answers.get(&host.ifname).is_none() {
            let fetched = match dns.query_addrs(target.server, target.record).await {
                Ok(list) => Some(list),
                Err(e) => {
                    warn!("{}: query for {} failed: {e}", host.ifname, target.record);
                    None
                }
            };
            answers.set(host.ifname.clone(), fetched);
        }

        match answers.get_mut(&host.ifname) {
            Some(Some(published)) => {
                if let Some(pos) = published.iter().position(|a| *a == host.addr) {
                    // Already correct; drop the answer so whatever
                    // remains at the end is stale.
                    published.remove(pos);
                    debug!("{}: {} already published", host.ifname, host.addr);
                } else {
                    missing.push(host);
                }
            }
            // Query failed earlier; leave this interface alone.
            _ => {}
        }
    }

    // Stale answers first, one batched deletion per interface.
    let mut stale: Vec<(String, Vec<Ipv6Addr>)> = Vec::new();
    for (ifname, remaining) in answers.iter() {
        if let Some(list) = remaining {
            if !list.is_empty() {
                stale.push((ifname.clone(), list.clone()));
            }
        }
    }
    for (ifname, addrs) in stale {
        let Some(target) = config.target(&ifname) else {
            continue;
        };
        if !target.iface.delete_existing {
            debug!("{ifname}: leaving {} stale record(s) in place", addrs.len());
            continue;
        }
        info!("{ifname}: deleting {} stale record(s)", addrs.len());
        if let Err(e) = dns
            .delete_records(target.server, target.zone, target.record, &addrs)
            .await
        {
            warn!("{ifname}: stale record deletion failed: {e}");
        }
    }

    // Then publish what the answers were missing.
    for host in missing {
        let Some(target) = config.target(&host.ifname) else {
            continue;
        };
        let ttl = target.iface.update_ttl(host.valid_lft);
        info!("{}: publishing {} (ttl {ttl})", host.ifname, host.addr);
        if let Err(e) = dns
            .add_record(target.server, target.zone, target.record, host.addr, ttl)
            .await
        {
            warn!("{}: publishing {} failed: {e}", host.ifname, host.addr);
        }
    }

    Ok(live)
}
