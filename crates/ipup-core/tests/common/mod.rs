//! Test doubles shared by the integration suites.

#![allow(dead_code)]

use async_trait::async_trait;
use ipup_core::config::{Config, Server};
use ipup_core::error::{Error, Result};
use ipup_core::traits::{AddrUpdate, DnsUpdater, HostAddr};
use std::net::Ipv6Addr;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use tokio_stream::Stream;
use tokio_stream::wrappers::UnboundedReceiverStream;

/// Everything the mock backend was asked to do, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DnsCall {
    Query {
        record: String,
    },
    Add {
        zone: String,
        record: String,
        addr: Ipv6Addr,
        ttl: u32,
    },
    Delete {
        zone: String,
        record: String,
        addrs: Vec<Ipv6Addr>,
    },
}

struct MockState {
    answers: Mutex<Vec<(String, Vec<Ipv6Addr>)>>,
    calls: Mutex<Vec<DnsCall>>,
    fail_queries: bool,
}

/// Recording [`DnsUpdater`]: serves canned answers, never fails updates,
/// optionally fails every query.
#[derive(Clone)]
pub struct MockDns {
    state: Arc<MockState>,
}

impl MockDns {
    pub fn new() -> Self {
        Self::build(Vec::new(), false)
    }

    pub fn answering(record: &str, addrs: &[Ipv6Addr]) -> Self {
        Self::build(vec![(record.to_owned(), addrs.to_vec())], false)
    }

    pub fn failing_queries() -> Self {
        Self::build(Vec::new(), true)
    }

    fn build(answers: Vec<(String, Vec<Ipv6Addr>)>, fail_queries: bool) -> Self {
        Self {
            state: Arc::new(MockState {
                answers: Mutex::new(answers),
                calls: Mutex::new(Vec::new()),
                fail_queries,
            }),
        }
    }

    pub fn calls(&self) -> Vec<DnsCall> {
        self.state.calls.lock().unwrap().clone()
    }

    fn record(&self, call: DnsCall) {
        self.state.calls.lock().unwrap().push(call);
    }
}

#[async_trait]
impl DnsUpdater for MockDns {
    async fn query_addrs(&self, _server: &Server, record: &str) -> Result<Vec<Ipv6Addr>> {
        self.record(DnsCall::Query {
            record: record.to_owned(),
        });
        if self.state.fail_queries {
            return Err(Error::dns("scripted query failure"));
        }
        Ok(self
            .state
            .answers
            .lock()
            .unwrap()
            .iter()
            .find(|(r, _)| r == record)
            .map(|(_, addrs)| addrs.clone())
            .unwrap_or_default())
    }

    async fn add_record(
        &self,
        _server: &Server,
        zone: &str,
        record: &str,
        addr: Ipv6Addr,
        ttl: u32,
    ) -> Result<()> {
        self.record(DnsCall::Add {
            zone: zone.to_owned(),
            record: record.to_owned(),
            addr,
            ttl,
        });
        Ok(())
    }

    async fn delete_records(
        &self,
        _server: &Server,
        zone: &str,
        record: &str,
        addrs: &[Ipv6Addr],
    ) -> Result<()> {
        self.record(DnsCall::Delete {
            zone: zone.to_owned(),
            record: record.to_owned(),
            addrs: addrs.to_vec(),
        });
        Ok(())
    }
}

/// The standing fixture: server `a`, interface `eth0` publishing
/// `host.example.com`, deletions allowed.
pub fn scenario_config() -> Config {
    load(
        "\
[server/a]
host = 127.0.0.1

[iface/eth0]
server = a
zone = example.com
record = host
delete-existing = yes
",
    )
}

pub fn load(source: &str) -> Config {
    Config::load(source, "test.conf").unwrap()
}

pub fn addr6(s: &str) -> Ipv6Addr {
    s.parse().unwrap()
}

pub fn host_on(ifname: &str, addr: &str, valid_lft: Option<u32>) -> HostAddr {
    HostAddr {
        ifindex: 2,
        ifname: ifname.to_owned(),
        addr: addr6(addr),
        valid_lft,
    }
}

/// Hand-fed address update stream for driving the engine.
pub fn update_channel() -> (
    tokio::sync::mpsc::UnboundedSender<AddrUpdate>,
    Pin<Box<dyn Stream<Item = AddrUpdate> + Send + 'static>>,
) {
    let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
    (tx, Box::pin(UnboundedReceiverStream::new(rx)))
}
