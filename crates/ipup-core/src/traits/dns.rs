//! DNS update trait.
//!
//! Implementations perform one query or one UPDATE per call and report
//! the outcome; they never retry application-level failures and never
//! decide whether an operation is needed. The production implementation
//! (RFC 2136 over hickory) lives in the `ipup-dns` crate.

use crate::config::Server;
use crate::error::Result;
use async_trait::async_trait;
use std::net::Ipv6Addr;

/// Query and modify the AAAA records the daemon manages.
#[async_trait]
pub trait DnsUpdater: Send + Sync {
    /// Plain class-IN query for the AAAA rrset at `record`.
    /// An empty answer is not an error.
    async fn query_addrs(&self, server: &Server, record: &str) -> Result<Vec<Ipv6Addr>>;

    /// Sends one UPDATE adding a single AAAA record.
    async fn add_record(
        &self,
        server: &Server,
        zone: &str,
        record: &str,
        addr: Ipv6Addr,
        ttl: u32,
    ) -> Result<()>;

    /// Sends one UPDATE deleting the given rdatas from the rrset at
    /// `record` (class NONE, TTL 0). All addresses travel in the same
    /// message.
    async fn delete_records(
        &self,
        server: &Server,
        zone: &str,
        record: &str,
        addrs: &[Ipv6Addr],
    ) -> Result<()>;
}
