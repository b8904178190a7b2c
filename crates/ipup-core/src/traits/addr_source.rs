//! Address source trait.
//!
//! Implementations observe the host's address table; they make no
//! decisions about DNS. The production implementation lives in the
//! `ipup-netlink` crate.

use crate::error::Result;
use async_trait::async_trait;
use std::net::Ipv6Addr;
use std::pin::Pin;
use tokio_stream::Stream;

/// One global-scope IPv6 address bound to a named interface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostAddr {
    pub ifindex: u32,
    pub ifname: String,
    pub addr: Ipv6Addr,
    /// Remaining valid lifetime in seconds; `None` for permanent
    /// addresses.
    pub valid_lft: Option<u32>,
}

/// A raw address-table change. Sources report presence transitions
/// only; deciding whether a `Present` is new or a re-announcement is
/// the event loop's job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AddrUpdate {
    Present(HostAddr),
    Gone(HostAddr),
}

impl AddrUpdate {
    pub fn host(&self) -> &HostAddr {
        match self {
            AddrUpdate::Present(host) | AddrUpdate::Gone(host) => host,
        }
    }
}

/// Provider of the current address table and a change stream.
///
/// Both views are filtered at the source: only global-scope IPv6
/// addresses appear. The stream runs until the source is dropped and
/// must be cancellation-safe.
#[async_trait]
pub trait AddrSource: Send + Sync {
    /// Snapshot of the current address table.
    async fn addresses(&self) -> Result<Vec<HostAddr>>;

    /// Stream of address-table changes.
    fn watch(&self) -> Pin<Box<dyn Stream<Item = AddrUpdate> + Send + 'static>>;
}
