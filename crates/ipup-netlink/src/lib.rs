//! rtnetlink address source for Linux.
//!
//! Two sockets: a request/reply socket for RTM_GETLINK/RTM_GETADDR
//! dumps (the current table), and a socket subscribed to the IPv6
//! ifaddr multicast group whose RTM_NEWADDR/RTM_DELADDR notifications a
//! reader thread turns into [`AddrUpdate`]s on a channel.
//!
//! Both views filter to global-scope IPv6 before anything leaves this
//! crate. Interface indices are resolved to names through a link table
//! dumped at startup and refreshed whenever an unknown index shows up.

#[cfg(target_os = "linux")]
mod linux {
    use ipup_core::error::{Error, Result};
    use ipup_core::map::Map;
    use ipup_core::traits::{AddrSource, AddrUpdate, HostAddr};
    use netlink_packet_core::{
        NLM_F_DUMP, NLM_F_REQUEST, NetlinkHeader, NetlinkMessage, NetlinkPayload,
    };
    use netlink_packet_route::{AddressMessage, LinkMessage, RtnlMessage, address, link};
    use netlink_sys::{Socket, SocketAddr, protocols::NETLINK_ROUTE};
    use std::net::Ipv6Addr;
    use std::pin::Pin;
    use tokio_stream::Stream;
    use tokio_stream::wrappers::UnboundedReceiverStream;
    use tracing::{debug, warn};

    // linux/rtnetlink.h multicast group for IPv6 address events.
    const RTMGRP_IPV6_IFADDR: u32 = 0x100;
    // linux/rtnetlink.h: RT_SCOPE_UNIVERSE, the global scope.
    const SCOPE_UNIVERSE: u8 = 0;

    pub struct NetlinkAddrSource {
        links: Map<u32, String>,
    }

    impl NetlinkAddrSource {
        pub fn new() -> Result<Self> {
            Ok(Self {
                links: link_table()?,
            })
        }
    }

    #[async_trait::async_trait]
    impl AddrSource for NetlinkAddrSource {
        async fn addresses(&self) -> Result<Vec<HostAddr>> {
            let links = self.links.clone();
            tokio::task::spawn_blocking(move || address_table(&links))
                .await
                .map_err(|e| Error::addr_source(format!("address dump task failed: {e}")))?
        }

        fn watch(&self) -> Pin<Box<dyn Stream<Item = AddrUpdate> + Send + 'static>> {
            let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
            let links = self.links.clone();

            let spawned = std::thread::Builder::new()
                .name("ipup-netlink".into())
                .spawn(move || {
                    if let Err(e) = monitor(links, tx) {
                        warn!("address monitor terminated: {e}");
                    }
                });
            if let Err(e) = spawned {
                warn!("cannot start address monitor thread: {e}");
            }

            Box::pin(UnboundedReceiverStream::new(rx))
        }
    }

    /// Sends one dump request and collects the route messages of every
    /// reply frame up to NLMSG_DONE.
    fn dump(request: RtnlMessage) -> Result<Vec<RtnlMessage>> {
        let mut socket = Socket::new(NETLINK_ROUTE)
            .map_err(|e| Error::addr_source(format!("cannot open netlink socket: {e}")))?;
        socket
            .bind_auto()
            .map_err(|e| Error::addr_source(format!("cannot bind netlink socket: {e}")))?;
        socket
            .connect(&SocketAddr::new(0, 0))
            .map_err(|e| Error::addr_source(format!("cannot connect netlink socket: {e}")))?;

        let mut message =
            NetlinkMessage::new(NetlinkHeader::default(), NetlinkPayload::InnerMessage(request));
        message.header.flags = NLM_F_REQUEST | NLM_F_DUMP;
        message.header.sequence_number = 1;
        message.finalize();

        let mut buf = vec![0u8; message.buffer_len()];
        message.serialize(&mut buf);
        socket
            .send(&buf, 0)
            .map_err(|e| Error::addr_source(format!("netlink send failed: {e}")))?;

        let mut replies = Vec::new();
        'recv: loop {
            let (frame, _) = socket
                .recv_from_full()
                .map_err(|e| Error::addr_source(format!("netlink receive failed: {e}")))?;

            let mut offset = 0;
            while offset < frame.len() {
                let packet = NetlinkMessage::<RtnlMessage>::deserialize(&frame[offset..])
                    .map_err(|e| Error::addr_source(format!("bad netlink message: {e}")))?;
                let length = packet.header.length as usize;

                match packet.payload {
                    NetlinkPayload::Done(_) => break 'recv,
                    NetlinkPayload::Error(e) => {
                        return Err(Error::addr_source(format!("netlink error reply: {e:?}")));
                    }
                    NetlinkPayload::InnerMessage(inner) => replies.push(inner),
                    _ => {}
                }

                if length == 0 {
                    break;
                }
                offset += length;
            }
        }

        Ok(replies)
    }

    /// Interface index to name, from an RTM_GETLINK dump.
    fn link_table() -> Result<Map<u32, String>> {
        let mut table = Map::new();
        for reply in dump(RtnlMessage::GetLink(LinkMessage::default()))? {
            let RtnlMessage::NewLink(message) = reply else {
                continue;
            };
            for nla in message.nlas {
                if let link::nlas::Nla::IfName(name) = nla {
                    table.set(message.header.index, name);
                    break;
                }
            }
        }
        Ok(table)
    }

    /// Current global-scope IPv6 addresses, from an RTM_GETADDR dump.
    fn address_table(links: &Map<u32, String>) -> Result<Vec<HostAddr>> {
        let mut request = AddressMessage::default();
        request.header.family = libc::AF_INET6 as u8;

        let mut table = Vec::new();
        for reply in dump(RtnlMessage::GetAddress(request))? {
            let RtnlMessage::NewAddress(message) = reply else {
                continue;
            };
            if let Some(host) = host_addr(&message, links) {
                table.push(host);
            }
        }
        Ok(table)
    }

    fn host_addr(message: &AddressMessage, links: &Map<u32, String>) -> Option<HostAddr> {
        if message.header.family != libc::AF_INET6 as u8 {
            return None;
        }
        if message.header.scope != SCOPE_UNIVERSE {
            return None;
        }

        let ifindex = message.header.index;
        let ifname = links.get(&ifindex)?.clone();

        let mut addr = None;
        let mut valid_lft = None;
        for nla in &message.nlas {
            match nla {
                address::Nla::Address(bytes) if bytes.len() == 16 => {
                    let mut octets = [0u8; 16];
                    octets.copy_from_slice(bytes);
                    addr = Some(Ipv6Addr::from(octets));
                }
                address::Nla::CacheInfo(bytes) => valid_lft = valid_lifetime(bytes),
                _ => {}
            }
        }

        Some(HostAddr {
            ifindex,
            ifname,
            addr: addr?,
            valid_lft,
        })
    }

    /// Valid lifetime out of a raw ifa_cacheinfo payload
    /// (preferred, valid, cstamp, tstamp: four native-order u32s).
    /// 0xffffffff marks a permanent address.
    fn valid_lifetime(data: &[u8]) -> Option<u32> {
        let raw = data.get(4..8)?;
        let secs = u32::from_ne_bytes([raw[0], raw[1], raw[2], raw[3]]);
        (secs != u32::MAX).then_some(secs)
    }

    /// Reader loop on the multicast-subscribed socket. Runs until the
    /// receiving side of the channel is dropped.
    fn monitor(
        mut links: Map<u32, String>,
        tx: tokio::sync::mpsc::UnboundedSender<AddrUpdate>,
    ) -> Result<()> {
        let mut socket = Socket::new(NETLINK_ROUTE)
            .map_err(|e| Error::addr_source(format!("cannot open netlink socket: {e}")))?;
        socket
            .bind(&SocketAddr::new(0, RTMGRP_IPV6_IFADDR))
            .map_err(|e| Error::addr_source(format!("cannot join ifaddr group: {e}")))?;

        loop {
            let (frame, _) = socket
                .recv_from_full()
                .map_err(|e| Error::addr_source(format!("netlink receive failed: {e}")))?;

            let mut offset = 0;
            while offset < frame.len() {
                let packet = match NetlinkMessage::<RtnlMessage>::deserialize(&frame[offset..]) {
                    Ok(packet) => packet,
                    Err(e) => {
                        debug!("skipping bad netlink notification: {e}");
                        break;
                    }
                };
                let length = packet.header.length as usize;

                let update = match packet.payload {
                    NetlinkPayload::InnerMessage(RtnlMessage::NewAddress(message)) => {
                        refresh_links(&mut links, message.header.index);
                        host_addr(&message, &links).map(AddrUpdate::Present)
                    }
                    NetlinkPayload::InnerMessage(RtnlMessage::DelAddress(message)) => {
                        refresh_links(&mut links, message.header.index);
                        host_addr(&message, &links).map(AddrUpdate::Gone)
                    }
                    _ => None,
                };
                if let Some(update) = update {
                    if tx.send(update).is_err() {
                        // Listener went away; the loop's job is done.
                        return Ok(());
                    }
                }

                if length == 0 {
                    break;
                }
                offset += length;
            }
        }
    }

    /// An event for an interface created after startup means the link
    /// table is out of date.
    fn refresh_links(links: &mut Map<u32, String>, ifindex: u32) {
        if links.get(&ifindex).is_some() {
            return;
        }
        match link_table() {
            Ok(fresh) => *links = fresh,
            Err(e) => debug!("cannot refresh link table: {e}"),
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn cacheinfo_lifetime_is_the_second_field() {
            let mut data = [0u8; 16];
            data[0..4].copy_from_slice(&600u32.to_ne_bytes());
            data[4..8].copy_from_slice(&3600u32.to_ne_bytes());
            assert_eq!(valid_lifetime(&data), Some(3600));
        }

        #[test]
        fn permanent_lifetime_maps_to_none() {
            let mut data = [0u8; 16];
            data[0..4].copy_from_slice(&u32::MAX.to_ne_bytes());
            data[4..8].copy_from_slice(&u32::MAX.to_ne_bytes());
            assert_eq!(valid_lifetime(&data), None);
        }

        #[test]
        fn truncated_cacheinfo_is_ignored() {
            assert_eq!(valid_lifetime(&[0, 1, 2]), None);
        }
    }
}

#[cfg(target_os = "linux")]
pub use linux::NetlinkAddrSource;

/// Stub for non-Linux targets; construction always fails.
#[cfg(not(target_os = "linux"))]
pub struct NetlinkAddrSource;

#[cfg(not(target_os = "linux"))]
impl NetlinkAddrSource {
    pub fn new() -> ipup_core::error::Result<Self> {
        Err(ipup_core::error::Error::addr_source(
            "netlink address monitoring is only supported on Linux",
        ))
    }
}

#[cfg(not(target_os = "linux"))]
#[async_trait::async_trait]
impl ipup_core::traits::AddrSource for NetlinkAddrSource {
    async fn addresses(&self) -> ipup_core::error::Result<Vec<ipup_core::traits::HostAddr>> {
        Err(ipup_core::error::Error::addr_source(
            "netlink address monitoring is only supported on Linux",
        ))
    }

    fn watch(
        &self,
    ) -> std::pin::Pin<
        Box<dyn tokio_stream::Stream<Item = ipup_core::traits::AddrUpdate> + Send + 'static>,
    > {
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        drop(tx);
        Box::pin(tokio_stream::wrappers::UnboundedReceiverStream::new(rx))
    }
}
