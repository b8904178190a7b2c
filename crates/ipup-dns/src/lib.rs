//! RFC 2136 update backend built on hickory-client.
//!
//! One UDP exchange per operation: a plain class-IN query for reads, an
//! `append` UPDATE for additions, and a single class-NONE/TTL-0
//! `delete_by_rdata` UPDATE carrying every stale rdata for deletions.
//! Updates are TSIG-signed whenever the server carries a complete key.
//!
//! hickory's sync client does blocking socket I/O, so every exchange
//! runs inside `spawn_blocking`. Transport failures are retried up to
//! the server's `max-retry`; a response with a non-NOERROR code is an
//! application failure and is never retried.

use async_trait::async_trait;
use base64::{Engine, engine::general_purpose::STANDARD as BASE64};
use hickory_client::client::{Client, SyncClient};
use hickory_client::op::ResponseCode;
use hickory_client::rr::rdata::tsig::TsigAlgorithm;
use hickory_client::rr::{DNSClass, Name, RData, Record, RecordSet, RecordType};
use hickory_client::udp::UdpClientConnection;
use hickory_proto::rr::dnssec::tsig::TSigner;
use ipup_core::config::Server;
use ipup_core::error::{Error, Result};
use ipup_core::traits::DnsUpdater;
use ipup_core::tsig::{TsigCheck, TsigKey};
use std::net::{Ipv6Addr, SocketAddr};
use std::str::FromStr;
use tracing::{debug, info, warn};

const TSIG_FUDGE_SECS: u16 = 300;

/// Per-call snapshot of a server's connection parameters, detached from
/// the config graph so it can move into the blocking task.
#[derive(Clone)]
struct Endpoint {
    addr: SocketAddr,
    key: TsigKey,
    max_retry: u8,
    verify_update: bool,
}

impl Endpoint {
    fn from_server(server: &Server) -> Result<Self> {
        let addr = server
            .addrs
            .first()
            .copied()
            .ok_or_else(|| Error::dns("server has no resolved address"))?;
        Ok(Self {
            addr,
            key: server.key.clone(),
            max_retry: server.max_retry,
            verify_update: server.verify_update,
        })
    }

    fn client(&self) -> Result<SyncClient<UdpClientConnection>> {
        let conn = UdpClientConnection::new(self.addr)
            .map_err(|e| Error::dns(format!("cannot reach {}: {e}", self.addr)))?;
        match tsig_signer(&self.key)? {
            Some(signer) => Ok(SyncClient::with_tsigner(conn, signer)),
            None => Ok(SyncClient::new(conn)),
        }
    }

    /// Unsigned client for plain queries.
    fn query_client(&self) -> Result<SyncClient<UdpClientConnection>> {
        let conn = UdpClientConnection::new(self.addr)
            .map_err(|e| Error::dns(format!("cannot reach {}: {e}", self.addr)))?;
        Ok(SyncClient::new(conn))
    }
}

fn tsig_signer(key: &TsigKey) -> Result<Option<TSigner>> {
    if key.check() != TsigCheck::Valid {
        return Ok(None);
    }
    let (Some(algorithm), Some(name), Some(secret)) = (key.algorithm, &key.name, &key.secret)
    else {
        return Ok(None);
    };

    let algorithm = match algorithm {
        ipup_core::tsig::TsigAlgorithm::HmacMd5 => TsigAlgorithm::HmacMd5,
        ipup_core::tsig::TsigAlgorithm::HmacSha1 => TsigAlgorithm::HmacSha1,
        ipup_core::tsig::TsigAlgorithm::HmacSha224 => TsigAlgorithm::HmacSha224,
        ipup_core::tsig::TsigAlgorithm::HmacSha256 => TsigAlgorithm::HmacSha256,
        ipup_core::tsig::TsigAlgorithm::HmacSha384 => TsigAlgorithm::HmacSha384,
        ipup_core::tsig::TsigAlgorithm::HmacSha512 => TsigAlgorithm::HmacSha512,
    };
    let key_bytes = BASE64
        .decode(secret)
        .map_err(|e| Error::dns(format!("cannot decode TSIG secret: {e}")))?;
    let signer = TSigner::new(
        key_bytes,
        algorithm,
        parse_name(name)?,
        TSIG_FUDGE_SECS,
    )
    .map_err(|e| Error::dns(format!("cannot build TSIG signer: {e}")))?;

    Ok(Some(signer))
}

fn parse_name(name: &str) -> Result<Name> {
    Name::from_str(name).map_err(|e| Error::dns(format!("invalid domain name '{name}': {e}")))
}

/// Retries a transport-level exchange up to the server's budget.
/// `max-retry = 0` means a single attempt.
fn with_retry<T>(max_retry: u8, mut exchange: impl FnMut() -> Result<T>) -> Result<T> {
    let mut last = None;
    for attempt in 0..=u32::from(max_retry) {
        match exchange() {
            Ok(value) => return Ok(value),
            Err(e) => {
                if attempt < u32::from(max_retry) {
                    debug!("transport attempt {} failed: {e}", attempt + 1);
                }
                last = Some(e);
            }
        }
    }
    Err(last.unwrap_or_else(|| Error::dns("no attempt made")))
}

fn check_rcode(code: ResponseCode, what: &str) -> Result<()> {
    if code == ResponseCode::NoError {
        Ok(())
    } else {
        Err(Error::dns(format!("{what} rejected by server: {code:?}")))
    }
}

fn query_aaaa(
    client: &SyncClient<UdpClientConnection>,
    name: &Name,
    max_retry: u8,
) -> Result<Vec<Ipv6Addr>> {
    let response = with_retry(max_retry, || {
        client
            .query(name, DNSClass::IN, RecordType::AAAA)
            .map_err(|e| Error::dns(format!("query for {name} failed: {e}")))
    })?;

    Ok(response
        .answers()
        .iter()
        .filter_map(|record| match record.data() {
            Some(RData::AAAA(aaaa)) => Some(aaaa.0),
            _ => None,
        })
        .collect())
}

// An UPDATE can be accepted yet have no effect, e.g. with misconfigured
// zone permissions; the opt-in verification pass catches that case.
fn verify_visible(endpoint: &Endpoint, record: &Name, addr: Ipv6Addr, deleted: bool) {
    let client = match endpoint.query_client() {
        Ok(client) => client,
        Err(e) => {
            warn!("cannot verify update for {record}: {e}");
            return;
        }
    };
    let published = match query_aaaa(&client, record, endpoint.max_retry) {
        Ok(addrs) => addrs.contains(&addr),
        Err(e) => {
            warn!("cannot verify update for {record}: {e}");
            return;
        }
    };

    if published == deleted {
        warn!(
            "{addr} should have been {} but was {} in {record}",
            if deleted { "deleted" } else { "published" },
            if deleted { "found" } else { "not found" },
        );
    } else {
        info!(
            "verified: {addr} {} {record}",
            if deleted { "gone from" } else { "visible in" },
        );
    }
}

/// [`DnsUpdater`] speaking RFC 2136 through hickory's sync client.
#[derive(Clone, Copy, Debug, Default)]
pub struct HickoryUpdater;

impl HickoryUpdater {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl DnsUpdater for HickoryUpdater {
    async fn query_addrs(&self, server: &Server, record: &str) -> Result<Vec<Ipv6Addr>> {
        let endpoint = Endpoint::from_server(server)?;
        let record = record.to_owned();

        tokio::task::spawn_blocking(move || {
            let name = parse_name(&record)?;
            let client = endpoint.query_client()?;
            query_aaaa(&client, &name, endpoint.max_retry)
        })
        .await
        .map_err(|e| Error::dns(format!("query task failed: {e}")))?
    }

    async fn add_record(
        &self,
        server: &Server,
        zone: &str,
        record: &str,
        addr: Ipv6Addr,
        ttl: u32,
    ) -> Result<()> {
        let endpoint = Endpoint::from_server(server)?;
        let zone = zone.to_owned();
        let record = record.to_owned();

        tokio::task::spawn_blocking(move || {
            let zone = parse_name(&zone)?;
            let name = parse_name(&record)?;

            let mut rr = Record::from_rdata(name.clone(), ttl, RData::AAAA(addr.into()));
            rr.set_dns_class(DNSClass::IN);

            let client = endpoint.client()?;
            let response = with_retry(endpoint.max_retry, || {
                client
                    .append(rr.clone(), zone.clone(), false)
                    .map_err(|e| Error::dns(format!("update for {name} failed: {e}")))
            })?;
            check_rcode(response.response_code(), "record addition")?;

            if endpoint.verify_update {
                verify_visible(&endpoint, &name, addr, false);
            }
            Ok(())
        })
        .await
        .map_err(|e| Error::dns(format!("update task failed: {e}")))?
    }

    async fn delete_records(
        &self,
        server: &Server,
        zone: &str,
        record: &str,
        addrs: &[Ipv6Addr],
    ) -> Result<()> {
        if addrs.is_empty() {
            return Ok(());
        }

        let endpoint = Endpoint::from_server(server)?;
        let zone = zone.to_owned();
        let record = record.to_owned();
        let addrs = addrs.to_vec();

        tokio::task::spawn_blocking(move || {
            let zone = parse_name(&zone)?;
            let name = parse_name(&record)?;

            // All rdatas share the owner name, so they travel as one
            // rrset in a single UPDATE. delete_by_rdata rewrites them
            // to class NONE with TTL 0.
            let mut rrset = RecordSet::with_ttl(name.clone(), RecordType::AAAA, 0);
            for addr in &addrs {
                rrset.add_rdata(RData::AAAA((*addr).into()));
            }

            let client = endpoint.client()?;
            let response = with_retry(endpoint.max_retry, || {
                client
                    .delete_by_rdata(rrset.clone(), zone.clone())
                    .map_err(|e| Error::dns(format!("deletion for {name} failed: {e}")))
            })?;
            check_rcode(response.response_code(), "record deletion")?;

            if endpoint.verify_update {
                for addr in &addrs {
                    verify_visible(&endpoint, &name, *addr, true);
                }
            }
            Ok(())
        })
        .await
        .map_err(|e| Error::dns(format!("deletion task failed: {e}")))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn signing_key() -> TsigKey {
        TsigKey {
            algorithm: Some(ipup_core::tsig::TsigAlgorithm::HmacSha256),
            name: Some("update-key".into()),
            secret: Some("naeaKJeq2Wum2TLUIYRBS7WTcpg0gCUs1hsJoGp3gS4ay9E/dfu6jQLYS9xMr9moeclYYfvOV9W461vIFbXzWQ==".into()),
        }
    }

    #[test]
    fn complete_key_produces_a_signer() {
        let signer = tsig_signer(&signing_key()).unwrap();
        assert!(signer.is_some());
    }

    #[test]
    fn absent_key_means_unsigned() {
        assert!(tsig_signer(&TsigKey::default()).unwrap().is_none());
    }

    #[test]
    fn retry_budget_bounds_attempts() {
        let mut attempts = 0;
        let result: Result<()> = with_retry(3, || {
            attempts += 1;
            Err(Error::dns("down"))
        });
        assert!(result.is_err());
        assert_eq!(attempts, 4);

        let mut attempts = 0;
        let result: Result<()> = with_retry(0, || {
            attempts += 1;
            Err(Error::dns("down"))
        });
        assert!(result.is_err());
        assert_eq!(attempts, 1);
    }

    #[test]
    fn retry_stops_on_first_success() {
        let mut attempts = 0;
        let result = with_retry(5, || {
            attempts += 1;
            if attempts < 3 {
                Err(Error::dns("down"))
            } else {
                Ok(attempts)
            }
        });
        assert_eq!(result.unwrap(), 3);
    }

    #[test]
    fn non_noerror_rcode_is_an_application_failure() {
        assert!(check_rcode(ResponseCode::NoError, "op").is_ok());
        assert!(check_rcode(ResponseCode::Refused, "op").is_err());
        assert!(check_rcode(ResponseCode::NotAuth, "op").is_err());
    }
}
