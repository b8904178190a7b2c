//! Configuration model: the server and interface graph.
//!
//! A config file contains `[server/<name>]` and `[iface/<name>]`
//! sections. Records are created lazily the first time a section is
//! mentioned, mutated as pairs arrive, and cross-checked in a single
//! validation pass once the whole file has been read. Interfaces are
//! validated first because that pass marks the servers they reference
//! as used; servers are validated (and their hosts resolved) second.

pub mod duration;

use crate::error::{Error, Result};
use crate::ini;
use crate::map::Map;
use crate::tsig::{TsigAlgorithm, TsigCheck, TsigKey};
use std::net::{SocketAddr, ToSocketAddrs};
use tracing::warn;

/// Hard DNS cap on record TTLs: seven days.
pub const TTL_MAX: u64 = 604_800;

/// TTL applied when an interface configures neither `ttl` nor
/// `respect-ttl`, or the kernel reports a permanent address.
pub const DEFAULT_TTL: u32 = 300;

const DEFAULT_PORT: u16 = 53;
const DEFAULT_MAX_RETRY: u8 = 3;

/// A `[server/<name>]` section: where updates are sent and how they are
/// signed. `zone`/`record` here are only fallbacks for interfaces that
/// leave their own unset.
#[derive(Debug)]
pub struct Server {
    pub host: Option<String>,
    pub port: u16,
    /// Transport-level retry budget for this server's resolver.
    pub max_retry: u8,
    pub key: TsigKey,
    pub zone: Option<String>,
    pub record: Option<String>,
    /// Re-query after each update and warn when the change is not
    /// visible. Off unless explicitly configured.
    pub verify_update: bool,
    /// Set while validating the interfaces that reference this server.
    pub used: bool,
    /// Resolved during validation.
    pub addrs: Vec<SocketAddr>,
}

impl Default for Server {
    fn default() -> Self {
        Self {
            host: None,
            port: DEFAULT_PORT,
            max_retry: DEFAULT_MAX_RETRY,
            key: TsigKey::default(),
            zone: None,
            record: None,
            verify_update: false,
            used: false,
            addrs: Vec::new(),
        }
    }
}

/// A domain name an interface either owns or borrows from its server.
/// Keeping the distinction explicit is what lets an inherited name be
/// owned (and dropped) exactly once, by the server.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum Inherit {
    #[default]
    Unset,
    Owned(String),
    FromServer,
}

/// An `[iface/<name>]` section: one watched network interface. The
/// `server` field stores the map key of the owning [`Server`]; lookups
/// go back through [`Config::servers`] rather than holding a reference.
#[derive(Debug, Default)]
pub struct Interface {
    pub server: Option<String>,
    pub zone: Inherit,
    pub record: Inherit,
    pub ttl: Option<u32>,
    /// Derive record TTLs from the kernel-reported address lifetime.
    pub respect_ttl: bool,
    /// Allow the startup sync to delete published records no longer
    /// backed by a live address.
    pub delete_existing: bool,
}

impl Interface {
    /// TTL for an update concerning this interface, given the valid
    /// lifetime the kernel reported for the address (None = permanent).
    pub fn update_ttl(&self, valid_lft: Option<u32>) -> u32 {
        if let Some(ttl) = self.ttl {
            return ttl;
        }
        if self.respect_ttl {
            if let Some(lft) = valid_lft {
                return lft.clamp(1, TTL_MAX as u32);
            }
        }
        DEFAULT_TTL
    }
}

/// Everything an update operation needs for one interface, with the
/// zone/record inheritance already resolved.
pub struct Target<'a> {
    pub iface: &'a Interface,
    pub server: &'a Server,
    pub zone: &'a str,
    pub record: &'a str,
}

/// The validated configuration graph.
#[derive(Debug, Default)]
pub struct Config {
    pub servers: Map<String, Server>,
    pub interfaces: Map<String, Interface>,
}

impl Config {
    /// Parses and validates a config file.
    pub fn load(source: &str, path: &str) -> Result<Config> {
        let mut config = Config::default();
        ini::parse(source, path, &mut config)?;
        config.validate()?;
        Ok(config)
    }

    /// Resolves the update target for a watched interface name.
    /// `None` for interfaces this configuration does not manage.
    pub fn target(&self, ifname: &str) -> Option<Target<'_>> {
        let iface = self.interfaces.get(ifname)?;
        let server = self.servers.get(iface.server.as_deref()?)?;
        let zone = match &iface.zone {
            Inherit::Owned(zone) => zone.as_str(),
            Inherit::FromServer => server.zone.as_deref()?,
            Inherit::Unset => return None,
        };
        let record = match &iface.record {
            Inherit::Owned(record) => record.as_str(),
            Inherit::FromServer => server.record.as_deref()?,
            Inherit::Unset => return None,
        };
        Some(Target {
            iface,
            server,
            zone,
            record,
        })
    }

    /// Cross-checks the graph after parsing: interfaces first (marking
    /// their servers used), then servers.
    pub fn validate(&mut self) -> Result<()> {
        let Config {
            servers,
            interfaces,
        } = self;

        let mut failure = None;
        interfaces.for_each_mut(|name, iface| {
            match validate_interface(name, iface, servers) {
                Ok(()) => true,
                Err(e) => {
                    failure = Some(e);
                    false
                }
            }
        });
        if let Some(e) = failure {
            return Err(e);
        }

        let mut failure = None;
        servers.for_each_mut(|name, server| match validate_server(name, server) {
            Ok(()) => true,
            Err(e) => {
                failure = Some(e);
                false
            }
        });
        if let Some(e) = failure {
            return Err(e);
        }

        Ok(())
    }

    fn server_pair(&mut self, name: &str, key: &str, value: &str) -> std::result::Result<(), String> {
        let server = self
            .servers
            .get_or_insert_with(name.to_owned(), Server::default);

        match key {
            "host" => server.host = Some(value.to_owned()),
            "port" => server.port = parse_bounded(value, 1, 65_535)? as u16,
            "max-retry" => server.max_retry = parse_bounded(value, 0, 255)? as u8,
            "key-algo" => {
                server.key.algorithm = Some(
                    TsigAlgorithm::from_name(value)
                        .ok_or_else(|| format!("unknown TSIG algorithm: {value}"))?,
                )
            }
            "key-name" => server.key.name = Some(value.to_owned()),
            "key-secret" => server.key.secret = Some(value.to_owned()),
            "key-file" => server.key.secret = Some(read_key_file(value)?),
            "zone" => server.zone = Some(value.to_owned()),
            "record" => server.record = Some(value.to_owned()),
            "verify-update" => server.verify_update = parse_bool(value)?,
            _ => return Err(format!("unknown server option: {key}")),
        }

        Ok(())
    }

    fn iface_pair(&mut self, name: &str, key: &str, value: &str) -> std::result::Result<(), String> {
        let iface = self
            .interfaces
            .get_or_insert_with(name.to_owned(), Interface::default);

        match key {
            "server" => iface.server = Some(value.to_owned()),
            "zone" => iface.zone = Inherit::Owned(value.to_owned()),
            "record" => iface.record = Inherit::Owned(value.to_owned()),
            "ttl" => {
                let secs = duration::parse(value)?;
                if !(1..=TTL_MAX).contains(&secs) {
                    return Err(format!("ttl must be between 1 second and 7 days: {value}"));
                }
                iface.ttl = Some(secs as u32);
            }
            "respect-ttl" => iface.respect_ttl = parse_bool(value)?,
            "delete-existing" => iface.delete_existing = parse_bool(value)?,
            _ => return Err(format!("unknown interface option: {key}")),
        }

        Ok(())
    }
}

impl ini::Handler for Config {
    fn pair(&mut self, section: &str, key: &str, value: &str) -> std::result::Result<(), String> {
        match section.split_once('/') {
            Some(("server", name)) if !name.is_empty() => self.server_pair(name, key, value),
            Some(("iface", name)) if !name.is_empty() => self.iface_pair(name, key, value),
            _ => Err(format!(
                "unrecognized section '[{section}]', expected [server/<name>] or [iface/<name>]"
            )),
        }
    }
}

fn validate_interface(
    name: &str,
    iface: &mut Interface,
    servers: &mut Map<String, Server>,
) -> Result<()> {
    let section = format!("iface/{name}");

    let server_name = iface
        .server
        .as_deref()
        .ok_or_else(|| Error::config(section.as_str(), "no server configured"))?;
    let server = servers.get_mut(server_name).ok_or_else(|| {
        Error::config(section.as_str(), format!("references unknown server '{server_name}'"))
    })?;
    server.used = true;

    if iface.respect_ttl && iface.ttl.is_some() {
        return Err(Error::config(
            section.as_str(),
            "respect-ttl and an explicit ttl are mutually exclusive",
        ));
    }

    if iface.zone == Inherit::Unset {
        if server.zone.is_some() {
            iface.zone = Inherit::FromServer;
        } else {
            return Err(Error::config(
                section.as_str(),
                "no zone configured here or on its server",
            ));
        }
    }
    if iface.record == Inherit::Unset {
        if server.record.is_some() {
            iface.record = Inherit::FromServer;
        } else {
            return Err(Error::config(
                section.as_str(),
                "no record configured here or on its server",
            ));
        }
    }

    // Qualify the record into the zone when it is not already below it.
    let qualified = {
        let zone = effective(&iface.zone, server.zone.as_deref());
        let record = effective(&iface.record, server.record.as_deref());
        if zone.is_empty() {
            return Err(Error::config(section.as_str(), "zone is empty"));
        }
        if record.is_empty() {
            return Err(Error::config(section.as_str(), "record is empty"));
        }
        if is_subdomain(record, zone) {
            None
        } else {
            Some(format!("{record}.{zone}"))
        }
    };
    if let Some(record) = qualified {
        iface.record = Inherit::Owned(record);
    }

    Ok(())
}

fn validate_server(name: &str, server: &mut Server) -> Result<()> {
    let section = format!("server/{name}");

    match server.key.check() {
        TsigCheck::NoData | TsigCheck::Valid => {}
        TsigCheck::Incomplete => {
            return Err(Error::config(
                section.as_str(),
                "TSIG requires key-algo, key-name and key-secret together",
            ));
        }
        TsigCheck::BadSecret => {
            return Err(Error::config(section.as_str(), "TSIG key secret is not valid base64"));
        }
    }

    let host = server
        .host
        .as_deref()
        .ok_or_else(|| Error::config(section.as_str(), "no host configured"))?;
    let addrs: Vec<SocketAddr> = (host, server.port)
        .to_socket_addrs()
        .map_err(|e| Error::config(section.as_str(), format!("cannot resolve '{host}': {e}")))?
        .collect();
    if addrs.is_empty() {
        return Err(Error::config(
            section.as_str(),
            format!("'{host}' resolved to no addresses"),
        ));
    }
    server.addrs = addrs;

    if !server.used {
        warn!("server/{name} is not referenced by any interface");
    }

    Ok(())
}

fn effective<'a>(name: &'a Inherit, fallback: Option<&'a str>) -> &'a str {
    match name {
        Inherit::Owned(value) => value.as_str(),
        _ => fallback.unwrap_or(""),
    }
}

fn is_subdomain(record: &str, zone: &str) -> bool {
    let record = record.trim_end_matches('.');
    let zone = zone.trim_end_matches('.');

    if record.len() == zone.len() {
        return record.eq_ignore_ascii_case(zone);
    }
    if record.len() > zone.len() {
        let (head, tail) = record.split_at(record.len() - zone.len());
        return tail.eq_ignore_ascii_case(zone) && head.ends_with('.');
    }
    false
}

fn parse_bool(value: &str) -> std::result::Result<bool, String> {
    if value.eq_ignore_ascii_case("yes") || value.eq_ignore_ascii_case("true") || value == "1" {
        Ok(true)
    } else if value.eq_ignore_ascii_case("no")
        || value.eq_ignore_ascii_case("false")
        || value == "0"
    {
        Ok(false)
    } else {
        Err(format!("expected yes/no, true/false or 1/0: {value}"))
    }
}

fn parse_bounded(value: &str, min: u64, max: u64) -> std::result::Result<u64, String> {
    let parsed: u64 = value
        .parse()
        .map_err(|_| format!("invalid number: {value}"))?;
    if !(min..=max).contains(&parsed) {
        return Err(format!("value out of range [{min}, {max}]: {value}"));
    }
    Ok(parsed)
}

fn read_key_file(path: &str) -> std::result::Result<String, String> {
    let content =
        std::fs::read_to_string(path).map_err(|e| format!("could not read key file {path}: {e}"))?;
    let mut secret = content.as_str();
    if let Some(stripped) = secret.strip_suffix('\n') {
        secret = stripped;
    }
    if let Some(stripped) = secret.strip_suffix('\r') {
        secret = stripped;
    }
    Ok(secret.to_owned())
}
