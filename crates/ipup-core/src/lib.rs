//! # ipup-core
//!
//! Core library for the ipup dynamic DNS daemon.
//!
//! - **Map**: the chained hash map backing every keyed table
//! - **Config**: the server/interface graph parsed from the INI file
//! - **reconcile**: the one-shot startup sync against published records
//! - **Engine**: the incremental event loop
//! - **traits**: the [`AddrSource`]/[`DnsUpdater`] collaborator seams
//!
//! The daemon wires these together: load and validate the config,
//! reconcile once, then hand the reconciler's address table to the
//! engine and run until a termination signal.

pub mod config;
pub mod engine;
pub mod error;
pub mod ini;
pub mod map;
pub mod reconcile;
pub mod traits;
pub mod tsig;

pub use config::{Config, Interface, Server};
pub use engine::Engine;
pub use error::{Error, Result};
pub use map::Map;
pub use reconcile::reconcile;
pub use traits::{AddrSource, AddrUpdate, DnsUpdater, HostAddr};
pub use tsig::{TsigAlgorithm, TsigCheck, TsigKey};
