//! Error types shared across the ipup crates.

use thiserror::Error;

/// Result type alias for ipup operations.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    /// A line the config reader or a section handler rejected.
    #[error("{path}:{line}: {msg}")]
    Parse {
        path: String,
        line: usize,
        msg: String,
    },

    /// A section that failed cross-validation after parsing.
    #[error("[{section}]: {msg}")]
    Config { section: String, msg: String },

    /// DNS query/update failure, transport or response level.
    #[error("DNS error: {0}")]
    Dns(String),

    /// Address enumeration or monitoring failure.
    #[error("address source error: {0}")]
    AddrSource(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    pub fn parse(path: impl Into<String>, line: usize, msg: impl Into<String>) -> Self {
        Self::Parse {
            path: path.into(),
            line,
            msg: msg.into(),
        }
    }

    pub fn config(section: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Config {
            section: section.into(),
            msg: msg.into(),
        }
    }

    pub fn dns(msg: impl Into<String>) -> Self {
        Self::Dns(msg.into())
    }

    pub fn addr_source(msg: impl Into<String>) -> Self {
        Self::AddrSource(msg.into())
    }
}
