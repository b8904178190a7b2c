//! TSIG credential handling.
//!
//! A server's key material is an all-or-nothing triple: algorithm, key
//! name, and base64 secret. A server with none of the three sends
//! unsigned updates; anything in between is a configuration error.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;

/// TSIG HMAC algorithms ipup accepts in `key-algo`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TsigAlgorithm {
    HmacMd5,
    HmacSha1,
    HmacSha224,
    HmacSha256,
    HmacSha384,
    HmacSha512,
}

impl TsigAlgorithm {
    /// Case-insensitive lookup against the supported-algorithm table.
    pub fn from_name(name: &str) -> Option<Self> {
        SUPPORTED
            .iter()
            .find(|(candidate, _)| name.eq_ignore_ascii_case(candidate))
            .map(|&(_, algorithm)| algorithm)
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::HmacMd5 => "hmac-md5",
            Self::HmacSha1 => "hmac-sha1",
            Self::HmacSha224 => "hmac-sha224",
            Self::HmacSha256 => "hmac-sha256",
            Self::HmacSha384 => "hmac-sha384",
            Self::HmacSha512 => "hmac-sha512",
        }
    }
}

const SUPPORTED: [(&str, TsigAlgorithm); 6] = [
    ("hmac-md5", TsigAlgorithm::HmacMd5),
    ("hmac-sha1", TsigAlgorithm::HmacSha1),
    ("hmac-sha224", TsigAlgorithm::HmacSha224),
    ("hmac-sha256", TsigAlgorithm::HmacSha256),
    ("hmac-sha384", TsigAlgorithm::HmacSha384),
    ("hmac-sha512", TsigAlgorithm::HmacSha512),
];

/// TSIG credentials as collected from a `[server/...]` section.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TsigKey {
    pub algorithm: Option<TsigAlgorithm>,
    pub name: Option<String>,
    pub secret: Option<String>,
}

/// Outcome of [`TsigKey::check`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TsigCheck {
    /// No key material at all; updates go unsigned.
    NoData,
    /// Only part of the triple was configured.
    Incomplete,
    /// The secret is not canonical padded base64.
    BadSecret,
    Valid,
}

impl TsigKey {
    pub fn check(&self) -> TsigCheck {
        match (&self.algorithm, &self.name, &self.secret) {
            (None, None, None) => TsigCheck::NoData,
            (Some(_), Some(_), Some(secret)) => {
                if secret.len() < 4 || STANDARD.decode(secret).is_err() {
                    TsigCheck::BadSecret
                } else {
                    TsigCheck::Valid
                }
            }
            _ => TsigCheck::Incomplete,
        }
    }

    /// True when updates through this key must be signed.
    pub fn is_signing(&self) -> bool {
        self.check() == TsigCheck::Valid
    }
}
