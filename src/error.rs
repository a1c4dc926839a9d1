//! Typed errors for each component of the relay.
//!
//! Inside a cycle almost every one of these is logged and degraded rather
//! than propagated; see the callers for the exact fallback. Only
//! [`ConfigError`] and [`LedgerError`] can stop the process, and only at
//! startup.

use thiserror::Error;

/// Failure of a single page or feed fetch.
#[derive(Debug, Error)]
pub enum FetchError {
    /// The request did not complete within the attempt's timeout.
    #[error("request to {url} timed out after {timeout_ms} ms")]
    Timeout { url: String, timeout_ms: u64 },
    /// Connection, TLS or body-decoding failure.
    #[error("request to {url} failed: {source}")]
    Http {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    /// Non-2xx response.
    #[error("request to {url} returned HTTP {status}")]
    Status { url: String, status: u16 },
    #[error("invalid URL {url}: {source}")]
    InvalidUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },
}

impl FetchError {
    /// Timeout-class failures are the only ones the retry loop repeats.
    pub fn is_timeout(&self) -> bool {
        matches!(self, FetchError::Timeout { .. })
    }

    /// Classify a reqwest error for `url`, keeping timeouts distinct.
    pub fn from_reqwest(url: &str, timeout_ms: u64, source: reqwest::Error) -> Self {
        if source.is_timeout() {
            FetchError::Timeout {
                url: url.to_string(),
                timeout_ms,
            }
        } else {
            FetchError::Http {
                url: url.to_string(),
                source,
            }
        }
    }
}

/// The feed document could not be read as XML.
#[derive(Debug, Error)]
pub enum FeedError {
    #[error("malformed feed XML at byte {position}: {source}")]
    Xml {
        position: u64,
        #[source]
        source: quick_xml::Error,
    },
}

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("ledger I/O on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// Delivery failure reported by a [`crate::publish::Publisher`].
#[derive(Debug, Error)]
pub enum PublishError {
    #[error("destination {destination} rejected item: {reason}")]
    Rejected { destination: String, reason: String },
    #[error("publisher I/O: {0}")]
    Io(#[from] std::io::Error),
    #[error("could not serialize item: {0}")]
    Serialize(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum PoolError {
    #[error("pool {pool}: invalid sizes core={core} max={max}")]
    InvalidSize {
        pool: String,
        core: usize,
        max: usize,
    },
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("cannot parse config: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}
