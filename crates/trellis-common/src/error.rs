//! Error types shared across the manager.

use thiserror::Error;

/// Failure to parse a `proto:host:port` resource URI.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UriError {
    #[error("resource is empty")]
    Empty,
    #[error("resource exceeds {max} bytes")]
    TooLong { max: usize },
    #[error("missing protocol separator in {0:?}")]
    MissingProto(String),
    #[error("missing port in {0:?}")]
    MissingPort(String),
    #[error("invalid port {0:?}")]
    InvalidPort(String),
    #[error("empty hostname in {0:?}")]
    EmptyHost(String),
}

/// Failure to apply a configuration-store write.
///
/// Store writes are eventually consistent; callers log these as warnings
/// and let the next tick retry the transition that needed them.
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    #[error("row not found: {table}/{key}")]
    NotFound { table: String, key: String },
    #[error("store write rejected: {0}")]
    Rejected(String),
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

impl StoreError {
    pub fn not_found(table: &str, key: &str) -> StoreError {
        StoreError::NotFound {
            table: table.to_string(),
            key: key.to_string(),
        }
    }
}
