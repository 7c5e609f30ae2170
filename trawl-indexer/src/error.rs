//! Error types for the maintenance pipeline.

use std::time::Duration;
use thiserror::Error;

/// Result type alias using our IndexerError
pub type Result<T> = std::result::Result<T, IndexerError>;

/// Pipeline errors.
#[derive(Error, Debug)]
pub enum IndexerError {
    /// Model / configuration error
    #[error(transparent)]
    Core(#[from] trawl_core::Error),

    /// Remote client error
    #[error(transparent)]
    Client(#[from] trawl_client::ClientError),

    /// An index stayed in `updating` past the readiness bound
    #[error("index not ready within {0:?}")]
    ReadinessTimeout(Duration),

    /// Two indexes registered for the same (type, groups) partition
    #[error("duplicate index for type '{type_name}' and groups {groups}")]
    DuplicateIndex { type_name: String, groups: String },

    /// Unknown type name requested
    #[error("unknown type '{0}'")]
    UnknownType(String),

    /// Incoming delta that is not a changeset list
    #[error("malformed delta: {0}")]
    MalformedDelta(String),

    /// Anything else
    #[error("{0}")]
    Other(String),
}

impl IndexerError {
    /// Create a generic error
    pub fn other(msg: impl Into<String>) -> Self {
        IndexerError::Other(msg.into())
    }
}
