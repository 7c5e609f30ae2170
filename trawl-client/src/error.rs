//! Error types for trawl-client.
//!
//! Remote failures are classified once here; [`ClientError::is_transient`]
//! drives the retry helper, and the pipeline maps the rest onto its own
//! dispositions (absent-not-error, warn-and-continue, surface).

use std::time::Duration;
use thiserror::Error;

/// Result type alias using our ClientError
pub type Result<T> = std::result::Result<T, ClientError>;

/// Remote client errors.
#[derive(Error, Debug)]
pub enum ClientError {
    /// Timeouts, connection failures, 5xx responses
    #[error("transient remote error: {0}")]
    Transient(String),

    /// Resource absent (engine document/index, extractor target)
    #[error("not found: {0}")]
    NotFound(String),

    /// Conflicting create (engine index already present)
    #[error("already exists: {0}")]
    AlreadyExists(String),

    /// Malformed request; never retried
    #[error("bad request: {0}")]
    BadRequest(String),

    /// Authorization failure
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// Pool acquisition exceeded its bound; surfaces as transient
    #[error("pool acquisition timed out after {0:?}")]
    PoolTimeout(Duration),

    /// JSON decoding error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Local I/O error (cache files, attachments)
    #[error("I/O error: {0}")]
    Io(String),

    /// Anything else
    #[error("{0}")]
    Other(String),
}

impl ClientError {
    /// Create a transient error
    pub fn transient(msg: impl Into<String>) -> Self {
        ClientError::Transient(msg.into())
    }

    /// Create a not-found error
    pub fn not_found(msg: impl Into<String>) -> Self {
        ClientError::NotFound(msg.into())
    }

    /// Create a bad-request error
    pub fn bad_request(msg: impl Into<String>) -> Self {
        ClientError::BadRequest(msg.into())
    }

    /// Create an I/O error
    pub fn io(msg: impl Into<String>) -> Self {
        ClientError::Io(msg.into())
    }

    /// Create a generic error
    pub fn other(msg: impl Into<String>) -> Self {
        ClientError::Other(msg.into())
    }

    /// True for errors the retry helper may retry.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ClientError::Transient(_) | ClientError::PoolTimeout(_)
        )
    }

    /// Classify an HTTP status code with response context.
    pub fn from_status(status: u16, context: String) -> Self {
        match status {
            404 => ClientError::NotFound(context),
            400 => ClientError::BadRequest(context),
            401 | 403 => ClientError::Unauthorized(context),
            409 => ClientError::AlreadyExists(context),
            s if s >= 500 => ClientError::Transient(format!("status {}: {}", s, context)),
            s => ClientError::Other(format!("status {}: {}", s, context)),
        }
    }
}

impl From<reqwest::Error> for ClientError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() || e.is_connect() {
            ClientError::Transient(e.to_string())
        } else if let Some(status) = e.status() {
            ClientError::from_status(status.as_u16(), e.to_string())
        } else {
            ClientError::Other(e.to_string())
        }
    }
}

impl From<std::io::Error> for ClientError {
    fn from(e: std::io::Error) -> Self {
        ClientError::Io(e.to_string())
    }
}

/// Resolve a response into an error when the status is not a success.
///
/// The response body is consumed for error context on failure.
pub(crate) async fn ensure_success(response: reqwest::Response) -> Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(ClientError::from_status(status.as_u16(), body))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_classification() {
        assert!(matches!(
            ClientError::from_status(503, String::new()),
            ClientError::Transient(_)
        ));
        assert!(matches!(
            ClientError::from_status(404, String::new()),
            ClientError::NotFound(_)
        ));
        assert!(matches!(
            ClientError::from_status(400, String::new()),
            ClientError::BadRequest(_)
        ));
        assert!(matches!(
            ClientError::from_status(403, String::new()),
            ClientError::Unauthorized(_)
        ));
    }

    #[test]
    fn test_transient_covers_pool_timeout() {
        assert!(ClientError::PoolTimeout(Duration::from_secs(3)).is_transient());
        assert!(ClientError::transient("x").is_transient());
        assert!(!ClientError::bad_request("x").is_transient());
    }
}
