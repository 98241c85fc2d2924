//! Crate-level error types

use crate::dispatch::ResourceKey;
use crate::store::StoreError;
use crate::upstream::UpstreamError;

/// Result alias used throughout the crate
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by the relay
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Persistent storage failed
    #[error("storage error: {0}")]
    Store(#[from] StoreError),

    /// The upstream could not be reached while starting a fetch
    #[error("upstream request failed: {0}")]
    Upstream(#[source] UpstreamError),

    /// The upstream body failed while it was being drained
    #[error("upstream stream failed: {0}")]
    UpstreamStream(#[source] UpstreamError),

    /// Headers were expected in storage but are missing
    #[error("cannot find headers for {0}")]
    MissingHeaders(ResourceKey),

    /// An administrative request did not carry a usable target URL
    #[error("malformed admin request: {0}")]
    MalformedAdminRequest(String),

    /// A proxied path or URL could not be turned into a resource key
    #[error("Invalid request: {0}")]
    InvalidTarget(String),

    /// Reading the incoming request body failed
    #[error("failed to read request body: {0}")]
    RequestBody(#[source] hyper::Error),

    /// Client-side HTTP failure
    #[error("http client error: {0}")]
    Http(#[from] reqwest::Error),

    /// The service answered with something that is not the expected JSON
    #[error("{endpoint} returned invalid JSON: {body}")]
    InvalidJson {
        /// Administrative endpoint that was called
        endpoint: &'static str,
        /// Leading part of the response body
        body: String,
    },

    /// JSON encoding failed
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// HTTP status code this error maps to when returned to a caller
    pub fn status_code(&self) -> u16 {
        match self {
            Error::MalformedAdminRequest(_) | Error::InvalidTarget(_) | Error::RequestBody(_) => {
                400
            }
            Error::Upstream(_) => 502,
            _ => 500,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(Error::MalformedAdminRequest("x".into()).status_code(), 400);
        assert_eq!(Error::InvalidTarget("x".into()).status_code(), 400);
        assert_eq!(
            Error::Upstream(UpstreamError::Request("refused".into())).status_code(),
            502
        );
        let key = ResourceKey::parse("https://example.com/data").unwrap();
        assert_eq!(Error::MissingHeaders(key).status_code(), 500);
    }

    #[test]
    fn test_missing_headers_message() {
        let key = ResourceKey::parse("https://example.com/data").unwrap();
        let err = Error::MissingHeaders(key);
        assert_eq!(
            err.to_string(),
            "cannot find headers for https://example.com/data"
        );
    }
}
