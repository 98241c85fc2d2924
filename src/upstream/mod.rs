//! Upstream HTTP access
//!
//! The actor talks to the origin through the [`Upstream`] trait so the fetch
//! path can be driven by a real HTTP client in production and by a scripted
//! double in tests.

pub mod http;
#[cfg(test)]
pub(crate) mod testing;

use std::collections::BTreeMap;
use std::fmt;

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use ::http::{HeaderMap, Method};

pub use self::http::HttpUpstream;

/// Response headers as captured and persisted: lowercase names, repeated
/// values joined with `", "`
pub type Headers = BTreeMap<String, String>;

/// Incrementally delivered response body
pub type BodyStream = BoxStream<'static, Result<Bytes, UpstreamError>>;

/// Hop-by-hop headers that must not be forwarded with a relayed response
const HOP_BY_HOP: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

/// Error talking to the upstream
#[derive(Debug, Clone, thiserror::Error)]
pub enum UpstreamError {
    /// The request could not be sent or no response head arrived
    #[error("request failed: {0}")]
    Request(String),

    /// The response body failed mid-read
    #[error("body read failed: {0}")]
    Body(String),
}

/// Request forwarded to the upstream
#[derive(Debug, Clone)]
pub struct UpstreamRequest {
    /// HTTP method, passed through verbatim
    pub method: Method,
    /// Absolute upstream URL
    pub url: String,
    /// Request headers, passed through verbatim
    pub headers: HeaderMap,
    /// Request body; `None` for read-only methods
    pub body: Option<Bytes>,
}

impl UpstreamRequest {
    /// Create a body-less request
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            headers: HeaderMap::new(),
            body: None,
        }
    }

    /// Shorthand for a GET request
    pub fn get(url: impl Into<String>) -> Self {
        Self::new(Method::GET, url)
    }

    /// Set the headers
    pub fn headers(mut self, headers: HeaderMap) -> Self {
        self.headers = headers;
        self
    }

    /// Set the body; dropped for GET and HEAD
    pub fn body(mut self, body: Bytes) -> Self {
        self.body = if is_read_only(&self.method) {
            None
        } else {
            Some(body)
        };
        self
    }
}

/// Whether requests with this method never carry a body upstream
pub fn is_read_only(method: &Method) -> bool {
    *method == Method::GET || *method == Method::HEAD
}

/// Response head plus a streaming body
pub struct UpstreamResponse {
    /// Status code
    pub status: u16,
    /// Response headers, hop-by-hop headers removed
    pub headers: Headers,
    /// Body chunks in arrival order
    pub body: BodyStream,
}

impl UpstreamResponse {
    /// Whether the status is in the 2xx range
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

impl fmt::Debug for UpstreamResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UpstreamResponse")
            .field("status", &self.status)
            .field("headers", &self.headers)
            .finish_non_exhaustive()
    }
}

/// Source of upstream responses
#[async_trait]
pub trait Upstream: Send + Sync + 'static {
    /// Issue `request` and return once the response head is available
    async fn fetch(&self, request: UpstreamRequest) -> Result<UpstreamResponse, UpstreamError>;
}

/// Flatten a header map into the persisted form
pub fn capture_headers(map: &HeaderMap) -> Headers {
    let mut headers = Headers::new();
    for (name, value) in map {
        let name = name.as_str();
        if HOP_BY_HOP.contains(&name) {
            continue;
        }
        let value = String::from_utf8_lossy(value.as_bytes()).into_owned();
        headers
            .entry(name.to_string())
            .and_modify(|existing| {
                existing.push_str(", ");
                existing.push_str(&value);
            })
            .or_insert(value);
    }
    headers
}
