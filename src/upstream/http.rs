//! reqwest-backed upstream

use async_trait::async_trait;
use futures::{StreamExt, TryStreamExt};

use ::http::header::CONTENT_LENGTH;

use super::{
    capture_headers, Upstream, UpstreamError, UpstreamRequest, UpstreamResponse, HOP_BY_HOP,
};

/// Upstream reached over the network with a shared `reqwest` client
///
/// No overall request timeout is configured: relayed bodies such as model
/// completions may legitimately stream for a long time.
#[derive(Debug, Clone)]
pub struct HttpUpstream {
    client: reqwest::Client,
}

impl HttpUpstream {
    /// Create an upstream with a default client
    pub fn new() -> Self {
        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self { client }
    }

    /// Create an upstream from an existing client
    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

impl Default for HttpUpstream {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Upstream for HttpUpstream {
    async fn fetch(&self, request: UpstreamRequest) -> Result<UpstreamResponse, UpstreamError> {
        // The body is re-framed by the client
        let mut headers = request.headers;
        for name in HOP_BY_HOP {
            headers.remove(*name);
        }
        headers.remove(CONTENT_LENGTH);

        let mut builder = self
            .client
            .request(request.method.clone(), &request.url)
            .headers(headers);
        if let Some(body) = request.body {
            builder = builder.body(body);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| UpstreamError::Request(e.to_string()))?;

        let status = response.status().as_u16();
        let headers = capture_headers(response.headers());
        tracing::debug!(
            method = %request.method,
            url = %request.url,
            status = status,
            "Upstream responded"
        );

        let body = response
            .bytes_stream()
            .map_err(|e| UpstreamError::Body(e.to_string()))
            .boxed();

        Ok(UpstreamResponse {
            status,
            headers,
            body,
        })
    }
}
