//! Relay-aware HTTP client
//!
//! Rewrites target URLs so requests go through the relay, and wraps the
//! relay's administrative endpoints.
//!
//! ```text
//! https://api.example.com/v1/chat?x=1
//!     -> https://durablefetch.com/api.example.com/v1/chat?x=1
//! ```

use reqwest::{Method, RequestBuilder};
use serde::de::DeserializeOwned;
use url::Url;

use super::config::ClientConfig;
use crate::actor::ActorStatus;
use crate::dispatch::{AdminRequest, PurgeOutcome};
use crate::error::{Error, Result};

/// Longest response excerpt kept in [`Error::InvalidJson`]
const INVALID_JSON_EXCERPT: usize = 1000;

/// Client that sends requests through the relay
///
/// # Example
/// ```no_run
/// use durable_fetch::client::{ClientConfig, DurableFetchClient};
///
/// # async fn example() -> durable_fetch::error::Result<()> {
/// let client = DurableFetchClient::new(ClientConfig::default())?;
///
/// // Safe to retry: a second call joins the same upstream response
/// let response = client.get("https://api.example.com/v1/chat")?.send().await?;
///
/// let status = client.is_in_progress("https://api.example.com/v1/chat").await?;
/// println!("{} chunks stored", status.chunks_stored);
/// # let _ = response;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct DurableFetchClient {
    config: ClientConfig,
    base: Url,
    http: reqwest::Client,
}

impl DurableFetchClient {
    /// Create a client from `config`
    pub fn new(config: ClientConfig) -> Result<Self> {
        Self::with_client(config, reqwest::Client::new())
    }

    /// Create a client reusing an existing `reqwest` client
    pub fn with_client(config: ClientConfig, http: reqwest::Client) -> Result<Self> {
        let base = Url::parse(&config.proxy_base)
            .map_err(|e| Error::InvalidTarget(format!("{}: {e}", config.proxy_base)))?;
        if base.host_str().is_none() {
            return Err(Error::InvalidTarget(format!(
                "{}: missing host",
                config.proxy_base
            )));
        }
        Ok(Self { config, base, http })
    }

    /// Get the client configuration
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    fn is_bypassed(&self, target: &Url) -> bool {
        self.config.bypass_loopback && is_loopback(target)
    }

    /// URL the request for `target` is actually sent to
    pub fn proxied_url(&self, target: &str) -> Result<Url> {
        let target = parse_target(target)?;
        if self.is_bypassed(&target) {
            tracing::warn!(url = %target, "Relay bypassed for loopback URL");
            return Ok(target);
        }

        let authority = match (target.host_str(), target.port()) {
            (Some(host), Some(port)) => format!("{host}:{port}"),
            (Some(host), None) => host.to_string(),
            (None, _) => return Err(Error::InvalidTarget(format!("{target}: missing host"))),
        };

        let mut proxied = self.base.clone();
        proxied.set_path(&format!("/{authority}{}", target.path()));
        proxied.set_query(target.query());
        Ok(proxied)
    }

    /// Start a request for `target` through the relay
    pub fn request(&self, method: Method, target: &str) -> Result<RequestBuilder> {
        let url = self.proxied_url(target)?;
        Ok(self.http.request(method, url))
    }

    /// Start a GET for `target` through the relay
    pub fn get(&self, target: &str) -> Result<RequestBuilder> {
        self.request(Method::GET, target)
    }

    /// Ask the relay about the state of `target`
    pub async fn is_in_progress(&self, target: &str) -> Result<ActorStatus> {
        let url = parse_target(target)?;
        if self.is_bypassed(&url) {
            tracing::warn!(url = %url, "Relay bypassed for loopback URL");
            return Ok(ActorStatus::idle());
        }
        self.admin("/in-progress", &url).await
    }

    /// Ask the relay to forget `target`
    pub async fn delete(&self, target: &str) -> Result<PurgeOutcome> {
        let url = parse_target(target)?;
        if self.is_bypassed(&url) {
            tracing::warn!(url = %url, "Relay bypassed for loopback URL");
            return Ok(PurgeOutcome {
                success: true,
                message: "Fake delete for localhost".to_string(),
            });
        }
        self.admin("/delete", &url).await
    }

    async fn admin<T: DeserializeOwned>(&self, endpoint: &'static str, target: &Url) -> Result<T> {
        let mut url = self.base.clone();
        url.set_path(endpoint);
        url.set_query(None);

        let body = serde_json::to_string(&AdminRequest::new(target.as_str()))?;
        let text = self.http.post(url).body(body).send().await?.text().await?;

        serde_json::from_str(&text).map_err(|_| Error::InvalidJson {
            endpoint,
            body: text.chars().take(INVALID_JSON_EXCERPT).collect(),
        })
    }
}

fn parse_target(target: &str) -> Result<Url> {
    Url::parse(target).map_err(|e| Error::InvalidTarget(format!("{target}: {e}")))
}

fn is_loopback(url: &Url) -> bool {
    matches!(url.host_str(), Some("localhost" | "127.0.0.1"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client() -> DurableFetchClient {
        DurableFetchClient::new(ClientConfig::default()).unwrap()
    }

    #[test]
    fn test_proxied_url() {
        let url = client()
            .proxied_url("https://api.example.com/v1/chat?stream=1")
            .unwrap();
        assert_eq!(
            url.as_str(),
            "https://durablefetch.com/api.example.com/v1/chat?stream=1"
        );
    }

    #[test]
    fn test_proxied_url_keeps_port() {
        let client =
            DurableFetchClient::new(ClientConfig::new("http://relay.internal:8787")).unwrap();
        let url = client.proxied_url("http://example.com:8080/data").unwrap();
        assert_eq!(url.as_str(), "http://relay.internal:8787/example.com:8080/data");
    }

    #[test]
    fn test_loopback_bypass() {
        let client = client();
        let url = client.proxied_url("http://localhost:3000/data").unwrap();
        assert_eq!(url.as_str(), "http://localhost:3000/data");
        let url = client.proxied_url("http://127.0.0.1/data").unwrap();
        assert_eq!(url.as_str(), "http://127.0.0.1/data");
    }

    #[test]
    fn test_loopback_proxied_when_configured() {
        let config = ClientConfig::new("http://relay.internal").proxy_loopback();
        let client = DurableFetchClient::new(config).unwrap();
        let url = client.proxied_url("http://localhost:3000/data").unwrap();
        assert_eq!(url.as_str(), "http://relay.internal/localhost:3000/data");
    }

    #[test]
    fn test_relative_target_rejected() {
        assert!(matches!(
            client().proxied_url("/relative/path"),
            Err(Error::InvalidTarget(_))
        ));
    }

    #[test]
    fn test_invalid_base_rejected() {
        assert!(DurableFetchClient::new(ClientConfig::new("not a url")).is_err());
    }

    #[tokio::test]
    async fn test_loopback_admin_is_faked() {
        let client = client();

        let status = client
            .is_in_progress("http://localhost:3000/data")
            .await
            .unwrap();
        assert_eq!(status, ActorStatus::idle());

        let outcome = client.delete("http://127.0.0.1:3000/data").await.unwrap();
        assert!(outcome.success);
        assert_eq!(outcome.message, "Fake delete for localhost");
    }
}
