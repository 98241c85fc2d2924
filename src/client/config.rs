//! Client configuration

/// Relay used when none is configured
pub const DEFAULT_PROXY_BASE: &str = "https://durablefetch.com";

/// Client configuration
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Base URL of the relay
    pub proxy_base: String,

    /// Talk to `localhost` and `127.0.0.1` directly instead of through the relay
    pub bypass_loopback: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            proxy_base: DEFAULT_PROXY_BASE.to_string(),
            bypass_loopback: true,
        }
    }
}

impl ClientConfig {
    /// Create a config for the relay at `proxy_base`
    pub fn new(proxy_base: impl Into<String>) -> Self {
        Self {
            proxy_base: proxy_base.into(),
            ..Default::default()
        }
    }

    /// Route loopback targets through the relay as well
    pub fn proxy_loopback(mut self) -> Self {
        self.bypass_loopback = false;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ClientConfig::default();
        assert_eq!(config.proxy_base, "https://durablefetch.com");
        assert!(config.bypass_loopback);
    }

    #[test]
    fn test_proxy_loopback() {
        let config = ClientConfig::new("http://127.0.0.1:8787").proxy_loopback();
        assert_eq!(config.proxy_base, "http://127.0.0.1:8787");
        assert!(!config.bypass_loopback);
    }
}
