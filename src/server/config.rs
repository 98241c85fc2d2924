//! Server configuration

use std::net::SocketAddr;
use std::time::Duration;

use super::example::DEFAULT_EXAMPLE_INTERVAL;
use crate::dispatch::DispatcherConfig;

/// Default listening port
pub const DEFAULT_PORT: u16 = 8787;

/// Where requests for `/` are redirected
pub const DEFAULT_HOMEPAGE: &str = "https://github.com/remorses/durablefetch";

/// Server configuration options
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind to
    pub bind_addr: SocketAddr,

    /// Redirect target for requests to `/`
    pub homepage: String,

    /// Enable TCP_NODELAY (disable Nagle's algorithm)
    pub tcp_nodelay: bool,

    /// Delay between events of the demo stream
    pub example_interval: Duration,

    /// Dispatcher and actor configuration
    pub dispatcher: DispatcherConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], DEFAULT_PORT)),
            homepage: DEFAULT_HOMEPAGE.to_string(),
            tcp_nodelay: true, // Chunks are relayed as soon as they arrive
            example_interval: DEFAULT_EXAMPLE_INTERVAL,
            dispatcher: DispatcherConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Create a new config with custom bind address
    pub fn with_addr(addr: SocketAddr) -> Self {
        Self {
            bind_addr: addr,
            ..Default::default()
        }
    }

    /// Set the bind address
    pub fn bind(mut self, addr: SocketAddr) -> Self {
        self.bind_addr = addr;
        self
    }

    /// Set the homepage redirect target
    pub fn homepage(mut self, url: impl Into<String>) -> Self {
        self.homepage = url.into();
        self
    }

    /// Set the delay between demo stream events
    pub fn example_interval(mut self, interval: Duration) -> Self {
        self.example_interval = interval;
        self
    }

    /// Set the dispatcher configuration
    pub fn dispatcher(mut self, dispatcher: DispatcherConfig) -> Self {
        self.dispatcher = dispatcher;
        self
    }

    /// Set the resource time-to-live
    pub fn ttl(mut self, ttl: Duration) -> Self {
        self.dispatcher = self.dispatcher.ttl(ttl);
        self
    }

    /// Set the default upstream scheme
    pub fn upstream_scheme(mut self, scheme: impl Into<String>) -> Self {
        self.dispatcher = self.dispatcher.upstream_scheme(scheme);
        self
    }
}
