//! HTTP front end of the relay

pub mod config;
pub mod cors;
pub mod example;
pub mod listener;
pub mod service;

pub use config::{ServerConfig, DEFAULT_HOMEPAGE, DEFAULT_PORT};
pub use listener::ProxyServer;
pub use service::{ProxyBody, ProxyService};
