//! Client side of the relay
//!
//! Provides a `reqwest`-based client that:
//! - Rewrites target URLs to go through a relay
//! - Queries and purges resources via the administrative endpoints

pub mod config;
pub mod durable;

pub use config::{ClientConfig, DEFAULT_PROXY_BASE};
pub use durable::DurableFetchClient;
