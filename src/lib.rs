//! Coalescing HTTP fetch relay with a persistent, replayable chunk log
//!
//! Requests for the same upstream URL share a single upstream fetch. Every
//! chunk of the response is persisted in order, so clients that join late,
//! or reconnect after a drop, first get what was already received and then
//! follow the live stream until it ends. Completed responses are served
//! from storage until their time-to-live runs out.
//!
//! # Example
//! ```no_run
//! use std::sync::Arc;
//!
//! use durable_fetch::{HttpUpstream, MemoryBackend, ProxyServer, ServerConfig};
//!
//! # async fn example() -> durable_fetch::Result<()> {
//! let server = ProxyServer::new(
//!     ServerConfig::default(),
//!     Arc::new(MemoryBackend::new()),
//!     Arc::new(HttpUpstream::new()),
//! );
//! server.run().await
//! # }
//! ```

pub mod actor;
pub mod client;
pub mod dispatch;
pub mod error;
pub mod server;
pub mod store;
pub mod upstream;

pub use actor::{ActorConfig, ActorStatus, ResourceActor};
pub use client::{ClientConfig, DurableFetchClient};
pub use dispatch::{Dispatcher, DispatcherConfig, ResourceKey};
pub use error::{Error, Result};
pub use server::{ProxyServer, ServerConfig};
pub use store::{FsBackend, MemoryBackend};
pub use upstream::HttpUpstream;
