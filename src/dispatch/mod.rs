//! Request dispatch
//!
//! The dispatcher turns an incoming request into a [`ResourceKey`] and hands
//! it to the [`ResourceActor`](crate::actor::ResourceActor) owning that key.
//!
//! - Proxied requests carry the upstream in their path:
//!   `/{host}/{path...}?{query}` becomes `{scheme}://{host}/{path...}?{query}`.
//! - Administrative requests carry the upstream URL in a JSON body:
//!   `{"url": "https://example.com/data"}`.
//!
//! Both forms normalize to the same key, so `/delete` with
//! `https://example.com/data` purges what `GET /example.com/data` cached.

pub mod admin;
pub mod config;
pub mod dispatcher;
pub mod key;

pub use admin::{AdminRequest, PurgeOutcome};
pub use config::DispatcherConfig;
pub use dispatcher::{Dispatcher, ProxyRequest};
pub use key::ResourceKey;
