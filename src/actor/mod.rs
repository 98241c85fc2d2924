//! Per-resource actors
//!
//! A resource actor coalesces every request for one upstream URL into a
//! single fetch, persists the body as an ordered chunk log and streams it to
//! all callers, including callers that arrive after the fetch has started or
//! finished.
//!
//! # Architecture
//!
//! ```text
//!   request ──► handle()
//!                 │  bootstrap lock: start upstream fetch at most once
//!                 ▼
//!              attach()  ◄── log lock ──►  drain loop (background task)
//!                 │   replay c:000.. c:N        │  append c:N+1, seq = N+2
//!                 │   register sink             │  broadcast to live sinks
//!                 ▼                             ▼
//!            ChunkStream  ◄──────────── Broadcaster
//! ```
//!
//! Replay and registration happen under the same lock as append and
//! broadcast, so a caller's stream is always a gap-free, duplicate-free
//! prefix of the log followed by its live tail.

pub mod broadcast;
pub mod config;
pub mod resource;
pub mod state;
pub mod stream;

pub use broadcast::{Broadcaster, SubscriberId};
pub use config::{ActorConfig, DEFAULT_TTL};
pub use resource::ResourceActor;
pub use state::{chunk_key, ActorPhase, ActorStatus};
pub use stream::{ActorResponse, ChunkStream, ResponseBody};
