//! Durable per-actor key-value storage
//!
//! Every resource actor owns one [`ChunkStore`]: a small key-value namespace
//! with ordered prefix listing, point reads and writes, an atomic delete-all
//! and a single deferred alarm. The chunk log lives in it under keys that
//! sort in sequence order, next to a handful of metadata entries.
//!
//! # Layout
//!
//! ```text
//!   seq         -> next sequence number (JSON number)
//!   open        -> upstream fetch in progress (JSON bool)
//!   completed   -> upstream body fully drained (JSON bool)
//!   headers     -> captured response headers (JSON object)
//!   c:000000000 -> raw chunk bytes
//!   c:000000001 -> raw chunk bytes
//!   ...
//!   <alarm>     -> eviction deadline (outside the key space)
//! ```
//!
//! Stores are handed out by a [`StoreBackend`], which derives a stable
//! storage identity from the actor's name and can enumerate the names of
//! actors that still have persisted state.

pub mod error;
pub mod fs;
pub mod memory;

use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::Serialize;
use sha2::{Digest, Sha256};

pub use error::StoreError;
pub use fs::{FsBackend, FsStore};
pub use memory::{MemoryBackend, MemoryStore};

/// Storage namespace owned by a single actor
#[async_trait]
pub trait ChunkStore: Send + Sync + 'static {
    /// Read a single value
    async fn get(&self, key: &str) -> Result<Option<Bytes>, StoreError>;

    /// Write a single value, replacing any previous one
    async fn put(&self, key: &str, value: Bytes) -> Result<(), StoreError>;

    /// List all entries whose key starts with `prefix`, in ascending key order
    async fn list(&self, prefix: &str) -> Result<Vec<(String, Bytes)>, StoreError>;

    /// Remove every key-value entry at once
    ///
    /// The alarm is not part of the key space and survives this call.
    async fn delete_all(&self) -> Result<(), StoreError>;

    /// Arm (or re-arm) the alarm to fire at `at`
    async fn set_alarm(&self, at: SystemTime) -> Result<(), StoreError>;

    /// Currently armed alarm, if any
    async fn get_alarm(&self) -> Result<Option<SystemTime>, StoreError>;

    /// Disarm the alarm
    async fn delete_alarm(&self) -> Result<(), StoreError>;
}

/// Typed JSON helpers on top of [`ChunkStore`]
#[async_trait]
pub trait ChunkStoreExt: ChunkStore {
    /// Read and decode a JSON value
    async fn get_json<T>(&self, key: &str) -> Result<Option<T>, StoreError>
    where
        T: DeserializeOwned + Send,
    {
        match self.get(key).await? {
            Some(raw) => serde_json::from_slice(&raw)
                .map(Some)
                .map_err(|e| StoreError::corrupt(key, e)),
            None => Ok(None),
        }
    }

    /// Encode and write a JSON value
    async fn put_json<T>(&self, key: &str, value: &T) -> Result<(), StoreError>
    where
        T: Serialize + Sync + ?Sized,
    {
        let raw = serde_json::to_vec(value).map_err(|e| StoreError::corrupt(key, e))?;
        self.put(key, Bytes::from(raw)).await
    }
}

impl<S: ChunkStore + ?Sized> ChunkStoreExt for S {}

/// Source of per-actor stores
#[async_trait]
pub trait StoreBackend: Send + Sync + 'static {
    /// Open (creating lazily) the store for the actor called `name`
    async fn open(&self, name: &str) -> Result<Arc<dyn ChunkStore>, StoreError>;

    /// Names of actors that currently have persisted state or an armed alarm
    async fn names(&self) -> Result<Vec<String>, StoreError>;
}

/// Stable storage identity for an actor name
///
/// Hex-encoded SHA-256 of the name, so any URL maps to a fixed-size,
/// filesystem-safe identifier.
pub fn actor_id(name: &str) -> String {
    hex::encode(Sha256::digest(name.as_bytes()))
}

pub(crate) fn alarm_to_millis(at: SystemTime) -> u64 {
    at.duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

pub(crate) fn alarm_from_millis(millis: u64) -> SystemTime {
    UNIX_EPOCH + Duration::from_millis(millis)
}
