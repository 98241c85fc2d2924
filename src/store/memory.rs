//! In-memory store
//!
//! Keeps everything in a `BTreeMap`, which gives ordered prefix listing for
//! free. A [`MemoryBackend`] hands out the same store for the same name for
//! as long as the backend lives, so dropping and re-creating actors on top of
//! it behaves like a process restart with durable storage.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::SystemTime;

use async_trait::async_trait;
use bytes::Bytes;

use super::{actor_id, ChunkStore, StoreBackend, StoreError};

#[derive(Debug, Default)]
struct MemoryInner {
    entries: BTreeMap<String, Bytes>,
    alarm: Option<SystemTime>,
}

/// Store backed by process memory
#[derive(Debug)]
pub struct MemoryStore {
    name: String,
    inner: Mutex<MemoryInner>,
}

impl MemoryStore {
    /// Create an empty store for `name`
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            inner: Mutex::new(MemoryInner::default()),
        }
    }

    /// Name this store was opened for
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether the store holds no entries and no alarm
    pub fn is_empty(&self) -> bool {
        let inner = self.lock();
        inner.entries.is_empty() && inner.alarm.is_none()
    }

    fn lock(&self) -> MutexGuard<'_, MemoryInner> {
        // A poisoned map is still structurally valid
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl ChunkStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<Bytes>, StoreError> {
        Ok(self.lock().entries.get(key).cloned())
    }

    async fn put(&self, key: &str, value: Bytes) -> Result<(), StoreError> {
        self.lock().entries.insert(key.to_string(), value);
        Ok(())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<(String, Bytes)>, StoreError> {
        let inner = self.lock();
        Ok(inner
            .entries
            .range(prefix.to_string()..)
            .take_while(|(key, _)| key.starts_with(prefix))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect())
    }

    async fn delete_all(&self) -> Result<(), StoreError> {
        self.lock().entries.clear();
        Ok(())
    }

    async fn set_alarm(&self, at: SystemTime) -> Result<(), StoreError> {
        self.lock().alarm = Some(at);
        Ok(())
    }

    async fn get_alarm(&self) -> Result<Option<SystemTime>, StoreError> {
        Ok(self.lock().alarm)
    }

    async fn delete_alarm(&self) -> Result<(), StoreError> {
        self.lock().alarm = None;
        Ok(())
    }
}

/// Backend that keeps every actor's store in memory
#[derive(Debug, Default)]
pub struct MemoryBackend {
    stores: Mutex<HashMap<String, Arc<MemoryStore>>>,
}

impl MemoryBackend {
    /// Create an empty backend
    pub fn new() -> Self {
        Self::default()
    }

    /// Direct access to the store for `name`, creating it if needed
    pub fn store(&self, name: &str) -> Arc<MemoryStore> {
        let mut stores = self.stores.lock().unwrap_or_else(|p| p.into_inner());
        Arc::clone(
            stores
                .entry(actor_id(name))
                .or_insert_with(|| Arc::new(MemoryStore::new(name))),
        )
    }
}

#[async_trait]
impl StoreBackend for MemoryBackend {
    async fn open(&self, name: &str) -> Result<Arc<dyn ChunkStore>, StoreError> {
        Ok(self.store(name))
    }

    async fn names(&self) -> Result<Vec<String>, StoreError> {
        let stores = self.stores.lock().unwrap_or_else(|p| p.into_inner());
        let mut names: Vec<String> = stores
            .values()
            .filter(|store| !store.is_empty())
            .map(|store| store.name().to_string())
            .collect();
        names.sort();
        Ok(names)
    }
}
