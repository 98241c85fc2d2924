//! Request dispatcher
//!
//! Routes each request to the actor owning its resource key, creating and
//! recovering actors on demand, and periodically evicts resources whose
//! time-to-live ran out.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::SystemTime;

use bytes::Bytes;
use http::header::{HeaderValue, HOST};
use http::{HeaderMap, Method};
use tokio::sync::{OnceCell, RwLock};

use super::admin::{AdminRequest, PurgeOutcome};
use super::config::DispatcherConfig;
use super::key::ResourceKey;
use crate::actor::{ActorResponse, ActorStatus, ResourceActor};
use crate::error::{Error, Result};
use crate::store::StoreBackend;
use crate::upstream::{Upstream, UpstreamRequest};

type Slot = Arc<OnceCell<Arc<ResourceActor>>>;

/// Incoming proxied request, already read off the wire
#[derive(Debug, Clone)]
pub struct ProxyRequest {
    /// Method, forwarded verbatim
    pub method: Method,
    /// Request path: `/{host}/{path...}`
    pub path: String,
    /// Raw query string, if any
    pub query: Option<String>,
    /// Headers, forwarded verbatim except `host`
    pub headers: HeaderMap,
    /// Body, forwarded for methods that carry one
    pub body: Bytes,
}

impl ProxyRequest {
    /// A body-less GET for `path`
    pub fn get(path: impl Into<String>) -> Self {
        Self {
            method: Method::GET,
            path: path.into(),
            query: None,
            headers: HeaderMap::new(),
            body: Bytes::new(),
        }
    }
}

/// Maps resource keys to actors
pub struct Dispatcher {
    /// Actor slot per key; a slot is filled once the actor has recovered
    actors: RwLock<HashMap<ResourceKey, Slot>>,
    backend: Arc<dyn StoreBackend>,
    upstream: Arc<dyn Upstream>,
    config: DispatcherConfig,
}

impl Dispatcher {
    /// Create a dispatcher over a storage backend and an upstream
    pub fn new(
        backend: Arc<dyn StoreBackend>,
        upstream: Arc<dyn Upstream>,
        config: DispatcherConfig,
    ) -> Self {
        Self {
            actors: RwLock::new(HashMap::new()),
            backend,
            upstream,
            config,
        }
    }

    /// Get the dispatcher configuration
    pub fn config(&self) -> &DispatcherConfig {
        &self.config
    }

    /// Number of actors currently loaded
    pub async fn actor_count(&self) -> usize {
        self.actors.read().await.len()
    }

    /// Get the actor for `key`, creating and recovering it if needed
    ///
    /// Recovery of one key never blocks requests for other keys: the table
    /// lock is only held to find or insert the slot.
    pub async fn actor(&self, key: &ResourceKey) -> Result<Arc<ResourceActor>> {
        let existing = self.actors.read().await.get(key).cloned();
        let slot = match existing {
            Some(slot) => slot,
            None => {
                let mut actors = self.actors.write().await;
                Arc::clone(actors.entry(key.clone()).or_default())
            }
        };

        let actor = slot
            .get_or_try_init(|| async {
                let store = self.backend.open(key.as_str()).await?;
                ResourceActor::open(
                    key.clone(),
                    store,
                    Arc::clone(&self.upstream),
                    self.config.actor.clone(),
                )
                .await
            })
            .await?;

        Ok(Arc::clone(actor))
    }

    fn upstream_scheme<'a>(&'a self, headers: &'a HeaderMap) -> &'a str {
        match headers
            .get("x-forwarded-proto")
            .and_then(|value| value.to_str().ok())
        {
            Some(proto @ ("http" | "https")) => proto,
            _ => self.config.upstream_scheme.as_str(),
        }
    }

    /// Forward a proxied request to its actor
    pub async fn proxy(&self, request: ProxyRequest) -> Result<ActorResponse> {
        let scheme = self.upstream_scheme(&request.headers);
        let key = ResourceKey::from_proxy_path(scheme, &request.path, request.query.as_deref())?;

        let mut headers = request.headers;
        let host = HeaderValue::from_str(&key.authority())
            .map_err(|e| Error::InvalidTarget(format!("{key}: {e}")))?;
        headers.insert(HOST, host);

        let upstream_request = UpstreamRequest::new(request.method, key.as_str())
            .headers(headers)
            .body(request.body);

        tracing::debug!(key = %key, method = %upstream_request.method, "Dispatching request");

        let actor = self.actor(&key).await?;
        actor.handle(upstream_request).await
    }

    /// Status snapshot for the resource named in an admin body
    pub async fn status(&self, body: &[u8]) -> Result<ActorStatus> {
        let key = AdminRequest::parse_key(body)?;
        self.actor(&key).await?.check_status().await
    }

    /// Purge the resource named in an admin body
    pub async fn purge(&self, body: &[u8]) -> Result<PurgeOutcome> {
        let key = AdminRequest::parse_key(body)?;
        self.actor(&key).await?.purge().await?;
        Ok(PurgeOutcome::cleared())
    }

    /// Load every actor that has persisted state
    ///
    /// Each actor runs its own recovery on load; expired ones are evicted on
    /// the next cleanup. Returns the number of actors loaded.
    pub async fn recover(&self) -> Result<usize> {
        let names = self.backend.names().await?;
        let mut loaded = 0;
        for name in names {
            let key = match ResourceKey::parse(&name) {
                Ok(key) => key,
                Err(e) => {
                    tracing::warn!(name = %name, error = %e, "Skipping unrecoverable store");
                    continue;
                }
            };
            match self.actor(&key).await {
                Ok(_) => loaded += 1,
                Err(e) => {
                    tracing::warn!(key = %key, error = %e, "Failed to recover actor");
                }
            }
        }
        tracing::info!(actors = loaded, "Recovered persisted resources");
        Ok(loaded)
    }

    /// Evict every resource whose deadline is at or before `now`
    ///
    /// Storage of a resource still expired when its turn comes is cleared;
    /// one that a request touched since the scan is left alone. The actor is
    /// dropped from the table only when nothing else (a request in flight or
    /// a draining loop) still holds it. Returns the number of evictions.
    pub async fn evict_expired(&self, now: SystemTime) -> usize {
        let expired: Vec<(ResourceKey, Arc<ResourceActor>)> = {
            let actors = self.actors.read().await;
            actors
                .iter()
                .filter_map(|(key, slot)| {
                    let actor = slot.get()?;
                    actor.is_expired(now).then(|| (key.clone(), Arc::clone(actor)))
                })
                .collect()
        };

        let mut evicted = 0;
        for (key, actor) in expired {
            match actor.on_eviction(now).await {
                Ok(true) => evicted += 1,
                // A request moved the deadline after the scan
                Ok(false) => continue,
                Err(e) => {
                    tracing::warn!(key = %key, error = %e, "Eviction failed");
                    continue;
                }
            }
            drop(actor);

            let mut actors = self.actors.write().await;
            let unused = actors.get(&key).is_some_and(|slot| {
                Arc::strong_count(slot) == 1
                    && slot.get().is_some_and(|actor| Arc::strong_count(actor) == 1)
            });
            if unused {
                actors.remove(&key);
                tracing::debug!(key = %key, "Actor unloaded");
            }
        }
        evicted
    }

    /// Run one eviction pass against the current time
    pub async fn cleanup(&self) -> usize {
        self.evict_expired(SystemTime::now()).await
    }

    /// Spawn background eviction task
    ///
    /// Returns a handle that can be used to abort the task.
    pub fn spawn_eviction_task(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let dispatcher = Arc::clone(self);
        let interval = dispatcher.config.eviction_interval;

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                dispatcher.cleanup().await;
            }
        })
    }
}
