//! Per-resource actor
//!
//! One [`ResourceActor`] exists per resource key. It decides whether a
//! request starts the upstream fetch or attaches to the one already running,
//! appends the upstream body to the chunk log, and serves every caller the
//! persisted prefix followed by live chunks.
//!
//! Two locks give the actor its single-threaded semantics:
//!
//! - `bootstrap` serializes fetch initiation, so two simultaneous first
//!   requests cannot both reach the upstream. It is held across the upstream
//!   call.
//! - `log` guards the in-memory state and is held for each chunk append plus
//!   broadcast, and for each replay plus subscriber registration. A new
//!   subscriber therefore sees every chunk exactly once: either in its replay
//!   or from the broadcaster, never both and never neither.
//!
//! A third lock, `alarm`, orders deadline updates against eviction: a
//! request either moves the deadline before an eviction looks at it, or
//! arms a fresh one after the eviction is done.

use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::SystemTime;

use futures::{FutureExt, StreamExt};
use tokio::sync::{mpsc, watch, Mutex};

use super::broadcast::Broadcaster;
use super::config::ActorConfig;
use super::state::{
    chunk_key, ActorPhase, ActorStatus, LogState, CHUNK_PREFIX, KEY_COMPLETED, KEY_HEADERS,
    KEY_OPEN, KEY_SEQ,
};
use super::stream::{ActorResponse, ChunkStream, ResponseBody};
use crate::dispatch::ResourceKey;
use crate::error::{Error, Result};
use crate::store::{ChunkStore, ChunkStoreExt};
use crate::upstream::{BodyStream, Headers, Upstream, UpstreamRequest};

/// How a draining loop ended
enum Drained {
    /// The upstream body ended
    Finished,
    /// State was wiped while draining; this loop no longer owns the log
    Superseded,
}

/// Single-flight fetch coordinator and chunk log for one resource
pub struct ResourceActor {
    key: ResourceKey,
    store: Arc<dyn ChunkStore>,
    upstream: Arc<dyn Upstream>,
    config: ActorConfig,
    bootstrap: Mutex<()>,
    log: Mutex<LogState>,
    live: Arc<Broadcaster>,
    /// Current generation, so a draining loop notices a wipe while idle
    generation: watch::Sender<u64>,
    alarm: Mutex<()>,
    deadline: StdMutex<Option<SystemTime>>,
}

impl ResourceActor {
    /// Restore an actor from its store
    ///
    /// The sequence counter, flags and headers are read back before the actor
    /// is returned, so no request ever observes a half-recovered state. A
    /// persisted in-progress fetch cannot have a draining loop behind it
    /// after a restart; that partial log is discarded and the resource starts
    /// idle, so the next request fetches again from sequence 0.
    pub async fn open(
        key: ResourceKey,
        store: Arc<dyn ChunkStore>,
        upstream: Arc<dyn Upstream>,
        config: ActorConfig,
    ) -> Result<Arc<Self>> {
        let mut state = LogState {
            next_seq: store.get_json(KEY_SEQ).await?.unwrap_or(0),
            fetching: store.get_json(KEY_OPEN).await?.unwrap_or(false),
            completed: store.get_json(KEY_COMPLETED).await?.unwrap_or(false),
            headers: store.get_json(KEY_HEADERS).await?,
            generation: 0,
        };

        if state.fetching && !state.completed {
            tracing::warn!(
                key = %key,
                chunks = state.next_seq,
                "Discarding partial log of a fetch interrupted by restart"
            );
            store.delete_all().await?;
            state.reset();
        } else if state.fetching {
            // Completed wins over a stale open flag
            state.fetching = false;
        }

        let deadline = store.get_alarm().await?;

        tracing::debug!(
            key = %key,
            phase = ?state.phase(),
            chunks = state.next_seq,
            "Actor recovered"
        );

        Ok(Arc::new(Self {
            key,
            store,
            upstream,
            config,
            bootstrap: Mutex::new(()),
            generation: watch::channel(state.generation).0,
            log: Mutex::new(state),
            live: Arc::new(Broadcaster::new()),
            alarm: Mutex::new(()),
            deadline: StdMutex::new(deadline),
        }))
    }

    /// Resource key this actor serves
    pub fn key(&self) -> &ResourceKey {
        &self.key
    }

    /// Current lifecycle phase
    pub async fn phase(&self) -> ActorPhase {
        self.log.lock().await.phase()
    }

    /// Eviction deadline, if armed
    pub fn deadline(&self) -> Option<SystemTime> {
        *self.deadline.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Whether the eviction deadline has passed at `now`
    pub fn is_expired(&self, now: SystemTime) -> bool {
        self.deadline().is_some_and(|deadline| deadline <= now)
    }

    /// Push the eviction deadline to `now + ttl`
    async fn touch(&self) -> Result<()> {
        let _alarm = self.alarm.lock().await;
        let deadline = SystemTime::now() + self.config.ttl;
        self.store.set_alarm(deadline).await?;
        *self.deadline.lock().unwrap_or_else(|p| p.into_inner()) = Some(deadline);
        Ok(())
    }

    /// Serve one client request
    ///
    /// Starts the upstream fetch if nobody has, then returns a stream that
    /// replays the persisted log and, while the fetch is running, follows it
    /// live. A non-2xx upstream answer is relayed to this caller only and
    /// leaves no trace, so the next request tries again.
    pub async fn handle(self: &Arc<Self>, request: UpstreamRequest) -> Result<ActorResponse> {
        self.touch().await?;

        let mut headers = None;
        let completed = self.log.lock().await.completed;
        if !completed {
            let _bootstrap = self.bootstrap.lock().await;

            let (fetching, completed) = {
                let log = self.log.lock().await;
                (log.fetching, log.completed)
            };

            if !fetching && !completed {
                let response = self
                    .upstream
                    .fetch(request)
                    .await
                    .map_err(Error::Upstream)?;

                if !response.is_success() {
                    tracing::info!(
                        key = %self.key,
                        status = response.status,
                        "Upstream refused, not caching"
                    );
                    return Ok(ActorResponse {
                        status: response.status,
                        headers: response.headers,
                        body: ResponseBody::Passthrough(response.body),
                    });
                }

                let generation = {
                    let mut log = self.log.lock().await;
                    self.store.put_json(KEY_OPEN, &true).await?;
                    self.store.put_json(KEY_HEADERS, &response.headers).await?;
                    log.fetching = true;
                    log.headers = Some(response.headers.clone());
                    log.generation
                };

                tracing::info!(key = %self.key, status = response.status, "Upstream fetch started");

                headers = Some(response.headers);
                self.spawn_drain(response.body, generation);
            }
        }

        let headers = match headers {
            Some(headers) => headers,
            None => self.stored_headers().await?,
        };

        let body = self.attach().await?;

        Ok(ActorResponse {
            status: 200,
            headers: with_no_store(headers),
            body: ResponseBody::Log(body),
        })
    }

    async fn stored_headers(&self) -> Result<Headers> {
        if let Some(headers) = self.log.lock().await.headers.clone() {
            return Ok(headers);
        }
        self.store
            .get_json::<Headers>(KEY_HEADERS)
            .await?
            .ok_or_else(|| Error::MissingHeaders(self.key.clone()))
    }

    /// Replay the log into a fresh stream and register it if still fetching
    async fn attach(&self) -> Result<ChunkStream> {
        let (tx, rx) = mpsc::unbounded_channel();

        let log = self.log.lock().await;
        let chunks = self.store.list(CHUNK_PREFIX).await?;
        let replayed = chunks.len();
        for (_, chunk) in chunks {
            // The receiver is still in hand, this cannot fail
            let _ = tx.send(chunk);
        }

        let stream = if log.fetching {
            let id = self.live.attach(tx);
            ChunkStream::live(rx, Arc::downgrade(&self.live), id)
        } else {
            ChunkStream::detached(rx)
        };
        drop(log);

        tracing::debug!(
            key = %self.key,
            replayed = replayed,
            live = stream.is_live(),
            "Caller attached"
        );
        Ok(stream)
    }

    fn spawn_drain(self: &Arc<Self>, body: BodyStream, generation: u64) {
        // The task owns a strong reference: the actor outlives the request
        // that started the fetch for as long as the body is being drained.
        let actor = Arc::clone(self);
        tokio::spawn(async move {
            let outcome = AssertUnwindSafe(actor.drain(body, generation))
                .catch_unwind()
                .await;

            match outcome {
                Ok(Ok(Drained::Superseded)) => {
                    tracing::info!(key = %actor.key, "Fetch abandoned after state was cleared");
                    return;
                }
                Ok(Ok(Drained::Finished)) => {}
                Ok(Err(e)) => {
                    tracing::warn!(key = %actor.key, error = %e, "Fetch terminated early");
                }
                Err(_) => {
                    tracing::error!(key = %actor.key, "Draining loop panicked");
                }
            }
            actor.complete(generation).await;
        });
    }

    async fn drain(&self, mut body: BodyStream, generation: u64) -> Result<Drained> {
        let mut current = self.generation.subscribe();
        loop {
            let item = tokio::select! {
                item = body.next() => item,
                _ = superseded(&mut current, generation) => {
                    return Ok(Drained::Superseded);
                }
            };
            let Some(item) = item else {
                break;
            };
            let chunk = item.map_err(Error::UpstreamStream)?;

            let mut log = self.log.lock().await;
            if log.generation != generation {
                return Ok(Drained::Superseded);
            }

            let seq = log.next_seq;
            self.store.put(&chunk_key(seq), chunk.clone()).await?;
            log.next_seq = seq + 1;
            self.store.put_json(KEY_SEQ, &log.next_seq).await?;

            let delivered = self.live.broadcast(&chunk);
            tracing::trace!(
                key = %self.key,
                seq = seq,
                bytes = chunk.len(),
                subscribers = delivered,
                "Chunk appended"
            );
        }
        Ok(Drained::Finished)
    }

    /// Mark the log complete and release every live subscriber
    async fn complete(&self, generation: u64) {
        let mut log = self.log.lock().await;
        if log.generation != generation {
            return;
        }

        if let Err(e) = self.store.put_json(KEY_OPEN, &false).await {
            tracing::warn!(key = %self.key, error = %e, "Failed to persist open flag");
        }
        if let Err(e) = self.store.put_json(KEY_COMPLETED, &true).await {
            tracing::warn!(key = %self.key, error = %e, "Failed to persist completed flag");
        }
        log.fetching = false;
        log.completed = true;

        let closed = self.live.close_all();
        tracing::info!(
            key = %self.key,
            chunks = log.next_seq,
            closed_subscribers = closed,
            "Upstream fetch completed"
        );
    }

    /// Read-only snapshot of the actor
    pub async fn check_status(&self) -> Result<ActorStatus> {
        self.touch().await?;
        let log = self.log.lock().await;
        Ok(ActorStatus {
            in_progress: log.fetching,
            completed: log.completed,
            active_connections: self.live.count(),
            chunks_stored: log.next_seq,
        })
    }

    /// Delete all persisted state and reset counters
    ///
    /// A draining loop that is still running is woken by the reset and stops,
    /// dropping the upstream body even if upstream is idle. Live subscribers are dropped from the set,
    /// which ends their streams.
    pub async fn purge(&self) -> Result<()> {
        self.touch().await?;
        self.wipe().await?;
        tracing::info!(key = %self.key, "Storage cleared");
        Ok(())
    }

    /// Alarm handler: drop everything, including the alarm itself
    ///
    /// The deadline is checked again against `now` once no request can move
    /// it; if a request extended it in the meantime nothing is deleted.
    /// Returns whether the resource was evicted.
    pub async fn on_eviction(&self, now: SystemTime) -> Result<bool> {
        let _alarm = self.alarm.lock().await;
        if !self.is_expired(now) {
            tracing::debug!(key = %self.key, "Eviction skipped, deadline moved");
            return Ok(false);
        }

        self.wipe().await?;
        self.store.delete_alarm().await?;
        *self.deadline.lock().unwrap_or_else(|p| p.into_inner()) = None;
        tracing::info!(key = %self.key, "Resource evicted");
        Ok(true)
    }

    async fn wipe(&self) -> Result<()> {
        let mut log = self.log.lock().await;
        self.store.delete_all().await?;
        log.reset();
        self.generation.send_replace(log.generation);
        self.live.close_all();
        Ok(())
    }
}

impl std::fmt::Debug for ResourceActor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceActor")
            .field("key", &self.key)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// Resolves once the published generation differs from `generation`
async fn superseded(current: &mut watch::Receiver<u64>, generation: u64) {
    loop {
        if *current.borrow_and_update() != generation {
            return;
        }
        if current.changed().await.is_err() {
            // Sender lives as long as the actor
            std::future::pending::<()>().await;
        }
    }
}

fn with_no_store(mut headers: Headers) -> Headers {
    headers.insert("cache-control".to_string(), "no-store".to_string());
    headers
}
