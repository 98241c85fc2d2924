//! Live fan-out to attached subscribers
//!
//! Each subscriber owns the receiving half of an unbounded channel; the
//! broadcaster keeps the sending halves. `Bytes` is reference counted, so
//! every subscriber shares the same chunk allocation.
//!
//! A subscriber whose receiver is gone is pruned on the next broadcast or
//! count, so disconnects never surface as errors to the draining loop.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};

use bytes::Bytes;
use tokio::sync::mpsc;

/// Identity of a live subscriber
pub type SubscriberId = u64;

/// Sending half held for each live subscriber
pub type Sink = mpsc::UnboundedSender<Bytes>;

/// Set of live subscriber sinks
#[derive(Debug, Default)]
pub struct Broadcaster {
    sinks: Mutex<HashMap<SubscriberId, Sink>>,
    next_id: AtomicU64,
}

impl Broadcaster {
    /// Create an empty broadcaster
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<SubscriberId, Sink>> {
        self.sinks.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Register a sink for subsequent broadcasts
    pub fn attach(&self, sink: Sink) -> SubscriberId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let mut sinks = self.lock();
        sinks.insert(id, sink);
        tracing::debug!(subscriber = id, subscribers = sinks.len(), "Subscriber attached");
        id
    }

    /// Remove a sink; returns whether it was still attached
    pub fn detach(&self, id: SubscriberId) -> bool {
        let mut sinks = self.lock();
        let removed = sinks.remove(&id).is_some();
        if removed {
            tracing::debug!(subscriber = id, subscribers = sinks.len(), "Subscriber detached");
        }
        removed
    }

    /// Push a chunk to every sink
    ///
    /// Sinks that refuse the write are dropped. Returns the number of sinks
    /// that accepted the chunk.
    pub fn broadcast(&self, chunk: &Bytes) -> usize {
        let mut sinks = self.lock();
        sinks.retain(|id, sink| match sink.send(chunk.clone()) {
            Ok(()) => true,
            Err(_) => {
                tracing::debug!(subscriber = *id, "Dropping disconnected subscriber");
                false
            }
        });
        sinks.len()
    }

    /// Number of sinks whose receiver is still alive
    pub fn count(&self) -> usize {
        let mut sinks = self.lock();
        sinks.retain(|_, sink| !sink.is_closed());
        sinks.len()
    }

    /// Drop every sink, ending each subscriber's stream once it has drained
    /// what it already received
    pub fn close_all(&self) -> usize {
        let mut sinks = self.lock();
        let closed = sinks.len();
        sinks.clear();
        closed
    }
}
