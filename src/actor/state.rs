//! Actor state and the persisted key layout

use serde::{Deserialize, Serialize};

use crate::upstream::Headers;

/// Key of the next sequence number
pub const KEY_SEQ: &str = "seq";
/// Key of the fetch-in-progress flag
pub const KEY_OPEN: &str = "open";
/// Key of the completed flag
pub const KEY_COMPLETED: &str = "completed";
/// Key of the captured response headers
pub const KEY_HEADERS: &str = "headers";
/// Prefix shared by every chunk key
pub const CHUNK_PREFIX: &str = "c:";

/// Storage key of chunk `seq`
///
/// Zero-padded to nine digits so lexicographic order is sequence order.
pub fn chunk_key(seq: u64) -> String {
    format!("{}{:09}", CHUNK_PREFIX, seq)
}

/// Lifecycle phase of a resource
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActorPhase {
    /// No fetch has succeeded yet (or state was cleared)
    Idle,
    /// The upstream body is being drained into the log
    Fetching,
    /// The log is complete and will not grow again
    Completed,
}

/// Mutable log state, guarded by the actor's log lock
#[derive(Debug, Default)]
pub(crate) struct LogState {
    /// Next chunk index to assign
    pub next_seq: u64,
    /// Upstream fetch confirmed and streaming
    pub fetching: bool,
    /// Upstream body fully drained
    pub completed: bool,
    /// Headers captured at fetch start
    pub headers: Option<Headers>,
    /// Bumped whenever persisted state is wiped; a draining loop started
    /// under an older generation must stop writing
    pub generation: u64,
}

impl LogState {
    pub fn phase(&self) -> ActorPhase {
        if self.completed {
            ActorPhase::Completed
        } else if self.fetching {
            ActorPhase::Fetching
        } else {
            ActorPhase::Idle
        }
    }

    /// Forget everything and start a new generation
    pub fn reset(&mut self) {
        *self = LogState {
            generation: self.generation.wrapping_add(1),
            ..LogState::default()
        };
    }
}

/// Snapshot reported by the status endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActorStatus {
    /// An upstream fetch is currently streaming
    pub in_progress: bool,
    /// The log is complete
    pub completed: bool,
    /// Live subscribers attached right now
    pub active_connections: usize,
    /// Chunks persisted so far
    pub chunks_stored: u64,
}

impl ActorStatus {
    /// Status of a resource nobody has fetched
    pub fn idle() -> Self {
        Self {
            in_progress: false,
            completed: false,
            active_connections: 0,
            chunks_stored: 0,
        }
    }
}
