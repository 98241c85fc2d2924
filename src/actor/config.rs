//! Actor configuration

use std::time::Duration;

/// Default time-to-live of a resource after its last request (6 hours)
pub const DEFAULT_TTL: Duration = Duration::from_secs(6 * 60 * 60);

/// Per-actor configuration
#[derive(Debug, Clone)]
pub struct ActorConfig {
    /// How long persisted state survives after the last request
    pub ttl: Duration,
}

impl Default for ActorConfig {
    fn default() -> Self {
        Self { ttl: DEFAULT_TTL }
    }
}

impl ActorConfig {
    /// Set the time-to-live
    pub fn ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }
}
