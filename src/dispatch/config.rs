//! Dispatcher configuration

use std::time::Duration;

use crate::actor::ActorConfig;

/// Dispatcher configuration
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// Configuration handed to every actor
    pub actor: ActorConfig,

    /// How often expired resources are looked for
    pub eviction_interval: Duration,

    /// Scheme used for upstream URLs when the request does not say
    /// (via `x-forwarded-proto`)
    pub upstream_scheme: String,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            actor: ActorConfig::default(),
            eviction_interval: Duration::from_secs(60),
            upstream_scheme: "https".to_string(),
        }
    }
}

impl DispatcherConfig {
    /// Set the actor configuration
    pub fn actor(mut self, actor: ActorConfig) -> Self {
        self.actor = actor;
        self
    }

    /// Set the resource time-to-live
    pub fn ttl(mut self, ttl: Duration) -> Self {
        self.actor = self.actor.ttl(ttl);
        self
    }

    /// Set the eviction check interval
    pub fn eviction_interval(mut self, interval: Duration) -> Self {
        self.eviction_interval = interval;
        self
    }

    /// Set the default upstream scheme
    pub fn upstream_scheme(mut self, scheme: impl Into<String>) -> Self {
        self.upstream_scheme = scheme.into();
        self
    }
}
