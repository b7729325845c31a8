use std::time::Duration;

use crate::cache::DEFAULT_STRIPES;
use crate::queue::DEFAULT_CAPACITY;

/// Persistence worker tuning
#[derive(Debug, Clone)]
pub struct PersistConfig {
    /// Records buffered between the router and the worker
    pub queue: usize,
    /// Deadline of one `append` attempt
    pub timeout: Duration,
    /// Extra attempts after a transient failure
    pub max_retries: u32,
    /// Fixed delay between attempts
    pub backoff: Duration,
}

impl Default for PersistConfig {
    fn default() -> Self {
        Self {
            queue: 1024,
            timeout: Duration::from_secs(5),
            max_retries: 3,
            backoff: Duration::from_millis(200),
        }
    }
}

impl PersistConfig {
    /// Longest a single store call can take, retries and backoff included
    pub fn call_budget(&self) -> Duration {
        let attempts = self.max_retries.saturating_add(1);
        self.timeout
            .saturating_mul(attempts)
            .saturating_add(self.backoff.saturating_mul(self.max_retries))
    }
}

#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Wipe secret checked by [`Admin::clean`](crate::Admin::clean)
    pub secret: String,
    /// Per-connection send queue capacity
    pub subscriber_buffer: usize,
    pub cache_stripes: usize,
    pub persist: PersistConfig,
}

impl EngineConfig {
    pub fn new(secret: impl Into<String>) -> Self {
        Self {
            secret: secret.into(),
            subscriber_buffer: DEFAULT_CAPACITY,
            cache_stripes: DEFAULT_STRIPES,
            persist: PersistConfig::default(),
        }
    }
}
