//! Configuration management for the devstack console
//!
//! Configuration is loaded from environment variables. Every knob has a
//! default matching the launcher's built-in constants, so an empty
//! environment yields a working console.

use std::env;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default number of log lines retained per project.
pub const DEFAULT_LOG_CAPACITY: usize = 20_000;
/// Default number of buffered lines processed per replay chunk.
pub const DEFAULT_REPLAY_CHUNK_SIZE: usize = 500;
/// Default period after which pending feed lines are flushed as a batch.
pub const DEFAULT_FEED_FLUSH_INTERVAL_MS: u64 = 100;
/// Default pending-line count that forces an early batch flush.
pub const DEFAULT_FEED_BATCH_SIZE: usize = 200;
/// Default bound of the producer queue feeding the batcher.
pub const DEFAULT_FEED_QUEUE_CAPACITY: usize = 2048;

/// Main configuration struct for the devstack console
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    /// Ring buffer capacity per project (at least 1).
    pub log_capacity: usize,
    /// Items visited per replay chunk before yielding (at least 1).
    pub replay_chunk_size: usize,
    pub feed_flush_interval_ms: u64,
    pub feed_batch_size: usize,
    pub feed_queue_capacity: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_capacity: DEFAULT_LOG_CAPACITY,
            replay_chunk_size: DEFAULT_REPLAY_CHUNK_SIZE,
            feed_flush_interval_ms: DEFAULT_FEED_FLUSH_INTERVAL_MS,
            feed_batch_size: DEFAULT_FEED_BATCH_SIZE,
            feed_queue_capacity: DEFAULT_FEED_QUEUE_CAPACITY,
        }
    }
}

impl Config {
    /// Load configuration from environment variables
    #[must_use]
    pub fn from_env() -> Self {
        let mut config = Self::default();

        // Retention / rendering
        config.log_capacity = env_usize("DEVSTACK_LOG_CAPACITY", config.log_capacity);
        config.replay_chunk_size =
            env_usize("DEVSTACK_REPLAY_CHUNK_SIZE", config.replay_chunk_size);

        // Feed batching
        config.feed_flush_interval_ms =
            env_u64("DEVSTACK_FEED_FLUSH_INTERVAL_MS", config.feed_flush_interval_ms);
        config.feed_batch_size = env_usize("DEVSTACK_FEED_BATCH_SIZE", config.feed_batch_size);
        config.feed_queue_capacity =
            env_usize("DEVSTACK_FEED_QUEUE_CAPACITY", config.feed_queue_capacity);

        config.normalized()
    }

    /// Clamp every size to its minimum of one.
    #[must_use]
    pub fn normalized(mut self) -> Self {
        if self.log_capacity == 0 {
            tracing::warn!("DEVSTACK_LOG_CAPACITY=0 is not usable, clamping to 1");
            self.log_capacity = 1;
        }
        self.replay_chunk_size = self.replay_chunk_size.max(1);
        self.feed_flush_interval_ms = self.feed_flush_interval_ms.max(1);
        self.feed_batch_size = self.feed_batch_size.max(1);
        self.feed_queue_capacity = self.feed_queue_capacity.max(1);
        self
    }

    #[must_use]
    pub const fn feed_flush_interval(&self) -> Duration {
        Duration::from_millis(self.feed_flush_interval_ms)
    }
}

// Helper functions for environment variable parsing

#[cfg(test)]
thread_local! {
    static TEST_ENV_OVERRIDES: std::cell::RefCell<std::collections::HashMap<String, String>> =
        std::cell::RefCell::new(std::collections::HashMap::new());
}

#[cfg(test)]
fn test_env_override_value(key: &str) -> Option<String> {
    TEST_ENV_OVERRIDES.with(|cell| cell.borrow().get(key).cloned())
}

/// Read a value from the process environment.
#[must_use]
pub fn env_value(key: &str) -> Option<String> {
    #[cfg(test)]
    if let Some(v) = test_env_override_value(key) {
        return Some(v);
    }
    env::var(key).ok()
}

fn env_u64(key: &str, default: u64) -> u64 {
    env_value(key)
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

fn env_usize(key: &str, default: usize) -> usize {
    env_value(key)
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}
