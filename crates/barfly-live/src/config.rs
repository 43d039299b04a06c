use serde::{Deserialize, Serialize};
use std::time::Duration;

fn default_page_size() -> usize {
    200
}

fn default_init_timeout_ms() -> u64 {
    10_000
}

fn default_max_init_attempts() -> u32 {
    3
}

fn default_retry_backoff_ms() -> u64 {
    200
}

fn default_max_backoff_ms() -> u64 {
    5_000
}

fn default_delivery_capacity() -> usize {
    256
}

fn default_handoff_capacity() -> usize {
    1_024
}

fn default_max_resync_attempts() -> u32 {
    5
}

/// Tunables for the live sync engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LiveConfig {
    /// Records requested per range-query page.
    #[serde(default = "default_page_size")]
    pub page_size: usize,

    /// Deadline for building a view's snapshot, in milliseconds.
    #[serde(default = "default_init_timeout_ms")]
    pub init_timeout_ms: u64,

    /// Fetch attempts per snapshot before giving up on failed ranges.
    #[serde(default = "default_max_init_attempts")]
    pub max_init_attempts: u32,

    /// Base delay for exponential retry backoff, in milliseconds.
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,

    /// Upper bound on a single backoff delay, in milliseconds.
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,

    /// Deltas buffered per subscriber before the view blocks.
    #[serde(default = "default_delivery_capacity")]
    pub delivery_capacity: usize,

    /// Change events buffered per view between the feed reader and the
    /// view. A view that overflows it is dropped and resynchronised.
    #[serde(default = "default_handoff_capacity")]
    pub handoff_capacity: usize,

    /// Consecutive failed resyncs before a view gives up with
    /// `FeedDisconnected`.
    #[serde(default = "default_max_resync_attempts")]
    pub max_resync_attempts: u32,
}

impl Default for LiveConfig {
    fn default() -> Self {
        Self {
            page_size: default_page_size(),
            init_timeout_ms: default_init_timeout_ms(),
            max_init_attempts: default_max_init_attempts(),
            retry_backoff_ms: default_retry_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
            delivery_capacity: default_delivery_capacity(),
            handoff_capacity: default_handoff_capacity(),
            max_resync_attempts: default_max_resync_attempts(),
        }
    }
}

impl LiveConfig {
    pub fn init_timeout(&self) -> Duration {
        Duration::from_millis(self.init_timeout_ms)
    }

    /// Delay before retry number `attempt` (1-based): the base delay doubled
    /// per attempt, capped at `max_backoff_ms`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let shift = attempt.saturating_sub(1).min(16);
        let delay = self.retry_backoff_ms.saturating_mul(1 << shift);
        Duration::from_millis(delay.min(self.max_backoff_ms))
    }
}
