// src/orchestrator/rate_limit.rs

use std::time::Duration;

use tokio::time::Instant;

/// Minimum spacing between accepted analysis requests.
///
/// Only accepted requests move the window; a dropped request does not
/// extend it.
#[derive(Debug, Clone)]
pub struct RateLimiter {
    min_interval: Duration,
    last_accepted: Option<Instant>,
}

impl RateLimiter {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            last_accepted: None,
        }
    }

    pub fn from_millis(ms: u64) -> Self {
        Self::new(Duration::from_millis(ms))
    }

    pub fn set_interval(&mut self, min_interval: Duration) {
        self.min_interval = min_interval;
    }

    pub fn interval(&self) -> Duration {
        self.min_interval
    }

    /// True if a request arriving at `now` would be accepted.
    pub fn should_accept(&self, now: Instant) -> bool {
        match self.last_accepted {
            None => true,
            Some(last) => now.saturating_duration_since(last) >= self.min_interval,
        }
    }

    pub fn record(&mut self, now: Instant) {
        self.last_accepted = Some(now);
    }

    /// `should_accept` + `record` in one step.
    pub fn try_acquire(&mut self, now: Instant) -> bool {
        if self.should_accept(now) {
            self.record(now);
            true
        } else {
            false
        }
    }

    pub fn reset(&mut self) {
        self.last_accepted = None;
    }
}
