//! Fixed-interval retry bookkeeping for empty keyword results.
//!
//! Extraction runs asynchronously after the job record is created, so the
//! first fetches for a new job usually come back empty. The synchronizer
//! re-fetches on a fixed delay until rows appear or the ceiling is hit.

use std::time::Duration;
use tokio::time::Instant;

/// Retry ceiling and delay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 10,
            delay: Duration::from_millis(2000),
        }
    }
}

/// Attempts made so far and when the next one is due.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RetryState {
    attempts: u32,
    next_fire: Option<Instant>,
}

impl RetryState {
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn next_fire(&self) -> Option<Instant> {
        self.next_fire
    }

    /// Rows arrived: start over.
    pub fn on_rows(&mut self) {
        *self = Self::default();
    }

    /// An empty result. Schedules the next attempt and returns its number,
    /// or returns `None` and starts over once the ceiling is reached.
    pub fn on_empty(&mut self, policy: &RetryPolicy, now: Instant) -> Option<u32> {
        if self.attempts < policy.max_retries {
            self.attempts += 1;
            self.next_fire = Some(now + policy.delay);
            Some(self.attempts)
        } else {
            *self = Self::default();
            None
        }
    }

    /// The scheduled attempt is being run now.
    pub fn fired(&mut self) {
        self.next_fire = None;
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ten_retries_then_reset() {
        let policy = RetryPolicy::default();
        let mut state = RetryState::default();
        let now = Instant::now();

        for expected in 1..=10 {
            assert_eq!(state.on_empty(&policy, now), Some(expected));
            assert_eq!(state.next_fire(), Some(now + Duration::from_millis(2000)));
            state.fired();
        }

        assert_eq!(state.on_empty(&policy, now), None);
        assert_eq!(state.attempts(), 0);
        assert_eq!(state.next_fire(), None);
    }

    #[test]
    fn test_rows_clear_pending_retry() {
        let policy = RetryPolicy::default();
        let mut state = RetryState::default();

        state.on_empty(&policy, Instant::now());
        state.on_empty(&policy, Instant::now());
        assert_eq!(state.attempts(), 2);

        state.on_rows();
        assert_eq!(state, RetryState::default());
    }

    #[test]
    fn test_zero_ceiling_never_schedules() {
        let policy = RetryPolicy {
            max_retries: 0,
            delay: Duration::from_millis(10),
        };
        let mut state = RetryState::default();
        assert_eq!(state.on_empty(&policy, Instant::now()), None);
        assert_eq!(state.next_fire(), None);
    }
}
