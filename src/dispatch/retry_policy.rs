//! Retry policy for failed delivery attempts.
//!
//! Temporary errors get increasingly spaced retries to avoid hot-looping
//! against a struggling downstream; persistent errors short-circuit to
//! terminal regardless of count.

use std::time::Duration;

use super::PushResult;

const DEFAULT_MAX_ERROR_COUNT: u32 = 3;

/// Escalating backoff with a failure ceiling.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Error counts above this value are terminal.
    pub max_error_count: u32,
}

impl RetryPolicy {
    pub fn new(max_error_count: u32) -> Self {
        Self { max_error_count }
    }

    /// Delay before the next attempt after the given number of failures.
    pub fn delay_after(&self, error_count: u32) -> Duration {
        let secs = match error_count {
            0 => 0,
            1 => 60,      // 60 seconds
            2 => 900,     // 15 minutes
            3 => 7_200,   // 2 hours
            4 => 86_400,  // 1 day
            _ => 259_200, // 3 days
        };
        Duration::from_secs(secs)
    }

    /// Unix timestamp of the next eligible attempt.
    pub fn next_attempt_at(&self, now: i64, error_count: u32) -> i64 {
        now + self.delay_after(error_count).as_secs() as i64
    }

    /// Whether the notification should stop being retried.
    pub fn is_terminal(&self, error_count: u32, result: PushResult) -> bool {
        error_count > self.max_error_count || result == PushResult::PersistentError
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_error_count: DEFAULT_MAX_ERROR_COUNT,
        }
    }
}
