//! Exponential backoff for rate-limited requests.

use std::time::Duration;

/// Tracks retries of one request.
///
/// The first delay is `base`; each further failure doubles it up to `max`.
/// After `max_retries` delays have been handed out the request is given up.
#[derive(Debug, Clone)]
pub struct Backoff {
    max: Duration,
    max_retries: u32,
    current: Duration,
    retries: u32,
}

impl Backoff {
    pub fn new(base: Duration, max: Duration, max_retries: u32) -> Self {
        Self {
            max,
            max_retries,
            current: base,
            retries: 0,
        }
    }

    /// Record a failure and return how long to wait before the next
    /// attempt, or `None` if the retry budget is spent.
    pub fn next_delay(&mut self) -> Option<Duration> {
        if self.retries >= self.max_retries {
            return None;
        }
        let delay = self.current.min(self.max);
        self.retries += 1;
        self.current = (self.current * 2).min(self.max);
        Some(delay)
    }

    /// Attempts made so far, counting the first one.
    pub fn attempts(&self) -> u32 {
        self.retries + 1
    }
}
