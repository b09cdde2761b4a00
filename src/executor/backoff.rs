//! Exponential backoff schedule

use std::time::Duration;

/// Doubling delays, starting at `initial`, stopping once a delay would
/// exceed `initial * max_multiplier`
#[derive(Debug, Clone)]
pub struct Backoff {
    next: Duration,
    ceiling: Duration,
}

impl Backoff {
    /// Creates a schedule
    #[must_use]
    pub fn new(initial: Duration, max_multiplier: u32) -> Self {
        Self {
            next: initial,
            ceiling: initial.saturating_mul(max_multiplier),
        }
    }

    /// Largest delay the schedule may yield
    #[must_use]
    pub fn ceiling(&self) -> Duration {
        self.ceiling
    }
}

impl Iterator for Backoff {
    type Item = Duration;

    fn next(&mut self) -> Option<Duration> {
        if self.next.is_zero() || self.next > self.ceiling {
            return None;
        }
        let delay = self.next;
        self.next = delay.saturating_mul(2);
        Some(delay)
    }
}
