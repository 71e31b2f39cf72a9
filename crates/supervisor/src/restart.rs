//! Sliding-window restart cap (§4.10): at most `max_restarts` within
//! `window`, independent of wall-clock alignment — a classic sliding
//! window over recorded attempt timestamps.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

pub struct RestartTracker {
    window: Duration,
    max_restarts: u32,
    attempts: VecDeque<Instant>,
}

impl RestartTracker {
    pub fn new(max_restarts: u32, window: Duration) -> Self {
        Self {
            window,
            max_restarts,
            attempts: VecDeque::new(),
        }
    }

    pub fn default_policy() -> Self {
        Self::new(5, Duration::from_secs(60))
    }

    fn evict_expired(&mut self, now: Instant) {
        while let Some(&front) = self.attempts.front() {
            if now.duration_since(front) > self.window {
                self.attempts.pop_front();
            } else {
                break;
            }
        }
    }

    /// Records a restart attempt at `now`. Returns `true` if it is allowed
    /// (and records it), `false` if the window's cap is already reached.
    pub fn try_record(&mut self, now: Instant) -> bool {
        self.evict_expired(now);
        if self.attempts.len() as u32 >= self.max_restarts {
            return false;
        }
        self.attempts.push_back(now);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allows_up_to_cap_within_window() {
        let mut tracker = RestartTracker::new(3, Duration::from_secs(60));
        let now = Instant::now();
        assert!(tracker.try_record(now));
        assert!(tracker.try_record(now));
        assert!(tracker.try_record(now));
        assert!(!tracker.try_record(now));
    }

    #[test]
    fn window_expiry_frees_capacity() {
        let mut tracker = RestartTracker::new(1, Duration::from_millis(50));
        let t0 = Instant::now();
        assert!(tracker.try_record(t0));
        assert!(!tracker.try_record(t0));
        let later = t0 + Duration::from_millis(60);
        assert!(tracker.try_record(later));
    }
}
