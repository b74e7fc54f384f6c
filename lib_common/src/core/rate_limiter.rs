//! # Sliding-Window Rate Limiter
//!
//! Admission control for inbound client chatter. Each WebSocket connection
//! carries a [`MessageWindow`]: the timestamps of its recently admitted messages. The
//! [`RateLimiter`] itself is stateless policy (window length and cap), so a
//! window lives and dies with whatever owns it.
//!
//! A rejected message is *not* recorded, so a client hammering the server
//! cannot extend its own lockout.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// Fifteen minutes.
pub const DEFAULT_WINDOW: Duration = Duration::from_secs(15 * 60);
/// Messages admitted per window.
pub const DEFAULT_MAX_MESSAGES: usize = 100;

/// Window length and cap, shared by every subject it limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimiter {
    window: Duration,
    max_messages: usize,
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(DEFAULT_WINDOW, DEFAULT_MAX_MESSAGES)
    }
}

impl RateLimiter {
    /// Admits at most `max_messages` within any span of `window`.
    pub fn new(window: Duration, max_messages: usize) -> Self {
        Self {
            window,
            max_messages,
        }
    }

    /// Length of the sliding window.
    pub fn window(&self) -> Duration {
        self.window
    }

    /// Messages admitted per window.
    pub fn max_messages(&self) -> usize {
        self.max_messages
    }

    /// Drops timestamps that have left the window, then admits and records
    /// `now` if there is room.
    pub fn admit_message(&self, history: &mut MessageWindow, now: Instant) -> bool {
        history.evict_older_than(now, self.window);

        if history.len() >= self.max_messages {
            return false;
        }

        history.record(now);
        true
    }
}

/// Timestamps of admitted messages, oldest first.
#[derive(Debug, Clone, Default)]
pub struct MessageWindow {
    admitted: VecDeque<Instant>,
}

impl MessageWindow {
    /// An empty window.
    pub fn new() -> Self {
        Self::default()
    }

    /// Admitted messages still on record.
    pub fn len(&self) -> usize {
        self.admitted.len()
    }

    /// Whether nothing is on record.
    pub fn is_empty(&self) -> bool {
        self.admitted.is_empty()
    }

    fn record(&mut self, at: Instant) {
        self.admitted.push_back(at);
    }

    // A timestamp exactly `window` old is already outside.
    fn evict_older_than(&mut self, now: Instant, window: Duration) {
        while let Some(&oldest) = self.admitted.front() {
            if now.saturating_duration_since(oldest) >= window {
                self.admitted.pop_front();
            } else {
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exactly_cap_messages_are_admitted() {
        let limiter = RateLimiter::default();
        let mut history = MessageWindow::new();
        let start = Instant::now();

        for i in 0..100 {
            let now = start + Duration::from_secs(i);
            assert!(limiter.admit_message(&mut history, now), "message {} should pass", i + 1);
        }

        assert!(!limiter.admit_message(&mut history, start + Duration::from_secs(100)));
        assert_eq!(history.len(), 100);
    }

    #[test]
    fn test_rejections_are_not_recorded() {
        let limiter = RateLimiter::new(Duration::from_secs(60), 2);
        let mut history = MessageWindow::new();
        let start = Instant::now();

        assert!(limiter.admit_message(&mut history, start));
        assert!(limiter.admit_message(&mut history, start));
        for _ in 0..10 {
            assert!(!limiter.admit_message(&mut history, start + Duration::from_secs(1)));
        }

        assert_eq!(history.len(), 2);
    }

    #[test]
    fn test_ageing_out_frees_exactly_one_slot() {
        let limiter = RateLimiter::default();
        let mut history = MessageWindow::new();
        let start = Instant::now();

        // Oldest message first, the rest one minute later.
        assert!(limiter.admit_message(&mut history, start));
        let later = start + Duration::from_secs(60);
        for _ in 1..100 {
            assert!(limiter.admit_message(&mut history, later));
        }
        assert!(!limiter.admit_message(&mut history, later));

        let after_first_expires = start + DEFAULT_WINDOW;
        assert!(limiter.admit_message(&mut history, after_first_expires));
        assert!(!limiter.admit_message(&mut history, after_first_expires));
    }

    #[test]
    fn test_full_window_expiry_resets_capacity() {
        let limiter = RateLimiter::new(Duration::from_secs(10), 3);
        let mut history = MessageWindow::new();
        let start = Instant::now();

        for _ in 0..3 {
            assert!(limiter.admit_message(&mut history, start));
        }
        assert!(!limiter.admit_message(&mut history, start + Duration::from_secs(9)));

        let fresh = start + Duration::from_secs(10);
        for _ in 0..3 {
            assert!(limiter.admit_message(&mut history, fresh));
        }
        assert_eq!(history.len(), 3);
    }

    #[test]
    fn test_zero_cap_rejects_everything() {
        let limiter = RateLimiter::new(Duration::from_secs(10), 0);
        let mut history = MessageWindow::new();

        assert!(!limiter.admit_message(&mut history, Instant::now()));
        assert!(history.is_empty());
    }
}
