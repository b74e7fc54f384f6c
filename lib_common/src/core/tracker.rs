//! # State Tracker
//!
//! Owns the Active Set, the keys whose most recent observation carried the
//! flag glyph, and turns each snapshot into the minimal list of activation
//! events.
//!
//! ## Transition rules
//! - flagged and not yet active: insert, emit one event.
//! - flagged and already active: nothing (no duplicate notification).
//! - unflagged and active: remove silently.
//! - unflagged and inactive: nothing.
//!
//! Keys that vanish from the source are *not* evicted; only an explicit
//! unflagged observation of the same key clears it.

use std::collections::HashSet;
use std::fmt;

use chrono::{DateTime, Utc};

use super::sanitizer::{self, FLAG_GLYPH};
use super::snapshot::RawCell;

/// Canonical identifier of one map cell.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LocationKey(String);

impl LocationKey {
    /// Wraps an already sanitized key as-is.
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// The key text.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for LocationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for LocationKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// A key that entered the active state during a cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActivationEvent {
    /// The key that became active.
    pub key: LocationKey,
    /// When the cycle that observed the transition ran.
    pub detected_at: DateTime<Utc>,
}

impl ActivationEvent {
    /// The text frame pushed to subscribers.
    pub fn notification(&self) -> String {
        format!("New {} detected at location: {}", FLAG_GLYPH, self.key)
    }
}

/// Active Set plus the diff that maintains it. Not shared; the cycle
/// controller owns it behind a lock.
#[derive(Debug, Default)]
pub struct StateTracker {
    active: HashSet<LocationKey>,
}

impl StateTracker {
    /// Starts with an empty Active Set; the first cycle after a restart can
    /// therefore only report activations.
    pub fn new() -> Self {
        Self::default()
    }

    /// Applies one snapshot and returns the activations it produced, in the
    /// order the cells appeared.
    pub fn diff(&mut self, snapshot: &[RawCell], detected_at: DateTime<Utc>) -> Vec<ActivationEvent> {
        let mut events = Vec::new();

        for cell in snapshot {
            let key = sanitizer::location_key(&cell.right, &cell.top);

            if sanitizer::is_flagged(&cell.left) {
                if !self.active.contains(&key) {
                    self.active.insert(key.clone());
                    events.push(ActivationEvent { key, detected_at });
                }
            } else if self.active.remove(&key) {
                tracing::debug!("Location {} is no longer active", key);
            }
        }

        events
    }

    /// Whether `key` is in the Active Set.
    pub fn is_active(&self, key: &str) -> bool {
        self.active.contains(&LocationKey::new(key))
    }

    /// Size of the Active Set.
    pub fn len(&self) -> usize {
        self.active.len()
    }

    /// Whether the Active Set is empty.
    pub fn is_empty(&self) -> bool {
        self.active.is_empty()
    }

    /// The Active Set in sorted order.
    pub fn active_keys(&self) -> Vec<LocationKey> {
        let mut keys: Vec<_> = self.active.iter().cloned().collect();
        keys.sort();
        keys
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SWORDS: &str = "\u{2694}\u{FE0F}";

    fn cell(left: &str, right: &str, top: &str) -> RawCell {
        RawCell::new(left, right, top)
    }

    fn keys(events: &[ActivationEvent]) -> Vec<&str> {
        events.iter().map(|e| e.key.as_str()).collect()
    }

    #[test]
    fn test_first_flagged_observation_emits_event() {
        let mut tracker = StateTracker::new();
        let now = Utc::now();

        let events = tracker.diff(&[cell(SWORDS, "A", "1")], now);

        assert_eq!(keys(&events), vec!["A1"]);
        assert_eq!(events[0].detected_at, now);
        assert_eq!(tracker.active_keys(), vec![LocationKey::new("A1")]);
    }

    #[test]
    fn test_same_snapshot_twice_is_idempotent() {
        let mut tracker = StateTracker::new();
        let snapshot = vec![cell(SWORDS, "A", "1"), cell(SWORDS, "B", "2"), cell("", "C", "3")];

        let first = tracker.diff(&snapshot, Utc::now());
        let second = tracker.diff(&snapshot, Utc::now());

        assert_eq!(keys(&first), vec!["A1", "B2"]);
        assert!(second.is_empty());
        assert_eq!(tracker.len(), 2);
    }

    #[test]
    fn test_deactivation_is_silent() {
        let mut tracker = StateTracker::new();
        tracker.diff(&[cell(SWORDS, "A", "1")], Utc::now());

        let events = tracker.diff(&[cell("", "A", "1")], Utc::now());

        assert!(events.is_empty());
        assert!(tracker.is_empty());
    }

    #[test]
    fn test_reactivation_reports_again() {
        let mut tracker = StateTracker::new();
        tracker.diff(&[cell(SWORDS, "A", "1")], Utc::now());
        tracker.diff(&[cell("", "A", "1")], Utc::now());

        let events = tracker.diff(&[cell(SWORDS, "A", "1")], Utc::now());

        assert_eq!(keys(&events), vec!["A1"]);
    }

    #[test]
    fn test_absent_key_stays_active() {
        let mut tracker = StateTracker::new();
        tracker.diff(&[cell(SWORDS, "A", "1")], Utc::now());

        let events = tracker.diff(&[cell("", "B", "2")], Utc::now());

        assert!(events.is_empty());
        assert!(tracker.is_active("A1"));
        assert!(!tracker.is_active("B2"));
    }

    #[test]
    fn test_unflagged_unknown_key_is_ignored() {
        let mut tracker = StateTracker::new();

        let events = tracker.diff(&[cell("peace", "A", "1")], Utc::now());

        assert!(events.is_empty());
        assert!(tracker.is_empty());
    }

    #[test]
    fn test_events_follow_snapshot_order() {
        let mut tracker = StateTracker::new();
        let snapshot = vec![
            cell(SWORDS, "Z", "9"),
            cell(SWORDS, "A", "1"),
            cell(SWORDS, "M", "5"),
        ];

        let events = tracker.diff(&snapshot, Utc::now());

        assert_eq!(keys(&events), vec!["Z9", "A1", "M5"]);
    }

    #[test]
    fn test_keys_are_sanitized_before_comparison() {
        let mut tracker = StateTracker::new();
        tracker.diff(&[cell(SWORDS, "<A>", "1!")], Utc::now());

        let events = tracker.diff(&[cell(SWORDS, "A", "1")], Utc::now());

        assert!(events.is_empty());
        assert!(tracker.is_active("A1"));
    }

    #[test]
    fn test_duplicate_cells_in_one_snapshot_emit_once() {
        let mut tracker = StateTracker::new();

        let events = tracker.diff(&[cell(SWORDS, "A", "1"), cell(SWORDS, "A", "1")], Utc::now());

        assert_eq!(keys(&events), vec!["A1"]);
    }

    #[test]
    fn test_notification_text() {
        let event = ActivationEvent {
            key: LocationKey::new("A1"),
            detected_at: Utc::now(),
        };
        assert_eq!(event.notification(), "New \u{2694}\u{FE0F} detected at location: A1");
    }
}
