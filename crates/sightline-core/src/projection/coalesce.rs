//! Schedule-if-not-pending coalescing timer.
//!
//! The first [`Coalescer::schedule`] for a key arms a deadline `window`
//! later. Further schedules for the same key before it fires are absorbed
//! and do not move the deadline, so a burst collapses into one firing.

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};

use crate::clock::to_delta;

#[derive(Debug, Clone)]
pub struct Coalescer<K: Ord + Clone> {
    window: TimeDelta,
    pending: BTreeMap<K, DateTime<Utc>>,
}

impl<K: Ord + Clone> Coalescer<K> {
    #[must_use]
    pub fn new(window: Duration) -> Self {
        Self {
            window: to_delta(window),
            pending: BTreeMap::new(),
        }
    }

    /// Arm `key` unless it is already pending. Returns `true` if newly armed.
    pub fn schedule(&mut self, key: K, now: DateTime<Utc>) -> bool {
        if self.pending.contains_key(&key) {
            return false;
        }
        let deadline = now.checked_add_signed(self.window).unwrap_or(DateTime::<Utc>::MAX_UTC);
        self.pending.insert(key, deadline);
        true
    }

    /// Remove and return every key whose deadline has passed.
    pub fn take_due(&mut self, now: DateTime<Utc>) -> Vec<K> {
        let due: Vec<K> = self
            .pending
            .iter()
            .filter(|(_, deadline)| **deadline <= now)
            .map(|(key, _)| key.clone())
            .collect();
        for key in &due {
            self.pending.remove(key);
        }
        due
    }

    /// Remove and return every pending key regardless of deadline.
    pub fn take_all(&mut self) -> Vec<K> {
        std::mem::take(&mut self.pending).into_keys().collect()
    }

    /// Drop pending keys that fail `keep`.
    pub fn retain(&mut self, mut keep: impl FnMut(&K) -> bool) {
        self.pending.retain(|key, _| keep(key));
    }

    #[must_use]
    pub fn is_pending(&self, key: &K) -> bool {
        self.pending.contains_key(key)
    }

    /// Earliest armed deadline.
    #[must_use]
    pub fn next_deadline(&self) -> Option<DateTime<Utc>> {
        self.pending.values().min().copied()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(millis: i64) -> DateTime<Utc> {
        DateTime::from_timestamp_millis(1_700_000_000_000 + millis).unwrap()
    }

    #[test]
    fn burst_collapses_to_one_firing_at_first_deadline() {
        let mut timer = Coalescer::new(Duration::from_millis(150));
        assert!(timer.schedule("k", at(0)));
        assert!(!timer.schedule("k", at(50)));
        assert!(!timer.schedule("k", at(149)));
        assert_eq!(timer.next_deadline(), Some(at(150)));

        assert!(timer.take_due(at(149)).is_empty());
        assert_eq!(timer.take_due(at(150)), vec!["k"]);
        assert!(timer.is_empty());
    }

    #[test]
    fn rearms_after_firing() {
        let mut timer = Coalescer::new(Duration::from_millis(100));
        timer.schedule(1, at(0));
        timer.take_due(at(100));
        assert!(timer.schedule(1, at(120)));
        assert_eq!(timer.next_deadline(), Some(at(220)));
    }

    #[test]
    fn keys_fire_independently() {
        let mut timer = Coalescer::new(Duration::from_millis(100));
        timer.schedule("a", at(0));
        timer.schedule("b", at(60));
        assert_eq!(timer.take_due(at(100)), vec!["a"]);
        assert!(timer.is_pending(&"b"));
        assert_eq!(timer.take_all(), vec!["b"]);
    }

    #[test]
    fn retain_cancels_keys() {
        let mut timer = Coalescer::new(Duration::from_millis(100));
        timer.schedule("a", at(0));
        timer.schedule("b", at(0));
        timer.retain(|key| *key != "a");
        assert_eq!(timer.len(), 1);
        assert!(!timer.is_pending(&"a"));
    }
}
