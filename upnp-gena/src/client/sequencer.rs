//! Client-side event-key ordering.
//!
//! Publishers number events `0, 1, 2 … 4294967295, 1, 2 …`; zero is only
//! ever used for the initial event. NOTIFY requests travel over separate
//! connections and may arrive out of order, so each subscription keeps a
//! small reorder buffer and releases events strictly in key order.
//!
//! A missing key is given up on once more than `limit` later events are
//! buffered, or once the gap has been open for `gap_timeout`. Publishers
//! drop events they fail to deliver, so a gap may never be filled.

use std::collections::BTreeMap;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, warn};

pub type Properties = Vec<(String, String)>;

/// Key following `key` in the GENA sequence.
pub fn next_event_key(key: u32) -> u32 {
    match key {
        u32::MAX => 1,
        key => key + 1,
    }
}

/// Reorders the events of one subscription.
#[derive(Debug)]
pub struct EventSequencer {
    expected: u32,
    buffered: BTreeMap<u32, Properties>,
    limit: usize,
    gap_timeout: Duration,
    gap_opened: Option<Instant>,
}

impl EventSequencer {
    /// `limit` is the number of out-of-order events held before the
    /// missing ones are declared lost; `gap_timeout` is how long a gap may
    /// stay open before the same happens.
    pub fn new(limit: usize, gap_timeout: Duration) -> Self {
        Self {
            expected: 0,
            buffered: BTreeMap::new(),
            limit: limit.max(1),
            gap_timeout,
            gap_opened: None,
        }
    }

    pub fn expected(&self) -> u32 {
        self.expected
    }

    pub fn buffered(&self) -> usize {
        self.buffered.len()
    }

    /// When the current gap will be given up on, if one is open.
    pub fn gap_deadline(&self) -> Option<Instant> {
        self.gap_opened.map(|opened| opened + self.gap_timeout)
    }

    /// Distance from the expected key, in sequence order.
    fn distance(&self, key: u32) -> u32 {
        key.wrapping_sub(self.expected)
    }

    /// Accept one event arriving at `now` and return every event now
    /// deliverable, in order.
    pub fn accept(&mut self, key: u32, properties: Properties, now: Instant) -> Vec<(u32, Properties)> {
        let mut ready = Vec::new();

        if key == self.expected {
            ready.push((key, properties));
            self.expected = next_event_key(key);
            self.drain_into(&mut ready, now);
            return ready;
        }

        // Anything behind the expected key was delivered or given up on.
        if key == 0 || self.distance(key) > u32::MAX / 2 || self.buffered.contains_key(&key) {
            debug!(event_key = key, expected = self.expected, "dropping stale or duplicate event");
            return ready;
        }

        self.buffered.insert(key, properties);
        self.gap_opened.get_or_insert(now);
        if self.buffered.len() > self.limit {
            self.skip_gap(&mut ready, now);
        } else {
            ready.extend(self.release_expired(now));
        }
        ready
    }

    /// Give up on the open gap if it has outlived `gap_timeout`, returning
    /// the events that become deliverable.
    pub fn release_expired(&mut self, now: Instant) -> Vec<(u32, Properties)> {
        let mut ready = Vec::new();
        if self.gap_deadline().is_some_and(|deadline| now >= deadline) {
            self.skip_gap(&mut ready, now);
        }
        ready
    }

    fn skip_gap(&mut self, ready: &mut Vec<(u32, Properties)>, now: Instant) {
        let Some(lowest) = self.buffered.keys().copied().min_by_key(|k| self.distance(*k)) else {
            self.gap_opened = None;
            return;
        };
        warn!(
            missing_from = self.expected,
            missing_count = self.distance(lowest),
            resume_at = lowest,
            "events lost, skipping gap"
        );
        self.expected = lowest;
        self.drain_into(ready, now);
    }

    /// Release the run starting at the expected key. A gap left behind
    /// starts its timeout from `now`.
    fn drain_into(&mut self, ready: &mut Vec<(u32, Properties)>, now: Instant) {
        while let Some(properties) = self.buffered.remove(&self.expected) {
            ready.push((self.expected, properties));
            self.expected = next_event_key(self.expected);
        }
        self.gap_opened = if self.buffered.is_empty() { None } else { Some(now) };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const GAP: Duration = Duration::from_secs(60);

    fn now() -> Instant {
        Instant::now()
    }

    fn props(value: &str) -> Properties {
        vec![("Status".to_string(), value.to_string())]
    }

    fn keys(ready: &[(u32, Properties)]) -> Vec<u32> {
        ready.iter().map(|(key, _)| *key).collect()
    }

    #[test]
    fn test_in_order_events_pass_through() {
        let mut seq = EventSequencer::new(10, GAP);
        assert_eq!(keys(&seq.accept(0, props("a"), now())), vec![0]);
        assert_eq!(keys(&seq.accept(1, props("b"), now())), vec![1]);
        assert_eq!(seq.expected(), 2);
    }

    #[test]
    fn test_reordered_events_are_released_in_order() {
        let mut seq = EventSequencer::new(10, GAP);
        assert!(seq.accept(1, props("second"), now()).is_empty());
        assert_eq!(seq.buffered(), 1);

        let ready = seq.accept(0, props("first"), now());
        assert_eq!(keys(&ready), vec![0, 1]);
        assert_eq!(ready[0].1, props("first"));
        assert_eq!(ready[1].1, props("second"));
    }

    #[test]
    fn test_duplicates_and_stale_keys_are_dropped() {
        let mut seq = EventSequencer::new(10, GAP);
        seq.accept(0, props("a"), now());
        seq.accept(1, props("b"), now());
        assert!(seq.accept(1, props("again"), now()).is_empty());
        assert!(seq.accept(0, props("restart"), now()).is_empty());

        assert!(seq.accept(5, props("x"), now()).is_empty());
        assert!(seq.accept(5, props("dup"), now()).is_empty());
        assert_eq!(seq.buffered(), 1);
    }

    #[test]
    fn test_overflow_skips_the_gap() {
        let mut seq = EventSequencer::new(2, GAP);
        seq.accept(0, props("a"), now());
        assert!(seq.accept(3, props("c"), now()).is_empty());
        assert!(seq.accept(4, props("d"), now()).is_empty());

        // Third buffered event: keys 1 and 2 are given up on.
        let ready = seq.accept(6, props("f"), now());
        assert_eq!(keys(&ready), vec![3, 4]);
        assert_eq!(seq.expected(), 5);
        assert_eq!(seq.buffered(), 1);
    }

    #[test]
    fn test_wrap_skips_zero() {
        assert_eq!(next_event_key(u32::MAX), 1);
        assert_eq!(next_event_key(0), 1);

        let mut seq = EventSequencer::new(4, GAP);
        seq.expected = u32::MAX - 1;
        assert!(seq.accept(1, props("after wrap"), now()).is_empty());
        assert_eq!(keys(&seq.accept(u32::MAX - 1, props("a"), now())), vec![u32::MAX - 1]);
        assert_eq!(keys(&seq.accept(u32::MAX, props("b"), now())), vec![u32::MAX, 1]);
        assert_eq!(seq.expected(), 2);
    }

    proptest! {
        #[test]
        fn prop_any_arrival_order_delivers_in_key_order(
            order in Just((0u32..8).collect::<Vec<_>>()).prop_shuffle()
        ) {
            let mut seq = EventSequencer::new(16, GAP);
            let mut delivered = Vec::new();
            for key in order {
                delivered.extend(keys(&seq.accept(key, props("v"), now())));
            }
            prop_assert_eq!(delivered, (0u32..8).collect::<Vec<_>>());
        }
    }

    #[test]
    fn test_gap_is_skipped_after_timeout() {
        let start = Instant::now();
        let mut seq = EventSequencer::new(10, GAP);
        assert_eq!(keys(&seq.accept(0, props("a"), start)), vec![0]);
        assert_eq!(seq.gap_deadline(), None);

        assert!(seq.accept(2, props("c"), start).is_empty());
        assert!(seq.accept(3, props("d"), start + Duration::from_secs(10)).is_empty());
        assert_eq!(seq.gap_deadline(), Some(start + GAP));
        assert!(seq.release_expired(start + Duration::from_secs(59)).is_empty());

        let ready = seq.release_expired(start + GAP);
        assert_eq!(keys(&ready), vec![2, 3]);
        assert_eq!(seq.expected(), 4);
        assert_eq!(seq.gap_deadline(), None);
    }

    #[test]
    fn test_late_event_past_deadline_releases_the_run() {
        let start = Instant::now();
        let mut seq = EventSequencer::new(10, GAP);
        seq.accept(0, props("a"), start);
        assert!(seq.accept(2, props("c"), start).is_empty());

        let ready = seq.accept(3, props("d"), start + Duration::from_secs(300));
        assert_eq!(keys(&ready), vec![2, 3]);
        assert_eq!(seq.buffered(), 0);
    }

    #[test]
    fn test_remaining_gap_restarts_its_timeout() {
        let start = Instant::now();
        let mut seq = EventSequencer::new(10, GAP);
        seq.accept(0, props("a"), start);
        seq.accept(2, props("c"), start);
        seq.accept(5, props("f"), start);

        let later = start + Duration::from_secs(30);
        assert_eq!(keys(&seq.accept(1, props("b"), later)), vec![1, 2]);
        assert_eq!(seq.gap_deadline(), Some(later + GAP));
    }
}
