//! In-memory last-writer-wins cache keyed by (series, chapter).

use std::collections::HashMap;

use crate::domain::ProgressEvent;

/// Default age after which cached entries may be purged (5 minutes).
pub const DEFAULT_WINDOW_MS: u64 = 5 * 60 * 1000;

pub const DEFAULT_MAX_ENTRIES: usize = 1000;

pub struct Deduplicator {
    latest: HashMap<String, ProgressEvent>,
    max_entries: usize,
}

impl Default for Deduplicator {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_ENTRIES)
    }
}

impl Deduplicator {
    pub fn new(max_entries: usize) -> Self {
        Self {
            latest: HashMap::new(),
            max_entries: max_entries.max(1),
        }
    }

    /// True when an event for the same chapter with an equal or later
    /// timestamp has already been recorded.
    pub fn is_duplicate(&self, event: &ProgressEvent) -> bool {
        self.latest
            .get(&event.key())
            .is_some_and(|seen| event.timestamp <= seen.timestamp)
    }

    /// Store `event` as the latest for its chapter unless a strictly newer one
    /// is already held. Equal timestamps replace.
    pub fn record(&mut self, event: &ProgressEvent) {
        let key = event.key();
        match self.latest.get(&key) {
            Some(seen) if seen.timestamp > event.timestamp => {}
            Some(_) => {
                self.latest.insert(key, event.clone());
            }
            None => {
                if self.latest.len() >= self.max_entries {
                    self.evict_oldest();
                }
                self.latest.insert(key, event.clone());
            }
        }
    }

    #[cfg(test)]
    pub fn latest(&self, series_id: &str, chapter: f64) -> Option<&ProgressEvent> {
        self.latest
            .get(&crate::domain::progress_key(series_id, chapter))
    }

    /// Drop entries whose timestamp is older than `now_ms - window_ms`.
    /// Returns the number removed.
    pub fn purge_expired(&mut self, now_ms: u64, window_ms: u64) -> usize {
        let cutoff = now_ms.saturating_sub(window_ms);
        let before = self.latest.len();
        self.latest.retain(|_, event| event.timestamp >= cutoff);
        before - self.latest.len()
    }

    pub fn len(&self) -> usize {
        self.latest.len()
    }

    pub fn is_empty(&self) -> bool {
        self.latest.is_empty()
    }

    fn evict_oldest(&mut self) {
        let oldest = self
            .latest
            .iter()
            .min_by_key(|(_, event)| event.timestamp)
            .map(|(key, _)| key.clone());

        if let Some(key) = oldest {
            tracing::debug!("Dedup cache full, evicting {}", key);
            self.latest.remove(&key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::event::sample_event;

    #[test]
    fn test_unknown_event_is_not_duplicate() {
        let dedup = Deduplicator::default();
        assert!(!dedup.is_duplicate(&sample_event("S1", 1.0, 1000)));
    }

    #[test]
    fn test_same_timestamp_is_duplicate() {
        let mut dedup = Deduplicator::default();
        let event = sample_event("S1", 1.0, 1000);
        dedup.record(&event);
        assert!(dedup.is_duplicate(&event));
    }

    #[test]
    fn test_latest_wins_in_order() {
        let mut dedup = Deduplicator::default();
        let earlier = sample_event("S1", 1.0, 1000);
        let later = sample_event("S1", 1.0, 2000);

        dedup.record(&earlier);
        assert!(!dedup.is_duplicate(&later));
        dedup.record(&later);

        assert!(dedup.is_duplicate(&earlier));
        assert!(dedup.is_duplicate(&later));
    }

    #[test]
    fn test_latest_wins_out_of_order() {
        let mut dedup = Deduplicator::default();
        let earlier = sample_event("S1", 1.0, 1000);
        let later = sample_event("S1", 1.0, 2000);

        dedup.record(&later);
        assert!(dedup.is_duplicate(&earlier));

        // An older record never replaces a newer one.
        dedup.record(&earlier);
        assert_eq!(dedup.latest("S1", 1.0).unwrap().timestamp, 2000);
    }

    #[test]
    fn test_equal_timestamp_replaces() {
        let mut dedup = Deduplicator::default();
        let mut first = sample_event("S1", 1.0, 1000);
        first.position = 10.0;
        let mut second = first.clone();
        second.position = 20.0;

        dedup.record(&first);
        dedup.record(&second);
        assert_eq!(dedup.latest("S1", 1.0).unwrap().position, 20.0);
        assert_eq!(dedup.len(), 1);
    }

    #[test]
    fn test_chapters_are_independent() {
        let mut dedup = Deduplicator::default();
        dedup.record(&sample_event("S1", 1.0, 5000));

        assert!(!dedup.is_duplicate(&sample_event("S1", 2.0, 1000)));
        assert!(!dedup.is_duplicate(&sample_event("S2", 1.0, 1000)));
    }

    #[test]
    fn test_purge_expired() {
        let mut dedup = Deduplicator::default();
        dedup.record(&sample_event("S1", 1.0, 1_000));
        dedup.record(&sample_event("S1", 2.0, 400_000));

        let removed = dedup.purge_expired(400_000, DEFAULT_WINDOW_MS);
        assert_eq!(removed, 1);
        assert!(dedup.latest("S1", 1.0).is_none());
        assert!(dedup.latest("S1", 2.0).is_some());
    }

    #[test]
    fn test_bounded_by_count() {
        let mut dedup = Deduplicator::new(3);
        for chapter in 1..=4 {
            dedup.record(&sample_event("S1", chapter as f64, 1000 * chapter));
        }

        assert_eq!(dedup.len(), 3);
        assert!(dedup.latest("S1", 1.0).is_none());
        assert!(dedup.latest("S1", 4.0).is_some());
    }
}
