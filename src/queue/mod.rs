//! Durable, bounded send queue.
//!
//! The whole queue lives in memory and is rewritten to the `sync_queue` blob
//! after every mutation. Items leave the queue on confirmed delivery, on a
//! permanent rejection, once they have failed `max_retries` times, or when
//! capacity overflow pushes them out (oldest first).

use std::sync::Arc;

use crate::domain::{ProgressEvent, QueuedItem};
use crate::store::{load_records, save_records, BlobStore};

pub const QUEUE_KEY: &str = "sync_queue";

pub const DEFAULT_CAPACITY: usize = 100;
pub const DEFAULT_MAX_RETRIES: u32 = 5;
pub const DEFAULT_BASE_DELAY_MS: u64 = 1000;
pub const DEFAULT_MAX_DELAY_MS: u64 = 30_000;

#[derive(Debug, Clone)]
pub struct QueueConfig {
    pub capacity: usize,
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_CAPACITY,
            max_retries: DEFAULT_MAX_RETRIES,
            base_delay_ms: DEFAULT_BASE_DELAY_MS,
            max_delay_ms: DEFAULT_MAX_DELAY_MS,
        }
    }
}

/// What `enqueue_merge` did with the incoming event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MergeResult {
    Inserted(String),
    Updated(String),
    /// An entry for the chapter already held an equal or newer timestamp.
    Unchanged(String),
}

/// `base_ms * 2^retries`, capped at `max_ms`.
pub fn backoff_delay(retries: u32, base_ms: u64, max_ms: u64) -> u64 {
    let factor = 1u64.checked_shl(retries).unwrap_or(u64::MAX);
    base_ms.saturating_mul(factor).min(max_ms)
}

pub struct SendQueue<S: BlobStore> {
    store: Arc<S>,
    items: Vec<QueuedItem>,
    config: QueueConfig,
    /// False until the stored blob has been read once. Writes wait for it.
    loaded: bool,
}

impl<S: BlobStore> SendQueue<S> {
    /// Load the persisted queue.
    ///
    /// A failed read starts from an empty queue. The stored blob is then
    /// re-read and merged in before the first write, so items that could not
    /// be read are never overwritten.
    pub fn open(store: Arc<S>, config: QueueConfig) -> Self {
        let loaded = load_records::<_, QueuedItem>(store.as_ref(), QUEUE_KEY);
        let mut queue = Self {
            store,
            items: Vec::new(),
            config,
            loaded: loaded.is_some(),
        };

        if let Some(items) = loaded {
            if !items.is_empty() {
                tracing::info!("Restored {} queued updates", items.len());
            }
            queue.items = items;
            if queue.enforce_capacity() > 0 {
                queue.persist();
            }
        }
        queue
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&QueuedItem> {
        self.items.iter().find(|item| item.id == id)
    }

    /// Copy of the queue in insertion order.
    pub fn snapshot(&self) -> Vec<QueuedItem> {
        self.items.clone()
    }

    /// Append a fresh item for `event` and return its id.
    pub fn enqueue(&mut self, event: ProgressEvent) -> String {
        let item = QueuedItem::new(event);
        let id = item.id.clone();

        self.items.push(item);
        self.enforce_capacity();
        self.persist();

        id
    }

    /// Enqueue unless an entry for the same chapter exists, in which case that
    /// entry takes the incoming position if the incoming timestamp is newer.
    pub fn enqueue_merge(&mut self, event: ProgressEvent) -> MergeResult {
        let existing = self
            .items
            .iter_mut()
            .find(|item| item.event.same_chapter(&event.series_id, event.chapter));

        match existing {
            Some(item) if event.timestamp > item.event.timestamp => {
                item.event.position = event.position;
                item.event.timestamp = event.timestamp;
                item.event.source_url = event.source_url;
                if event.series_title.is_some() {
                    item.event.series_title = event.series_title;
                }
                let id = item.id.clone();
                self.persist();
                MergeResult::Updated(id)
            }
            Some(item) => MergeResult::Unchanged(item.id.clone()),
            None => MergeResult::Inserted(self.enqueue(event)),
        }
    }

    /// Remove the item with `id`. Returns false if it was not queued.
    pub fn remove(&mut self, id: &str) -> bool {
        let before = self.items.len();
        self.items.retain(|item| item.id != id);
        if self.items.len() == before {
            return false;
        }
        self.persist();
        true
    }

    /// Record a failed attempt at `now_ms`. Returns the new retry count.
    pub fn increment_retry(&mut self, id: &str, now_ms: u64) -> Option<u32> {
        let item = self.items.iter_mut().find(|item| item.id == id)?;
        item.retries += 1;
        item.last_retry_at = Some(now_ms);
        let retries = item.retries;

        self.persist();
        Some(retries)
    }

    /// Drop every item that has used up its retries. Returns how many.
    pub fn remove_exhausted(&mut self) -> usize {
        let max = self.config.max_retries;
        let before = self.items.len();
        self.items.retain(|item| item.retries < max);
        let removed = before - self.items.len();

        if removed > 0 {
            tracing::warn!(
                "Dropped {} queued updates after {} failed attempts",
                removed,
                max
            );
            self.persist();
        }
        removed
    }

    pub fn backoff_delay(&self, retries: u32) -> u64 {
        backoff_delay(retries, self.config.base_delay_ms, self.config.max_delay_ms)
    }

    pub fn is_ready_for_retry(&self, item: &QueuedItem, now_ms: u64) -> bool {
        if item.retries == 0 {
            return true;
        }
        match item.last_retry_at {
            None => true,
            Some(last) => now_ms.saturating_sub(last) >= self.backoff_delay(item.retries),
        }
    }

    fn enforce_capacity(&mut self) -> usize {
        let capacity = self.config.capacity;
        if self.items.len() <= capacity {
            return 0;
        }

        let overflow = self.items.len() - capacity;
        let dropped: Vec<QueuedItem> = self.items.drain(..overflow).collect();
        tracing::warn!(
            "Send queue over capacity ({}), dropped {} oldest updates (first: {})",
            capacity,
            overflow,
            dropped
                .first()
                .map(|item| item.event.key())
                .unwrap_or_default()
        );
        overflow
    }

    /// Merge the stored items under the in-memory ones. Stored items keep
    /// their place at the front; in-memory items not already stored follow.
    fn reload(&mut self) -> bool {
        let Some(mut stored) = load_records::<_, QueuedItem>(self.store.as_ref(), QUEUE_KEY) else {
            return false;
        };

        if !stored.is_empty() {
            tracing::info!("Recovered {} queued updates", stored.len());
        }
        for item in self.items.drain(..) {
            if !stored.iter().any(|s| s.id == item.id) {
                stored.push(item);
            }
        }
        self.items = stored;
        self.loaded = true;
        self.enforce_capacity();
        true
    }

    fn persist(&mut self) {
        if !self.loaded && !self.reload() {
            tracing::warn!(
                "Not writing {}: stored queue is unreadable, {} updates held in memory",
                QUEUE_KEY,
                self.items.len()
            );
            return;
        }
        save_records(self.store.as_ref(), QUEUE_KEY, &self.items);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::event::sample_event;
    use crate::store::MemoryStore;

    fn open_queue() -> (Arc<MemoryStore>, SendQueue<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        let queue = SendQueue::open(store.clone(), QueueConfig::default());
        (store, queue)
    }

    #[test]
    fn test_enqueue_persists() {
        let (store, mut queue) = open_queue();
        let id = queue.enqueue(sample_event("S1", 1.0, 1000));

        assert_eq!(queue.len(), 1);
        let item = queue.get(&id).unwrap();
        assert_eq!(item.retries, 0);
        assert_eq!(item.last_retry_at, None);

        let reopened = SendQueue::open(store, QueueConfig::default());
        assert_eq!(reopened.snapshot(), queue.snapshot());
    }

    #[test]
    fn test_capacity_drops_oldest() {
        let (_, mut queue) = open_queue();
        let first = queue.enqueue(sample_event("S1", 1.0, 1000));
        for chapter in 2..=101 {
            queue.enqueue(sample_event("S1", chapter as f64, 1000 + chapter));
        }

        assert_eq!(queue.len(), 100);
        assert!(queue.get(&first).is_none());
        assert_eq!(queue.snapshot()[0].event.chapter, 2.0);
    }

    #[test]
    fn test_capacity_scenario_110_events() {
        let (_, mut queue) = open_queue();
        for chapter in 1..=110u64 {
            queue.enqueue(sample_event("S1", chapter as f64, chapter));
        }

        let chapters: Vec<f64> = queue.snapshot().iter().map(|i| i.event.chapter).collect();
        assert_eq!(chapters.len(), 100);
        assert_eq!(chapters[0], 11.0);
        assert_eq!(chapters[99], 110.0);
    }

    #[test]
    fn test_capacity_drops_even_unretried_items() {
        let (_, mut queue) = open_queue();
        let ids: Vec<String> = (1..=100u64)
            .map(|c| queue.enqueue(sample_event("S1", c as f64, c)))
            .collect();
        queue.increment_retry(&ids[50], 10);

        queue.enqueue(sample_event("S2", 1.0, 1));
        assert!(queue.get(&ids[0]).is_none());
        assert!(queue.get(&ids[50]).is_some());
    }

    #[test]
    fn test_remove() {
        let (store, mut queue) = open_queue();
        let a = queue.enqueue(sample_event("S1", 1.0, 1000));
        let b = queue.enqueue(sample_event("S1", 2.0, 1000));

        assert!(queue.remove(&a));
        assert!(!queue.remove(&a));
        assert_eq!(queue.len(), 1);

        let reopened = SendQueue::open(store, QueueConfig::default());
        assert!(reopened.get(&b).is_some());
        assert!(reopened.get(&a).is_none());
    }

    #[test]
    fn test_increment_retry() {
        let (store, mut queue) = open_queue();
        let id = queue.enqueue(sample_event("S1", 1.0, 1000));

        assert_eq!(queue.increment_retry(&id, 5000), Some(1));
        assert_eq!(queue.increment_retry(&id, 7000), Some(2));
        assert_eq!(queue.increment_retry("missing", 7000), None);

        let reopened = SendQueue::open(store, QueueConfig::default());
        let item = reopened.get(&id).unwrap();
        assert_eq!(item.retries, 2);
        assert_eq!(item.last_retry_at, Some(7000));
    }

    #[test]
    fn test_remove_exhausted() {
        let (_, mut queue) = open_queue();
        let failing = queue.enqueue(sample_event("S1", 1.0, 1000));
        let healthy = queue.enqueue(sample_event("S1", 2.0, 1000));

        for attempt in 0..4 {
            queue.increment_retry(&failing, attempt);
        }
        assert_eq!(queue.remove_exhausted(), 0);

        queue.increment_retry(&failing, 5);
        queue.increment_retry(&healthy, 5);
        assert_eq!(queue.remove_exhausted(), 1);
        assert!(queue.get(&failing).is_none());
        assert!(queue.get(&healthy).is_some());
    }

    #[test]
    fn test_backoff_growth() {
        let (_, queue) = open_queue();
        let delays: Vec<u64> = (0..5).map(|r| queue.backoff_delay(r)).collect();
        assert_eq!(delays, vec![1000, 2000, 4000, 8000, 16000]);
        assert_eq!(queue.backoff_delay(5), 30_000);
        assert_eq!(queue.backoff_delay(10), 30_000);
        assert_eq!(queue.backoff_delay(200), 30_000);
    }

    #[test]
    fn test_is_ready_for_retry() {
        let (_, mut queue) = open_queue();
        let id = queue.enqueue(sample_event("S1", 1.0, 1000));
        assert!(queue.is_ready_for_retry(queue.get(&id).unwrap(), 0));

        queue.increment_retry(&id, 10_000);
        let item = queue.get(&id).unwrap().clone();
        // One retry waits 2s.
        assert!(!queue.is_ready_for_retry(&item, 11_999));
        assert!(queue.is_ready_for_retry(&item, 12_000));

        let mut no_stamp = item;
        no_stamp.last_retry_at = None;
        assert!(queue.is_ready_for_retry(&no_stamp, 0));
    }

    #[test]
    fn test_enqueue_merge_inserts_new_chapter() {
        let (_, mut queue) = open_queue();
        let result = queue.enqueue_merge(sample_event("S1", 1.0, 1000));
        assert!(matches!(result, MergeResult::Inserted(_)));
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn test_enqueue_merge_updates_in_place_when_newer() {
        let (_, mut queue) = open_queue();
        let id = queue.enqueue(sample_event("S1", 1.0, 1000));
        queue.increment_retry(&id, 1);

        let mut newer = sample_event("S1", 1.0, 2000);
        newer.position = 99.0;
        assert_eq!(queue.enqueue_merge(newer), MergeResult::Updated(id.clone()));

        assert_eq!(queue.len(), 1);
        let item = queue.get(&id).unwrap();
        assert_eq!(item.event.timestamp, 2000);
        assert_eq!(item.event.position, 99.0);
        assert_eq!(item.retries, 1);
    }

    #[test]
    fn test_enqueue_merge_ignores_older_or_equal() {
        let (_, mut queue) = open_queue();
        let id = queue.enqueue(sample_event("S1", 1.0, 2000));

        let mut older = sample_event("S1", 1.0, 1000);
        older.position = 1.0;
        assert_eq!(queue.enqueue_merge(older), MergeResult::Unchanged(id.clone()));
        assert_eq!(
            queue.enqueue_merge(sample_event("S1", 1.0, 2000)),
            MergeResult::Unchanged(id.clone())
        );

        assert_eq!(queue.len(), 1);
        assert_eq!(queue.get(&id).unwrap().event.timestamp, 2000);
    }

    #[test]
    fn test_open_survives_read_failure() {
        let store = Arc::new(MemoryStore::new());
        {
            let mut queue = SendQueue::open(store.clone(), QueueConfig::default());
            queue.enqueue(sample_event("S1", 1.0, 1000));
        }

        store.set_fail_reads(true);
        let queue = SendQueue::open(store, QueueConfig::default());
        assert!(queue.is_empty());
    }

    #[test]
    fn test_read_failure_does_not_overwrite_stored_items() {
        let store = Arc::new(MemoryStore::new());
        {
            let mut queue = SendQueue::open(store.clone(), QueueConfig::default());
            for chapter in 1..=3u64 {
                queue.enqueue(sample_event("S1", chapter as f64, chapter));
            }
        }

        store.set_fail_reads(true);
        let mut queue = SendQueue::open(store.clone(), QueueConfig::default());
        assert!(queue.is_empty());
        store.set_fail_reads(false);

        queue.enqueue(sample_event("S1", 4.0, 4));
        assert_eq!(queue.len(), 4);

        let reopened = SendQueue::open(store, QueueConfig::default());
        let chapters: Vec<f64> = reopened.snapshot().iter().map(|i| i.event.chapter).collect();
        assert_eq!(chapters, vec![1.0, 2.0, 3.0, 4.0]);
    }

    #[test]
    fn test_writes_wait_while_stored_queue_unreadable() {
        let store = Arc::new(MemoryStore::new());
        {
            let mut queue = SendQueue::open(store.clone(), QueueConfig::default());
            for chapter in 1..=3u64 {
                queue.enqueue(sample_event("S1", chapter as f64, chapter));
            }
        }

        store.set_fail_reads(true);
        let mut queue = SendQueue::open(store.clone(), QueueConfig::default());
        queue.enqueue(sample_event("S2", 1.0, 10));
        assert_eq!(queue.len(), 1);
        store.set_fail_reads(false);

        let reopened = SendQueue::open(store, QueueConfig::default());
        assert_eq!(reopened.len(), 3);
    }

    #[test]
    fn test_write_failure_keeps_memory_view() {
        let (store, mut queue) = open_queue();
        store.set_fail_writes(true);

        queue.enqueue(sample_event("S1", 1.0, 1000));
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn test_open_trims_oversized_blob() {
        let store = Arc::new(MemoryStore::new());
        {
            let mut queue = SendQueue::open(
                store.clone(),
                QueueConfig {
                    capacity: 10,
                    ..QueueConfig::default()
                },
            );
            for chapter in 1..=10u64 {
                queue.enqueue(sample_event("S1", chapter as f64, chapter));
            }
        }

        let queue = SendQueue::open(
            store,
            QueueConfig {
                capacity: 4,
                ..QueueConfig::default()
            },
        );
        assert_eq!(queue.len(), 4);
        assert_eq!(queue.snapshot()[0].event.chapter, 7.0);
    }
}
