//! Durable "last read" positions, one record per (series, chapter).
//!
//! Independent of the send queue: a record stays here after its update is
//! delivered (flagged `synced`) and is only evicted, synced-first, when the
//! store outgrows `max_records`.

use std::sync::Arc;

use crate::domain::{PositionRecord, PositionStats, ProgressEvent};
use crate::store::{load_records, save_records, BlobStore};

pub const POSITIONS_KEY: &str = "reading_positions";

pub const DEFAULT_MAX_RECORDS: usize = 200;
/// 80% of a 5 MiB storage quota.
pub const DEFAULT_WARN_BYTES: usize = 4 * 1024 * 1024;

#[derive(Debug, Clone)]
pub struct PositionConfig {
    pub max_records: usize,
    pub warn_bytes: usize,
}

impl Default for PositionConfig {
    fn default() -> Self {
        Self {
            max_records: DEFAULT_MAX_RECORDS,
            warn_bytes: DEFAULT_WARN_BYTES,
        }
    }
}

pub struct PositionStore<S: BlobStore> {
    store: Arc<S>,
    records: Vec<PositionRecord>,
    config: PositionConfig,
    loaded: bool,
}

impl<S: BlobStore> PositionStore<S> {
    /// An unreadable blob opens empty and is merged back in before the
    /// first write.
    pub fn open(store: Arc<S>, config: PositionConfig) -> Self {
        let loaded = load_records(store.as_ref(), POSITIONS_KEY);
        Self {
            store,
            loaded: loaded.is_some(),
            records: loaded.unwrap_or_default(),
            config,
        }
    }

    /// Record `event` as the latest position for its chapter.
    ///
    /// An existing record is overwritten and flagged unsynced unless it
    /// already holds a newer timestamp, in which case it is left alone.
    pub fn upsert(&mut self, event: &ProgressEvent) -> PositionRecord {
        let existing = self
            .records
            .iter_mut()
            .find(|r| r.series_id == event.series_id && r.chapter == event.chapter);

        let record = match existing {
            Some(record) if record.timestamp > event.timestamp => {
                tracing::debug!(
                    "Ignoring stale position for {} ({} < {})",
                    event.key(),
                    event.timestamp,
                    record.timestamp
                );
                return record.clone();
            }
            Some(record) => {
                record.position = event.position;
                record.timestamp = event.timestamp;
                record.source_url = event.source_url.clone();
                if event.series_title.is_some() {
                    record.series_title = event.series_title.clone();
                }
                record.synced = false;
                record.clone()
            }
            None => {
                let record = PositionRecord::from_event(event);
                self.records.push(record.clone());
                record
            }
        };

        self.evict_synced();
        self.persist();
        record
    }

    pub fn find(&self, series_id: &str, chapter: f64) -> Option<&PositionRecord> {
        self.records
            .iter()
            .find(|r| r.series_id == series_id && r.chapter == chapter)
    }

    /// Returns false if no record has `id`.
    pub fn mark_synced(&mut self, id: &str) -> bool {
        let Some(record) = self.records.iter_mut().find(|r| r.id == id) else {
            return false;
        };
        if !record.synced {
            record.synced = true;
            self.persist();
        }
        true
    }

    /// Mark the chapter's record synced if the delivered event is at least as
    /// new as what the record holds.
    pub fn mark_delivered(&mut self, event: &ProgressEvent) -> bool {
        let id = match self.find(&event.series_id, event.chapter) {
            Some(record) if !record.synced && record.timestamp <= event.timestamp => {
                record.id.clone()
            }
            _ => return false,
        };
        self.mark_synced(&id)
    }

    /// Delete every synced record. Returns how many were removed.
    pub fn remove_synced(&mut self) -> usize {
        let before = self.records.len();
        self.records.retain(|r| !r.synced);
        let removed = before - self.records.len();
        if removed > 0 {
            self.persist();
        }
        removed
    }

    pub fn list_unsynced(&self) -> Vec<PositionRecord> {
        self.records.iter().filter(|r| !r.synced).cloned().collect()
    }

    pub fn list_all(&self) -> Vec<PositionRecord> {
        self.records.clone()
    }

    pub fn stats(&self) -> PositionStats {
        let bytes = serde_json::to_string(&self.records)
            .map(|json| json.len())
            .unwrap_or_default();

        PositionStats {
            count: self.records.len(),
            bytes,
            nearing_capacity: bytes >= self.config.warn_bytes,
        }
    }

    /// Evict the oldest synced records until back under `max_records`.
    /// Unsynced records are never evicted.
    fn evict_synced(&mut self) {
        let max = self.config.max_records;
        if self.records.len() <= max {
            return;
        }

        let mut synced: Vec<(u64, String)> = self
            .records
            .iter()
            .filter(|r| r.synced)
            .map(|r| (r.timestamp, r.id.clone()))
            .collect();
        synced.sort();

        let overflow = self.records.len() - max;
        let evict: Vec<String> = synced
            .into_iter()
            .take(overflow)
            .map(|(_, id)| id)
            .collect();

        self.records.retain(|r| !evict.contains(&r.id));
        tracing::warn!(
            "Position store over capacity ({}), evicted {} synced records",
            max,
            evict.len()
        );

        if self.records.len() > max {
            tracing::warn!(
                "Position store holds {} unsynced records, above the {} cap",
                self.records.len(),
                max
            );
        }
    }

    /// Fold the stored records into the in-memory ones; per chapter the
    /// newer timestamp wins, ties go to the stored record.
    fn reload(&mut self) -> bool {
        let Some(mut stored) =
            load_records::<_, PositionRecord>(self.store.as_ref(), POSITIONS_KEY)
        else {
            return false;
        };

        for record in self.records.drain(..) {
            let existing = stored
                .iter_mut()
                .find(|r| r.series_id == record.series_id && r.chapter == record.chapter);
            match existing {
                Some(existing) if existing.timestamp >= record.timestamp => {}
                Some(existing) => *existing = record,
                None => stored.push(record),
            }
        }
        self.records = stored;
        self.loaded = true;
        self.evict_synced();
        true
    }

    fn persist(&mut self) {
        if !self.loaded && !self.reload() {
            tracing::warn!(
                "Not writing {}: stored positions are unreadable",
                POSITIONS_KEY
            );
            return;
        }
        save_records(self.store.as_ref(), POSITIONS_KEY, &self.records);
    }
}
