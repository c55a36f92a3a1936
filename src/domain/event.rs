use std::sync::atomic::{AtomicU64, Ordering};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Separator between series id and chapter in a progress key.
pub const KEY_SEPARATOR: &str = "::";

static ID_SEQUENCE: AtomicU64 = AtomicU64::new(0);

/// A validated reading-progress observation for one chapter of a series.
///
/// Only the [`Normalizer`](crate::normalizer::Normalizer) constructs these from
/// untrusted input; every instance satisfies the field constraints it checks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub series_id: String,
    pub chapter: f64,
    /// Scroll position as a percentage.
    pub position: f64,
    /// Milliseconds since the Unix epoch.
    pub timestamp: u64,
    pub source_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub series_title: Option<String>,
}

impl ProgressEvent {
    /// Dedup / merge key shared by every component that groups by chapter.
    pub fn key(&self) -> String {
        progress_key(&self.series_id, self.chapter)
    }

    pub fn same_chapter(&self, series_id: &str, chapter: f64) -> bool {
        self.series_id == series_id && self.chapter == chapter
    }
}

pub fn progress_key(series_id: &str, chapter: f64) -> String {
    format!("{}{}{}", series_id, KEY_SEPARATOR, chapter)
}

/// Generate an opaque, process-unique id for a record derived from `event`.
///
/// The hash covers the event identity plus a sequence number and the wall
/// clock, so two records for the same event still get different ids.
pub(crate) fn generate_id(prefix: &str, event: &ProgressEvent) -> String {
    let seq = ID_SEQUENCE.fetch_add(1, Ordering::Relaxed);
    let nanos = Utc::now().timestamp_nanos_opt().unwrap_or_default();

    let mut hasher = Sha256::new();
    hasher.update(event.key().as_bytes());
    hasher.update(event.timestamp.to_le_bytes());
    hasher.update(seq.to_le_bytes());
    hasher.update(nanos.to_le_bytes());
    let digest = hasher.finalize();

    format!("{}_{}", prefix, hex::encode(&digest[..12]))
}

#[cfg(test)]
pub(crate) fn sample_event(series_id: &str, chapter: f64, timestamp: u64) -> ProgressEvent {
    ProgressEvent {
        series_id: series_id.to_string(),
        chapter,
        position: 42.0,
        timestamp,
        source_url: format!("https://reader.example.com/{}/{}", series_id, chapter),
        series_title: None,
    }
}
