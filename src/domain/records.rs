use serde::{Deserialize, Serialize};

use super::event::{generate_id, ProgressEvent};

/// An update waiting in the send queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueuedItem {
    pub id: String,
    #[serde(flatten)]
    pub event: ProgressEvent,
    pub retries: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_retry_at: Option<u64>,
}

impl QueuedItem {
    pub fn new(event: ProgressEvent) -> Self {
        Self {
            id: generate_id("q", &event),
            event,
            retries: 0,
            last_retry_at: None,
        }
    }
}

/// The latest known reading position for one (series, chapter) pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionRecord {
    pub id: String,
    pub series_id: String,
    pub chapter: f64,
    pub position: f64,
    pub timestamp: u64,
    pub synced: bool,
    pub source_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub series_title: Option<String>,
}

impl PositionRecord {
    pub fn from_event(event: &ProgressEvent) -> Self {
        Self {
            id: generate_id("p", event),
            series_id: event.series_id.clone(),
            chapter: event.chapter,
            position: event.position,
            timestamp: event.timestamp,
            synced: false,
            source_url: event.source_url.clone(),
            series_title: event.series_title.clone(),
        }
    }

    /// Rebuild the event this record last captured.
    pub fn to_event(&self) -> ProgressEvent {
        ProgressEvent {
            series_id: self.series_id.clone(),
            chapter: self.chapter,
            position: self.position,
            timestamp: self.timestamp,
            source_url: self.source_url.clone(),
            series_title: self.series_title.clone(),
        }
    }
}

/// Size summary of the position store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PositionStats {
    pub count: usize,
    /// Length of the serialized blob in bytes.
    pub bytes: usize,
    pub nearing_capacity: bool,
}
