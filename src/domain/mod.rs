pub mod connectivity;
pub mod event;
pub mod message;
pub mod outcome;
pub mod records;

use chrono::Utc;

pub use connectivity::{ConnectivityState, ConnectivityStatus, Transition};
pub use event::{progress_key, ProgressEvent, KEY_SEPARATOR};
pub use message::{InboundMessage, PROGRESS_UPDATE};
pub use outcome::{IngestResponse, SyncOutcome};
pub use records::{PositionRecord, PositionStats, QueuedItem};

/// Current wall clock in milliseconds since the Unix epoch.
pub fn now_ms() -> u64 {
    Utc::now().timestamp_millis().max(0) as u64
}
