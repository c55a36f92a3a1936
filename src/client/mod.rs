pub mod http;

use async_trait::async_trait;

use crate::domain::{ProgressEvent, SyncOutcome};

pub use http::HttpSyncClient;

/// Delivers one progress update to the remote service.
///
/// Implementations never fail: transport problems are folded into a
/// [`SyncOutcome`] whose `retryable` flag tells the caller what to do.
#[async_trait]
pub trait SyncClient: Send + Sync {
    async fn send(&self, event: &ProgressEvent) -> SyncOutcome;
}
