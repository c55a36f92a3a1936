//! The progress synchronization engine.
//!
//! ```text
//!  payload ─► Normalizer ─► Deduplicator ─► PositionStore ─┬─► SyncClient   (online)
//!                                                          └─► SendQueue    (offline / failed)
//!
//!  reconnect ─► promote unsynced positions ─► drain SendQueue ─► SyncClient
//! ```
//!
//! State is owned by one [`SyncEngine`] instance; nothing is global.
//! Every public operation returns a value, never an error.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::Serialize;
use serde_json::Value;
use tokio::sync::Mutex as AsyncMutex;

use crate::client::SyncClient;
use crate::connectivity::{ConnectionMonitor, DEFAULT_DEBOUNCE};
use crate::dedup::{Deduplicator, DEFAULT_MAX_ENTRIES, DEFAULT_WINDOW_MS};
use crate::domain::{
    now_ms, ConnectivityState, ConnectivityStatus, InboundMessage, IngestResponse,
    PositionRecord, PositionStats, ProgressEvent, Transition,
};
use crate::normalizer::Normalizer;
use crate::positions::{PositionConfig, PositionStore};
use crate::queue::{MergeResult, QueueConfig, SendQueue};
use crate::store::BlobStore;

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub queue: QueueConfig,
    pub positions: PositionConfig,
    pub dedup_max_entries: usize,
    pub dedup_window: Duration,
    pub debounce: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            queue: QueueConfig::default(),
            positions: PositionConfig::default(),
            dedup_max_entries: DEFAULT_MAX_ENTRIES,
            dedup_window: Duration::from_millis(DEFAULT_WINDOW_MS),
            debounce: DEFAULT_DEBOUNCE,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainMode {
    /// Attempt every queued item, ignoring backoff. Used on reconnect and
    /// for manual triggers.
    All,
    /// Attempt only items whose backoff has elapsed. Used by the periodic
    /// retry timer.
    Ready,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DrainReport {
    pub attempted: usize,
    pub synced: usize,
    /// Permanently rejected and discarded.
    pub rejected: usize,
    pub retried: usize,
    /// Removed after reaching the retry cap.
    pub exhausted: usize,
    /// Skipped because their backoff had not elapsed.
    pub deferred: usize,
    /// A retry-timer drain found another drain running and did nothing.
    pub skipped: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct EngineStatus {
    pub connectivity: ConnectivityState,
    pub pending: usize,
    pub unsynced_positions: usize,
    pub positions: PositionStats,
    pub draining: bool,
}

pub struct SyncEngine<S: BlobStore, C: SyncClient> {
    client: Arc<C>,
    monitor: ConnectionMonitor,
    normalizer: Normalizer,
    dedup: Mutex<Deduplicator>,
    queue: Mutex<SendQueue<S>>,
    positions: Mutex<PositionStore<S>>,
    /// Held for the whole of a drain pass, and of promotion on reconcile.
    drain_turn: AsyncMutex<()>,
    dedup_window_ms: u64,
}

impl<S, C> SyncEngine<S, C>
where
    S: BlobStore,
    C: SyncClient,
{
    pub fn new(
        store: Arc<S>,
        client: Arc<C>,
        config: EngineConfig,
        initial: ConnectivityStatus,
    ) -> Self {
        Self {
            client,
            monitor: ConnectionMonitor::new(initial, config.debounce),
            normalizer: Normalizer::new(),
            dedup: Mutex::new(Deduplicator::new(config.dedup_max_entries)),
            queue: Mutex::new(SendQueue::open(store.clone(), config.queue)),
            positions: Mutex::new(PositionStore::open(store, config.positions)),
            drain_turn: AsyncMutex::new(()),
            dedup_window_ms: config.dedup_window.as_millis() as u64,
        }
    }

    pub fn monitor(&self) -> &ConnectionMonitor {
        &self.monitor
    }

    /// Handle one inbound adapter message (envelope or bare payload).
    pub async fn handle_message(&self, message: Value) -> IngestResponse {
        let message = InboundMessage::from_value(message);
        if !message.is_progress_update() {
            tracing::warn!("Ignoring message of type {}", message.kind);
            return IngestResponse::rejected(format!("unknown message type: {}", message.kind));
        }
        self.ingest(&message.payload).await
    }

    /// Normalize and ingest a raw progress payload.
    pub async fn ingest(&self, payload: &Value) -> IngestResponse {
        match self.normalizer.normalize(payload) {
            Ok(event) => self.ingest_event(event).await,
            Err(e) => IngestResponse::rejected(e.to_string()),
        }
    }

    pub async fn ingest_event(&self, event: ProgressEvent) -> IngestResponse {
        // Check-then-record under one lock so concurrent ingests cannot both pass.
        {
            let mut dedup = lock(&self.dedup);
            if dedup.is_duplicate(&event) {
                tracing::debug!("Duplicate progress for {} at {}", event.key(), event.timestamp);
                return IngestResponse::sent();
            }
            dedup.record(&event);
        }

        lock(&self.positions).upsert(&event);

        if !self.monitor.is_online() {
            lock(&self.queue).enqueue(event);
            return IngestResponse::queued();
        }

        let outcome = self.client.send(&event).await;
        if outcome.success {
            lock(&self.positions).mark_delivered(&event);
            return IngestResponse::sent();
        }

        tracing::warn!(
            "Sync of {} failed, queued for retry: {}",
            event.key(),
            outcome.error.as_deref().unwrap_or("unknown error")
        );
        lock(&self.queue).enqueue(event);
        IngestResponse::failed_and_queued(outcome.error)
    }

    /// Merge every unsynced position into the send queue. Returns how many
    /// entries were inserted or refreshed.
    fn promote_unsynced(&self) -> usize {
        let unsynced = lock(&self.positions).list_unsynced();
        if unsynced.is_empty() {
            return 0;
        }

        let mut queue = lock(&self.queue);
        let promoted = unsynced
            .iter()
            .map(|record| queue.enqueue_merge(record.to_event()))
            .filter(|result| !matches!(result, MergeResult::Unchanged(_)))
            .count();

        if promoted > 0 {
            tracing::info!("Promoted {} unsynced positions into the send queue", promoted);
        }
        promoted
    }

    /// Deliver queued items in insertion order.
    ///
    /// Drains never overlap. `All` waits for a running drain to finish and
    /// then makes its own pass; `Ready` returns a report with `skipped` set
    /// instead, since the next timer tick will retry anyway.
    pub async fn drain(&self, mode: DrainMode) -> DrainReport {
        let _turn = match mode {
            DrainMode::All => self.drain_turn.lock().await,
            DrainMode::Ready => match self.drain_turn.try_lock() {
                Ok(turn) => turn,
                Err(_) => {
                    tracing::debug!("Drain already in progress");
                    return DrainReport {
                        skipped: true,
                        ..DrainReport::default()
                    };
                }
            },
        };
        self.drain_pass(mode).await
    }

    /// One pass over a queue snapshot. Callers hold `drain_turn`.
    async fn drain_pass(&self, mode: DrainMode) -> DrainReport {
        let snapshot = lock(&self.queue).snapshot();
        let mut report = DrainReport::default();

        for item in snapshot {
            if mode == DrainMode::Ready {
                let ready = lock(&self.queue).is_ready_for_retry(&item, now_ms());
                if !ready {
                    report.deferred += 1;
                    continue;
                }
            }

            report.attempted += 1;
            let outcome = self.client.send(&item.event).await;

            if outcome.success {
                lock(&self.queue).remove(&item.id);
                lock(&self.positions).mark_delivered(&item.event);
                report.synced += 1;
            } else if outcome.is_permanent_failure() {
                tracing::warn!(
                    "Discarding {} rejected by server: {}",
                    item.event.key(),
                    outcome.error.as_deref().unwrap_or("unknown error")
                );
                lock(&self.queue).remove(&item.id);
                // Nothing left to deliver; keep it from being promoted again.
                lock(&self.positions).mark_delivered(&item.event);
                report.rejected += 1;
            } else {
                lock(&self.queue).increment_retry(&item.id, now_ms());
                report.retried += 1;
            }
        }

        report.exhausted = lock(&self.queue).remove_exhausted();

        if report.attempted > 0 || report.exhausted > 0 {
            tracing::info!(
                "Drain finished: {} attempted, {} synced, {} rejected, {} retried, {} exhausted, {} deferred",
                report.attempted,
                report.synced,
                report.rejected,
                report.retried,
                report.exhausted,
                report.deferred
            );
        }
        report
    }

    /// React to a published connectivity change. A reconnect promotes
    /// unsynced positions and drains the whole queue.
    pub async fn on_transition(&self, transition: Transition) -> Option<DrainReport> {
        if !transition.is_reconnect() {
            tracing::info!("Offline, {} updates pending", self.pending_count());
            return None;
        }

        Some(self.reconcile().await)
    }

    /// Promote unsynced positions, then drain the whole queue.
    ///
    /// Promotion waits for any running drain, so it never rewrites an item
    /// that an in-flight pass is about to remove.
    pub async fn reconcile(&self) -> DrainReport {
        let _turn = self.drain_turn.lock().await;
        self.promote_unsynced();
        self.drain_pass(DrainMode::All).await
    }

    /// Drop dedup entries older than the configured window.
    pub fn purge_dedup(&self, now_ms: u64) -> usize {
        let removed = lock(&self.dedup).purge_expired(now_ms, self.dedup_window_ms);
        if removed > 0 {
            tracing::debug!("Purged {} dedup entries", removed);
        }
        removed
    }

    pub fn pending_count(&self) -> usize {
        lock(&self.queue).len()
    }

    pub fn is_draining(&self) -> bool {
        self.drain_turn.try_lock().is_err()
    }

    pub fn status(&self) -> EngineStatus {
        let (unsynced_positions, positions) = {
            let store = lock(&self.positions);
            (store.list_unsynced().len(), store.stats())
        };

        EngineStatus {
            connectivity: self.monitor.state(),
            pending: self.pending_count(),
            unsynced_positions,
            positions,
            draining: self.is_draining(),
        }
    }

    pub fn queued_items(&self) -> Vec<crate::domain::QueuedItem> {
        lock(&self.queue).snapshot()
    }

    pub fn positions(&self) -> Vec<PositionRecord> {
        lock(&self.positions).list_all()
    }

    pub fn unsynced_positions(&self) -> Vec<PositionRecord> {
        lock(&self.positions).list_unsynced()
    }

    pub fn remove_synced_positions(&self) -> usize {
        lock(&self.positions).remove_synced()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
