//! # readsync
//!
//! Offline-first synchronization of reading progress with a remote service.
//!
//! ## Architecture
//!
//! ```text
//! payload → Normalizer → Deduplicator → PositionStore → SyncClient | SendQueue
//! ```
//!
//! Writes always land locally first. Delivery to the remote is a retried
//! side effect, reconciled whenever connectivity comes back.
//!
//! ## Quick Start
//!
//! ```bash
//! # Feed progress messages on stdin, one JSON object per line
//! readsync run
//!
//! # One-shot ingest
//! readsync ingest '{"series_id":"S1","chapter":3,"position":40,"timestamp":1700000000000,"source_url":"https://reader.example.com/s1/3"}'
//!
//! # Inspect and flush
//! readsync status
//! readsync drain
//! ```

/// Application context and error handling.
///
/// The [`AppContext`](app::AppContext) struct wires together storage,
/// the HTTP client, the reachability probe and the engine.
pub mod app;

/// Command-line interface using clap.
pub mod cli;

/// Sync transport.
///
/// - [`SyncClient`](client::SyncClient): async trait, one call per update
/// - [`HttpSyncClient`](client::HttpSyncClient): reqwest implementation
pub mod client;

/// Configuration loaded from `~/.config/readsync/config.toml`.
pub mod config;

/// Online/offline tracking with debounced transitions and an HTTP probe.
pub mod connectivity;

/// Long-running service: stdin message loop, retry and purge timers.
pub mod daemon;

/// Suppression of stale or repeated progress updates.
pub mod dedup;

/// Core domain models.
///
/// - [`ProgressEvent`](domain::ProgressEvent): one normalized progress update
/// - [`QueuedItem`](domain::QueuedItem): an update awaiting delivery
/// - [`PositionRecord`](domain::PositionRecord): last known position per chapter
pub mod domain;

/// Orchestration of ingest, drain and reconnect handling.
pub mod engine;

/// Raw payload validation into [`ProgressEvent`](domain::ProgressEvent)s.
pub mod normalizer;

/// Durable last-read positions.
pub mod positions;

/// Durable bounded send queue with retry accounting.
pub mod queue;

/// Blob persistence.
///
/// - [`BlobStore`](store::BlobStore): named JSON blobs
/// - [`SqliteStore`](store::SqliteStore): SQLite implementation
/// - [`MemoryStore`](store::MemoryStore): in-memory implementation
pub mod store;
