//! Long-running sync service.
//!
//! Reads one inbound message per line on stdin and answers each with one
//! JSON line on stdout. In the background it probes the remote, reconciles
//! on reconnect, retries queued updates whose backoff has elapsed and
//! purges the dedup cache.

use std::fs;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::Notify;
use tokio::task::JoinSet;
use tokio::time::{interval, Interval, MissedTickBehavior};

use crate::app::{ReadsyncError, Result};
use crate::client::SyncClient;
use crate::connectivity::Probe;
use crate::domain::{now_ms, ConnectivityStatus, IngestResponse};
use crate::engine::{DrainMode, SyncEngine};
use crate::store::BlobStore;

/// Daemon configuration
#[derive(Debug, Clone)]
pub struct DaemonConfig {
    /// Retry timer for queued updates whose backoff has elapsed (default: 30s)
    pub retry_interval_secs: u64,
    /// Connectivity probe period (default: 15s)
    pub probe_interval_secs: u64,
    /// Dedup purge period (default: 60s)
    pub purge_interval_secs: u64,
    /// Reconcile and drain once at startup if the remote is reachable
    pub initial_drain: bool,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            retry_interval_secs: 30,
            probe_interval_secs: 15,
            purge_interval_secs: 60,
            initial_drain: true,
        }
    }
}

impl DaemonConfig {
    /// Parse interval string like "1h", "30m", "15s", "1d"
    pub fn parse_interval(s: &str) -> std::result::Result<u64, String> {
        let s = s.trim().to_lowercase();

        if let Some(hours) = s.strip_suffix('h') {
            hours
                .parse::<u64>()
                .map(|h| h * 3600)
                .map_err(|_| format!("Invalid hours: {}", hours))
        } else if let Some(minutes) = s.strip_suffix('m') {
            minutes
                .parse::<u64>()
                .map(|m| m * 60)
                .map_err(|_| format!("Invalid minutes: {}", minutes))
        } else if let Some(days) = s.strip_suffix('d') {
            days.parse::<u64>()
                .map(|d| d * 86400)
                .map_err(|_| format!("Invalid days: {}", days))
        } else if let Some(secs) = s.strip_suffix('s') {
            secs.parse::<u64>()
                .map_err(|_| format!("Invalid seconds: {}", secs))
        } else {
            // Raw seconds
            s.parse::<u64>()
                .map_err(|_| format!("Invalid interval: {}. Use format like '30s', '5m', '1h'", s))
        }
    }

    /// Format interval for display
    pub fn format_interval(secs: u64) -> String {
        if secs >= 86400 && secs % 86400 == 0 {
            format!("{}d", secs / 86400)
        } else if secs >= 3600 && secs % 3600 == 0 {
            format!("{}h", secs / 3600)
        } else if secs >= 60 && secs % 60 == 0 {
            format!("{}m", secs / 60)
        } else {
            format!("{}s", secs)
        }
    }
}

/// Daemon runner
pub struct Daemon<S: BlobStore, C: SyncClient, P: Probe> {
    engine: Arc<SyncEngine<S, C>>,
    probe: Arc<P>,
    config: DaemonConfig,
    shutdown: Arc<Notify>,
}

impl<S, C, P> Daemon<S, C, P>
where
    S: BlobStore + 'static,
    C: SyncClient + 'static,
    P: Probe + 'static,
{
    pub fn new(engine: Arc<SyncEngine<S, C>>, probe: Arc<P>, config: DaemonConfig) -> Self {
        Self {
            engine,
            probe,
            config,
            shutdown: Arc::new(Notify::new()),
        }
    }

    /// Get the PID file path
    pub fn pid_file_path() -> Option<PathBuf> {
        dirs::runtime_dir()
            .or_else(dirs::cache_dir)
            .map(|d| d.join("readsync").join("daemon.pid"))
    }

    /// Check if another daemon is already running
    pub fn is_running() -> bool {
        let Some(pid_path) = Self::pid_file_path() else {
            return false;
        };
        fs::read_to_string(pid_path)
            .ok()
            .and_then(|pid| pid.trim().parse::<u32>().ok())
            .is_some_and(process_exists)
    }

    fn write_pid_file() -> std::io::Result<()> {
        if let Some(pid_path) = Self::pid_file_path() {
            if let Some(parent) = pid_path.parent() {
                fs::create_dir_all(parent)?;
            }
            let mut file = fs::File::create(&pid_path)?;
            writeln!(file, "{}", std::process::id())?;
        }
        Ok(())
    }

    fn remove_pid_file() {
        if let Some(pid_path) = Self::pid_file_path() {
            let _ = fs::remove_file(pid_path);
        }
    }

    /// Run the daemon on stdin/stdout until input closes or a termination
    /// signal arrives.
    pub async fn run(&self) -> Result<()> {
        if Self::is_running() {
            return Err(ReadsyncError::Other(
                "Another daemon instance is already running".to_string(),
            ));
        }

        Self::write_pid_file()
            .map_err(|e| ReadsyncError::Other(format!("Failed to write PID file: {}", e)))?;

        self.spawn_signal_handler();

        tracing::info!(
            "readsync daemon started (retry interval: {}, probe interval: {}, PID: {})",
            DaemonConfig::format_interval(self.config.retry_interval_secs),
            DaemonConfig::format_interval(self.config.probe_interval_secs),
            std::process::id()
        );

        let result = self
            .serve(BufReader::new(tokio::io::stdin()), tokio::io::stdout())
            .await;

        tracing::info!("Daemon shutting down...");
        Self::remove_pid_file();
        result
    }

    /// Stop the daemon loop.
    pub fn stop(&self) {
        self.shutdown.notify_one();
    }

    #[cfg(unix)]
    fn spawn_signal_handler(&self) {
        use tokio::signal::unix::{signal, SignalKind};

        let shutdown = self.shutdown.clone();
        tokio::spawn(async move {
            let (mut sigterm, mut sigint) =
                match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
                    (Ok(term), Ok(int)) => (term, int),
                    (Err(e), _) | (_, Err(e)) => {
                        tracing::error!("Failed to install signal handlers: {}", e);
                        return;
                    }
                };

            tokio::select! {
                _ = sigterm.recv() => {},
                _ = sigint.recv() => {},
            }
            shutdown.notify_one();
        });
    }

    #[cfg(windows)]
    fn spawn_signal_handler(&self) {
        let shutdown = self.shutdown.clone();
        tokio::spawn(async move {
            let _ = tokio::signal::ctrl_c().await;
            shutdown.notify_one();
        });
    }

    /// The service loop over arbitrary line input and response output.
    pub async fn serve<R, W>(&self, input: R, mut output: W) -> Result<()>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let (subscription, mut transitions) = self.engine.monitor().transitions();
        let mut tasks = JoinSet::new();

        let initial = self.probe.check().await;
        self.engine
            .monitor()
            .force(ConnectivityStatus::from_reachable(initial));
        // The forced status above may already have published a reconnect.
        while transitions.try_recv().is_ok() {}

        if self.config.initial_drain && self.engine.monitor().is_online() {
            let engine = self.engine.clone();
            tasks.spawn(async move {
                engine.reconcile().await;
            });
        }

        let mut lines = input.lines();
        let mut retry = ticker(self.config.retry_interval_secs);
        let mut probe = ticker(self.config.probe_interval_secs);
        let mut purge = ticker(self.config.purge_interval_secs);

        let mut aborted = false;
        loop {
            tokio::select! {
                line = lines.next_line() => match line {
                    Ok(Some(line)) => {
                        if line.trim().is_empty() {
                            continue;
                        }
                        let response = self.handle_line(&line).await;
                        write_response(&mut output, &response).await?;
                    }
                    Ok(None) => {
                        tracing::info!("Input closed");
                        break;
                    }
                    Err(e) => {
                        tracing::error!("Failed to read input: {}", e);
                        break;
                    }
                },
                Some(transition) = transitions.recv() => {
                    let engine = self.engine.clone();
                    tasks.spawn(async move {
                        engine.on_transition(transition).await;
                    });
                }
                _ = retry.tick() => {
                    if self.engine.monitor().is_online() && self.engine.pending_count() > 0 {
                        let engine = self.engine.clone();
                        tasks.spawn(async move {
                            engine.drain(DrainMode::Ready).await;
                        });
                    }
                }
                _ = probe.tick() => {
                    let probe = self.probe.clone();
                    let monitor = self.engine.monitor().clone();
                    tasks.spawn(async move {
                        let reachable = probe.check().await;
                        monitor.signal(ConnectivityStatus::from_reachable(reachable));
                    });
                }
                _ = purge.tick() => {
                    self.engine.purge_dedup(now_ms());
                }
                Some(joined) = tasks.join_next(), if !tasks.is_empty() => {
                    if let Err(e) = joined {
                        tracing::error!("Background task failed: {}", e);
                    }
                }
                _ = self.shutdown.notified() => {
                    aborted = true;
                    break;
                }
            }
        }

        subscription.unsubscribe();

        if aborted {
            tasks.shutdown().await;
        } else {
            while tasks.join_next().await.is_some() {}
        }
        Ok(())
    }

    async fn handle_line(&self, line: &str) -> IngestResponse {
        match serde_json::from_str(line) {
            Ok(message) => self.engine.handle_message(message).await,
            Err(e) => {
                tracing::warn!("Rejecting malformed input line: {}", e);
                IngestResponse::rejected(format!("invalid JSON: {}", e))
            }
        }
    }
}

/// Interval whose immediate first tick is already consumed.
fn ticker(secs: u64) -> Interval {
    let period = Duration::from_secs(secs.max(1));
    let mut timer = interval(period);
    timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
    timer.reset();
    timer
}

async fn write_response<W>(output: &mut W, response: &IngestResponse) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut line = serde_json::to_vec(response)?;
    line.push(b'\n');
    output.write_all(&line).await?;
    output.flush().await?;
    Ok(())
}

#[cfg(unix)]
fn process_exists(pid: u32) -> bool {
    use std::process::Command;
    Command::new("kill")
        .args(["-0", &pid.to_string()])
        .status()
        .map(|s| s.success())
        .unwrap_or(false)
}

#[cfg(windows)]
fn process_exists(pid: u32) -> bool {
    use std::process::Command;
    Command::new("tasklist")
        .args(["/FI", &format!("PID eq {}", pid)])
        .output()
        .map(|o| String::from_utf8_lossy(&o.stdout).contains(&pid.to_string()))
        .unwrap_or(false)
}
