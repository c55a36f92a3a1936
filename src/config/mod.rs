//! Configuration management for readsync.
//!
//! Configuration is read from `~/.config/readsync/config.toml` at startup.
//! If the file doesn't exist, a default configuration with comments is created.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::connectivity::DEFAULT_DEBOUNCE;
use crate::daemon::DaemonConfig;
use crate::dedup::{DEFAULT_MAX_ENTRIES, DEFAULT_WINDOW_MS};
use crate::engine::EngineConfig;
use crate::positions::{PositionConfig, DEFAULT_MAX_RECORDS, DEFAULT_WARN_BYTES};
use crate::queue::{
    QueueConfig, DEFAULT_BASE_DELAY_MS, DEFAULT_CAPACITY, DEFAULT_MAX_DELAY_MS,
    DEFAULT_MAX_RETRIES,
};

/// Main configuration struct.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub remote: RemoteConfig,
    pub queue: QueueSettings,
    pub positions: PositionSettings,
    pub connectivity: ConnectivitySettings,
    pub dedup: DedupSettings,
    pub daemon: DaemonSettings,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RemoteConfig {
    /// Base URL; updates are posted to `<base_url>/progress/sync`.
    pub base_url: String,
    pub token: Option<String>,
    pub timeout_ms: u64,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080/api".to_string(),
            token: None,
            timeout_ms: 5000,
        }
    }
}

impl RemoteConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct QueueSettings {
    pub capacity: usize,
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_CAPACITY,
            max_retries: DEFAULT_MAX_RETRIES,
            base_delay_ms: DEFAULT_BASE_DELAY_MS,
            max_delay_ms: DEFAULT_MAX_DELAY_MS,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PositionSettings {
    pub max_records: usize,
    pub warn_bytes: usize,
}

impl Default for PositionSettings {
    fn default() -> Self {
        Self {
            max_records: DEFAULT_MAX_RECORDS,
            warn_bytes: DEFAULT_WARN_BYTES,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ConnectivitySettings {
    pub debounce_ms: u64,
    pub probe_interval: String,
}

impl Default for ConnectivitySettings {
    fn default() -> Self {
        Self {
            debounce_ms: DEFAULT_DEBOUNCE.as_millis() as u64,
            probe_interval: "15s".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DedupSettings {
    pub window: String,
    pub max_entries: usize,
    pub purge_interval: String,
}

impl Default for DedupSettings {
    fn default() -> Self {
        Self {
            window: DaemonConfig::format_interval(DEFAULT_WINDOW_MS / 1000),
            max_entries: DEFAULT_MAX_ENTRIES,
            purge_interval: "1m".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DaemonSettings {
    pub retry_interval: String,
}

impl Default for DaemonSettings {
    fn default() -> Self {
        Self {
            retry_interval: "30s".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from the default path.
    ///
    /// If the config file doesn't exist, creates a default one with comments.
    /// Missing fields in the config file will use default values.
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::default_config_path()?;

        if !config_path.exists() {
            Self::create_default_config(&config_path)?;
            return Ok(Self::default());
        }

        Self::load_from(&config_path)
    }

    /// Load configuration from an explicit file.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;

        toml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            source: e,
        })
    }

    /// Get the default config file path: `~/.config/readsync/config.toml`
    pub fn default_config_path() -> Result<PathBuf, ConfigError> {
        let config_dir = dirs::config_dir().ok_or(ConfigError::NoConfigDir)?;
        Ok(config_dir.join("readsync").join("config.toml"))
    }

    /// Engine tuning derived from the `[queue]`, `[positions]`,
    /// `[connectivity]` and `[dedup]` sections.
    pub fn engine_config(&self) -> Result<EngineConfig, ConfigError> {
        let window = interval("dedup.window", &self.dedup.window)?;

        Ok(EngineConfig {
            queue: QueueConfig {
                capacity: self.queue.capacity,
                max_retries: self.queue.max_retries,
                base_delay_ms: self.queue.base_delay_ms,
                max_delay_ms: self.queue.max_delay_ms,
            },
            positions: PositionConfig {
                max_records: self.positions.max_records,
                warn_bytes: self.positions.warn_bytes,
            },
            dedup_max_entries: self.dedup.max_entries,
            dedup_window: Duration::from_secs(window),
            debounce: Duration::from_millis(self.connectivity.debounce_ms),
        })
    }

    pub fn daemon_config(&self) -> Result<DaemonConfig, ConfigError> {
        Ok(DaemonConfig {
            retry_interval_secs: interval("daemon.retry_interval", &self.daemon.retry_interval)?,
            probe_interval_secs: interval(
                "connectivity.probe_interval",
                &self.connectivity.probe_interval,
            )?,
            purge_interval_secs: interval("dedup.purge_interval", &self.dedup.purge_interval)?,
            ..DaemonConfig::default()
        })
    }

    fn create_default_config(path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| ConfigError::Io {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }

        let mut file = fs::File::create(path).map_err(|e| ConfigError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;

        file.write_all(Self::default_config_content().as_bytes())
            .map_err(|e| ConfigError::Io {
                path: path.to_path_buf(),
                source: e,
            })?;

        Ok(())
    }

    /// Generate the default config file content with comments.
    fn default_config_content() -> String {
        r##"# readsync configuration
#
# Intervals are written as "30s", "15m", "1h" or "1d".

[remote]
# Updates are POSTed to <base_url>/progress/sync
base_url = "http://localhost:8080/api"

# Bearer token. READSYNC_TOKEN or --token take precedence.
# token = "..."

# Request timeout in milliseconds
timeout_ms = 5000

[queue]
# Pending updates kept while offline; the oldest are dropped beyond this
capacity = 100

# Failed attempts before an update is discarded
max_retries = 5

# Retry backoff: base_delay_ms * 2^retries, capped at max_delay_ms
base_delay_ms = 1000
max_delay_ms = 30000

[positions]
# Synced records are evicted (oldest first) beyond this count
max_records = 200

# Report the position store as nearly full above this size
warn_bytes = 4194304

[connectivity]
# A status change must hold this long before it is published
debounce_ms = 500

# How often the daemon checks whether the remote is reachable
probe_interval = "15s"

[dedup]
# Remember the latest update per chapter for this long
window = "5m"
max_entries = 1000
purge_interval = "1m"

[daemon]
# How often queued updates whose backoff has elapsed are retried
retry_interval = "30s"
"##
        .to_string()
    }
}

fn interval(field: &'static str, value: &str) -> Result<u64, ConfigError> {
    match DaemonConfig::parse_interval(value) {
        Ok(0) => Err(ConfigError::InvalidInterval {
            field,
            message: "interval must be greater than zero".to_string(),
        }),
        Ok(secs) => Ok(secs),
        Err(message) => Err(ConfigError::InvalidInterval { field, message }),
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Could not determine config directory")]
    NoConfigDir,

    #[error("Failed to read/write config file at {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config file at {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("Invalid interval for {field}: {message}")]
    InvalidInterval {
        field: &'static str,
        message: String,
    },
}
