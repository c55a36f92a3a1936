use std::path::PathBuf;
use std::sync::Arc;

use crate::app::error::{ReadsyncError, Result};
use crate::client::HttpSyncClient;
use crate::config::Config;
use crate::connectivity::{HttpProbe, Probe};
use crate::daemon::{Daemon, DaemonConfig};
use crate::domain::ConnectivityStatus;
use crate::engine::SyncEngine;
use crate::store::SqliteStore;

pub type Engine = SyncEngine<SqliteStore, HttpSyncClient>;

pub struct AppContext {
    pub config: Config,
    pub store: Arc<SqliteStore>,
    pub client: Arc<HttpSyncClient>,
    pub probe: Arc<HttpProbe>,
    pub engine: Arc<Engine>,
}

impl AppContext {
    /// `token` wins over `[remote] token` from the config file.
    pub fn new(config: Config, db_path: Option<PathBuf>, token: Option<String>) -> Result<Self> {
        let db_path = match db_path {
            Some(p) => p,
            None => Self::default_db_path()?,
        };

        let store = Arc::new(SqliteStore::new(&db_path)?);
        Self::with_store(config, store, token)
    }

    pub fn in_memory(config: Config) -> Result<Self> {
        let store = Arc::new(SqliteStore::in_memory()?);
        Self::with_store(config, store, None)
    }

    fn with_store(config: Config, store: Arc<SqliteStore>, token: Option<String>) -> Result<Self> {
        let timeout = config.remote.timeout();

        let client = Arc::new(HttpSyncClient::new(&config.remote.base_url, timeout)?);
        client.set_token(token.or_else(|| config.remote.token.clone()));

        let probe = Arc::new(HttpProbe::new(&config.remote.base_url, timeout)?);

        // Offline until a probe says otherwise.
        let engine = Arc::new(SyncEngine::new(
            store.clone(),
            client.clone(),
            config.engine_config()?,
            ConnectivityStatus::Offline,
        ));

        Ok(Self {
            config,
            store,
            client,
            probe,
            engine,
        })
    }

    /// Probe the remote once and apply the result without debouncing.
    pub async fn refresh_connectivity(&self) -> ConnectivityStatus {
        let status = ConnectivityStatus::from_reachable(self.probe.check().await);
        self.engine.monitor().force(status);
        status
    }

    pub fn daemon(&self, config: DaemonConfig) -> Daemon<SqliteStore, HttpSyncClient, HttpProbe> {
        Daemon::new(self.engine.clone(), self.probe.clone(), config)
    }

    fn default_db_path() -> Result<PathBuf> {
        let data_dir = dirs::data_dir()
            .ok_or_else(|| ReadsyncError::Other("Could not find data directory".into()))?;
        let readsync_dir = data_dir.join("readsync");
        std::fs::create_dir_all(&readsync_dir)?;
        Ok(readsync_dir.join("readsync.db"))
    }
}
