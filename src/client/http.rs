use std::sync::{PoisonError, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderValue, CONTENT_TYPE};
use reqwest::{Client, Response};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::app::Result;
use crate::client::SyncClient;
use crate::domain::{ProgressEvent, SyncOutcome};

pub const SYNC_PATH: &str = "progress/sync";
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(5000);

#[derive(Debug, Serialize)]
struct SyncRequest<'a> {
    series_id: &'a str,
    chapter: f64,
    scroll_position: f64,
    timestamp: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    series_title: Option<&'a str>,
}

impl<'a> From<&'a ProgressEvent> for SyncRequest<'a> {
    fn from(event: &'a ProgressEvent) -> Self {
        Self {
            series_id: &event.series_id,
            chapter: event.chapter,
            scroll_position: event.position,
            timestamp: event.timestamp,
            series_title: event.series_title.as_deref(),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct SyncResponse {
    #[serde(default)]
    success: bool,
    synced_at: Option<String>,
    next_sync_in: Option<u64>,
    error: Option<String>,
}

/// `POST <base>/progress/sync` over reqwest.
pub struct HttpSyncClient {
    client: Client,
    endpoint: Url,
    token: RwLock<Option<String>>,
}

impl HttpSyncClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .gzip(true)
            .brotli(true)
            .user_agent(concat!("readsync/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            client,
            endpoint: Self::endpoint(base_url)?,
            token: RwLock::new(None),
        })
    }

    /// Join [`SYNC_PATH`] onto the base URL, keeping any base path segments.
    pub fn endpoint(base_url: &str) -> Result<Url> {
        let mut base = Url::parse(base_url)?;
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        Ok(base.join(SYNC_PATH)?)
    }

    /// Replace the bearer credential attached to later requests.
    pub fn set_token(&self, token: Option<String>) {
        *self.token.write().unwrap_or_else(PoisonError::into_inner) = token;
    }

    fn token(&self) -> Option<String> {
        self.token
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    async fn classify(response: Response) -> SyncOutcome {
        let status = response.status();

        if status.is_success() {
            let body = response.bytes().await.unwrap_or_default();
            let parsed: SyncResponse = serde_json::from_slice(&body).unwrap_or_default();
            tracing::debug!(
                "Sync accepted ({}): success={} next_sync_in={:?} error={:?}",
                status,
                parsed.success,
                parsed.next_sync_in,
                parsed.error
            );
            return SyncOutcome::synced(parsed.synced_at);
        }

        if status.is_client_error() {
            return SyncOutcome::permanent(format!("Client error: {}", status));
        }

        if status.is_server_error() {
            return SyncOutcome::transient(format!("Server error: {}", status));
        }

        SyncOutcome::transient(format!("Unexpected status: {}", status))
    }
}

#[async_trait]
impl SyncClient for HttpSyncClient {
    async fn send(&self, event: &ProgressEvent) -> SyncOutcome {
        let body = match serde_json::to_vec(&SyncRequest::from(event)) {
            Ok(body) => body,
            Err(e) => return SyncOutcome::permanent(format!("Invalid request body: {}", e)),
        };

        let mut request = self
            .client
            .post(self.endpoint.clone())
            .header(CONTENT_TYPE, HeaderValue::from_static("application/json"))
            .body(body);

        if let Some(token) = self.token() {
            request = request.bearer_auth(token);
        }

        match request.send().await {
            Ok(response) => Self::classify(response).await,
            Err(e) if e.is_timeout() => SyncOutcome::transient("Request timed out"),
            Err(e) => SyncOutcome::transient(format!("Network error: {}", e)),
        }
    }
}
