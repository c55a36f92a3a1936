use serde::{Deserialize, Serialize};

/// Result of one delivery attempt.
///
/// `retryable` is set by the client that classified the failure; callers
/// never inspect the error text to decide what to do.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncOutcome {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub synced_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub retryable: bool,
}

impl SyncOutcome {
    pub fn synced(synced_at: Option<String>) -> Self {
        Self {
            success: true,
            synced_at,
            error: None,
            retryable: false,
        }
    }

    /// The server rejected the update; sending it again cannot succeed.
    pub fn permanent(error: impl Into<String>) -> Self {
        Self {
            success: false,
            synced_at: None,
            error: Some(error.into()),
            retryable: false,
        }
    }

    pub fn transient(error: impl Into<String>) -> Self {
        Self {
            success: false,
            synced_at: None,
            error: Some(error.into()),
            retryable: true,
        }
    }

    pub fn is_permanent_failure(&self) -> bool {
        !self.success && !self.retryable
    }
}

/// Reply to one inbound message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestResponse {
    pub success: bool,
    pub queued: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl IngestResponse {
    pub fn sent() -> Self {
        Self {
            success: true,
            queued: false,
            error: None,
        }
    }

    pub fn queued() -> Self {
        Self {
            success: true,
            queued: true,
            error: None,
        }
    }

    pub fn failed_and_queued(error: Option<String>) -> Self {
        Self {
            success: false,
            queued: true,
            error,
        }
    }

    pub fn rejected(error: impl Into<String>) -> Self {
        Self {
            success: false,
            queued: false,
            error: Some(error.into()),
        }
    }
}
