use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SyncStatus {
    Idle,
    Syncing,
    Success,
    Error,
}

impl Default for SyncStatus {
    fn default() -> Self {
        Self::Idle
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncStatusResponse {
    pub status: SyncStatus,
    pub remote_configured: bool,
    pub mirrored: bool,
    pub retry_count: u32,
    pub max_retries: u32,
    pub last_attempt: Option<DateTime<Utc>>,
    pub quota_exceeded: bool,
    pub last_error: Option<String>,
    pub regenerating: bool,
}

/// What a sync request ended up doing.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case", tag = "outcome", content = "reason")]
pub enum SyncOutcome {
    Pulled,
    Pushed,
    Skipped(SkipReason),
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    LocalOnly,
    AlreadyMirrored,
    InFlight,
    QuotaExceeded,
    RetryBudgetExhausted,
    CoolingDown,
}
