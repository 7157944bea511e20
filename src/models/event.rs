use serde::Serialize;
use tokio::sync::broadcast;

use super::sync::SyncStatus;

/// Messages published on the planner's event channel and forwarded over `/ws`.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PlannerEvent {
    SyncStatusChanged {
        status: SyncStatus,
    },
    RegenerationProgress {
        chunk: usize,
        total_chunks: usize,
        derived: usize,
    },
    RegenerationFinished {
        derived: usize,
    },
    Error {
        message: String,
    },
    /// Interruptive notice: remote writes are suspended until a manual retry.
    QuotaExceeded {
        message: String,
    },
    DataChanged {
        collection: &'static str,
    },
}

pub fn publish(tx: &broadcast::Sender<String>, event: PlannerEvent) {
    match serde_json::to_string(&event) {
        // No subscribers is fine
        Ok(msg) => {
            let _ = tx.send(msg);
        }
        Err(e) => tracing::error!(error = %e, "Failed to encode planner event"),
    }
}
