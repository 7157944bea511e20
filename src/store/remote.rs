//! Contract of the remote document store that mirrors an account's planner.

use async_trait::async_trait;
use serde::Serialize;
use serde_json::{Map, Value};

/// A document body. `Value::Null` in an update means "clear this field".
pub type Document = Map<String, Value>;

/// Upper bound on operations in one `batch_write` call.
pub const MAX_BATCH_OPS: usize = 499;

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum Collection {
    Goals,
    Todos,
    DiaryEntries,
    CompletedTasks,
}

impl Collection {
    pub fn as_str(&self) -> &'static str {
        match self {
            Collection::Goals => "goals",
            Collection::Todos => "todos",
            Collection::DiaryEntries => "diary_entries",
            Collection::CompletedTasks => "completed_tasks",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FilterOp {
    Eq,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Filter {
    pub field: String,
    pub op: FilterOp,
    pub value: Value,
}

impl Filter {
    pub fn eq(field: &str, value: impl Into<Value>) -> Self {
        Self {
            field: field.to_string(),
            op: FilterOp::Eq,
            value: value.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct OrderBy {
    pub field: String,
    pub descending: bool,
}

impl OrderBy {
    pub fn asc(field: &str) -> Self {
        Self {
            field: field.to_string(),
            descending: false,
        }
    }

    pub fn desc(field: &str) -> Self {
        Self {
            field: field.to_string(),
            descending: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum WriteOp {
    Set {
        collection: Collection,
        id: String,
        doc: Document,
    },
    Delete {
        collection: Collection,
        id: String,
    },
}

/// A stored document together with its id.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    pub id: String,
    pub data: Document,
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum RemoteError {
    #[error("remote store request failed: {0}")]
    Transport(String),

    #[error("remote store returned {status}: {message}")]
    Status { status: u16, message: String },

    #[error("batch of {0} operations exceeds the batch limit")]
    BatchTooLarge(usize),

    #[error("malformed remote document: {0}")]
    Decode(String),
}

impl RemoteError {
    fn message(&self) -> String {
        self.to_string().to_lowercase()
    }

    /// Resource-exhaustion failures, detected from the status and message text.
    pub fn is_quota_exceeded(&self) -> bool {
        if let RemoteError::Status { status: 429, .. } = self {
            return true;
        }
        let message = self.message();
        ["quota", "resource-exhausted", "resource_exhausted", "resource exhausted"]
            .iter()
            .any(|needle| message.contains(needle))
    }

    pub fn is_missing_index(&self) -> bool {
        matches!(self, RemoteError::Status { .. }) && self.message().contains("index")
    }

    /// Message suitable for the user-visible error area.
    pub fn user_message(&self) -> String {
        if self.is_missing_index() {
            "The remote store needs an index for this query; create it in the store console"
                .into()
        } else {
            format!("Remote store unavailable: {self}")
        }
    }
}

impl From<reqwest::Error> for RemoteError {
    fn from(e: reqwest::Error) -> Self {
        RemoteError::Transport(e.to_string())
    }
}

impl From<serde_json::Error> for RemoteError {
    fn from(e: serde_json::Error) -> Self {
        RemoteError::Decode(e.to_string())
    }
}

#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Create (or overwrite) a document. Without an id the store assigns one.
    async fn create(
        &self,
        collection: Collection,
        doc: Document,
        id: Option<&str>,
    ) -> Result<String, RemoteError>;

    async fn update(
        &self,
        collection: Collection,
        id: &str,
        fields: Document,
    ) -> Result<(), RemoteError>;

    async fn delete(&self, collection: Collection, id: &str) -> Result<(), RemoteError>;

    async fn get(&self, collection: Collection, id: &str) -> Result<Option<Document>, RemoteError>;

    async fn query(
        &self,
        collection: Collection,
        filters: &[Filter],
        order_by: &[OrderBy],
    ) -> Result<Vec<Snapshot>, RemoteError>;

    async fn batch_write(&self, ops: Vec<WriteOp>) -> Result<(), RemoteError>;
}
