use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::goal::GoalType;

/// Audit record of a goal-derived todo being completed. Shares the todo's id.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CompletedTask {
    pub id: Uuid,
    pub goal_id: Uuid,
    pub scheduled_date: NaiveDate,
    pub completed_date: DateTime<Utc>,
    #[serde(rename = "type")]
    pub kind: GoalType,
}
