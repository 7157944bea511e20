use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use super::goal::Goal;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Todo {
    pub id: Uuid,
    pub title: String,
    pub scheduled_date: NaiveDate,
    #[serde(with = "super::hhmm")]
    pub scheduled_time: NaiveTime,
    #[serde(default)]
    pub is_from_goal: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub goal_id: Option<Uuid>,
    #[serde(default)]
    pub is_completed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actual_completion_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

impl Todo {
    /// A fresh, incomplete occurrence of `goal` on `date`.
    pub fn derived(goal: &Goal, date: NaiveDate) -> Self {
        Self {
            id: Uuid::new_v4(),
            title: goal.title.clone(),
            scheduled_date: date,
            scheduled_time: goal.scheduled_time,
            is_from_goal: true,
            goal_id: Some(goal.id),
            is_completed: false,
            actual_completion_time: None,
            note: None,
        }
    }

    pub fn manual(input: CreateTodoRequest) -> Self {
        Self {
            id: Uuid::new_v4(),
            title: input.title,
            scheduled_date: input.scheduled_date,
            scheduled_time: input.scheduled_time,
            is_from_goal: false,
            goal_id: None,
            is_completed: false,
            actual_completion_time: None,
            note: input.note.filter(|n| !n.is_empty()),
        }
    }

    /// Key identifying the occurrence a derived todo stands for.
    pub fn occurrence_key(&self) -> Option<(Uuid, NaiveDate)> {
        match (self.is_from_goal, self.goal_id) {
            (true, Some(goal_id)) => Some((goal_id, self.scheduled_date)),
            _ => None,
        }
    }

    /// Returns true if the completion flag actually changed.
    pub fn set_completed(&mut self, completed: bool, at: DateTime<Utc>) -> bool {
        if self.is_completed == completed {
            return false;
        }
        self.is_completed = completed;
        self.actual_completion_time = completed.then_some(at);
        true
    }
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CreateTodoRequest {
    #[validate(length(min = 1, max = 200, message = "Title must be 1-200 characters"))]
    pub title: String,
    pub scheduled_date: NaiveDate,
    #[serde(with = "super::hhmm")]
    pub scheduled_time: NaiveTime,
    #[validate(length(max = 500, message = "Note must be under 500 characters"))]
    pub note: Option<String>,
}

/// Partial update. Goal-derived todos only accept `is_completed` and `note`.
#[derive(Debug, Default, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct UpdateTodoRequest {
    #[validate(length(min = 1, max = 200))]
    pub title: Option<String>,
    pub scheduled_date: Option<NaiveDate>,
    #[serde(default, deserialize_with = "optional_hhmm")]
    pub scheduled_time: Option<NaiveTime>,
    pub is_completed: Option<bool>,
    #[validate(length(max = 500, message = "Note must be under 500 characters"))]
    pub note: Option<String>,
}

impl UpdateTodoRequest {
    pub fn touches_schedule(&self) -> bool {
        self.title.is_some() || self.scheduled_date.is_some() || self.scheduled_time.is_some()
    }
}

fn optional_hhmm<'de, D>(deserializer: D) -> Result<Option<NaiveTime>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let raw = Option::<String>::deserialize(deserializer)?;
    raw.map(|s| {
        super::hhmm::parse(&s)
            .ok_or_else(|| serde::de::Error::custom(format!("invalid time of day: {s}")))
    })
    .transpose()
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TodoQuery {
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
}
