use std::collections::HashSet;

use chrono::{DateTime, NaiveDate, NaiveTime, Utc, Weekday};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::{Validate, ValidationError};

use crate::error::AppError;
use crate::services::calendar::weekday_from_sunday_index;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum GoalType {
    Daily,
    Weekly,
    Monthly,
}

impl Default for GoalType {
    fn default() -> Self {
        Self::Daily
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum MonthlyType {
    SpecificDate,
    SpecificWeekDay,
}

/// Type-specific recurrence fields, stored flat on the goal document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Schedule {
    #[serde(default)]
    pub exclude_weekends: bool,
    #[serde(default)]
    pub exclude_holidays: bool,
    /// 0 = Sunday .. 6 = Saturday
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub weekly_days: Vec<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub monthly_type: Option<MonthlyType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub specific_date: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub specific_week: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub specific_week_day: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Goal {
    pub id: Uuid,
    pub title: String,
    #[serde(rename = "type")]
    pub kind: GoalType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(with = "super::hhmm")]
    pub scheduled_time: NaiveTime,
    #[serde(flatten)]
    pub schedule: Schedule,
    #[serde(
        default,
        deserialize_with = "super::lenient_date::deserialize",
        skip_serializing_if = "Option::is_none"
    )]
    pub start_date: Option<NaiveDate>,
    #[serde(
        default,
        deserialize_with = "super::lenient_date::deserialize",
        skip_serializing_if = "Option::is_none"
    )]
    pub end_date: Option<NaiveDate>,
    pub created_at: DateTime<Utc>,
}

/// A goal's recurrence rule after its type-specific fields have been checked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Recurrence {
    Daily {
        exclude_weekends: bool,
        exclude_holidays: bool,
    },
    Weekly {
        days: HashSet<Weekday>,
    },
    MonthlyOnDate {
        day: u32,
    },
    MonthlyOnWeekday {
        week: u32,
        weekday: Weekday,
    },
}

impl Schedule {
    pub fn recurrence(&self, kind: GoalType) -> Result<Recurrence, String> {
        match kind {
            GoalType::Daily => Ok(Recurrence::Daily {
                exclude_weekends: self.exclude_weekends,
                exclude_holidays: self.exclude_holidays,
            }),
            GoalType::Weekly => {
                if self.weekly_days.is_empty() {
                    return Err("weekly goals need at least one weekday".into());
                }
                let days = self
                    .weekly_days
                    .iter()
                    .map(|&d| {
                        weekday_from_sunday_index(d)
                            .ok_or_else(|| format!("weekday index {d} is outside 0-6"))
                    })
                    .collect::<Result<HashSet<_>, _>>()?;
                Ok(Recurrence::Weekly { days })
            }
            GoalType::Monthly => match self.monthly_type {
                Some(MonthlyType::SpecificDate) => match self.specific_date {
                    Some(day @ 1..=31) => Ok(Recurrence::MonthlyOnDate { day }),
                    Some(day) => Err(format!("day of month {day} is outside 1-31")),
                    None => Err("specificDate is required for specific-date goals".into()),
                },
                Some(MonthlyType::SpecificWeekDay) => {
                    let week = match self.specific_week {
                        Some(week @ 1..=5) => week,
                        Some(week) => return Err(format!("week {week} is outside 1-5")),
                        None => return Err("specificWeek is required".into()),
                    };
                    let weekday = self
                        .specific_week_day
                        .ok_or_else(|| "specificWeekDay is required".to_string())
                        .and_then(|d| {
                            weekday_from_sunday_index(d)
                                .ok_or_else(|| format!("weekday index {d} is outside 0-6"))
                        })?;
                    Ok(Recurrence::MonthlyOnWeekday { week, weekday })
                }
                None => Err("monthlyType is required for monthly goals".into()),
            },
        }
    }
}

impl Goal {
    pub fn new(input: GoalInput) -> Self {
        let mut goal = Self {
            id: Uuid::new_v4(),
            title: String::new(),
            kind: GoalType::Daily,
            description: None,
            scheduled_time: input.scheduled_time,
            schedule: Schedule::default(),
            start_date: None,
            end_date: None,
            created_at: Utc::now(),
        };
        goal.apply(input);
        goal
    }

    /// Replace every editable field. `id` and `created_at` never change.
    pub fn apply(&mut self, input: GoalInput) {
        self.title = input.title;
        self.kind = input.kind;
        self.description = input.description.filter(|d| !d.is_empty());
        self.scheduled_time = input.scheduled_time;
        self.schedule = input.schedule;
        self.start_date = Some(input.start_date);
        self.end_date = Some(input.end_date);
    }

    pub fn recurrence(&self) -> Result<Recurrence, AppError> {
        self.schedule
            .recurrence(self.kind)
            .map_err(|e| AppError::Validation(format!("goal {}: {}", self.id, e)))
    }
}

/// Body of goal create and update requests.
#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
#[validate(schema(function = "validate_goal_input", skip_on_field_errors = false))]
pub struct GoalInput {
    #[validate(length(min = 1, max = 200, message = "Title must be 1-200 characters"))]
    pub title: String,

    #[serde(rename = "type", default)]
    pub kind: GoalType,

    #[validate(length(max = 500, message = "Description must be under 500 characters"))]
    pub description: Option<String>,

    #[serde(with = "super::hhmm")]
    pub scheduled_time: NaiveTime,

    #[serde(flatten)]
    pub schedule: Schedule,

    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
}

fn validate_goal_input(input: &GoalInput) -> Result<(), ValidationError> {
    if input.start_date > input.end_date {
        let mut err = ValidationError::new("date_range");
        err.message = Some("endDate must not be before startDate".into());
        return Err(err);
    }
    if let Err(reason) = input.schedule.recurrence(input.kind) {
        let mut err = ValidationError::new("schedule");
        err.message = Some(reason.into());
        return Err(err);
    }
    Ok(())
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GoalSummary {
    pub goal_id: Uuid,
    pub planned: usize,
    pub completed: usize,
    pub completion_rate: f64,
    pub working_days: Option<u32>,
    pub weeks_remaining: i64,
    pub months_remaining: i32,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn input(kind: GoalType, schedule: Schedule) -> GoalInput {
        GoalInput {
            title: "Read".into(),
            kind,
            description: None,
            scheduled_time: NaiveTime::from_hms_opt(9, 0, 0).unwrap(),
            schedule,
            start_date: NaiveDate::from_ymd_opt(2025, 1, 1).unwrap(),
            end_date: NaiveDate::from_ymd_opt(2025, 1, 31).unwrap(),
        }
    }

    #[test]
    fn test_rejects_end_before_start() {
        let mut body = input(GoalType::Daily, Schedule::default());
        body.end_date = NaiveDate::from_ymd_opt(2024, 12, 31).unwrap();
        assert!(body.validate().is_err());
    }

    #[test]
    fn test_weekly_requires_days() {
        let body = input(GoalType::Weekly, Schedule::default());
        assert!(body.validate().is_err());

        let body = input(
            GoalType::Weekly,
            Schedule {
                weekly_days: vec![1, 3, 5],
                ..Default::default()
            },
        );
        assert!(body.validate().is_ok());
    }

    #[test]
    fn test_monthly_week_day_ranges() {
        let body = input(
            GoalType::Monthly,
            Schedule {
                monthly_type: Some(MonthlyType::SpecificWeekDay),
                specific_week: Some(6),
                specific_week_day: Some(5),
                ..Default::default()
            },
        );
        assert!(body.validate().is_err());

        let rule = Schedule {
            monthly_type: Some(MonthlyType::SpecificWeekDay),
            specific_week: Some(2),
            specific_week_day: Some(0),
            ..Default::default()
        }
        .recurrence(GoalType::Monthly)
        .unwrap();
        assert_eq!(
            rule,
            Recurrence::MonthlyOnWeekday {
                week: 2,
                weekday: Weekday::Sun
            }
        );
    }

    #[test]
    fn test_update_keeps_identity() {
        let mut goal = Goal::new(input(GoalType::Daily, Schedule::default()));
        let (id, created_at) = (goal.id, goal.created_at);
        let mut edited = input(GoalType::Daily, Schedule::default());
        edited.title = "Read more".into();
        goal.apply(edited);
        assert_eq!(goal.id, id);
        assert_eq!(goal.created_at, created_at);
        assert_eq!(goal.title, "Read more");
    }

    #[test]
    fn test_document_shape_is_flat_camel_case() {
        let goal = Goal::new(input(
            GoalType::Weekly,
            Schedule {
                weekly_days: vec![1, 3, 5],
                exclude_holidays: true,
                ..Default::default()
            },
        ));
        let doc = serde_json::to_value(&goal).unwrap();
        assert_eq!(doc["type"], "weekly");
        assert_eq!(doc["scheduledTime"], "09:00");
        assert_eq!(doc["weeklyDays"], serde_json::json!([1, 3, 5]));
        assert_eq!(doc["startDate"], "2025-01-01");
        assert!(doc.get("monthlyType").is_none());
    }

    #[test]
    fn test_malformed_dates_decode_as_missing() {
        let doc = serde_json::json!({
            "id": Uuid::new_v4(),
            "title": "Broken",
            "type": "daily",
            "scheduledTime": "07:30",
            "startDate": "not-a-date",
            "createdAt": "2025-01-01T00:00:00Z",
        });
        let goal: Goal = serde_json::from_value(doc).unwrap();
        assert!(goal.start_date.is_none());
        assert!(goal.end_date.is_none());
    }
}
