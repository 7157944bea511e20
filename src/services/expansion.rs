use chrono::{Datelike, NaiveDate};

use crate::error::AppResult;
use crate::models::goal::{Goal, Recurrence};
use crate::models::todo::Todo;

use super::calendar::{days_inclusive, is_weekend, nth_weekday_of_month};
use super::holidays::HolidayCalendar;

/// Expand `goal` into one incomplete todo per matching date in
/// `[window_start, window_end]` clipped to the goal's own range, in date order.
///
/// A goal without usable dates yields nothing. An unusable recurrence rule is an
/// error so the caller can log it against the goal and carry on.
pub async fn expand(
    goal: &Goal,
    window_start: NaiveDate,
    window_end: NaiveDate,
    holidays: &dyn HolidayCalendar,
) -> AppResult<Vec<Todo>> {
    let (Some(goal_start), Some(goal_end)) = (goal.start_date, goal.end_date) else {
        tracing::warn!(goal_id = %goal.id, "Goal has no valid date range; skipping expansion");
        return Ok(Vec::new());
    };

    let start = window_start.max(goal_start);
    let end = window_end.min(goal_end);
    if start > end {
        return Ok(Vec::new());
    }

    let rule = goal.recurrence()?;
    let mut todos = Vec::new();
    for date in days_inclusive(start, end) {
        if occurs_on(&rule, date, holidays).await {
            todos.push(Todo::derived(goal, date));
        }
    }
    Ok(todos)
}

/// Holidays only thin out daily goals. Weekly and monthly goals name their
/// days explicitly.
async fn occurs_on(rule: &Recurrence, date: NaiveDate, holidays: &dyn HolidayCalendar) -> bool {
    match rule {
        Recurrence::Daily {
            exclude_weekends,
            exclude_holidays,
        } => {
            if *exclude_weekends && is_weekend(date) {
                return false;
            }
            !(*exclude_holidays && holidays.is_holiday(date).await)
        }
        Recurrence::Weekly { days } => days.contains(&date.weekday()),
        Recurrence::MonthlyOnDate { day } => date.day() == *day,
        Recurrence::MonthlyOnWeekday { week, weekday } => {
            nth_weekday_of_month(date.year(), date.month(), *week, *weekday) == Some(date)
        }
    }
}
