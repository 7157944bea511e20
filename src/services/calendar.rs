use chrono::{Datelike, NaiveDate, Weekday};

use super::holidays::HolidayCalendar;

pub fn is_weekend(date: NaiveDate) -> bool {
    matches!(date.weekday(), Weekday::Sat | Weekday::Sun)
}

/// Index used on goal documents: 0 = Sunday .. 6 = Saturday.
pub fn weekday_from_sunday_index(index: u32) -> Option<Weekday> {
    match index {
        0 => Some(Weekday::Sun),
        1 => Some(Weekday::Mon),
        2 => Some(Weekday::Tue),
        3 => Some(Weekday::Wed),
        4 => Some(Weekday::Thu),
        5 => Some(Weekday::Fri),
        6 => Some(Weekday::Sat),
        _ => None,
    }
}

/// The `week`-th `weekday` of the month, or `None` when the month has no such day
/// (e.g. a fifth Friday).
pub fn nth_weekday_of_month(year: i32, month: u32, week: u32, weekday: Weekday) -> Option<NaiveDate> {
    let n = u8::try_from(week).ok()?;
    NaiveDate::from_weekday_of_month_opt(year, month, weekday, n)
}

/// Every date from `start` to `end`, both inclusive.
pub fn days_inclusive(start: NaiveDate, end: NaiveDate) -> impl Iterator<Item = NaiveDate> {
    start.iter_days().take_while(move |d| *d <= end)
}

pub async fn working_days(
    start: NaiveDate,
    end: NaiveDate,
    exclude_weekends: bool,
    exclude_holidays: bool,
    holidays: &dyn HolidayCalendar,
) -> u32 {
    let mut total = 0;
    for date in days_inclusive(start, end) {
        if exclude_weekends && is_weekend(date) {
            continue;
        }
        if exclude_holidays && holidays.is_holiday(date).await {
            continue;
        }
        total += 1;
    }
    total
}

pub fn weeks_remaining(start: NaiveDate, end: NaiveDate) -> i64 {
    let days = (end - start).num_days();
    if days <= 0 {
        return 0;
    }
    (days + 6) / 7
}

pub fn months_remaining(start: NaiveDate, end: NaiveDate) -> i32 {
    (end.year() - start.year()) * 12 + (end.month() as i32 - start.month() as i32) + 1
}
