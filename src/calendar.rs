//! Day and week keys.
//!
//! A day key is the local calendar date in the configured zone, shifted back by
//! one day for instants before the late-night cutoff hour. Weeks start on
//! Sunday and the (possibly partial) week containing Jan 1 is week 1, so keys
//! never straddle a year boundary.

use crate::errors::DiaryError;
use chrono::{DateTime, Datelike, Duration, NaiveDate, Timelike, Utc};
use chrono_tz::Tz;
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DateInfo {
    pub date: NaiveDate,
    pub day_key: String,
    pub display_label: String,
    pub week_key: String,
    pub is_late_night: bool,
}

#[derive(Debug, Clone, Copy)]
pub struct DateKeyResolver {
    time_zone: Tz,
    cutoff_hour: u32,
}

impl DateKeyResolver {
    pub fn new(time_zone: Tz, cutoff_hour: u32) -> Self {
        Self {
            time_zone,
            cutoff_hour,
        }
    }

    pub fn time_zone(&self) -> Tz {
        self.time_zone
    }

    pub fn resolve_now(&self) -> DateInfo {
        self.resolve(Utc::now(), true)
    }

    pub fn resolve(&self, instant: DateTime<Utc>, respect_cutoff: bool) -> DateInfo {
        let local = instant.with_timezone(&self.time_zone);
        let is_late_night = respect_cutoff && local.hour() < self.cutoff_hour;
        let mut date = local.date_naive();
        if is_late_night {
            date = date - Duration::days(1);
        }
        build_info(date, is_late_night)
    }

    /// Keys for an explicit calendar date; the cutoff never applies.
    pub fn for_date(&self, date: NaiveDate) -> DateInfo {
        build_info(date, false)
    }

    pub fn for_day_key(&self, day_key: &str) -> Result<DateInfo, DiaryError> {
        parse_day_key(day_key).map(|date| self.for_date(date))
    }

    /// Like [`Self::for_day_key`], but days after `today` are rejected.
    pub fn for_day_key_until(
        &self,
        day_key: &str,
        today: &DateInfo,
    ) -> Result<DateInfo, DiaryError> {
        let info = self.for_day_key(day_key)?;
        if info.date > today.date {
            return Err(DiaryError::invalid(format!(
                "{day_key} is after today ({})",
                today.day_key
            )));
        }
        Ok(info)
    }
}

fn build_info(date: NaiveDate, is_late_night: bool) -> DateInfo {
    DateInfo {
        date,
        day_key: day_key(date),
        display_label: display_label(date),
        week_key: week_key_for(date),
        is_late_night,
    }
}

pub fn day_key(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

pub fn display_label(date: NaiveDate) -> String {
    date.format("%A, %B %-d, %Y").to_string()
}

pub fn month_key(date: NaiveDate) -> String {
    date.format("%Y-%m").to_string()
}

pub fn parse_day_key(key: &str) -> Result<NaiveDate, DiaryError> {
    NaiveDate::parse_from_str(key, "%Y-%m-%d")
        .ok()
        .filter(|date| day_key(*date) == key)
        .ok_or_else(|| DiaryError::invalid(format!("'{key}' is not a YYYY-MM-DD day key")))
}

pub fn validate_month_key(key: &str) -> Result<(), DiaryError> {
    NaiveDate::parse_from_str(&format!("{key}-01"), "%Y-%m-%d")
        .ok()
        .filter(|date| month_key(*date) == key)
        .map(|_| ())
        .ok_or_else(|| DiaryError::invalid(format!("'{key}' is not a YYYY-MM month key")))
}

/// Weekday of Jan 1 of `date`'s year, Sunday = 0.
fn start_of_year_weekday(date: NaiveDate) -> u32 {
    let weekday = date.weekday().num_days_from_sunday();
    (weekday + 7 - date.ordinal0() % 7) % 7
}

pub fn sunday_week_number(date: NaiveDate) -> u32 {
    (date.ordinal0() + start_of_year_weekday(date)) / 7 + 1
}

pub fn week_key_for(date: NaiveDate) -> String {
    format!("{}-W{:02}", date.year(), sunday_week_number(date))
}

pub fn parse_week_key(key: &str) -> Result<(i32, u32), DiaryError> {
    let invalid = || DiaryError::invalid(format!("'{key}' is not a YYYY-Www week key"));
    let (year, week) = key.split_once("-W").ok_or_else(invalid)?;
    let year: i32 = year.parse().map_err(|_| invalid())?;
    let week: u32 = week.parse().map_err(|_| invalid())?;
    if format!("{year}-W{week:02}") != key {
        return Err(invalid());
    }
    Ok((year, week))
}

/// First and last dates carrying `key`. Week 1 and the final week are clipped to the year.
pub fn week_bounds(key: &str) -> Result<(NaiveDate, NaiveDate), DiaryError> {
    let (year, week) = parse_week_key(key)?;
    let out_of_range = || DiaryError::invalid(format!("week {key} does not exist"));
    let jan1 = NaiveDate::from_ymd_opt(year, 1, 1).ok_or_else(out_of_range)?;
    let dec31 = NaiveDate::from_ymd_opt(year, 12, 31).ok_or_else(out_of_range)?;
    if week == 0 {
        return Err(out_of_range());
    }

    let offset = i64::from(start_of_year_weekday(jan1));
    let last_day = i64::from(dec31.ordinal0());
    let first = (7 * i64::from(week - 1) - offset).max(0);
    let last = (7 * i64::from(week) - 1 - offset).min(last_day);
    if first > last_day {
        return Err(out_of_range());
    }

    Ok((jan1 + Duration::days(first), jan1 + Duration::days(last)))
}

pub fn previous_week_key(key: &str) -> Result<String, DiaryError> {
    let (start, _) = week_bounds(key)?;
    let before = start
        .pred_opt()
        .ok_or_else(|| DiaryError::invalid(format!("no week precedes {key}")))?;
    Ok(week_key_for(before))
}
