//! embargo
//!
//! Parses human-readable embargo windows of the form
//! `Weekday HH:MM - Weekday HH:MM` in a named timezone, and answers
//! whether a given instant falls inside any of them.
//!
//! Overlapping windows are treated as a union: [`Calendar::wait_until_clear`]
//! returns the point at which *all* configured windows have closed, not just
//! the first one.

use chrono::{DateTime, Datelike, Duration, TimeZone, Timelike, Utc, Weekday};
use chrono_tz::Tz;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EmbargoError {
    #[error("invalid embargo window '{0}': expected 'Weekday HH:MM - Weekday HH:MM'")]
    BadFormat(String),

    #[error("unknown weekday '{0}' in embargo window")]
    BadWeekday(String),

    #[error("invalid time '{0}' in embargo window, expected HH:MM")]
    BadTime(String),

    #[error("unknown timezone '{0}'")]
    BadTimezone(String),
}

/// A single parsed window: start weekday+time to end weekday+time, both in
/// `tz`. The window may wrap across the week boundary (e.g. Friday to
/// Monday).
#[derive(Debug, Clone, PartialEq, Eq)]
struct Window {
    start_weekday: Weekday,
    start_hour: u32,
    start_minute: u32,
    end_weekday: Weekday,
    end_hour: u32,
    end_minute: u32,
}

impl Window {
    /// Offset in minutes from the start of the week (Monday 00:00) for a
    /// given weekday+time.
    fn minute_of_week(weekday: Weekday, hour: u32, minute: u32) -> i64 {
        let day_index = weekday.num_days_from_monday() as i64;
        day_index * 24 * 60 + hour as i64 * 60 + minute as i64
    }

    fn start_minute_of_week(&self) -> i64 {
        Self::minute_of_week(self.start_weekday, self.start_hour, self.start_minute)
    }

    fn end_minute_of_week(&self) -> i64 {
        Self::minute_of_week(self.end_weekday, self.end_hour, self.end_minute)
    }

    /// Does `now` (already converted into the embargo timezone) fall inside
    /// this window? Handles wraparound windows (start > end within the week).
    fn contains(&self, minute_of_week: i64) -> bool {
        let start = self.start_minute_of_week();
        let end = self.end_minute_of_week();
        if start <= end {
            minute_of_week >= start && minute_of_week < end
        } else {
            minute_of_week >= start || minute_of_week < end
        }
    }

    /// Minutes from `minute_of_week` until this window next closes, given
    /// that `minute_of_week` is currently inside it. Returns 0 if not
    /// currently inside.
    fn minutes_until_close(&self, minute_of_week: i64) -> i64 {
        if !self.contains(minute_of_week) {
            return 0;
        }
        let end = self.end_minute_of_week();
        const WEEK_MINUTES: i64 = 7 * 24 * 60;
        if minute_of_week < end {
            end - minute_of_week
        } else {
            (end + WEEK_MINUTES) - minute_of_week
        }
    }
}

/// A parsed set of embargo windows, bound to one timezone.
#[derive(Debug, Clone)]
pub struct Calendar {
    windows: Vec<Window>,
    timezone: Tz,
}

impl Calendar {
    /// Parse zero or more window strings, all interpreted in `timezone`.
    ///
    /// An empty `raw_windows` produces a calendar that is never in embargo.
    pub fn parse(raw_windows: &[String], timezone: &str) -> Result<Self, EmbargoError> {
        let tz: Tz = timezone
            .parse()
            .map_err(|_| EmbargoError::BadTimezone(timezone.to_string()))?;

        let windows = raw_windows
            .iter()
            .map(|raw| parse_window(raw))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self { windows, timezone: tz })
    }

    /// Is `now` inside any configured window?
    pub fn in_embargo(&self, now: DateTime<Utc>) -> bool {
        let local = now.with_timezone(&self.timezone);
        let minute_of_week = Window::minute_of_week(local.weekday(), local.hour(), local.minute());
        self.windows.iter().any(|w| w.contains(minute_of_week))
    }

    /// How long from `now` until no configured window contains it.
    /// Zero if `now` is already clear of every window.
    pub fn wait_until_clear(&self, now: DateTime<Utc>) -> Duration {
        let local = now.with_timezone(&self.timezone);
        let minute_of_week = Window::minute_of_week(local.weekday(), local.hour(), local.minute());

        let max_minutes = self
            .windows
            .iter()
            .map(|w| w.minutes_until_close(minute_of_week))
            .max()
            .unwrap_or(0);

        Duration::minutes(max_minutes)
    }
}

fn parse_window(raw: &str) -> Result<Window, EmbargoError> {
    let (start_raw, end_raw) = raw
        .split_once('-')
        .ok_or_else(|| EmbargoError::BadFormat(raw.to_string()))?;

    let (start_weekday, start_hour, start_minute) = parse_endpoint(start_raw.trim(), raw)?;
    let (end_weekday, end_hour, end_minute) = parse_endpoint(end_raw.trim(), raw)?;

    Ok(Window {
        start_weekday,
        start_hour,
        start_minute,
        end_weekday,
        end_hour,
        end_minute,
    })
}

fn parse_endpoint(raw: &str, original: &str) -> Result<(Weekday, u32, u32), EmbargoError> {
    let mut parts = raw.split_whitespace();
    let weekday_raw = parts
        .next()
        .ok_or_else(|| EmbargoError::BadFormat(original.to_string()))?;
    let time_raw = parts
        .next()
        .ok_or_else(|| EmbargoError::BadFormat(original.to_string()))?;
    if parts.next().is_some() {
        return Err(EmbargoError::BadFormat(original.to_string()));
    }

    let weekday: Weekday = weekday_raw
        .parse()
        .map_err(|_| EmbargoError::BadWeekday(weekday_raw.to_string()))?;

    let (hour_raw, minute_raw) = time_raw
        .split_once(':')
        .ok_or_else(|| EmbargoError::BadTime(time_raw.to_string()))?;
    let hour: u32 = hour_raw
        .parse()
        .map_err(|_| EmbargoError::BadTime(time_raw.to_string()))?;
    let minute: u32 = minute_raw
        .parse()
        .map_err(|_| EmbargoError::BadTime(time_raw.to_string()))?;
    if hour > 23 || minute > 59 {
        return Err(EmbargoError::BadTime(time_raw.to_string()));
    }

    Ok((weekday, hour, minute))
}

/// Build a UTC instant for a given weekday+time within a reference week,
/// used only by tests to construct fixtures without depending on `Utc::now`.
#[cfg(test)]
fn utc_on(weekday: Weekday, hour: u32, minute: u32) -> DateTime<Utc> {
    // 2024-01-01 is a Monday.
    let days_from_monday = weekday.num_days_from_monday() as i64;
    let base = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
    base + Duration::days(days_from_monday) + Duration::hours(hour as i64) + Duration::minutes(minute as i64)
}
