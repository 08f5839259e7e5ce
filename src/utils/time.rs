use std::fmt::Display;

use chrono::{DateTime, Days, Local, NaiveDate, TimeZone, Utc};

/// This is the standard way of converting a date to a rollup key in pagepulse.
pub fn date_key(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

/// Hour bucket key, `YYYY-MM-DDTHH` in the timezone of `moment`.
pub fn hour_key<Tz: TimeZone>(moment: &DateTime<Tz>) -> String
where
    Tz::Offset: Display,
{
    moment.format("%Y-%m-%dT%H").to_string()
}

/// Date and hour keys for a moment, both in local time.
pub fn local_keys(moment: DateTime<Utc>) -> (String, String) {
    let local = moment.with_timezone(&Local);
    (date_key(local.date_naive()), hour_key(&local))
}

pub fn local_date(moment: DateTime<Utc>) -> NaiveDate {
    moment.with_timezone(&Local).date_naive()
}

pub fn parse_date_key(key: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(key, "%Y-%m-%d").ok()
}

/// Date portion of an hour key. Hour keys that are too short yield themselves, which sorts them
/// before any real date.
pub fn hour_key_date(key: &str) -> &str {
    key.get(..10).unwrap_or(key)
}

/// Trailing window of `days` date keys ending with `today`, most recent first.
pub fn trailing_date_keys(today: NaiveDate, days: u32) -> Vec<String> {
    (0..days)
        .filter_map(|offset| today.checked_sub_days(Days::new(offset as u64)))
        .map(date_key)
        .collect()
}

/// Short display label for a date relative to today.
pub fn day_label(date: NaiveDate, today: NaiveDate) -> String {
    if date == today {
        "Today".into()
    } else if today.pred_opt() == Some(date) {
        "Yest".into()
    } else {
        date.format("%a").to_string()
    }
}
