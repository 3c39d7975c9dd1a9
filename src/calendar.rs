//! Day-of-year helpers on a fixed leap-year calendar.
//!
//! Every date is projected onto 2020 so that Feb 29 is always day 60 and
//! Dec 31 always day 366, whatever the year the date came from. Non-leap
//! years therefore simply have no observation at day 60.

use anyhow::{Context, Result};
use chrono::{Datelike, Duration, NaiveDate};

/// The calendar every date is projected onto.
pub const ALIGNMENT_YEAR: i32 = 2020;

/// Highest day-of-year on the alignment calendar.
pub const MAX_DAY: u16 = 366;

/// Returns the day-of-year of `date` on the leap-year alignment calendar.
pub fn day_of_year(date: NaiveDate) -> u16 {
    // Every (month, day) exists in a leap year.
    NaiveDate::from_ymd_opt(ALIGNMENT_YEAR, date.month(), date.day())
        .map(|d| d.ordinal() as u16)
        .unwrap_or_else(|| date.ordinal() as u16)
}

/// Parses labels such as `"Mar 10"` into a day-of-year.
pub fn month_day_to_day(label: &str) -> Result<u16> {
    let full = format!("{} {}", label.trim(), ALIGNMENT_YEAR);
    let date = NaiveDate::parse_from_str(&full, "%b %d %Y")
        .with_context(|| format!("invalid month/day label '{label}', expected e.g. 'Mar 10'"))?;
    Ok(date.ordinal() as u16)
}

/// Formats a day-of-year as `"Mar 10"` (no zero padding).
pub fn day_to_month_day(day: u16) -> Option<String> {
    if day == 0 || day > MAX_DAY {
        return None;
    }
    let start = NaiveDate::from_ymd_opt(ALIGNMENT_YEAR, 1, 1)?;
    let date = start + Duration::days(i64::from(day) - 1);
    Some(date.format("%b %-d").to_string())
}

/// First-of-month ticks that fall inside `[xmin, xmax]`, as `(day, label)`.
pub fn month_ticks(xmin: f64, xmax: f64) -> Vec<(u16, String)> {
    (1..=12)
        .filter_map(|month| NaiveDate::from_ymd_opt(ALIGNMENT_YEAR, month, 1))
        .map(|d| (d.ordinal() as u16, d.format("%b %-d").to_string()))
        .filter(|(day, _)| xmin <= f64::from(*day) && f64::from(*day) <= xmax)
        .collect()
}
