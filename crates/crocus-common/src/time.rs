//! Clock abstraction and UTC day handling
//!
//! Job windows are expressed in whole UTC days. Config files written for the
//! pipeline use either plain dates (`2025-05-09`) or ISO timestamps
//! (`2025-05-09T00:00:00Z`); both resolve to the same day.

use crate::error::{CrocusError, Result};
use chrono::{DateTime, Days, NaiveDate, NaiveDateTime, Utc};

/// Source of "now" for a run.
///
/// Passed explicitly through the run context so tests can pin "today".
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;

    /// Current UTC calendar day
    fn today(&self) -> NaiveDate {
        self.now().date_naive()
    }
}

/// Wall clock
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Clock frozen at a given instant
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(DateTime<Utc>);

impl FixedClock {
    pub fn new(at: DateTime<Utc>) -> Self {
        Self(at)
    }

    /// Frozen at midnight UTC of the given day
    pub fn at_day(day: NaiveDate) -> Self {
        Self(day_start(day))
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.0
    }
}

/// Parse a config date into a UTC day.
///
/// Accepts `YYYY-MM-DD`, RFC 3339 timestamps and naive ISO timestamps
/// (treated as UTC).
pub fn parse_day(value: &str) -> Result<NaiveDate> {
    let trimmed = value.trim();

    if let Ok(day) = NaiveDate::parse_from_str(trimmed, "%Y-%m-%d") {
        return Ok(day);
    }

    if let Ok(ts) = DateTime::parse_from_rfc3339(trimmed) {
        return Ok(ts.with_timezone(&Utc).date_naive());
    }

    for format in ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S"] {
        if let Ok(ts) = NaiveDateTime::parse_from_str(trimmed, format) {
            return Ok(ts.date());
        }
    }

    Err(CrocusError::invalid_date(
        value,
        "expected YYYY-MM-DD or an ISO 8601 timestamp",
    ))
}

/// Midnight UTC at the start of `day`
pub fn day_start(day: NaiveDate) -> DateTime<Utc> {
    day.and_time(chrono::NaiveTime::MIN).and_utc()
}

/// Half-open UTC window `[start 00:00, end+1 00:00)` covering both days
pub fn day_window(start: NaiveDate, end: NaiveDate) -> (DateTime<Utc>, DateTime<Utc>) {
    let after_end = end.checked_add_days(Days::new(1)).unwrap_or(end);
    (day_start(start), day_start(after_end))
}

/// Timestamp used to name per-run artifacts, e.g. `20250509_085340`
pub fn run_stamp(at: DateTime<Utc>) -> String {
    at.format("%Y%m%d_%H%M%S").to_string()
}
