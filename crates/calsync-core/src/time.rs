//! Time windows for bounding a sync run.
//!
//! Every reconciliation pass is restricted to a [`TimeWindow`]: only local
//! entries whose start falls inside the window are considered, and the
//! provider listing is requested for the same range.

use chrono::{DateTime, Duration, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Default length of a sync window, in days.
pub const DEFAULT_WINDOW_DAYS: i64 = 365;

/// Errors raised when building a window from caller input.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TimeWindowError {
    /// The end of the window is before its start.
    #[error("window end {end} is before window start {start}")]
    Inverted {
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    },
}

/// A half-open interval `[start, end)` in UTC.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeWindow {
    /// Start of the window (inclusive).
    pub start: DateTime<Utc>,
    /// End of the window (exclusive).
    pub end: DateTime<Utc>,
}

impl TimeWindow {
    /// Creates a new time window.
    ///
    /// # Panics
    ///
    /// Panics if `start` is after `end`. Use [`TimeWindow::try_new`] for
    /// caller-supplied bounds.
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        assert!(start <= end, "TimeWindow start must be <= end");
        Self { start, end }
    }

    /// Creates a new time window, rejecting inverted bounds.
    pub fn try_new(start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Self, TimeWindowError> {
        if start > end {
            return Err(TimeWindowError::Inverted { start, end });
        }
        Ok(Self { start, end })
    }

    /// Creates a time window from a start time and duration.
    pub fn from_duration(start: DateTime<Utc>, duration: Duration) -> Self {
        Self::new(start, start + duration)
    }

    /// The default sync window: from midnight UTC today for `days` days.
    pub fn starting_today(now: DateTime<Utc>, days: i64) -> Self {
        let start = now.date_naive().and_time(NaiveTime::MIN).and_utc();
        Self::from_duration(start, Duration::days(days.max(0)))
    }

    /// Resolves optional caller bounds against the default window.
    ///
    /// A missing start defaults to midnight UTC today; a missing end defaults
    /// to `days` days after the (resolved) start.
    pub fn resolve(
        now: DateTime<Utc>,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
        days: i64,
    ) -> Result<Self, TimeWindowError> {
        let start = start.unwrap_or_else(|| Self::starting_today(now, days).start);
        let end = end.unwrap_or_else(|| start + Duration::days(days.max(0)));
        Self::try_new(start, end)
    }

    /// Returns the duration of this window.
    pub fn duration(&self) -> Duration {
        self.end - self.start
    }

    /// Checks if a datetime falls within this window.
    pub fn contains(&self, dt: DateTime<Utc>) -> bool {
        dt >= self.start && dt < self.end
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn utc(y: i32, m: u32, d: u32, h: u32, min: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, min, 0).unwrap()
    }

    #[test]
    fn window_contains_is_half_open() {
        let window = TimeWindow::new(utc(2024, 3, 15, 9, 0), utc(2024, 3, 15, 17, 0));

        assert!(window.contains(utc(2024, 3, 15, 9, 0)));
        assert!(window.contains(utc(2024, 3, 15, 12, 0)));
        assert!(!window.contains(utc(2024, 3, 15, 17, 0)));
        assert!(!window.contains(utc(2024, 3, 15, 8, 59)));
    }

    #[test]
    fn starting_today_truncates_to_midnight() {
        let window = TimeWindow::starting_today(utc(2024, 3, 15, 14, 30), 365);

        assert_eq!(window.start, utc(2024, 3, 15, 0, 0));
        assert_eq!(window.end, utc(2025, 3, 15, 0, 0));
    }

    #[test]
    fn resolve_uses_defaults() {
        let now = utc(2024, 3, 15, 14, 30);

        let window = TimeWindow::resolve(now, None, None, 7).unwrap();
        assert_eq!(window.start, utc(2024, 3, 15, 0, 0));
        assert_eq!(window.end, utc(2024, 3, 22, 0, 0));

        let window = TimeWindow::resolve(now, Some(utc(2024, 4, 1, 0, 0)), None, 7).unwrap();
        assert_eq!(window.end, utc(2024, 4, 8, 0, 0));
    }

    #[test]
    fn resolve_rejects_inverted_bounds() {
        let now = utc(2024, 3, 15, 14, 30);
        let err = TimeWindow::resolve(
            now,
            Some(utc(2024, 4, 1, 0, 0)),
            Some(utc(2024, 3, 1, 0, 0)),
            7,
        )
        .unwrap_err();

        assert!(matches!(err, TimeWindowError::Inverted { .. }));
    }

    #[test]
    #[should_panic(expected = "TimeWindow start must be <= end")]
    fn new_panics_on_inverted() {
        TimeWindow::new(utc(2024, 3, 15, 17, 0), utc(2024, 3, 15, 9, 0));
    }

    #[test]
    fn window_duration() {
        let window = TimeWindow::from_duration(utc(2024, 3, 15, 9, 0), Duration::hours(8));
        assert_eq!(window.duration(), Duration::hours(8));
    }
}
