use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveDateTime, Utc};
use chrono_tz::Tz;

/// Monday on or before `reference`.
pub fn week_start(reference: NaiveDate) -> NaiveDate {
    reference - Duration::days(i64::from(reference.weekday().num_days_from_monday()))
}

/// First day of `reference`'s month.
pub fn month_start(reference: NaiveDate) -> NaiveDate {
    reference - Duration::days(i64::from(reference.day0()))
}

/// Trailing `days`-long window ending on `end`, inclusive on both sides.
pub fn trend_window(end: NaiveDate, days: u32) -> (NaiveDate, NaiveDate) {
    let span = i64::from(days.max(1)) - 1;
    (end - Duration::days(span), end)
}

/// Source of "now" for every date computation in the process.
///
/// A pinned clock always reports the same local time; used to backfill a
/// report for an earlier date.
#[derive(Debug, Clone, Copy)]
pub struct ReportClock {
    tz: Tz,
    pinned: Option<NaiveDateTime>,
}

impl ReportClock {
    pub fn new(tz: Tz) -> Self {
        Self { tz, pinned: None }
    }

    pub fn pinned(tz: Tz, at: NaiveDateTime) -> Self {
        Self {
            tz,
            pinned: Some(at),
        }
    }

    pub fn timezone(&self) -> Tz {
        self.tz
    }

    pub fn now(&self) -> NaiveDateTime {
        self.pinned.unwrap_or_else(|| self.local(Utc::now()))
    }

    pub fn today(&self) -> NaiveDate {
        self.now().date()
    }

    pub fn local(&self, instant: DateTime<Utc>) -> NaiveDateTime {
        instant.with_timezone(&self.tz).naive_local()
    }
}
