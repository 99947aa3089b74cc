use chrono::{DateTime, Local, NaiveDate, Utc};
use parking_lot::Mutex;

/// Source of "now" for the aggregator and the upload scheduler.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;

    /// Calendar day an instant falls on, used as the aggregation bucket.
    fn day_of(&self, at: DateTime<Utc>) -> NaiveDate {
        at.with_timezone(&Local).date_naive()
    }

    fn today(&self) -> NaiveDate {
        self.day_of(self.now())
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Settable clock. Days are taken from the UTC date so results do not depend
/// on the host timezone.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self { now: Mutex::new(now) }
    }

    /// Noon UTC on the given day.
    pub fn at_day(day: NaiveDate) -> Self {
        Self::new(noon(day))
    }

    pub fn set(&self, now: DateTime<Utc>) {
        *self.now.lock() = now;
    }

    pub fn set_day(&self, day: NaiveDate) {
        self.set(noon(day));
    }

    pub fn advance(&self, by: chrono::Duration) {
        let mut guard = self.now.lock();
        *guard += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock()
    }

    fn day_of(&self, at: DateTime<Utc>) -> NaiveDate {
        at.date_naive()
    }
}

fn noon(day: NaiveDate) -> DateTime<Utc> {
    day.and_hms_opt(12, 0, 0)
        .map(|dt| dt.and_utc())
        .unwrap_or_default()
}
