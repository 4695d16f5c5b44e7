//! Calendar source for sequence scoping.
//!
//! Order and invoice sequences restart every calendar day, so "today" is
//! injected rather than read from a global. Production uses the local
//! calendar of the host; tests pin the date to cross day boundaries.

use chrono::{DateTime, Local, NaiveDate, TimeZone, Utc};
use std::sync::Mutex;

pub trait Clock: Send + Sync {
    /// Current instant, used for `created_at` / `paid_at` stamps.
    fn now(&self) -> DateTime<Utc>;

    /// Calendar day used to scope daily sequences and invoice dates.
    fn today(&self) -> NaiveDate;
}

/// Host clock. Days roll over at local midnight, which is what admins see
/// on printed invoices.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    fn today(&self) -> NaiveDate {
        Local::now().date_naive()
    }
}

/// Clock pinned to a settable instant.
#[derive(Debug)]
pub struct FixedClock {
    at: Mutex<DateTime<Utc>>,
}

impl FixedClock {
    pub fn new(at: DateTime<Utc>) -> Self {
        Self { at: Mutex::new(at) }
    }

    /// Clock pinned to noon UTC of the given day.
    ///
    /// # Panics
    ///
    /// Panics if the arguments are not a valid calendar date.
    pub fn on(year: i32, month: u32, day: u32) -> Self {
        let at = Utc
            .with_ymd_and_hms(year, month, day, 12, 0, 0)
            .single()
            .expect("FixedClock::on needs a valid calendar date");
        Self::new(at)
    }

    pub fn advance_days(&self, days: i64) {
        if let Ok(mut guard) = self.at.lock() {
            *guard += chrono::Duration::days(days);
        }
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.at.lock().map(|g| *g).unwrap_or_else(|p| *p.into_inner())
    }

    fn today(&self) -> NaiveDate {
        self.now().date_naive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixed_clock_advances_across_days() {
        let clock = FixedClock::on(2025, 9, 16);
        assert_eq!(clock.today(), NaiveDate::from_ymd_opt(2025, 9, 16).unwrap());
        clock.advance_days(1);
        assert_eq!(clock.today(), NaiveDate::from_ymd_opt(2025, 9, 17).unwrap());
    }

    #[test]
    #[should_panic(expected = "valid calendar date")]
    fn test_fixed_clock_rejects_impossible_date() {
        FixedClock::on(2025, 2, 30);
    }
}
