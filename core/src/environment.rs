//! Environment dependencies injected into reducers and services.

use chrono::{DateTime, NaiveDate, Utc};

/// Clock trait - abstracts time operations for testability
///
/// Every date-driven rule (waiting-list expiry, freeze windows, pending
/// cancellations, seat-hold expiry) reads time through this trait so sweeps can
/// be tested against a controlled calendar.
///
/// # Examples
///
/// ```
/// use classbook_core::environment::{Clock, SystemClock};
///
/// let clock = SystemClock;
/// assert_eq!(clock.today(), clock.now().date_naive());
/// ```
pub trait Clock: Send + Sync {
    /// Get the current time
    fn now(&self) -> DateTime<Utc>;

    /// Get the current calendar date (UTC)
    fn today(&self) -> NaiveDate {
        self.now().date_naive()
    }
}

/// Production clock backed by the system time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}
