//! # Classbook Testing
//!
//! Testing utilities for the booking core and runtime.
//!
//! This crate provides:
//! - Deterministic clocks ([`FixedClock`], [`ManualClock`])
//! - [`InMemoryStore`], an in-memory [`BookingStore`](classbook_core::store::BookingStore)
//!   whose units of work serialize like row locks and roll back on drop
//! - Scriptable provider API mocks for the three gateway families
//! - Recording collaborators (notifications, templates, email, audit)
//! - Fixtures, proptest strategies and the [`ReducerTest`] Given-When-Then builder
//!
//! ## Example
//!
//! ```
//! use classbook_testing::{InMemoryStore, fixtures};
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() {
//!     let store = InMemoryStore::new();
//!     let session = store.seed_session(fixtures::session(5)).await;
//!     assert_eq!(store.capacity(session).await, Some(5));
//! }
//! ```

pub mod collaborators;
pub mod fixtures;
pub mod providers;
pub mod reducer_test;
pub mod store;

use chrono::{DateTime, Duration, Utc};
use classbook_core::environment::Clock;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Mock implementations of Environment traits
pub mod mocks {
    use super::{Arc, Clock, DateTime, Duration, Mutex, Utc, lock};

    /// Fixed clock for deterministic tests
    ///
    /// Always returns the same time, making tests reproducible.
    ///
    /// # Example
    ///
    /// ```
    /// use classbook_testing::mocks::FixedClock;
    /// use classbook_core::environment::Clock;
    /// use chrono::Utc;
    ///
    /// let clock = FixedClock::new(Utc::now());
    /// let time1 = clock.now();
    /// let time2 = clock.now();
    /// assert_eq!(time1, time2); // Always the same!
    /// ```
    #[derive(Debug, Clone)]
    pub struct FixedClock {
        time: DateTime<Utc>,
    }

    impl FixedClock {
        /// Create a new fixed clock with the given time
        #[must_use]
        pub const fn new(time: DateTime<Utc>) -> Self {
            Self { time }
        }
    }

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            self.time
        }
    }

    /// Create a default fixed clock for tests (2025-01-01 00:00:00 UTC)
    ///
    /// # Panics
    ///
    /// This function will panic if the hardcoded timestamp fails to parse,
    /// which should never happen in practice.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn test_clock() -> FixedClock {
        FixedClock::new(
            DateTime::parse_from_rfc3339("2025-01-01T00:00:00Z")
                .expect("hardcoded timestamp should always parse")
                .with_timezone(&Utc),
        )
    }

    /// Clock that tests move forward explicitly, for date-driven sweeps.
    ///
    /// Clones share the same time.
    #[derive(Debug, Clone)]
    pub struct ManualClock {
        time: Arc<Mutex<DateTime<Utc>>>,
    }

    impl ManualClock {
        /// Start at `time`
        #[must_use]
        pub fn new(time: DateTime<Utc>) -> Self {
            Self {
                time: Arc::new(Mutex::new(time)),
            }
        }

        /// Start at the same instant as [`test_clock`]
        #[must_use]
        pub fn starting_at_test_epoch() -> Self {
            Self::new(test_clock().now())
        }

        /// Move forward by whole days
        pub fn advance_days(&self, days: i64) {
            let mut time = lock(&self.time);
            *time += Duration::days(days);
        }

        /// Move forward by a duration
        pub fn advance(&self, by: Duration) {
            let mut time = lock(&self.time);
            *time += by;
        }

        /// Jump to an instant
        pub fn set(&self, to: DateTime<Utc>) {
            *lock(&self.time) = to;
        }
    }

    impl Clock for ManualClock {
        fn now(&self) -> DateTime<Utc> {
            *lock(&self.time)
        }
    }
}

/// Property-based testing utilities using proptest.
pub mod properties {
    use chrono::NaiveDate;
    use classbook_core::lifecycle::BookingAction;
    use classbook_core::status::BookingStatus;
    use classbook_core::types::{ClassSessionId, PlanId};
    use proptest::prelude::*;

    /// Any booking status.
    pub fn any_status() -> impl Strategy<Value = BookingStatus> {
        prop::sample::select(BookingStatus::ALL.to_vec())
    }

    /// A date within a few months of the test epoch.
    pub fn near_date() -> impl Strategy<Value = NaiveDate> {
        (0_u64..180).prop_map(|offset| {
            NaiveDate::from_ymd_opt(2024, 11, 1)
                .and_then(|base| base.checked_add_days(chrono::Days::new(offset)))
                .unwrap_or_default()
        })
    }

    /// Any lifecycle action. `session` is used for same-session rebooks.
    pub fn any_action(session: ClassSessionId) -> impl Strategy<Value = BookingAction> {
        prop_oneof![
            Just(BookingAction::Promote),
            Just(BookingAction::MoveToWaitingList),
            Just(BookingAction::Expire),
            near_date().prop_map(|freeze_start| BookingAction::StartFreeze { freeze_start }),
            near_date().prop_map(|reactivate_on| BookingAction::EndFreeze { reactivate_on }),
            Just(BookingAction::Reactivate),
            proptest::option::of(near_date())
                .prop_map(|effective_on| BookingAction::Cancel { effective_on }),
            Just(BookingAction::ConfirmCancellation),
            Just(BookingAction::RemoveFromWaitingList),
            (any::<bool>(), near_date()).prop_map(move |(same, date)| BookingAction::Rebook {
                class_session_id: if same { session } else { ClassSessionId::new() },
                date,
            }),
            any::<bool>().prop_map(|attended| BookingAction::MarkAttendance { attended }),
            Just(BookingAction::ConvertToMembership { plan_id: PlanId::new() }),
        ]
    }
}

/// Install a test-friendly tracing subscriber once per process.
///
/// Honors `RUST_LOG`; repeated calls are ignored.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Lock a std mutex, recovering the data if a panicking test poisoned it.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// Re-export commonly used items
pub use collaborators::{InMemoryTemplates, RecordingAuditLog, RecordingMailer, RecordingNotifier};
pub use mocks::{FixedClock, ManualClock, test_clock};
pub use providers::{MockBankTransferApi, MockCardAcquirer, MockDirectDebitApi};
pub use reducer_test::ReducerTest;
pub use store::InMemoryStore;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixed_clock() {
        let clock = test_clock();
        let time1 = clock.now();
        let time2 = clock.now();
        assert_eq!(time1, time2);
    }

    #[test]
    fn manual_clock_clones_share_time() {
        let clock = ManualClock::starting_at_test_epoch();
        let view = clock.clone();
        clock.advance_days(3);
        assert_eq!(view.today().to_string(), "2025-01-04");
    }
}
