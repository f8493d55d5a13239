//! Date-driven background passes.
//!
//! A sweep reads candidates without locks and pushes each one through the normal
//! transition path, so the locked re-check inside the unit of work decides. Rows that
//! no longer qualify are skipped; running a sweep twice never fires side effects twice.

use crate::cancellation::PendingCancellationSweeper;
use crate::freeze::FreezeSweeper;
use crate::scheduler::SweepSchedule;
use crate::seats;
use crate::transition::{self, Transition};
use crate::ServiceContext;
use async_trait::async_trait;
use classbook_core::error::BookingError;
use classbook_core::lifecycle::BookingAction;
use classbook_core::status::BookingStatus;
use classbook_core::store::BookingStore;
use classbook_core::types::BookingId;
use std::sync::Arc;
use std::time::Duration;

/// One periodic pass.
#[async_trait]
pub trait Sweep: Send + Sync {
    /// Stable name used in logs and metrics
    fn name(&self) -> &'static str;

    /// Run one pass over every candidate.
    ///
    /// # Errors
    ///
    /// Only when the candidates cannot be loaded; per-row failures are counted in
    /// the report.
    async fn run_once(&self) -> Result<SweepReport, BookingError>;
}

/// Counts from one pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Candidates looked at
    pub examined: usize,
    /// Candidates changed
    pub transitioned: usize,
    /// Candidates that no longer qualified
    pub skipped: usize,
    /// Candidates that failed and will be retried next pass
    pub failed: usize,
}

impl SweepReport {
    /// Count the result of one transition attempt.
    pub(crate) fn record(&mut self, sweep: &'static str, booking_id: BookingId, result: Result<(), BookingError>) {
        match result {
            Ok(()) => self.transitioned += 1,
            Err(
                BookingError::InvalidTransition { .. }
                | BookingError::Validation { .. }
                | BookingError::NotFound { .. },
            ) => self.skipped += 1,
            Err(error) => {
                self.failed += 1;
                tracing::warn!(sweep, booking_id = %booking_id, error = %error, "Sweep transition failed");
            },
        }
    }
}

/// Apply `action` on behalf of a sweep.
pub(crate) async fn sweep_transition<S: BookingStore>(
    ctx: &ServiceContext<S>,
    module: &'static str,
    booking_id: BookingId,
    action: BookingAction,
) -> Result<(), BookingError> {
    transition::apply(ctx, Transition::new(booking_id, action, None, module))
        .await
        .map(|_| ())
}

/// Expires waiting-list entries whose start date has passed.
pub struct WaitingListSweeper<S: BookingStore> {
    ctx: Arc<ServiceContext<S>>,
}

impl<S: BookingStore> WaitingListSweeper<S> {
    /// Creates a new sweeper
    #[must_use]
    pub const fn new(ctx: Arc<ServiceContext<S>>) -> Self {
        Self { ctx }
    }
}

#[async_trait]
impl<S: BookingStore> Sweep for WaitingListSweeper<S> {
    fn name(&self) -> &'static str {
        "waiting_list"
    }

    async fn run_once(&self) -> Result<SweepReport, BookingError> {
        let ctx = &*self.ctx;
        let today = ctx.clock.today();
        let mut report = SweepReport::default();

        for booking in ctx.store.bookings_by_status(BookingStatus::WaitingList).await? {
            report.examined += 1;
            if booking.start_date >= today {
                report.skipped += 1;
                continue;
            }
            let result = sweep_transition(ctx, "booking", booking.id, BookingAction::Expire).await;
            report.record(self.name(), booking.id, result);
        }
        Ok(report)
    }
}

/// Returns seats from holds whose saga never finished.
pub struct StaleHoldReaper<S: BookingStore> {
    ctx: Arc<ServiceContext<S>>,
}

impl<S: BookingStore> StaleHoldReaper<S> {
    /// Creates a new reaper
    #[must_use]
    pub const fn new(ctx: Arc<ServiceContext<S>>) -> Self {
        Self { ctx }
    }
}

#[async_trait]
impl<S: BookingStore> Sweep for StaleHoldReaper<S> {
    fn name(&self) -> &'static str {
        "stale_holds"
    }

    async fn run_once(&self) -> Result<SweepReport, BookingError> {
        let ctx = &*self.ctx;
        let mut report = SweepReport::default();

        for hold in ctx.store.expired_seat_holds(ctx.clock.now()).await? {
            report.examined += 1;
            match seats::release_now(ctx, hold.id).await {
                Ok(true) => {
                    report.transitioned += 1;
                    tracing::warn!(
                        hold_id = %hold.id,
                        class_session_id = %hold.class_session_id,
                        seats = hold.seats,
                        "Released stale seat hold"
                    );
                },
                Ok(false) => report.skipped += 1,
                Err(error) => {
                    report.failed += 1;
                    tracing::warn!(hold_id = %hold.id, error = %error, "Could not release stale seat hold");
                },
            }
        }
        Ok(report)
    }
}

/// Every sweep paired with its interval.
pub(crate) fn all<S: BookingStore>(
    ctx: &Arc<ServiceContext<S>>,
    schedule: &SweepSchedule,
) -> Vec<(Arc<dyn Sweep>, Duration)> {
    vec![
        (
            Arc::new(WaitingListSweeper::new(Arc::clone(ctx))) as Arc<dyn Sweep>,
            schedule.waiting_list,
        ),
        (Arc::new(FreezeSweeper::new(Arc::clone(ctx))), schedule.freeze),
        (
            Arc::new(PendingCancellationSweeper::new(Arc::clone(ctx))),
            schedule.pending_cancellations,
        ),
        (Arc::new(StaleHoldReaper::new(Arc::clone(ctx))), schedule.stale_holds),
    ]
}
