//! Cancellation and waiting-list removal.
//!
//! A cancellation with a future effective date becomes `request_to_cancel` and is
//! confirmed by [`PendingCancellationSweeper`] once the date arrives.

use crate::ServiceContext;
use crate::sweeper::{Sweep, SweepReport, sweep_transition};
use crate::transition::{self, Transition};
use async_trait::async_trait;
use chrono::NaiveDate;
use classbook_core::error::BookingError;
use classbook_core::lifecycle::BookingAction;
use classbook_core::model::{CancelClassification, CancelRecord};
use classbook_core::request::{BookingOrigin, BookingOutcome};
use classbook_core::status::BookingStatus;
use classbook_core::store::BookingStore;
use classbook_core::types::BookingId;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

const MODULE: &str = "cancellation";

/// Request to cancel a booking.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancelRequest {
    /// Reason code
    pub reason: String,
    /// Free-text note
    pub note: Option<String>,
    /// Membership cancellation or transfer
    pub classification: CancelClassification,
    /// Future date for a requested cancellation; `None` cancels now
    pub effective_on: Option<NaiveDate>,
}

/// Cancellation and waiting-list removal.
pub struct CancellationService<S: BookingStore> {
    ctx: Arc<ServiceContext<S>>,
}

impl<S: BookingStore> CancellationService<S> {
    pub(crate) const fn new(ctx: Arc<ServiceContext<S>>) -> Self {
        Self { ctx }
    }

    /// Cancel now, or request cancellation on a future date.
    ///
    /// Writes or replaces the booking's cancel record and pauses a recurring contract
    /// once the booking is actually cancelled.
    ///
    /// # Errors
    ///
    /// [`BookingError::Validation`] for a blank reason or the waiting-list
    /// classification; [`BookingError::InvalidTransition`] from statuses that cannot
    /// be cancelled.
    pub async fn cancel(
        &self,
        booking_id: BookingId,
        request: CancelRequest,
        origin: BookingOrigin,
    ) -> Result<BookingOutcome, BookingError> {
        if request.classification == CancelClassification::WaitingListRemove {
            return Err(BookingError::validation(
                "classification",
                "waiting-list entries are removed, not cancelled",
            ));
        }
        let record = self.record(
            booking_id,
            &request.reason,
            request.note.clone(),
            request.classification,
            request.effective_on,
        )?;
        let transition = Transition::new(
            booking_id,
            BookingAction::Cancel {
                effective_on: request.effective_on,
            },
            Some(origin),
            MODULE,
        )
        .with_cancel_record(record)
        .with_note(request.note);
        transition::apply(&self.ctx, transition)
            .await
            .map(|applied| applied.outcome())
    }

    /// Remove a waiting-list entry.
    ///
    /// # Errors
    ///
    /// [`BookingError::InvalidTransition`] unless the booking is on the waiting list.
    pub async fn remove_from_waiting_list(
        &self,
        booking_id: BookingId,
        reason: String,
        note: Option<String>,
        origin: BookingOrigin,
    ) -> Result<BookingOutcome, BookingError> {
        let record = self.record(
            booking_id,
            &reason,
            note.clone(),
            CancelClassification::WaitingListRemove,
            None,
        )?;
        let transition = Transition::new(
            booking_id,
            BookingAction::RemoveFromWaitingList,
            Some(origin),
            MODULE,
        )
        .with_cancel_record(record)
        .with_note(note);
        transition::apply(&self.ctx, transition)
            .await
            .map(|applied| applied.outcome())
    }

    fn record(
        &self,
        booking_id: BookingId,
        reason: &str,
        note: Option<String>,
        classification: CancelClassification,
        effective_on: Option<NaiveDate>,
    ) -> Result<CancelRecord, BookingError> {
        let reason = reason.trim();
        if reason.is_empty() {
            return Err(BookingError::validation("reason", "a cancellation reason is required"));
        }
        Ok(CancelRecord {
            booking_id,
            reason: reason.to_string(),
            note,
            classification,
            effective_on,
            created_at: self.ctx.clock.now(),
        })
    }
}

/// Confirms requested cancellations whose effective date has arrived.
pub struct PendingCancellationSweeper<S: BookingStore> {
    ctx: Arc<ServiceContext<S>>,
}

impl<S: BookingStore> PendingCancellationSweeper<S> {
    /// Creates a new sweeper
    #[must_use]
    pub const fn new(ctx: Arc<ServiceContext<S>>) -> Self {
        Self { ctx }
    }
}

#[async_trait]
impl<S: BookingStore> Sweep for PendingCancellationSweeper<S> {
    fn name(&self) -> &'static str {
        "pending_cancellations"
    }

    async fn run_once(&self) -> Result<SweepReport, BookingError> {
        let ctx = &*self.ctx;
        let today = ctx.clock.today();
        let mut report = SweepReport::default();

        for booking in ctx.store.bookings_by_status(BookingStatus::RequestToCancel).await? {
            report.examined += 1;
            let due = ctx
                .store
                .cancel_record(booking.id)
                .await?
                .and_then(|record| record.effective_on)
                .is_none_or(|effective_on| effective_on <= today);
            if !due {
                report.skipped += 1;
                continue;
            }
            let result =
                sweep_transition(ctx, MODULE, booking.id, BookingAction::ConfirmCancellation).await;
            report.record(self.name(), booking.id, result);
        }
        Ok(report)
    }
}
