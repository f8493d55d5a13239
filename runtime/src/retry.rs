//! Payment retries.
//!
//! A retry re-runs the gateway sequence for the booking's latest attempt and
//! overwrites that attempt in place. It never creates a booking, participants or a
//! second attempt, and a settled attempt is left alone.
//!
//! When the attempt belongs to a paid promotion or conversion that failed, the
//! parked action is charged against its own plan and, once paid, applied in the
//! same unit of work as the attempt update. Seats it needs are held before the
//! provider is called, as in placement.

use crate::ServiceContext;
use crate::booking::{
    AttemptWrite, PENDING_ACTION, abandon_hold, charge_request, finalize, parked_action,
    record_failure, reservation, salvage, unexplained_failure,
};
use crate::dispatch::template_for;
use crate::metrics::BookingMetrics;
use crate::seats;
use crate::transition::{Applied, finish, note_history, report_as};
use classbook_core::error::BookingError;
use classbook_core::lifecycle::{BookingAction, Reducer};
use classbook_core::payment::{PayerDetails, PaymentIntent};
use classbook_core::request::{BookingOrigin, BookingOutcome, OperationStatus};
use classbook_core::store::{BookingStore, UnitOfWork};
use classbook_core::types::BookingId;
use serde_json::json;
use std::sync::Arc;

const MODULE: &str = "payment";
const ACTION: &str = "retry_payment";

/// Retries failed or unsettled payments.
pub struct RetryController<S: BookingStore> {
    ctx: Arc<ServiceContext<S>>,
}

impl<S: BookingStore> RetryController<S> {
    pub(crate) const fn new(ctx: Arc<ServiceContext<S>>) -> Self {
        Self { ctx }
    }

    /// Retry the booking's latest payment with new payer details.
    ///
    /// Returns [`OperationStatus::NoOp`] when the latest attempt is already paid or
    /// its contract active.
    ///
    /// # Errors
    ///
    /// [`BookingError::NotFound`] when the booking has no attempt; the gateway error
    /// when the retry fails again (the attempt is still updated).
    pub async fn retry_payment(
        &self,
        booking_id: BookingId,
        payer: PayerDetails,
        origin: BookingOrigin,
    ) -> Result<BookingOutcome, BookingError> {
        match self.retry(booking_id, payer, origin).await {
            Ok(outcome) => {
                let label = match outcome.status {
                    OperationStatus::Applied => "applied",
                    OperationStatus::NoOp => "noop",
                };
                BookingMetrics::record_transition(ACTION, label);
                Ok(outcome)
            },
            Err(error) => {
                BookingMetrics::record_transition(ACTION, error.reason());
                self.ctx
                    .dispatcher
                    .rejected(Some(origin), MODULE, ACTION, json!({"booking_id": booking_id}), &error)
                    .await;
                Err(error)
            },
        }
    }

    async fn retry(
        &self,
        booking_id: BookingId,
        payer: PayerDetails,
        origin: BookingOrigin,
    ) -> Result<BookingOutcome, BookingError> {
        let ctx = &*self.ctx;
        payer.validate()?;

        let booking = ctx
            .store
            .booking(booking_id)
            .await?
            .ok_or_else(|| BookingError::not_found("booking", booking_id))?;
        let mut attempt = ctx
            .store
            .latest_payment_attempt(booking_id)
            .await?
            .ok_or_else(|| BookingError::not_found("payment attempt", booking_id))?;

        if attempt.status.is_settled() {
            tracing::info!(
                booking_id = %booking_id,
                attempt_id = %attempt.id,
                status = %attempt.status,
                "Latest payment already settled; nothing to retry"
            );
            return Ok(BookingOutcome {
                status: OperationStatus::NoOp,
                booking_id,
                booking_status: booking.status,
                payment_status: Some(attempt.status),
            });
        }

        let parked = parked_action(&attempt)?;
        let mut target = booking.clone();
        let reserve = match &parked {
            Some(action) => {
                let planned = ctx.reducer.reduce(&mut target, action.clone(), &ctx.env)?;
                reservation(&planned)
            },
            None => None,
        };

        let session = ctx
            .store
            .class_session(target.class_session_id)
            .await?
            .ok_or_else(|| BookingError::not_found("class session", target.class_session_id))?;
        let plan = match target.payment_plan_id {
            Some(plan_id) => ctx.store.payment_plan(plan_id).await?,
            None => None,
        };
        let intent = PaymentIntent {
            payer,
            amount: Some(attempt.amount),
        };
        let charge = charge_request(ctx, &target, &session.name, &intent, plan.as_ref())?;

        let hold = match reserve {
            Some((class_session_id, seats)) => Some(seats::hold(ctx, class_session_id, seats).await?),
            None => None,
        };
        let run = match ctx.payments.execute(&charge).await {
            Ok(run) => run,
            Err(error) => {
                if let Some(hold) = &hold {
                    abandon_hold(ctx, hold).await;
                }
                return Err(error);
            },
        };

        let now = ctx.clock.now();
        let previous = attempt.status;
        run.apply_to(&mut attempt, now);
        let retry = attempt.retry_count;
        note_history(
            &mut attempt,
            json!({
                "action": ACTION,
                "from": previous.as_str(),
                "to": run.status.as_str(),
                "retry": retry,
                "at": now,
            }),
            now,
        );

        if !run.succeeded() {
            let mut tx = ctx.store.begin().await?;
            let written = record_failure(&mut tx, hold.as_ref(), &attempt, AttemptWrite::Update).await;
            finish(tx, written).await?;
            tracing::info!(
                booking_id = %booking_id,
                attempt_id = %attempt.id,
                retry,
                status = %attempt.status,
                "Payment retry failed"
            );
            return Err(run.error.unwrap_or_else(unexplained_failure));
        }

        let applied = match &parked {
            None => {
                let mut tx = ctx.store.begin().await?;
                let written = tx.update_payment_attempt(&attempt).await.map_err(BookingError::from);
                finish(tx, written).await?;
                Applied {
                    previous: booking.status,
                    booking,
                    payment_status: Some(attempt.status),
                }
            },
            Some(action) => {
                if let Some(fields) = attempt.metadata.as_object_mut() {
                    fields.remove(PENDING_ACTION);
                }
                let mut tx = ctx.store.begin().await?;
                let written = finalize(
                    ctx,
                    &mut tx,
                    booking_id,
                    action,
                    hold.as_ref(),
                    &attempt,
                    AttemptWrite::Update,
                )
                .await;
                match finish(tx, written).await {
                    Ok(applied) => applied,
                    Err(error) => {
                        salvage(ctx, hold.as_ref(), attempt, &error, AttemptWrite::Update).await;
                        return Err(error);
                    },
                }
            },
        };

        tracing::info!(
            booking_id = %booking_id,
            attempt_id = %attempt.id,
            retry,
            status = %attempt.status,
            applied = parked.as_ref().map(BookingAction::name),
            booking_status = %applied.booking.status,
            "Payment retried"
        );
        let template = parked
            .as_ref()
            .and_then(|action| template_for(action, applied.booking.status));
        report_as(ctx, MODULE, ACTION, template, Some(origin), &applied).await;
        Ok(applied.outcome())
    }
}
