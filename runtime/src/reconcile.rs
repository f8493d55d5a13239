//! Out-of-band payment reconciliation.
//!
//! Providers confirm asynchronous payments later (a bank transfer settling, a
//! contract activating). The late payload is normalized by the adapter that made the
//! attempt and the attempt is updated in place. Booking status never changes here.

use crate::ServiceContext;
use crate::transition::{Applied, finish, note_history, report_as};
use classbook_core::error::BookingError;
use classbook_core::payment::PaymentStatus;
use classbook_core::request::OperationStatus;
use classbook_core::store::{BookingStore, UnitOfWork};
use classbook_core::types::{AttemptId, BookingId};
use serde_json::{Value, json};
use std::sync::Arc;

/// What a reconciliation did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconcileOutcome {
    /// Attempt matched by provider reference
    pub attempt_id: AttemptId,
    /// Booking the attempt belongs to, if any
    pub booking_id: Option<BookingId>,
    /// Status before
    pub previous: PaymentStatus,
    /// Status after
    pub current: PaymentStatus,
    /// Applied or no-op
    pub status: OperationStatus,
}

/// Applies late provider confirmations.
pub struct Reconciler<S: BookingStore> {
    ctx: Arc<ServiceContext<S>>,
}

impl<S: BookingStore> Reconciler<S> {
    pub(crate) const fn new(ctx: Arc<ServiceContext<S>>) -> Self {
        Self { ctx }
    }

    /// Update the attempt identified by `provider_reference` from a provider payload.
    ///
    /// A settled attempt is never moved back to `pending`.
    ///
    /// # Errors
    ///
    /// [`BookingError::NotFound`] for an unknown reference.
    pub async fn reconcile(
        &self,
        provider_reference: &str,
        raw: Value,
    ) -> Result<ReconcileOutcome, BookingError> {
        let ctx = &*self.ctx;
        let mut attempt = ctx
            .store
            .payment_attempt_by_reference(provider_reference)
            .await?
            .ok_or_else(|| BookingError::not_found("payment attempt", provider_reference))?;

        let previous = attempt.status;
        let current = ctx.payments.normalize(attempt.gateway, &raw)?;
        let mut outcome = ReconcileOutcome {
            attempt_id: attempt.id,
            booking_id: attempt.booking_id,
            previous,
            current: previous,
            status: OperationStatus::NoOp,
        };

        if current == previous || (previous.is_settled() && current == PaymentStatus::Pending) {
            tracing::debug!(
                attempt_id = %attempt.id,
                status = %previous,
                reported = %current,
                "Reconciliation changes nothing"
            );
            return Ok(outcome);
        }

        let now = ctx.clock.now();
        attempt.status = current;
        attempt.raw_response = raw;
        attempt.failure_reason = (current == PaymentStatus::Failed).then(|| "declined".to_string());
        note_history(
            &mut attempt,
            json!({
                "action": "reconcile",
                "from": previous.as_str(),
                "to": current.as_str(),
                "at": now,
            }),
            now,
        );
        attempt.metadata["reconciled_at"] = json!(now);

        let mut tx = ctx.store.begin().await?;
        let written = tx.update_payment_attempt(&attempt).await.map_err(BookingError::from);
        finish(tx, written).await?;

        tracing::info!(
            attempt_id = %attempt.id,
            gateway = attempt.gateway.as_str(),
            from = %previous,
            to = %current,
            "Payment reconciled"
        );
        outcome.current = current;
        outcome.status = OperationStatus::Applied;

        if let Some(booking_id) = attempt.booking_id {
            match ctx.store.booking(booking_id).await {
                Ok(Some(booking)) => {
                    let applied = Applied {
                        previous: booking.status,
                        booking,
                        payment_status: Some(current),
                    };
                    let template = (current == PaymentStatus::Failed).then_some("payment_failed");
                    report_as(ctx, "payment", "reconcile", template, None, &applied).await;
                },
                Ok(None) => {},
                Err(error) => {
                    tracing::warn!(booking_id = %booking_id, error = %error, "Could not load booking to report reconciliation");
                },
            }
        }
        Ok(outcome)
    }
}
