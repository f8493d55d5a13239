//! Freeze/Reactivate engine.
//!
//! A freeze is a [`FreezeRecord`] plus date-driven flips: `active → frozen` once the
//! window starts and `frozen → active` once it ends, the second flip deleting the
//! record. A recurring contract is paused for exactly the window, so the provider
//! resumes it on its own when the freeze ends.
//!
//! With a contract, scheduling is a saga: the record is claimed in a short unit of
//! work under the booking lock, the contract is paused with no lock held, and a
//! second unit of work applies the freeze. A failed pause or apply withdraws the
//! record; a failed apply also resumes the contract.

use crate::ServiceContext;
use crate::metrics::BookingMetrics;
use crate::orchestrator::recurring_contract;
use crate::sweeper::{Sweep, SweepReport, sweep_transition};
use crate::transition::{
    self, Applied, ContractCall, Transition, execute_effects, finish, mark_contract, note_history,
    report_as, undo_contract,
};
use async_trait::async_trait;
use chrono::{Months, NaiveDate};
use classbook_core::error::BookingError;
use classbook_core::lifecycle::{BookingAction, Reducer};
use classbook_core::model::{Booking, FreezeRecord};
use classbook_core::payment::PaymentAttempt;
use classbook_core::request::{BookingOrigin, BookingOutcome};
use classbook_core::status::BookingStatus;
use classbook_core::store::{BookingStore, UnitOfWork};
use classbook_core::types::{BookingId, BookingReference, FreezeId};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::sync::Arc;

const MODULE: &str = "freeze";

/// Request to freeze a membership.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FreezeRequest {
    /// First frozen day
    pub start: NaiveDate,
    /// Length in months
    pub duration_months: u32,
    /// Why
    pub reason: Option<String>,
}

/// Freeze and reactivation.
pub struct FreezeService<S: BookingStore> {
    ctx: Arc<ServiceContext<S>>,
}

impl<S: BookingStore> FreezeService<S> {
    pub(crate) const fn new(ctx: Arc<ServiceContext<S>>) -> Self {
        Self { ctx }
    }

    /// Schedule a freeze, applying it at once if it has already started.
    ///
    /// # Errors
    ///
    /// - [`BookingError::InvalidTransition`] unless the booking is active
    /// - [`BookingError::Conflict`] when a future-dated freeze already exists
    /// - [`BookingError::Gateway`] when the contract pause is refused; the claimed record
    ///   is withdrawn and the booking is unchanged
    pub async fn freeze(
        &self,
        booking_id: BookingId,
        request: FreezeRequest,
        origin: BookingOrigin,
    ) -> Result<BookingOutcome, BookingError> {
        match self.schedule(booking_id, &request).await {
            Ok(applied) => {
                BookingMetrics::record_transition("freeze", "applied");
                tracing::info!(
                    booking_id = %booking_id,
                    freeze_start = %request.start,
                    duration_months = request.duration_months,
                    status = %applied.booking.status,
                    "Freeze scheduled"
                );
                let template = if applied.booking.status == BookingStatus::Frozen {
                    "booking_frozen"
                } else {
                    "freeze_scheduled"
                };
                report_as(&self.ctx, MODULE, "freeze", Some(template), Some(origin), &applied).await;
                Ok(applied.outcome())
            },
            Err(error) => {
                BookingMetrics::record_transition("freeze", error.reason());
                self.ctx
                    .dispatcher
                    .rejected(
                        Some(origin),
                        MODULE,
                        "freeze",
                        json!({"booking_id": booking_id, "freeze_start": request.start}),
                        &error,
                    )
                    .await;
                Err(error)
            },
        }
    }

    async fn schedule(&self, booking_id: BookingId, request: &FreezeRequest) -> Result<Applied, BookingError> {
        let ctx = &*self.ctx;
        let today = ctx.clock.today();

        if request.duration_months == 0 {
            return Err(BookingError::validation("duration_months", "must be at least one month"));
        }
        let reactivate_on = request
            .start
            .checked_add_months(Months::new(request.duration_months))
            .ok_or_else(|| BookingError::validation("duration_months", "is out of range"))?;
        if reactivate_on <= today {
            return Err(BookingError::validation("freeze_start", "freeze would already have ended"));
        }

        let booking = ctx
            .store
            .booking(booking_id)
            .await?
            .ok_or_else(|| BookingError::not_found("booking", booking_id))?;
        ensure_active(booking.status)?;

        let existing = ctx.store.freeze_records_for(booking_id).await?;
        let id = FreezeId::new();
        ensure_no_open_freeze(&booking.reference, &existing, id, today)?;

        let record = FreezeRecord {
            id,
            booking_id,
            freeze_start: request.start,
            duration_months: request.duration_months,
            reactivate_on,
            reason: request.reason.clone(),
            created_at: ctx.clock.now(),
        };

        let latest = ctx.store.latest_payment_attempt(booking_id).await?;
        let Some(contract) = recurring_contract(latest.as_ref()) else {
            let mut tx = ctx.store.begin().await?;
            let written = write_freeze(ctx, &mut tx, &record, latest.clone(), None).await;
            return finish(tx, written).await;
        };

        // Claimed under the booking lock before the provider call; a concurrent
        // freeze fails here and never pauses the contract
        let mut tx = ctx.store.begin().await?;
        let claimed = claim_window(ctx, &mut tx, &record).await;
        finish(tx, claimed).await?;

        let reply = match ctx
            .payments
            .pause_contract(contract, request.start, Some(reactivate_on))
            .await
        {
            Ok(reply) => reply,
            Err(error) => {
                self.withdraw(&record).await;
                return Err(error);
            },
        };

        let mut tx = ctx.store.begin().await?;
        let written = write_freeze(ctx, &mut tx, &record, latest.clone(), Some(reply)).await;
        let committed = finish(tx, written).await;
        if committed.is_err() {
            undo_contract(ctx, ContractCall::Pause, contract).await;
            self.withdraw(&record).await;
        }
        committed
    }

    async fn withdraw(&self, record: &FreezeRecord) {
        let withdrawn = async {
            let mut tx = self.ctx.store.begin().await?;
            let deleted = tx.delete_freeze_records(record.booking_id).await;
            finish(tx, deleted.map_err(BookingError::from)).await
        }
        .await;
        if let Err(error) = withdrawn {
            tracing::error!(
                booking_id = %record.booking_id,
                freeze_id = %record.id,
                error = %error,
                "Could not withdraw freeze record; the sweeper will apply it"
            );
        }
    }

    /// Reactivate a frozen, cancelled or cancellation-requested booking.
    ///
    /// A cancelled booking takes its seat back; a recurring contract is resumed.
    ///
    /// # Errors
    ///
    /// [`BookingError::InvalidTransition`] from other statuses;
    /// [`BookingError::CapacityExceeded`] when a cancelled booking's session is full.
    pub async fn reactivate(
        &self,
        booking_id: BookingId,
        note: Option<String>,
        origin: BookingOrigin,
    ) -> Result<BookingOutcome, BookingError> {
        let transition = Transition::new(booking_id, BookingAction::Reactivate, Some(origin), MODULE)
            .with_note(note);
        transition::apply(&self.ctx, transition)
            .await
            .map(|applied| applied.outcome())
    }
}

fn ensure_active(status: BookingStatus) -> Result<(), BookingError> {
    if status == BookingStatus::Active {
        Ok(())
    } else {
        Err(BookingError::InvalidTransition {
            from: status,
            action: "freeze",
        })
    }
}

/// At most one freeze per booking may still be running or upcoming; `claimed` is
/// the caller's own record.
fn ensure_no_open_freeze(
    reference: &BookingReference,
    records: &[FreezeRecord],
    claimed: FreezeId,
    today: NaiveDate,
) -> Result<(), BookingError> {
    match records
        .iter()
        .find(|record| record.id != claimed && record.reactivate_on > today)
    {
        Some(open) => Err(BookingError::Conflict(format!(
            "Booking {reference} already has a freeze until {}",
            open.reactivate_on
        ))),
        None => Ok(()),
    }
}

/// Lock the booking and re-check it may take `record`. Returns the booking and
/// whether `record` is already stored.
async fn lock_window<S: BookingStore>(
    ctx: &ServiceContext<S>,
    tx: &mut S::Tx,
    record: &FreezeRecord,
) -> Result<(Booking, bool), BookingError> {
    let booking = tx.lock_booking(record.booking_id).await?;
    let existing = tx.freeze_records_for(record.booking_id).await?;
    let claimed = existing.iter().any(|stored| stored.id == record.id);
    // The sweeper may start a claimed window before the caller finishes
    if !(claimed && booking.status == BookingStatus::Frozen) {
        ensure_active(booking.status)?;
    }
    ensure_no_open_freeze(&booking.reference, &existing, record.id, ctx.clock.today())?;
    Ok((booking, claimed))
}

async fn claim_window<S: BookingStore>(
    ctx: &ServiceContext<S>,
    tx: &mut S::Tx,
    record: &FreezeRecord,
) -> Result<(), BookingError> {
    let (_, claimed) = lock_window(ctx, tx, record).await?;
    if !claimed {
        tx.insert_freeze_record(record).await?;
    }
    Ok(())
}

async fn write_freeze<S: BookingStore>(
    ctx: &ServiceContext<S>,
    tx: &mut S::Tx,
    record: &FreezeRecord,
    latest: Option<PaymentAttempt>,
    contract: Option<Value>,
) -> Result<Applied, BookingError> {
    let (mut booking, claimed) = lock_window(ctx, tx, record).await?;
    let previous = booking.status;
    if !claimed {
        tx.insert_freeze_record(record).await?;
    }
    if record.freeze_start <= ctx.clock.today() && booking.status == BookingStatus::Active {
        let action = BookingAction::StartFreeze {
            freeze_start: record.freeze_start,
        };
        let effects = ctx.reducer.reduce(&mut booking, action, &ctx.env)?;
        execute_effects(tx, booking.id, &effects, None).await?;
        tx.update_booking(&booking).await?;
    }

    let payment_status = match latest {
        Some(mut attempt) => {
            let mut entry = json!({
                "action": "freeze",
                "from": previous.as_str(),
                "to": booking.status.as_str(),
                "freeze_start": record.freeze_start,
                "reactivate_on": record.reactivate_on,
                "at": ctx.clock.now(),
            });
            if let Some(reply) = contract {
                entry["contract"] = reply;
                mark_contract(&mut attempt, ContractCall::Pause);
            }
            note_history(&mut attempt, entry, ctx.clock.now());
            tx.update_payment_attempt(&attempt).await?;
            Some(attempt.status)
        },
        None => None,
    };

    Ok(Applied {
        booking,
        previous,
        payment_status,
    })
}

/// Applies freeze windows as their dates arrive.
pub struct FreezeSweeper<S: BookingStore> {
    ctx: Arc<ServiceContext<S>>,
}

impl<S: BookingStore> FreezeSweeper<S> {
    /// Creates a new sweeper
    #[must_use]
    pub const fn new(ctx: Arc<ServiceContext<S>>) -> Self {
        Self { ctx }
    }

    async fn drop_stale(&self, booking_id: BookingId) -> Result<u64, BookingError> {
        let mut tx = self.ctx.store.begin().await?;
        let deleted = tx.delete_freeze_records(booking_id).await;
        finish(tx, deleted.map_err(BookingError::from)).await
    }
}

#[async_trait]
impl<S: BookingStore> Sweep for FreezeSweeper<S> {
    fn name(&self) -> &'static str {
        "freeze"
    }

    async fn run_once(&self) -> Result<SweepReport, BookingError> {
        let ctx = &*self.ctx;
        let today = ctx.clock.today();
        let records = ctx.store.freeze_records().await?;
        let mut report = SweepReport::default();

        for record in &records {
            report.examined += 1;
            let Some(booking) = ctx.store.booking(record.booking_id).await? else {
                report.skipped += 1;
                continue;
            };

            let started = record.freeze_start <= today;
            let ended = record.reactivate_on <= today;
            let action = match booking.status {
                BookingStatus::Active if started && !ended => BookingAction::StartFreeze {
                    freeze_start: record.freeze_start,
                },
                BookingStatus::Frozen if ended => BookingAction::EndFreeze {
                    reactivate_on: record.reactivate_on,
                },
                BookingStatus::Active if ended => {
                    // Window passed while the booking was not frozen
                    let pending = records
                        .iter()
                        .any(|other| other.booking_id == booking.id && other.reactivate_on > today);
                    if pending {
                        report.skipped += 1;
                    } else {
                        match self.drop_stale(booking.id).await {
                            Ok(_) => report.transitioned += 1,
                            Err(error) => {
                                report.failed += 1;
                                tracing::warn!(booking_id = %booking.id, error = %error, "Could not delete stale freeze record");
                            },
                        }
                    }
                    continue;
                },
                _ => {
                    report.skipped += 1;
                    continue;
                },
            };

            let result = sweep_transition(ctx, MODULE, booking.id, action).await;
            report.record(self.name(), booking.id, result);
        }
        Ok(report)
    }
}
