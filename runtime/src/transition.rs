//! Shared execution path for lifecycle actions on existing bookings.
//!
//! 1. Dry-run the reducer on an unlocked copy to reject invalid actions with no side effects
//! 2. Fail fast on a full target session
//! 3. Pause or resume a recurring contract (remote, no lock held)
//! 4. Re-run the reducer on the locked row and execute its effects in one unit of work
//! 5. Undo the contract call if the unit of work fails; dispatch if it commits

use crate::ServiceContext;
use crate::accounts::primary_parent;
use crate::dispatch::{Notice, template_for};
use crate::metrics::BookingMetrics;
use crate::orchestrator::recurring_contract;
use crate::seats;
use chrono::{DateTime, Utc};
use classbook_core::error::BookingError;
use classbook_core::lifecycle::{BookingAction, BookingEffect, Reducer};
use classbook_core::model::{Booking, CancelRecord, SeatHold};
use classbook_core::payment::{PaymentAttempt, PaymentStatus};
use classbook_core::request::{BookingOrigin, BookingOutcome, OperationStatus};
use classbook_core::status::BookingStatus;
use classbook_core::store::{BookingStore, UnitOfWork};
use classbook_core::types::BookingId;
use serde_json::{Value, json};

pub(crate) struct Transition {
    pub booking_id: BookingId,
    pub action: BookingAction,
    pub origin: Option<BookingOrigin>,
    pub module: &'static str,
    pub cancel_record: Option<CancelRecord>,
    pub note: Option<String>,
}

impl Transition {
    pub(crate) const fn new(
        booking_id: BookingId,
        action: BookingAction,
        origin: Option<BookingOrigin>,
        module: &'static str,
    ) -> Self {
        Self {
            booking_id,
            action,
            origin,
            module,
            cancel_record: None,
            note: None,
        }
    }

    pub(crate) fn with_cancel_record(mut self, record: CancelRecord) -> Self {
        self.cancel_record = Some(record);
        self
    }

    pub(crate) fn with_note(mut self, note: Option<String>) -> Self {
        self.note = note;
        self
    }
}

pub(crate) struct Applied {
    pub booking: Booking,
    pub previous: BookingStatus,
    pub payment_status: Option<PaymentStatus>,
}

impl Applied {
    pub(crate) fn outcome(&self) -> BookingOutcome {
        BookingOutcome {
            status: OperationStatus::Applied,
            booking_id: self.booking.id,
            booking_status: self.booking.status,
            payment_status: self.payment_status,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ContractCall {
    Pause,
    Resume,
}

impl ContractCall {
    fn from_effects(effects: &[BookingEffect]) -> Option<Self> {
        effects.iter().find_map(|effect| match effect {
            BookingEffect::SuspendContract => Some(Self::Pause),
            BookingEffect::ResumeContract => Some(Self::Resume),
            _ => None,
        })
    }

    const fn reversed(self) -> Self {
        match self {
            Self::Pause => Self::Resume,
            Self::Resume => Self::Pause,
        }
    }

    const fn contract_status(self) -> &'static str {
        match self {
            Self::Pause => "paused",
            Self::Resume => "active",
        }
    }
}

pub(crate) async fn apply<S: BookingStore>(
    ctx: &ServiceContext<S>,
    transition: Transition,
) -> Result<Applied, BookingError> {
    let action = transition.action.name();
    match run(ctx, &transition).await {
        Ok(applied) => {
            BookingMetrics::record_transition(action, "applied");
            tracing::info!(
                booking_id = %applied.booking.id,
                action,
                from = %applied.previous,
                to = %applied.booking.status,
                "Booking transitioned"
            );
            report(ctx, transition.module, &transition.action, transition.origin, &applied).await;
            Ok(applied)
        },
        Err(error) => {
            BookingMetrics::record_transition(action, error.reason());
            tracing::info!(booking_id = %transition.booking_id, action, error = %error, "Transition rejected");
            if transition.origin.is_some() {
                ctx.dispatcher
                    .rejected(
                        transition.origin,
                        transition.module,
                        action,
                        json!({"booking_id": transition.booking_id}),
                        &error,
                    )
                    .await;
            }
            Err(error)
        },
    }
}

async fn run<S: BookingStore>(
    ctx: &ServiceContext<S>,
    transition: &Transition,
) -> Result<Applied, BookingError> {
    let id = transition.booking_id;
    let mut preview = ctx
        .store
        .booking(id)
        .await?
        .ok_or_else(|| BookingError::not_found("booking", id))?;
    let planned = ctx.reducer.reduce(&mut preview, transition.action.clone(), &ctx.env)?;
    precheck_capacity(ctx, &planned).await?;

    let latest = ctx.store.latest_payment_attempt(id).await?;
    let contract = match (ContractCall::from_effects(&planned), recurring_contract(latest.as_ref())) {
        (Some(call), Some(attempt)) => Some((call, call_contract(ctx, call, attempt).await?)),
        _ => None,
    };

    let mut tx = ctx.store.begin().await?;
    let written = write(ctx, &mut tx, transition, latest.clone(), contract.as_ref()).await;
    let committed = finish(tx, written).await;

    if committed.is_err() {
        if let (Some((call, _)), Some(attempt)) = (contract, recurring_contract(latest.as_ref())) {
            undo_contract(ctx, call, attempt).await;
        }
    }
    committed
}

async fn write<S: BookingStore>(
    ctx: &ServiceContext<S>,
    tx: &mut S::Tx,
    transition: &Transition,
    latest: Option<PaymentAttempt>,
    contract: Option<&(ContractCall, Value)>,
) -> Result<Applied, BookingError> {
    let mut booking = tx.lock_booking(transition.booking_id).await?;
    let previous = booking.status;
    let effects = ctx.reducer.reduce(&mut booking, transition.action.clone(), &ctx.env)?;
    execute_effects(tx, booking.id, &effects, None).await?;

    if let Some(record) = &transition.cancel_record {
        tx.upsert_cancel_record(record).await?;
    }
    tx.update_booking(&booking).await?;

    let payment_status = match latest {
        Some(mut attempt) => {
            let mut entry = json!({
                "action": transition.action.name(),
                "from": previous.as_str(),
                "to": booking.status.as_str(),
                "at": ctx.clock.now(),
            });
            if let Some(note) = &transition.note {
                entry["note"] = json!(note);
            }
            if let Some((call, reply)) = contract {
                entry["contract"] = reply.clone();
                mark_contract(&mut attempt, *call);
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

/// Commit `tx` if `written` succeeded, otherwise roll it back and return the write error.
pub(crate) async fn finish<T: UnitOfWork, R>(
    tx: T,
    written: Result<R, BookingError>,
) -> Result<R, BookingError> {
    match written {
        Ok(value) => {
            tx.commit().await?;
            Ok(value)
        },
        Err(error) => {
            if let Err(rollback) = tx.rollback().await {
                tracing::warn!(error = %rollback, "Rollback failed");
            }
            Err(error)
        },
    }
}

/// Execute reducer effects inside `tx`.
///
/// A reservation matching `held` consumes that hold instead of reserving again;
/// returns whether it did. Contract effects are ignored here: they run against the
/// provider before the unit of work opens.
pub(crate) async fn execute_effects<T: UnitOfWork>(
    tx: &mut T,
    booking_id: BookingId,
    effects: &[BookingEffect],
    held: Option<&SeatHold>,
) -> Result<bool, BookingError> {
    let mut consumed = false;
    for effect in effects {
        match effect {
            BookingEffect::ReserveSeats {
                class_session_id,
                seats,
            } => match held {
                Some(hold)
                    if !consumed
                        && hold.class_session_id == *class_session_id
                        && hold.seats == *seats =>
                {
                    seats::consume(tx, hold).await?;
                    consumed = true;
                },
                _ => {
                    seats::reserve(tx, *class_session_id, *seats).await?;
                },
            },
            BookingEffect::ReleaseSeats {
                class_session_id,
                seats,
            } => {
                tx.release_capacity(*class_session_id, *seats).await?;
            },
            BookingEffect::ClearCancelRecord => {
                tx.delete_cancel_record(booking_id).await?;
            },
            BookingEffect::ClearFreezeRecords => {
                tx.delete_freeze_records(booking_id).await?;
            },
            BookingEffect::SuspendContract | BookingEffect::ResumeContract => {},
        }
    }
    Ok(consumed)
}

async fn precheck_capacity<S: BookingStore>(
    ctx: &ServiceContext<S>,
    effects: &[BookingEffect],
) -> Result<(), BookingError> {
    for effect in effects {
        if let BookingEffect::ReserveSeats {
            class_session_id,
            seats,
        } = effect
        {
            let session = ctx
                .store
                .class_session(*class_session_id)
                .await?
                .ok_or_else(|| BookingError::not_found("class session", class_session_id))?;
            if session.capacity < *seats {
                BookingMetrics::record_capacity_rejection();
                return Err(BookingError::CapacityExceeded {
                    class_session_id: *class_session_id,
                    requested: *seats,
                    available: session.capacity,
                });
            }
        }
    }
    Ok(())
}

pub(crate) async fn call_contract<S: BookingStore>(
    ctx: &ServiceContext<S>,
    call: ContractCall,
    attempt: &PaymentAttempt,
) -> Result<Value, BookingError> {
    match call {
        ContractCall::Pause => ctx.payments.pause_contract(attempt, ctx.clock.today(), None).await,
        ContractCall::Resume => ctx.payments.resume_contract(attempt).await,
    }
}

pub(crate) async fn undo_contract<S: BookingStore>(
    ctx: &ServiceContext<S>,
    call: ContractCall,
    attempt: &PaymentAttempt,
) {
    if let Err(error) = call_contract(ctx, call.reversed(), attempt).await {
        tracing::error!(
            attempt_id = %attempt.id,
            error = %error,
            "Local write failed and the contract change could not be undone; contract out of sync"
        );
    }
}

/// Append an entry to the attempt's status history.
pub(crate) fn note_history(attempt: &mut PaymentAttempt, entry: Value, now: DateTime<Utc>) {
    if !attempt.metadata.is_object() {
        attempt.metadata = json!({});
    }
    if let Some(fields) = attempt.metadata.as_object_mut() {
        let history = fields.entry("history").or_insert_with(|| json!([]));
        if let Some(list) = history.as_array_mut() {
            list.push(entry);
        }
    }
    attempt.updated_at = now;
}

pub(crate) fn mark_contract(attempt: &mut PaymentAttempt, call: ContractCall) {
    if !attempt.metadata.is_object() {
        attempt.metadata = json!({});
    }
    attempt.metadata["contract_status"] = json!(call.contract_status());
}

/// Dispatch a committed lifecycle change.
pub(crate) async fn report<S: BookingStore>(
    ctx: &ServiceContext<S>,
    module: &'static str,
    action: &BookingAction,
    origin: Option<BookingOrigin>,
    applied: &Applied,
) {
    let template = template_for(action, applied.booking.status);
    report_as(ctx, module, action.name(), template, origin, applied).await;
}

/// [`report`] with an explicit audit action and email template.
pub(crate) async fn report_as<S: BookingStore>(
    ctx: &ServiceContext<S>,
    module: &'static str,
    action: &'static str,
    template: Option<&'static str>,
    origin: Option<BookingOrigin>,
    applied: &Applied,
) {
    let students = ctx.store.students(applied.booking.id).await.unwrap_or_else(|error| {
        tracing::warn!(booking_id = %applied.booking.id, error = %error, "Could not load recipients");
        Vec::new()
    });
    ctx.dispatcher
        .committed(Notice {
            module,
            action,
            origin,
            booking: &applied.booking,
            recipient: primary_parent(&students),
            template,
            payload: json!({
                "booking_id": applied.booking.id,
                "reference": applied.booking.reference,
                "from": applied.previous.as_str(),
                "to": applied.booking.status.as_str(),
            }),
        })
        .await;
}
