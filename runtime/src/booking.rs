//! Booking placement and the trial/membership lifecycle.
//!
//! # Placement
//!
//! The initial status comes from the session's capacity, read without a lock and
//! confirmed under the session lock:
//!
//! - capacity 0: `waiting_list`, no seat taken, no payment collected
//! - otherwise: `active`, with a reservation that fails with
//!   [`BookingError::CapacityExceeded`] when the requested seats do not fit
//!
//! # Paid placement saga
//!
//! 1. Short unit of work: reserve the seats as a [`SeatHold`] and commit
//! 2. Run the gateway sequence with no lock held
//! 3. Paid, active or pending: consume the hold and write booking, students, account
//!    and attempt in one unit of work
//! 4. Failed: release the hold and record the attempt detached from any booking
//!
//! A crash between 1 and 3 leaves a hold that the stale-hold reaper returns.

use crate::ServiceContext;
use crate::accounts::{AccountSync, primary_parent};
use crate::dispatch::Notice;
use crate::metrics::BookingMetrics;
use crate::seats;
use crate::transition::{self, Applied, Transition, execute_effects, finish};
use chrono::{DateTime, NaiveDate, Utc};
use classbook_core::error::BookingError;
use classbook_core::lifecycle::{BookingAction, BookingEffect, BookingReducer, Reducer};
use classbook_core::model::{Booking, Parent, PortalAccount, SeatHold, Student, TrialDetails};
use classbook_core::payment::{PaymentAttempt, PaymentIntent, PaymentPlan, PaymentStatus};
use classbook_core::request::{BookingOrigin, BookingOutcome, BookingRequest, OperationStatus};
use classbook_core::status::{BookingStatus, ServiceKind};
use classbook_core::store::{BookingStore, UnitOfWork};
use classbook_core::types::{BookingId, BookingReference, ClassSessionId, ParentId, PlanId, StudentId};
use classbook_gateways::ChargeRequest;
use serde_json::{Value, json};
use std::sync::Arc;

const MODULE: &str = "booking";

/// Booking placement, promotion, rebooking, attendance and conversion.
pub struct BookingService<S: BookingStore> {
    ctx: Arc<ServiceContext<S>>,
}

struct Placed {
    booking: Booking,
    students: Vec<Student>,
    payment_status: Option<PaymentStatus>,
}

enum Seats<'a> {
    /// Waiting list: the session lock is already held, nothing to reserve
    Locked,
    /// Reserve in this unit of work
    Reserve(ClassSessionId, u32),
    /// Consume a committed hold
    Held(&'a SeatHold),
}

impl<S: BookingStore> BookingService<S> {
    pub(crate) const fn new(ctx: Arc<ServiceContext<S>>) -> Self {
        Self { ctx }
    }

    /// Place a new booking.
    ///
    /// # Errors
    ///
    /// - [`BookingError::Validation`] / [`BookingError::NotFound`] before any write
    /// - [`BookingError::Conflict`] when the primary parent's email belongs to staff
    /// - [`BookingError::CapacityExceeded`] when the seats do not fit
    /// - [`BookingError::Gateway`] / [`BookingError::ScheduleMissing`] when payment fails;
    ///   nothing but the failed attempt is persisted
    pub async fn create(&self, request: BookingRequest) -> Result<BookingOutcome, BookingError> {
        let origin = request.origin;
        let payload = json!({
            "class_session_id": request.class_session_id,
            "service_kind": request.service_kind.as_str(),
            "seats": request.seats(),
        });

        match self.place(request).await {
            Ok(placed) => {
                BookingMetrics::record_created(placed.booking.status.as_str());
                tracing::info!(
                    booking_id = %placed.booking.id,
                    reference = %placed.booking.reference,
                    status = %placed.booking.status,
                    payment_status = ?placed.payment_status,
                    "Booking created"
                );
                self.report_created(&placed, origin).await;
                Ok(BookingOutcome {
                    status: OperationStatus::Applied,
                    booking_id: placed.booking.id,
                    booking_status: placed.booking.status,
                    payment_status: placed.payment_status,
                })
            },
            Err(error) => {
                tracing::info!(error = %error, reason = error.reason(), "Booking rejected");
                self.ctx
                    .dispatcher
                    .rejected(Some(origin), MODULE, "create", payload, &error)
                    .await;
                Err(error)
            },
        }
    }

    async fn place(&self, request: BookingRequest) -> Result<Placed, BookingError> {
        let ctx = &*self.ctx;
        request.validate()?;

        let session = ctx
            .store
            .class_session(request.class_session_id)
            .await?
            .ok_or_else(|| BookingError::not_found("class session", request.class_session_id))?;
        let plan = self.load_plan(request.payment_plan_id).await?;

        let mut booking = new_booking(&request, BookingReducer::place(session.capacity), ctx.clock.now());
        let students = new_students(booking.id, &request);
        let account = match AccountSync::candidate(&students) {
            Some(candidate) => Some(AccountSync::prepare(ctx.store.as_ref(), candidate).await?),
            None => None,
        };

        if booking.status == BookingStatus::WaitingList {
            let mut tx = ctx.store.begin().await?;
            if tx.session_capacity(session.id).await? == 0 {
                let written =
                    write_placement(&mut tx, Seats::Locked, &booking, &students, account.as_ref(), None).await;
                finish(tx, written).await?;
                return Ok(Placed {
                    booking,
                    students,
                    payment_status: None,
                });
            }
            tx.rollback().await?;
            tracing::debug!(class_session_id = %session.id, "Seats freed before placement; booking as active");
            booking.status = BookingStatus::Active;
        }

        let Some(intent) = &request.payment else {
            let mut tx = ctx.store.begin().await?;
            let written = write_placement(
                &mut tx,
                Seats::Reserve(session.id, booking.seats),
                &booking,
                &students,
                account.as_ref(),
                None,
            )
            .await;
            finish(tx, written).await?;
            return Ok(Placed {
                booking,
                students,
                payment_status: None,
            });
        };

        let charge = charge_request(ctx, &booking, &session.name, intent, plan.as_ref())?;
        let hold = seats::hold(ctx, session.id, booking.seats).await?;
        let run = match ctx.payments.execute(&charge).await {
            Ok(run) => run,
            Err(error) => {
                abandon_hold(ctx, &hold).await;
                return Err(error);
            },
        };

        if !run.succeeded() {
            let attempt = run.to_attempt(None, &booking.reference, ctx.clock.now());
            let mut tx = ctx.store.begin().await?;
            let written = record_failure(&mut tx, Some(&hold), &attempt, AttemptWrite::Insert).await;
            finish(tx, written).await?;
            return Err(run.error.unwrap_or_else(unexplained_failure));
        }

        let mut attempt = run.to_attempt(Some(booking.id), &booking.reference, ctx.clock.now());
        let mut tx = ctx.store.begin().await?;
        let written = write_placement(
            &mut tx,
            Seats::Held(&hold),
            &booking,
            &students,
            account.as_ref(),
            Some(&attempt),
        )
        .await;
        if let Err(error) = finish(tx, written).await {
            attempt.booking_id = None;
            salvage(ctx, Some(&hold), attempt, &error, AttemptWrite::Insert).await;
            return Err(error);
        }

        Ok(Placed {
            booking,
            students,
            payment_status: Some(run.status),
        })
    }

    async fn report_created(&self, placed: &Placed, origin: BookingOrigin) {
        let template = match placed.booking.status {
            BookingStatus::WaitingList => "waiting_list_confirmation",
            _ => "booking_confirmation",
        };
        self.ctx
            .dispatcher
            .committed(Notice {
                module: MODULE,
                action: "create",
                origin: Some(origin),
                booking: &placed.booking,
                recipient: primary_parent(&placed.students),
                template: Some(template),
                payload: json!({
                    "booking_id": placed.booking.id,
                    "reference": placed.booking.reference,
                    "status": placed.booking.status.as_str(),
                    "payment_status": placed.payment_status.map(|status| status.as_str()),
                }),
            })
            .await;
    }

    /// Promote a waiting-list booking to `active`, collecting a payment if one is given.
    ///
    /// # Errors
    ///
    /// [`BookingError::InvalidTransition`] unless the booking is on the waiting list;
    /// [`BookingError::CapacityExceeded`] when the session is full; gateway errors
    /// leave the booking on the waiting list.
    pub async fn promote(
        &self,
        booking_id: BookingId,
        payment: Option<PaymentIntent>,
        origin: BookingOrigin,
    ) -> Result<BookingOutcome, BookingError> {
        match payment {
            None => self.transition(booking_id, BookingAction::Promote, origin).await,
            Some(intent) => {
                self.paid_transition(booking_id, BookingAction::Promote, intent, None, origin)
                    .await
            },
        }
    }

    /// Voluntarily move a booking back to the waiting list, releasing its seat if it held one.
    ///
    /// # Errors
    ///
    /// [`BookingError::InvalidTransition`] from statuses other than active, frozen,
    /// cancelled or request_to_cancel.
    pub async fn move_to_waiting_list(
        &self,
        booking_id: BookingId,
        origin: BookingOrigin,
    ) -> Result<BookingOutcome, BookingError> {
        self.transition(booking_id, BookingAction::MoveToWaitingList, origin)
            .await
    }

    /// Move a trial to another session or date.
    ///
    /// # Errors
    ///
    /// [`BookingError::NotFound`] for an unknown session, [`BookingError::Validation`]
    /// for memberships, [`BookingError::CapacityExceeded`] when the new session is full.
    pub async fn rebook(
        &self,
        booking_id: BookingId,
        class_session_id: ClassSessionId,
        date: NaiveDate,
        origin: BookingOrigin,
    ) -> Result<BookingOutcome, BookingError> {
        if self.ctx.store.class_session(class_session_id).await?.is_none() {
            return Err(BookingError::not_found("class session", class_session_id));
        }
        self.transition(
            booking_id,
            BookingAction::Rebook {
                class_session_id,
                date,
            },
            origin,
        )
        .await
    }

    /// Record whether a trial student attended.
    ///
    /// # Errors
    ///
    /// [`BookingError::Validation`] for memberships; [`BookingError::InvalidTransition`]
    /// unless the trial is active or rebooked.
    pub async fn mark_attendance(
        &self,
        booking_id: BookingId,
        attended: bool,
        origin: BookingOrigin,
    ) -> Result<BookingOutcome, BookingError> {
        self.transition(booking_id, BookingAction::MarkAttendance { attended }, origin)
            .await
    }

    /// Turn a trial into a membership on `plan_id`, collecting a payment if one is given.
    ///
    /// A failed payment leaves the trial untouched and records the attempt against it.
    ///
    /// # Errors
    ///
    /// [`BookingError::NotFound`] for an unknown plan; reducer errors for non-trials;
    /// gateway errors.
    pub async fn convert_to_membership(
        &self,
        booking_id: BookingId,
        plan_id: PlanId,
        payment: Option<PaymentIntent>,
        origin: BookingOrigin,
    ) -> Result<BookingOutcome, BookingError> {
        if self.ctx.store.payment_plan(plan_id).await?.is_none() {
            return Err(BookingError::not_found("payment plan", plan_id));
        }
        let action = BookingAction::ConvertToMembership { plan_id };
        match payment {
            None => self.transition(booking_id, action, origin).await,
            Some(intent) => {
                self.paid_transition(booking_id, action, intent, Some(plan_id), origin)
                    .await
            },
        }
    }

    async fn transition(
        &self,
        booking_id: BookingId,
        action: BookingAction,
        origin: BookingOrigin,
    ) -> Result<BookingOutcome, BookingError> {
        let transition = Transition::new(booking_id, action, Some(origin), MODULE);
        transition::apply(&self.ctx, transition)
            .await
            .map(|applied| applied.outcome())
    }

    async fn paid_transition(
        &self,
        booking_id: BookingId,
        action: BookingAction,
        intent: PaymentIntent,
        plan_id: Option<PlanId>,
        origin: BookingOrigin,
    ) -> Result<BookingOutcome, BookingError> {
        let name = action.name();
        match self.run_paid_transition(booking_id, &action, &intent, plan_id).await {
            Ok(applied) => {
                BookingMetrics::record_transition(name, "applied");
                tracing::info!(
                    booking_id = %booking_id,
                    action = name,
                    from = %applied.previous,
                    to = %applied.booking.status,
                    "Booking transitioned with payment"
                );
                transition::report(&self.ctx, MODULE, &action, Some(origin), &applied).await;
                Ok(applied.outcome())
            },
            Err(error) => {
                BookingMetrics::record_transition(name, error.reason());
                self.ctx
                    .dispatcher
                    .rejected(Some(origin), MODULE, name, json!({"booking_id": booking_id}), &error)
                    .await;
                Err(error)
            },
        }
    }

    async fn run_paid_transition(
        &self,
        booking_id: BookingId,
        action: &BookingAction,
        intent: &PaymentIntent,
        plan_id: Option<PlanId>,
    ) -> Result<Applied, BookingError> {
        let ctx = &*self.ctx;
        let booking = ctx
            .store
            .booking(booking_id)
            .await?
            .ok_or_else(|| BookingError::not_found("booking", booking_id))?;

        let mut preview = booking.clone();
        let planned = ctx.reducer.reduce(&mut preview, action.clone(), &ctx.env)?;
        let session = ctx
            .store
            .class_session(preview.class_session_id)
            .await?
            .ok_or_else(|| BookingError::not_found("class session", preview.class_session_id))?;
        let plan = self.load_plan(plan_id.or(booking.payment_plan_id)).await?;
        let charge = charge_request(ctx, &preview, &session.name, intent, plan.as_ref())?;

        let hold = match reservation(&planned) {
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

        let mut attempt = run.to_attempt(Some(booking_id), &booking.reference, ctx.clock.now());
        if !run.succeeded() {
            park_action(&mut attempt, action)?;
            let mut tx = ctx.store.begin().await?;
            let written = record_failure(&mut tx, hold.as_ref(), &attempt, AttemptWrite::Insert).await;
            finish(tx, written).await?;
            return Err(run.error.unwrap_or_else(unexplained_failure));
        }

        let mut tx = ctx.store.begin().await?;
        let written = finalize(
            ctx,
            &mut tx,
            booking_id,
            action,
            hold.as_ref(),
            &attempt,
            AttemptWrite::Insert,
        )
        .await;
        match finish(tx, written).await {
            Ok(applied) => Ok(applied),
            Err(error) => {
                salvage(ctx, hold.as_ref(), attempt, &error, AttemptWrite::Insert).await;
                Err(error)
            },
        }
    }

    async fn load_plan(&self, id: Option<PlanId>) -> Result<Option<PaymentPlan>, BookingError> {
        match id {
            Some(id) => self
                .ctx
                .store
                .payment_plan(id)
                .await?
                .map(Some)
                .ok_or_else(|| BookingError::not_found("payment plan", id)),
            None => Ok(None),
        }
    }
}

fn new_booking(request: &BookingRequest, status: BookingStatus, now: DateTime<Utc>) -> Booking {
    Booking {
        id: BookingId::new(),
        reference: BookingReference::generate(),
        class_session_id: request.class_session_id,
        service_kind: request.service_kind,
        status,
        payment_plan_id: request.payment_plan_id,
        booked_by: request.origin.actor(),
        start_date: request.start_date,
        seats: request.seats(),
        trial: (request.service_kind == ServiceKind::Trial).then_some(TrialDetails {
            trial_date: request.start_date,
            rebook_count: 0,
        }),
        created_at: now,
        updated_at: now,
    }
}

fn new_students(booking_id: BookingId, request: &BookingRequest) -> Vec<Student> {
    request
        .students
        .iter()
        .enumerate()
        .map(|(position, input)| Student {
            id: StudentId::new(),
            booking_id,
            position: u32::try_from(position).unwrap_or(u32::MAX),
            first_name: input.first_name.trim().to_string(),
            last_name: input.last_name.trim().to_string(),
            date_of_birth: input.date_of_birth,
            medical_notes: input.medical_notes.clone(),
            parents: request
                .parents
                .iter()
                .map(|parent| Parent {
                    id: ParentId::new(),
                    first_name: parent.first_name.trim().to_string(),
                    last_name: parent.last_name.trim().to_string(),
                    email: parent.email.trim().to_ascii_lowercase(),
                    phone: parent.phone.clone(),
                    relationship: parent.relationship.clone(),
                })
                .collect(),
            emergency_contact: request.emergency_contact.clone(),
        })
        .collect()
}

/// Build the provider request for `booking`.
///
/// Without an explicit amount, recurring gateways collect the plan's instalment and
/// one-off gateways the price plus joining fee.
pub(crate) fn charge_request<S: BookingStore>(
    ctx: &ServiceContext<S>,
    booking: &Booking,
    session_name: &str,
    intent: &PaymentIntent,
    plan: Option<&PaymentPlan>,
) -> Result<ChargeRequest, BookingError> {
    let recurring = intent.payer.gateway().is_recurring();
    if recurring && plan.is_none() {
        return Err(BookingError::validation(
            "payment_plan_id",
            "recurring contracts need a payment plan",
        ));
    }
    let amount = match (intent.amount, plan) {
        (Some(amount), _) => amount,
        (None, Some(plan)) if recurring => plan.instalment_amount(),
        (None, Some(plan)) => plan.one_off_amount()?,
        (None, None) => {
            return Err(BookingError::validation(
                "payment.amount",
                "an amount or a payment plan is required",
            ));
        },
    };
    if amount.is_zero() {
        return Err(BookingError::validation("payment.amount", "nothing to charge"));
    }
    Ok(ChargeRequest {
        booking_reference: booking.reference.clone(),
        amount,
        payer: intent.payer.clone(),
        plan: plan.cloned(),
        description: format!(
            "{} {} {}",
            ctx.settings.statement_prefix, session_name, booking.reference
        ),
        today: ctx.clock.today(),
    })
}

async fn write_placement<T: UnitOfWork>(
    tx: &mut T,
    seats: Seats<'_>,
    booking: &Booking,
    students: &[Student],
    account: Option<&PortalAccount>,
    attempt: Option<&PaymentAttempt>,
) -> Result<(), BookingError> {
    match seats {
        Seats::Locked => {},
        Seats::Reserve(class_session_id, count) => {
            seats::reserve(tx, class_session_id, count).await?;
        },
        Seats::Held(hold) => seats::consume(tx, hold).await?,
    }
    tx.insert_booking(booking).await?;
    tx.insert_students(students).await?;
    if let Some(account) = account {
        AccountSync::apply(tx, account).await?;
    }
    if let Some(attempt) = attempt {
        tx.insert_payment_attempt(attempt).await?;
    }
    Ok(())
}

/// Key under which a paid transition whose payment failed waits for a retry.
pub(crate) const PENDING_ACTION: &str = "pending_action";

/// Whether the attempt is a new row or overwrites the stored one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum AttemptWrite {
    Insert,
    Update,
}

impl AttemptWrite {
    async fn save<T: UnitOfWork>(self, tx: &mut T, attempt: &PaymentAttempt) -> Result<(), BookingError> {
        match self {
            Self::Insert => tx.insert_payment_attempt(attempt).await?,
            Self::Update => tx.update_payment_attempt(attempt).await?,
        }
        Ok(())
    }
}

/// Seats the effects reserve, if any.
pub(crate) fn reservation(effects: &[BookingEffect]) -> Option<(ClassSessionId, u32)> {
    effects.iter().find_map(|effect| match effect {
        BookingEffect::ReserveSeats {
            class_session_id,
            seats,
        } => Some((*class_session_id, *seats)),
        _ => None,
    })
}

/// Park `action` on a failed attempt so a successful retry can apply it.
fn park_action(attempt: &mut PaymentAttempt, action: &BookingAction) -> Result<(), BookingError> {
    let parked = serde_json::to_value(action)
        .map_err(|error| BookingError::Internal(format!("cannot record pending action: {error}")))?;
    if !attempt.metadata.is_object() {
        attempt.metadata = json!({});
    }
    attempt.metadata[PENDING_ACTION] = parked;
    Ok(())
}

/// Action parked on `attempt` by a failed paid transition.
pub(crate) fn parked_action(attempt: &PaymentAttempt) -> Result<Option<BookingAction>, BookingError> {
    match attempt.metadata.get(PENDING_ACTION) {
        None | Some(Value::Null) => Ok(None),
        Some(parked) => serde_json::from_value(parked.clone()).map(Some).map_err(|error| {
            BookingError::Internal(format!("attempt {} has an unreadable pending action: {error}", attempt.id))
        }),
    }
}

/// Lock the booking, apply `action` and its seat effects, and write the attempt.
pub(crate) async fn finalize<S: BookingStore>(
    ctx: &ServiceContext<S>,
    tx: &mut S::Tx,
    booking_id: BookingId,
    action: &BookingAction,
    hold: Option<&SeatHold>,
    attempt: &PaymentAttempt,
    write: AttemptWrite,
) -> Result<Applied, BookingError> {
    let mut booking = tx.lock_booking(booking_id).await?;
    let previous = booking.status;
    let effects = ctx.reducer.reduce(&mut booking, action.clone(), &ctx.env)?;
    let consumed = execute_effects(tx, booking_id, &effects, hold).await?;
    if let (Some(hold), false) = (hold, consumed) {
        seats::release(tx, hold.id).await?;
    }
    tx.update_booking(&booking).await?;
    write.save(tx, attempt).await?;
    Ok(Applied {
        booking,
        previous,
        payment_status: Some(attempt.status),
    })
}

pub(crate) async fn record_failure<T: UnitOfWork>(
    tx: &mut T,
    hold: Option<&SeatHold>,
    attempt: &PaymentAttempt,
    write: AttemptWrite,
) -> Result<(), BookingError> {
    if let Some(hold) = hold {
        seats::release(tx, hold.id).await?;
    }
    write.save(tx, attempt).await
}

/// The payment went through but the booking write did not: keep the attempt and
/// return the seats so the money can be matched up by hand.
pub(crate) async fn salvage<S: BookingStore>(
    ctx: &ServiceContext<S>,
    hold: Option<&SeatHold>,
    mut attempt: PaymentAttempt,
    error: &BookingError,
    write: AttemptWrite,
) {
    tracing::error!(
        booking_reference = %attempt.booking_reference,
        provider_reference = ?attempt.provider_reference,
        error = %error,
        "Payment collected but the booking could not be saved"
    );
    attempt.failure_reason = Some("booking_not_saved".to_string());
    if let Some(fields) = attempt.metadata.as_object_mut() {
        fields.insert("unapplied_payment".to_string(), json!(true));
        fields.insert("error".to_string(), json!(error.to_string()));
    }

    let saved = async {
        let mut tx = ctx.store.begin().await?;
        let written = record_failure(&mut tx, hold, &attempt, write).await;
        finish(tx, written).await
    }
    .await;
    if let Err(error) = saved {
        tracing::error!(attempt_id = %attempt.id, error = %error, "Could not record unapplied payment");
    }
}

pub(crate) async fn abandon_hold<S: BookingStore>(ctx: &ServiceContext<S>, hold: &SeatHold) {
    if let Err(error) = seats::release_now(ctx, hold.id).await {
        tracing::warn!(hold_id = %hold.id, error = %error, "Could not release seat hold; reaper will");
    }
}

pub(crate) fn unexplained_failure() -> BookingError {
    BookingError::Internal("payment failed without a reason".to_string())
}
