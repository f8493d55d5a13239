//! Row decoding and column conversions.

use classbook_core::error::StoreError;
use classbook_core::model::{
    AccountKind, Booking, CancelClassification, CancelRecord, ClassSession, EmergencyContact,
    FreezeRecord, Parent, PortalAccount, SeatHold, Student, TrialDetails,
};
use classbook_core::payment::{BillingInterval, GatewayKind, PaymentAttempt, PaymentPlan, PaymentStatus};
use classbook_core::status::{BookingStatus, ServiceKind};
use classbook_core::types::{
    AccountId, ActorId, AttemptId, BookingId, BookingReference, ClassSessionId, FreezeId, HoldId,
    Money, PlanId, StudentId,
};
use sqlx::Row;
use sqlx::postgres::PgRow;
use sqlx::types::Json;
use uuid::Uuid;

pub(crate) const SESSION_COLUMNS: &str = "id, name, capacity";
pub(crate) const PLAN_COLUMNS: &str = "id, name, price, joining_fee, duration, billing_interval";
pub(crate) const BOOKING_COLUMNS: &str = "id, reference, class_session_id, service_kind, status, \
     payment_plan_id, booked_by, start_date, seats, trial, created_at, updated_at";
pub(crate) const STUDENT_COLUMNS: &str = "id, booking_id, position, first_name, last_name, \
     date_of_birth, medical_notes, parents, emergency_contact";
pub(crate) const ACCOUNT_COLUMNS: &str = "id, email, first_name, last_name, phone, kind";
pub(crate) const ATTEMPT_COLUMNS: &str = "id, booking_id, booking_reference, gateway, amount, \
     status, provider_reference, payer_reference, raw_response, metadata, failure_reason, \
     retry_count, created_at, updated_at";
pub(crate) const FREEZE_COLUMNS: &str =
    "id, booking_id, freeze_start, duration_months, reactivate_on, reason, created_at";
pub(crate) const CANCEL_COLUMNS: &str =
    "booking_id, reason, note, classification, effective_on, created_at";
pub(crate) const HOLD_COLUMNS: &str = "id, class_session_id, seats, expires_at";

/// Map a driver error, surfacing constraint violations as conflicts.
pub(crate) fn db_error(e: sqlx::Error) -> StoreError {
    if let Some(db) = e.as_database_error() {
        // 23505 unique_violation, 23514 check_violation
        if matches!(db.code().as_deref(), Some("23505" | "23514")) {
            return StoreError::Conflict(db.message().to_string());
        }
    }
    StoreError::Database(e.to_string())
}

fn decode(e: sqlx::Error) -> StoreError {
    StoreError::Corrupt(e.to_string())
}

/// Counts are stored as BIGINT.
pub(crate) fn count_column(row: &PgRow, column: &str) -> Result<u32, StoreError> {
    let value: i64 = row.try_get(column).map_err(decode)?;
    u32::try_from(value).map_err(|_| StoreError::Corrupt(format!("{column} out of range: {value}")))
}

fn money_column(row: &PgRow, column: &str) -> Result<Money, StoreError> {
    let value: i64 = row.try_get(column).map_err(decode)?;
    u64::try_from(value)
        .map(Money::from_minor)
        .map_err(|_| StoreError::Corrupt(format!("{column} is negative: {value}")))
}

pub(crate) fn money_param(amount: Money) -> Result<i64, StoreError> {
    i64::try_from(amount.minor())
        .map_err(|_| StoreError::Conflict(format!("amount {amount} does not fit in a BIGINT")))
}

fn uuid_column(row: &PgRow, column: &str) -> Result<Uuid, StoreError> {
    row.try_get(column).map_err(decode)
}

fn optional_uuid(row: &PgRow, column: &str) -> Result<Option<Uuid>, StoreError> {
    row.try_get(column).map_err(decode)
}

fn text(row: &PgRow, column: &str) -> Result<String, StoreError> {
    row.try_get(column).map_err(decode)
}

fn optional_text(row: &PgRow, column: &str) -> Result<Option<String>, StoreError> {
    row.try_get(column).map_err(decode)
}

pub(crate) fn row_to_session(row: &PgRow) -> Result<ClassSession, StoreError> {
    Ok(ClassSession {
        id: ClassSessionId::from_uuid(uuid_column(row, "id")?),
        name: text(row, "name")?,
        capacity: count_column(row, "capacity")?,
    })
}

pub(crate) fn row_to_plan(row: &PgRow) -> Result<PaymentPlan, StoreError> {
    Ok(PaymentPlan {
        id: PlanId::from_uuid(uuid_column(row, "id")?),
        name: text(row, "name")?,
        price: money_column(row, "price")?,
        joining_fee: money_column(row, "joining_fee")?,
        duration: count_column(row, "duration")?,
        interval: BillingInterval::parse(&text(row, "billing_interval")?)?,
    })
}

pub(crate) fn row_to_booking(row: &PgRow) -> Result<Booking, StoreError> {
    let trial: Option<Json<TrialDetails>> = row.try_get("trial").map_err(decode)?;
    Ok(Booking {
        id: BookingId::from_uuid(uuid_column(row, "id")?),
        reference: BookingReference::new(text(row, "reference")?),
        class_session_id: ClassSessionId::from_uuid(uuid_column(row, "class_session_id")?),
        service_kind: ServiceKind::parse(&text(row, "service_kind")?)?,
        status: BookingStatus::parse(&text(row, "status")?)?,
        payment_plan_id: optional_uuid(row, "payment_plan_id")?.map(PlanId::from_uuid),
        booked_by: optional_uuid(row, "booked_by")?.map(ActorId::from_uuid),
        start_date: row.try_get("start_date").map_err(decode)?,
        seats: count_column(row, "seats")?,
        trial: trial.map(|t| t.0),
        created_at: row.try_get("created_at").map_err(decode)?,
        updated_at: row.try_get("updated_at").map_err(decode)?,
    })
}

pub(crate) fn row_to_student(row: &PgRow) -> Result<Student, StoreError> {
    let parents: Json<Vec<Parent>> = row.try_get("parents").map_err(decode)?;
    let emergency_contact: Option<Json<EmergencyContact>> =
        row.try_get("emergency_contact").map_err(decode)?;
    Ok(Student {
        id: StudentId::from_uuid(uuid_column(row, "id")?),
        booking_id: BookingId::from_uuid(uuid_column(row, "booking_id")?),
        position: count_column(row, "position")?,
        first_name: text(row, "first_name")?,
        last_name: text(row, "last_name")?,
        date_of_birth: row.try_get("date_of_birth").map_err(decode)?,
        medical_notes: optional_text(row, "medical_notes")?,
        parents: parents.0,
        emergency_contact: emergency_contact.map(|c| c.0),
    })
}

pub(crate) fn row_to_account(row: &PgRow) -> Result<PortalAccount, StoreError> {
    Ok(PortalAccount {
        id: AccountId::from_uuid(uuid_column(row, "id")?),
        email: text(row, "email")?,
        first_name: text(row, "first_name")?,
        last_name: text(row, "last_name")?,
        phone: optional_text(row, "phone")?,
        kind: AccountKind::parse(&text(row, "kind")?)?,
    })
}

pub(crate) fn row_to_attempt(row: &PgRow) -> Result<PaymentAttempt, StoreError> {
    Ok(PaymentAttempt {
        id: AttemptId::from_uuid(uuid_column(row, "id")?),
        booking_id: optional_uuid(row, "booking_id")?.map(BookingId::from_uuid),
        booking_reference: BookingReference::new(text(row, "booking_reference")?),
        gateway: GatewayKind::parse(&text(row, "gateway")?)?,
        amount: money_column(row, "amount")?,
        status: PaymentStatus::parse(&text(row, "status")?)?,
        provider_reference: optional_text(row, "provider_reference")?,
        payer_reference: optional_text(row, "payer_reference")?,
        raw_response: row.try_get("raw_response").map_err(decode)?,
        metadata: row.try_get("metadata").map_err(decode)?,
        failure_reason: optional_text(row, "failure_reason")?,
        retry_count: count_column(row, "retry_count")?,
        created_at: row.try_get("created_at").map_err(decode)?,
        updated_at: row.try_get("updated_at").map_err(decode)?,
    })
}

pub(crate) fn row_to_freeze(row: &PgRow) -> Result<FreezeRecord, StoreError> {
    Ok(FreezeRecord {
        id: FreezeId::from_uuid(uuid_column(row, "id")?),
        booking_id: BookingId::from_uuid(uuid_column(row, "booking_id")?),
        freeze_start: row.try_get("freeze_start").map_err(decode)?,
        duration_months: count_column(row, "duration_months")?,
        reactivate_on: row.try_get("reactivate_on").map_err(decode)?,
        reason: optional_text(row, "reason")?,
        created_at: row.try_get("created_at").map_err(decode)?,
    })
}

pub(crate) fn row_to_cancel(row: &PgRow) -> Result<CancelRecord, StoreError> {
    Ok(CancelRecord {
        booking_id: BookingId::from_uuid(uuid_column(row, "booking_id")?),
        reason: text(row, "reason")?,
        note: optional_text(row, "note")?,
        classification: CancelClassification::parse(&text(row, "classification")?)?,
        effective_on: row.try_get("effective_on").map_err(decode)?,
        created_at: row.try_get("created_at").map_err(decode)?,
    })
}

pub(crate) fn row_to_hold(row: &PgRow) -> Result<SeatHold, StoreError> {
    Ok(SeatHold {
        id: HoldId::from_uuid(uuid_column(row, "id")?),
        class_session_id: ClassSessionId::from_uuid(uuid_column(row, "class_session_id")?),
        seats: count_column(row, "seats")?,
        expires_at: row.try_get("expires_at").map_err(decode)?,
    })
}
