//! `PostgreSQL` booking store for Classbook.
//!
//! Implements [`BookingStore`] and [`classbook_core::store::UnitOfWork`] on top of
//! a sqlx connection pool. Every unit of work is one database transaction:
//!
//! - Seat counts are decremented with a conditional `UPDATE`, so capacity never
//!   goes below zero even under concurrent placements
//! - Bookings are locked with `SELECT ... FOR UPDATE` for lifecycle transitions
//! - Payment attempts carry no foreign key to bookings and survive rollbacks when
//!   written in their own unit of work
//!
//! # Example
//!
//! ```ignore
//! use classbook_postgres::PgBookingStore;
//!
//! async fn example() -> Result<(), Box<dyn std::error::Error>> {
//!     let store = PgBookingStore::new("postgres://localhost/classbook").await?;
//!     store.migrate().await?;
//!     Ok(())
//! }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod rows;
mod unit_of_work;

pub use unit_of_work::PgUnitOfWork;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use classbook_core::error::StoreError;
use classbook_core::model::{
    Booking, CancelRecord, ClassSession, FreezeRecord, PortalAccount, SeatHold, Student,
};
use classbook_core::payment::{PaymentAttempt, PaymentPlan};
use classbook_core::status::BookingStatus;
use classbook_core::store::BookingStore;
use classbook_core::types::{BookingId, ClassSessionId, PlanId};
use rows::{
    ACCOUNT_COLUMNS, ATTEMPT_COLUMNS, BOOKING_COLUMNS, CANCEL_COLUMNS, FREEZE_COLUMNS,
    HOLD_COLUMNS, PLAN_COLUMNS, SESSION_COLUMNS, STUDENT_COLUMNS, db_error,
};
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;

/// Booking store backed by a `PostgreSQL` pool.
#[derive(Clone)]
pub struct PgBookingStore {
    pool: PgPool,
}

impl PgBookingStore {
    /// Connect to the database at `database_url`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the connection cannot be established.
    pub async fn new(database_url: &str) -> Result<Self, StoreError> {
        Self::connect(database_url, 10).await
    }

    /// Connect with an explicit pool size.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the connection cannot be established.
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await
            .map_err(|e| StoreError::Database(format!("Failed to connect: {e}")))?;
        Ok(Self { pool })
    }

    /// Wrap an existing pool.
    #[must_use]
    pub const fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Run the bundled schema migrations.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if a migration fails.
    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| StoreError::Database(format!("Migration failed: {e}")))?;
        Ok(())
    }

    /// The underlying connection pool.
    #[must_use]
    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Insert or replace a class session. Sessions are reference data managed outside
    /// the booking flows.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the write fails.
    pub async fn put_class_session(&self, session: &ClassSession) -> Result<(), StoreError> {
        sqlx::query(
            r"
            INSERT INTO class_sessions (id, name, capacity) VALUES ($1, $2, $3)
            ON CONFLICT (id) DO UPDATE SET name = EXCLUDED.name, capacity = EXCLUDED.capacity
            ",
        )
        .bind(session.id.as_uuid())
        .bind(&session.name)
        .bind(i64::from(session.capacity))
        .execute(&self.pool)
        .await
        .map_err(db_error)?;
        Ok(())
    }

    /// Insert or replace a payment plan.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the write fails.
    pub async fn put_payment_plan(&self, plan: &PaymentPlan) -> Result<(), StoreError> {
        sqlx::query(
            r"
            INSERT INTO payment_plans (id, name, price, joining_fee, duration, billing_interval)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (id) DO UPDATE SET
                name = EXCLUDED.name,
                price = EXCLUDED.price,
                joining_fee = EXCLUDED.joining_fee,
                duration = EXCLUDED.duration,
                billing_interval = EXCLUDED.billing_interval
            ",
        )
        .bind(plan.id.as_uuid())
        .bind(&plan.name)
        .bind(rows::money_param(plan.price)?)
        .bind(rows::money_param(plan.joining_fee)?)
        .bind(i64::from(plan.duration))
        .bind(plan.interval.as_str())
        .execute(&self.pool)
        .await
        .map_err(db_error)?;
        Ok(())
    }
}

#[async_trait]
impl BookingStore for PgBookingStore {
    type Tx = PgUnitOfWork;

    async fn begin(&self) -> Result<Self::Tx, StoreError> {
        let tx = self.pool.begin().await.map_err(db_error)?;
        Ok(PgUnitOfWork::new(tx))
    }

    async fn class_session(&self, id: ClassSessionId) -> Result<Option<ClassSession>, StoreError> {
        let sql = format!("SELECT {SESSION_COLUMNS} FROM class_sessions WHERE id = $1");
        sqlx::query(&sql)
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(db_error)?
            .as_ref()
            .map(rows::row_to_session)
            .transpose()
    }

    async fn payment_plan(&self, id: PlanId) -> Result<Option<PaymentPlan>, StoreError> {
        let sql = format!("SELECT {PLAN_COLUMNS} FROM payment_plans WHERE id = $1");
        sqlx::query(&sql)
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(db_error)?
            .as_ref()
            .map(rows::row_to_plan)
            .transpose()
    }

    async fn booking(&self, id: BookingId) -> Result<Option<Booking>, StoreError> {
        let sql = format!("SELECT {BOOKING_COLUMNS} FROM bookings WHERE id = $1");
        sqlx::query(&sql)
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(db_error)?
            .as_ref()
            .map(rows::row_to_booking)
            .transpose()
    }

    async fn students(&self, booking_id: BookingId) -> Result<Vec<Student>, StoreError> {
        let sql =
            format!("SELECT {STUDENT_COLUMNS} FROM students WHERE booking_id = $1 ORDER BY position");
        let records = sqlx::query(&sql)
            .bind(booking_id.as_uuid())
            .fetch_all(&self.pool)
            .await
            .map_err(db_error)?;
        records.iter().map(rows::row_to_student).collect()
    }

    async fn bookings_by_status(&self, status: BookingStatus) -> Result<Vec<Booking>, StoreError> {
        let sql =
            format!("SELECT {BOOKING_COLUMNS} FROM bookings WHERE status = $1 ORDER BY created_at");
        let records = sqlx::query(&sql)
            .bind(status.as_str())
            .fetch_all(&self.pool)
            .await
            .map_err(db_error)?;
        records.iter().map(rows::row_to_booking).collect()
    }

    async fn latest_payment_attempt(
        &self,
        booking_id: BookingId,
    ) -> Result<Option<PaymentAttempt>, StoreError> {
        let sql = format!(
            "SELECT {ATTEMPT_COLUMNS} FROM payment_attempts WHERE booking_id = $1 \
             ORDER BY seq DESC LIMIT 1"
        );
        sqlx::query(&sql)
            .bind(booking_id.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(db_error)?
            .as_ref()
            .map(rows::row_to_attempt)
            .transpose()
    }

    async fn payment_attempts(&self, booking_id: BookingId) -> Result<Vec<PaymentAttempt>, StoreError> {
        let sql = format!(
            "SELECT {ATTEMPT_COLUMNS} FROM payment_attempts WHERE booking_id = $1 ORDER BY seq"
        );
        let records = sqlx::query(&sql)
            .bind(booking_id.as_uuid())
            .fetch_all(&self.pool)
            .await
            .map_err(db_error)?;
        records.iter().map(rows::row_to_attempt).collect()
    }

    async fn payment_attempt_by_reference(
        &self,
        provider_reference: &str,
    ) -> Result<Option<PaymentAttempt>, StoreError> {
        let sql = format!(
            "SELECT {ATTEMPT_COLUMNS} FROM payment_attempts WHERE provider_reference = $1 \
             ORDER BY seq LIMIT 1"
        );
        sqlx::query(&sql)
            .bind(provider_reference)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_error)?
            .as_ref()
            .map(rows::row_to_attempt)
            .transpose()
    }

    async fn freeze_records(&self) -> Result<Vec<FreezeRecord>, StoreError> {
        let sql = format!("SELECT {FREEZE_COLUMNS} FROM freeze_records ORDER BY seq");
        let records = sqlx::query(&sql).fetch_all(&self.pool).await.map_err(db_error)?;
        records.iter().map(rows::row_to_freeze).collect()
    }

    async fn freeze_records_for(&self, booking_id: BookingId) -> Result<Vec<FreezeRecord>, StoreError> {
        let sql = format!(
            "SELECT {FREEZE_COLUMNS} FROM freeze_records WHERE booking_id = $1 ORDER BY seq"
        );
        let records = sqlx::query(&sql)
            .bind(booking_id.as_uuid())
            .fetch_all(&self.pool)
            .await
            .map_err(db_error)?;
        records.iter().map(rows::row_to_freeze).collect()
    }

    async fn cancel_record(&self, booking_id: BookingId) -> Result<Option<CancelRecord>, StoreError> {
        let sql = format!("SELECT {CANCEL_COLUMNS} FROM cancel_records WHERE booking_id = $1");
        sqlx::query(&sql)
            .bind(booking_id.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(db_error)?
            .as_ref()
            .map(rows::row_to_cancel)
            .transpose()
    }

    async fn portal_account_by_email(&self, email: &str) -> Result<Option<PortalAccount>, StoreError> {
        let sql =
            format!("SELECT {ACCOUNT_COLUMNS} FROM portal_accounts WHERE lower(email) = lower($1)");
        sqlx::query(&sql)
            .bind(email)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_error)?
            .as_ref()
            .map(rows::row_to_account)
            .transpose()
    }

    async fn expired_seat_holds(&self, now: DateTime<Utc>) -> Result<Vec<SeatHold>, StoreError> {
        let sql = format!(
            "SELECT {HOLD_COLUMNS} FROM seat_holds WHERE expires_at <= $1 ORDER BY expires_at"
        );
        let records = sqlx::query(&sql)
            .bind(now)
            .fetch_all(&self.pool)
            .await
            .map_err(db_error)?;
        records.iter().map(rows::row_to_hold).collect()
    }
}
