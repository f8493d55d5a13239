//! Transactional unit of work.

use crate::rows::{
    BOOKING_COLUMNS, FREEZE_COLUMNS, HOLD_COLUMNS, count_column, db_error, money_param,
    row_to_booking, row_to_freeze, row_to_hold,
};
use async_trait::async_trait;
use classbook_core::error::StoreError;
use classbook_core::model::{Booking, CancelRecord, FreezeRecord, PortalAccount, SeatHold, Student};
use classbook_core::payment::PaymentAttempt;
use classbook_core::store::UnitOfWork;
use classbook_core::types::{BookingId, ClassSessionId, HoldId};
use sqlx::types::Json;
use sqlx::{Postgres, Transaction};

/// One database transaction. Dropping it without commit rolls back.
pub struct PgUnitOfWork {
    tx: Transaction<'static, Postgres>,
}

impl PgUnitOfWork {
    pub(crate) const fn new(tx: Transaction<'static, Postgres>) -> Self {
        Self { tx }
    }
}

#[async_trait]
impl UnitOfWork for PgUnitOfWork {
    async fn session_capacity(&mut self, id: ClassSessionId) -> Result<u32, StoreError> {
        let row = sqlx::query("SELECT capacity FROM class_sessions WHERE id = $1 FOR UPDATE")
            .bind(id.as_uuid())
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(db_error)?
            .ok_or_else(|| StoreError::not_found("class session", id))?;
        count_column(&row, "capacity")
    }

    async fn reserve_capacity(&mut self, id: ClassSessionId, seats: u32) -> Result<u32, StoreError> {
        let updated = sqlx::query(
            r"
            UPDATE class_sessions SET capacity = capacity - $2
            WHERE id = $1 AND capacity >= $2
            RETURNING capacity
            ",
        )
        .bind(id.as_uuid())
        .bind(i64::from(seats))
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(db_error)?;

        if let Some(row) = updated {
            return count_column(&row, "capacity");
        }

        let available = self.session_capacity(id).await?;
        tracing::debug!(
            class_session_id = %id,
            requested = seats,
            available = available,
            "Seat reservation refused"
        );
        metrics::counter!("classbook_store_capacity_refused_total").increment(1);
        Err(StoreError::CapacityExceeded {
            class_session_id: id,
            requested: seats,
            available,
        })
    }

    async fn release_capacity(&mut self, id: ClassSessionId, seats: u32) -> Result<u32, StoreError> {
        let row = sqlx::query(
            "UPDATE class_sessions SET capacity = capacity + $2 WHERE id = $1 RETURNING capacity",
        )
        .bind(id.as_uuid())
        .bind(i64::from(seats))
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(db_error)?
        .ok_or_else(|| StoreError::not_found("class session", id))?;
        count_column(&row, "capacity")
    }

    async fn lock_booking(&mut self, id: BookingId) -> Result<Booking, StoreError> {
        let sql = format!("SELECT {BOOKING_COLUMNS} FROM bookings WHERE id = $1 FOR UPDATE");
        let row = sqlx::query(&sql)
            .bind(id.as_uuid())
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(db_error)?
            .ok_or_else(|| StoreError::not_found("booking", id))?;
        row_to_booking(&row)
    }

    async fn insert_booking(&mut self, booking: &Booking) -> Result<(), StoreError> {
        sqlx::query(
            r"
            INSERT INTO bookings (
                id, reference, class_session_id, service_kind, status, payment_plan_id,
                booked_by, start_date, seats, trial, created_at, updated_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            ",
        )
        .bind(booking.id.as_uuid())
        .bind(booking.reference.as_str())
        .bind(booking.class_session_id.as_uuid())
        .bind(booking.service_kind.as_str())
        .bind(booking.status.as_str())
        .bind(booking.payment_plan_id.map(|p| *p.as_uuid()))
        .bind(booking.booked_by.map(|a| *a.as_uuid()))
        .bind(booking.start_date)
        .bind(i64::from(booking.seats))
        .bind(booking.trial.as_ref().map(Json))
        .bind(booking.created_at)
        .bind(booking.updated_at)
        .execute(&mut *self.tx)
        .await
        .map_err(db_error)?;
        Ok(())
    }

    async fn update_booking(&mut self, booking: &Booking) -> Result<(), StoreError> {
        let result = sqlx::query(
            r"
            UPDATE bookings SET
                class_session_id = $2, service_kind = $3, status = $4, payment_plan_id = $5,
                start_date = $6, seats = $7, trial = $8, updated_at = $9
            WHERE id = $1
            ",
        )
        .bind(booking.id.as_uuid())
        .bind(booking.class_session_id.as_uuid())
        .bind(booking.service_kind.as_str())
        .bind(booking.status.as_str())
        .bind(booking.payment_plan_id.map(|p| *p.as_uuid()))
        .bind(booking.start_date)
        .bind(i64::from(booking.seats))
        .bind(booking.trial.as_ref().map(Json))
        .bind(booking.updated_at)
        .execute(&mut *self.tx)
        .await
        .map_err(db_error)?;

        if result.rows_affected() == 0 {
            return Err(StoreError::not_found("booking", booking.id));
        }
        Ok(())
    }

    async fn insert_students(&mut self, students: &[Student]) -> Result<(), StoreError> {
        for student in students {
            sqlx::query(
                r"
                INSERT INTO students (
                    id, booking_id, position, first_name, last_name, date_of_birth,
                    medical_notes, parents, emergency_contact
                ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
                ",
            )
            .bind(student.id.as_uuid())
            .bind(student.booking_id.as_uuid())
            .bind(i64::from(student.position))
            .bind(&student.first_name)
            .bind(&student.last_name)
            .bind(student.date_of_birth)
            .bind(student.medical_notes.as_deref())
            .bind(Json(&student.parents))
            .bind(student.emergency_contact.as_ref().map(Json))
            .execute(&mut *self.tx)
            .await
            .map_err(db_error)?;
        }
        Ok(())
    }

    async fn upsert_portal_account(&mut self, account: &PortalAccount) -> Result<(), StoreError> {
        let result = sqlx::query(
            r"
            INSERT INTO portal_accounts (id, email, first_name, last_name, phone, kind)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT ((lower(email))) DO UPDATE SET
                first_name = EXCLUDED.first_name,
                last_name = EXCLUDED.last_name,
                phone = EXCLUDED.phone
            WHERE portal_accounts.kind = EXCLUDED.kind
            ",
        )
        .bind(account.id.as_uuid())
        .bind(&account.email)
        .bind(&account.first_name)
        .bind(&account.last_name)
        .bind(account.phone.as_deref())
        .bind(account.kind.as_str())
        .execute(&mut *self.tx)
        .await
        .map_err(db_error)?;
        if result.rows_affected() == 0 {
            return Err(StoreError::Conflict(format!(
                "{} belongs to an account of another kind",
                account.email
            )));
        }
        Ok(())
    }

    async fn insert_payment_attempt(&mut self, attempt: &PaymentAttempt) -> Result<(), StoreError> {
        sqlx::query(
            r"
            INSERT INTO payment_attempts (
                id, booking_id, booking_reference, gateway, amount, status, provider_reference,
                payer_reference, raw_response, metadata, failure_reason, retry_count,
                created_at, updated_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
            ",
        )
        .bind(attempt.id.as_uuid())
        .bind(attempt.booking_id.map(|b| *b.as_uuid()))
        .bind(attempt.booking_reference.as_str())
        .bind(attempt.gateway.as_str())
        .bind(money_param(attempt.amount)?)
        .bind(attempt.status.as_str())
        .bind(attempt.provider_reference.as_deref())
        .bind(attempt.payer_reference.as_deref())
        .bind(&attempt.raw_response)
        .bind(&attempt.metadata)
        .bind(attempt.failure_reason.as_deref())
        .bind(i64::from(attempt.retry_count))
        .bind(attempt.created_at)
        .bind(attempt.updated_at)
        .execute(&mut *self.tx)
        .await
        .map_err(db_error)?;
        Ok(())
    }

    async fn update_payment_attempt(&mut self, attempt: &PaymentAttempt) -> Result<(), StoreError> {
        let result = sqlx::query(
            r"
            UPDATE payment_attempts SET
                booking_id = $2, gateway = $3, amount = $4, status = $5,
                provider_reference = $6, payer_reference = $7, raw_response = $8,
                metadata = $9, failure_reason = $10, retry_count = $11, updated_at = $12
            WHERE id = $1
            ",
        )
        .bind(attempt.id.as_uuid())
        .bind(attempt.booking_id.map(|b| *b.as_uuid()))
        .bind(attempt.gateway.as_str())
        .bind(money_param(attempt.amount)?)
        .bind(attempt.status.as_str())
        .bind(attempt.provider_reference.as_deref())
        .bind(attempt.payer_reference.as_deref())
        .bind(&attempt.raw_response)
        .bind(&attempt.metadata)
        .bind(attempt.failure_reason.as_deref())
        .bind(i64::from(attempt.retry_count))
        .bind(attempt.updated_at)
        .execute(&mut *self.tx)
        .await
        .map_err(db_error)?;

        if result.rows_affected() == 0 {
            return Err(StoreError::not_found("payment attempt", attempt.id));
        }
        Ok(())
    }

    async fn insert_freeze_record(&mut self, record: &FreezeRecord) -> Result<(), StoreError> {
        sqlx::query(
            r"
            INSERT INTO freeze_records (
                id, booking_id, freeze_start, duration_months, reactivate_on, reason, created_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7)
            ",
        )
        .bind(record.id.as_uuid())
        .bind(record.booking_id.as_uuid())
        .bind(record.freeze_start)
        .bind(i64::from(record.duration_months))
        .bind(record.reactivate_on)
        .bind(record.reason.as_deref())
        .bind(record.created_at)
        .execute(&mut *self.tx)
        .await
        .map_err(db_error)?;
        Ok(())
    }

    async fn freeze_records_for(&mut self, booking_id: BookingId) -> Result<Vec<FreezeRecord>, StoreError> {
        let sql = format!(
            "SELECT {FREEZE_COLUMNS} FROM freeze_records WHERE booking_id = $1 ORDER BY seq"
        );
        let records = sqlx::query(&sql)
            .bind(booking_id.as_uuid())
            .fetch_all(&mut *self.tx)
            .await
            .map_err(db_error)?;
        records.iter().map(row_to_freeze).collect()
    }

    async fn delete_freeze_records(&mut self, booking_id: BookingId) -> Result<u64, StoreError> {
        let result = sqlx::query("DELETE FROM freeze_records WHERE booking_id = $1")
            .bind(booking_id.as_uuid())
            .execute(&mut *self.tx)
            .await
            .map_err(db_error)?;
        Ok(result.rows_affected())
    }

    async fn upsert_cancel_record(&mut self, record: &CancelRecord) -> Result<(), StoreError> {
        sqlx::query(
            r"
            INSERT INTO cancel_records (booking_id, reason, note, classification, effective_on, created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (booking_id) DO UPDATE SET
                reason = EXCLUDED.reason,
                note = EXCLUDED.note,
                classification = EXCLUDED.classification,
                effective_on = EXCLUDED.effective_on,
                created_at = EXCLUDED.created_at
            ",
        )
        .bind(record.booking_id.as_uuid())
        .bind(&record.reason)
        .bind(record.note.as_deref())
        .bind(record.classification.as_str())
        .bind(record.effective_on)
        .bind(record.created_at)
        .execute(&mut *self.tx)
        .await
        .map_err(db_error)?;
        Ok(())
    }

    async fn delete_cancel_record(&mut self, booking_id: BookingId) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM cancel_records WHERE booking_id = $1")
            .bind(booking_id.as_uuid())
            .execute(&mut *self.tx)
            .await
            .map_err(db_error)?;
        Ok(result.rows_affected() > 0)
    }

    async fn insert_seat_hold(&mut self, hold: &SeatHold) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO seat_holds (id, class_session_id, seats, expires_at) VALUES ($1, $2, $3, $4)",
        )
        .bind(hold.id.as_uuid())
        .bind(hold.class_session_id.as_uuid())
        .bind(i64::from(hold.seats))
        .bind(hold.expires_at)
        .execute(&mut *self.tx)
        .await
        .map_err(db_error)?;
        Ok(())
    }

    async fn delete_seat_hold(&mut self, id: HoldId) -> Result<Option<SeatHold>, StoreError> {
        let sql = format!("DELETE FROM seat_holds WHERE id = $1 RETURNING {HOLD_COLUMNS}");
        sqlx::query(&sql)
            .bind(id.as_uuid())
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(db_error)?
            .as_ref()
            .map(row_to_hold)
            .transpose()
    }

    async fn commit(self) -> Result<(), StoreError> {
        self.tx.commit().await.map_err(db_error)
    }

    async fn rollback(self) -> Result<(), StoreError> {
        self.tx.rollback().await.map_err(db_error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use classbook_core::types::Money;

    #[test]
    fn oversized_amounts_are_refused() {
        assert!(matches!(money_param(Money::from_minor(u64::MAX)), Err(StoreError::Conflict(_))));
        assert_eq!(money_param(Money::from_minor(1500)), Ok(1500));
    }
}
