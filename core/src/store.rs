//! Persistence ports.
//!
//! [`BookingStore`] serves reads and opens [`UnitOfWork`]s. A unit of work is one atomic
//! commit/rollback boundary covering capacity mutation and every booking-scoped write
//! made inside it. Dropping a unit of work without calling [`UnitOfWork::commit`] rolls
//! it back.
//!
//! # Locking
//!
//! [`UnitOfWork::session_capacity`] locks the session row until the unit of work ends,
//! so concurrent reservations against one session serialize. Callers must not await
//! remote calls while a unit of work is open, and must not issue [`BookingStore`] reads
//! from the same task while holding one.

use crate::error::StoreError;
use crate::model::{
    Booking, CancelRecord, ClassSession, FreezeRecord, PortalAccount, SeatHold, Student,
};
use crate::payment::{PaymentAttempt, PaymentPlan};
use crate::status::BookingStatus;
use crate::types::{BookingId, ClassSessionId, HoldId, PlanId};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// Read side of the booking store and factory for units of work.
#[async_trait]
pub trait BookingStore: Send + Sync + 'static {
    /// Unit of work type
    type Tx: UnitOfWork;

    /// Open a unit of work.
    async fn begin(&self) -> Result<Self::Tx, StoreError>;

    /// Load a class session (unlocked read).
    async fn class_session(&self, id: ClassSessionId) -> Result<Option<ClassSession>, StoreError>;

    /// Load a payment plan.
    async fn payment_plan(&self, id: PlanId) -> Result<Option<PaymentPlan>, StoreError>;

    /// Load a booking.
    async fn booking(&self, id: BookingId) -> Result<Option<Booking>, StoreError>;

    /// Students of a booking, ordered by position.
    async fn students(&self, booking_id: BookingId) -> Result<Vec<Student>, StoreError>;

    /// Bookings currently in `status`.
    async fn bookings_by_status(&self, status: BookingStatus) -> Result<Vec<Booking>, StoreError>;

    /// Most recent payment attempt of a booking.
    async fn latest_payment_attempt(
        &self,
        booking_id: BookingId,
    ) -> Result<Option<PaymentAttempt>, StoreError>;

    /// All payment attempts of a booking, oldest first.
    async fn payment_attempts(&self, booking_id: BookingId) -> Result<Vec<PaymentAttempt>, StoreError>;

    /// Attempt by its provider reference.
    async fn payment_attempt_by_reference(
        &self,
        provider_reference: &str,
    ) -> Result<Option<PaymentAttempt>, StoreError>;

    /// Every freeze record.
    async fn freeze_records(&self) -> Result<Vec<FreezeRecord>, StoreError>;

    /// Freeze records of one booking.
    async fn freeze_records_for(&self, booking_id: BookingId) -> Result<Vec<FreezeRecord>, StoreError>;

    /// Cancel record of a booking.
    async fn cancel_record(&self, booking_id: BookingId) -> Result<Option<CancelRecord>, StoreError>;

    /// Portal account by email (case-insensitive).
    async fn portal_account_by_email(&self, email: &str) -> Result<Option<PortalAccount>, StoreError>;

    /// Seat holds whose expiry is at or before `now`.
    async fn expired_seat_holds(&self, now: DateTime<Utc>) -> Result<Vec<SeatHold>, StoreError>;
}

/// One atomic boundary of local writes.
#[async_trait]
pub trait UnitOfWork: Send {
    /// Lock the session row and return its remaining capacity.
    async fn session_capacity(&mut self, id: ClassSessionId) -> Result<u32, StoreError>;

    /// Decrement capacity by `seats`.
    ///
    /// Fails with [`StoreError::CapacityExceeded`] if fewer than `seats` remain.
    /// Returns the remaining capacity.
    async fn reserve_capacity(&mut self, id: ClassSessionId, seats: u32) -> Result<u32, StoreError>;

    /// Increment capacity by `seats`. Returns the remaining capacity.
    async fn release_capacity(&mut self, id: ClassSessionId, seats: u32) -> Result<u32, StoreError>;

    /// Load a booking with a row lock.
    async fn lock_booking(&mut self, id: BookingId) -> Result<Booking, StoreError>;

    /// Insert a new booking.
    async fn insert_booking(&mut self, booking: &Booking) -> Result<(), StoreError>;

    /// Overwrite a booking.
    async fn update_booking(&mut self, booking: &Booking) -> Result<(), StoreError>;

    /// Insert the students of a booking with their parents and contacts.
    async fn insert_students(&mut self, students: &[Student]) -> Result<(), StoreError>;

    /// Insert or update a portal account keyed by email.
    async fn upsert_portal_account(&mut self, account: &PortalAccount) -> Result<(), StoreError>;

    /// Insert a payment attempt.
    async fn insert_payment_attempt(&mut self, attempt: &PaymentAttempt) -> Result<(), StoreError>;

    /// Overwrite a payment attempt in place.
    async fn update_payment_attempt(&mut self, attempt: &PaymentAttempt) -> Result<(), StoreError>;

    /// Insert a freeze record.
    async fn insert_freeze_record(&mut self, record: &FreezeRecord) -> Result<(), StoreError>;

    /// Freeze records of a booking as seen inside this unit of work, oldest first.
    ///
    /// Callers hold the booking lock, so no other unit of work can add one meanwhile.
    async fn freeze_records_for(&mut self, booking_id: BookingId) -> Result<Vec<FreezeRecord>, StoreError>;

    /// Delete every freeze record of a booking. Returns how many were deleted.
    async fn delete_freeze_records(&mut self, booking_id: BookingId) -> Result<u64, StoreError>;

    /// Insert or replace the cancel record of a booking.
    async fn upsert_cancel_record(&mut self, record: &CancelRecord) -> Result<(), StoreError>;

    /// Delete the cancel record of a booking. Returns whether one existed.
    async fn delete_cancel_record(&mut self, booking_id: BookingId) -> Result<bool, StoreError>;

    /// Insert a seat hold.
    async fn insert_seat_hold(&mut self, hold: &SeatHold) -> Result<(), StoreError>;

    /// Delete a seat hold, returning it if it still existed.
    async fn delete_seat_hold(&mut self, id: HoldId) -> Result<Option<SeatHold>, StoreError>;

    /// Make every write visible atomically.
    async fn commit(self) -> Result<(), StoreError>;

    /// Discard every write.
    async fn rollback(self) -> Result<(), StoreError>;
}
