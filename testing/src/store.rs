//! In-memory booking store.
//!
//! A unit of work takes the store's async mutex for its whole lifetime, which
//! serializes concurrent units of work the way a session row lock does. Writes go to
//! a working copy that replaces the tables on commit; dropping the unit of work
//! discards it.

use crate::lock;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use classbook_core::error::StoreError;
use classbook_core::model::{
    Booking, CancelRecord, ClassSession, FreezeRecord, PortalAccount, SeatHold, Student,
};
use classbook_core::payment::{PaymentAttempt, PaymentPlan};
use classbook_core::status::BookingStatus;
use classbook_core::store::{BookingStore, UnitOfWork};
use classbook_core::types::{BookingId, ClassSessionId, HoldId, PlanId};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::{Barrier, Mutex as AsyncMutex, OwnedMutexGuard};

/// Every table of the store.
#[derive(Clone, Debug, Default)]
pub struct Tables {
    /// Class sessions
    pub sessions: HashMap<ClassSessionId, ClassSession>,
    /// Payment plans
    pub plans: HashMap<PlanId, PaymentPlan>,
    /// Bookings
    pub bookings: HashMap<BookingId, Booking>,
    /// Students in insertion order
    pub students: Vec<Student>,
    /// Portal accounts
    pub accounts: Vec<PortalAccount>,
    /// Payment attempts in insertion order
    pub attempts: Vec<PaymentAttempt>,
    /// Freeze records
    pub freezes: Vec<FreezeRecord>,
    /// Cancel records
    pub cancels: HashMap<BookingId, CancelRecord>,
    /// Seat holds
    pub holds: HashMap<HoldId, SeatHold>,
}

#[derive(Debug)]
struct BeginGate {
    barrier: Arc<Barrier>,
    remaining: usize,
}

/// In-memory [`BookingStore`].
#[derive(Clone, Debug, Default)]
pub struct InMemoryStore {
    tables: Arc<AsyncMutex<Tables>>,
    gate: Arc<Mutex<Option<BeginGate>>>,
}

impl InMemoryStore {
    /// Empty store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `parties` calls to [`BookingStore::begin`] wait for each other.
    ///
    /// Lets a test line up concurrent requests after their unlocked reads so they
    /// contend on the unit of work.
    pub fn gate_next_begins(&self, parties: usize) {
        *lock(&self.gate) = Some(BeginGate {
            barrier: Arc::new(Barrier::new(parties)),
            remaining: parties,
        });
    }

    fn take_gate(&self) -> Option<Arc<Barrier>> {
        let mut gate = lock(&self.gate);
        let current = gate.as_mut()?;
        current.remaining -= 1;
        let barrier = Arc::clone(&current.barrier);
        if current.remaining == 0 {
            *gate = None;
        }
        Some(barrier)
    }

    /// Insert a class session, returning its ID.
    pub async fn seed_session(&self, session: ClassSession) -> ClassSessionId {
        let id = session.id;
        self.tables.lock().await.sessions.insert(id, session);
        id
    }

    /// Insert a payment plan, returning its ID.
    pub async fn seed_plan(&self, plan: PaymentPlan) -> PlanId {
        let id = plan.id;
        self.tables.lock().await.plans.insert(id, plan);
        id
    }

    /// Insert a booking directly, returning its ID.
    pub async fn seed_booking(&self, booking: Booking) -> BookingId {
        let id = booking.id;
        self.tables.lock().await.bookings.insert(id, booking);
        id
    }

    /// Insert a portal account directly.
    pub async fn seed_account(&self, account: PortalAccount) {
        self.tables.lock().await.accounts.push(account);
    }

    /// Insert a payment attempt directly.
    pub async fn seed_attempt(&self, attempt: PaymentAttempt) {
        self.tables.lock().await.attempts.push(attempt);
    }

    /// Insert a freeze record directly.
    pub async fn seed_freeze(&self, record: FreezeRecord) {
        self.tables.lock().await.freezes.push(record);
    }

    /// Insert a cancel record directly.
    pub async fn seed_cancel(&self, record: CancelRecord) {
        self.tables.lock().await.cancels.insert(record.booking_id, record);
    }

    /// Insert a seat hold directly (capacity is not touched).
    pub async fn seed_hold(&self, hold: SeatHold) {
        self.tables.lock().await.holds.insert(hold.id, hold);
    }

    /// Remaining capacity of a session.
    pub async fn capacity(&self, id: ClassSessionId) -> Option<u32> {
        self.tables.lock().await.sessions.get(&id).map(|s| s.capacity)
    }

    /// Copy of every table.
    pub async fn snapshot(&self) -> Tables {
        self.tables.lock().await.clone()
    }

    /// Number of bookings.
    pub async fn booking_count(&self) -> usize {
        self.tables.lock().await.bookings.len()
    }

    /// Number of students.
    pub async fn student_count(&self) -> usize {
        self.tables.lock().await.students.len()
    }

    /// All payment attempts.
    pub async fn all_attempts(&self) -> Vec<PaymentAttempt> {
        self.tables.lock().await.attempts.clone()
    }

    /// All seat holds.
    pub async fn all_holds(&self) -> Vec<SeatHold> {
        self.tables.lock().await.holds.values().cloned().collect()
    }

    /// All portal accounts.
    pub async fn all_accounts(&self) -> Vec<PortalAccount> {
        self.tables.lock().await.accounts.clone()
    }
}

#[async_trait]
impl BookingStore for InMemoryStore {
    type Tx = InMemoryTx;

    async fn begin(&self) -> Result<Self::Tx, StoreError> {
        if let Some(barrier) = self.take_gate() {
            barrier.wait().await;
        }
        let guard = Arc::clone(&self.tables).lock_owned().await;
        let working = guard.clone();
        Ok(InMemoryTx { guard, working })
    }

    async fn class_session(&self, id: ClassSessionId) -> Result<Option<ClassSession>, StoreError> {
        Ok(self.tables.lock().await.sessions.get(&id).cloned())
    }

    async fn payment_plan(&self, id: PlanId) -> Result<Option<PaymentPlan>, StoreError> {
        Ok(self.tables.lock().await.plans.get(&id).cloned())
    }

    async fn booking(&self, id: BookingId) -> Result<Option<Booking>, StoreError> {
        Ok(self.tables.lock().await.bookings.get(&id).cloned())
    }

    async fn students(&self, booking_id: BookingId) -> Result<Vec<Student>, StoreError> {
        let tables = self.tables.lock().await;
        let mut students: Vec<Student> = tables
            .students
            .iter()
            .filter(|s| s.booking_id == booking_id)
            .cloned()
            .collect();
        students.sort_by_key(|s| s.position);
        Ok(students)
    }

    async fn bookings_by_status(&self, status: BookingStatus) -> Result<Vec<Booking>, StoreError> {
        let tables = self.tables.lock().await;
        let mut bookings: Vec<Booking> = tables
            .bookings
            .values()
            .filter(|b| b.status == status)
            .cloned()
            .collect();
        bookings.sort_by_key(|b| b.created_at);
        Ok(bookings)
    }

    async fn latest_payment_attempt(
        &self,
        booking_id: BookingId,
    ) -> Result<Option<PaymentAttempt>, StoreError> {
        let tables = self.tables.lock().await;
        Ok(tables
            .attempts
            .iter()
            .rev()
            .find(|a| a.booking_id == Some(booking_id))
            .cloned())
    }

    async fn payment_attempts(&self, booking_id: BookingId) -> Result<Vec<PaymentAttempt>, StoreError> {
        let tables = self.tables.lock().await;
        Ok(tables
            .attempts
            .iter()
            .filter(|a| a.booking_id == Some(booking_id))
            .cloned()
            .collect())
    }

    async fn payment_attempt_by_reference(
        &self,
        provider_reference: &str,
    ) -> Result<Option<PaymentAttempt>, StoreError> {
        let tables = self.tables.lock().await;
        Ok(tables
            .attempts
            .iter()
            .find(|a| a.provider_reference.as_deref() == Some(provider_reference))
            .cloned())
    }

    async fn freeze_records(&self) -> Result<Vec<FreezeRecord>, StoreError> {
        Ok(self.tables.lock().await.freezes.clone())
    }

    async fn freeze_records_for(&self, booking_id: BookingId) -> Result<Vec<FreezeRecord>, StoreError> {
        let tables = self.tables.lock().await;
        Ok(tables
            .freezes
            .iter()
            .filter(|f| f.booking_id == booking_id)
            .cloned()
            .collect())
    }

    async fn cancel_record(&self, booking_id: BookingId) -> Result<Option<CancelRecord>, StoreError> {
        Ok(self.tables.lock().await.cancels.get(&booking_id).cloned())
    }

    async fn portal_account_by_email(&self, email: &str) -> Result<Option<PortalAccount>, StoreError> {
        let tables = self.tables.lock().await;
        Ok(tables
            .accounts
            .iter()
            .find(|a| a.email.eq_ignore_ascii_case(email))
            .cloned())
    }

    async fn expired_seat_holds(&self, now: DateTime<Utc>) -> Result<Vec<SeatHold>, StoreError> {
        let tables = self.tables.lock().await;
        Ok(tables
            .holds
            .values()
            .filter(|h| h.expires_at <= now)
            .cloned()
            .collect())
    }
}

/// Unit of work over [`InMemoryStore`].
pub struct InMemoryTx {
    guard: OwnedMutexGuard<Tables>,
    working: Tables,
}

impl InMemoryTx {
    fn session_mut(&mut self, id: ClassSessionId) -> Result<&mut ClassSession, StoreError> {
        self.working
            .sessions
            .get_mut(&id)
            .ok_or_else(|| StoreError::not_found("class session", id))
    }
}

#[async_trait]
impl UnitOfWork for InMemoryTx {
    async fn session_capacity(&mut self, id: ClassSessionId) -> Result<u32, StoreError> {
        Ok(self.session_mut(id)?.capacity)
    }

    async fn reserve_capacity(&mut self, id: ClassSessionId, seats: u32) -> Result<u32, StoreError> {
        let session = self.session_mut(id)?;
        let remaining = session
            .capacity
            .checked_sub(seats)
            .ok_or(StoreError::CapacityExceeded {
                class_session_id: id,
                requested: seats,
                available: session.capacity,
            })?;
        session.capacity = remaining;
        Ok(remaining)
    }

    async fn release_capacity(&mut self, id: ClassSessionId, seats: u32) -> Result<u32, StoreError> {
        let session = self.session_mut(id)?;
        session.capacity = session.capacity.saturating_add(seats);
        Ok(session.capacity)
    }

    async fn lock_booking(&mut self, id: BookingId) -> Result<Booking, StoreError> {
        self.working
            .bookings
            .get(&id)
            .cloned()
            .ok_or_else(|| StoreError::not_found("booking", id))
    }

    async fn insert_booking(&mut self, booking: &Booking) -> Result<(), StoreError> {
        if self.working.bookings.contains_key(&booking.id) {
            return Err(StoreError::Conflict(format!("booking {} already exists", booking.id)));
        }
        self.working.bookings.insert(booking.id, booking.clone());
        Ok(())
    }

    async fn update_booking(&mut self, booking: &Booking) -> Result<(), StoreError> {
        let existing = self
            .working
            .bookings
            .get_mut(&booking.id)
            .ok_or_else(|| StoreError::not_found("booking", booking.id))?;
        *existing = booking.clone();
        Ok(())
    }

    async fn insert_students(&mut self, students: &[Student]) -> Result<(), StoreError> {
        self.working.students.extend_from_slice(students);
        Ok(())
    }

    async fn upsert_portal_account(&mut self, account: &PortalAccount) -> Result<(), StoreError> {
        match self
            .working
            .accounts
            .iter_mut()
            .find(|a| a.email.eq_ignore_ascii_case(&account.email))
        {
            Some(existing) if existing.kind != account.kind => {
                return Err(StoreError::Conflict(format!(
                    "{} belongs to an account of another kind",
                    account.email
                )));
            },
            Some(existing) => {
                existing.first_name.clone_from(&account.first_name);
                existing.last_name.clone_from(&account.last_name);
                existing.phone.clone_from(&account.phone);
            },
            None => self.working.accounts.push(account.clone()),
        }
        Ok(())
    }

    async fn insert_payment_attempt(&mut self, attempt: &PaymentAttempt) -> Result<(), StoreError> {
        self.working.attempts.push(attempt.clone());
        Ok(())
    }

    async fn update_payment_attempt(&mut self, attempt: &PaymentAttempt) -> Result<(), StoreError> {
        let existing = self
            .working
            .attempts
            .iter_mut()
            .find(|a| a.id == attempt.id)
            .ok_or_else(|| StoreError::not_found("payment attempt", attempt.id))?;
        *existing = attempt.clone();
        Ok(())
    }

    async fn insert_freeze_record(&mut self, record: &FreezeRecord) -> Result<(), StoreError> {
        self.working.freezes.push(record.clone());
        Ok(())
    }

    async fn freeze_records_for(&mut self, booking_id: BookingId) -> Result<Vec<FreezeRecord>, StoreError> {
        Ok(self
            .working
            .freezes
            .iter()
            .filter(|f| f.booking_id == booking_id)
            .cloned()
            .collect())
    }

    async fn delete_freeze_records(&mut self, booking_id: BookingId) -> Result<u64, StoreError> {
        let before = self.working.freezes.len();
        self.working.freezes.retain(|f| f.booking_id != booking_id);
        Ok(u64::try_from(before - self.working.freezes.len()).unwrap_or(u64::MAX))
    }

    async fn upsert_cancel_record(&mut self, record: &CancelRecord) -> Result<(), StoreError> {
        self.working.cancels.insert(record.booking_id, record.clone());
        Ok(())
    }

    async fn delete_cancel_record(&mut self, booking_id: BookingId) -> Result<bool, StoreError> {
        Ok(self.working.cancels.remove(&booking_id).is_some())
    }

    async fn insert_seat_hold(&mut self, hold: &SeatHold) -> Result<(), StoreError> {
        self.working.holds.insert(hold.id, hold.clone());
        Ok(())
    }

    async fn delete_seat_hold(&mut self, id: HoldId) -> Result<Option<SeatHold>, StoreError> {
        Ok(self.working.holds.remove(&id))
    }

    async fn commit(self) -> Result<(), StoreError> {
        let Self { mut guard, working } = self;
        *guard = working;
        Ok(())
    }

    async fn rollback(self) -> Result<(), StoreError> {
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::fixtures;
    use classbook_core::model::AccountKind;
    use classbook_core::types::AccountId;

    #[tokio::test]
    async fn dropped_unit_of_work_rolls_back() {
        let store = InMemoryStore::new();
        let session = store.seed_session(fixtures::session(3)).await;
        {
            let mut tx = store.begin().await.unwrap();
            tx.reserve_capacity(session, 2).await.unwrap();
        }
        assert_eq!(store.capacity(session).await, Some(3));

        let mut tx = store.begin().await.unwrap();
        tx.reserve_capacity(session, 2).await.unwrap();
        tx.commit().await.unwrap();
        assert_eq!(store.capacity(session).await, Some(1));
    }

    #[tokio::test]
    async fn reserve_never_goes_negative() {
        let store = InMemoryStore::new();
        let session = store.seed_session(fixtures::session(1)).await;
        let mut tx = store.begin().await.unwrap();
        let error = tx.reserve_capacity(session, 2).await.unwrap_err();
        assert_eq!(
            error,
            StoreError::CapacityExceeded {
                class_session_id: session,
                requested: 2,
                available: 1
            }
        );
        assert_eq!(tx.session_capacity(session).await.unwrap(), 1);
    }

    fn account(kind: AccountKind, first_name: &str) -> PortalAccount {
        PortalAccount {
            id: AccountId::new(),
            email: "sam@example.com".to_string(),
            first_name: first_name.to_string(),
            last_name: "Jones".to_string(),
            phone: None,
            kind,
        }
    }

    #[tokio::test]
    async fn parent_upsert_never_overwrites_a_staff_account() {
        let store = InMemoryStore::new();
        store.seed_account(account(AccountKind::Staff, "Coach")).await;

        let mut tx = store.begin().await.unwrap();
        let error = tx
            .upsert_portal_account(&account(AccountKind::Parent, "Sam"))
            .await
            .unwrap_err();
        tx.commit().await.unwrap();

        assert!(matches!(error, StoreError::Conflict(_)));
        let accounts = store.all_accounts().await;
        assert_eq!(accounts.len(), 1);
        assert_eq!(accounts[0].kind, AccountKind::Staff);
        assert_eq!(accounts[0].first_name, "Coach");
    }

    #[tokio::test]
    async fn parent_upsert_refreshes_a_parent_account() {
        let store = InMemoryStore::new();
        store.seed_account(account(AccountKind::Parent, "Sam")).await;

        let mut tx = store.begin().await.unwrap();
        tx.upsert_portal_account(&account(AccountKind::Parent, "Samantha"))
            .await
            .unwrap();
        tx.commit().await.unwrap();

        let accounts = store.all_accounts().await;
        assert_eq!(accounts.len(), 1);
        assert_eq!(accounts[0].first_name, "Samantha");
    }
}
