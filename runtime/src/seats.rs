//! Capacity ledger operations.
//!
//! Plain reservations happen inside the unit of work that writes the booking. Paid
//! placements reserve through a [`SeatHold`] instead: the hold is committed before
//! any remote call and later either consumed by the finalizing unit of work or
//! released, by the saga itself or by the stale-hold reaper.

use crate::ServiceContext;
use crate::metrics::BookingMetrics;
use chrono::TimeDelta;
use classbook_core::error::{BookingError, StoreError};
use classbook_core::model::SeatHold;
use classbook_core::store::{BookingStore, UnitOfWork};
use classbook_core::types::{ClassSessionId, HoldId};

/// Decrement capacity, counting refusals.
///
/// # Errors
///
/// [`BookingError::CapacityExceeded`] when fewer than `seats` remain.
pub async fn reserve<T: UnitOfWork>(
    tx: &mut T,
    class_session_id: ClassSessionId,
    seats: u32,
) -> Result<u32, BookingError> {
    match tx.reserve_capacity(class_session_id, seats).await {
        Ok(remaining) => Ok(remaining),
        Err(error @ StoreError::CapacityExceeded { .. }) => {
            BookingMetrics::record_capacity_rejection();
            tracing::info!(
                class_session_id = %class_session_id,
                seats,
                "Reservation refused: session full"
            );
            Err(error.into())
        },
        Err(error) => Err(error.into()),
    }
}

/// Reserve seats and record a hold in its own short unit of work.
///
/// # Errors
///
/// [`BookingError::CapacityExceeded`] when the seats are not available.
pub async fn hold<S: BookingStore>(
    ctx: &ServiceContext<S>,
    class_session_id: ClassSessionId,
    seats: u32,
) -> Result<SeatHold, BookingError> {
    let ttl = TimeDelta::from_std(ctx.settings.hold_ttl).unwrap_or(TimeDelta::minutes(15));
    let hold = SeatHold {
        id: HoldId::new(),
        class_session_id,
        seats,
        expires_at: ctx.clock.now() + ttl,
    };

    let mut tx = ctx.store.begin().await?;
    reserve(&mut tx, class_session_id, seats).await?;
    tx.insert_seat_hold(&hold).await?;
    tx.commit().await?;

    tracing::debug!(hold_id = %hold.id, class_session_id = %class_session_id, seats, "Seats held");
    Ok(hold)
}

/// Turn a hold into a permanent reservation inside `tx`.
///
/// If the reaper already returned the seats, they are reserved again.
///
/// # Errors
///
/// [`BookingError::CapacityExceeded`] when the hold expired and the seats are gone.
pub async fn consume<T: UnitOfWork>(tx: &mut T, hold: &SeatHold) -> Result<(), BookingError> {
    if tx.delete_seat_hold(hold.id).await?.is_none() {
        tracing::warn!(hold_id = %hold.id, "Seat hold expired before commit; reserving again");
        reserve(tx, hold.class_session_id, hold.seats).await?;
    }
    Ok(())
}

/// Delete a hold and return its seats inside `tx`. Returns whether the hold still existed.
///
/// # Errors
///
/// Storage failures.
pub async fn release<T: UnitOfWork>(tx: &mut T, id: HoldId) -> Result<bool, BookingError> {
    match tx.delete_seat_hold(id).await? {
        Some(hold) => {
            tx.release_capacity(hold.class_session_id, hold.seats).await?;
            Ok(true)
        },
        None => Ok(false),
    }
}

/// [`release`] in its own unit of work.
///
/// # Errors
///
/// Storage failures.
pub async fn release_now<S: BookingStore>(
    ctx: &ServiceContext<S>,
    id: HoldId,
) -> Result<bool, BookingError> {
    let mut tx = ctx.store.begin().await?;
    let released = release(&mut tx, id).await?;
    tx.commit().await?;
    Ok(released)
}
