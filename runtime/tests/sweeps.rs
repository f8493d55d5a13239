//! Integration tests for the date-driven background sweeps.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

mod common;

use chrono::TimeDelta;
use classbook_core::model::{CancelClassification, SeatHold};
use classbook_core::payment::{GatewayKind, PaymentStatus};
use classbook_core::request::BookingOrigin;
use classbook_core::status::{BookingStatus, ServiceKind};
use classbook_core::store::BookingStore;
use classbook_core::types::{ActorId, BookingId, HoldId};
use classbook_runtime::{CancelRequest, FreezeRequest, Scheduler, Sweep, SweepReport, SweepSchedule};
use classbook_testing::fixtures::{attempt, booking, date, epoch, session};
use common::Harness;
use std::sync::Arc;

fn staff() -> BookingOrigin {
    BookingOrigin::Staff(ActorId::new())
}

fn sweep(h: &Harness, name: &str) -> Arc<dyn Sweep> {
    h.classbook
        .sweeps(&SweepSchedule::default())
        .into_iter()
        .map(|(sweep, _)| sweep)
        .find(|sweep| sweep.name() == name)
        .unwrap()
}

async fn seeded(h: &Harness, status: BookingStatus, kind: ServiceKind) -> BookingId {
    let session_id = h.store.seed_session(session(2)).await;
    h.store.seed_booking(booking(status, kind, session_id)).await
}

async fn status_of(h: &Harness, id: BookingId) -> BookingStatus {
    h.store.booking(id).await.unwrap().unwrap().status
}

// ============================================================================
// Waiting list expiry
// ============================================================================

#[tokio::test]
async fn waiting_list_entries_expire_after_their_start_date() {
    let h = Harness::new();
    let id = seeded(&h, BookingStatus::WaitingList, ServiceKind::Trial).await;
    let expiry = sweep(&h, "waiting_list");

    let early = expiry.run_once().await.unwrap();
    assert_eq!(early.transitioned, 0);
    assert_eq!(early.skipped, 1);
    assert_eq!(status_of(&h, id).await, BookingStatus::WaitingList);

    h.clock.advance_days(11);
    let due = expiry.run_once().await.unwrap();
    assert_eq!(due.transitioned, 1);
    assert_eq!(status_of(&h, id).await, BookingStatus::Expired);

    let again = expiry.run_once().await.unwrap();
    assert_eq!(again, SweepReport::default());
}

// ============================================================================
// Freeze windows
// ============================================================================

#[tokio::test]
async fn scheduled_freeze_starts_and_ends_on_its_dates() {
    let h = Harness::new();
    let id = seeded(&h, BookingStatus::Active, ServiceKind::Membership).await;
    let request = FreezeRequest {
        start: date(2025, 2, 1),
        duration_months: 1,
        reason: Some("holiday".to_string()),
    };
    h.classbook.freezes().freeze(id, request, staff()).await.unwrap();
    let freezes = sweep(&h, "freeze");

    let before = freezes.run_once().await.unwrap();
    assert_eq!(before.transitioned, 0);
    assert_eq!(status_of(&h, id).await, BookingStatus::Active);

    h.clock.advance_days(31);
    let started = freezes.run_once().await.unwrap();
    assert_eq!(started.transitioned, 1);
    assert_eq!(status_of(&h, id).await, BookingStatus::Frozen);

    let repeated = freezes.run_once().await.unwrap();
    assert_eq!(repeated.transitioned, 0);

    h.clock.advance_days(28);
    let ended = freezes.run_once().await.unwrap();
    assert_eq!(ended.transitioned, 1);
    assert_eq!(status_of(&h, id).await, BookingStatus::Active);
    assert!(h.store.freeze_records_for(id).await.unwrap().is_empty());

    let idle = freezes.run_once().await.unwrap();
    assert_eq!(idle.examined, 0);
}

#[tokio::test]
async fn freeze_that_passed_unapplied_is_cleaned_up() {
    let h = Harness::new();
    let id = seeded(&h, BookingStatus::Active, ServiceKind::Membership).await;
    h.store
        .seed_freeze(classbook_core::model::FreezeRecord {
            id: classbook_core::types::FreezeId::new(),
            booking_id: id,
            freeze_start: date(2024, 11, 1),
            duration_months: 1,
            reactivate_on: date(2024, 12, 1),
            reason: None,
            created_at: epoch(),
        })
        .await;

    let report = sweep(&h, "freeze").run_once().await.unwrap();

    assert_eq!(report.transitioned, 1);
    assert_eq!(status_of(&h, id).await, BookingStatus::Active);
    assert!(h.store.freeze_records_for(id).await.unwrap().is_empty());
}

// ============================================================================
// Requested cancellations
// ============================================================================

#[tokio::test]
async fn requested_cancellation_is_confirmed_on_its_date() {
    let h = Harness::new();
    let id = seeded(&h, BookingStatus::Active, ServiceKind::Membership).await;
    let existing = h.store.booking(id).await.unwrap().unwrap();
    let contract = attempt(&existing, GatewayKind::DirectDebit, PaymentStatus::Active);
    let reference = contract.provider_reference.clone().unwrap();
    h.store.seed_attempt(contract).await;

    let request = CancelRequest {
        reason: "moving_away".to_string(),
        note: None,
        classification: CancelClassification::MembershipCancel,
        effective_on: Some(date(2025, 1, 31)),
    };
    h.classbook.cancellations().cancel(id, request, staff()).await.unwrap();
    assert!(h.debit.pauses().is_empty());
    let pending = sweep(&h, "pending_cancellations");

    let early = pending.run_once().await.unwrap();
    assert_eq!(early.skipped, 1);
    assert_eq!(status_of(&h, id).await, BookingStatus::RequestToCancel);

    h.clock.advance_days(30);
    let due = pending.run_once().await.unwrap();
    assert_eq!(due.transitioned, 1);
    assert_eq!(status_of(&h, id).await, BookingStatus::Cancelled);
    assert_eq!(h.debit.pauses(), vec![(reference, date(2025, 1, 31), None)]);

    let again = pending.run_once().await.unwrap();
    assert_eq!(again.examined, 0);
}

// ============================================================================
// Stale seat holds
// ============================================================================

#[tokio::test]
async fn expired_holds_return_their_seats() {
    let h = Harness::new();
    let session_id = h.store.seed_session(session(2)).await;
    h.store
        .seed_hold(SeatHold {
            id: HoldId::new(),
            class_session_id: session_id,
            seats: 2,
            expires_at: epoch() + TimeDelta::minutes(15),
        })
        .await;
    h.store
        .seed_hold(SeatHold {
            id: HoldId::new(),
            class_session_id: session_id,
            seats: 1,
            expires_at: epoch() + TimeDelta::hours(3),
        })
        .await;
    let reaper = sweep(&h, "stale_holds");

    let fresh = reaper.run_once().await.unwrap();
    assert_eq!(fresh.transitioned, 0);

    h.clock.advance(TimeDelta::hours(1));
    let reaped = reaper.run_once().await.unwrap();
    assert_eq!(reaped.transitioned, 1);
    assert_eq!(h.store.capacity(session_id).await, Some(4));
    assert_eq!(h.store.all_holds().await.len(), 1);
}

// ============================================================================
// Scheduler wiring
// ============================================================================

#[tokio::test]
async fn scheduler_runs_every_sweep() {
    let h = Harness::new();
    let scheduler = Scheduler::new(h.classbook.sweeps(&SweepSchedule::default()));
    assert_eq!(scheduler.sweep_count(), 4);

    let results = scheduler.run_all_once().await;

    let names: Vec<&str> = results.iter().map(|(name, _)| *name).collect();
    assert_eq!(names, vec!["waiting_list", "freeze", "pending_cancellations", "stale_holds"]);
    assert!(results.iter().all(|(_, result)| result.is_ok()));
}
