//! Integration tests for payment retries and out-of-band reconciliation.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

mod common;

use classbook_core::payment::{GatewayKind, PaymentStatus};
use classbook_core::request::{BookingOrigin, OperationStatus};
use classbook_core::status::{BookingStatus, ServiceKind};
use classbook_core::store::BookingStore;
use classbook_core::types::{ActorId, BookingId};
use classbook_testing::fixtures::{
    attempt, bank_payer, booking, card_payer, direct_debit_payer, monthly_plan, pay, session,
};
use common::Harness;
use serde_json::json;

async fn booking_with_attempt(h: &Harness, gateway: GatewayKind, status: PaymentStatus) -> (BookingId, String) {
    let session_id = h.store.seed_session(session(3)).await;
    let seeded = booking(BookingStatus::Active, ServiceKind::Trial, session_id);
    let payment = attempt(&seeded, gateway, status);
    let reference = payment.provider_reference.clone().unwrap();
    let id = h.store.seed_booking(seeded).await;
    h.store.seed_attempt(payment).await;
    (id, reference)
}

fn staff() -> BookingOrigin {
    BookingOrigin::Staff(ActorId::new())
}

// ============================================================================
// Retry
// ============================================================================

#[tokio::test]
async fn retry_overwrites_the_failed_attempt() {
    let h = Harness::new();
    let (id, _) = booking_with_attempt(&h, GatewayKind::Card, PaymentStatus::Failed).await;

    let outcome = h.classbook.retries().retry_payment(id, card_payer(), staff()).await.unwrap();

    assert_eq!(outcome.status, OperationStatus::Applied);
    assert_eq!(outcome.payment_status, Some(PaymentStatus::Paid));
    let attempts = h.store.payment_attempts(id).await.unwrap();
    assert_eq!(attempts.len(), 1);
    assert_eq!(attempts[0].status, PaymentStatus::Paid);
    assert_eq!(attempts[0].retry_count, 1);
    assert_eq!(attempts[0].failure_reason, None);
    assert_eq!(attempts[0].metadata["history"][0]["action"], "retry_payment");
    assert_eq!(h.card.charges()[0].amount, 4500);
}

#[tokio::test]
async fn retrying_a_settled_payment_is_a_no_op() {
    let h = Harness::new();
    let (id, _) = booking_with_attempt(&h, GatewayKind::Card, PaymentStatus::Failed).await;
    h.classbook.retries().retry_payment(id, card_payer(), staff()).await.unwrap();

    let again = h.classbook.retries().retry_payment(id, card_payer(), staff()).await.unwrap();

    assert_eq!(again.status, OperationStatus::NoOp);
    assert_eq!(again.payment_status, Some(PaymentStatus::Paid));
    assert_eq!(h.card.charges().len(), 1);
    assert_eq!(h.store.payment_attempts(id).await.unwrap()[0].retry_count, 1);
}

#[tokio::test]
async fn failed_retry_still_counts() {
    let h = Harness::new();
    let (id, _) = booking_with_attempt(&h, GatewayKind::Card, PaymentStatus::Failed).await;
    h.card.decline_next();

    let error = h.classbook.retries().retry_payment(id, card_payer(), staff()).await.unwrap_err();

    assert_eq!(error.reason(), "gateway_error");
    let attempts = h.store.payment_attempts(id).await.unwrap();
    assert_eq!(attempts.len(), 1);
    assert_eq!(attempts[0].status, PaymentStatus::Failed);
    assert_eq!(attempts[0].retry_count, 1);
    assert!(!h.audit.entries()[0].success);
}

#[tokio::test]
async fn retry_can_switch_payment_method() {
    let h = Harness::new();
    let (id, _) = booking_with_attempt(&h, GatewayKind::Card, PaymentStatus::Failed).await;

    let outcome = h.classbook.retries().retry_payment(id, bank_payer(), staff()).await.unwrap();

    assert_eq!(outcome.payment_status, Some(PaymentStatus::Pending));
    let latest = h.store.latest_payment_attempt(id).await.unwrap().unwrap();
    assert_eq!(latest.gateway, GatewayKind::BankTransfer);
}

#[tokio::test]
async fn retry_without_an_attempt_is_not_found() {
    let h = Harness::new();
    let session_id = h.store.seed_session(session(3)).await;
    let id = h
        .store
        .seed_booking(booking(BookingStatus::Active, ServiceKind::Trial, session_id))
        .await;

    let error = h.classbook.retries().retry_payment(id, card_payer(), staff()).await.unwrap_err();

    assert_eq!(error.reason(), "not_found");
    assert!(h.card.charges().is_empty());
}

#[tokio::test]
async fn retry_never_touches_the_booking() {
    let h = Harness::new();
    let (id, _) = booking_with_attempt(&h, GatewayKind::Card, PaymentStatus::Failed).await;
    let before = h.store.snapshot().await;

    h.classbook.retries().retry_payment(id, card_payer(), staff()).await.unwrap();

    let after = h.store.snapshot().await;
    assert_eq!(after.bookings, before.bookings);
    assert_eq!(after.students.len(), before.students.len());
    assert_eq!(after.sessions, before.sessions);
}

#[tokio::test]
async fn retry_after_a_declined_promotion_takes_the_seat() {
    let h = Harness::new();
    let session_id = h.store.seed_session(session(2)).await;
    let id = h
        .store
        .seed_booking(booking(BookingStatus::WaitingList, ServiceKind::Trial, session_id))
        .await;
    h.card.decline_next();
    h.classbook
        .bookings()
        .promote(id, Some(pay(card_payer(), 1500)), staff())
        .await
        .unwrap_err();
    let parked = h.store.latest_payment_attempt(id).await.unwrap().unwrap();
    assert_eq!(parked.metadata["pending_action"]["action"], "promote");

    let outcome = h.classbook.retries().retry_payment(id, card_payer(), staff()).await.unwrap();

    assert_eq!(outcome.status, OperationStatus::Applied);
    assert_eq!(outcome.booking_status, BookingStatus::Active);
    assert_eq!(outcome.payment_status, Some(PaymentStatus::Paid));
    assert_eq!(h.store.capacity(session_id).await, Some(1));
    assert!(h.store.all_holds().await.is_empty());
    let attempts = h.store.payment_attempts(id).await.unwrap();
    assert_eq!(attempts.len(), 1);
    assert_eq!(attempts[0].status, PaymentStatus::Paid);
    assert!(attempts[0].metadata.get("pending_action").is_none());
    assert_eq!(h.card.charges()[1].amount, 1500);
}

#[tokio::test]
async fn retry_after_a_declined_conversion_applies_the_plan() {
    let h = Harness::new();
    let session_id = h.store.seed_session(session(2)).await;
    let id = h
        .store
        .seed_booking(booking(BookingStatus::Attended, ServiceKind::Trial, session_id))
        .await;
    let plan_id = h.store.seed_plan(monthly_plan()).await;
    h.card.decline_next();
    h.classbook
        .bookings()
        .convert_to_membership(id, plan_id, Some(pay(card_payer(), 5000)), staff())
        .await
        .unwrap_err();

    let outcome = h.classbook.retries().retry_payment(id, card_payer(), staff()).await.unwrap();

    assert_eq!(outcome.booking_status, BookingStatus::Active);
    let converted = h.store.booking(id).await.unwrap().unwrap();
    assert_eq!(converted.service_kind, ServiceKind::Membership);
    assert_eq!(converted.payment_plan_id, Some(plan_id));
    assert!(converted.trial.is_none());
    assert_eq!(h.card.charges().len(), 2);
    assert_eq!(h.card.charges()[1].amount, 5000);
    assert_eq!(h.store.capacity(session_id).await, Some(2));
}

#[tokio::test]
async fn conversion_retry_by_direct_debit_uses_the_new_plan() {
    let h = Harness::new();
    let session_id = h.store.seed_session(session(2)).await;
    let id = h
        .store
        .seed_booking(booking(BookingStatus::Attended, ServiceKind::Trial, session_id))
        .await;
    let plan_id = h.store.seed_plan(monthly_plan()).await;
    h.card.decline_next();
    h.classbook
        .bookings()
        .convert_to_membership(id, plan_id, Some(pay(card_payer(), 5000)), staff())
        .await
        .unwrap_err();

    let outcome = h
        .classbook
        .retries()
        .retry_payment(id, direct_debit_payer(), staff())
        .await
        .unwrap();

    assert_eq!(outcome.payment_status, Some(PaymentStatus::Active));
    assert_eq!(h.debit.contracts().len(), 1);
    let converted = h.store.booking(id).await.unwrap().unwrap();
    assert_eq!(converted.service_kind, ServiceKind::Membership);
    assert_eq!(converted.payment_plan_id, Some(plan_id));
}

#[tokio::test]
async fn parked_promotion_into_a_full_session_is_not_charged() {
    let h = Harness::new();
    let session_id = h.store.seed_session(session(1)).await;
    let id = h
        .store
        .seed_booking(booking(BookingStatus::WaitingList, ServiceKind::Trial, session_id))
        .await;
    h.card.decline_next();
    h.classbook
        .bookings()
        .promote(id, Some(pay(card_payer(), 1500)), staff())
        .await
        .unwrap_err();
    let mut full = session(0);
    full.id = session_id;
    h.store.seed_session(full).await;

    let error = h.classbook.retries().retry_payment(id, card_payer(), staff()).await.unwrap_err();

    assert_eq!(error.reason(), "capacity_exceeded");
    assert_eq!(h.card.charges().len(), 1);
    assert_eq!(h.store.booking(id).await.unwrap().unwrap().status, BookingStatus::WaitingList);
    assert!(h.store.all_holds().await.is_empty());
}

// ============================================================================
// Reconciliation
// ============================================================================

#[tokio::test]
async fn late_confirmation_settles_a_pending_transfer() {
    let h = Harness::new();
    let (id, reference) = booking_with_attempt(&h, GatewayKind::BankTransfer, PaymentStatus::Pending).await;
    let payload = json!({"billing_requests": {"id": reference, "status": "fulfilled"}});

    let outcome = h.classbook.reconciler().reconcile(&reference, payload.clone()).await.unwrap();

    assert_eq!(outcome.status, OperationStatus::Applied);
    assert_eq!(outcome.booking_id, Some(id));
    assert_eq!(outcome.previous, PaymentStatus::Pending);
    assert_eq!(outcome.current, PaymentStatus::Paid);

    let stored = h.store.latest_payment_attempt(id).await.unwrap().unwrap();
    assert_eq!(stored.status, PaymentStatus::Paid);
    assert_eq!(stored.raw_response, payload);
    assert!(stored.metadata.get("reconciled_at").is_some());
    assert_eq!(h.store.booking(id).await.unwrap().unwrap().status, BookingStatus::Active);

    let repeated = h.classbook.reconciler().reconcile(&reference, payload).await.unwrap();
    assert_eq!(repeated.status, OperationStatus::NoOp);
}

#[tokio::test]
async fn settled_payments_never_go_back_to_pending() {
    let h = Harness::new();
    let (id, reference) = booking_with_attempt(&h, GatewayKind::BankTransfer, PaymentStatus::Paid).await;

    let outcome = h
        .classbook
        .reconciler()
        .reconcile(&reference, json!({"billing_requests": {"status": "pending"}}))
        .await
        .unwrap();

    assert_eq!(outcome.status, OperationStatus::NoOp);
    assert_eq!(outcome.current, PaymentStatus::Paid);
    let stored = h.store.latest_payment_attempt(id).await.unwrap().unwrap();
    assert_eq!(stored.status, PaymentStatus::Paid);
}

#[tokio::test]
async fn failed_confirmation_records_a_reason() {
    let h = Harness::new();
    let (id, reference) = booking_with_attempt(&h, GatewayKind::BankTransfer, PaymentStatus::Pending).await;

    let outcome = h
        .classbook
        .reconciler()
        .reconcile(&reference, json!({"billing_requests": {"status": "failed"}}))
        .await
        .unwrap();

    assert_eq!(outcome.current, PaymentStatus::Failed);
    let stored = h.store.latest_payment_attempt(id).await.unwrap().unwrap();
    assert_eq!(stored.failure_reason.as_deref(), Some("declined"));
    let entry = &h.audit.entries()[0];
    assert_eq!(entry.module, "payment");
    assert_eq!(entry.action, "reconcile");
}

#[tokio::test]
async fn unknown_reference_is_not_found() {
    let h = Harness::new();

    let error = h
        .classbook
        .reconciler()
        .reconcile("BRQ-missing", json!({"status": "fulfilled"}))
        .await
        .unwrap_err();

    assert_eq!(error.reason(), "not_found");
}
