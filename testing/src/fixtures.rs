//! Test data.
//!
//! Dates are anchored to the [`test_clock`](crate::test_clock) epoch (2025-01-01).

use chrono::{DateTime, NaiveDate, Utc};
use classbook_core::model::{Booking, ClassSession, EmergencyContact, TrialDetails};
use classbook_core::payment::{
    BillingInterval, GatewayKind, PayerDetails, PaymentAttempt, PaymentIntent, PaymentPlan,
    PaymentStatus,
};
use classbook_core::request::{BookingOrigin, BookingRequest, ParentInput, StudentInput};
use classbook_core::status::{BookingStatus, ServiceKind};
use classbook_core::types::{
    AttemptId, BookingId, BookingReference, ClassSessionId, Money, PlanId,
};

/// Name of the direct-debit schedule the fixtures provision.
pub const SCHEDULE: &str = "Monthly Members";

/// `y-m-d`, defaulting to the epoch on an invalid date.
#[must_use]
pub fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap_or_default()
}

/// Test epoch instant.
#[must_use]
pub fn epoch() -> DateTime<Utc> {
    date(2025, 1, 1).and_hms_opt(0, 0, 0).unwrap_or_default().and_utc()
}

/// Class session with `capacity` seats.
#[must_use]
pub fn session(capacity: u32) -> ClassSession {
    ClassSession {
        id: ClassSessionId::new(),
        name: "Saturday Swim 10:00".to_string(),
        capacity,
    }
}

/// Open-ended monthly plan: 45.00 per month plus a 5.00 joining fee.
#[must_use]
pub fn monthly_plan() -> PaymentPlan {
    PaymentPlan {
        id: PlanId::new(),
        name: "Monthly".to_string(),
        price: Money::from_minor(4500),
        joining_fee: Money::from_minor(500),
        duration: 0,
        interval: BillingInterval::Month,
    }
}

/// Card payer with a valid test card.
#[must_use]
pub fn card_payer() -> PayerDetails {
    PayerDetails::Card {
        holder_name: "Sam Jones".to_string(),
        email: "sam@example.com".to_string(),
        number: "4242424242424242".to_string(),
        expiry_month: 12,
        expiry_year: 2030,
        cvv: "123".to_string(),
    }
}

/// Bank transfer payer.
#[must_use]
pub fn bank_payer() -> PayerDetails {
    PayerDetails::BankTransfer {
        first_name: "Sam".to_string(),
        last_name: "Jones".to_string(),
        email: "sam@example.com".to_string(),
        account_number: "55779911".to_string(),
        branch_code: "200000".to_string(),
        country_code: "GB".to_string(),
    }
}

/// Direct-debit payer.
#[must_use]
pub fn direct_debit_payer() -> PayerDetails {
    PayerDetails::DirectDebit {
        first_name: "Sam".to_string(),
        last_name: "Jones".to_string(),
        email: "sam@example.com".to_string(),
        account_number: "55779911".to_string(),
        branch_code: "200000".to_string(),
    }
}

/// Payment intent for `payer` with an explicit amount in minor units.
#[must_use]
pub fn pay(payer: PayerDetails, minor: u64) -> PaymentIntent {
    PaymentIntent {
        payer,
        amount: Some(Money::from_minor(minor)),
    }
}

/// Public trial request for one student, no payment.
#[must_use]
pub fn trial_request(class_session_id: ClassSessionId) -> BookingRequest {
    BookingRequest {
        class_session_id,
        service_kind: ServiceKind::Trial,
        students: vec![student("Mia")],
        parents: vec![ParentInput {
            first_name: "Sam".to_string(),
            last_name: "Jones".to_string(),
            email: "sam@example.com".to_string(),
            phone: Some("07700900123".to_string()),
            relationship: Some("mother".to_string()),
        }],
        emergency_contact: Some(EmergencyContact {
            name: "Alex Jones".to_string(),
            phone: "07700900456".to_string(),
            relationship: Some("aunt".to_string()),
        }),
        payment_plan_id: None,
        payment: None,
        origin: BookingOrigin::Public,
        start_date: date(2025, 1, 11),
    }
}

/// Public membership request for one student on `plan`, no payment.
#[must_use]
pub fn membership_request(class_session_id: ClassSessionId, plan: PlanId) -> BookingRequest {
    BookingRequest {
        service_kind: ServiceKind::Membership,
        payment_plan_id: Some(plan),
        ..trial_request(class_session_id)
    }
}

/// Student input with a given first name.
#[must_use]
pub fn student(first_name: &str) -> StudentInput {
    StudentInput {
        first_name: first_name.to_string(),
        last_name: "Jones".to_string(),
        date_of_birth: date(2018, 6, 14),
        medical_notes: None,
    }
}

/// Persisted booking in `status` for one seat.
#[must_use]
pub fn booking(status: BookingStatus, kind: ServiceKind, class_session_id: ClassSessionId) -> Booking {
    Booking {
        id: BookingId::new(),
        reference: BookingReference::generate(),
        class_session_id,
        service_kind: kind,
        status,
        payment_plan_id: None,
        booked_by: None,
        start_date: date(2025, 1, 11),
        seats: 1,
        trial: (kind == ServiceKind::Trial).then(|| TrialDetails {
            trial_date: date(2025, 1, 11),
            rebook_count: 0,
        }),
        created_at: epoch(),
        updated_at: epoch(),
    }
}

/// Persisted attempt for `booking`.
#[must_use]
pub fn attempt(booking: &Booking, gateway: GatewayKind, status: PaymentStatus) -> PaymentAttempt {
    PaymentAttempt {
        id: AttemptId::new(),
        booking_id: Some(booking.id),
        booking_reference: booking.reference.clone(),
        gateway,
        amount: Money::from_minor(4500),
        status,
        provider_reference: Some(format!("REF-{}", booking.reference)),
        payer_reference: Some("CUST-1".to_string()),
        raw_response: serde_json::json!({"status": status.as_str()}),
        metadata: serde_json::json!({}),
        failure_reason: None,
        retry_count: 0,
        created_at: epoch(),
        updated_at: epoch(),
    }
}
