//! Persisted records.

use crate::status::{BookingStatus, ServiceKind};
use crate::error::StoreError;
use crate::types::{
    AccountId, ActorId, BookingId, BookingReference, ClassSessionId, FreezeId, HoldId, ParentId,
    PlanId, StudentId,
};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A scheduled class occurrence with a seat capacity.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassSession {
    /// Session ID
    pub id: ClassSessionId,
    /// Display name
    pub name: String,
    /// Remaining seats; never negative
    pub capacity: u32,
}

/// Trial-only fields, cleared on conversion to membership.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrialDetails {
    /// Date of the trial class
    pub trial_date: NaiveDate,
    /// How many times the trial has been rebooked
    pub rebook_count: u32,
}

/// A booking for one or more students in a class session.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Booking {
    /// Booking ID
    pub id: BookingId,
    /// External reference code
    pub reference: BookingReference,
    /// Class session the seats are in
    pub class_session_id: ClassSessionId,
    /// Trial or membership
    pub service_kind: ServiceKind,
    /// Canonical status
    pub status: BookingStatus,
    /// Plan for memberships
    pub payment_plan_id: Option<PlanId>,
    /// Staff member who booked; `None` for public self-service
    pub booked_by: Option<ActorId>,
    /// Preferred or actual start date
    pub start_date: NaiveDate,
    /// Number of seats (one per student)
    pub seats: u32,
    /// Trial-only fields
    pub trial: Option<TrialDetails>,
    /// When created
    pub created_at: DateTime<Utc>,
    /// When last updated
    pub updated_at: DateTime<Utc>,
}

impl Booking {
    /// Whether the booking is a trial.
    #[must_use]
    pub fn is_trial(&self) -> bool {
        self.service_kind == ServiceKind::Trial
    }
}

/// Parent or guardian of a student.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Parent {
    /// Parent ID
    pub id: ParentId,
    /// First name
    pub first_name: String,
    /// Last name
    pub last_name: String,
    /// Email; the first parent's email keys the portal account
    pub email: String,
    /// Phone
    pub phone: Option<String>,
    /// Relationship to the student
    pub relationship: Option<String>,
}

/// Person to call in an emergency.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmergencyContact {
    /// Full name
    pub name: String,
    /// Phone
    pub phone: String,
    /// Relationship to the student
    pub relationship: Option<String>,
}

/// A child attending under a booking.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Student {
    /// Student ID
    pub id: StudentId,
    /// Owning booking
    pub booking_id: BookingId,
    /// Order within the booking; position 0 is the privileged first student
    pub position: u32,
    /// First name
    pub first_name: String,
    /// Last name
    pub last_name: String,
    /// Date of birth
    pub date_of_birth: NaiveDate,
    /// Medical notes
    pub medical_notes: Option<String>,
    /// Parents
    pub parents: Vec<Parent>,
    /// Emergency contact
    pub emergency_contact: Option<EmergencyContact>,
}

/// Kind of portal account.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccountKind {
    /// Parent portal account
    Parent,
    /// Staff account; never overwritten by booking data
    Staff,
}

impl AccountKind {
    /// Convert to storage representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Parent => "parent",
            Self::Staff => "staff",
        }
    }

    /// Parse from storage representation.
    ///
    /// # Errors
    ///
    /// Returns error if the string doesn't match a known kind.
    pub fn parse(s: &str) -> Result<Self, StoreError> {
        match s {
            "parent" => Ok(Self::Parent),
            "staff" => Ok(Self::Staff),
            _ => Err(StoreError::Corrupt(format!("Invalid account kind: {s}"))),
        }
    }
}

/// Parent portal account, synced from the first parent of the first student.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortalAccount {
    /// Account ID
    pub id: AccountId,
    /// Unique email
    pub email: String,
    /// First name
    pub first_name: String,
    /// Last name
    pub last_name: String,
    /// Phone
    pub phone: Option<String>,
    /// Kind
    pub kind: AccountKind,
}

/// A membership pause window.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FreezeRecord {
    /// Record ID
    pub id: FreezeId,
    /// Frozen booking
    pub booking_id: BookingId,
    /// First frozen day
    pub freeze_start: NaiveDate,
    /// Length of the freeze
    pub duration_months: u32,
    /// Day the booking becomes active again
    pub reactivate_on: NaiveDate,
    /// Why
    pub reason: Option<String>,
    /// When created
    pub created_at: DateTime<Utc>,
}

/// Why a booking was cancelled.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CancelClassification {
    /// Membership cancellation
    MembershipCancel,
    /// Transfer to another venue or class
    Transfer,
    /// Removal from the waiting list
    WaitingListRemove,
}

impl CancelClassification {
    /// Convert to storage representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::MembershipCancel => "membership_cancel",
            Self::Transfer => "transfer",
            Self::WaitingListRemove => "waiting_list_remove",
        }
    }

    /// Parse from storage representation.
    ///
    /// # Errors
    ///
    /// Returns error if the string doesn't match a known classification.
    pub fn parse(s: &str) -> Result<Self, StoreError> {
        match s {
            "membership_cancel" => Ok(Self::MembershipCancel),
            "transfer" => Ok(Self::Transfer),
            "waiting_list_remove" => Ok(Self::WaitingListRemove),
            _ => Err(StoreError::Corrupt(format!("Invalid cancel classification: {s}"))),
        }
    }
}

impl fmt::Display for CancelClassification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Cancellation details; at most one per booking.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancelRecord {
    /// Cancelled booking
    pub booking_id: BookingId,
    /// Reason code chosen by staff or parent
    pub reason: String,
    /// Free-text note
    pub note: Option<String>,
    /// Classification
    pub classification: CancelClassification,
    /// Effective date for a requested cancellation
    pub effective_on: Option<NaiveDate>,
    /// When created
    pub created_at: DateTime<Utc>,
}

/// Seats taken out of a session while remote payment calls run.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeatHold {
    /// Hold ID
    pub id: HoldId,
    /// Session the seats were reserved in
    pub class_session_id: ClassSessionId,
    /// Seats held
    pub seats: u32,
    /// After this instant the reaper returns the seats
    pub expires_at: DateTime<Utc>,
}
