//! Normalized inbound requests and the outcome returned to callers.

use crate::error::BookingError;
use crate::model::EmergencyContact;
use crate::payment::{PaymentIntent, PaymentStatus};
use crate::status::{BookingStatus, ServiceKind};
use crate::types::{ActorId, BookingId, ClassSessionId, PlanId};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Who initiated the operation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "actor_id", rename_all = "snake_case")]
pub enum BookingOrigin {
    /// Public self-service website
    Public,
    /// Staff member on the admin panel
    Staff(ActorId),
}

impl BookingOrigin {
    /// Actor recorded on the booking.
    #[must_use]
    pub const fn actor(&self) -> Option<ActorId> {
        match self {
            Self::Public => None,
            Self::Staff(actor) => Some(*actor),
        }
    }

    /// Panel name used for templates and audit entries.
    #[must_use]
    pub const fn panel(&self) -> Panel {
        match self {
            Self::Public => Panel::Website,
            Self::Staff(_) => Panel::Admin,
        }
    }
}

/// Surface an operation came from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Panel {
    /// Public website
    Website,
    /// Staff admin panel
    Admin,
}

impl Panel {
    /// Stable name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Website => "website",
            Self::Admin => "admin",
        }
    }
}

/// Student as submitted.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StudentInput {
    /// First name
    pub first_name: String,
    /// Last name
    pub last_name: String,
    /// Date of birth
    pub date_of_birth: NaiveDate,
    /// Medical notes
    pub medical_notes: Option<String>,
}

/// Parent as submitted.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParentInput {
    /// First name
    pub first_name: String,
    /// Last name
    pub last_name: String,
    /// Email
    pub email: String,
    /// Phone
    pub phone: Option<String>,
    /// Relationship to the students
    pub relationship: Option<String>,
}

/// Request to create a booking.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookingRequest {
    /// Target session
    pub class_session_id: ClassSessionId,
    /// Trial or membership
    pub service_kind: ServiceKind,
    /// Students; one seat each
    pub students: Vec<StudentInput>,
    /// Parents shared by all students
    pub parents: Vec<ParentInput>,
    /// Emergency contact shared by all students
    pub emergency_contact: Option<EmergencyContact>,
    /// Plan for memberships
    pub payment_plan_id: Option<PlanId>,
    /// Payment to collect
    pub payment: Option<PaymentIntent>,
    /// Who is booking
    pub origin: BookingOrigin,
    /// Start date (trial date for trials)
    pub start_date: NaiveDate,
}

impl BookingRequest {
    /// Seats requested.
    #[must_use]
    pub fn seats(&self) -> u32 {
        u32::try_from(self.students.len()).unwrap_or(u32::MAX)
    }

    /// Reject malformed input before any write.
    ///
    /// # Errors
    ///
    /// Returns [`BookingError::Validation`] naming the first offending field, or
    /// [`BookingError::Conflict`] if two parents share an email.
    pub fn validate(&self) -> Result<(), BookingError> {
        if self.students.is_empty() {
            return Err(BookingError::validation("students", "at least one student is required"));
        }
        for student in &self.students {
            if student.first_name.trim().is_empty() || student.last_name.trim().is_empty() {
                return Err(BookingError::validation("students.name", "first and last name are required"));
            }
        }
        if self.parents.is_empty() {
            return Err(BookingError::validation("parents", "at least one parent is required"));
        }
        let mut emails = HashSet::new();
        for parent in &self.parents {
            let email = parent.email.trim().to_lowercase();
            if !email.contains('@') {
                return Err(BookingError::validation("parents.email", "must be an email address"));
            }
            if !emails.insert(email) {
                return Err(BookingError::Conflict(format!(
                    "Parent email {} is used more than once",
                    parent.email
                )));
            }
        }
        if self.service_kind == ServiceKind::Membership && self.payment_plan_id.is_none() {
            return Err(BookingError::validation("payment_plan_id", "memberships require a payment plan"));
        }
        if let Some(payment) = &self.payment {
            payment.payer.validate()?;
            if payment.amount.is_some_and(|amount| amount.is_zero()) {
                return Err(BookingError::validation("payment.amount", "must be greater than zero"));
            }
            if self.service_kind == ServiceKind::Trial && payment.payer.gateway().is_recurring() {
                return Err(BookingError::validation(
                    "payment.kind",
                    "trials cannot be paid by recurring contract",
                ));
            }
        }
        Ok(())
    }
}

/// Whether an operation changed anything.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationStatus {
    /// Changes were committed
    Applied,
    /// Nothing to do (e.g. retrying an already-paid attempt)
    NoOp,
}

/// Result returned to the caller of a booking operation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookingOutcome {
    /// Applied or no-op
    pub status: OperationStatus,
    /// Booking affected
    pub booking_id: BookingId,
    /// Status after the operation
    pub booking_status: BookingStatus,
    /// Latest payment status, if a payment is involved
    pub payment_status: Option<PaymentStatus>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payment::PayerDetails;

    fn request() -> BookingRequest {
        BookingRequest {
            class_session_id: ClassSessionId::new(),
            service_kind: ServiceKind::Trial,
            students: vec![StudentInput {
                first_name: "Mia".to_string(),
                last_name: "Jones".to_string(),
                date_of_birth: NaiveDate::from_ymd_opt(2018, 4, 2).unwrap_or_default(),
                medical_notes: None,
            }],
            parents: vec![ParentInput {
                first_name: "Sam".to_string(),
                last_name: "Jones".to_string(),
                email: "sam@example.com".to_string(),
                phone: None,
                relationship: Some("parent".to_string()),
            }],
            emergency_contact: None,
            payment_plan_id: None,
            payment: None,
            origin: BookingOrigin::Public,
            start_date: NaiveDate::from_ymd_opt(2025, 2, 1).unwrap_or_default(),
        }
    }

    #[test]
    fn valid_request_passes() {
        assert!(request().validate().is_ok());
        assert_eq!(request().seats(), 1);
    }

    #[test]
    fn duplicate_parent_email_is_a_conflict() {
        let mut req = request();
        let mut second = req.parents[0].clone();
        second.email = "SAM@example.com".to_string();
        req.parents.push(second);
        assert_eq!(req.validate().map_err(|e| e.reason()), Err("conflict"));
    }

    #[test]
    fn membership_requires_plan() {
        let mut req = request();
        req.service_kind = ServiceKind::Membership;
        assert_eq!(req.validate().map_err(|e| e.reason()), Err("validation_error"));
    }

    #[test]
    fn trial_cannot_use_recurring_contract() {
        let mut req = request();
        req.payment = Some(PaymentIntent {
            payer: PayerDetails::DirectDebit {
                first_name: "Sam".to_string(),
                last_name: "Jones".to_string(),
                email: "sam@example.com".to_string(),
                account_number: "55779911".to_string(),
                branch_code: "200000".to_string(),
            },
            amount: None,
        });
        assert!(req.validate().is_err());
    }
}
