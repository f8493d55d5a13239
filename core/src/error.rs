//! Error taxonomy.
//!
//! [`BookingError`] is what callers see. Each variant maps to a stable reason code
//! through [`BookingError::reason`] and to a message safe to show a parent or
//! operator through [`BookingError::user_message`].

use crate::payment::GatewayKind;
use crate::status::BookingStatus;
use crate::types::ClassSessionId;
use thiserror::Error;

/// Errors returned by booking operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BookingError {
    /// Missing or malformed input, rejected before any write
    #[error("Validation failed on {field}: {message}")]
    Validation {
        /// Offending field
        field: &'static str,
        /// What is wrong with it
        message: String,
    },

    /// The seat invariant would be violated
    #[error("Class session {class_session_id} has {available} seat(s) left, {requested} requested")]
    CapacityExceeded {
        /// Session that is full
        class_session_id: ClassSessionId,
        /// Seats requested
        requested: u32,
        /// Seats remaining at the time of the attempt
        available: u32,
    },

    /// Duplicate or clashing record (e.g. a payer email already used elsewhere)
    #[error("Conflict: {0}")]
    Conflict(String),

    /// A payment provider call failed
    #[error(transparent)]
    Gateway(GatewayError),

    /// The recurring-contract schedule has not been provisioned upstream
    #[error("Payment schedule '{schedule}' not found")]
    ScheduleMissing {
        /// Schedule name that was looked up
        schedule: String,
    },

    /// Booking, class session or plan missing
    #[error("{entity} {id} not found")]
    NotFound {
        /// Kind of record
        entity: &'static str,
        /// Identifier that was looked up
        id: String,
    },

    /// The requested lifecycle change is not allowed from the current status
    #[error("Cannot {action} a booking that is {from}")]
    InvalidTransition {
        /// Current status
        from: BookingStatus,
        /// Attempted action
        action: &'static str,
    },

    /// Unexpected failure (storage, serialization)
    #[error("Internal error: {0}")]
    Internal(String),
}

impl BookingError {
    /// Shorthand for a validation error.
    #[must_use]
    pub fn validation(field: &'static str, message: impl Into<String>) -> Self {
        Self::Validation {
            field,
            message: message.into(),
        }
    }

    /// Shorthand for a not-found error.
    #[must_use]
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    /// Stable machine-checkable reason code.
    #[must_use]
    pub const fn reason(&self) -> &'static str {
        match self {
            Self::Validation { .. } => "validation_error",
            Self::CapacityExceeded { .. } => "capacity_exceeded",
            Self::Conflict(_) => "conflict",
            Self::Gateway(_) => "gateway_error",
            Self::ScheduleMissing { .. } => "schedule_missing",
            Self::NotFound { .. } => "not_found",
            Self::InvalidTransition { .. } => "invalid_transition",
            Self::Internal(_) => "internal_error",
        }
    }

    /// Human-readable message. Internal errors are not exposed.
    #[must_use]
    pub fn user_message(&self) -> String {
        match self {
            Self::Internal(_) => "Something went wrong on our side. Please try again.".to_string(),
            Self::CapacityExceeded { .. } => {
                "This class is now full. Please choose another session or join the waiting list."
                    .to_string()
            },
            Self::Gateway(error) => error.user_message(),
            other => other.to_string(),
        }
    }
}

impl From<GatewayError> for BookingError {
    fn from(error: GatewayError) -> Self {
        match error {
            GatewayError::ScheduleMissing { schedule } => Self::ScheduleMissing { schedule },
            other => Self::Gateway(other),
        }
    }
}

impl From<StoreError> for BookingError {
    fn from(error: StoreError) -> Self {
        match error {
            StoreError::CapacityExceeded {
                class_session_id,
                requested,
                available,
            } => Self::CapacityExceeded {
                class_session_id,
                requested,
                available,
            },
            StoreError::NotFound { entity, id } => Self::NotFound { entity, id },
            StoreError::Conflict(message) => Self::Conflict(message),
            StoreError::Database(message) | StoreError::Corrupt(message) => Self::Internal(message),
        }
    }
}

/// Failures from a payment provider, by stage.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GatewayError {
    /// Creating (or validating) the payer record failed
    #[error("{gateway} payer creation failed: {message}")]
    PayerCreation {
        /// Gateway family
        gateway: GatewayKind,
        /// Provider or timeout detail
        message: String,
    },

    /// Creating the charge, transfer request or contract failed
    #[error("{gateway} payment creation failed: {message}")]
    VehicleCreation {
        /// Gateway family
        gateway: GatewayKind,
        /// Provider or timeout detail
        message: String,
    },

    /// The provider answered but refused the payment
    #[error("{gateway} payment declined: {message}")]
    Declined {
        /// Gateway family
        gateway: GatewayKind,
        /// Provider detail
        message: String,
    },

    /// The named recurring schedule does not exist upstream
    #[error("Payment schedule '{schedule}' not found")]
    ScheduleMissing {
        /// Schedule name
        schedule: String,
    },

    /// Pausing or resuming a contract failed
    #[error("{gateway} contract update failed: {message}")]
    ContractUpdate {
        /// Gateway family
        gateway: GatewayKind,
        /// Provider detail
        message: String,
    },

    /// The adapter does not support this operation
    #[error("{gateway} does not support {operation}")]
    Unsupported {
        /// Gateway family
        gateway: GatewayKind,
        /// Operation name
        operation: &'static str,
    },
}

impl GatewayError {
    /// Stable sub-reason for the gateway error family.
    #[must_use]
    pub const fn stage(&self) -> &'static str {
        match self {
            Self::PayerCreation { .. } => "payer_creation",
            Self::VehicleCreation { .. } => "payment_creation",
            Self::Declined { .. } => "declined",
            Self::ScheduleMissing { .. } => "schedule_missing",
            Self::ContractUpdate { .. } => "contract_update",
            Self::Unsupported { .. } => "unsupported",
        }
    }

    fn user_message(&self) -> String {
        match self {
            Self::Declined { .. } => "The payment was declined. Please check the details and try again.".to_string(),
            Self::PayerCreation { .. } => {
                "We could not set up the payer with the payment provider.".to_string()
            },
            _ => "The payment provider could not complete the request.".to_string(),
        }
    }
}

/// Errors from the persistence layer.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// Capacity decrement would go below zero
    #[error("Capacity exceeded for class session {class_session_id}: requested {requested}, available {available}")]
    CapacityExceeded {
        /// Session
        class_session_id: ClassSessionId,
        /// Seats requested
        requested: u32,
        /// Seats remaining
        available: u32,
    },

    /// Row missing
    #[error("{entity} {id} not found")]
    NotFound {
        /// Kind of record
        entity: &'static str,
        /// Identifier
        id: String,
    },

    /// Unique constraint violated
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Stored data could not be decoded
    #[error("Corrupt record: {0}")]
    Corrupt(String),

    /// Driver or connection failure
    #[error("Database error: {0}")]
    Database(String),
}

impl StoreError {
    /// Shorthand for a not-found error.
    #[must_use]
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }
}

/// Error from an external collaborator (notifications, email, audit).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{collaborator} unavailable: {message}")]
pub struct CollaboratorError {
    /// Which collaborator failed
    pub collaborator: &'static str,
    /// Failure detail
    pub message: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schedule_missing_is_promoted_to_its_own_reason() {
        let error = BookingError::from(GatewayError::ScheduleMissing {
            schedule: "Monthly Members".to_string(),
        });
        assert_eq!(error.reason(), "schedule_missing");
    }

    #[test]
    fn internal_errors_do_not_leak_detail() {
        let error = BookingError::Internal("connection refused at 10.0.0.4:5432".to_string());
        assert!(!error.user_message().contains("10.0.0.4"));
        assert_eq!(error.reason(), "internal_error");
    }

    #[test]
    fn store_capacity_maps_to_caller_capacity() {
        let id = ClassSessionId::new();
        let error = BookingError::from(StoreError::CapacityExceeded {
            class_session_id: id,
            requested: 2,
            available: 1,
        });
        assert_eq!(
            error,
            BookingError::CapacityExceeded {
                class_session_id: id,
                requested: 2,
                available: 1
            }
        );
    }
}
