//! Booking status enumeration and the transition table.
//!
//! Every mutation site validates against [`BookingStatus::can_transition_to`]; status is
//! never compared as a loose string outside [`BookingStatus::parse`].

use crate::error::StoreError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Canonical status of a booking.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BookingStatus {
    /// Queued for a full class session; holds no seat
    WaitingList,
    /// Attending; holds a seat
    Active,
    /// Membership paused for a freeze window; keeps its seat
    Frozen,
    /// Cancelled; seat released
    Cancelled,
    /// Cancellation requested with a future effective date; seat released
    RequestToCancel,
    /// Trial moved to another session or date
    Rebooked,
    /// Removed from the waiting list (terminal)
    Removed,
    /// Waiting-list entry whose start date passed without promotion (terminal)
    Expired,
    /// Trial attended
    Attended,
    /// Trial not attended
    NotAttended,
}

impl BookingStatus {
    /// All statuses, in declaration order.
    pub const ALL: [Self; 10] = [
        Self::WaitingList,
        Self::Active,
        Self::Frozen,
        Self::Cancelled,
        Self::RequestToCancel,
        Self::Rebooked,
        Self::Removed,
        Self::Expired,
        Self::Attended,
        Self::NotAttended,
    ];

    /// Convert status to its storage representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::WaitingList => "waiting_list",
            Self::Active => "active",
            Self::Frozen => "frozen",
            Self::Cancelled => "cancelled",
            Self::RequestToCancel => "request_to_cancel",
            Self::Rebooked => "rebooked",
            Self::Removed => "removed",
            Self::Expired => "expired",
            Self::Attended => "attended",
            Self::NotAttended => "not_attended",
        }
    }

    /// Parse status from its storage representation.
    ///
    /// # Errors
    ///
    /// Returns error if the string doesn't match a known status.
    pub fn parse(s: &str) -> Result<Self, StoreError> {
        Self::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| StoreError::Corrupt(format!("Invalid booking status: {s}")))
    }

    /// Whether a booking in this status occupies a seat in its class session.
    ///
    /// Capacity is mutated exactly when this flips (or the session changes), which is
    /// what keeps one physical seat change equal to one capacity mutation.
    #[must_use]
    pub const fn holds_seat(&self) -> bool {
        matches!(
            self,
            Self::Active | Self::Frozen | Self::Rebooked | Self::Attended | Self::NotAttended
        )
    }

    /// Whether no further transitions are possible.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Removed | Self::Expired)
    }

    /// The transition table.
    #[must_use]
    pub const fn can_transition_to(&self, next: Self) -> bool {
        use BookingStatus::{
            Active, Attended, Cancelled, Expired, Frozen, NotAttended, Rebooked, Removed,
            RequestToCancel, WaitingList,
        };

        matches!(
            (self, next),
            (WaitingList, Active | Expired | Removed)
                | (
                    Active,
                    Frozen
                        | Cancelled
                        | RequestToCancel
                        | WaitingList
                        | Rebooked
                        | Attended
                        | NotAttended
                )
                | (Frozen, Active | Cancelled | RequestToCancel | WaitingList)
                | (Cancelled, Active | WaitingList)
                | (RequestToCancel, Cancelled | Active | WaitingList)
                | (Rebooked, Rebooked | Attended | NotAttended | Cancelled | Active)
                | (Attended, Active)
                | (NotAttended, Rebooked | Cancelled)
        )
    }
}

impl fmt::Display for BookingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What was booked.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceKind {
    /// A single trial class
    Trial,
    /// An ongoing membership on a payment plan
    Membership,
}

impl ServiceKind {
    /// Convert to storage representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Trial => "trial",
            Self::Membership => "membership",
        }
    }

    /// Parse from storage representation.
    ///
    /// # Errors
    ///
    /// Returns error if the string doesn't match a known kind.
    pub fn parse(s: &str) -> Result<Self, StoreError> {
        match s {
            "trial" => Ok(Self::Trial),
            "membership" => Ok(Self::Membership),
            _ => Err(StoreError::Corrupt(format!("Invalid service kind: {s}"))),
        }
    }
}

impl fmt::Display for ServiceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
