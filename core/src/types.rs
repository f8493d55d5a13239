//! Identifiers and value objects shared across the booking domain.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

// ============================================================================
// Identifiers
// ============================================================================

macro_rules! uuid_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl $name {
            #[doc = concat!("Creates a new random `", stringify!($name), "`")]
            #[must_use]
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            #[doc = concat!("Create a `", stringify!($name), "` from a `Uuid`")]
            #[must_use]
            pub const fn from_uuid(uuid: Uuid) -> Self {
                Self(uuid)
            }

            /// Get the inner UUID
            #[must_use]
            pub const fn as_uuid(&self) -> &Uuid {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

uuid_id!(
    /// Unique identifier for a scheduled class session
    ClassSessionId
);
uuid_id!(
    /// Unique identifier for a booking
    BookingId
);
uuid_id!(
    /// Unique identifier for a student on a booking
    StudentId
);
uuid_id!(
    /// Unique identifier for a parent or guardian
    ParentId
);
uuid_id!(
    /// Unique identifier for a payment plan
    PlanId
);
uuid_id!(
    /// Unique identifier for a payment attempt
    AttemptId
);
uuid_id!(
    /// Unique identifier for a staff member acting on a booking
    ActorId
);
uuid_id!(
    /// Unique identifier for a temporary seat hold
    HoldId
);
uuid_id!(
    /// Unique identifier for a freeze record
    FreezeId
);
uuid_id!(
    /// Unique identifier for a parent portal account
    AccountId
);

/// External reference code printed on confirmations (e.g. `BK-7Q2M9XKD`).
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BookingReference(String);

impl BookingReference {
    const ALPHABET: &'static [u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";
    const LENGTH: usize = 8;

    /// Generates a new random reference code.
    #[must_use]
    pub fn generate() -> Self {
        let mut rng = rand::thread_rng();
        let code: String = (0..Self::LENGTH)
            .map(|_| char::from(Self::ALPHABET[rng.gen_range(0..Self::ALPHABET.len())]))
            .collect();
        Self(format!("BK-{code}"))
    }

    /// Wraps an existing reference code (e.g. one loaded from storage).
    #[must_use]
    pub const fn new(code: String) -> Self {
        Self(code)
    }

    /// Returns the reference as a string slice
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BookingReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ============================================================================
// Money Value Object (minor units to avoid floating point errors)
// ============================================================================

/// Represents money in minor units (pence/cents)
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Money(u64);

impl Money {
    /// Zero amount
    pub const ZERO: Self = Self(0);

    /// Creates a `Money` value from minor units
    #[must_use]
    pub const fn from_minor(minor: u64) -> Self {
        Self(minor)
    }

    /// Creates a `Money` value from major units with overflow checking
    #[must_use]
    pub const fn checked_from_major(major: u64) -> Option<Self> {
        match major.checked_mul(100) {
            Some(minor) => Some(Self(minor)),
            None => None,
        }
    }

    /// Returns the amount in minor units
    #[must_use]
    pub const fn minor(&self) -> u64 {
        self.0
    }

    /// Checks if the amount is zero
    #[must_use]
    pub const fn is_zero(&self) -> bool {
        self.0 == 0
    }

    /// Adds two money amounts with overflow checking
    #[must_use]
    pub const fn checked_add(self, other: Self) -> Option<Self> {
        match self.0.checked_add(other.0) {
            Some(result) => Some(Self(result)),
            None => None,
        }
    }

    /// Formats the amount as a decimal string (`"50.00"`), the shape providers expect.
    #[must_use]
    pub fn to_decimal_string(&self) -> String {
        format!("{}.{:02}", self.0 / 100, self.0 % 100)
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_decimal_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reference_has_prefix_and_unambiguous_alphabet() {
        let reference = BookingReference::generate();
        let code = reference.as_str().strip_prefix("BK-");
        assert!(code.is_some());
        let code = code.unwrap_or_default();
        assert_eq!(code.len(), 8);
        assert!(!code.contains('O') && !code.contains('0') && !code.contains('I'));
    }

    #[test]
    fn money_formats_minor_units() {
        assert_eq!(Money::from_minor(5000).to_decimal_string(), "50.00");
        assert_eq!(Money::from_minor(1205).to_string(), "12.05");
        assert_eq!(Money::checked_from_major(3), Some(Money::from_minor(300)));
        assert_eq!(Money::from_minor(u64::MAX).checked_add(Money::from_minor(1)), None);
    }
}
