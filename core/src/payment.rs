//! Payment plans, attempts and payer details.
//!
//! Provider payloads are stored verbatim on [`PaymentAttempt::raw_response`] but business
//! rules only ever branch on the normalized [`PaymentStatus`].

use crate::error::{BookingError, StoreError};
use crate::types::{AttemptId, BookingId, BookingReference, Money, PlanId};
use chrono::{DateTime, Days, Months, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Gateway family used to collect a payment.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GatewayKind {
    /// One-off card charge through the card acquirer
    Card,
    /// One-off bank transfer through the open-banking aggregator
    BankTransfer,
    /// Recurring contract through the direct-debit aggregator
    DirectDebit,
}

impl GatewayKind {
    /// Convert to storage representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Card => "card",
            Self::BankTransfer => "bank_transfer",
            Self::DirectDebit => "direct_debit",
        }
    }

    /// Parse from storage representation.
    ///
    /// # Errors
    ///
    /// Returns error if the string doesn't match a known gateway.
    pub fn parse(s: &str) -> Result<Self, StoreError> {
        match s {
            "card" => Ok(Self::Card),
            "bank_transfer" => Ok(Self::BankTransfer),
            "direct_debit" => Ok(Self::DirectDebit),
            _ => Err(StoreError::Corrupt(format!("Invalid gateway: {s}"))),
        }
    }

    /// Whether this gateway manages an ongoing contract that can be paused.
    #[must_use]
    pub const fn is_recurring(&self) -> bool {
        matches!(self, Self::DirectDebit)
    }
}

impl fmt::Display for GatewayKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Normalized outcome of a payment attempt.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    /// Submitted; settlement confirmed later out of band
    Pending,
    /// One-off payment collected
    Paid,
    /// Recurring contract in force
    Active,
    /// Refused, errored or timed out
    Failed,
}

impl PaymentStatus {
    /// Convert to storage representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Paid => "paid",
            Self::Active => "active",
            Self::Failed => "failed",
        }
    }

    /// Parse from storage representation.
    ///
    /// # Errors
    ///
    /// Returns error if the string doesn't match a known status.
    pub fn parse(s: &str) -> Result<Self, StoreError> {
        match s {
            "pending" => Ok(Self::Pending),
            "paid" => Ok(Self::Paid),
            "active" => Ok(Self::Active),
            "failed" => Ok(Self::Failed),
            _ => Err(StoreError::Corrupt(format!("Invalid payment status: {s}"))),
        }
    }

    /// Collected or contract in force. Retrying a settled attempt is a no-op.
    #[must_use]
    pub const fn is_settled(&self) -> bool {
        matches!(self, Self::Paid | Self::Active)
    }

    /// Whether the booking is allowed to commit with this outcome.
    #[must_use]
    pub const fn allows_commit(&self) -> bool {
        !matches!(self, Self::Failed)
    }
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Billing interval of a plan.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BillingInterval {
    /// Weekly
    Week,
    /// Monthly
    Month,
    /// Yearly
    Year,
}

impl BillingInterval {
    /// Convert to storage representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Week => "week",
            Self::Month => "month",
            Self::Year => "year",
        }
    }

    /// Parse from storage representation.
    ///
    /// # Errors
    ///
    /// Returns error if the string doesn't match a known interval.
    pub fn parse(s: &str) -> Result<Self, StoreError> {
        match s {
            "week" => Ok(Self::Week),
            "month" => Ok(Self::Month),
            "year" => Ok(Self::Year),
            _ => Err(StoreError::Corrupt(format!("Invalid billing interval: {s}"))),
        }
    }

    /// Advance `date` by `count` intervals.
    #[must_use]
    pub fn advance(&self, date: NaiveDate, count: u32) -> Option<NaiveDate> {
        match self {
            Self::Week => date.checked_add_days(Days::new(u64::from(count) * 7)),
            Self::Month => date.checked_add_months(Months::new(count)),
            Self::Year => date.checked_add_months(Months::new(count.checked_mul(12)?)),
        }
    }
}

/// Read-only reference data used to compute amounts and contract terms.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentPlan {
    /// Plan ID
    pub id: PlanId,
    /// Display name
    pub name: String,
    /// Price per interval
    pub price: Money,
    /// One-time fee added to the first collection
    pub joining_fee: Money,
    /// Number of intervals for a fixed-term plan; 0 means open-ended
    pub duration: u32,
    /// Billing interval
    pub interval: BillingInterval,
}

impl PaymentPlan {
    /// Amount for a one-off collection (card or bank transfer).
    ///
    /// # Errors
    ///
    /// Returns a validation error on overflow.
    pub fn one_off_amount(&self) -> Result<Money, BookingError> {
        self.price
            .checked_add(self.joining_fee)
            .ok_or_else(|| BookingError::validation("payment_plan", "plan amount overflows"))
    }

    /// Amount for each recurring instalment.
    #[must_use]
    pub const fn instalment_amount(&self) -> Money {
        self.price
    }

    /// Contract end date for fixed-term plans.
    #[must_use]
    pub fn end_date(&self, start: NaiveDate) -> Option<NaiveDate> {
        if self.duration == 0 {
            return None;
        }
        self.interval.advance(start, self.duration)
    }
}

/// Payer details for the requested gateway.
///
/// Card data is passed through to the acquirer and never persisted.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PayerDetails {
    /// Card holder and card data
    Card {
        /// Name on the card
        holder_name: String,
        /// Billing email
        email: String,
        /// Primary account number
        number: String,
        /// Expiry month (1-12)
        expiry_month: u8,
        /// Four-digit expiry year
        expiry_year: u16,
        /// Security code
        cvv: String,
    },
    /// Bank account holder for a one-off transfer
    BankTransfer {
        /// Account holder first name
        first_name: String,
        /// Account holder last name
        last_name: String,
        /// Payer email
        email: String,
        /// Bank account number
        account_number: String,
        /// Sort or branch code
        branch_code: String,
        /// ISO country code
        country_code: String,
    },
    /// Bank account holder for a recurring contract
    DirectDebit {
        /// Account holder first name
        first_name: String,
        /// Account holder last name
        last_name: String,
        /// Payer email
        email: String,
        /// Bank account number
        account_number: String,
        /// Sort or branch code
        branch_code: String,
    },
}

impl PayerDetails {
    /// Gateway family these details are for.
    #[must_use]
    pub const fn gateway(&self) -> GatewayKind {
        match self {
            Self::Card { .. } => GatewayKind::Card,
            Self::BankTransfer { .. } => GatewayKind::BankTransfer,
            Self::DirectDebit { .. } => GatewayKind::DirectDebit,
        }
    }

    /// Payer email.
    #[must_use]
    pub fn email(&self) -> &str {
        match self {
            Self::Card { email, .. }
            | Self::BankTransfer { email, .. }
            | Self::DirectDebit { email, .. } => email,
        }
    }

    /// Reject obviously unusable details before any remote call.
    ///
    /// # Errors
    ///
    /// Returns a validation error naming the offending field.
    pub fn validate(&self) -> Result<(), BookingError> {
        if !self.email().contains('@') {
            return Err(BookingError::validation("payer.email", "must be an email address"));
        }
        match self {
            Self::Card {
                holder_name,
                number,
                expiry_month,
                cvv,
                ..
            } => {
                if holder_name.trim().is_empty() {
                    return Err(BookingError::validation("payer.holder_name", "is required"));
                }
                if number.chars().filter(char::is_ascii_digit).count() < 12 {
                    return Err(BookingError::validation("payer.number", "is too short"));
                }
                if !(1..=12).contains(expiry_month) {
                    return Err(BookingError::validation("payer.expiry_month", "must be 1-12"));
                }
                if !(3..=4).contains(&cvv.len()) || !cvv.chars().all(|c| c.is_ascii_digit()) {
                    return Err(BookingError::validation("payer.cvv", "must be 3 or 4 digits"));
                }
            },
            Self::BankTransfer {
                account_number,
                branch_code,
                ..
            }
            | Self::DirectDebit {
                account_number,
                branch_code,
                ..
            } => {
                if account_number.trim().is_empty() {
                    return Err(BookingError::validation("payer.account_number", "is required"));
                }
                if branch_code.trim().is_empty() {
                    return Err(BookingError::validation("payer.branch_code", "is required"));
                }
            },
        }
        Ok(())
    }
}

impl fmt::Debug for PayerDetails {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PayerDetails")
            .field("gateway", &self.gateway())
            .field("email", &self.email())
            .finish_non_exhaustive()
    }
}

/// Requested payment for a booking operation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentIntent {
    /// Payer details; selects the gateway
    pub payer: PayerDetails,
    /// Explicit amount; defaults to the plan-derived amount
    pub amount: Option<Money>,
}

/// One invocation of a gateway sequence, recorded whatever the outcome.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentAttempt {
    /// Attempt ID
    pub id: AttemptId,
    /// Owning booking; `None` when the booking was rolled back
    pub booking_id: Option<BookingId>,
    /// Reference of the booking this attempt was made for
    pub booking_reference: BookingReference,
    /// Gateway used
    pub gateway: GatewayKind,
    /// Amount requested
    pub amount: Money,
    /// Normalized status
    pub status: PaymentStatus,
    /// Provider ID of the charge, billing request or contract
    pub provider_reference: Option<String>,
    /// Provider ID of the payer/customer
    pub payer_reference: Option<String>,
    /// Verbatim provider payload
    pub raw_response: serde_json::Value,
    /// Status metadata (pause/resume history, reconciliation notes)
    pub metadata: serde_json::Value,
    /// Failure reason code when failed
    pub failure_reason: Option<String>,
    /// Number of times the attempt was retried in place
    pub retry_count: u32,
    /// When created
    pub created_at: DateTime<Utc>,
    /// When last updated
    pub updated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plan(duration: u32, interval: BillingInterval) -> PaymentPlan {
        PaymentPlan {
            id: PlanId::new(),
            name: "Termly".to_string(),
            price: Money::from_minor(4500),
            joining_fee: Money::from_minor(500),
            duration,
            interval,
        }
    }

    #[test]
    fn one_off_includes_joining_fee() {
        let plan = plan(0, BillingInterval::Month);
        assert_eq!(plan.one_off_amount().ok(), Some(Money::from_minor(5000)));
        assert_eq!(plan.instalment_amount(), Money::from_minor(4500));
    }

    #[test]
    fn fixed_term_end_date() {
        let start = NaiveDate::from_ymd_opt(2025, 1, 31).unwrap_or_default();
        assert_eq!(plan(0, BillingInterval::Month).end_date(start), None);
        assert_eq!(
            plan(3, BillingInterval::Month).end_date(start),
            NaiveDate::from_ymd_opt(2025, 4, 30)
        );
        assert_eq!(
            plan(2, BillingInterval::Week).end_date(start),
            NaiveDate::from_ymd_opt(2025, 2, 14)
        );
        assert_eq!(
            plan(1, BillingInterval::Year).end_date(start),
            NaiveDate::from_ymd_opt(2026, 1, 31)
        );
    }

    #[test]
    fn payer_debug_hides_card_data() {
        let payer = PayerDetails::Card {
            holder_name: "Ada Parent".to_string(),
            email: "ada@example.com".to_string(),
            number: "4242424242424242".to_string(),
            expiry_month: 12,
            expiry_year: 2030,
            cvv: "123".to_string(),
        };
        let rendered = format!("{payer:?}");
        assert!(!rendered.contains("4242"));
        assert!(payer.validate().is_ok());
    }

    #[test]
    fn settled_statuses() {
        assert!(PaymentStatus::Paid.is_settled());
        assert!(PaymentStatus::Active.is_settled());
        assert!(!PaymentStatus::Pending.is_settled());
        assert!(PaymentStatus::Pending.allows_commit());
        assert!(!PaymentStatus::Failed.allows_commit());
    }
}
