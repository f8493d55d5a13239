//! # Classbook Gateways
//!
//! One adapter per payment gateway family, each hiding a different multi-step
//! provisioning sequence behind the same three-step shape:
//!
//! 1. [`PaymentGateway::open_payer`]: create or find the payer (or schedule) with the provider
//! 2. [`PaymentGateway::create_vehicle`]: create the charge, transfer request or contract
//! 3. [`PaymentGateway::normalize`]: project the provider payload into a [`PaymentStatus`]
//!
//! Every remote resource an adapter creates is pushed onto [`CreatedResources`] as soon
//! as the provider confirms it, so the orchestrator can compensate after a later step
//! fails or times out.
//!
//! Adapters talk to providers through small API traits ([`card::CardAcquirerApi`],
//! [`bank_transfer::BankTransferApi`], [`direct_debit::DirectDebitApi`]) with `reqwest`
//! implementations over [`http::JsonClient`].

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod bank_transfer;
pub mod card;
pub mod direct_debit;
pub mod http;

use async_trait::async_trait;
use chrono::NaiveDate;
use classbook_core::error::GatewayError;
use classbook_core::payment::{GatewayKind, PayerDetails, PaymentPlan, PaymentStatus};
use classbook_core::types::{BookingReference, Money};
use serde_json::Value;

pub use bank_transfer::BankTransferGateway;
pub use card::CardGateway;
pub use direct_debit::DirectDebitGateway;
pub use http::{JsonClient, ProviderError};

/// Everything an adapter needs to run its sequence.
#[derive(Clone, Debug)]
pub struct ChargeRequest {
    /// Booking the payment is for
    pub booking_reference: BookingReference,
    /// Amount to collect (instalment amount for contracts)
    pub amount: Money,
    /// Payer details
    pub payer: PayerDetails,
    /// Plan, when the booking has one
    pub plan: Option<PaymentPlan>,
    /// Statement description
    pub description: String,
    /// Business date the request is made on
    pub today: NaiveDate,
}

/// Output of step (a).
#[derive(Clone, Debug, Default, PartialEq)]
pub struct PayerSetup {
    /// Provider payer/customer ID, when step (a) creates one
    pub payer_reference: Option<String>,
    /// Secondary provider ID (bank account, schedule)
    pub linked_reference: Option<String>,
    /// Provider payload of step (a)
    pub raw: Value,
}

/// Output of step (b).
#[derive(Clone, Debug, PartialEq)]
pub struct ProviderReply {
    /// Provider ID of the charge, billing request or contract
    pub provider_reference: Option<String>,
    /// Provider payer/customer ID
    pub payer_reference: Option<String>,
    /// Verbatim provider payload
    pub raw: Value,
}

/// A remote resource that must be deleted if the sequence fails later.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RemoteResource {
    /// Provider customer (deleting it removes its bank accounts)
    Customer {
        /// Provider ID
        id: String,
    },
}

impl RemoteResource {
    /// Kind label for logs.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Customer { .. } => "customer",
        }
    }

    /// Provider ID.
    #[must_use]
    pub fn id(&self) -> &str {
        match self {
            Self::Customer { id } => id,
        }
    }
}

/// Remote resources created so far by one sequence, in creation order.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CreatedResources(Vec<RemoteResource>);

impl CreatedResources {
    /// Empty list
    #[must_use]
    pub const fn new() -> Self {
        Self(Vec::new())
    }

    /// Record a resource the provider confirmed.
    pub fn push(&mut self, resource: RemoteResource) {
        self.0.push(resource);
    }

    /// Whether nothing was created.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Resources in reverse creation order (the order to compensate in).
    pub fn newest_first(&self) -> impl Iterator<Item = &RemoteResource> {
        self.0.iter().rev()
    }
}

/// Uniform interface over a gateway family.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Gateway family
    fn kind(&self) -> GatewayKind;

    /// Step (a): create or find the payer with the provider.
    ///
    /// # Errors
    ///
    /// [`GatewayError::PayerCreation`] or [`GatewayError::ScheduleMissing`].
    async fn open_payer(
        &self,
        request: &ChargeRequest,
        created: &mut CreatedResources,
    ) -> Result<PayerSetup, GatewayError>;

    /// Step (b): create the payment vehicle.
    ///
    /// A provider that answers with a refusal is not an error here: the refusal comes
    /// back as a reply whose payload normalizes to [`PaymentStatus::Failed`].
    ///
    /// # Errors
    ///
    /// [`GatewayError::VehicleCreation`] when the provider call itself fails.
    async fn create_vehicle(
        &self,
        payer: &PayerSetup,
        request: &ChargeRequest,
        created: &mut CreatedResources,
    ) -> Result<ProviderReply, GatewayError>;

    /// Step (c): project a provider payload into the normalized status.
    fn normalize(&self, raw: &Value) -> PaymentStatus;

    /// Delete a resource created earlier in a failed sequence.
    ///
    /// # Errors
    ///
    /// Returns the provider failure; callers log it and keep the original error.
    async fn compensate(&self, resource: &RemoteResource) -> Result<(), GatewayError>;

    /// Pause a recurring contract from `from` until `until` (open-ended when `None`).
    ///
    /// # Errors
    ///
    /// [`GatewayError::Unsupported`] for one-off gateways.
    async fn pause_contract(
        &self,
        contract_reference: &str,
        from: NaiveDate,
        until: Option<NaiveDate>,
    ) -> Result<Value, GatewayError> {
        let _ = (contract_reference, from, until);
        Err(GatewayError::Unsupported {
            gateway: self.kind(),
            operation: "pause_contract",
        })
    }

    /// Resume a paused recurring contract.
    ///
    /// # Errors
    ///
    /// [`GatewayError::Unsupported`] for one-off gateways.
    async fn resume_contract(&self, contract_reference: &str) -> Result<Value, GatewayError> {
        let _ = contract_reference;
        Err(GatewayError::Unsupported {
            gateway: self.kind(),
            operation: "resume_contract",
        })
    }
}

/// Find a string field at the top level of a payload or one object level below it.
///
/// Providers wrap resources differently (`{"id": ..}` vs `{"customers": {"id": ..}}`).
#[must_use]
pub fn find_str<'a>(raw: &'a Value, key: &str) -> Option<&'a str> {
    if let Some(value) = raw.get(key).and_then(Value::as_str) {
        return Some(value);
    }
    raw.as_object()?
        .values()
        .find_map(|nested| nested.get(key).and_then(Value::as_str))
}

/// Lower-cased provider status string, if the payload has one.
#[must_use]
pub fn provider_status(raw: &Value) -> Option<String> {
    find_str(raw, "status").map(str::to_ascii_lowercase)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn find_str_looks_one_level_down() {
        let raw = json!({"billing_requests": {"id": "BRQ123", "status": "Fulfilled"}});
        assert_eq!(find_str(&raw, "id"), Some("BRQ123"));
        assert_eq!(provider_status(&raw).as_deref(), Some("fulfilled"));
        assert_eq!(find_str(&json!("plain"), "id"), None);
    }

    #[test]
    fn compensation_order_is_newest_first() {
        let mut created = CreatedResources::new();
        created.push(RemoteResource::Customer { id: "a".to_string() });
        created.push(RemoteResource::Customer { id: "b".to_string() });
        let order: Vec<&str> = created.newest_first().map(RemoteResource::id).collect();
        assert_eq!(order, vec!["b", "a"]);
    }
}
