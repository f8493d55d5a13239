//! Card acquirer adapter.
//!
//! Step (a) validates the card locally (Luhn checksum, expiry) and creates nothing
//! remotely. Step (b) is a single charge call carrying card data and amount.

use crate::http::{JsonClient, ProviderError};
use crate::{
    ChargeRequest, CreatedResources, PayerSetup, PaymentGateway, ProviderReply, RemoteResource,
    find_str, provider_status,
};
use async_trait::async_trait;
use chrono::Datelike;
use classbook_core::error::GatewayError;
use classbook_core::payment::{GatewayKind, PayerDetails, PaymentStatus};
use serde::Serialize;
use serde_json::{Value, json};
use std::sync::Arc;

/// Charge body sent to the acquirer.
#[derive(Clone, Debug, Serialize)]
pub struct CardCharge {
    /// Merchant reference (booking reference)
    pub reference: String,
    /// Amount in minor units
    pub amount: u64,
    /// ISO currency
    pub currency: String,
    /// Statement description
    pub description: String,
    /// Card holder
    pub holder_name: String,
    /// Receipt email
    pub email: String,
    /// Card number (digits only)
    pub number: String,
    /// Expiry month
    pub expiry_month: u8,
    /// Expiry year
    pub expiry_year: u16,
    /// Security code
    pub cvv: String,
}

/// Card acquirer API.
#[async_trait]
pub trait CardAcquirerApi: Send + Sync {
    /// Charge a card. A refusal is a successful call whose payload says `declined`.
    async fn charge(&self, charge: &CardCharge) -> Result<Value, ProviderError>;
}

/// `reqwest` implementation of [`CardAcquirerApi`].
#[derive(Clone, Debug)]
pub struct HttpCardAcquirer {
    client: JsonClient,
}

impl HttpCardAcquirer {
    /// Wrap a configured client.
    #[must_use]
    pub const fn new(client: JsonClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl CardAcquirerApi for HttpCardAcquirer {
    async fn charge(&self, charge: &CardCharge) -> Result<Value, ProviderError> {
        match self.client.post("/v1/payments", charge).await {
            // Acquirers answer refusals with 402 and a JSON body describing them
            Err(ProviderError::Status { status: 402, body }) => serde_json::from_str(&body)
                .map_err(|e| ProviderError::Decode(e.to_string())),
            other => other,
        }
    }
}

/// Luhn checksum over the digits of `number`.
#[must_use]
pub fn luhn_valid(number: &str) -> bool {
    let digits: Vec<u32> = number
        .chars()
        .filter(|c| !c.is_whitespace() && *c != '-')
        .map(|c| c.to_digit(10))
        .collect::<Option<Vec<_>>>()
        .unwrap_or_default();

    if digits.len() < 12 {
        return false;
    }

    let sum: u32 = digits
        .iter()
        .rev()
        .enumerate()
        .map(|(i, &d)| {
            if i % 2 == 1 {
                let doubled = d * 2;
                if doubled > 9 { doubled - 9 } else { doubled }
            } else {
                d
            }
        })
        .sum();
    sum % 10 == 0
}

/// One-off card payments.
#[derive(Clone)]
pub struct CardGateway {
    api: Arc<dyn CardAcquirerApi>,
    currency: String,
}

impl CardGateway {
    /// Creates a card gateway over an acquirer API.
    #[must_use]
    pub fn new(api: Arc<dyn CardAcquirerApi>, currency: impl Into<String>) -> Self {
        Self {
            api,
            currency: currency.into(),
        }
    }

    fn payer_error(message: impl Into<String>) -> GatewayError {
        GatewayError::PayerCreation {
            gateway: GatewayKind::Card,
            message: message.into(),
        }
    }
}

#[async_trait]
impl PaymentGateway for CardGateway {
    fn kind(&self) -> GatewayKind {
        GatewayKind::Card
    }

    async fn open_payer(
        &self,
        request: &ChargeRequest,
        _created: &mut CreatedResources,
    ) -> Result<PayerSetup, GatewayError> {
        let PayerDetails::Card {
            number,
            expiry_month,
            expiry_year,
            ..
        } = &request.payer
        else {
            return Err(Self::payer_error("card gateway requires card details"));
        };

        if !luhn_valid(number) {
            return Err(Self::payer_error("card number failed checksum"));
        }
        let today = request.today;
        let expired = i32::from(*expiry_year) < today.year()
            || (i32::from(*expiry_year) == today.year() && u32::from(*expiry_month) < today.month());
        if expired {
            return Err(Self::payer_error("card has expired"));
        }

        Ok(PayerSetup {
            payer_reference: None,
            linked_reference: None,
            raw: json!({"validated": true}),
        })
    }

    async fn create_vehicle(
        &self,
        _payer: &PayerSetup,
        request: &ChargeRequest,
        _created: &mut CreatedResources,
    ) -> Result<ProviderReply, GatewayError> {
        let PayerDetails::Card {
            holder_name,
            email,
            number,
            expiry_month,
            expiry_year,
            cvv,
        } = &request.payer
        else {
            return Err(Self::payer_error("card gateway requires card details"));
        };

        let charge = CardCharge {
            reference: request.booking_reference.to_string(),
            amount: request.amount.minor(),
            currency: self.currency.clone(),
            description: request.description.clone(),
            holder_name: holder_name.clone(),
            email: email.clone(),
            number: number.chars().filter(char::is_ascii_digit).collect(),
            expiry_month: *expiry_month,
            expiry_year: *expiry_year,
            cvv: cvv.clone(),
        };

        let raw = self
            .api
            .charge(&charge)
            .await
            .map_err(|e| GatewayError::VehicleCreation {
                gateway: GatewayKind::Card,
                message: e.to_string(),
            })?;

        tracing::debug!(
            reference = %request.booking_reference,
            status = ?provider_status(&raw),
            "Card charge answered"
        );

        Ok(ProviderReply {
            provider_reference: find_str(&raw, "id")
                .or_else(|| find_str(&raw, "transaction_id"))
                .map(str::to_string),
            payer_reference: None,
            raw,
        })
    }

    fn normalize(&self, raw: &Value) -> PaymentStatus {
        match provider_status(raw).as_deref() {
            Some("success" | "succeeded" | "captured" | "authorised" | "authorized") => {
                PaymentStatus::Paid
            },
            Some("declined" | "failed" | "rejected" | "error") => PaymentStatus::Failed,
            _ => PaymentStatus::Pending,
        }
    }

    async fn compensate(&self, resource: &RemoteResource) -> Result<(), GatewayError> {
        // A card charge creates nothing that outlives a failed sequence
        tracing::debug!(resource = resource.kind(), "Nothing to compensate for card payments");
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use classbook_core::types::{BookingReference, Money};
    use std::sync::Mutex;

    struct ScriptedAcquirer {
        reply: Value,
        seen: Mutex<Vec<CardCharge>>,
    }

    #[async_trait]
    impl CardAcquirerApi for ScriptedAcquirer {
        async fn charge(&self, charge: &CardCharge) -> Result<Value, ProviderError> {
            self.seen.lock().unwrap().push(charge.clone());
            Ok(self.reply.clone())
        }
    }

    fn request(number: &str) -> ChargeRequest {
        ChargeRequest {
            booking_reference: BookingReference::new("BK-TEST0001".to_string()),
            amount: Money::from_minor(5000),
            payer: PayerDetails::Card {
                holder_name: "Sam Jones".to_string(),
                email: "sam@example.com".to_string(),
                number: number.to_string(),
                expiry_month: 12,
                expiry_year: 2030,
                cvv: "123".to_string(),
            },
            plan: None,
            description: "Trial class".to_string(),
            today: NaiveDate::from_ymd_opt(2025, 1, 1).unwrap(),
        }
    }

    #[test]
    fn luhn() {
        assert!(luhn_valid("4242 4242 4242 4242"));
        assert!(luhn_valid("5555-5555-5555-4444"));
        assert!(!luhn_valid("4242424242424241"));
        assert!(!luhn_valid("42a2424242424242"));
    }

    #[tokio::test]
    async fn invalid_card_fails_before_any_remote_call() {
        let api = Arc::new(ScriptedAcquirer {
            reply: json!({"status": "success"}),
            seen: Mutex::new(Vec::new()),
        });
        let gateway = CardGateway::new(api.clone(), "GBP");
        let mut created = CreatedResources::new();
        let result = gateway.open_payer(&request("4242424242424241"), &mut created).await;
        assert_eq!(result.map_err(|e| e.stage()), Err("payer_creation"));
        assert!(api.seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn success_normalizes_to_paid() {
        let api = Arc::new(ScriptedAcquirer {
            reply: json!({"id": "ch_1", "status": "SUCCESS"}),
            seen: Mutex::new(Vec::new()),
        });
        let gateway = CardGateway::new(api.clone(), "GBP");
        let mut created = CreatedResources::new();
        let req = request("4242424242424242");
        let payer = gateway.open_payer(&req, &mut created).await.unwrap();
        let reply = gateway.create_vehicle(&payer, &req, &mut created).await.unwrap();

        assert_eq!(reply.provider_reference.as_deref(), Some("ch_1"));
        assert_eq!(gateway.normalize(&reply.raw), PaymentStatus::Paid);
        assert!(created.is_empty());
        assert_eq!(api.seen.lock().unwrap()[0].amount, 5000);
    }

    #[test]
    fn status_mapping() {
        let gateway = CardGateway::new(
            Arc::new(ScriptedAcquirer {
                reply: Value::Null,
                seen: Mutex::new(Vec::new()),
            }),
            "GBP",
        );
        assert_eq!(gateway.normalize(&json!({"status": "declined"})), PaymentStatus::Failed);
        assert_eq!(gateway.normalize(&json!({"status": "3ds_required"})), PaymentStatus::Pending);
        assert_eq!(gateway.normalize(&json!({})), PaymentStatus::Pending);
    }
}
