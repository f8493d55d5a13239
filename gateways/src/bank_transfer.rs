//! One-off bank transfer adapter (open-banking billing requests).
//!
//! Step (a) creates a customer and a bank account for it. Step (b) creates a billing
//! request linked to both. The customer is recorded for compensation as soon as the
//! provider confirms it; deleting the customer also removes its bank accounts.

use crate::http::{JsonClient, ProviderError};
use crate::{
    ChargeRequest, CreatedResources, PayerSetup, PaymentGateway, ProviderReply, RemoteResource,
    find_str, provider_status,
};
use async_trait::async_trait;
use classbook_core::error::GatewayError;
use classbook_core::payment::{GatewayKind, PayerDetails, PaymentStatus};
use serde::Serialize;
use serde_json::{Value, json};
use std::sync::Arc;

/// Customer to create.
#[derive(Clone, Debug, Serialize, PartialEq, Eq)]
pub struct NewCustomer {
    /// Given name
    pub given_name: String,
    /// Family name
    pub family_name: String,
    /// Email
    pub email: String,
    /// Our reference
    pub reference: String,
}

/// Bank account to attach to a customer.
#[derive(Clone, Debug, Serialize, PartialEq, Eq)]
pub struct NewBankAccount {
    /// Provider customer ID
    pub customer: String,
    /// Account holder
    pub account_holder_name: String,
    /// Account number
    pub account_number: String,
    /// Sort or branch code
    pub branch_code: String,
    /// ISO country
    pub country_code: String,
}

/// One-off billing request.
#[derive(Clone, Debug, Serialize, PartialEq, Eq)]
pub struct NewBillingRequest {
    /// Provider customer ID
    pub customer: String,
    /// Provider bank account ID
    pub customer_bank_account: Option<String>,
    /// Amount in minor units
    pub amount: u64,
    /// ISO currency
    pub currency: String,
    /// Statement description
    pub description: String,
    /// Our reference
    pub reference: String,
}

/// Open-banking provider API.
#[async_trait]
pub trait BankTransferApi: Send + Sync {
    /// Create a customer.
    async fn create_customer(&self, customer: &NewCustomer) -> Result<Value, ProviderError>;

    /// Attach a bank account to a customer.
    async fn create_bank_account(&self, account: &NewBankAccount) -> Result<Value, ProviderError>;

    /// Create a billing request.
    async fn create_billing_request(&self, request: &NewBillingRequest) -> Result<Value, ProviderError>;

    /// Delete a customer and everything attached to it.
    async fn delete_customer(&self, customer_id: &str) -> Result<(), ProviderError>;
}

/// `reqwest` implementation of [`BankTransferApi`].
#[derive(Clone, Debug)]
pub struct HttpBankTransferApi {
    client: JsonClient,
}

impl HttpBankTransferApi {
    /// Wrap a configured client.
    #[must_use]
    pub const fn new(client: JsonClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl BankTransferApi for HttpBankTransferApi {
    async fn create_customer(&self, customer: &NewCustomer) -> Result<Value, ProviderError> {
        self.client.post("/customers", &json!({ "customers": customer })).await
    }

    async fn create_bank_account(&self, account: &NewBankAccount) -> Result<Value, ProviderError> {
        let body = json!({
            "customer_bank_accounts": {
                "account_holder_name": account.account_holder_name,
                "account_number": account.account_number,
                "branch_code": account.branch_code,
                "country_code": account.country_code,
                "links": { "customer": account.customer },
            }
        });
        self.client.post("/customer_bank_accounts", &body).await
    }

    async fn create_billing_request(&self, request: &NewBillingRequest) -> Result<Value, ProviderError> {
        let body = json!({
            "billing_requests": {
                "payment_request": {
                    "amount": request.amount,
                    "currency": request.currency,
                    "description": request.description,
                },
                "metadata": { "reference": request.reference },
                "links": {
                    "customer": request.customer,
                    "customer_bank_account": request.customer_bank_account,
                },
            }
        });
        self.client.post("/billing_requests", &body).await
    }

    async fn delete_customer(&self, customer_id: &str) -> Result<(), ProviderError> {
        match self.client.delete(&format!("/customers/{customer_id}")).await {
            Ok(_) => Ok(()),
            // Already gone
            Err(e) if e.is_not_found() => Ok(()),
            Err(e) => Err(e),
        }
    }
}

/// One-off bank transfers.
#[derive(Clone)]
pub struct BankTransferGateway {
    api: Arc<dyn BankTransferApi>,
    currency: String,
}

impl BankTransferGateway {
    /// Creates a bank transfer gateway over a provider API.
    #[must_use]
    pub fn new(api: Arc<dyn BankTransferApi>, currency: impl Into<String>) -> Self {
        Self {
            api,
            currency: currency.into(),
        }
    }

    fn payer_error(message: impl Into<String>) -> GatewayError {
        GatewayError::PayerCreation {
            gateway: GatewayKind::BankTransfer,
            message: message.into(),
        }
    }
}

#[async_trait]
impl PaymentGateway for BankTransferGateway {
    fn kind(&self) -> GatewayKind {
        GatewayKind::BankTransfer
    }

    async fn open_payer(
        &self,
        request: &ChargeRequest,
        created: &mut CreatedResources,
    ) -> Result<PayerSetup, GatewayError> {
        let PayerDetails::BankTransfer {
            first_name,
            last_name,
            email,
            account_number,
            branch_code,
            country_code,
        } = &request.payer
        else {
            return Err(Self::payer_error("bank transfer gateway requires bank details"));
        };

        let customer = self
            .api
            .create_customer(&NewCustomer {
                given_name: first_name.clone(),
                family_name: last_name.clone(),
                email: email.clone(),
                reference: request.booking_reference.to_string(),
            })
            .await
            .map_err(|e| Self::payer_error(e.to_string()))?;
        let customer_id = find_str(&customer, "id")
            .ok_or_else(|| Self::payer_error("customer response has no id"))?
            .to_string();
        created.push(RemoteResource::Customer {
            id: customer_id.clone(),
        });

        let account = self
            .api
            .create_bank_account(&NewBankAccount {
                customer: customer_id.clone(),
                account_holder_name: format!("{first_name} {last_name}"),
                account_number: account_number.clone(),
                branch_code: branch_code.clone(),
                country_code: country_code.clone(),
            })
            .await
            .map_err(|e| Self::payer_error(e.to_string()))?;

        Ok(PayerSetup {
            payer_reference: Some(customer_id),
            linked_reference: find_str(&account, "id").map(str::to_string),
            raw: json!({ "customer": customer, "bank_account": account }),
        })
    }

    async fn create_vehicle(
        &self,
        payer: &PayerSetup,
        request: &ChargeRequest,
        _created: &mut CreatedResources,
    ) -> Result<ProviderReply, GatewayError> {
        let customer = payer
            .payer_reference
            .clone()
            .ok_or_else(|| Self::payer_error("no customer was created"))?;

        let raw = self
            .api
            .create_billing_request(&NewBillingRequest {
                customer: customer.clone(),
                customer_bank_account: payer.linked_reference.clone(),
                amount: request.amount.minor(),
                currency: self.currency.clone(),
                description: request.description.clone(),
                reference: request.booking_reference.to_string(),
            })
            .await
            .map_err(|e| GatewayError::VehicleCreation {
                gateway: GatewayKind::BankTransfer,
                message: e.to_string(),
            })?;

        Ok(ProviderReply {
            provider_reference: find_str(&raw, "id").map(str::to_string),
            payer_reference: Some(customer),
            raw,
        })
    }

    fn normalize(&self, raw: &Value) -> PaymentStatus {
        match provider_status(raw).as_deref() {
            Some("fulfilled" | "paid" | "confirmed" | "paid_out") => PaymentStatus::Paid,
            Some("failed" | "cancelled" | "canceled") => PaymentStatus::Failed,
            _ => PaymentStatus::Pending,
        }
    }

    async fn compensate(&self, resource: &RemoteResource) -> Result<(), GatewayError> {
        match resource {
            RemoteResource::Customer { id } => {
                self.api
                    .delete_customer(id)
                    .await
                    .map_err(|e| Self::payer_error(format!("failed to delete customer {id}: {e}")))
            },
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use classbook_core::types::{BookingReference, Money};
    use std::sync::Mutex;

    #[derive(Default)]
    struct FakeBank {
        fail_billing: bool,
        deleted: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl BankTransferApi for FakeBank {
        async fn create_customer(&self, _customer: &NewCustomer) -> Result<Value, ProviderError> {
            Ok(json!({"customers": {"id": "CU1"}}))
        }

        async fn create_bank_account(&self, _account: &NewBankAccount) -> Result<Value, ProviderError> {
            Ok(json!({"customer_bank_accounts": {"id": "BA1"}}))
        }

        async fn create_billing_request(
            &self,
            request: &NewBillingRequest,
        ) -> Result<Value, ProviderError> {
            if self.fail_billing {
                return Err(ProviderError::Status {
                    status: 422,
                    body: "invalid".to_string(),
                });
            }
            assert_eq!(request.customer_bank_account.as_deref(), Some("BA1"));
            Ok(json!({"billing_requests": {"id": "BRQ1", "status": "pending"}}))
        }

        async fn delete_customer(&self, customer_id: &str) -> Result<(), ProviderError> {
            self.deleted.lock().unwrap().push(customer_id.to_string());
            Ok(())
        }
    }

    fn request() -> ChargeRequest {
        ChargeRequest {
            booking_reference: BookingReference::new("BK-TEST0002".to_string()),
            amount: Money::from_minor(3000),
            payer: PayerDetails::BankTransfer {
                first_name: "Sam".to_string(),
                last_name: "Jones".to_string(),
                email: "sam@example.com".to_string(),
                account_number: "55779911".to_string(),
                branch_code: "200000".to_string(),
                country_code: "GB".to_string(),
            },
            plan: None,
            description: "Joining fee".to_string(),
            today: NaiveDate::from_ymd_opt(2025, 1, 1).unwrap(),
        }
    }

    #[tokio::test]
    async fn records_customer_for_compensation() {
        let gateway = BankTransferGateway::new(Arc::new(FakeBank::default()), "GBP");
        let mut created = CreatedResources::new();
        let payer = gateway.open_payer(&request(), &mut created).await.unwrap();

        assert_eq!(payer.payer_reference.as_deref(), Some("CU1"));
        assert_eq!(
            created.newest_first().collect::<Vec<_>>(),
            vec![&RemoteResource::Customer { id: "CU1".to_string() }]
        );

        let reply = gateway.create_vehicle(&payer, &request(), &mut created).await.unwrap();
        assert_eq!(reply.provider_reference.as_deref(), Some("BRQ1"));
        assert_eq!(gateway.normalize(&reply.raw), PaymentStatus::Pending);
    }

    #[tokio::test]
    async fn failed_billing_request_is_a_vehicle_error() {
        let api = Arc::new(FakeBank {
            fail_billing: true,
            ..FakeBank::default()
        });
        let gateway = BankTransferGateway::new(api.clone(), "GBP");
        let mut created = CreatedResources::new();
        let payer = gateway.open_payer(&request(), &mut created).await.unwrap();
        let result = gateway.create_vehicle(&payer, &request(), &mut created).await;
        assert_eq!(result.map_err(|e| e.stage()), Err("payment_creation"));

        for resource in created.newest_first() {
            gateway.compensate(resource).await.unwrap();
        }
        assert_eq!(*api.deleted.lock().unwrap(), vec!["CU1".to_string()]);
    }

    #[test]
    fn status_mapping() {
        let gateway = BankTransferGateway::new(Arc::new(FakeBank::default()), "GBP");
        assert_eq!(gateway.normalize(&json!({"status": "fulfilled"})), PaymentStatus::Paid);
        assert_eq!(gateway.normalize(&json!({"status": "cancelled"})), PaymentStatus::Failed);
        assert_eq!(gateway.normalize(&json!({"status": "ready_to_fulfil"})), PaymentStatus::Pending);
    }
}
