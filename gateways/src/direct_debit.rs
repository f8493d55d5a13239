//! Recurring contract adapter (direct-debit aggregator).
//!
//! Step (a) looks up the named collection schedule; it is never created here.
//! Step (b) creates the customer, then a contract bound to the schedule starting
//! `today + onboarding delay` and, for fixed-term plans, terminating after the plan
//! duration. A created contract is reported as `active` immediately.

use crate::http::{JsonClient, ProviderError};
use crate::{
    ChargeRequest, CreatedResources, PayerSetup, PaymentGateway, ProviderReply, RemoteResource,
    find_str, provider_status,
};
use async_trait::async_trait;
use chrono::{Days, NaiveDate};
use classbook_core::error::GatewayError;
use classbook_core::payment::{GatewayKind, PayerDetails, PaymentStatus};
use serde::Serialize;
use serde_json::{Value, json};
use std::sync::Arc;

/// Customer to create with the aggregator.
#[derive(Clone, Debug, Serialize, PartialEq, Eq)]
pub struct DebitCustomer {
    /// Our reference
    pub reference: String,
    /// First name
    pub first_name: String,
    /// Last name
    pub last_name: String,
    /// Email
    pub email: String,
    /// Account number
    pub account_number: String,
    /// Sort or branch code
    pub branch_code: String,
}

/// Contract to create.
#[derive(Clone, Debug, Serialize, PartialEq, Eq)]
pub struct NewContract {
    /// Provider customer ID
    pub customer: String,
    /// Provider schedule ID
    pub schedule: String,
    /// Instalment in minor units
    pub amount: u64,
    /// First collection date
    pub start: NaiveDate,
    /// Termination date for fixed-term plans
    pub termination_date: Option<NaiveDate>,
    /// Our reference
    pub reference: String,
}

/// Direct-debit aggregator API.
#[async_trait]
pub trait DirectDebitApi: Send + Sync {
    /// Schedule with this exact name, if provisioned.
    async fn find_schedule(&self, name: &str) -> Result<Option<Value>, ProviderError>;

    /// Create a customer with bank details.
    async fn create_customer(&self, customer: &DebitCustomer) -> Result<Value, ProviderError>;

    /// Create a contract for a customer.
    async fn create_contract(&self, contract: &NewContract) -> Result<Value, ProviderError>;

    /// Delete (archive) a customer.
    async fn delete_customer(&self, customer_id: &str) -> Result<(), ProviderError>;

    /// Skip collections between two dates (open-ended when `until` is `None`).
    async fn pause_contract(
        &self,
        contract_id: &str,
        from: NaiveDate,
        until: Option<NaiveDate>,
    ) -> Result<Value, ProviderError>;

    /// Resume collections.
    async fn resume_contract(&self, contract_id: &str) -> Result<Value, ProviderError>;
}

/// `reqwest` implementation of [`DirectDebitApi`].
#[derive(Clone, Debug)]
pub struct HttpDirectDebitApi {
    client: JsonClient,
}

impl HttpDirectDebitApi {
    /// Wrap a configured client.
    #[must_use]
    pub const fn new(client: JsonClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl DirectDebitApi for HttpDirectDebitApi {
    async fn find_schedule(&self, name: &str) -> Result<Option<Value>, ProviderError> {
        let response = self.client.get("/schedules").await?;
        let schedules = response
            .get("schedules")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        Ok(schedules
            .into_iter()
            .find(|schedule| schedule.get("name").and_then(Value::as_str) == Some(name)))
    }

    async fn create_customer(&self, customer: &DebitCustomer) -> Result<Value, ProviderError> {
        self.client.post("/customers", customer).await
    }

    async fn create_contract(&self, contract: &NewContract) -> Result<Value, ProviderError> {
        self.client
            .post(&format!("/customers/{}/contracts", contract.customer), contract)
            .await
    }

    async fn delete_customer(&self, customer_id: &str) -> Result<(), ProviderError> {
        match self.client.delete(&format!("/customers/{customer_id}")).await {
            Ok(_) => Ok(()),
            Err(e) if e.is_not_found() => Ok(()),
            Err(e) => Err(e),
        }
    }

    async fn pause_contract(
        &self,
        contract_id: &str,
        from: NaiveDate,
        until: Option<NaiveDate>,
    ) -> Result<Value, ProviderError> {
        let body = json!({ "from": from, "until": until });
        self.client
            .post(&format!("/contracts/{contract_id}/pause"), &body)
            .await
    }

    async fn resume_contract(&self, contract_id: &str) -> Result<Value, ProviderError> {
        self.client
            .post(&format!("/contracts/{contract_id}/resume"), &json!({}))
            .await
    }
}

/// Recurring contracts bound to a named schedule.
#[derive(Clone)]
pub struct DirectDebitGateway {
    api: Arc<dyn DirectDebitApi>,
    schedule_name: String,
    onboarding_delay_days: u32,
}

impl DirectDebitGateway {
    /// Default days between signup and the first collection.
    pub const DEFAULT_ONBOARDING_DELAY_DAYS: u32 = 10;

    /// Creates a direct-debit gateway bound to `schedule_name`.
    #[must_use]
    pub fn new(api: Arc<dyn DirectDebitApi>, schedule_name: impl Into<String>) -> Self {
        Self {
            api,
            schedule_name: schedule_name.into(),
            onboarding_delay_days: Self::DEFAULT_ONBOARDING_DELAY_DAYS,
        }
    }

    /// Override the onboarding delay.
    #[must_use]
    pub const fn with_onboarding_delay(mut self, days: u32) -> Self {
        self.onboarding_delay_days = days;
        self
    }

    /// First collection date for a contract signed on `today`.
    #[must_use]
    pub fn contract_start(&self, today: NaiveDate) -> NaiveDate {
        today
            .checked_add_days(Days::new(u64::from(self.onboarding_delay_days)))
            .unwrap_or(today)
    }

    fn vehicle_error(message: impl Into<String>) -> GatewayError {
        GatewayError::VehicleCreation {
            gateway: GatewayKind::DirectDebit,
            message: message.into(),
        }
    }

    fn contract_error(message: impl Into<String>) -> GatewayError {
        GatewayError::ContractUpdate {
            gateway: GatewayKind::DirectDebit,
            message: message.into(),
        }
    }
}

#[async_trait]
impl PaymentGateway for DirectDebitGateway {
    fn kind(&self) -> GatewayKind {
        GatewayKind::DirectDebit
    }

    async fn open_payer(
        &self,
        _request: &ChargeRequest,
        _created: &mut CreatedResources,
    ) -> Result<PayerSetup, GatewayError> {
        let schedule = self
            .api
            .find_schedule(&self.schedule_name)
            .await
            .map_err(|e| GatewayError::PayerCreation {
                gateway: GatewayKind::DirectDebit,
                message: e.to_string(),
            })?
            .ok_or_else(|| GatewayError::ScheduleMissing {
                schedule: self.schedule_name.clone(),
            })?;

        let schedule_id = find_str(&schedule, "id")
            .ok_or_else(|| GatewayError::PayerCreation {
                gateway: GatewayKind::DirectDebit,
                message: "schedule has no id".to_string(),
            })?
            .to_string();

        Ok(PayerSetup {
            payer_reference: None,
            linked_reference: Some(schedule_id),
            raw: schedule,
        })
    }

    async fn create_vehicle(
        &self,
        payer: &PayerSetup,
        request: &ChargeRequest,
        created: &mut CreatedResources,
    ) -> Result<ProviderReply, GatewayError> {
        let PayerDetails::DirectDebit {
            first_name,
            last_name,
            email,
            account_number,
            branch_code,
        } = &request.payer
        else {
            return Err(Self::vehicle_error("direct debit gateway requires bank details"));
        };
        let schedule = payer
            .linked_reference
            .clone()
            .ok_or_else(|| Self::vehicle_error("no schedule resolved"))?;

        let customer = self
            .api
            .create_customer(&DebitCustomer {
                reference: request.booking_reference.to_string(),
                first_name: first_name.clone(),
                last_name: last_name.clone(),
                email: email.clone(),
                account_number: account_number.clone(),
                branch_code: branch_code.clone(),
            })
            .await
            .map_err(|e| GatewayError::PayerCreation {
                gateway: GatewayKind::DirectDebit,
                message: e.to_string(),
            })?;
        let customer_id = find_str(&customer, "id")
            .ok_or_else(|| Self::vehicle_error("customer response has no id"))?
            .to_string();
        created.push(RemoteResource::Customer {
            id: customer_id.clone(),
        });

        let start = self.contract_start(request.today);
        let termination_date = request.plan.as_ref().and_then(|plan| plan.end_date(start));

        let contract = self
            .api
            .create_contract(&NewContract {
                customer: customer_id.clone(),
                schedule,
                amount: request.amount.minor(),
                start,
                termination_date,
                reference: request.booking_reference.to_string(),
            })
            .await
            .map_err(|e| Self::vehicle_error(e.to_string()))?;

        tracing::debug!(
            reference = %request.booking_reference,
            customer = %customer_id,
            %start,
            "Direct debit contract created"
        );

        Ok(ProviderReply {
            provider_reference: find_str(&contract, "id").map(str::to_string),
            payer_reference: Some(customer_id),
            raw: json!({ "customer": customer, "contract": contract }),
        })
    }

    fn normalize(&self, raw: &Value) -> PaymentStatus {
        let status = raw
            .get("contract")
            .and_then(provider_status)
            .or_else(|| provider_status(raw));
        match status.as_deref() {
            Some("failed" | "cancelled" | "canceled" | "unpaid") => PaymentStatus::Failed,
            Some("paid") => PaymentStatus::Paid,
            _ => PaymentStatus::Active,
        }
    }

    async fn compensate(&self, resource: &RemoteResource) -> Result<(), GatewayError> {
        match resource {
            RemoteResource::Customer { id } => self.api.delete_customer(id).await.map_err(|e| {
                GatewayError::PayerCreation {
                    gateway: GatewayKind::DirectDebit,
                    message: format!("failed to delete customer {id}: {e}"),
                }
            }),
        }
    }

    async fn pause_contract(
        &self,
        contract_reference: &str,
        from: NaiveDate,
        until: Option<NaiveDate>,
    ) -> Result<Value, GatewayError> {
        self.api
            .pause_contract(contract_reference, from, until)
            .await
            .map_err(|e| Self::contract_error(e.to_string()))
    }

    async fn resume_contract(&self, contract_reference: &str) -> Result<Value, GatewayError> {
        self.api
            .resume_contract(contract_reference)
            .await
            .map_err(|e| Self::contract_error(e.to_string()))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use classbook_core::payment::{BillingInterval, PaymentPlan};
    use classbook_core::types::{BookingReference, Money, PlanId};
    use std::sync::Mutex;

    #[derive(Default)]
    struct FakeAggregator {
        schedules: Vec<Value>,
        contracts: Mutex<Vec<NewContract>>,
    }

    #[async_trait]
    impl DirectDebitApi for FakeAggregator {
        async fn find_schedule(&self, name: &str) -> Result<Option<Value>, ProviderError> {
            Ok(self
                .schedules
                .iter()
                .find(|s| s["name"] == name)
                .cloned())
        }

        async fn create_customer(&self, _customer: &DebitCustomer) -> Result<Value, ProviderError> {
            Ok(json!({"id": "DDC1"}))
        }

        async fn create_contract(&self, contract: &NewContract) -> Result<Value, ProviderError> {
            self.contracts.lock().unwrap().push(contract.clone());
            Ok(json!({"id": "CON1", "status": "pending_activation"}))
        }

        async fn delete_customer(&self, _customer_id: &str) -> Result<(), ProviderError> {
            Ok(())
        }

        async fn pause_contract(
            &self,
            _contract_id: &str,
            _from: NaiveDate,
            _until: Option<NaiveDate>,
        ) -> Result<Value, ProviderError> {
            Ok(json!({"status": "paused"}))
        }

        async fn resume_contract(&self, _contract_id: &str) -> Result<Value, ProviderError> {
            Ok(json!({"status": "active"}))
        }
    }

    fn request(plan_duration: u32) -> ChargeRequest {
        ChargeRequest {
            booking_reference: BookingReference::new("BK-TEST0003".to_string()),
            amount: Money::from_minor(4500),
            payer: PayerDetails::DirectDebit {
                first_name: "Sam".to_string(),
                last_name: "Jones".to_string(),
                email: "sam@example.com".to_string(),
                account_number: "55779911".to_string(),
                branch_code: "200000".to_string(),
            },
            plan: Some(PaymentPlan {
                id: PlanId::new(),
                name: "Monthly".to_string(),
                price: Money::from_minor(4500),
                joining_fee: Money::ZERO,
                duration: plan_duration,
                interval: BillingInterval::Month,
            }),
            description: "Membership".to_string(),
            today: NaiveDate::from_ymd_opt(2025, 1, 1).unwrap(),
        }
    }

    #[tokio::test]
    async fn missing_schedule_fails_fast() {
        let gateway = DirectDebitGateway::new(Arc::new(FakeAggregator::default()), "Monthly Members");
        let mut created = CreatedResources::new();
        let result = gateway.open_payer(&request(0), &mut created).await;
        assert_eq!(
            result,
            Err(GatewayError::ScheduleMissing {
                schedule: "Monthly Members".to_string()
            })
        );
        assert!(created.is_empty());
    }

    #[tokio::test]
    async fn contract_starts_after_onboarding_delay_and_reports_active() {
        let api = Arc::new(FakeAggregator {
            schedules: vec![json!({"id": "SCH1", "name": "Monthly Members"})],
            ..FakeAggregator::default()
        });
        let gateway = DirectDebitGateway::new(api.clone(), "Monthly Members");
        let mut created = CreatedResources::new();
        let req = request(6);
        let payer = gateway.open_payer(&req, &mut created).await.unwrap();
        let reply = gateway.create_vehicle(&payer, &req, &mut created).await.unwrap();

        let contract = api.contracts.lock().unwrap()[0].clone();
        assert_eq!(contract.schedule, "SCH1");
        assert_eq!(contract.start, NaiveDate::from_ymd_opt(2025, 1, 11).unwrap());
        assert_eq!(contract.termination_date, NaiveDate::from_ymd_opt(2025, 7, 11));
        assert_eq!(reply.provider_reference.as_deref(), Some("CON1"));
        assert_eq!(reply.payer_reference.as_deref(), Some("DDC1"));
        assert_eq!(gateway.normalize(&reply.raw), PaymentStatus::Active);
        assert!(!created.is_empty());
    }

    #[test]
    fn failure_statuses() {
        let gateway = DirectDebitGateway::new(Arc::new(FakeAggregator::default()), "x");
        assert_eq!(gateway.normalize(&json!({"status": "unpaid"})), PaymentStatus::Failed);
        assert_eq!(
            gateway.normalize(&json!({"contract": {"status": "cancelled"}})),
            PaymentStatus::Failed
        );
        assert_eq!(gateway.normalize(&json!({"status": "paid"})), PaymentStatus::Paid);
    }
}
