//! Scriptable provider API mocks.
//!
//! Each mock implements one provider API trait from `classbook-gateways`, so the real
//! adapters run unchanged on top of it. Replies, failures and latency can be changed
//! after the mock is shared.

use crate::lock;
use async_trait::async_trait;
use chrono::NaiveDate;
use classbook_gateways::ProviderError;
use classbook_gateways::bank_transfer::{
    BankTransferApi, NewBankAccount, NewBillingRequest, NewCustomer,
};
use classbook_gateways::card::{CardAcquirerApi, CardCharge};
use classbook_gateways::direct_debit::{DebitCustomer, DirectDebitApi, NewContract};
use serde_json::{Value, json};
use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

fn unavailable() -> ProviderError {
    ProviderError::Status {
        status: 503,
        body: "provider unavailable".to_string(),
    }
}

async fn pause(latency: Option<Duration>) {
    if let Some(latency) = latency {
        tokio::time::sleep(latency).await;
    }
}

/// Mock card acquirer.
///
/// Answers `{"status": "success"}` unless replies are queued.
#[derive(Debug, Default)]
pub struct MockCardAcquirer {
    replies: Mutex<VecDeque<Result<Value, ProviderError>>>,
    latency: Mutex<Option<Duration>>,
    charges: Mutex<Vec<CardCharge>>,
    counter: AtomicUsize,
}

impl MockCardAcquirer {
    /// Acquirer that approves everything
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a raw reply for the next charge.
    pub fn push_reply(&self, reply: Result<Value, ProviderError>) {
        lock(&self.replies).push_back(reply);
    }

    /// Queue a decline for the next charge.
    pub fn decline_next(&self) {
        self.push_reply(Ok(json!({"id": "ch_declined", "status": "declined", "reason": "do_not_honor"})));
    }

    /// Delay every call.
    pub fn set_latency(&self, latency: Duration) {
        *lock(&self.latency) = Some(latency);
    }

    /// Charges received.
    pub fn charges(&self) -> Vec<CardCharge> {
        lock(&self.charges).clone()
    }
}

#[async_trait]
impl CardAcquirerApi for MockCardAcquirer {
    async fn charge(&self, charge: &CardCharge) -> Result<Value, ProviderError> {
        let latency = *lock(&self.latency);
        pause(latency).await;
        lock(&self.charges).push(charge.clone());
        let n = self.counter.fetch_add(1, Ordering::SeqCst) + 1;
        lock(&self.replies)
            .pop_front()
            .unwrap_or_else(|| Ok(json!({"id": format!("ch_{n}"), "status": "success"})))
    }
}

/// Failure switches for [`MockBankTransferApi`].
#[derive(Clone, Copy, Debug, Default)]
pub struct BankFailures {
    /// Customer creation fails
    pub customer: bool,
    /// Bank account creation fails
    pub bank_account: bool,
    /// Billing request creation fails
    pub billing_request: bool,
    /// Customer deletion fails this many times before succeeding
    pub delete_attempts: usize,
}

/// Mock open-banking provider.
#[derive(Debug)]
pub struct MockBankTransferApi {
    failures: Mutex<BankFailures>,
    billing_status: Mutex<String>,
    latency: Mutex<Option<Duration>>,
    customers: Mutex<Vec<String>>,
    deleted: Mutex<Vec<String>>,
    delete_calls: AtomicUsize,
    counter: AtomicUsize,
}

impl Default for MockBankTransferApi {
    fn default() -> Self {
        Self {
            failures: Mutex::new(BankFailures::default()),
            billing_status: Mutex::new("pending".to_string()),
            latency: Mutex::new(None),
            customers: Mutex::new(Vec::new()),
            deleted: Mutex::new(Vec::new()),
            delete_calls: AtomicUsize::new(0),
            counter: AtomicUsize::new(0),
        }
    }
}

impl MockBankTransferApi {
    /// Provider whose billing requests come back `pending`
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set failure switches.
    pub fn set_failures(&self, failures: BankFailures) {
        *lock(&self.failures) = failures;
    }

    /// Status returned for new billing requests.
    pub fn set_billing_status(&self, status: &str) {
        *lock(&self.billing_status) = status.to_string();
    }

    /// Delay the billing request call.
    pub fn set_latency(&self, latency: Duration) {
        *lock(&self.latency) = Some(latency);
    }

    /// Customers created and not deleted.
    pub fn live_customers(&self) -> Vec<String> {
        let deleted = lock(&self.deleted).clone();
        lock(&self.customers)
            .iter()
            .filter(|c| !deleted.contains(c))
            .cloned()
            .collect()
    }

    /// Customers deleted.
    pub fn deleted_customers(&self) -> Vec<String> {
        lock(&self.deleted).clone()
    }

    /// Number of delete calls, including failed ones.
    pub fn delete_calls(&self) -> usize {
        self.delete_calls.load(Ordering::SeqCst)
    }

    fn next_id(&self, prefix: &str) -> String {
        format!("{prefix}{}", self.counter.fetch_add(1, Ordering::SeqCst) + 1)
    }
}

#[async_trait]
impl BankTransferApi for MockBankTransferApi {
    async fn create_customer(&self, customer: &NewCustomer) -> Result<Value, ProviderError> {
        if lock(&self.failures).customer {
            return Err(unavailable());
        }
        let id = self.next_id("CU");
        lock(&self.customers).push(id.clone());
        Ok(json!({"customers": {"id": id, "email": customer.email}}))
    }

    async fn create_bank_account(&self, _account: &NewBankAccount) -> Result<Value, ProviderError> {
        if lock(&self.failures).bank_account {
            return Err(unavailable());
        }
        Ok(json!({"customer_bank_accounts": {"id": self.next_id("BA")}}))
    }

    async fn create_billing_request(&self, request: &NewBillingRequest) -> Result<Value, ProviderError> {
        let latency = *lock(&self.latency);
        pause(latency).await;
        if lock(&self.failures).billing_request {
            return Err(unavailable());
        }
        let status = lock(&self.billing_status).clone();
        Ok(json!({
            "billing_requests": {
                "id": self.next_id("BRQ"),
                "status": status,
                "amount": request.amount,
            }
        }))
    }

    async fn delete_customer(&self, customer_id: &str) -> Result<(), ProviderError> {
        let call = self.delete_calls.fetch_add(1, Ordering::SeqCst);
        if call < lock(&self.failures).delete_attempts {
            return Err(unavailable());
        }
        lock(&self.deleted).push(customer_id.to_string());
        Ok(())
    }
}

/// Mock direct-debit aggregator.
#[derive(Debug, Default)]
pub struct MockDirectDebitApi {
    schedules: Mutex<Vec<Value>>,
    fail_contract: Mutex<bool>,
    fail_pause: Mutex<bool>,
    latency: Mutex<Option<Duration>>,
    customers: Mutex<Vec<String>>,
    deleted: Mutex<Vec<String>>,
    contracts: Mutex<Vec<NewContract>>,
    pauses: Mutex<Vec<(String, NaiveDate, Option<NaiveDate>)>>,
    resumes: Mutex<Vec<String>>,
    counter: AtomicUsize,
}

impl MockDirectDebitApi {
    /// Aggregator with no schedules provisioned
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Aggregator with one schedule provisioned
    #[must_use]
    pub fn with_schedule(name: &str) -> Self {
        let api = Self::default();
        api.add_schedule(name);
        api
    }

    /// Provision a schedule.
    pub fn add_schedule(&self, name: &str) {
        let id = format!("SCH{}", lock(&self.schedules).len() + 1);
        lock(&self.schedules).push(json!({"id": id, "name": name}));
    }

    /// Make contract creation fail.
    pub fn fail_contracts(&self, fail: bool) {
        *lock(&self.fail_contract) = fail;
    }

    /// Make pause calls fail.
    pub fn fail_pauses(&self, fail: bool) {
        *lock(&self.fail_pause) = fail;
    }

    /// Delay contract creation.
    pub fn set_latency(&self, latency: Duration) {
        *lock(&self.latency) = Some(latency);
    }

    /// Contracts created.
    pub fn contracts(&self) -> Vec<NewContract> {
        lock(&self.contracts).clone()
    }

    /// Pause calls received as `(contract, from, until)`.
    pub fn pauses(&self) -> Vec<(String, NaiveDate, Option<NaiveDate>)> {
        lock(&self.pauses).clone()
    }

    /// Resume calls received.
    pub fn resumes(&self) -> Vec<String> {
        lock(&self.resumes).clone()
    }

    /// Customers created.
    pub fn customers(&self) -> Vec<String> {
        lock(&self.customers).clone()
    }

    /// Customers deleted.
    pub fn deleted_customers(&self) -> Vec<String> {
        lock(&self.deleted).clone()
    }

    fn next_id(&self, prefix: &str) -> String {
        format!("{prefix}{}", self.counter.fetch_add(1, Ordering::SeqCst) + 1)
    }
}

#[async_trait]
impl DirectDebitApi for MockDirectDebitApi {
    async fn find_schedule(&self, name: &str) -> Result<Option<Value>, ProviderError> {
        Ok(lock(&self.schedules)
            .iter()
            .find(|s| s.get("name").and_then(Value::as_str) == Some(name))
            .cloned())
    }

    async fn create_customer(&self, customer: &DebitCustomer) -> Result<Value, ProviderError> {
        let id = self.next_id("DDC");
        lock(&self.customers).push(id.clone());
        Ok(json!({"id": id, "email": customer.email}))
    }

    async fn create_contract(&self, contract: &NewContract) -> Result<Value, ProviderError> {
        let latency = *lock(&self.latency);
        pause(latency).await;
        if *lock(&self.fail_contract) {
            return Err(unavailable());
        }
        lock(&self.contracts).push(contract.clone());
        Ok(json!({"id": self.next_id("CON"), "status": "pending_activation"}))
    }

    async fn delete_customer(&self, customer_id: &str) -> Result<(), ProviderError> {
        lock(&self.deleted).push(customer_id.to_string());
        Ok(())
    }

    async fn pause_contract(
        &self,
        contract_id: &str,
        from: NaiveDate,
        until: Option<NaiveDate>,
    ) -> Result<Value, ProviderError> {
        if *lock(&self.fail_pause) {
            return Err(unavailable());
        }
        lock(&self.pauses).push((contract_id.to_string(), from, until));
        Ok(json!({"id": contract_id, "status": "paused"}))
    }

    async fn resume_contract(&self, contract_id: &str) -> Result<Value, ProviderError> {
        lock(&self.resumes).push(contract_id.to_string());
        Ok(json!({"id": contract_id, "status": "active"}))
    }
}
