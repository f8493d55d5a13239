//! Payment orchestration.
//!
//! [`PaymentOrchestrator::execute`] runs one gateway's three-step sequence with a
//! timeout on every remote call, and compensates already-created remote resources
//! when a later step fails, times out or is declined. It never touches the store:
//! callers decide what to persist from the returned [`PaymentRun`].

use crate::backoff::{RetryPolicy, retry_with_backoff};
use crate::metrics::PaymentMetrics;
use chrono::{DateTime, NaiveDate, Utc};
use classbook_core::error::{BookingError, GatewayError};
use classbook_core::payment::{GatewayKind, PaymentAttempt, PaymentStatus};
use classbook_core::types::{AttemptId, BookingId, BookingReference, Money};
use classbook_gateways::{
    ChargeRequest, CreatedResources, PayerSetup, PaymentGateway, ProviderReply, provider_status,
};
use serde_json::{Value, json};
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Configured gateways, one per family.
#[derive(Clone, Default)]
pub struct GatewayRegistry {
    gateways: HashMap<GatewayKind, Arc<dyn PaymentGateway>>,
}

impl GatewayRegistry {
    /// Registry with no gateways
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a gateway, replacing any earlier one of the same family.
    #[must_use]
    pub fn with(mut self, gateway: Arc<dyn PaymentGateway>) -> Self {
        self.gateways.insert(gateway.kind(), gateway);
        self
    }

    /// Gateway for `kind`.
    ///
    /// # Errors
    ///
    /// Validation error when the family is not configured.
    pub fn get(&self, kind: GatewayKind) -> Result<Arc<dyn PaymentGateway>, BookingError> {
        self.gateways.get(&kind).cloned().ok_or_else(|| {
            BookingError::validation("payment.kind", format!("{kind} payments are not enabled"))
        })
    }
}

impl fmt::Debug for GatewayRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut kinds: Vec<&str> = self.gateways.keys().map(GatewayKind::as_str).collect();
        kinds.sort_unstable();
        f.debug_struct("GatewayRegistry").field("gateways", &kinds).finish()
    }
}

/// Orchestrator tuning.
#[derive(Debug, Clone, PartialEq)]
pub struct OrchestratorConfig {
    /// Upper bound on every single remote call
    pub call_timeout: Duration,
    /// Backoff for compensation deletes
    pub compensation: RetryPolicy,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            call_timeout: Duration::from_secs(20),
            compensation: RetryPolicy::default(),
        }
    }
}

/// Result of one gateway sequence.
///
/// A failed sequence is still a run: it carries the status, payload and error so
/// the caller can record the attempt.
#[derive(Debug, Clone, PartialEq)]
pub struct PaymentRun {
    /// Gateway used
    pub gateway: GatewayKind,
    /// Amount requested
    pub amount: Money,
    /// Normalized status
    pub status: PaymentStatus,
    /// Provider ID of the charge, billing request or contract
    pub provider_reference: Option<String>,
    /// Provider ID of the payer
    pub payer_reference: Option<String>,
    /// Provider payload, or a stage/error summary when a call failed
    pub raw: Value,
    /// Compensation report and other run notes
    pub metadata: Value,
    /// Why the run failed
    pub error: Option<BookingError>,
}

impl PaymentRun {
    /// Whether the booking may be committed on the back of this run.
    #[must_use]
    pub fn succeeded(&self) -> bool {
        self.error.is_none() && self.status.allows_commit()
    }

    /// Failure reason code stored on the attempt.
    #[must_use]
    pub fn failure_reason(&self) -> Option<String> {
        self.error.as_ref().map(|error| match error {
            BookingError::Gateway(gateway) => gateway.stage().to_string(),
            other => other.reason().to_string(),
        })
    }

    /// New attempt record for this run.
    #[must_use]
    pub fn to_attempt(
        &self,
        booking_id: Option<BookingId>,
        booking_reference: &BookingReference,
        now: DateTime<Utc>,
    ) -> PaymentAttempt {
        PaymentAttempt {
            id: AttemptId::new(),
            booking_id,
            booking_reference: booking_reference.clone(),
            gateway: self.gateway,
            amount: self.amount,
            status: self.status,
            provider_reference: self.provider_reference.clone(),
            payer_reference: self.payer_reference.clone(),
            raw_response: self.raw.clone(),
            metadata: self.metadata.clone(),
            failure_reason: self.failure_reason(),
            retry_count: 0,
            created_at: now,
            updated_at: now,
        }
    }

    /// Overwrite an existing attempt with this run, counting a retry.
    pub fn apply_to(&self, attempt: &mut PaymentAttempt, now: DateTime<Utc>) {
        attempt.gateway = self.gateway;
        attempt.amount = self.amount;
        attempt.status = self.status;
        attempt.provider_reference.clone_from(&self.provider_reference);
        attempt.payer_reference.clone_from(&self.payer_reference);
        attempt.raw_response = self.raw.clone();
        attempt.failure_reason = self.failure_reason();
        attempt.retry_count = attempt.retry_count.saturating_add(1);
        attempt.updated_at = now;
        if let (Some(notes), Some(target)) = (self.metadata.as_object(), attempt.metadata.as_object_mut()) {
            for (key, value) in notes {
                target.insert(key.clone(), value.clone());
            }
        }
    }
}

/// Compensation summary.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CompensationReport {
    /// Deletes attempted
    pub attempted: usize,
    /// Deletes that still failed after retries
    pub failed: usize,
}

/// Attempt that pays through a recurring contract, if `attempt` is one.
#[must_use]
pub fn recurring_contract(attempt: Option<&PaymentAttempt>) -> Option<&PaymentAttempt> {
    attempt.filter(|attempt| {
        attempt.gateway.is_recurring()
            && attempt.status.allows_commit()
            && attempt.provider_reference.is_some()
    })
}

/// Runs gateway sequences and contract updates.
#[derive(Debug, Clone)]
pub struct PaymentOrchestrator {
    registry: GatewayRegistry,
    config: OrchestratorConfig,
}

impl PaymentOrchestrator {
    /// Creates a new orchestrator
    #[must_use]
    pub const fn new(registry: GatewayRegistry, config: OrchestratorConfig) -> Self {
        Self { registry, config }
    }

    /// Orchestrator tuning.
    #[must_use]
    pub const fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Run the sequence of the gateway selected by the payer details.
    ///
    /// # Errors
    ///
    /// Only when no gateway is configured for the payer; provider failures are
    /// reported inside the returned [`PaymentRun`].
    pub async fn execute(&self, request: &ChargeRequest) -> Result<PaymentRun, BookingError> {
        let gateway = self.registry.get(request.payer.gateway())?;
        let kind = gateway.kind();
        let started = Instant::now();
        let mut created = CreatedResources::new();

        let steps = self.run_steps(gateway.as_ref(), request, &mut created).await;
        let mut run = match steps {
            Ok((payer, reply)) => {
                let status = gateway.normalize(&reply.raw);
                let error = (status == PaymentStatus::Failed).then(|| {
                    BookingError::from(GatewayError::Declined {
                        gateway: kind,
                        message: provider_status(&reply.raw).unwrap_or_else(|| "failed".to_string()),
                    })
                });
                PaymentRun {
                    gateway: kind,
                    amount: request.amount,
                    status,
                    provider_reference: reply.provider_reference,
                    payer_reference: reply.payer_reference.or(payer.payer_reference),
                    raw: reply.raw,
                    metadata: json!({}),
                    error,
                }
            },
            Err(error) => PaymentRun {
                gateway: kind,
                amount: request.amount,
                status: PaymentStatus::Failed,
                provider_reference: None,
                payer_reference: None,
                raw: json!({"stage": error.stage(), "error": error.to_string()}),
                metadata: json!({}),
                error: Some(BookingError::from(error)),
            },
        };

        if !run.succeeded() && !created.is_empty() {
            let report = self.compensate(gateway.as_ref(), &created).await;
            run.metadata = json!({
                "compensation": {"attempted": report.attempted, "failed": report.failed}
            });
        }

        PaymentMetrics::record_sequence(kind.as_str(), run.status.as_str(), started.elapsed());
        match &run.error {
            None => tracing::info!(
                gateway = %kind,
                booking_reference = %request.booking_reference,
                status = %run.status.as_str(),
                "Payment sequence completed"
            ),
            Some(error) => tracing::warn!(
                gateway = %kind,
                booking_reference = %request.booking_reference,
                error = %error,
                "Payment sequence failed"
            ),
        }
        Ok(run)
    }

    async fn run_steps(
        &self,
        gateway: &dyn PaymentGateway,
        request: &ChargeRequest,
        created: &mut CreatedResources,
    ) -> Result<(PayerSetup, ProviderReply), GatewayError> {
        let kind = gateway.kind();
        let payer = self
            .timed(gateway.open_payer(request, created), |message| {
                GatewayError::PayerCreation { gateway: kind, message }
            })
            .await?;
        let reply = self
            .timed(gateway.create_vehicle(&payer, request, created), |message| {
                GatewayError::VehicleCreation { gateway: kind, message }
            })
            .await?;
        Ok((payer, reply))
    }

    async fn timed<T, F>(
        &self,
        call: F,
        on_timeout: impl FnOnce(String) -> GatewayError,
    ) -> Result<T, GatewayError>
    where
        F: Future<Output = Result<T, GatewayError>>,
    {
        let limit = self.config.call_timeout;
        tokio::time::timeout(limit, call).await.unwrap_or_else(|_| {
            Err(on_timeout(format!("timed out after {}ms", limit.as_millis())))
        })
    }

    async fn compensate(
        &self,
        gateway: &dyn PaymentGateway,
        created: &CreatedResources,
    ) -> CompensationReport {
        let mut report = CompensationReport::default();
        for resource in created.newest_first() {
            report.attempted += 1;
            let outcome = retry_with_backoff(&self.config.compensation, "compensate", || async move {
                self.timed(gateway.compensate(resource), |message| GatewayError::VehicleCreation {
                    gateway: gateway.kind(),
                    message: format!("compensation {message}"),
                })
                .await
            })
            .await;
            match outcome {
                Ok(()) => {
                    PaymentMetrics::record_compensation(gateway.kind().as_str(), "success");
                    tracing::info!(
                        gateway = %gateway.kind(),
                        resource = resource.kind(),
                        id = resource.id(),
                        "Compensated remote resource"
                    );
                },
                Err(error) => {
                    report.failed += 1;
                    PaymentMetrics::record_compensation(gateway.kind().as_str(), "failed");
                    tracing::error!(
                        gateway = %gateway.kind(),
                        resource = resource.kind(),
                        id = resource.id(),
                        error = %error,
                        "Compensation failed; remote resource left behind"
                    );
                },
            }
        }
        report
    }

    /// Normalize a provider payload for an existing attempt.
    ///
    /// # Errors
    ///
    /// Validation error when the attempt's gateway is no longer configured.
    pub fn normalize(&self, kind: GatewayKind, raw: &Value) -> Result<PaymentStatus, BookingError> {
        Ok(self.registry.get(kind)?.normalize(raw))
    }

    /// Pause the contract behind `attempt` from `from` until `until` (open-ended if `None`).
    ///
    /// # Errors
    ///
    /// Gateway error when the provider refuses or times out.
    pub async fn pause_contract(
        &self,
        attempt: &PaymentAttempt,
        from: NaiveDate,
        until: Option<NaiveDate>,
    ) -> Result<Value, BookingError> {
        let gateway = self.registry.get(attempt.gateway)?;
        let contract = Self::contract_reference(attempt)?;
        let kind = gateway.kind();
        let reply = self
            .timed(gateway.pause_contract(contract, from, until), |message| {
                GatewayError::ContractUpdate { gateway: kind, message }
            })
            .await?;
        tracing::info!(gateway = %kind, contract, %from, until = ?until, "Paused contract");
        Ok(reply)
    }

    /// Resume the contract behind `attempt`.
    ///
    /// # Errors
    ///
    /// Gateway error when the provider refuses or times out.
    pub async fn resume_contract(&self, attempt: &PaymentAttempt) -> Result<Value, BookingError> {
        let gateway = self.registry.get(attempt.gateway)?;
        let contract = Self::contract_reference(attempt)?;
        let kind = gateway.kind();
        let reply = self
            .timed(gateway.resume_contract(contract), |message| GatewayError::ContractUpdate {
                gateway: kind,
                message,
            })
            .await?;
        tracing::info!(gateway = %kind, contract, "Resumed contract");
        Ok(reply)
    }

    fn contract_reference(attempt: &PaymentAttempt) -> Result<&str, BookingError> {
        attempt.provider_reference.as_deref().ok_or_else(|| {
            BookingError::Internal(format!("payment attempt {} has no contract reference", attempt.id))
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn registry_rejects_unconfigured_gateway() {
        let registry = GatewayRegistry::new();
        let error = registry.get(GatewayKind::Card).err().unwrap();
        assert_eq!(error.reason(), "validation_error");
    }

    #[test]
    fn failed_run_reports_gateway_stage() {
        let run = PaymentRun {
            gateway: GatewayKind::BankTransfer,
            amount: Money::from_minor(1000),
            status: PaymentStatus::Failed,
            provider_reference: None,
            payer_reference: None,
            raw: json!({}),
            metadata: json!({}),
            error: Some(BookingError::Gateway(GatewayError::PayerCreation {
                gateway: GatewayKind::BankTransfer,
                message: "503".to_string(),
            })),
        };
        assert!(!run.succeeded());
        assert_eq!(run.failure_reason().as_deref(), Some("payer_creation"));
    }

    #[test]
    fn apply_to_counts_retries_and_keeps_history() {
        let now = Utc::now();
        let reference = BookingReference::generate();
        let failed = PaymentRun {
            gateway: GatewayKind::Card,
            amount: Money::from_minor(1000),
            status: PaymentStatus::Failed,
            provider_reference: Some("ch_1".to_string()),
            payer_reference: None,
            raw: json!({"status": "declined"}),
            metadata: json!({}),
            error: Some(BookingError::Gateway(GatewayError::Declined {
                gateway: GatewayKind::Card,
                message: "declined".to_string(),
            })),
        };
        let mut attempt = failed.to_attempt(None, &reference, now);
        attempt.metadata = json!({"note": "kept"});

        let paid = PaymentRun {
            status: PaymentStatus::Paid,
            provider_reference: Some("ch_2".to_string()),
            raw: json!({"status": "success"}),
            error: None,
            ..failed
        };
        paid.apply_to(&mut attempt, now);

        assert_eq!(attempt.retry_count, 1);
        assert_eq!(attempt.status, PaymentStatus::Paid);
        assert_eq!(attempt.failure_reason, None);
        assert_eq!(attempt.provider_reference.as_deref(), Some("ch_2"));
        assert_eq!(attempt.metadata["note"], "kept");
    }
}
