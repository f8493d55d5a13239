//! Shared wiring for runtime integration tests.

#![allow(dead_code, clippy::unwrap_used, clippy::expect_used)]

use classbook_core::request::Panel;
use classbook_gateways::bank_transfer::BankTransferGateway;
use classbook_gateways::card::CardGateway;
use classbook_gateways::direct_debit::DirectDebitGateway;
use classbook_runtime::backoff::RetryPolicy;
use classbook_runtime::{
    BookingSettings, Classbook, Collaborators, GatewayRegistry, OrchestratorConfig,
    PaymentOrchestrator,
};
use classbook_testing::{
    InMemoryStore, InMemoryTemplates, ManualClock, MockBankTransferApi, MockCardAcquirer,
    MockDirectDebitApi, RecordingAuditLog, RecordingMailer, RecordingNotifier, fixtures,
    init_tracing,
};
use std::sync::Arc;
use std::time::Duration;

/// A runtime over in-memory infrastructure with every mock exposed.
pub struct Harness {
    pub store: Arc<InMemoryStore>,
    pub clock: ManualClock,
    pub card: Arc<MockCardAcquirer>,
    pub bank: Arc<MockBankTransferApi>,
    pub debit: Arc<MockDirectDebitApi>,
    pub notifier: Arc<RecordingNotifier>,
    pub mailer: Arc<RecordingMailer>,
    pub audit: Arc<RecordingAuditLog>,
    pub classbook: Classbook<InMemoryStore>,
}

impl Harness {
    pub fn new() -> Self {
        Self::build(
            fast_config(Duration::from_secs(5)),
            MockDirectDebitApi::with_schedule(fixtures::SCHEDULE),
        )
    }

    /// Provider calls are cut off after `call_timeout`.
    pub fn with_call_timeout(call_timeout: Duration) -> Self {
        Self::build(
            fast_config(call_timeout),
            MockDirectDebitApi::with_schedule(fixtures::SCHEDULE),
        )
    }

    /// The direct-debit aggregator has no schedule provisioned.
    pub fn without_schedule() -> Self {
        Self::build(fast_config(Duration::from_secs(5)), MockDirectDebitApi::new())
    }

    fn build(config: OrchestratorConfig, debit: MockDirectDebitApi) -> Self {
        init_tracing();

        let store = Arc::new(InMemoryStore::new());
        let clock = ManualClock::starting_at_test_epoch();
        let card = Arc::new(MockCardAcquirer::new());
        let bank = Arc::new(MockBankTransferApi::new());
        let debit = Arc::new(debit);

        let registry = GatewayRegistry::new()
            .with(Arc::new(CardGateway::new(Arc::clone(&card) as _, "GBP")))
            .with(Arc::new(BankTransferGateway::new(Arc::clone(&bank) as _, "GBP")))
            .with(Arc::new(DirectDebitGateway::new(Arc::clone(&debit) as _, fixtures::SCHEDULE)));

        let notifier = Arc::new(RecordingNotifier::new());
        let mailer = Arc::new(RecordingMailer::new());
        let audit = Arc::new(RecordingAuditLog::new());
        let templates = InMemoryTemplates::new()
            .with(Panel::Website, "booking_confirmation", "Booking confirmed", "<p>See you soon</p>")
            .with(Panel::Website, "waiting_list_confirmation", "You are on the waiting list", "<p>We will be in touch</p>")
            .with(Panel::Admin, "booking_confirmation", "Booking confirmed", "<p>See you soon</p>")
            .with(Panel::Admin, "booking_frozen", "Membership frozen", "<p>Enjoy the break</p>");
        let collaborators = Collaborators::new(
            Arc::clone(&notifier) as _,
            Arc::new(templates),
            Arc::clone(&mailer) as _,
            Arc::clone(&audit) as _,
        );

        let classbook = Classbook::new(
            Arc::clone(&store),
            Arc::new(clock.clone()),
            PaymentOrchestrator::new(registry, config),
            collaborators,
            BookingSettings::default(),
        );

        Self {
            store,
            clock,
            card,
            bank,
            debit,
            notifier,
            mailer,
            audit,
            classbook,
        }
    }
}

fn fast_config(call_timeout: Duration) -> OrchestratorConfig {
    OrchestratorConfig {
        call_timeout,
        compensation: RetryPolicy::builder()
            .max_retries(3)
            .initial_delay(Duration::from_millis(1))
            .max_delay(Duration::from_millis(5))
            .jitter(0.0)
            .build(),
    }
}
