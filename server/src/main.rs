//! Classbook worker.
//!
//! Connects to `PostgreSQL`, wires the configured payment gateways and runs the
//! background sweeps (waiting-list expiry, freeze windows, requested
//! cancellations, stale seat holds) until Ctrl+C.

mod collaborators;
mod config;
mod metrics;

use anyhow::Context;
use classbook_core::environment::SystemClock;
use classbook_gateways::bank_transfer::HttpBankTransferApi;
use classbook_gateways::card::HttpCardAcquirer;
use classbook_gateways::direct_debit::HttpDirectDebitApi;
use classbook_gateways::{BankTransferGateway, CardGateway, DirectDebitGateway, JsonClient};
use classbook_postgres::PgBookingStore;
use classbook_runtime::backoff::RetryPolicy;
use classbook_runtime::{
    BookingSettings, Classbook, Collaborators, GatewayRegistry, OrchestratorConfig,
    PaymentOrchestrator, Scheduler,
};
use collaborators::{FileTemplates, TracingAuditLog, TracingMailer, TracingNotifier};
use config::{Config, GatewaysConfig, ProviderConfig};
use metrics::MetricsServer;
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // .env is optional
    let _ = dotenvy::dotenv();

    let config = Config::from_env().context("Invalid configuration")?;

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.server.log_level.clone().into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Classbook worker");

    MetricsServer::new(config.server.metrics_addr).start()?;

    let pool = PgPoolOptions::new()
        .max_connections(config.database.max_connections)
        .min_connections(config.database.min_connections)
        .acquire_timeout(config.database.connect_timeout)
        .connect(&config.database.url)
        .await
        .context("Failed to connect to the database")?;
    let store = Arc::new(PgBookingStore::from_pool(pool));
    store.migrate().await?;
    info!(
        max_connections = config.database.max_connections,
        "Database connected and migrated"
    );

    let registry = gateway_registry(&config.gateways)?;
    info!(gateways = ?registry, "Payment gateways configured");

    let compensation = RetryPolicy::builder()
        .max_retries(config.payments.compensation_retries)
        .initial_delay(config.payments.compensation_initial_delay)
        .build();
    let payments = PaymentOrchestrator::new(
        registry,
        OrchestratorConfig {
            call_timeout: config.payments.call_timeout,
            compensation,
        },
    );

    let templates = match &config.server.email_templates {
        Some(path) => FileTemplates::load(path)?,
        None => {
            tracing::warn!("EMAIL_TEMPLATES_PATH not set; confirmation emails are disabled");
            FileTemplates::empty()
        },
    };
    let collaborators = Collaborators::new(
        Arc::new(TracingNotifier),
        Arc::new(templates),
        Arc::new(TracingMailer),
        Arc::new(TracingAuditLog),
    );

    let classbook = Classbook::new(
        store,
        Arc::new(SystemClock),
        payments,
        collaborators,
        BookingSettings {
            hold_ttl: config.payments.hold_ttl,
            statement_prefix: config.payments.statement_prefix.clone(),
        },
    );

    let mut scheduler = Scheduler::new(classbook.sweeps(&config.sweeps));
    scheduler.spawn();
    info!(sweeps = scheduler.sweep_count(), "Press Ctrl+C to shutdown");

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl+C")?;
    info!("Shutdown signal received");

    scheduler.shutdown(config.server.shutdown_timeout).await?;
    info!("Classbook worker stopped");
    Ok(())
}

fn client(provider: &ProviderConfig, timeout: Duration) -> anyhow::Result<JsonClient> {
    JsonClient::new(&provider.base_url, &provider.api_key, timeout)
        .with_context(|| format!("Failed to build HTTP client for {}", provider.base_url))
}

fn gateway_registry(gateways: &GatewaysConfig) -> anyhow::Result<GatewayRegistry> {
    let timeout = gateways.request_timeout;
    let mut registry = GatewayRegistry::new();

    if let Some(card) = &gateways.card {
        let api = HttpCardAcquirer::new(client(&card.provider, timeout)?);
        registry = registry.with(Arc::new(CardGateway::new(Arc::new(api), &card.currency)));
    }
    if let Some(bank) = &gateways.bank_transfer {
        let api = HttpBankTransferApi::new(client(&bank.provider, timeout)?);
        registry = registry.with(Arc::new(BankTransferGateway::new(Arc::new(api), &bank.currency)));
    }
    if let Some(debit) = &gateways.direct_debit {
        let api = HttpDirectDebitApi::new(client(&debit.provider, timeout)?);
        let gateway = DirectDebitGateway::new(Arc::new(api), &debit.schedule_name)
            .with_onboarding_delay(debit.onboarding_delay_days);
        registry = registry.with(Arc::new(gateway));
    }

    Ok(registry)
}
