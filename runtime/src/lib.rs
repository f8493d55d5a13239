//! # Classbook Runtime
//!
//! The imperative shell around the booking lifecycle reducer.
//!
//! Every operation follows the same shape:
//!
//! 1. Read and validate with plain store reads (no locks)
//! 2. Run remote provider calls with no lock held (payment sequences, contract pause/resume)
//! 3. Open one [`UnitOfWork`](classbook_core::store::UnitOfWork), re-run the reducer against
//!    the locked booking, execute its capacity effects and writes, commit
//! 4. After the commit, notify, email and audit through the collaborators
//!
//! Paid placements split step 3 into a seat hold before the remote calls and a
//! finalizing commit after them (see [`booking`]).
//!
//! ## Example
//!
//! ```ignore
//! let classbook = Classbook::new(store, clock, orchestrator, collaborators, BookingSettings::default());
//! let outcome = classbook.bookings().create(request).await?;
//! let scheduler = Scheduler::new(classbook.sweeps(&SweepSchedule::default()));
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod accounts;
pub mod backoff;
pub mod booking;
pub mod cancellation;
pub mod dispatch;
pub mod freeze;
pub mod metrics;
pub mod orchestrator;
pub mod reconcile;
pub mod retry;
pub mod scheduler;
pub mod seats;
pub mod sweeper;
mod transition;

use classbook_core::collaborators::{AuditLog, EmailTemplates, Mailer, Notifier};
use classbook_core::environment::Clock;
use classbook_core::lifecycle::{BookingReducer, LifecycleEnvironment};
use classbook_core::store::BookingStore;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

pub use booking::BookingService;
pub use cancellation::{CancelRequest, CancellationService};
pub use dispatch::Dispatcher;
pub use freeze::{FreezeRequest, FreezeService};
pub use orchestrator::{GatewayRegistry, OrchestratorConfig, PaymentOrchestrator, PaymentRun};
pub use reconcile::{ReconcileOutcome, Reconciler};
pub use retry::RetryController;
pub use scheduler::{Scheduler, SchedulerError, SweepSchedule};
pub use sweeper::{Sweep, SweepReport};

/// External collaborators invoked after commits.
#[derive(Clone)]
pub struct Collaborators {
    /// In-app notifications
    pub notifier: Arc<dyn Notifier>,
    /// Email template lookup
    pub templates: Arc<dyn EmailTemplates>,
    /// Email delivery
    pub mailer: Arc<dyn Mailer>,
    /// Audit log
    pub audit: Arc<dyn AuditLog>,
}

impl Collaborators {
    /// Creates a new collaborator set
    #[must_use]
    pub fn new(
        notifier: Arc<dyn Notifier>,
        templates: Arc<dyn EmailTemplates>,
        mailer: Arc<dyn Mailer>,
        audit: Arc<dyn AuditLog>,
    ) -> Self {
        Self {
            notifier,
            templates,
            mailer,
            audit,
        }
    }
}

impl fmt::Debug for Collaborators {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Collaborators").finish_non_exhaustive()
    }
}

/// Booking service tuning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BookingSettings {
    /// How long seats stay held while payment calls run before the reaper may return them
    pub hold_ttl: Duration,
    /// Prefix of the statement description sent to providers
    pub statement_prefix: String,
}

impl Default for BookingSettings {
    fn default() -> Self {
        Self {
            hold_ttl: Duration::from_secs(15 * 60),
            statement_prefix: "Classbook".to_string(),
        }
    }
}

/// Shared dependencies of every service.
pub struct ServiceContext<S: BookingStore> {
    pub(crate) store: Arc<S>,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) env: LifecycleEnvironment,
    pub(crate) reducer: BookingReducer,
    pub(crate) payments: PaymentOrchestrator,
    pub(crate) dispatcher: Dispatcher,
    pub(crate) settings: BookingSettings,
}

impl<S: BookingStore> ServiceContext<S> {
    /// Store the services run against.
    #[must_use]
    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Clock the services read time from.
    #[must_use]
    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }
}

/// Entry point: owns the shared context and hands out services.
///
/// Services are cheap handles over one `Arc`; create them per call site.
pub struct Classbook<S: BookingStore> {
    ctx: Arc<ServiceContext<S>>,
}

impl<S: BookingStore> Clone for Classbook<S> {
    fn clone(&self) -> Self {
        Self {
            ctx: Arc::clone(&self.ctx),
        }
    }
}

impl<S: BookingStore> Classbook<S> {
    /// Wire the runtime.
    #[must_use]
    pub fn new(
        store: Arc<S>,
        clock: Arc<dyn Clock>,
        payments: PaymentOrchestrator,
        collaborators: Collaborators,
        settings: BookingSettings,
    ) -> Self {
        let ctx = ServiceContext {
            store,
            env: LifecycleEnvironment::new(Arc::clone(&clock)),
            clock,
            reducer: BookingReducer::new(),
            payments,
            dispatcher: Dispatcher::new(collaborators),
            settings,
        };
        Self { ctx: Arc::new(ctx) }
    }

    /// Shared context.
    #[must_use]
    pub fn context(&self) -> &Arc<ServiceContext<S>> {
        &self.ctx
    }

    /// Placement, promotion, rebooking, attendance and conversion.
    #[must_use]
    pub fn bookings(&self) -> BookingService<S> {
        BookingService::new(Arc::clone(&self.ctx))
    }

    /// Freeze and reactivation.
    #[must_use]
    pub fn freezes(&self) -> FreezeService<S> {
        FreezeService::new(Arc::clone(&self.ctx))
    }

    /// Cancellation and waiting-list removal.
    #[must_use]
    pub fn cancellations(&self) -> CancellationService<S> {
        CancellationService::new(Arc::clone(&self.ctx))
    }

    /// Payment retries.
    #[must_use]
    pub fn retries(&self) -> RetryController<S> {
        RetryController::new(Arc::clone(&self.ctx))
    }

    /// Out-of-band payment reconciliation.
    #[must_use]
    pub fn reconciler(&self) -> Reconciler<S> {
        Reconciler::new(Arc::clone(&self.ctx))
    }

    /// Every background sweep paired with its interval.
    #[must_use]
    pub fn sweeps(&self, schedule: &SweepSchedule) -> Vec<(Arc<dyn Sweep>, Duration)> {
        sweeper::all(&self.ctx, schedule)
    }
}
