//! Metric names and recorders for booking operations.
//!
//! The runtime only emits through the `metrics` facade. Installing an exporter
//! (Prometheus in the server binary) is the host's job; call [`register_metrics`]
//! once after installing it so every series carries a description.

use metrics::{describe_counter, describe_histogram};
use std::time::Duration;

// Re-export metrics macros for use in other modules
pub use metrics::{counter, gauge, histogram};

/// Bookings created, labelled by initial status.
pub const BOOKINGS_CREATED: &str = "classbook_bookings_created_total";
/// Reservations refused for lack of seats.
pub const CAPACITY_REJECTIONS: &str = "classbook_capacity_rejections_total";
/// Lifecycle transitions, labelled by action and outcome.
pub const TRANSITIONS: &str = "classbook_transitions_total";
/// Gateway sequences run, labelled by gateway and normalized status.
pub const PAYMENT_ATTEMPTS: &str = "classbook_payment_attempts_total";
/// Wall time of a gateway sequence, labelled by gateway.
pub const PAYMENT_DURATION: &str = "classbook_payment_sequence_duration_seconds";
/// Compensation calls, labelled by gateway and outcome.
pub const COMPENSATIONS: &str = "classbook_compensations_total";
/// Sweep passes, labelled by sweep.
pub const SWEEP_RUNS: &str = "classbook_sweep_runs_total";
/// Records transitioned by sweeps, labelled by sweep.
pub const SWEEP_TRANSITIONS: &str = "classbook_sweep_transitions_total";
/// Records a sweep failed to process, labelled by sweep.
pub const SWEEP_FAILURES: &str = "classbook_sweep_failures_total";
/// Collaborator calls that failed after commit, labelled by collaborator.
pub const COLLABORATOR_FAILURES: &str = "classbook_collaborator_failures_total";
/// Conditional seat decrements the database refused (emitted by the store).
pub const STORE_CAPACITY_REFUSED: &str = "classbook_store_capacity_refused_total";

/// Register all metric descriptions.
pub fn register_metrics() {
    describe_counter!(BOOKINGS_CREATED, "Total number of bookings created");
    describe_counter!(
        CAPACITY_REJECTIONS,
        "Total number of reservations refused because the session was full"
    );
    describe_counter!(TRANSITIONS, "Total number of lifecycle transitions attempted");
    describe_counter!(PAYMENT_ATTEMPTS, "Total number of gateway sequences run");
    describe_histogram!(PAYMENT_DURATION, "Time taken by a full gateway sequence");
    describe_counter!(
        COMPENSATIONS,
        "Total number of remote resources deleted after a failed sequence"
    );
    describe_counter!(SWEEP_RUNS, "Total number of sweep passes");
    describe_counter!(SWEEP_TRANSITIONS, "Total number of records transitioned by sweeps");
    describe_counter!(SWEEP_FAILURES, "Total number of records a sweep failed to process");
    describe_counter!(
        COLLABORATOR_FAILURES,
        "Total number of post-commit notification, email or audit failures"
    );
    describe_counter!(
        STORE_CAPACITY_REFUSED,
        "Total number of seat decrements refused by the store"
    );
}

/// Booking metrics recorder.
pub struct BookingMetrics;

impl BookingMetrics {
    /// Record a created booking.
    pub fn record_created(status: &'static str) {
        counter!(BOOKINGS_CREATED, "status" => status).increment(1);
    }

    /// Record a refused reservation.
    pub fn record_capacity_rejection() {
        counter!(CAPACITY_REJECTIONS).increment(1);
    }

    /// Record a transition outcome (`applied` or the rejection reason).
    pub fn record_transition(action: &'static str, outcome: &'static str) {
        counter!(TRANSITIONS, "action" => action, "outcome" => outcome).increment(1);
    }
}

/// Payment metrics recorder.
pub struct PaymentMetrics;

impl PaymentMetrics {
    /// Record a finished gateway sequence.
    pub fn record_sequence(gateway: &'static str, status: &'static str, duration: Duration) {
        counter!(PAYMENT_ATTEMPTS, "gateway" => gateway, "status" => status).increment(1);
        histogram!(PAYMENT_DURATION, "gateway" => gateway).record(duration.as_secs_f64());
    }

    /// Record a compensation outcome (`success` or `failed`).
    pub fn record_compensation(gateway: &'static str, outcome: &'static str) {
        counter!(COMPENSATIONS, "gateway" => gateway, "outcome" => outcome).increment(1);
    }
}

/// Sweep metrics recorder.
pub struct SweepMetrics;

impl SweepMetrics {
    /// Record one pass.
    pub fn record_run(sweep: &'static str, transitioned: usize, failed: usize) {
        counter!(SWEEP_RUNS, "sweep" => sweep).increment(1);
        counter!(SWEEP_TRANSITIONS, "sweep" => sweep).increment(transitioned as u64);
        counter!(SWEEP_FAILURES, "sweep" => sweep).increment(failed as u64);
    }
}

/// Record a failed post-commit collaborator call.
pub fn record_collaborator_failure(collaborator: &'static str) {
    counter!(COLLABORATOR_FAILURES, "collaborator" => collaborator).increment(1);
}
