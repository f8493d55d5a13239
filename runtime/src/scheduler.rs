//! Periodic background sweeps.
//!
//! ## Architecture
//!
//! - One tokio task per [`Sweep`], ticking on its own interval
//! - A broadcast channel carries the shutdown signal to every task
//! - [`Scheduler::shutdown`] waits for the tasks in parallel, each under a timeout
//!
//! ## Usage
//!
//! ```ignore
//! let mut scheduler = Scheduler::new(classbook.sweeps(&SweepSchedule::default()));
//! scheduler.spawn();
//!
//! tokio::signal::ctrl_c().await?;
//! scheduler.shutdown(Duration::from_secs(30)).await?;
//! ```

use crate::metrics::SweepMetrics;
use crate::sweeper::{Sweep, SweepReport};
use classbook_core::error::BookingError;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// Interval of each sweep.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SweepSchedule {
    /// Waiting-list expiry
    pub waiting_list: Duration,
    /// Freeze windows
    pub freeze: Duration,
    /// Requested cancellations
    pub pending_cancellations: Duration,
    /// Stale seat holds
    pub stale_holds: Duration,
}

impl Default for SweepSchedule {
    fn default() -> Self {
        Self {
            waiting_list: Duration::from_secs(60 * 60),
            freeze: Duration::from_secs(60 * 60),
            pending_cancellations: Duration::from_secs(60 * 60),
            stale_holds: Duration::from_secs(5 * 60),
        }
    }
}

/// Shutdown failures.
#[derive(Error, Debug)]
pub enum SchedulerError {
    /// Some sweep tasks did not stop cleanly
    #[error("{} sweep task(s) did not stop cleanly: {}", .0.len(), .0.join(", "))]
    Shutdown(Vec<String>),
}

/// Runs sweeps on their intervals until shut down.
pub struct Scheduler {
    sweeps: Vec<(Arc<dyn Sweep>, Duration)>,
    shutdown_tx: broadcast::Sender<()>,
    handles: Vec<(&'static str, JoinHandle<()>)>,
}

impl Scheduler {
    /// Create a scheduler for `sweeps`; nothing runs until [`spawn`](Self::spawn).
    #[must_use]
    pub fn new(sweeps: Vec<(Arc<dyn Sweep>, Duration)>) -> Self {
        let (shutdown_tx, _) = broadcast::channel(16);
        Self {
            sweeps,
            shutdown_tx,
            handles: Vec::new(),
        }
    }

    /// Receiver notified when shutdown starts.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<()> {
        self.shutdown_tx.subscribe()
    }

    /// Number of sweeps managed.
    #[must_use]
    pub fn sweep_count(&self) -> usize {
        self.sweeps.len()
    }

    /// Start one task per sweep. The first pass runs immediately.
    pub fn spawn(&mut self) {
        for (sweep, every) in &self.sweeps {
            let name = sweep.name();
            let sweep = Arc::clone(sweep);
            let every = *every;
            let mut shutdown = self.shutdown_tx.subscribe();

            let handle = tokio::spawn(async move {
                let mut ticker = tokio::time::interval(every);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
                loop {
                    tokio::select! {
                        _ = shutdown.recv() => {
                            tracing::debug!(sweep = name, "Sweep task stopping");
                            break;
                        }
                        _ = ticker.tick() => {
                            let _ = run_sweep(sweep.as_ref()).await;
                        }
                    }
                }
            });
            tracing::info!(sweep = name, interval = ?every, "Sweep scheduled");
            self.handles.push((name, handle));
        }
    }

    /// Run every sweep once, in order, outside the timers.
    pub async fn run_all_once(&self) -> Vec<(&'static str, Result<SweepReport, BookingError>)> {
        let mut results = Vec::with_capacity(self.sweeps.len());
        for (sweep, _) in &self.sweeps {
            results.push((sweep.name(), run_sweep(sweep.as_ref()).await));
        }
        results
    }

    /// Signal every task to stop and wait for them.
    ///
    /// A pass already running finishes first, within `timeout`.
    ///
    /// # Errors
    ///
    /// [`SchedulerError::Shutdown`] naming tasks that panicked or timed out.
    pub async fn shutdown(self, timeout: Duration) -> Result<(), SchedulerError> {
        tracing::info!(tasks = self.handles.len(), timeout = ?timeout, "Stopping sweeps");
        if self.shutdown_tx.send(()).is_err() {
            tracing::debug!("No sweep task was listening for shutdown");
        }

        let stops = self.handles.into_iter().map(|(name, handle)| async move {
            match tokio::time::timeout(timeout, handle).await {
                Ok(Ok(())) => Ok(()),
                Ok(Err(error)) => {
                    tracing::error!(sweep = name, error = %error, "Sweep task failed");
                    Err(format!("{name}: {error}"))
                },
                Err(_) => {
                    tracing::error!(sweep = name, "Sweep task did not stop in time");
                    Err(format!("{name}: timeout after {timeout:?}"))
                },
            }
        });
        let errors: Vec<String> = futures::future::join_all(stops)
            .await
            .into_iter()
            .filter_map(Result::err)
            .collect();

        if errors.is_empty() {
            tracing::info!("All sweeps stopped");
            Ok(())
        } else {
            Err(SchedulerError::Shutdown(errors))
        }
    }
}

async fn run_sweep(sweep: &dyn Sweep) -> Result<SweepReport, BookingError> {
    let name = sweep.name();
    match sweep.run_once().await {
        Ok(report) => {
            SweepMetrics::record_run(name, report.transitioned, report.failed);
            if report.transitioned > 0 || report.failed > 0 {
                tracing::info!(
                    sweep = name,
                    examined = report.examined,
                    transitioned = report.transitioned,
                    skipped = report.skipped,
                    failed = report.failed,
                    "Sweep pass finished"
                );
            } else {
                tracing::debug!(sweep = name, examined = report.examined, "Sweep pass found nothing to do");
            }
            Ok(report)
        },
        Err(error) => {
            SweepMetrics::record_run(name, 0, 1);
            tracing::error!(sweep = name, error = %error, "Sweep pass failed; retrying next tick");
            Err(error)
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Counting {
        runs: AtomicUsize,
    }

    #[async_trait]
    impl Sweep for Counting {
        fn name(&self) -> &'static str {
            "counting"
        }

        async fn run_once(&self) -> Result<SweepReport, BookingError> {
            self.runs.fetch_add(1, Ordering::SeqCst);
            Ok(SweepReport::default())
        }
    }

    #[tokio::test]
    async fn spawned_sweeps_run_and_stop() {
        let sweep = Arc::new(Counting {
            runs: AtomicUsize::new(0),
        });
        let mut scheduler = Scheduler::new(vec![(
            Arc::clone(&sweep) as Arc<dyn Sweep>,
            Duration::from_millis(10),
        )]);
        scheduler.spawn();
        tokio::time::sleep(Duration::from_millis(50)).await;

        let stopped = scheduler.shutdown(Duration::from_secs(1)).await;
        assert!(stopped.is_ok());
        let runs = sweep.runs.load(Ordering::SeqCst);
        assert!(runs >= 1);

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(sweep.runs.load(Ordering::SeqCst), runs);
    }

    #[tokio::test]
    async fn run_all_once_reports_each_sweep() {
        let scheduler = Scheduler::new(vec![(
            Arc::new(Counting {
                runs: AtomicUsize::new(0),
            }) as Arc<dyn Sweep>,
            Duration::from_secs(60),
        )]);
        let results = scheduler.run_all_once().await;
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].0, "counting");
        assert!(results[0].1.is_ok());
    }
}
