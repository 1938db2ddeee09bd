// crates/quanta-daemon/src/scheduler.rs
//
// Reconcile scheduler for the payout daemon.
//
// Enqueues a reconcile job on a fixed interval until ctrl-c.

use std::time::Duration;

use tokio::sync::mpsc::{self, error::TrySendError};

use quanta_economics::Job;

/// Scheduler that periodically asks the job runner to reconcile.
pub struct ReconcileScheduler {
    interval: Duration,
    jobs: mpsc::Sender<Job>,
    /// Number of reconcile jobs enqueued so far.
    ticks: u64,
}

impl ReconcileScheduler {
    pub fn new(interval: Duration, jobs: mpsc::Sender<Job>) -> Self {
        Self {
            interval,
            jobs,
            ticks: 0,
        }
    }

    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    /// Run the scheduler loop. One reconcile is enqueued immediately, then
    /// one per interval. Returns on ctrl-c or when the runner goes away.
    pub async fn run(&mut self) -> Result<(), Box<dyn std::error::Error>> {
        tracing::info!(
            "Reconcile scheduler started (interval={}s)",
            self.interval.as_secs()
        );

        self.tick()?;
        loop {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {
                    tracing::info!("Reconcile scheduler received shutdown signal");
                    break;
                }
                _ = tokio::time::sleep(self.interval) => {
                    self.tick()?;
                }
            }
        }

        Ok(())
    }

    /// Enqueue one reconcile job. A full queue already holds pending work,
    /// so the tick is skipped rather than stacking reconciles.
    pub fn tick(&mut self) -> Result<(), Box<dyn std::error::Error>> {
        match self.jobs.try_send(Job::Reconcile) {
            Ok(()) => {
                self.ticks += 1;
                tracing::debug!("Enqueued reconcile #{}", self.ticks);
                Ok(())
            }
            Err(TrySendError::Full(_)) => {
                tracing::warn!("Job queue full, skipping scheduled reconcile");
                Ok(())
            }
            Err(TrySendError::Closed(_)) => Err("job runner stopped".into()),
        }
    }
}
