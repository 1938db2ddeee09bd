// crates/quanta-economics/src/runner.rs
//
// Queue-driven job runner.
//
// The scheduler and administrative callers submit `Job`s over an mpsc
// channel; `serve` processes them one at a time and reports each outcome
// through the log. A failed job never stops the queue.

use std::collections::HashSet;
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::mpsc;

use quanta_core::error::QuantaError;
use quanta_core::ids::{BatchId, RecipientId};
use quanta_core::model::{Allocation, ClaimEntry, Survey};
use quanta_core::money::{PayoutFraction, Satoshis};
use quanta_core::traits::LedgerStore;

use crate::aggregator::SurveyAggregator;
use crate::apportion::VoteApportioner;
use crate::exclusion::{ExclusionManager, ExclusionOutcome, RestoreOutcome};
use crate::locks::SurveyLocks;
use crate::reports::{recipient_balance, survey_report, PayoutStatement};

/// Work the runner accepts.
#[derive(Debug, Clone)]
pub enum Job {
    /// Recompute every survey's quantum, then apportion all of them.
    Reconcile,
    /// Exclude every active tally whose recipient is not in `eligible`.
    /// With `batch_id`, resume that batch instead of starting a new one.
    Exclude {
        eligible: HashSet<RecipientId>,
        batch_id: Option<BatchId>,
    },
    /// Restore the unsettled rows of a batch.
    Restore { batch_id: BatchId },
    /// Split a batch's pool among the given claims.
    Redistribute {
        batch_id: BatchId,
        claims: Vec<ClaimEntry>,
    },
    /// Look up a recipient's payable balance.
    Balance { recipient: RecipientId },
}

impl Job {
    pub fn name(&self) -> &'static str {
        match self {
            Job::Reconcile => "reconcile",
            Job::Exclude { .. } => "exclude",
            Job::Restore { .. } => "restore",
            Job::Redistribute { .. } => "redistribute",
            Job::Balance { .. } => "balance",
        }
    }
}

/// What a completed job produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum JobOutcome {
    Reconciled {
        /// Computed surveys, oldest first.
        surveys: Vec<Survey>,
        statement: PayoutStatement,
    },
    Excluded(ExclusionOutcome),
    Restored(RestoreOutcome),
    Redistributed {
        batch_id: BatchId,
        allocations: Vec<Allocation>,
    },
    Balance {
        recipient: RecipientId,
        satoshis: Satoshis,
    },
}

/// Runs jobs against a ledger store. All components share one lock table.
pub struct JobRunner<S> {
    store: Arc<S>,
    aggregator: SurveyAggregator<S>,
    apportioner: VoteApportioner<S>,
    exclusions: ExclusionManager<S>,
}

impl<S: LedgerStore> JobRunner<S> {
    pub fn new(store: Arc<S>, fraction: PayoutFraction) -> Self {
        let locks = Arc::new(SurveyLocks::new());
        Self {
            aggregator: SurveyAggregator::new(store.clone(), locks.clone()),
            apportioner: VoteApportioner::new(store.clone(), locks.clone(), fraction),
            exclusions: ExclusionManager::new(store.clone(), locks),
            store,
        }
    }

    pub fn aggregator(&self) -> &SurveyAggregator<S> {
        &self.aggregator
    }

    pub fn apportioner(&self) -> &VoteApportioner<S> {
        &self.apportioner
    }

    pub fn exclusions(&self) -> &ExclusionManager<S> {
        &self.exclusions
    }

    /// Run one job to completion.
    pub async fn run(&self, job: Job) -> Result<JobOutcome, QuantaError> {
        match job {
            Job::Reconcile => {
                let surveys = self.aggregator.compute_all().await?;
                let statement = self.apportioner.apportion_all(&surveys).await;
                Ok(JobOutcome::Reconciled {
                    surveys: survey_report(surveys),
                    statement,
                })
            }
            Job::Exclude { eligible, batch_id } => {
                let outcome = match batch_id {
                    Some(batch_id) => self.exclusions.exclude_into(batch_id, &eligible).await?,
                    None => self.exclusions.exclude(&eligible).await?,
                };
                Ok(JobOutcome::Excluded(outcome))
            }
            Job::Restore { batch_id } => {
                Ok(JobOutcome::Restored(self.exclusions.restore(&batch_id).await?))
            }
            Job::Redistribute { batch_id, claims } => {
                let allocations = self.exclusions.redistribute(&batch_id, &claims).await?;
                Ok(JobOutcome::Redistributed {
                    batch_id,
                    allocations,
                })
            }
            Job::Balance { recipient } => {
                let satoshis = recipient_balance(self.store.as_ref(), &recipient).await?;
                Ok(JobOutcome::Balance {
                    recipient,
                    satoshis,
                })
            }
        }
    }

    /// Consume jobs until every sender is dropped.
    pub async fn serve(&self, mut jobs: mpsc::Receiver<Job>) {
        tracing::info!("job runner started");

        while let Some(job) = jobs.recv().await {
            let name = job.name();
            match self.run(job).await {
                Ok(outcome) => log_outcome(name, &outcome),
                Err(e) => tracing::error!(job = name, error = %e, "job failed"),
            }
        }

        tracing::info!("job runner stopped");
    }
}

fn log_outcome(name: &str, outcome: &JobOutcome) {
    match outcome {
        JobOutcome::Reconciled { surveys, statement } => tracing::info!(
            job = name,
            surveys = surveys.len(),
            recipients = statement.recipients.len(),
            satoshis = statement.total_satoshis,
            fees = statement.total_fees,
            "job completed"
        ),
        JobOutcome::Excluded(outcome) => tracing::info!(
            job = name,
            batch_id = %outcome.batch_id,
            pooled_satoshis = outcome.pooled_satoshis,
            "job completed"
        ),
        JobOutcome::Restored(outcome) => tracing::info!(
            job = name,
            batch_id = %outcome.batch_id,
            restored = outcome.restored.len(),
            "job completed"
        ),
        JobOutcome::Redistributed { batch_id, allocations } => tracing::info!(
            job = name,
            batch_id = %batch_id,
            claimants = allocations.len(),
            "job completed"
        ),
        JobOutcome::Balance { recipient, satoshis } => tracing::info!(
            job = name,
            recipient = %recipient,
            satoshis,
            "job completed"
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use quanta_core::ids::SurveyId;
    use quanta_core::model::{Contribution, TallyKey};
    use quanta_core::traits::{ContributionStore, SurveyStore, TallyStore};
    use quanta_store::MemoryStore;

    async fn seeded() -> Arc<MemoryStore> {
        let store = Arc::new(MemoryStore::new());
        store.create_survey(&SurveyId::from("s1"), Utc::now()).await.unwrap();
        store
            .record_contribution(&Contribution {
                contribution_id: "c1".to_string(),
                survey_id: SurveyId::from("s1"),
                satoshis: 1_000,
                fee: 50,
                votes: 10,
            })
            .await
            .unwrap();
        store.increment_counts(&TallyKey::new("s1", "good.com"), 3).await.unwrap();
        store.increment_counts(&TallyKey::new("s1", "bad.com"), 7).await.unwrap();
        store
    }

    #[tokio::test]
    async fn test_reconcile_job() {
        let store = seeded().await;
        let runner = JobRunner::new(store, PayoutFraction::default());

        let outcome = runner.run(Job::Reconcile).await.unwrap();
        let JobOutcome::Reconciled { surveys, statement } = outcome else {
            panic!("unexpected outcome");
        };
        assert_eq!(surveys.len(), 1);
        assert_eq!(statement.total_satoshis, 270 + 631);
        assert_eq!(statement.recipients.len(), 2);
    }

    #[tokio::test]
    async fn test_exclude_then_redistribute_jobs() {
        let store = seeded().await;
        let runner = JobRunner::new(store, PayoutFraction::default());
        runner.run(Job::Reconcile).await.unwrap();

        let eligible: HashSet<RecipientId> = [RecipientId::from("good.com")].into_iter().collect();
        let JobOutcome::Excluded(excluded) = runner
            .run(Job::Exclude {
                eligible,
                batch_id: None,
            })
            .await
            .unwrap()
        else {
            panic!("unexpected outcome");
        };
        assert_eq!(excluded.pooled_satoshis, 631);

        let JobOutcome::Redistributed { allocations, .. } = runner
            .run(Job::Redistribute {
                batch_id: excluded.batch_id,
                claims: vec![ClaimEntry::new("x.com", 2), ClaimEntry::new("y.com", 1)],
            })
            .await
            .unwrap()
        else {
            panic!("unexpected outcome");
        };
        let sum: u64 = allocations.iter().map(|a| a.satoshis).sum();
        assert_eq!(sum, 631);

        let JobOutcome::Balance { satoshis, .. } = runner
            .run(Job::Balance {
                recipient: RecipientId::from("bad.com"),
            })
            .await
            .unwrap()
        else {
            panic!("unexpected outcome");
        };
        assert_eq!(satoshis, 0);
    }

    #[tokio::test]
    async fn test_serve_drains_queue_and_survives_failures() {
        let store = seeded().await;
        let runner = JobRunner::new(store.clone(), PayoutFraction::default());
        let (tx, rx) = mpsc::channel(8);

        tx.send(Job::Restore {
            batch_id: quanta_core::new_batch_id(),
        })
        .await
        .unwrap();
        tx.send(Job::Reconcile).await.unwrap();
        drop(tx);

        runner.serve(rx).await;

        let tally = store.get_tally(&TallyKey::new("s1", "good.com")).await.unwrap().unwrap();
        assert_eq!(tally.satoshis, 270);
    }

    #[test]
    fn test_outcome_serializes_with_kind_tag() {
        let outcome = JobOutcome::Balance {
            recipient: RecipientId::from("a.com"),
            satoshis: 5,
        };
        let json = serde_json::to_value(&outcome).unwrap();
        assert_eq!(json["kind"], "balance");
        assert_eq!(json["satoshis"], 5);
    }
}
