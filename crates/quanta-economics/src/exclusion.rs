// crates/quanta-economics/src/exclusion.rs
//
// Exclusion batches: pulling tallies of ineligible recipients out of the
// normal payout stream, and putting them back.
//
// `exclude` tags every non-excluded tally with `counts > 0` whose recipient
// fails the eligibility predicate. Rows are mutated one at a time, so a
// failure mid-scan leaves a partially applied batch; rerunning with
// `exclude_into` and the same batch ID converges, since tagged rows are
// skipped. The pooled amount is the sum of cached payouts over every row in
// the batch at the end of the scan, and is a snapshot.
//
// Settled rows (those with a settlement reference) are history: they are
// never tagged and never restored.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;

use quanta_core::error::QuantaError;
use quanta_core::ids::{new_batch_id, BatchId, RecipientId};
use quanta_core::model::{Allocation, ClaimEntry, ExclusionBatch, TallyKey, VoteTally};
use quanta_core::money::Satoshis;
use quanta_core::traits::LedgerStore;

use crate::locks::SurveyLocks;
use crate::prorata::distribute;

/// Decides whether a recipient stays in the normal payout stream.
///
/// Supplied by the recipient-verification collaborator.
pub trait EligibilityPredicate: Send + Sync {
    fn is_eligible(&self, recipient: &RecipientId) -> bool;
}

impl<F> EligibilityPredicate for F
where
    F: Fn(&RecipientId) -> bool + Send + Sync,
{
    fn is_eligible(&self, recipient: &RecipientId) -> bool {
        self(recipient)
    }
}

/// A set of verified recipients; everyone else is ineligible.
impl EligibilityPredicate for HashSet<RecipientId> {
    fn is_eligible(&self, recipient: &RecipientId) -> bool {
        self.contains(recipient)
    }
}

/// Result of an exclusion scan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExclusionOutcome {
    pub batch_id: BatchId,
    /// Sum of cached payouts over all rows in the batch.
    pub pooled_satoshis: Satoshis,
    /// Rows tagged by this scan.
    pub excluded: Vec<TallyKey>,
    /// Ineligible rows left alone because they are already settled.
    pub rejected: Vec<TallyKey>,
}

/// Result of restoring a batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RestoreOutcome {
    pub batch_id: BatchId,
    pub restored: Vec<TallyKey>,
    /// Settled rows that stay excluded.
    pub retained_settled: Vec<TallyKey>,
}

/// Owns the `excluded` / `exclusion_batch_id` fields of vote tallies.
pub struct ExclusionManager<S> {
    store: Arc<S>,
    locks: Arc<SurveyLocks>,
}

impl<S: LedgerStore> ExclusionManager<S> {
    pub fn new(store: Arc<S>, locks: Arc<SurveyLocks>) -> Self {
        Self { store, locks }
    }

    /// Start a new batch of every ineligible, unsettled, active tally.
    pub async fn exclude(&self, predicate: &dyn EligibilityPredicate) -> Result<ExclusionOutcome, QuantaError> {
        self.exclude_into(new_batch_id(), predicate).await
    }

    /// Add every ineligible, unsettled, active tally to `batch_id`.
    ///
    /// Creates the batch if it does not exist yet; resumes it otherwise.
    ///
    /// # Errors
    /// Storage errors abort the scan; rows tagged so far stay tagged, and the
    /// same call can be retried.
    pub async fn exclude_into(
        &self,
        batch_id: BatchId,
        predicate: &dyn EligibilityPredicate,
    ) -> Result<ExclusionOutcome, QuantaError> {
        let mut excluded = Vec::new();
        let mut rejected = Vec::new();

        for tally in self.store.list_tallies().await? {
            if tally.excluded || tally.counts == 0 || predicate.is_eligible(&tally.recipient) {
                continue;
            }

            let key = tally.key();
            match self.exclude_row(&key, batch_id).await {
                Ok(_) => excluded.push(key),
                Err(e @ QuantaError::SettledRowMutation { .. }) => {
                    tracing::warn!(batch_id = %batch_id, error = %e, "settled row not excluded");
                    rejected.push(key);
                }
                // Tagged by a concurrent scan after our listing; it belongs to that batch.
                Err(e @ QuantaError::AlreadyExcluded { .. }) => {
                    tracing::debug!(batch_id = %batch_id, error = %e, "row claimed by another batch");
                }
                Err(e) => return Err(e),
            }
        }

        let pooled_satoshis = self.pool_of(&batch_id).await?;
        let created_at = match self.store.get_batch(&batch_id).await? {
            Some(existing) => existing.created_at,
            None => Utc::now(),
        };
        self.store
            .save_batch(&ExclusionBatch {
                batch_id,
                created_at,
                satoshis: pooled_satoshis,
                restored_at: None,
            })
            .await?;

        tracing::info!(
            batch_id = %batch_id,
            excluded = excluded.len(),
            rejected = rejected.len(),
            pooled_satoshis,
            "exclusion batch recorded"
        );

        Ok(ExclusionOutcome {
            batch_id,
            pooled_satoshis,
            excluded,
            rejected,
        })
    }

    /// Return every unsettled row of the batch to the payout stream.
    ///
    /// # Errors
    /// `NotFound` if the batch was never recorded; storage errors.
    pub async fn restore(&self, batch_id: &BatchId) -> Result<RestoreOutcome, QuantaError> {
        let mut batch = self
            .store
            .get_batch(batch_id)
            .await?
            .ok_or_else(|| QuantaError::NotFound(format!("exclusion batch {}", batch_id)))?;

        let mut restored = Vec::new();
        let mut retained_settled = Vec::new();

        for tally in self.store.tallies_in_batch(batch_id).await? {
            let key = tally.key();
            match self.restore_row(&key).await {
                Ok(_) => restored.push(key),
                Err(e @ QuantaError::SettledRowMutation { .. }) => {
                    tracing::warn!(batch_id = %batch_id, error = %e, "settled row stays excluded");
                    retained_settled.push(key);
                }
                Err(e) => return Err(e),
            }
        }

        batch.restored_at = Some(Utc::now());
        self.store.save_batch(&batch).await?;

        tracing::info!(
            batch_id = %batch_id,
            restored = restored.len(),
            retained = retained_settled.len(),
            "exclusion batch restored"
        );

        Ok(RestoreOutcome {
            batch_id: *batch_id,
            restored,
            retained_settled,
        })
    }

    /// Tag a single row with a batch. Tagging a row already in this batch
    /// is a no-op.
    ///
    /// # Errors
    /// `SettledRowMutation` if the row has a settlement reference;
    /// `AlreadyExcluded` if another batch holds it.
    pub async fn exclude_row(&self, key: &TallyKey, batch_id: BatchId) -> Result<VoteTally, QuantaError> {
        let _token = self.locks.acquire(&key.survey_id).await;
        self.store.set_exclusion(key, Some(batch_id)).await
    }

    /// Clear a single row's exclusion.
    ///
    /// # Errors
    /// `SettledRowMutation` if the row has a settlement reference.
    pub async fn restore_row(&self, key: &TallyKey) -> Result<VoteTally, QuantaError> {
        let _token = self.locks.acquire(&key.survey_id).await;
        self.store.set_exclusion(key, None).await
    }

    /// Split a batch's pooled snapshot among externally supplied claims.
    ///
    /// The claims must be denominated in the same unit as the pool; that is
    /// the caller's contract and is not checked here.
    pub async fn redistribute(
        &self,
        batch_id: &BatchId,
        claims: &[ClaimEntry],
    ) -> Result<Vec<Allocation>, QuantaError> {
        let batch = self
            .store
            .get_batch(batch_id)
            .await?
            .ok_or_else(|| QuantaError::NotFound(format!("exclusion batch {}", batch_id)))?;
        distribute(batch.satoshis, claims)
    }

    async fn pool_of(&self, batch_id: &BatchId) -> Result<Satoshis, QuantaError> {
        let mut pool: Satoshis = 0;
        for tally in self.store.tallies_in_batch(batch_id).await? {
            pool = pool.checked_add(tally.satoshis).ok_or_else(|| {
                QuantaError::InvalidState(format!("Batch {} pool overflows u64", batch_id))
            })?;
        }
        Ok(pool)
    }
}
