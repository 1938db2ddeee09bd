// crates/quanta-economics/src/aggregator.rs
//
// Survey aggregation: the per-survey totals and the quantum (per-vote payout
// rate) derived from contribution records.
//
// For each survey:
//   total_satoshis = sum of satoshis over contributions with satoshis > 0
//   total_fee      = sum of fee over the same contributions
//   total_votes    = sum of votes over the same contributions
//   counts         = sum of counts over non-excluded tallies with counts > 0
//   quantum        = (total_satoshis - total_fee) / total_votes
//
// `total_votes` and `counts` are independent tallies that should agree but
// are not required to. The aggregate is written back only when it differs
// from the cached one, so `modified_at` moves only on real change.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use chrono::Utc;

use quanta_core::cache::CacheWrite;
use quanta_core::error::QuantaError;
use quanta_core::ids::SurveyId;
use quanta_core::model::{Survey, SurveyAggregate};
use quanta_core::traits::LedgerStore;

use crate::locks::SurveyLocks;

/// Computes and memoizes survey aggregates.
pub struct SurveyAggregator<S> {
    store: Arc<S>,
    locks: Arc<SurveyLocks>,
}

impl<S: LedgerStore> SurveyAggregator<S> {
    pub fn new(store: Arc<S>, locks: Arc<SurveyLocks>) -> Self {
        Self { store, locks }
    }

    /// Recompute a survey's aggregate and persist it if it changed.
    ///
    /// Returns the survey as stored after the call. A survey with zero votes is
    /// returned with `quantum: None` and logged; it is not an error here.
    ///
    /// # Errors
    /// `MissingSurvey` if the survey has no registered row; storage errors.
    pub async fn compute_quantum(&self, survey_id: &SurveyId) -> Result<Survey, QuantaError> {
        let _token = self.locks.acquire(survey_id).await;

        let survey = self
            .store
            .get_survey(survey_id)
            .await?
            .ok_or_else(|| QuantaError::MissingSurvey(survey_id.clone()))?;

        let aggregate = self.aggregate(survey_id).await?;
        if aggregate.total_votes == 0 {
            tracing::warn!(
                survey_id = %survey_id,
                error = %QuantaError::DegenerateSurvey(survey_id.clone()),
                "quantum undefined; survey will be skipped by apportionment"
            );
        }

        let mut expected = survey.aggregate();
        // One retry: a conflict means another process rewrote the row between
        // our read and our swap. The recomputed aggregate is authoritative.
        for attempt in 0..2 {
            match self
                .store
                .swap_survey_aggregate(survey_id, expected, aggregate, Utc::now())
                .await?
            {
                CacheWrite::Unchanged(survey) => return Ok(survey),
                CacheWrite::Written(survey) => {
                    tracing::debug!(
                        survey_id = %survey_id,
                        inputs = aggregate.inputs(),
                        votes = aggregate.total_votes,
                        counts = aggregate.counts,
                        "survey aggregate updated"
                    );
                    return Ok(survey);
                }
                CacheWrite::Conflict(current) => {
                    tracing::warn!(survey_id = %survey_id, attempt, "survey aggregate changed underneath us");
                    expected = current.aggregate();
                }
            }
        }

        Err(QuantaError::InvalidState(format!(
            "Survey {} aggregate kept changing during update",
            survey_id
        )))
    }

    /// Recompute every survey that has contributions.
    ///
    /// Per-survey failures are logged and skipped. Tallies that reference a
    /// survey with no registered row are reported with their vote counts.
    pub async fn compute_all(&self) -> Result<Vec<Survey>, QuantaError> {
        let survey_ids = self.store.contribution_survey_ids().await?;
        let mut surveys = Vec::with_capacity(survey_ids.len());

        for survey_id in &survey_ids {
            match self.compute_quantum(survey_id).await {
                Ok(survey) => surveys.push(survey),
                Err(e @ QuantaError::MissingSurvey(_)) => {
                    tracing::warn!(survey_id = %survey_id, error = %e, "skipping contributions");
                }
                Err(e) => {
                    tracing::error!(survey_id = %survey_id, error = %e, "survey aggregation failed");
                }
            }
        }

        self.report_orphan_tallies().await?;

        tracing::info!(surveys = surveys.len(), "survey aggregation pass complete");
        Ok(surveys)
    }

    async fn aggregate(&self, survey_id: &SurveyId) -> Result<SurveyAggregate, QuantaError> {
        let mut aggregate = SurveyAggregate::default();

        for contribution in self.store.contributions_for_survey(survey_id).await? {
            if contribution.satoshis == 0 {
                continue;
            }
            aggregate.total_satoshis = checked(aggregate.total_satoshis, contribution.satoshis, "satoshis")?;
            aggregate.total_fee = checked(aggregate.total_fee, contribution.fee, "fee")?;
            aggregate.total_votes = checked(aggregate.total_votes, contribution.votes, "votes")?;
        }

        for tally in self.store.tallies_for_survey(survey_id).await? {
            if tally.excluded || tally.counts == 0 {
                continue;
            }
            aggregate.counts = checked(aggregate.counts, tally.counts, "counts")?;
        }

        Ok(aggregate)
    }

    /// Log vote counts held by tallies whose survey has no row.
    async fn report_orphan_tallies(&self) -> Result<(), QuantaError> {
        let known: BTreeSet<SurveyId> = self
            .store
            .list_surveys()
            .await?
            .into_iter()
            .map(|s| s.survey_id)
            .collect();

        let mut orphans: BTreeMap<SurveyId, u64> = BTreeMap::new();
        for tally in self.store.list_tallies().await? {
            if !known.contains(&tally.survey_id) {
                *orphans.entry(tally.survey_id).or_default() += tally.counts;
            }
        }

        for (survey_id, counts) in orphans {
            tracing::warn!(
                survey_id = %survey_id,
                counts,
                error = %QuantaError::MissingSurvey(survey_id.clone()),
                "tallies excluded from apportionment"
            );
        }
        Ok(())
    }
}

fn checked(total: u64, add: u64, field: &str) -> Result<u64, QuantaError> {
    total
        .checked_add(add)
        .ok_or_else(|| QuantaError::InvalidState(format!("Survey {} total overflows u64", field)))
}
