// crates/quanta-core/src/traits.rs

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::cache::ApportionmentCache;
use crate::error::QuantaError;
use crate::ids::{BatchId, SurveyId};
use crate::model::{Contribution, ExclusionBatch, Survey, TallyKey, VoteTally};

/// Append-only contribution records, fed by the ingestion collaborator.
#[async_trait]
pub trait ContributionStore: Send + Sync {
    /// Record a contribution.
    ///
    /// Rejects a repeated `contribution_id` with `DuplicateContribution` and a
    /// fee larger than the contributed amount with `InvalidState`.
    async fn record_contribution(&self, contribution: &Contribution) -> Result<(), QuantaError>;

    /// All contributions attributed to a survey.
    async fn contributions_for_survey(&self, survey_id: &SurveyId) -> Result<Vec<Contribution>, QuantaError>;

    /// Distinct survey IDs that have at least one contribution, sorted.
    async fn contribution_survey_ids(&self) -> Result<Vec<SurveyId>, QuantaError>;
}

/// Survey rows. Aggregate fields are written only through `ApportionmentCache`.
#[async_trait]
pub trait SurveyStore: Send + Sync {
    /// Register a survey. Returns the existing row unchanged if already present.
    async fn create_survey(&self, survey_id: &SurveyId, created_at: DateTime<Utc>) -> Result<Survey, QuantaError>;

    async fn get_survey(&self, survey_id: &SurveyId) -> Result<Option<Survey>, QuantaError>;

    /// All registered surveys, sorted by ID.
    async fn list_surveys(&self) -> Result<Vec<Survey>, QuantaError>;
}

/// Per-(survey, recipient) vote tallies.
#[async_trait]
pub trait TallyStore: Send + Sync {
    /// Add `by` to a tally's counts, creating the row if needed. Vote ingestion feed.
    async fn increment_counts(&self, key: &TallyKey, by: u64) -> Result<VoteTally, QuantaError>;

    async fn get_tally(&self, key: &TallyKey) -> Result<Option<VoteTally>, QuantaError>;

    /// Tallies of one survey, sorted by recipient.
    async fn tallies_for_survey(&self, survey_id: &SurveyId) -> Result<Vec<VoteTally>, QuantaError>;

    /// Every tally, sorted by key.
    async fn list_tallies(&self) -> Result<Vec<VoteTally>, QuantaError>;

    /// Set (`Some`) or clear (`None`) a tally's exclusion.
    ///
    /// The only writer of `excluded` and `exclusion_batch_id`. Rejects rows
    /// with a settlement reference with `SettledRowMutation`. A row already
    /// tagged with a different batch is rejected with `AlreadyExcluded`;
    /// setting the value it already has is a no-op.
    async fn set_exclusion(&self, key: &TallyKey, batch_id: Option<BatchId>) -> Result<VoteTally, QuantaError>;

    /// Mark a tally as paid. A settlement reference can be set only once.
    async fn record_settlement(&self, key: &TallyKey, settlement_ref: &str) -> Result<VoteTally, QuantaError>;
}

/// Exclusion batch records.
#[async_trait]
pub trait BatchStore: Send + Sync {
    /// Insert or overwrite a batch record.
    async fn save_batch(&self, batch: &ExclusionBatch) -> Result<(), QuantaError>;

    async fn get_batch(&self, batch_id: &BatchId) -> Result<Option<ExclusionBatch>, QuantaError>;

    /// Tallies currently tagged with the batch ID, sorted by key.
    async fn tallies_in_batch(&self, batch_id: &BatchId) -> Result<Vec<VoteTally>, QuantaError>;
}

/// Everything the apportionment pipeline reads and writes.
pub trait LedgerStore:
    ContributionStore + SurveyStore + TallyStore + BatchStore + ApportionmentCache
{
}

impl<T> LedgerStore for T where
    T: ContributionStore + SurveyStore + TallyStore + BatchStore + ApportionmentCache
{
}
