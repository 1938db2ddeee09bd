// crates/quanta-core/src/model.rs
//
// Persisted records: surveys, contributions, vote tallies, exclusion batches,
// plus the transient claim/allocation pair used by prorata distribution.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::QuantaError;
use crate::ids::{BatchId, RecipientId, SurveyId};
use crate::money::{Quantum, Satoshis};

/// One incoming payment event. Immutable once recorded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contribution {
    pub contribution_id: String,
    pub survey_id: SurveyId,
    pub satoshis: Satoshis,
    pub fee: Satoshis,
    pub votes: u64,
}

impl Contribution {
    /// Reject records whose fee exceeds the contributed amount.
    pub fn validate(&self) -> Result<(), QuantaError> {
        if self.fee > self.satoshis {
            return Err(QuantaError::InvalidState(format!(
                "Contribution {} has fee {} sat above its {} sat",
                self.contribution_id, self.fee, self.satoshis
            )));
        }
        Ok(())
    }
}

/// The cached fields of a survey that are recomputed from contribution and
/// tally data on every pass. Two aggregates compare equal exactly when a
/// rewrite would be a no-op.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SurveyAggregate {
    /// Sum of satoshis over the survey's positive contributions.
    pub total_satoshis: Satoshis,
    /// Sum of fees over the same contributions.
    pub total_fee: Satoshis,
    /// Sum of votes over the same contributions.
    pub total_votes: u64,
    /// Sum of non-excluded tally counts for the survey.
    pub counts: u64,
}

impl SurveyAggregate {
    /// Net satoshis available for apportionment.
    pub fn inputs(&self) -> Satoshis {
        self.total_satoshis.saturating_sub(self.total_fee)
    }

    pub fn quantum(&self) -> Option<Quantum> {
        Quantum::new(self.inputs(), self.total_votes)
    }
}

/// One contribution round and its memoized aggregate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Survey {
    pub survey_id: SurveyId,
    pub total_satoshis: Satoshis,
    pub total_fee: Satoshis,
    pub total_votes: u64,
    pub counts: u64,
    /// `None` until computed, and whenever the survey has zero votes.
    pub quantum: Option<Quantum>,
    pub created_at: DateTime<Utc>,
    /// Advances only when the cached aggregate changes.
    pub modified_at: DateTime<Utc>,
}

impl Survey {
    /// A freshly registered survey with an empty aggregate.
    pub fn new(survey_id: SurveyId, created_at: DateTime<Utc>) -> Self {
        Self {
            survey_id,
            total_satoshis: 0,
            total_fee: 0,
            total_votes: 0,
            counts: 0,
            quantum: None,
            created_at,
            modified_at: created_at,
        }
    }

    pub fn aggregate(&self) -> SurveyAggregate {
        SurveyAggregate {
            total_satoshis: self.total_satoshis,
            total_fee: self.total_fee,
            total_votes: self.total_votes,
            counts: self.counts,
        }
    }

    pub fn inputs(&self) -> Satoshis {
        self.aggregate().inputs()
    }

    /// Copy an aggregate into this survey and stamp the modification time.
    pub fn apply_aggregate(&mut self, aggregate: SurveyAggregate, now: DateTime<Utc>) {
        self.total_satoshis = aggregate.total_satoshis;
        self.total_fee = aggregate.total_fee;
        self.total_votes = aggregate.total_votes;
        self.counts = aggregate.counts;
        self.quantum = aggregate.quantum();
        self.modified_at = now;
    }
}

/// Key of a (survey, recipient) pairing.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TallyKey {
    pub survey_id: SurveyId,
    pub recipient: RecipientId,
}

impl TallyKey {
    pub fn new(survey_id: impl Into<SurveyId>, recipient: impl Into<RecipientId>) -> Self {
        Self {
            survey_id: survey_id.into(),
            recipient: recipient.into(),
        }
    }
}

/// Attention counted for one recipient within one survey, and its cached payout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoteTally {
    pub survey_id: SurveyId,
    pub recipient: RecipientId,
    /// Append-only count of attention events.
    pub counts: u64,
    /// Cached payout for this pairing; zero until first apportionment.
    pub satoshis: Satoshis,
    pub excluded: bool,
    pub exclusion_batch_id: Option<BatchId>,
    /// Set once the payout has actually been paid. Settled rows are history.
    pub settlement_ref: Option<String>,
}

impl VoteTally {
    pub fn new(key: TallyKey) -> Self {
        Self {
            survey_id: key.survey_id,
            recipient: key.recipient,
            counts: 0,
            satoshis: 0,
            excluded: false,
            exclusion_batch_id: None,
            settlement_ref: None,
        }
    }

    pub fn key(&self) -> TallyKey {
        TallyKey {
            survey_id: self.survey_id.clone(),
            recipient: self.recipient.clone(),
        }
    }

    pub fn is_settled(&self) -> bool {
        self.settlement_ref.is_some()
    }
}

/// A labeled set of tallies pulled out of the normal payout stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExclusionBatch {
    pub batch_id: BatchId,
    pub created_at: DateTime<Utc>,
    /// Pooled satoshis at the time of exclusion. A snapshot, not live.
    pub satoshis: Satoshis,
    pub restored_at: Option<DateTime<Utc>>,
}

/// A weighted claim on a prorata pool. Not persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClaimEntry {
    pub claimant_id: String,
    pub weight: Satoshis,
}

impl ClaimEntry {
    pub fn new(claimant_id: impl Into<String>, weight: Satoshis) -> Self {
        Self {
            claimant_id: claimant_id.into(),
            weight,
        }
    }
}

/// One claimant's share of a distributed pool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Allocation {
    pub claimant_id: String,
    pub satoshis: Satoshis,
}
