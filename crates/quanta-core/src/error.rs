// crates/quanta-core/src/error.rs

use thiserror::Error;

use crate::ids::{BatchId, RecipientId, SurveyId};

/// Workspace-wide error type for survey apportionment.
#[derive(Debug, Error)]
pub enum QuantaError {
    /// Storage layer error (RocksDB, in-memory tables).
    #[error("Storage error: {0}")]
    Storage(String),

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Invalid state transition or rejected input.
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Resource not found.
    #[error("Not found: {0}")]
    NotFound(String),

    /// A survey is referenced (by contributions or tallies) but has no aggregate record.
    #[error("Missing survey: {0}")]
    MissingSurvey(SurveyId),

    /// The survey has zero votes, so its quantum is undefined.
    #[error("Degenerate survey {0}: total votes is zero")]
    DegenerateSurvey(SurveyId),

    /// Allocations produced by a prorata distribution do not sum to the pool.
    #[error("Pool conservation violated: pool {pool} sat, allocated {allocated} sat")]
    PoolConservationViolation { pool: u64, allocated: u128 },

    /// Attempt to toggle exclusion on a row that has already been settled.
    #[error("Settled row {survey_id}/{recipient} cannot change exclusion state")]
    SettledRowMutation {
        survey_id: SurveyId,
        recipient: RecipientId,
    },

    /// Attempt to tag a row that already belongs to another exclusion batch.
    #[error("Row {survey_id}/{recipient} is already excluded in batch {batch_id}")]
    AlreadyExcluded {
        survey_id: SurveyId,
        recipient: RecipientId,
        batch_id: BatchId,
    },

    /// A contribution with this identifier has already been recorded.
    #[error("Duplicate contribution: {0}")]
    DuplicateContribution(String),
}

impl From<serde_json::Error> for QuantaError {
    fn from(e: serde_json::Error) -> Self {
        QuantaError::Serialization(e.to_string())
    }
}
