// crates/quanta-core/src/cache.rs
//
// ApportionmentCache: the persisted memo of each survey's aggregate and of
// each tally's computed payout.
//
// Writes are compare-and-swap. A write whose new value equals the stored
// value is never performed, so re-running a pass over unchanged inputs
// touches nothing and leaves `modified_at` alone.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::QuantaError;
use crate::ids::SurveyId;
use crate::model::{Survey, SurveyAggregate, TallyKey, VoteTally};
use crate::money::Satoshis;

/// Result of a compare-and-swap write. Each variant carries the record as
/// stored after the call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheWrite<T> {
    /// The stored value already equals the requested one. Nothing was written.
    Unchanged(T),
    /// The stored value matched `expected` and was replaced.
    Written(T),
    /// The stored value matched neither `expected` nor the requested value.
    Conflict(T),
}

impl<T> CacheWrite<T> {
    pub fn was_written(&self) -> bool {
        matches!(self, CacheWrite::Written(_))
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, CacheWrite::Conflict(_))
    }

    pub fn into_inner(self) -> T {
        match self {
            CacheWrite::Unchanged(v) | CacheWrite::Written(v) | CacheWrite::Conflict(v) => v,
        }
    }
}

/// Decide the outcome of a compare-and-swap given the stored, expected, and
/// requested values. Shared by every backend so they agree on semantics.
pub fn cas_decision<V: PartialEq>(stored: &V, expected: &V, next: &V) -> CasDecision {
    if stored == next {
        CasDecision::Skip
    } else if stored == expected {
        CasDecision::Write
    } else {
        CasDecision::Conflict
    }
}

/// What a backend should do with a compare-and-swap request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CasDecision {
    Skip,
    Write,
    Conflict,
}

/// Persisted memo for survey aggregates and tally payouts.
///
/// Implemented by quanta-store (in-memory and RocksDB backends). This is the
/// only write path for `Survey` aggregate fields and for `VoteTally::satoshis`.
#[async_trait]
pub trait ApportionmentCache: Send + Sync {
    /// Replace a survey's cached aggregate if it still equals `expected`.
    ///
    /// On write, `modified_at` is set to `now` and the quantum is rederived.
    /// Returns `MissingSurvey` if no survey row exists.
    async fn swap_survey_aggregate(
        &self,
        survey_id: &SurveyId,
        expected: SurveyAggregate,
        next: SurveyAggregate,
        now: DateTime<Utc>,
    ) -> Result<CacheWrite<Survey>, QuantaError>;

    /// Replace a tally's cached payout if it still equals `expected`.
    async fn swap_payout(
        &self,
        key: &TallyKey,
        expected: Satoshis,
        next: Satoshis,
    ) -> Result<CacheWrite<VoteTally>, QuantaError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cas_decision() {
        assert_eq!(cas_decision(&5, &5, &5), CasDecision::Skip);
        assert_eq!(cas_decision(&5, &1, &5), CasDecision::Skip);
        assert_eq!(cas_decision(&5, &5, &7), CasDecision::Write);
        assert_eq!(cas_decision(&5, &1, &7), CasDecision::Conflict);
    }

    #[test]
    fn test_cache_write_accessors() {
        assert!(CacheWrite::Written(1).was_written());
        assert!(!CacheWrite::Unchanged(1).was_written());
        assert!(CacheWrite::Conflict(1).is_conflict());
        assert_eq!(CacheWrite::Conflict(3).into_inner(), 3);
    }
}
