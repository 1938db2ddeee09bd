// crates/quanta-core/src/lib.rs
//
// quanta-core: Core types, money arithmetic, and storage traits for survey
// payout apportionment.
//
// This is the leaf crate that all other crates in the workspace depend on.
// All monetary values are u64 satoshis; the per-vote rate of a survey is an
// exact rational so payouts never drift.

pub mod cache;
pub mod error;
pub mod ids;
pub mod model;
pub mod money;
pub mod traits;

// Re-export key types for ergonomic access from downstream crates.
pub use cache::{cas_decision, ApportionmentCache, CacheWrite, CasDecision};
pub use error::QuantaError;
pub use ids::{new_batch_id, BatchId, RecipientId, SurveyId};
pub use model::{
    Allocation, ClaimEntry, Contribution, ExclusionBatch, Survey, SurveyAggregate, TallyKey,
    VoteTally,
};
pub use money::{PayoutFraction, Quantum, Satoshis, BPS_DENOMINATOR, DEFAULT_PAYOUT_BPS};
pub use traits::{BatchStore, ContributionStore, LedgerStore, SurveyStore, TallyStore};
