// crates/quanta-economics/src/lib.rs
//
// quanta-economics: Payout apportionment for pooled survey contributions.
//
// Pipeline:
//   contributions -> SurveyAggregator -> quantum (cached)
//                 -> VoteApportioner  -> per-recipient totals
//                 -> ExclusionManager -> pooled satoshis of ineligible rows
//                 -> distribute       -> exact prorata split of the pool
//
// All monetary values are tracked in satoshis and every split is
// integer-exact.

pub mod aggregator;
pub mod apportion;
pub mod exclusion;
pub mod locks;
pub mod prorata;
pub mod reports;
pub mod runner;

// Re-export key types for ergonomic access from downstream crates.
pub use aggregator::SurveyAggregator;
pub use apportion::{Apportionment, RecipientTotal, TallyPayout, VoteApportioner};
pub use exclusion::{EligibilityPredicate, ExclusionManager, ExclusionOutcome, RestoreOutcome};
pub use locks::SurveyLocks;
pub use prorata::distribute;
pub use reports::{recipient_balance, survey_report, PayoutStatement};
pub use runner::{Job, JobOutcome, JobRunner};
