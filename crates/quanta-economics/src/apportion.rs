// crates/quanta-economics/src/apportion.rs
//
// Vote apportionment: turning a survey's quantum into integer payouts.
//
// For each non-excluded tally of a survey:
//   gross  = quantum * counts
//   payout = floor(gross * payout_fraction)
//   fee    = floor(gross) - payout
//
// The payout is floored before the fee is taken as the remainder, so
// `payout + fee` never exceeds `floor(gross)` and the platform never pays out
// more than it received. Each tally's cached payout is written back only when
// it changed; a rerun over unchanged inputs performs zero writes.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::Serialize;

use quanta_core::cache::CacheWrite;
use quanta_core::error::QuantaError;
use quanta_core::ids::{RecipientId, SurveyId};
use quanta_core::model::Survey;
use quanta_core::money::{PayoutFraction, Satoshis};
use quanta_core::traits::LedgerStore;

use crate::locks::SurveyLocks;
use crate::reports::PayoutStatement;

/// One tally's contribution to a recipient's total.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TallyPayout {
    pub survey_id: SurveyId,
    pub counts: u64,
    pub satoshis: Satoshis,
    pub fees: Satoshis,
}

/// Accumulated payout for one recipient.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RecipientTotal {
    pub recipient: RecipientId,
    pub satoshis: Satoshis,
    pub fees: Satoshis,
    /// Per-survey breakdown, sorted by survey ID.
    pub votes: Vec<TallyPayout>,
}

impl RecipientTotal {
    pub fn new(recipient: RecipientId) -> Self {
        Self {
            recipient,
            satoshis: 0,
            fees: 0,
            votes: Vec::new(),
        }
    }

    /// Fold one tally payout into this total.
    pub fn add(&mut self, payout: TallyPayout) {
        self.satoshis = self.satoshis.saturating_add(payout.satoshis);
        self.fees = self.fees.saturating_add(payout.fees);
        let at = self
            .votes
            .partition_point(|v| v.survey_id <= payout.survey_id);
        self.votes.insert(at, payout);
    }
}

/// Sort recipient totals by domain-reversed label.
pub fn sort_recipients(totals: &mut [RecipientTotal]) {
    totals.sort_by(|a, b| {
        a.recipient
            .sort_key()
            .cmp(&b.recipient.sort_key())
            .then_with(|| a.recipient.cmp(&b.recipient))
    });
}

/// Result of apportioning a single survey.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Apportionment {
    pub survey_id: SurveyId,
    /// Sorted by domain-reversed recipient label.
    pub recipients: Vec<RecipientTotal>,
    /// Number of tally payouts actually written.
    pub writes: usize,
    /// Number of tallies skipped because their cached payout moved underneath us.
    pub conflicts: usize,
    /// Number of tallies skipped because their payout could not be computed.
    pub skipped: usize,
}

/// Computes integer payouts from a survey's quantum.
pub struct VoteApportioner<S> {
    store: Arc<S>,
    locks: Arc<SurveyLocks>,
    fraction: PayoutFraction,
}

impl<S: LedgerStore> VoteApportioner<S> {
    pub fn new(store: Arc<S>, locks: Arc<SurveyLocks>, fraction: PayoutFraction) -> Self {
        Self {
            store,
            locks,
            fraction,
        }
    }

    pub fn fraction(&self) -> PayoutFraction {
        self.fraction
    }

    /// Apportion one survey.
    ///
    /// Holds the survey's token for the whole pass; rows are processed
    /// sequentially and every cache write is awaited before the next row.
    /// The quantum is the one stored when the token is taken, not the one
    /// carried by `survey`.
    ///
    /// # Errors
    /// `MissingSurvey` if the survey row is gone; `DegenerateSurvey` if it
    /// has no quantum; storage errors.
    pub async fn apportion(&self, survey: &Survey) -> Result<Apportionment, QuantaError> {
        let _token = self.locks.acquire(&survey.survey_id).await;

        let survey = self
            .store
            .get_survey(&survey.survey_id)
            .await?
            .ok_or_else(|| QuantaError::MissingSurvey(survey.survey_id.clone()))?;
        let quantum = survey
            .quantum
            .ok_or_else(|| QuantaError::DegenerateSurvey(survey.survey_id.clone()))?;

        let mut totals: BTreeMap<RecipientId, RecipientTotal> = BTreeMap::new();
        let mut writes = 0;
        let mut conflicts = 0;
        let mut skipped = 0;

        for tally in self.store.tallies_for_survey(&survey.survey_id).await? {
            if tally.excluded {
                continue;
            }

            let (payout, fee) = match quantum.split(tally.counts, self.fraction) {
                Ok(split) => split,
                Err(e) => {
                    skipped += 1;
                    tracing::warn!(
                        survey_id = %survey.survey_id,
                        recipient = %tally.recipient,
                        error = %e,
                        "tally payout not computable; skipped"
                    );
                    continue;
                }
            };
            totals
                .entry(tally.recipient.clone())
                .or_insert_with(|| RecipientTotal::new(tally.recipient.clone()))
                .add(TallyPayout {
                    survey_id: survey.survey_id.clone(),
                    counts: tally.counts,
                    satoshis: payout,
                    fees: fee,
                });

            match self.store.swap_payout(&tally.key(), tally.satoshis, payout).await? {
                CacheWrite::Unchanged(_) => {}
                CacheWrite::Written(_) => {
                    writes += 1;
                    tracing::debug!(
                        survey_id = %survey.survey_id,
                        recipient = %tally.recipient,
                        from = tally.satoshis,
                        to = payout,
                        "tally payout updated"
                    );
                }
                CacheWrite::Conflict(current) => {
                    conflicts += 1;
                    tracing::warn!(
                        survey_id = %survey.survey_id,
                        recipient = %tally.recipient,
                        expected = tally.satoshis,
                        found = current.satoshis,
                        "tally payout changed during apportionment; skipped"
                    );
                }
            }
        }

        let mut recipients: Vec<RecipientTotal> = totals.into_values().collect();
        sort_recipients(&mut recipients);

        tracing::info!(
            survey_id = %survey.survey_id,
            recipients = recipients.len(),
            writes,
            conflicts,
            skipped,
            "survey apportioned"
        );

        Ok(Apportionment {
            survey_id: survey.survey_id,
            recipients,
            writes,
            conflicts,
            skipped,
        })
    }

    /// Apportion every survey and accumulate totals per recipient.
    ///
    /// Surveys without a quantum are skipped; per-survey failures are logged
    /// and do not abort the pass.
    pub async fn apportion_all(&self, surveys: &[Survey]) -> PayoutStatement {
        let mut apportionments = Vec::with_capacity(surveys.len());

        for survey in surveys {
            match self.apportion(survey).await {
                Ok(apportionment) => apportionments.push(apportionment),
                Err(e @ (QuantaError::DegenerateSurvey(_) | QuantaError::MissingSurvey(_))) => {
                    tracing::warn!(survey_id = %survey.survey_id, error = %e, "survey skipped");
                }
                Err(e) => {
                    tracing::error!(survey_id = %survey.survey_id, error = %e, "apportionment failed");
                }
            }
        }

        PayoutStatement::merge(apportionments)
    }
}
