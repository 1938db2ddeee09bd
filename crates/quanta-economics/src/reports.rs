// crates/quanta-economics/src/reports.rs
//
// Read-side views over apportionment results: the accumulated payout
// statement, recipient balances, and the survey listing.

use std::collections::BTreeMap;

use serde::Serialize;

use quanta_core::error::QuantaError;
use quanta_core::ids::RecipientId;
use quanta_core::model::Survey;
use quanta_core::money::Satoshis;
use quanta_core::traits::TallyStore;

use crate::apportion::{sort_recipients, Apportionment, RecipientTotal};

/// Per-recipient totals accumulated across surveys, with grand totals.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PayoutStatement {
    /// Sorted by domain-reversed recipient label.
    pub recipients: Vec<RecipientTotal>,
    pub total_satoshis: Satoshis,
    pub total_fees: Satoshis,
}

impl PayoutStatement {
    /// Merge per-survey apportionments into one statement.
    pub fn merge(apportionments: impl IntoIterator<Item = Apportionment>) -> Self {
        let mut totals: BTreeMap<RecipientId, RecipientTotal> = BTreeMap::new();

        for apportionment in apportionments {
            for recipient in apportionment.recipients {
                let total = totals
                    .entry(recipient.recipient.clone())
                    .or_insert_with(|| RecipientTotal::new(recipient.recipient.clone()));
                for vote in recipient.votes {
                    total.add(vote);
                }
            }
        }

        let mut recipients: Vec<RecipientTotal> = totals.into_values().collect();
        sort_recipients(&mut recipients);

        let total_satoshis = recipients
            .iter()
            .fold(0u64, |acc, r| acc.saturating_add(r.satoshis));
        let total_fees = recipients.iter().fold(0u64, |acc, r| acc.saturating_add(r.fees));

        Self {
            recipients,
            total_satoshis,
            total_fees,
        }
    }

    pub fn recipient(&self, recipient: &RecipientId) -> Option<&RecipientTotal> {
        self.recipients.iter().find(|r| &r.recipient == recipient)
    }
}

/// Current payable balance of a recipient: the cached payouts of its
/// non-excluded tallies.
pub async fn recipient_balance<S: TallyStore + ?Sized>(
    store: &S,
    recipient: &RecipientId,
) -> Result<Satoshis, QuantaError> {
    let mut balance: Satoshis = 0;
    for tally in store.list_tallies().await? {
        if &tally.recipient != recipient || tally.excluded || tally.satoshis == 0 {
            continue;
        }
        balance = balance.checked_add(tally.satoshis).ok_or_else(|| {
            QuantaError::InvalidState(format!("Balance of {} overflows u64", recipient))
        })?;
    }
    Ok(balance)
}

/// Surveys ordered by creation time, oldest first.
pub fn survey_report(mut surveys: Vec<Survey>) -> Vec<Survey> {
    surveys.sort_by(|a, b| {
        a.created_at
            .cmp(&b.created_at)
            .then_with(|| a.survey_id.cmp(&b.survey_id))
    });
    surveys
}
