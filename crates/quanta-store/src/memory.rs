// crates/quanta-store/src/memory.rs
//
// In-memory ledger store.
//
// All tables live behind a single tokio `RwLock`, so every trait method is
// atomic with respect to the others. A write counter records every mutation
// that actually changed stored state, which lets callers assert that an
// idempotent pass performed zero writes.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use quanta_core::cache::{cas_decision, ApportionmentCache, CacheWrite, CasDecision};
use quanta_core::error::QuantaError;
use quanta_core::ids::{BatchId, SurveyId};
use quanta_core::model::{Contribution, ExclusionBatch, Survey, SurveyAggregate, TallyKey, VoteTally};
use quanta_core::money::Satoshis;
use quanta_core::traits::{BatchStore, ContributionStore, SurveyStore, TallyStore};

#[derive(Debug, Default)]
struct Tables {
    /// Keyed by contribution ID.
    contributions: HashMap<String, Contribution>,
    surveys: BTreeMap<SurveyId, Survey>,
    tallies: BTreeMap<TallyKey, VoteTally>,
    batches: HashMap<BatchId, ExclusionBatch>,
}

/// Ledger store held entirely in memory.
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
    writes: AtomicU64,
}

impl MemoryStore {
    /// Create a new empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of mutations performed since creation.
    pub fn writes(&self) -> u64 {
        self.writes.load(Ordering::SeqCst)
    }

    fn bump(&self) {
        self.writes.fetch_add(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl ContributionStore for MemoryStore {
    async fn record_contribution(&self, contribution: &Contribution) -> Result<(), QuantaError> {
        contribution.validate()?;
        let mut tables = self.tables.write().await;
        if tables.contributions.contains_key(&contribution.contribution_id) {
            return Err(QuantaError::DuplicateContribution(
                contribution.contribution_id.clone(),
            ));
        }
        tables
            .contributions
            .insert(contribution.contribution_id.clone(), contribution.clone());
        self.bump();
        Ok(())
    }

    async fn contributions_for_survey(&self, survey_id: &SurveyId) -> Result<Vec<Contribution>, QuantaError> {
        let tables = self.tables.read().await;
        let mut found: Vec<Contribution> = tables
            .contributions
            .values()
            .filter(|c| &c.survey_id == survey_id)
            .cloned()
            .collect();
        found.sort_by(|a, b| a.contribution_id.cmp(&b.contribution_id));
        Ok(found)
    }

    async fn contribution_survey_ids(&self) -> Result<Vec<SurveyId>, QuantaError> {
        let tables = self.tables.read().await;
        let ids: BTreeSet<SurveyId> = tables
            .contributions
            .values()
            .map(|c| c.survey_id.clone())
            .collect();
        Ok(ids.into_iter().collect())
    }
}

#[async_trait]
impl SurveyStore for MemoryStore {
    async fn create_survey(&self, survey_id: &SurveyId, created_at: DateTime<Utc>) -> Result<Survey, QuantaError> {
        let mut tables = self.tables.write().await;
        if let Some(existing) = tables.surveys.get(survey_id) {
            return Ok(existing.clone());
        }
        let survey = Survey::new(survey_id.clone(), created_at);
        tables.surveys.insert(survey_id.clone(), survey.clone());
        self.bump();
        Ok(survey)
    }

    async fn get_survey(&self, survey_id: &SurveyId) -> Result<Option<Survey>, QuantaError> {
        Ok(self.tables.read().await.surveys.get(survey_id).cloned())
    }

    async fn list_surveys(&self) -> Result<Vec<Survey>, QuantaError> {
        Ok(self.tables.read().await.surveys.values().cloned().collect())
    }
}

#[async_trait]
impl TallyStore for MemoryStore {
    async fn increment_counts(&self, key: &TallyKey, by: u64) -> Result<VoteTally, QuantaError> {
        let mut tables = self.tables.write().await;
        let tally = tables
            .tallies
            .entry(key.clone())
            .or_insert_with(|| VoteTally::new(key.clone()));
        tally.counts = tally.counts.saturating_add(by);
        let tally = tally.clone();
        self.bump();
        Ok(tally)
    }

    async fn get_tally(&self, key: &TallyKey) -> Result<Option<VoteTally>, QuantaError> {
        Ok(self.tables.read().await.tallies.get(key).cloned())
    }

    async fn tallies_for_survey(&self, survey_id: &SurveyId) -> Result<Vec<VoteTally>, QuantaError> {
        let tables = self.tables.read().await;
        Ok(tables
            .tallies
            .values()
            .filter(|t| &t.survey_id == survey_id)
            .cloned()
            .collect())
    }

    async fn list_tallies(&self) -> Result<Vec<VoteTally>, QuantaError> {
        Ok(self.tables.read().await.tallies.values().cloned().collect())
    }

    async fn set_exclusion(&self, key: &TallyKey, batch_id: Option<BatchId>) -> Result<VoteTally, QuantaError> {
        let mut tables = self.tables.write().await;
        let tally = tables
            .tallies
            .get_mut(key)
            .ok_or_else(|| QuantaError::NotFound(format!("tally {}/{}", key.survey_id, key.recipient)))?;
        if tally.is_settled() {
            return Err(QuantaError::SettledRowMutation {
                survey_id: key.survey_id.clone(),
                recipient: key.recipient.clone(),
            });
        }
        if tally.exclusion_batch_id == batch_id {
            return Ok(tally.clone());
        }
        if let (Some(_), Some(current)) = (batch_id, tally.exclusion_batch_id) {
            return Err(QuantaError::AlreadyExcluded {
                survey_id: key.survey_id.clone(),
                recipient: key.recipient.clone(),
                batch_id: current,
            });
        }
        tally.excluded = batch_id.is_some();
        tally.exclusion_batch_id = batch_id;
        let tally = tally.clone();
        self.bump();
        Ok(tally)
    }

    async fn record_settlement(&self, key: &TallyKey, settlement_ref: &str) -> Result<VoteTally, QuantaError> {
        let mut tables = self.tables.write().await;
        let tally = tables
            .tallies
            .get_mut(key)
            .ok_or_else(|| QuantaError::NotFound(format!("tally {}/{}", key.survey_id, key.recipient)))?;
        if let Some(existing) = &tally.settlement_ref {
            return Err(QuantaError::InvalidState(format!(
                "Tally {}/{} already settled as {}",
                key.survey_id, key.recipient, existing
            )));
        }
        tally.settlement_ref = Some(settlement_ref.to_string());
        let tally = tally.clone();
        self.bump();
        Ok(tally)
    }
}

#[async_trait]
impl BatchStore for MemoryStore {
    async fn save_batch(&self, batch: &ExclusionBatch) -> Result<(), QuantaError> {
        self.tables
            .write()
            .await
            .batches
            .insert(batch.batch_id, batch.clone());
        self.bump();
        Ok(())
    }

    async fn get_batch(&self, batch_id: &BatchId) -> Result<Option<ExclusionBatch>, QuantaError> {
        Ok(self.tables.read().await.batches.get(batch_id).cloned())
    }

    async fn tallies_in_batch(&self, batch_id: &BatchId) -> Result<Vec<VoteTally>, QuantaError> {
        let tables = self.tables.read().await;
        Ok(tables
            .tallies
            .values()
            .filter(|t| t.exclusion_batch_id.as_ref() == Some(batch_id))
            .cloned()
            .collect())
    }
}

#[async_trait]
impl ApportionmentCache for MemoryStore {
    async fn swap_survey_aggregate(
        &self,
        survey_id: &SurveyId,
        expected: SurveyAggregate,
        next: SurveyAggregate,
        now: DateTime<Utc>,
    ) -> Result<CacheWrite<Survey>, QuantaError> {
        let mut tables = self.tables.write().await;
        let survey = tables
            .surveys
            .get_mut(survey_id)
            .ok_or_else(|| QuantaError::MissingSurvey(survey_id.clone()))?;

        let stored = survey.aggregate();
        match cas_decision(&stored, &expected, &next) {
            CasDecision::Skip => Ok(CacheWrite::Unchanged(survey.clone())),
            CasDecision::Conflict => Ok(CacheWrite::Conflict(survey.clone())),
            CasDecision::Write => {
                survey.apply_aggregate(next, now);
                let survey = survey.clone();
                self.bump();
                Ok(CacheWrite::Written(survey))
            }
        }
    }

    async fn swap_payout(
        &self,
        key: &TallyKey,
        expected: Satoshis,
        next: Satoshis,
    ) -> Result<CacheWrite<VoteTally>, QuantaError> {
        let mut tables = self.tables.write().await;
        let tally = tables
            .tallies
            .get_mut(key)
            .ok_or_else(|| QuantaError::NotFound(format!("tally {}/{}", key.survey_id, key.recipient)))?;

        match cas_decision(&tally.satoshis, &expected, &next) {
            CasDecision::Skip => Ok(CacheWrite::Unchanged(tally.clone())),
            CasDecision::Conflict => Ok(CacheWrite::Conflict(tally.clone())),
            CasDecision::Write => {
                tally.satoshis = next;
                let tally = tally.clone();
                self.bump();
                Ok(CacheWrite::Written(tally))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn contribution(id: &str, survey: &str, satoshis: u64, fee: u64, votes: u64) -> Contribution {
        Contribution {
            contribution_id: id.to_string(),
            survey_id: SurveyId::from(survey),
            satoshis,
            fee,
            votes,
        }
    }

    #[tokio::test]
    async fn test_duplicate_contribution_rejected() {
        let store = MemoryStore::new();
        store.record_contribution(&contribution("c1", "s1", 100, 5, 1)).await.unwrap();
        let err = store
            .record_contribution(&contribution("c1", "s1", 100, 5, 1))
            .await
            .unwrap_err();
        assert!(matches!(err, QuantaError::DuplicateContribution(_)));
    }

    #[tokio::test]
    async fn test_contribution_survey_ids_are_distinct_and_sorted() {
        let store = MemoryStore::new();
        store.record_contribution(&contribution("c1", "s2", 100, 5, 1)).await.unwrap();
        store.record_contribution(&contribution("c2", "s1", 100, 5, 1)).await.unwrap();
        store.record_contribution(&contribution("c3", "s2", 100, 5, 1)).await.unwrap();

        let ids = store.contribution_survey_ids().await.unwrap();
        assert_eq!(ids, vec![SurveyId::from("s1"), SurveyId::from("s2")]);
        assert_eq!(store.contributions_for_survey(&SurveyId::from("s2")).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_create_survey_is_idempotent() {
        let store = MemoryStore::new();
        let id = SurveyId::from("s1");
        let first = store.create_survey(&id, Utc::now()).await.unwrap();
        let writes = store.writes();
        let second = store.create_survey(&id, Utc::now()).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(store.writes(), writes);
    }

    #[tokio::test]
    async fn test_increment_counts_accumulates() {
        let store = MemoryStore::new();
        let key = TallyKey::new("s1", "example.com");
        store.increment_counts(&key, 2).await.unwrap();
        let tally = store.increment_counts(&key, 3).await.unwrap();
        assert_eq!(tally.counts, 5);
        assert_eq!(tally.satoshis, 0);
    }

    #[tokio::test]
    async fn test_swap_payout_semantics() {
        let store = MemoryStore::new();
        let key = TallyKey::new("s1", "example.com");
        store.increment_counts(&key, 1).await.unwrap();

        let written = store.swap_payout(&key, 0, 40).await.unwrap();
        assert!(written.was_written());

        let writes = store.writes();
        let unchanged = store.swap_payout(&key, 40, 40).await.unwrap();
        assert!(matches!(unchanged, CacheWrite::Unchanged(_)));
        assert_eq!(store.writes(), writes);

        let conflict = store.swap_payout(&key, 0, 50).await.unwrap();
        assert!(conflict.is_conflict());
        assert_eq!(conflict.into_inner().satoshis, 40);
    }

    #[tokio::test]
    async fn test_swap_aggregate_requires_survey() {
        let store = MemoryStore::new();
        let err = store
            .swap_survey_aggregate(
                &SurveyId::from("missing"),
                SurveyAggregate::default(),
                SurveyAggregate::default(),
                Utc::now(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, QuantaError::MissingSurvey(_)));
    }

    #[tokio::test]
    async fn test_settled_row_rejects_exclusion() {
        let store = MemoryStore::new();
        let key = TallyKey::new("s1", "example.com");
        store.increment_counts(&key, 1).await.unwrap();
        store.record_settlement(&key, "tx-1").await.unwrap();

        let err = store.set_exclusion(&key, Some(Uuid::now_v7())).await.unwrap_err();
        assert!(matches!(err, QuantaError::SettledRowMutation { .. }));
        assert!(store.record_settlement(&key, "tx-2").await.is_err());
    }

    #[tokio::test]
    async fn test_tallies_in_batch() {
        let store = MemoryStore::new();
        let batch = Uuid::now_v7();
        let a = TallyKey::new("s1", "a.com");
        let b = TallyKey::new("s1", "b.com");
        store.increment_counts(&a, 1).await.unwrap();
        store.increment_counts(&b, 1).await.unwrap();
        store.set_exclusion(&a, Some(batch)).await.unwrap();

        let tagged = store.tallies_in_batch(&batch).await.unwrap();
        assert_eq!(tagged.len(), 1);
        assert!(tagged[0].excluded);

        store.set_exclusion(&a, None).await.unwrap();
        assert!(store.tallies_in_batch(&batch).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_excluded_row_stays_in_its_batch() {
        let store = MemoryStore::new();
        let first = Uuid::now_v7();
        let second = Uuid::now_v7();
        let key = TallyKey::new("s1", "a.com");
        store.increment_counts(&key, 1).await.unwrap();
        store.set_exclusion(&key, Some(first)).await.unwrap();

        let writes = store.writes();
        let same = store.set_exclusion(&key, Some(first)).await.unwrap();
        assert_eq!(same.exclusion_batch_id, Some(first));
        assert_eq!(store.writes(), writes);

        let err = store.set_exclusion(&key, Some(second)).await.unwrap_err();
        assert!(matches!(err, QuantaError::AlreadyExcluded { batch_id, .. } if batch_id == first));
        assert_eq!(store.tallies_in_batch(&first).await.unwrap().len(), 1);
        assert!(store.tallies_in_batch(&second).await.unwrap().is_empty());
    }
}
