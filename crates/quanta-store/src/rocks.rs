// crates/quanta-store/src/rocks.rs
//
// RocksDB-backed persistent ledger store.
//
// Key format:
//   - `contribution:{contribution_id}`            -> JSON Contribution
//   - `by_survey:{survey_id}:{contribution_id}`   -> empty value (index only)
//   - `survey:{survey_id}`                        -> JSON Survey
//   - `tally:{survey_id}:{recipient}`             -> JSON VoteTally
//   - `batch:{uuid}`                              -> JSON ExclusionBatch
//
// Survey and recipient IDs are opaque and may themselves contain ':', so
// prefix scans re-check the decoded record before returning it.
//
// Read-modify-write operations (compare-and-swap, counters, exclusion
// toggles) are serialized through an async write lock so that each one is
// atomic within the process.

use std::collections::BTreeSet;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rocksdb::{DBWithThreadMode, MultiThreaded, Options};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::Mutex;

use quanta_core::cache::{cas_decision, ApportionmentCache, CacheWrite, CasDecision};
use quanta_core::error::QuantaError;
use quanta_core::ids::{BatchId, SurveyId};
use quanta_core::model::{Contribution, ExclusionBatch, Survey, SurveyAggregate, TallyKey, VoteTally};
use quanta_core::money::Satoshis;
use quanta_core::traits::{BatchStore, ContributionStore, SurveyStore, TallyStore};

/// RocksDB wrapper implementing every ledger trait.
#[derive(Debug)]
pub struct RocksStore {
    db: DBWithThreadMode<MultiThreaded>,
    write_lock: Mutex<()>,
}

impl RocksStore {
    /// Open a RocksDB database at the given filesystem path.
    ///
    /// Creates the database directory if it does not exist.
    pub fn open(path: &str) -> Result<Self, QuantaError> {
        let mut opts = Options::default();
        opts.create_if_missing(true);

        let db = DBWithThreadMode::<MultiThreaded>::open(&opts, path)
            .map_err(|e| QuantaError::Storage(format!("Failed to open RocksDB at {}: {}", path, e)))?;

        Ok(Self {
            db,
            write_lock: Mutex::new(()),
        })
    }

    fn contribution_key(contribution_id: &str) -> Vec<u8> {
        format!("contribution:{}", contribution_id).into_bytes()
    }

    fn by_survey_prefix(survey_id: &SurveyId) -> String {
        format!("by_survey:{}:", survey_id)
    }

    fn survey_key(survey_id: &SurveyId) -> Vec<u8> {
        format!("survey:{}", survey_id).into_bytes()
    }

    fn tally_prefix(survey_id: &SurveyId) -> String {
        format!("tally:{}:", survey_id)
    }

    fn tally_key(key: &TallyKey) -> Vec<u8> {
        format!("{}{}", Self::tally_prefix(&key.survey_id), key.recipient).into_bytes()
    }

    fn batch_key(batch_id: &BatchId) -> Vec<u8> {
        format!("batch:{}", batch_id).into_bytes()
    }

    /// Put raw bytes into RocksDB, mapping errors to QuantaError::Storage.
    fn put_raw(&self, key: &[u8], value: &[u8]) -> Result<(), QuantaError> {
        self.db
            .put(key, value)
            .map_err(|e| QuantaError::Storage(format!("RocksDB put failed: {}", e)))
    }

    /// Get raw bytes from RocksDB, mapping errors to QuantaError::Storage.
    fn get_raw(&self, key: &[u8]) -> Result<Option<Vec<u8>>, QuantaError> {
        self.db
            .get(key)
            .map_err(|e| QuantaError::Storage(format!("RocksDB get failed: {}", e)))
    }

    fn put_json<T: Serialize>(&self, key: &[u8], value: &T) -> Result<(), QuantaError> {
        let json = serde_json::to_vec(value)?;
        self.put_raw(key, &json)
    }

    fn get_json<T: DeserializeOwned>(&self, key: &[u8]) -> Result<Option<T>, QuantaError> {
        match self.get_raw(key)? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Collect every (key, value) pair whose key starts with `prefix`.
    fn scan_prefix(&self, prefix: &str) -> Result<Vec<(Vec<u8>, Vec<u8>)>, QuantaError> {
        let prefix = prefix.as_bytes();
        let mut entries = Vec::new();

        for item in self.db.prefix_iterator(prefix) {
            let (key, value) = item
                .map_err(|e| QuantaError::Storage(format!("RocksDB iteration error: {}", e)))?;

            // Stop when the prefix no longer matches.
            if !key.starts_with(prefix) {
                break;
            }
            entries.push((key.to_vec(), value.to_vec()));
        }

        Ok(entries)
    }

    fn scan_json<T: DeserializeOwned>(&self, prefix: &str) -> Result<Vec<T>, QuantaError> {
        self.scan_prefix(prefix)?
            .into_iter()
            .map(|(_, value)| serde_json::from_slice(&value).map_err(QuantaError::from))
            .collect()
    }

    fn load_tally(&self, key: &TallyKey) -> Result<VoteTally, QuantaError> {
        self.get_json(&Self::tally_key(key))?
            .ok_or_else(|| QuantaError::NotFound(format!("tally {}/{}", key.survey_id, key.recipient)))
    }
}

#[async_trait]
impl ContributionStore for RocksStore {
    async fn record_contribution(&self, contribution: &Contribution) -> Result<(), QuantaError> {
        contribution.validate()?;
        let _guard = self.write_lock.lock().await;

        let key = Self::contribution_key(&contribution.contribution_id);
        if self.get_raw(&key)?.is_some() {
            return Err(QuantaError::DuplicateContribution(
                contribution.contribution_id.clone(),
            ));
        }
        self.put_json(&key, contribution)?;
        let index = format!(
            "{}{}",
            Self::by_survey_prefix(&contribution.survey_id),
            contribution.contribution_id
        );
        // Existence is the signal; the value is empty.
        self.put_raw(index.as_bytes(), &[])
    }

    async fn contributions_for_survey(&self, survey_id: &SurveyId) -> Result<Vec<Contribution>, QuantaError> {
        let prefix = Self::by_survey_prefix(survey_id);
        let mut found = Vec::new();

        for (key, _) in self.scan_prefix(&prefix)? {
            let contribution_id = std::str::from_utf8(&key[prefix.len()..])
                .map_err(|e| QuantaError::Storage(format!("Corrupt index key: {}", e)))?;
            if let Some(contribution) = self.get_json::<Contribution>(&Self::contribution_key(contribution_id))? {
                if &contribution.survey_id == survey_id {
                    found.push(contribution);
                }
            }
        }

        found.sort_by(|a, b| a.contribution_id.cmp(&b.contribution_id));
        Ok(found)
    }

    async fn contribution_survey_ids(&self) -> Result<Vec<SurveyId>, QuantaError> {
        let ids: BTreeSet<SurveyId> = self
            .scan_json::<Contribution>("contribution:")?
            .into_iter()
            .map(|c| c.survey_id)
            .collect();
        Ok(ids.into_iter().collect())
    }
}

#[async_trait]
impl SurveyStore for RocksStore {
    async fn create_survey(&self, survey_id: &SurveyId, created_at: DateTime<Utc>) -> Result<Survey, QuantaError> {
        let _guard = self.write_lock.lock().await;
        let key = Self::survey_key(survey_id);
        if let Some(existing) = self.get_json::<Survey>(&key)? {
            return Ok(existing);
        }
        let survey = Survey::new(survey_id.clone(), created_at);
        self.put_json(&key, &survey)?;
        Ok(survey)
    }

    async fn get_survey(&self, survey_id: &SurveyId) -> Result<Option<Survey>, QuantaError> {
        self.get_json(&Self::survey_key(survey_id))
    }

    async fn list_surveys(&self) -> Result<Vec<Survey>, QuantaError> {
        let mut surveys: Vec<Survey> = self.scan_json("survey:")?;
        surveys.sort_by(|a, b| a.survey_id.cmp(&b.survey_id));
        Ok(surveys)
    }
}

#[async_trait]
impl TallyStore for RocksStore {
    async fn increment_counts(&self, key: &TallyKey, by: u64) -> Result<VoteTally, QuantaError> {
        let _guard = self.write_lock.lock().await;
        let mut tally = self
            .get_json::<VoteTally>(&Self::tally_key(key))?
            .unwrap_or_else(|| VoteTally::new(key.clone()));
        tally.counts = tally.counts.saturating_add(by);
        self.put_json(&Self::tally_key(key), &tally)?;
        Ok(tally)
    }

    async fn get_tally(&self, key: &TallyKey) -> Result<Option<VoteTally>, QuantaError> {
        self.get_json(&Self::tally_key(key))
    }

    async fn tallies_for_survey(&self, survey_id: &SurveyId) -> Result<Vec<VoteTally>, QuantaError> {
        let mut tallies: Vec<VoteTally> = self
            .scan_json::<VoteTally>(&Self::tally_prefix(survey_id))?
            .into_iter()
            .filter(|t| &t.survey_id == survey_id)
            .collect();
        tallies.sort_by_key(|t| t.key());
        Ok(tallies)
    }

    async fn list_tallies(&self) -> Result<Vec<VoteTally>, QuantaError> {
        let mut tallies: Vec<VoteTally> = self.scan_json("tally:")?;
        tallies.sort_by_key(|t| t.key());
        Ok(tallies)
    }

    async fn set_exclusion(&self, key: &TallyKey, batch_id: Option<BatchId>) -> Result<VoteTally, QuantaError> {
        let _guard = self.write_lock.lock().await;
        let mut tally = self.load_tally(key)?;
        if tally.is_settled() {
            return Err(QuantaError::SettledRowMutation {
                survey_id: key.survey_id.clone(),
                recipient: key.recipient.clone(),
            });
        }
        if tally.exclusion_batch_id == batch_id {
            return Ok(tally);
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
        self.put_json(&Self::tally_key(key), &tally)?;
        Ok(tally)
    }

    async fn record_settlement(&self, key: &TallyKey, settlement_ref: &str) -> Result<VoteTally, QuantaError> {
        let _guard = self.write_lock.lock().await;
        let mut tally = self.load_tally(key)?;
        if let Some(existing) = &tally.settlement_ref {
            return Err(QuantaError::InvalidState(format!(
                "Tally {}/{} already settled as {}",
                key.survey_id, key.recipient, existing
            )));
        }
        tally.settlement_ref = Some(settlement_ref.to_string());
        self.put_json(&Self::tally_key(key), &tally)?;
        Ok(tally)
    }
}

#[async_trait]
impl BatchStore for RocksStore {
    async fn save_batch(&self, batch: &ExclusionBatch) -> Result<(), QuantaError> {
        let _guard = self.write_lock.lock().await;
        self.put_json(&Self::batch_key(&batch.batch_id), batch)
    }

    async fn get_batch(&self, batch_id: &BatchId) -> Result<Option<ExclusionBatch>, QuantaError> {
        self.get_json(&Self::batch_key(batch_id))
    }

    async fn tallies_in_batch(&self, batch_id: &BatchId) -> Result<Vec<VoteTally>, QuantaError> {
        let tallies = self.list_tallies().await?;
        Ok(tallies
            .into_iter()
            .filter(|t| t.exclusion_batch_id.as_ref() == Some(batch_id))
            .collect())
    }
}

#[async_trait]
impl ApportionmentCache for RocksStore {
    async fn swap_survey_aggregate(
        &self,
        survey_id: &SurveyId,
        expected: SurveyAggregate,
        next: SurveyAggregate,
        now: DateTime<Utc>,
    ) -> Result<CacheWrite<Survey>, QuantaError> {
        let _guard = self.write_lock.lock().await;
        let key = Self::survey_key(survey_id);
        let mut survey: Survey = self
            .get_json(&key)?
            .ok_or_else(|| QuantaError::MissingSurvey(survey_id.clone()))?;

        match cas_decision(&survey.aggregate(), &expected, &next) {
            CasDecision::Skip => Ok(CacheWrite::Unchanged(survey)),
            CasDecision::Conflict => Ok(CacheWrite::Conflict(survey)),
            CasDecision::Write => {
                survey.apply_aggregate(next, now);
                self.put_json(&key, &survey)?;
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
        let _guard = self.write_lock.lock().await;
        let mut tally = self.load_tally(key)?;

        match cas_decision(&tally.satoshis, &expected, &next) {
            CasDecision::Skip => Ok(CacheWrite::Unchanged(tally)),
            CasDecision::Conflict => Ok(CacheWrite::Conflict(tally)),
            CasDecision::Write => {
                tally.satoshis = next;
                self.put_json(&Self::tally_key(key), &tally)?;
                Ok(CacheWrite::Written(tally))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    /// Create a temporary directory path using UUID to avoid conflicts.
    fn temp_db_path(label: &str) -> String {
        let path = std::env::temp_dir().join(format!("quanta_test_{}_{}", label, Uuid::now_v7()));
        path.to_string_lossy().to_string()
    }

    #[tokio::test]
    async fn test_survey_round_trip_and_cas() {
        let path = temp_db_path("survey");
        let store = RocksStore::open(&path).unwrap();
        let id = SurveyId::from("s1");
        let created = store.create_survey(&id, Utc::now()).await.unwrap();

        let next = SurveyAggregate {
            total_satoshis: 1_000,
            total_fee: 50,
            total_votes: 10,
            counts: 10,
        };
        let written = store
            .swap_survey_aggregate(&id, created.aggregate(), next, Utc::now())
            .await
            .unwrap();
        assert!(written.was_written());

        let unchanged = store
            .swap_survey_aggregate(&id, next, next, Utc::now())
            .await
            .unwrap();
        assert!(matches!(unchanged, CacheWrite::Unchanged(_)));

        let stored = store.get_survey(&id).await.unwrap().unwrap();
        assert_eq!(stored.quantum.unwrap().as_f64(), 95.0);

        drop(store);
        let _ = std::fs::remove_dir_all(&path);
    }

    #[tokio::test]
    async fn test_contributions_indexed_by_survey() {
        let path = temp_db_path("contrib");
        let store = RocksStore::open(&path).unwrap();
        for (id, survey) in [("c1", "s1"), ("c2", "s2"), ("c3", "s1")] {
            store
                .record_contribution(&Contribution {
                    contribution_id: id.to_string(),
                    survey_id: SurveyId::from(survey),
                    satoshis: 100,
                    fee: 5,
                    votes: 2,
                })
                .await
                .unwrap();
        }

        let s1 = store.contributions_for_survey(&SurveyId::from("s1")).await.unwrap();
        assert_eq!(s1.len(), 2);
        assert_eq!(
            store.contribution_survey_ids().await.unwrap(),
            vec![SurveyId::from("s1"), SurveyId::from("s2")]
        );

        drop(store);
        let _ = std::fs::remove_dir_all(&path);
    }

    #[tokio::test]
    async fn test_tally_prefix_scan_filters_colliding_ids() {
        let path = temp_db_path("tally");
        let store = RocksStore::open(&path).unwrap();
        store.increment_counts(&TallyKey::new("a", "x.com"), 1).await.unwrap();
        store.increment_counts(&TallyKey::new("a:b", "y.com"), 1).await.unwrap();

        let tallies = store.tallies_for_survey(&SurveyId::from("a")).await.unwrap();
        assert_eq!(tallies.len(), 1);
        assert_eq!(tallies[0].recipient.as_str(), "x.com");

        drop(store);
        let _ = std::fs::remove_dir_all(&path);
    }

    #[tokio::test]
    async fn test_settled_tally_rejects_exclusion() {
        let path = temp_db_path("settled");
        let store = RocksStore::open(&path).unwrap();
        let key = TallyKey::new("s1", "x.com");
        store.increment_counts(&key, 1).await.unwrap();
        store.record_settlement(&key, "tx").await.unwrap();

        let err = store.set_exclusion(&key, Some(Uuid::now_v7())).await.unwrap_err();
        assert!(matches!(err, QuantaError::SettledRowMutation { .. }));

        drop(store);
        let _ = std::fs::remove_dir_all(&path);
    }

    #[tokio::test]
    async fn test_excluded_tally_cannot_change_batch() {
        let path = temp_db_path("rebatch");
        let store = RocksStore::open(&path).unwrap();
        let key = TallyKey::new("s1", "x.com");
        let first = Uuid::now_v7();
        store.increment_counts(&key, 1).await.unwrap();
        store.set_exclusion(&key, Some(first)).await.unwrap();

        assert!(store.set_exclusion(&key, Some(first)).await.is_ok());
        let err = store.set_exclusion(&key, Some(Uuid::now_v7())).await.unwrap_err();
        assert!(matches!(err, QuantaError::AlreadyExcluded { .. }));

        let tally = store.get_tally(&key).await.unwrap().unwrap();
        assert_eq!(tally.exclusion_batch_id, Some(first));

        drop(store);
        let _ = std::fs::remove_dir_all(&path);
    }
}
