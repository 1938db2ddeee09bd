// crates/quanta-economics/src/locks.rs
//
// Per-survey single-writer tokens.
//
// Aggregation and apportionment of the same survey must never interleave.
// Each survey gets one async mutex; a pass holds it from its first read to
// its last write. Different surveys proceed independently. Tokens nobody
// holds or waits on are dropped from the table on the next acquire.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, OwnedMutexGuard};

use quanta_core::ids::SurveyId;

/// Table of async mutexes keyed by survey ID.
#[derive(Debug, Default)]
pub struct SurveyLocks {
    tokens: Mutex<HashMap<SurveyId, Arc<Mutex<()>>>>,
}

impl SurveyLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for, then hold, the survey's token until the guard is dropped.
    pub async fn acquire(&self, survey_id: &SurveyId) -> OwnedMutexGuard<()> {
        let token = {
            let mut tokens = self.tokens.lock().await;
            // The table's own reference is the only one left for idle tokens.
            tokens.retain(|_, token| Arc::strong_count(token) > 1);
            tokens
                .entry(survey_id.clone())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };
        token.lock_owned().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_same_survey_is_exclusive() {
        let locks = SurveyLocks::new();
        let id = SurveyId::from("s1");
        let _held = locks.acquire(&id).await;

        let second = tokio::time::timeout(Duration::from_millis(50), locks.acquire(&id)).await;
        assert!(second.is_err());
    }

    #[tokio::test]
    async fn test_different_surveys_do_not_block() {
        let locks = SurveyLocks::new();
        let _a = locks.acquire(&SurveyId::from("a")).await;
        let b = tokio::time::timeout(Duration::from_millis(50), locks.acquire(&SurveyId::from("b"))).await;
        assert!(b.is_ok());
    }

    #[tokio::test]
    async fn test_token_released_on_drop() {
        let locks = SurveyLocks::new();
        let id = SurveyId::from("s1");
        drop(locks.acquire(&id).await);
        let again = tokio::time::timeout(Duration::from_millis(50), locks.acquire(&id)).await;
        assert!(again.is_ok());
    }

    #[tokio::test]
    async fn test_idle_tokens_are_pruned() {
        let locks = SurveyLocks::new();
        for i in 0..100 {
            drop(locks.acquire(&SurveyId::from(format!("s{}", i))).await);
        }
        let held = locks.acquire(&SurveyId::from("held")).await;
        // Only the token just handed out survives.
        assert_eq!(locks.tokens.lock().await.len(), 1);

        // A held token is kept and still excludes.
        let _other = locks.acquire(&SurveyId::from("other")).await;
        assert_eq!(locks.tokens.lock().await.len(), 2);
        let blocked =
            tokio::time::timeout(Duration::from_millis(50), locks.acquire(&SurveyId::from("held"))).await;
        assert!(blocked.is_err());
        drop(held);
    }
}
