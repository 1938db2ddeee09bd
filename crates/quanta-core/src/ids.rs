// crates/quanta-core/src/ids.rs
//
// Opaque identifiers. Surveys and recipients are keyed by the strings the
// ingestion feeds hand us; batches use UUIDv7 so they sort by creation time.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identifier of a contribution round.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SurveyId(pub String);

impl SurveyId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SurveyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SurveyId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for SurveyId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Identifier of a payout recipient (a publisher label such as `www.example.com`).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecipientId(pub String);

impl RecipientId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Sort key with the dot-separated labels reversed, so that
    /// `www.example.com` orders as `com.example.www` and recipients group by
    /// top-level domain. Identifiers without dots sort as themselves.
    pub fn sort_key(&self) -> String {
        self.0.rsplit('.').collect::<Vec<_>>().join(".")
    }
}

impl fmt::Display for RecipientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RecipientId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for RecipientId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Identifier of an exclusion batch.
pub type BatchId = Uuid;

/// Generate a fresh, time-ordered batch identifier.
pub fn new_batch_id() -> BatchId {
    Uuid::now_v7()
}
