//! Bi-temporal statements
//!
//! A statement is one subject-predicate-object fact. `valid_at` is when the
//! fact became true in the world, independent of when it was written;
//! `invalid_at` is when it stopped being true (`None` = still true).

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// An atomic extracted fact with temporal validity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Statement {
    pub id: String,
    pub fact: String,
    #[serde(default)]
    pub fact_embedding: Vec<f32>,
    pub subject_id: String,
    pub predicate: String,
    pub object_id: String,
    pub valid_at: DateTime<Utc>,
    #[serde(default)]
    pub invalid_at: Option<DateTime<Utc>>,
    pub owner_id: String,
    #[serde(default)]
    pub space_ids: Vec<String>,
}

impl Statement {
    pub fn new(
        id: impl Into<String>,
        fact: impl Into<String>,
        subject_id: impl Into<String>,
        predicate: impl Into<String>,
        object_id: impl Into<String>,
        owner_id: impl Into<String>,
        valid_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: id.into(),
            fact: fact.into(),
            fact_embedding: Vec::new(),
            subject_id: subject_id.into(),
            predicate: predicate.into(),
            object_id: object_id.into(),
            valid_at,
            invalid_at: None,
            owner_id: owner_id.into(),
            space_ids: Vec::new(),
        }
    }

    pub fn with_embedding(mut self, embedding: Vec<f32>) -> Self {
        self.fact_embedding = embedding;
        self
    }

    pub fn invalidated_at(mut self, invalid_at: DateTime<Utc>) -> Self {
        self.invalid_at = Some(invalid_at);
        self
    }

    pub fn in_spaces(mut self, space_ids: Vec<String>) -> Self {
        self.space_ids = space_ids;
        self
    }

    /// Check the record-level invariants a loaded statement must hold
    pub fn validate(&self) -> Result<()> {
        if self.id.is_empty() || self.owner_id.is_empty() {
            return Err(Error::InvalidInput(
                "statement requires an id and an owner".to_string(),
            ));
        }
        if let Some(invalid_at) = self.invalid_at {
            if invalid_at < self.valid_at {
                return Err(Error::InvalidInput(format!(
                    "statement {} is invalidated before it became valid",
                    self.id
                )));
            }
        }
        Ok(())
    }

    /// Whether the fact held at `at`
    pub fn is_valid_at(&self, at: DateTime<Utc>) -> bool {
        self.valid_at <= at && self.invalid_at.is_none_or(|invalid_at| invalid_at > at)
    }

    /// Entity ids this statement connects
    pub fn entity_ids(&self) -> [&str; 2] {
        [&self.subject_id, &self.object_id]
    }

    /// Whether the statement mentions any of the given entities
    pub fn touches(&self, entity_ids: &HashSet<String>) -> bool {
        self.entity_ids().iter().any(|id| entity_ids.contains(*id))
    }
}

/// A statement paired with its cosine similarity to the query
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredStatement {
    pub statement: Statement,
    pub similarity: f32,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(day: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, day, 0, 0, 0).unwrap()
    }

    fn statement() -> Statement {
        Statement::new("s1", "Alice uses Postgres", "alice", "uses", "postgres", "owner", at(5))
    }

    #[test]
    fn test_validity_window() {
        let s = statement().invalidated_at(at(10));
        assert!(!s.is_valid_at(at(4)));
        assert!(s.is_valid_at(at(5)));
        assert!(s.is_valid_at(at(9)));
        assert!(!s.is_valid_at(at(10)));
    }

    #[test]
    fn test_open_ended_validity() {
        assert!(statement().is_valid_at(at(28)));
    }

    #[test]
    fn test_validate_rejects_inverted_interval() {
        let s = statement().invalidated_at(at(1));
        assert!(s.validate().is_err());
        assert!(statement().validate().is_ok());
    }

    #[test]
    fn test_touches() {
        let ids: HashSet<String> = ["postgres".to_string()].into_iter().collect();
        assert!(statement().touches(&ids));

        let others: HashSet<String> = ["mysql".to_string()].into_iter().collect();
        assert!(!statement().touches(&others));
    }
}
