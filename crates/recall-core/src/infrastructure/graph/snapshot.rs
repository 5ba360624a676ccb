//! JSON graph snapshots
//!
//! A snapshot carries already-extracted records: entities, statements,
//! episodes with the ids of the statements they produced, and compacted
//! sessions. Loading one is a bulk import, not extraction.

use std::collections::{HashMap, HashSet};
use std::path::Path;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::domain::recall::{CompactedSession, Entity, Episode, Statement};
use crate::embedding::Embedder;
use crate::error::{Error, Result};

/// Texts per embedding request when filling a snapshot
pub const EMBED_BATCH_SIZE: usize = 64;

/// An episode plus its provenance links
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotEpisode {
    #[serde(flatten)]
    pub episode: Episode,
    #[serde(default)]
    pub statement_ids: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GraphSnapshot {
    pub entities: Vec<Entity>,
    pub statements: Vec<Statement>,
    pub episodes: Vec<SnapshotEpisode>,
    pub compacted_sessions: Vec<CompactedSession>,
}

/// Record counts from one load
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LoadSummary {
    pub entities: usize,
    pub statements: usize,
    pub episodes: usize,
    pub provenance_links: usize,
    pub compacted_sessions: usize,
}

impl LoadSummary {
    pub fn of(snapshot: &GraphSnapshot, provenance_links: usize) -> Self {
        Self {
            entities: snapshot.entities.len(),
            statements: snapshot.statements.len(),
            episodes: snapshot.episodes.len(),
            provenance_links,
            compacted_sessions: snapshot.compacted_sessions.len(),
        }
    }
}

/// A graph backend that can bulk-load a snapshot
#[async_trait]
pub trait SnapshotLoader: Send + Sync {
    async fn load_snapshot(&self, snapshot: &GraphSnapshot) -> Result<LoadSummary>;
}

impl GraphSnapshot {
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_path(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json(&json)
    }

    /// Check ids are unique, intervals are ordered and provenance stays within one owner
    pub fn validate(&self) -> Result<()> {
        let mut statement_owner: HashMap<&str, &str> = HashMap::new();
        for statement in &self.statements {
            statement.validate()?;
            if statement_owner
                .insert(&statement.id, &statement.owner_id)
                .is_some()
            {
                return Err(Error::InvalidInput(format!(
                    "duplicate statement id {}",
                    statement.id
                )));
            }
        }

        let mut episode_ids: HashSet<&str> = HashSet::new();
        for item in &self.episodes {
            let episode = &item.episode;
            if !episode_ids.insert(&episode.id) {
                return Err(Error::InvalidInput(format!("duplicate episode id {}", episode.id)));
            }
            for statement_id in &item.statement_ids {
                match statement_owner.get(statement_id.as_str()) {
                    Some(owner) if *owner == episode.owner_id => {}
                    Some(_) => {
                        return Err(Error::InvalidInput(format!(
                            "episode {} cites statement {} of another owner",
                            episode.id, statement_id
                        )));
                    }
                    None => {
                        return Err(Error::InvalidInput(format!(
                            "episode {} cites unknown statement {}",
                            episode.id, statement_id
                        )));
                    }
                }
            }
        }

        for session in &self.compacted_sessions {
            if session.end_time < session.start_time {
                return Err(Error::InvalidInput(format!(
                    "compacted session {} ends before it starts",
                    session.id
                )));
            }
        }

        Ok(())
    }

    /// Embed entity names and facts that arrived without vectors
    ///
    /// Texts go to the embedder in batches of [`EMBED_BATCH_SIZE`]. Returns how
    /// many embeddings were computed.
    pub async fn embed_missing(&mut self, embedder: &dyn Embedder) -> Result<usize> {
        let mut targets: Vec<&mut Vec<f32>> = Vec::new();
        let mut texts: Vec<String> = Vec::new();
        for entity in self.entities.iter_mut().filter(|e| e.name_embedding.is_empty()) {
            texts.push(entity.name.clone());
            targets.push(&mut entity.name_embedding);
        }
        for statement in self
            .statements
            .iter_mut()
            .filter(|s| s.fact_embedding.is_empty())
        {
            texts.push(statement.fact.clone());
            targets.push(&mut statement.fact_embedding);
        }

        let computed = texts.len();
        let mut targets = targets.into_iter();
        for chunk in texts.chunks(EMBED_BATCH_SIZE) {
            let vectors = embedder.embed_batch(chunk).await?;
            if vectors.len() != chunk.len() {
                return Err(Error::EmbeddingFailed(format!(
                    "embedder returned {} vectors for {} texts",
                    vectors.len(),
                    chunk.len()
                )));
            }
            for (target, vector) in targets.by_ref().zip(vectors) {
                *target = vector;
            }
        }
        debug!(computed, "Embedded snapshot records");
        Ok(computed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::HashEmbedder;

    const SNAPSHOT: &str = r#"{
        "entities": [{"id": "pg", "name": "Postgres", "ownerId": "alice"}],
        "statements": [{
            "id": "s1",
            "fact": "Alice migrated Postgres",
            "subjectId": "alice",
            "predicate": "migrated",
            "objectId": "pg",
            "validAt": "2024-01-01T00:00:00Z",
            "ownerId": "alice"
        }],
        "episodes": [{
            "id": "e1",
            "content": "We finished the Postgres migration",
            "createdAt": "2024-01-02T00:00:00Z",
            "validAt": "2024-01-02T00:00:00Z",
            "ownerId": "alice",
            "sessionId": "chat-1",
            "statementIds": ["s1"]
        }]
    }"#;

    #[test]
    fn test_parse_and_validate() {
        let snapshot = GraphSnapshot::from_json(SNAPSHOT).unwrap();
        assert_eq!(snapshot.episodes[0].statement_ids, vec!["s1"]);
        assert_eq!(snapshot.episodes[0].episode.session_id.as_deref(), Some("chat-1"));
        assert!(snapshot.compacted_sessions.is_empty());
        snapshot.validate().unwrap();
    }

    #[test]
    fn test_cross_owner_provenance_is_rejected() {
        let mut snapshot = GraphSnapshot::from_json(SNAPSHOT).unwrap();
        snapshot.episodes[0].episode.owner_id = "bob".to_string();
        assert!(snapshot.validate().is_err());
    }

    #[test]
    fn test_unknown_statement_is_rejected() {
        let mut snapshot = GraphSnapshot::from_json(SNAPSHOT).unwrap();
        snapshot.episodes[0].statement_ids.push("missing".to_string());
        assert!(snapshot.validate().is_err());
    }

    #[tokio::test]
    async fn test_embed_missing_fills_vectors() {
        let mut snapshot = GraphSnapshot::from_json(SNAPSHOT).unwrap();
        let embedder = HashEmbedder::new(32);

        assert_eq!(snapshot.embed_missing(&embedder).await.unwrap(), 2);
        assert_eq!(snapshot.entities[0].name_embedding.len(), 32);
        assert_eq!(snapshot.statements[0].fact_embedding.len(), 32);
        assert_eq!(snapshot.embed_missing(&embedder).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_embed_missing_batches_requests() {
        use std::sync::atomic::{AtomicUsize, Ordering};

        struct CountingEmbedder {
            inner: HashEmbedder,
            batches: AtomicUsize,
        }

        #[async_trait]
        impl Embedder for CountingEmbedder {
            async fn embed(&self, text: &str) -> Result<Vec<f32>> {
                self.inner.embed(text).await
            }

            async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
                self.batches.fetch_add(1, Ordering::SeqCst);
                Ok(texts.iter().map(|t| self.inner.embed_sync(t)).collect())
            }
        }

        let mut snapshot = GraphSnapshot::from_json(SNAPSHOT).unwrap();
        let template = snapshot.statements[0].clone();
        for i in 0..EMBED_BATCH_SIZE {
            let mut statement = template.clone();
            statement.id = format!("extra-{}", i);
            statement.fact = format!("Alice reviewed migration step {}", i);
            snapshot.statements.push(statement);
        }

        let embedder = CountingEmbedder {
            inner: HashEmbedder::new(16),
            batches: AtomicUsize::new(0),
        };
        let computed = snapshot.embed_missing(&embedder).await.unwrap();

        assert_eq!(computed, EMBED_BATCH_SIZE + 2);
        assert_eq!(embedder.batches.load(Ordering::SeqCst), 2);
        let last = snapshot.statements.last().unwrap();
        assert_eq!(last.fact_embedding, embedder.inner.embed_sync(&last.fact));
    }
}
