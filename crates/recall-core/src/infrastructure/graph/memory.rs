//! In-memory recall graph
//!
//! Brute-force cosine similarity and an Okapi BM25 keyword index computed per
//! query over the owner's eligible statements. Suitable for tests, snapshots
//! and small personal graphs.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::debug;

use crate::domain::recall::{
    CompactedSession, Entity, EntityMatch, Episode, EpisodeStatement, GraphStats, KeywordHit,
    ProvenanceLink, RecallGraph, ScoredStatement, Statement, StatementFilter,
};
use crate::embedding::cosine_similarity;
use crate::error::{Error, Result};

use super::snapshot::{GraphSnapshot, LoadSummary, SnapshotLoader};

/// BM25 term-frequency saturation
const BM25_K1: f32 = 1.2;
/// BM25 document-length normalization
const BM25_B: f32 = 0.75;

/// Every owner's records, keyed by id so iteration order is stable
#[derive(Debug, Default)]
struct GraphData {
    /// entity id -> entity
    entities: BTreeMap<String, Entity>,
    /// statement id -> statement
    statements: BTreeMap<String, Statement>,
    /// episode id -> episode
    episodes: BTreeMap<String, Episode>,
    /// episode id -> statement ids
    provenance: BTreeMap<String, BTreeSet<String>>,
    /// statement id -> episode ids
    citations: BTreeMap<String, BTreeSet<String>>,
    /// (owner id, session id) -> compact record
    compacted: BTreeMap<(String, String), CompactedSession>,
}

/// Recall graph held entirely in memory
///
/// Searches take a shared read lock, inserts an exclusive write lock, so
/// concurrent strategies never block each other.
#[derive(Debug, Default)]
pub struct InMemoryRecallGraph {
    data: RwLock<GraphData>,
}

impl InMemoryRecallGraph {
    /// Create an empty graph
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace an entity
    pub async fn insert_entity(&self, entity: Entity) {
        self.data.write().await.entities.insert(entity.id.clone(), entity);
    }

    /// Insert or replace a statement after checking its validity window
    pub async fn insert_statement(&self, statement: Statement) -> Result<()> {
        statement.validate()?;
        self.data
            .write()
            .await
            .statements
            .insert(statement.id.clone(), statement);
        Ok(())
    }

    /// Insert an episode and link it to statements it produced
    ///
    /// Every cited statement must already exist and belong to the episode's
    /// owner; nothing is written when one does not.
    pub async fn insert_episode(&self, episode: Episode, statement_ids: &[String]) -> Result<()> {
        let mut data = self.data.write().await;
        for statement_id in statement_ids {
            match data.statements.get(statement_id) {
                Some(statement) if statement.owner_id == episode.owner_id => {}
                Some(_) => {
                    return Err(Error::InvalidInput(format!(
                        "episode {} cannot cite statement {} of another owner",
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

        for statement_id in statement_ids {
            data.provenance
                .entry(episode.id.clone())
                .or_default()
                .insert(statement_id.clone());
            data.citations
                .entry(statement_id.clone())
                .or_default()
                .insert(episode.id.clone());
        }
        data.episodes.insert(episode.id.clone(), episode);
        Ok(())
    }

    /// Insert or replace the compact record of a session
    pub async fn insert_compacted_session(&self, session: CompactedSession) {
        self.data.write().await.compacted.insert(
            (session.owner_id.clone(), session.session_id.clone()),
            session,
        );
    }
}

#[async_trait]
impl SnapshotLoader for InMemoryRecallGraph {
    async fn load_snapshot(&self, snapshot: &GraphSnapshot) -> Result<LoadSummary> {
        snapshot.validate()?;

        for entity in &snapshot.entities {
            self.insert_entity(entity.clone()).await;
        }
        for statement in &snapshot.statements {
            self.insert_statement(statement.clone()).await?;
        }
        let mut links = 0;
        for item in &snapshot.episodes {
            links += item.statement_ids.len();
            self.insert_episode(item.episode.clone(), &item.statement_ids)
                .await?;
        }
        for session in &snapshot.compacted_sessions {
            self.insert_compacted_session(session.clone()).await;
        }

        let summary = LoadSummary::of(snapshot, links);
        debug!(?summary, "Loaded snapshot into memory graph");
        Ok(summary)
    }
}

/// Lowercase alphanumeric words, the same split the hashing embedder uses
fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(str::to_lowercase)
        .collect()
}

#[async_trait]
impl RecallGraph for InMemoryRecallGraph {
    async fn find_entities_by_embedding(
        &self,
        owner_id: &str,
        embedding: &[f32],
        min_similarity: f32,
        limit: usize,
    ) -> Result<Vec<EntityMatch>> {
        let data = self.data.read().await;
        let mut matches: Vec<EntityMatch> = data
            .entities
            .values()
            .filter(|e| e.owner_id == owner_id)
            .filter_map(|entity| {
                let similarity = cosine_similarity(embedding, &entity.name_embedding);
                (similarity >= min_similarity).then(|| EntityMatch {
                    entity: entity.clone(),
                    similarity,
                })
            })
            .collect();
        matches.sort_by(|a, b| {
            b.similarity
                .total_cmp(&a.similarity)
                .then_with(|| a.entity.id.cmp(&b.entity.id))
        });
        matches.truncate(limit);
        Ok(matches)
    }

    /// Okapi BM25 over the eligible statements, with the corpus statistics
    /// recomputed for each query
    async fn keyword_search(
        &self,
        query: &str,
        filter: &StatementFilter,
        limit: usize,
    ) -> Result<Vec<KeywordHit>> {
        let terms: BTreeSet<String> = tokenize(query).into_iter().collect();
        if terms.is_empty() {
            return Ok(Vec::new());
        }

        let data = self.data.read().await;
        let corpus: Vec<(&Statement, Vec<String>)> = data
            .statements
            .values()
            .filter(|s| filter.admits_statement(s))
            .map(|s| (s, tokenize(&s.fact)))
            .collect();
        if corpus.is_empty() {
            return Ok(Vec::new());
        }

        let doc_count = corpus.len() as f32;
        let avg_len = corpus.iter().map(|(_, t)| t.len()).sum::<usize>() as f32 / doc_count;
        let mut doc_freq: HashMap<&str, usize> = HashMap::new();
        for (_, tokens) in &corpus {
            let unique: HashSet<&str> = tokens.iter().map(String::as_str).collect();
            for term in &terms {
                if unique.contains(term.as_str()) {
                    *doc_freq.entry(term.as_str()).or_default() += 1;
                }
            }
        }

        let mut hits: Vec<KeywordHit> = corpus
            .iter()
            .filter_map(|(statement, tokens)| {
                let len = tokens.len() as f32;
                let score: f32 = terms
                    .iter()
                    .filter_map(|term| {
                        let tf = tokens.iter().filter(|t| *t == term).count() as f32;
                        if tf == 0.0 {
                            return None;
                        }
                        let df = *doc_freq.get(term.as_str())? as f32;
                        let idf = (1.0 + (doc_count - df + 0.5) / (df + 0.5)).ln();
                        let norm = BM25_K1 * (1.0 - BM25_B + BM25_B * len / avg_len.max(1.0));
                        Some(idf * tf * (BM25_K1 + 1.0) / (tf + norm))
                    })
                    .sum();
                (score > 0.0).then(|| KeywordHit {
                    statement: (*statement).clone(),
                    score,
                    provenance_count: data
                        .citations
                        .get(&statement.id)
                        .map(|episodes| episodes.len())
                        .unwrap_or(0),
                })
            })
            .collect();

        hits.sort_by(|a, b| {
            b.score
                .total_cmp(&a.score)
                .then_with(|| a.statement.id.cmp(&b.statement.id))
        });
        hits.truncate(limit);
        Ok(hits)
    }

    async fn vector_search(
        &self,
        embedding: &[f32],
        filter: &StatementFilter,
        min_similarity: f32,
        limit: usize,
    ) -> Result<Vec<ScoredStatement>> {
        let data = self.data.read().await;
        let mut hits: Vec<ScoredStatement> = data
            .statements
            .values()
            .filter(|s| filter.admits_statement(s))
            .filter_map(|statement| {
                let similarity = cosine_similarity(embedding, &statement.fact_embedding);
                (similarity >= min_similarity).then(|| ScoredStatement {
                    statement: statement.clone(),
                    similarity,
                })
            })
            .collect();
        hits.sort_by(|a, b| {
            b.similarity
                .total_cmp(&a.similarity)
                .then_with(|| a.statement.id.cmp(&b.statement.id))
        });
        hits.truncate(limit);
        Ok(hits)
    }

    async fn statements_for_entities(
        &self,
        entity_ids: &[String],
        filter: &StatementFilter,
        limit: usize,
    ) -> Result<Vec<Statement>> {
        let wanted: HashSet<String> = entity_ids.iter().cloned().collect();
        let data = self.data.read().await;
        let mut statements: Vec<Statement> = data
            .statements
            .values()
            .filter(|s| filter.admits_statement(s) && s.touches(&wanted))
            .cloned()
            .collect();
        statements.sort_by(|a, b| b.valid_at.cmp(&a.valid_at).then_with(|| a.id.cmp(&b.id)));
        statements.truncate(limit);
        Ok(statements)
    }

    async fn entities_for_statements(
        &self,
        statement_ids: &[String],
        owner_id: &str,
    ) -> Result<Vec<String>> {
        let data = self.data.read().await;
        let ids: BTreeSet<String> = statement_ids
            .iter()
            .filter_map(|id| data.statements.get(id))
            .filter(|s| s.owner_id == owner_id)
            .flat_map(|s| [s.subject_id.clone(), s.object_id.clone()])
            .collect();
        Ok(ids.into_iter().collect())
    }

    /// One link per (statement, citing episode) pair, in input statement order
    async fn episodes_for_statements(
        &self,
        statement_ids: &[String],
        filter: &StatementFilter,
    ) -> Result<Vec<ProvenanceLink>> {
        let data = self.data.read().await;
        let mut links = Vec::new();
        for statement_id in statement_ids {
            let owned = data
                .statements
                .get(statement_id)
                .is_some_and(|s| s.owner_id == filter.owner_id);
            if !owned {
                continue;
            }
            let Some(episode_ids) = data.citations.get(statement_id) else {
                continue;
            };
            for episode in episode_ids.iter().filter_map(|id| data.episodes.get(id)) {
                if filter.admits_episode(episode) {
                    links.push(ProvenanceLink {
                        statement_id: statement_id.clone(),
                        episode: episode.clone(),
                    });
                }
            }
        }
        Ok(links)
    }

    async fn statements_for_episodes(
        &self,
        episode_ids: &[String],
        filter: &StatementFilter,
    ) -> Result<Vec<EpisodeStatement>> {
        let data = self.data.read().await;
        let mut rows = Vec::new();
        for episode_id in episode_ids {
            let owned = data
                .episodes
                .get(episode_id)
                .is_some_and(|e| e.owner_id == filter.owner_id);
            if !owned {
                continue;
            }
            let Some(statement_ids) = data.provenance.get(episode_id) else {
                continue;
            };
            for statement in statement_ids.iter().filter_map(|id| data.statements.get(id)) {
                if filter.admits_statement(statement) {
                    rows.push(EpisodeStatement {
                        episode_id: episode_id.clone(),
                        statement: statement.clone(),
                    });
                }
            }
        }
        Ok(rows)
    }

    async fn compacted_sessions(
        &self,
        session_ids: &[String],
        owner_id: &str,
    ) -> Result<Vec<CompactedSession>> {
        let data = self.data.read().await;
        Ok(session_ids
            .iter()
            .filter_map(|session_id| {
                data.compacted
                    .get(&(owner_id.to_string(), session_id.clone()))
                    .cloned()
            })
            .collect())
    }

    async fn stats(&self, owner_id: &str) -> Result<GraphStats> {
        let data = self.data.read().await;
        Ok(GraphStats {
            entities: data.entities.values().filter(|e| e.owner_id == owner_id).count() as u64,
            statements: data.statements.values().filter(|s| s.owner_id == owner_id).count() as u64,
            episodes: data.episodes.values().filter(|e| e.owner_id == owner_id).count() as u64,
            compacted_sessions: data.compacted.keys().filter(|(owner, _)| owner == owner_id).count()
                as u64,
        })
    }
}
