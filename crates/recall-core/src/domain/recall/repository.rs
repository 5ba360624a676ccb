//! Typed query interface over the knowledge graph
//!
//! Backends map their native records into the domain structs at this boundary;
//! nothing above it sees untyped rows.

use async_trait::async_trait;
use serde::Serialize;

use crate::error::Result;

use super::entity::EntityMatch;
use super::episode::{CompactedSession, Episode};
use super::filter::StatementFilter;
use super::statement::{ScoredStatement, Statement};

/// A full-text hit on a statement's fact text
#[derive(Debug, Clone, PartialEq)]
pub struct KeywordHit {
    /// The matching statement
    pub statement: Statement,
    /// Raw index relevance, larger is better
    pub score: f32,
    /// Number of distinct episodes citing the statement
    pub provenance_count: usize,
}

/// A statement together with one episode that cites it
#[derive(Debug, Clone, PartialEq)]
pub struct ProvenanceLink {
    /// The cited statement
    pub statement_id: String,
    /// The citing episode
    pub episode: Episode,
}

/// A statement cited by an episode
#[derive(Debug, Clone, PartialEq)]
pub struct EpisodeStatement {
    /// The citing episode
    pub episode_id: String,
    /// The cited statement
    pub statement: Statement,
}

/// Per-owner record counts
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphStats {
    /// Entities owned
    pub entities: u64,
    pub statements: u64,
    pub episodes: u64,
    pub compacted_sessions: u64,
}

/// Read-only graph queries used by search
///
/// Every method is owner-scoped. Results are returned in a deterministic
/// order (score descending, then id ascending) so identical queries over
/// identical data rank identically.
#[async_trait]
pub trait RecallGraph: Send + Sync {
    /// Entities whose name embedding has cosine similarity >= `min_similarity`
    async fn find_entities_by_embedding(
        &self,
        owner_id: &str,
        embedding: &[f32],
        min_similarity: f32,
        limit: usize,
    ) -> Result<Vec<EntityMatch>>;

    /// Full-text search over fact text; `query` is already sanitized
    async fn keyword_search(
        &self,
        query: &str,
        filter: &StatementFilter,
        limit: usize,
    ) -> Result<Vec<KeywordHit>>;

    /// Statements whose fact embedding has cosine similarity >= `min_similarity`
    async fn vector_search(
        &self,
        embedding: &[f32],
        filter: &StatementFilter,
        min_similarity: f32,
        limit: usize,
    ) -> Result<Vec<ScoredStatement>>;

    /// Statements whose subject or object is one of `entity_ids`
    async fn statements_for_entities(
        &self,
        entity_ids: &[String],
        filter: &StatementFilter,
        limit: usize,
    ) -> Result<Vec<Statement>>;

    /// Distinct subject and object entity ids of the given statements
    async fn entities_for_statements(
        &self,
        statement_ids: &[String],
        owner_id: &str,
    ) -> Result<Vec<String>>;

    /// Episodes that cite any of the given statements
    async fn episodes_for_statements(
        &self,
        statement_ids: &[String],
        filter: &StatementFilter,
    ) -> Result<Vec<ProvenanceLink>>;

    /// Every eligible statement cited by the given episodes
    async fn statements_for_episodes(
        &self,
        episode_ids: &[String],
        filter: &StatementFilter,
    ) -> Result<Vec<EpisodeStatement>>;

    /// Compact records for the given sessions
    async fn compacted_sessions(
        &self,
        session_ids: &[String],
        owner_id: &str,
    ) -> Result<Vec<CompactedSession>>;

    /// Record counts for one owner
    async fn stats(&self, owner_id: &str) -> Result<GraphStats>;
}
