//! Retrieval strategies
//!
//! Four independent, read-only strategies share one query embedding and one
//! resolved entity list:
//!
//! | Strategy        | Signal                                   | Trust   |
//! |-----------------|------------------------------------------|---------|
//! | episode graph   | topical density of whole episodes        | highest |
//! | traversal       | bounded BFS from query entities          | high    |
//! | vector          | fact embedding cosine similarity         | medium  |
//! | keyword         | full-text index relevance                | lowest  |

mod episode_graph;
mod keyword;
mod traversal;
mod vector;

use std::time::Instant;

use serde::Serialize;

use crate::config::SearchConfig;

use super::entity::EntityMatch;
use super::filter::StatementFilter;
use super::repository::{KeywordHit, RecallGraph};
use super::statement::ScoredStatement;

pub use episode_graph::{EpisodeGraphHit, EpisodeGraphSearch};
pub use keyword::{KeywordSearch, sanitize_query};
pub use traversal::{GuidedTraversal, TraversalHit};
pub use vector::VectorSearch;

/// Milliseconds since `started`, saturating
pub fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}

/// Which strategy found a statement
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum Strategy {
    EpisodeGraph,
    Traversal,
    Vector,
    Keyword,
}

impl Strategy {
    pub fn name(&self) -> &'static str {
        match self {
            Self::EpisodeGraph => "episode_graph",
            Self::Traversal => "traversal",
            Self::Vector => "vector",
            Self::Keyword => "keyword",
        }
    }
}

impl std::fmt::Display for Strategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Everything a strategy needs to run one query
pub struct QueryContext<'a> {
    pub graph: &'a dyn RecallGraph,
    pub config: &'a SearchConfig,
    /// The raw query text
    pub query: &'a str,
    /// Query embedding shared by every strategy
    pub embedding: &'a [f32],
    /// Entities resolved from the query, empty when lookup failed
    pub entities: &'a [EntityMatch],
    pub filter: &'a StatementFilter,
    /// Per-strategy statement limit
    pub limit: usize,
    /// Traversal depth bound
    pub max_depth: usize,
}

impl QueryContext<'_> {
    pub fn entity_ids(&self) -> Vec<String> {
        self.entities.iter().map(|m| m.entity.id.clone()).collect()
    }
}

/// Raw output of the four strategies for one query
#[derive(Debug, Clone, Default)]
pub struct StrategyResults {
    pub keyword: Vec<KeywordHit>,
    pub vector: Vec<ScoredStatement>,
    pub traversal: Vec<TraversalHit>,
    pub episode_graph: Vec<EpisodeGraphHit>,
}

impl StrategyResults {
    pub fn counts(&self) -> StrategyCounts {
        StrategyCounts {
            keyword: self.keyword.len(),
            vector: self.vector.len(),
            traversal: self.traversal.len(),
            episode_graph: self.episode_graph.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.counts().total() == 0
    }
}

/// Hit counts per strategy
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StrategyCounts {
    pub keyword: usize,
    pub vector: usize,
    pub traversal: usize,
    pub episode_graph: usize,
}

impl StrategyCounts {
    pub fn total(&self) -> usize {
        self.keyword + self.vector + self.traversal + self.episode_graph
    }
}

impl std::fmt::Display for StrategyCounts {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "episode_graph={} traversal={} vector={} keyword={}",
            self.episode_graph, self.traversal, self.vector, self.keyword
        )
    }
}
