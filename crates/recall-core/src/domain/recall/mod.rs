//! Hybrid recall over a temporal knowledge graph
//!
//! Retrieves the facts and past episodes most relevant to a free-text query so
//! an agent can ground its answer in them.
//!
//! ## Pipeline
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────────┐
//! │  query → embedding + EntityResolver                            │
//! └────────────────────────────────────────────────────────────────┘
//!                               ↓
//! ┌────────────────────────────────────────────────────────────────┐
//! │  KeywordSearch | VectorSearch | GuidedTraversal |              │
//! │  EpisodeGraphSearch                  (run concurrently)        │
//! └────────────────────────────────────────────────────────────────┘
//!                               ↓
//! ┌────────────────────────────────────────────────────────────────┐
//! │  ProvenanceAggregator → HierarchicalScorer → QualityFilter     │
//! │  → RelevanceValidator (borderline only) → compaction → format  │
//! └────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Data Model
//!
//! - **Entity**: named thing referenced by statements
//! - **Statement**: bi-temporal subject-predicate-object fact
//! - **Episode**: captured raw context with provenance links to statements
//! - **CompactedSession**: summary standing in for one session's episodes
//!
//! ## Usage
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use recall_core::domain::recall::{RecallService, SearchOptions};
//! use recall_core::embedding::HashEmbedder;
//! use recall_core::infrastructure::graph::InMemoryRecallGraph;
//!
//! let graph = Arc::new(InMemoryRecallGraph::new());
//! let service = RecallService::new(graph, Arc::new(HashEmbedder::default()));
//!
//! let response = service
//!     .search("database migration", "alice", &SearchOptions::default())
//!     .await?;
//! println!("{}", response.to_digest());
//! ```

mod aggregate;
mod audit;
mod compaction;
mod entity;
mod episode;
mod filter;
mod format;
mod options;
mod quality;
mod repository;
mod resolver;
mod scoring;
mod service;
mod statement;
pub mod strategy;
mod validator;

pub use aggregate::{
    AttributedStatement, EpisodeCandidate, ProvenanceAggregator, SourceHit, SubScores,
    hydrate_provenance,
};
pub use audit::{InMemoryAuditSink, RecallAuditEntry, RecallAuditSink, TracingAuditSink};
pub use compaction::{RecallCandidate, fold_sessions, substitute_compacted};
pub use entity::{Entity, EntityMatch};
pub use episode::{CompactedSession, Episode};
pub use filter::StatementFilter;
pub use format::{
    EmptyReason, RecallOutput, RecalledEpisode, RecalledFact, SearchDiagnostics, SearchResponse,
    StructuredEpisode, StructuredFact, StructuredRecall, collect_facts, recalled_episodes,
    render_digest,
};
pub use options::{SearchOptions, SortBy};
pub use quality::{EvidenceTier, QualityFilter, QualityOutcome, QualityReport, gap_cutoff};
pub use repository::{EpisodeStatement, GraphStats, KeywordHit, ProvenanceLink, RecallGraph};
pub use resolver::{EntityResolver, query_chunks};
pub use scoring::{HierarchicalScorer, RankedEpisode};
pub use service::RecallService;
pub use statement::{ScoredStatement, Statement};
pub use strategy::{Strategy, StrategyCounts, StrategyResults};
pub use validator::{
    RelevanceValidator, ValidationOutcome, ValidationStatus, parse_validator_output,
};
