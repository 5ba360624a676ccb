//! Recall Core Library
//!
//! Hybrid retrieval over a temporal, provenance-tracked knowledge graph:
//! - Entity resolution and four concurrent search strategies
//! - Provenance aggregation into episode candidates
//! - Hierarchical scoring and adaptive quality filtering
//! - Optional LLM relevance validation
//! - Storage (SQLite + FTS5, or in memory)

pub mod config;
pub mod domain;
pub mod embedding;
pub mod error;
pub mod infrastructure;
pub mod llm;
pub mod storage;

pub use error::{Error, Result};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::Config;
    pub use crate::domain::recall::{
        RecallGraph, RecallService, SearchOptions, SearchResponse, Statement,
    };
    pub use crate::embedding::Embedder;
    pub use crate::error::{Error, Result};
    pub use crate::infrastructure::graph::{InMemoryRecallGraph, SqliteRecallGraph};
}
