//! Recall audit trail
//!
//! Every search emits one [`RecallAuditEntry`]. Delivery is best-effort: the
//! service hands the entry to a sink on a detached task and a failing sink
//! never affects the search result.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use crate::error::Result;

use super::strategy::StrategyCounts;

/// One audited search
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecallAuditEntry {
    pub id: Uuid,
    pub owner_id: String,
    pub query: String,
    pub source: String,
    pub episode_graph_hits: usize,
    pub traversal_hits: usize,
    pub vector_hits: usize,
    pub keyword_hits: usize,
    pub result_count: usize,
    pub confidence: f32,
    pub latency_ms: u64,
    pub created_at: DateTime<Utc>,
}

impl RecallAuditEntry {
    pub fn new(
        owner_id: impl Into<String>,
        query: impl Into<String>,
        source: impl Into<String>,
        counts: StrategyCounts,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            owner_id: owner_id.into(),
            query: query.into(),
            source: source.into(),
            episode_graph_hits: counts.episode_graph,
            traversal_hits: counts.traversal,
            vector_hits: counts.vector,
            keyword_hits: counts.keyword,
            result_count: 0,
            confidence: 0.0,
            latency_ms: 0,
            created_at: Utc::now(),
        }
    }

    pub fn with_outcome(mut self, result_count: usize, confidence: f32, latency_ms: u64) -> Self {
        self.result_count = result_count;
        self.confidence = confidence;
        self.latency_ms = latency_ms;
        self
    }
}

/// Destination for audit entries
#[async_trait]
pub trait RecallAuditSink: Send + Sync {
    async fn record(&self, entry: &RecallAuditEntry) -> Result<()>;
}

/// Emits audit entries as structured log events
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingAuditSink;

#[async_trait]
impl RecallAuditSink for TracingAuditSink {
    async fn record(&self, entry: &RecallAuditEntry) -> Result<()> {
        info!(
            target: "recall::audit",
            id = %entry.id,
            owner_id = %entry.owner_id,
            source = %entry.source,
            query = %entry.query,
            episode_graph = entry.episode_graph_hits,
            traversal = entry.traversal_hits,
            vector = entry.vector_hits,
            keyword = entry.keyword_hits,
            results = entry.result_count,
            confidence = entry.confidence,
            latency_ms = entry.latency_ms,
            "Recall audited"
        );
        Ok(())
    }
}

/// Keeps entries in memory
#[derive(Debug, Default)]
pub struct InMemoryAuditSink {
    entries: tokio::sync::Mutex<Vec<RecallAuditEntry>>,
}

impl InMemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn entries(&self) -> Vec<RecallAuditEntry> {
        self.entries.lock().await.clone()
    }
}

#[async_trait]
impl RecallAuditSink for InMemoryAuditSink {
    async fn record(&self, entry: &RecallAuditEntry) -> Result<()> {
        self.entries.lock().await.push(entry.clone());
        Ok(())
    }
}
