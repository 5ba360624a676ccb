//! Search orchestration
//!
//! ```text
//! query ─┬─ embed ───────────────┐
//!        └─ resolve entities ────┤
//!                                ▼
//!     ┌──────────┬───────────┬──────────┬──────────────┐
//!     │ keyword  │  vector   │ traversal│ episode graph│   (concurrent)
//!     └──────────┴───────────┴──────────┴──────────────┘
//!                                ▼
//!        aggregate → score → quality filter → validate? → compact → format
//! ```
//!
//! A search is a pure function of query, owner, options and the graph
//! contents. The service holds no mutable state, so one instance can serve
//! concurrent searches.

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::SearchConfig;
use crate::embedding::Embedder;
use crate::error::{Error, Result};

use super::aggregate::{ProvenanceAggregator, hydrate_provenance};
use super::audit::{RecallAuditEntry, RecallAuditSink};
use super::compaction::substitute_compacted;
use super::format::{
    EmptyReason, RecallOutput, SearchDiagnostics, SearchResponse, collect_facts,
    recalled_episodes,
};
use super::options::{SearchOptions, SortBy};
use super::quality::QualityFilter;
use super::repository::RecallGraph;
use super::resolver::EntityResolver;
use super::scoring::HierarchicalScorer;
use super::strategy::{
    EpisodeGraphSearch, GuidedTraversal, KeywordSearch, QueryContext, Strategy, StrategyResults,
    VectorSearch, elapsed_ms,
};
use super::validator::{RelevanceValidator, ValidationStatus};

/// Hybrid recall over one knowledge graph
#[derive(Clone)]
pub struct RecallService {
    graph: Arc<dyn RecallGraph>,
    embedder: Arc<dyn Embedder>,
    validator: Option<RelevanceValidator>,
    audit: Option<Arc<dyn RecallAuditSink>>,
    config: SearchConfig,
}

impl RecallService {
    pub fn new(graph: Arc<dyn RecallGraph>, embedder: Arc<dyn Embedder>) -> Self {
        Self {
            graph,
            embedder,
            validator: None,
            audit: None,
            config: SearchConfig::default(),
        }
    }

    pub fn with_config(mut self, config: SearchConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_validator(mut self, validator: RelevanceValidator) -> Self {
        self.validator = Some(validator);
        self
    }

    pub fn with_audit_sink(mut self, sink: Arc<dyn RecallAuditSink>) -> Self {
        self.audit = Some(sink);
        self
    }

    pub fn config(&self) -> &SearchConfig {
        &self.config
    }

    /// Search and render the result as requested by `options.structured`
    pub async fn recall(
        &self,
        query: &str,
        owner_id: &str,
        options: &SearchOptions,
    ) -> Result<RecallOutput> {
        let response = self.search(query, owner_id, options).await?;
        Ok(response.render(options.structured))
    }

    /// Search, giving up with [`Error::Cancelled`] once `token` fires
    ///
    /// In-flight graph reads are dropped with the search future.
    pub async fn search_cancellable(
        &self,
        query: &str,
        owner_id: &str,
        options: &SearchOptions,
        token: CancellationToken,
    ) -> Result<SearchResponse> {
        tokio::select! {
            biased;
            _ = token.cancelled() => {
                debug!(owner_id = %owner_id, "Search cancelled");
                Err(Error::Cancelled)
            }
            result = self.search(query, owner_id, options) => result,
        }
    }

    /// Run the full retrieval pipeline
    ///
    /// Strategy failures degrade to empty contributions and are listed in the
    /// diagnostics. Failing to embed the query or to load provenance for found
    /// statements fails the call, as does an unreachable graph: nothing found
    /// while both entity lookup and vector search hit upstream outages.
    pub async fn search(
        &self,
        query: &str,
        owner_id: &str,
        options: &SearchOptions,
    ) -> Result<SearchResponse> {
        let started = Instant::now();
        let query = query.trim();
        if query.is_empty() {
            return Err(Error::InvalidInput("query must not be empty".to_string()));
        }
        if owner_id.trim().is_empty() {
            return Err(Error::InvalidInput("owner id must not be empty".to_string()));
        }
        options.validate()?;

        let filter = options.filter_for(owner_id, Utc::now());
        let resolver =
            EntityResolver::new(self.graph.as_ref(), self.embedder.as_ref(), &self.config.entity);
        let (embedding, resolved) =
            tokio::join!(self.embedder.embed(query), resolver.resolve(owner_id, query));
        let embedding = embedding?;
        let (entities, resolver_error) = match resolved {
            Ok(entities) => (entities, None),
            Err(e) => {
                warn!(owner_id = %owner_id, error = %e, "Entity resolution failed, continuing without entities");
                (Vec::new(), Some(e))
            }
        };

        let ctx = QueryContext {
            graph: self.graph.as_ref(),
            config: &self.config,
            query,
            embedding: &embedding,
            entities: &entities,
            filter: &filter,
            limit: options.limit,
            max_depth: options.max_bfs_depth,
        };
        let StrategyRun { results, failures } = self.run_strategies(&ctx).await;
        let counts = results.counts();
        let failed_strategies: Vec<Strategy> = failures.iter().map(|(strategy, _)| *strategy).collect();
        if let Some(e) = graph_outage(&results, resolver_error.as_ref(), failures) {
            warn!(owner_id = %owner_id, error = %e, "Graph unreachable, failing search");
            return Err(e);
        }

        let provenance = hydrate_provenance(self.graph.as_ref(), &results, &filter).await?;
        let candidates =
            ProvenanceAggregator::new(&self.config.scoring).aggregate(&results, &provenance);
        let candidate_count = candidates.len();

        let ranked = HierarchicalScorer::new(&self.config.scoring).rank(candidates);
        let outcome = QualityFilter::new(&self.config.quality, &self.config.scoring)
            .apply(ranked, options.quality_threshold);
        let report = outcome.report;

        let (kept, validation) = match &self.validator {
            Some(validator)
                if options.use_llm_validation
                    && !outcome.episodes.is_empty()
                    && report.confidence < self.config.quality.validation_ceiling =>
            {
                validator
                    .validate(query, outcome.episodes, options.max_episodes_for_llm)
                    .await
            }
            _ => (outcome.episodes, ValidationStatus::Skipped),
        };

        let mut finals = substitute_compacted(self.graph.as_ref(), owner_id, kept).await;
        if options.sort_by == SortBy::Recency {
            finals.sort_by(|a, b| {
                let (a, b) = (&a.ranked.candidate.episode, &b.ranked.candidate.episode);
                b.created_at.cmp(&a.created_at).then_with(|| a.id.cmp(&b.id))
            });
        }
        finals.truncate(options.limit);

        let episodes = recalled_episodes(&finals);
        let facts = collect_facts(&episodes);

        let empty_reason = if !episodes.is_empty() {
            None
        } else if candidate_count == 0 {
            Some(EmptyReason::Starved)
        } else if validation == ValidationStatus::RejectedAll {
            Some(EmptyReason::ValidatorRejected)
        } else if report.failed_closed {
            Some(EmptyReason::LowConfidence)
        } else {
            Some(EmptyReason::BelowThreshold)
        };

        let latency_ms = elapsed_ms(started);
        info!(
            owner_id = %owner_id,
            strategies = %counts,
            entities = entities.len(),
            candidates = candidate_count,
            results = episodes.len(),
            confidence = report.confidence,
            latency_ms,
            failed = failed_strategies.len(),
            "Recall search completed"
        );

        self.emit_audit(
            RecallAuditEntry::new(owner_id, query, options.source.clone(), counts).with_outcome(
                episodes.len(),
                report.confidence,
                latency_ms,
            ),
        );

        Ok(SearchResponse {
            episodes,
            facts,
            confidence: report.confidence,
            diagnostics: SearchDiagnostics {
                strategy_counts: counts,
                resolved_entities: entities.len(),
                candidates: candidate_count,
                tier: report.tier,
                threshold: report.threshold,
                dominant_source: report.dominant_source,
                confidence: report.confidence,
                validation,
                latency_ms,
                empty_reason,
                failed_strategies,
                entity_resolution_failed: resolver_error.is_some(),
            },
        })
    }

    async fn run_strategies(&self, ctx: &QueryContext<'_>) -> StrategyRun {
        let (keyword, vector, traversal, episode_graph) = tokio::join!(
            KeywordSearch::run(ctx),
            VectorSearch::run(ctx),
            GuidedTraversal::run(ctx),
            EpisodeGraphSearch::run(ctx),
        );

        let mut failures = Vec::new();
        let results = StrategyResults {
            keyword: recover(Strategy::Keyword, keyword, &mut failures),
            vector: recover(Strategy::Vector, vector, &mut failures),
            traversal: recover(Strategy::Traversal, traversal, &mut failures),
            episode_graph: recover(Strategy::EpisodeGraph, episode_graph, &mut failures),
        };
        StrategyRun { results, failures }
    }

    /// Hand the entry to the sink on a detached task
    ///
    /// Outside a Tokio runtime there is nothing to run the task on, so the
    /// entry is dropped with a warning.
    fn emit_audit(&self, entry: RecallAuditEntry) {
        let Some(sink) = self.audit.clone() else {
            return;
        };
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            warn!(audit_id = %entry.id, "No async runtime, skipping recall audit entry");
            return;
        };
        handle.spawn(async move {
            if let Err(e) = sink.record(&entry).await {
                warn!(error = %e, audit_id = %entry.id, "Failed to record recall audit entry");
            }
        });
    }
}

/// Strategy output plus the strategies that failed
struct StrategyRun {
    results: StrategyResults,
    failures: Vec<(Strategy, Error)>,
}

fn recover<T>(
    strategy: Strategy,
    result: Result<Vec<T>>,
    failures: &mut Vec<(Strategy, Error)>,
) -> Vec<T> {
    match result {
        Ok(hits) => hits,
        Err(e) => {
            warn!(strategy = %strategy, error = %e, "Retrieval strategy failed, continuing without it");
            failures.push((strategy, e));
            Vec::new()
        }
    }
}

/// The error to fail with when the graph itself is unreachable
///
/// Entity lookup and vector search always query the graph. Both failing with
/// upstream outages while nothing was found means the graph is down.
fn graph_outage(
    results: &StrategyResults,
    resolver_error: Option<&Error>,
    failures: Vec<(Strategy, Error)>,
) -> Option<Error> {
    if !results.is_empty() || !resolver_error.is_some_and(Error::is_upstream_outage) {
        return None;
    }
    if !failures.iter().all(|(_, e)| e.is_upstream_outage()) {
        return None;
    }
    failures
        .into_iter()
        .find_map(|(strategy, e)| (strategy == Strategy::Vector).then_some(e))
}
