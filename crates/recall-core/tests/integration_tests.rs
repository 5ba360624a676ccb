//! Recall Core Integration Tests
//!
//! Fixture: alice's graph about a Postgres migration. Query embeddings are
//! fixed so every strategy's contribution is predictable.
//!
//! | episode | day | cites                              | session |
//! |---------|-----|------------------------------------|---------|
//! | e1      | 2   | s1 planned the Postgres migration  | chat-1  |
//! | e2      | 4   | s2 migration finished on Friday    | chat-1  |
//! | e3      | 5   | s3 hiking (unrelated)              |         |
//! | e4      | 2   | s4 MySQL migration, invalid day 3  |         |

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use recall_core::{
    Error, Result,
    config::{SearchConfig, ValidatorConfig},
    domain::recall::{
        CompactedSession, EmptyReason, Entity, EntityMatch, Episode, EpisodeStatement, GraphStats,
        InMemoryAuditSink, KeywordHit, ProvenanceLink, RecallGraph, RecallOutput, RecallService,
        RelevanceValidator, ScoredStatement, SearchOptions, SearchResponse, SortBy, Statement,
        StatementFilter, Strategy, ValidationStatus,
    },
    embedding::{Embedder, HashEmbedder},
    infrastructure::graph::{
        GraphSnapshot, InMemoryRecallGraph, SnapshotEpisode, SnapshotLoader, SqliteRecallGraph,
    },
    llm::CompletionProvider,
    storage::Database,
};
use tokio_util::sync::CancellationToken;

const QUERY: &str = "postgres migration";

fn day(d: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, d, 9, 0, 0).unwrap()
}

/// Maps known text to fixed vectors, everything else to zero
struct FixtureEmbedder {
    table: HashMap<String, Vec<f32>>,
}

impl FixtureEmbedder {
    fn new() -> Self {
        Self::with(&[(QUERY, vec![1.0, 0.0, 0.0, 0.0]), ("postgres", vec![0.0, 0.0, 1.0, 0.0])])
    }

    fn with(entries: &[(&str, Vec<f32>)]) -> Self {
        let table = entries
            .iter()
            .map(|(text, vector)| (text.to_string(), vector.clone()))
            .collect();
        Self { table }
    }
}

#[async_trait]
impl Embedder for FixtureEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        Ok(self
            .table
            .get(&text.to_lowercase())
            .cloned()
            .unwrap_or_else(|| vec![0.0; 4]))
    }
}

fn snapshot_for(owner: &str, prefix: &str) -> GraphSnapshot {
    let id = |name: &str| format!("{}{}", prefix, name);
    let episode = |name: &str, content: &str, d: u32, cites: &[&str]| SnapshotEpisode {
        episode: Episode::new(id(name), content, owner, day(d)),
        statement_ids: cites.iter().map(|&s| id(s)).collect(),
    };

    let mut e1 = episode("e1", "We planned the Postgres migration for next week.", 2, &["s1"]);
    e1.episode = e1.episode.with_session("chat-1");
    let mut e2 = episode("e2", "The Postgres migration is done, it finished Friday.", 4, &["s2"]);
    e2.episode = e2.episode.with_session("chat-1");

    GraphSnapshot {
        entities: vec![
            Entity::new(id("pg"), "Postgres", owner).with_embedding(vec![0.0, 0.0, 1.0, 0.0]),
            Entity::new(id("alice"), "Alice", owner).with_embedding(vec![0.0, 0.0, 0.0, 1.0]),
        ],
        statements: vec![
            Statement::new(id("s1"), "Alice planned the Postgres migration", id("alice"), "planned", id("pg"), owner, day(1))
                .with_embedding(vec![1.0, 0.0, 0.0, 0.0]),
            Statement::new(id("s2"), "The Postgres migration finished on Friday", id("pg"), "finished_on", id("friday"), owner, day(1))
                .with_embedding(vec![0.9, 0.4359, 0.0, 0.0]),
            Statement::new(id("s3"), "Alice enjoys hiking in the mountains near the lake on summer weekends", id("alice"), "enjoys", id("hiking"), owner, day(1))
                .with_embedding(vec![0.0, 1.0, 0.0, 0.0]),
            Statement::new(id("s4"), "The old MySQL migration was abandoned", id("alice"), "abandoned", id("mysql"), owner, day(1))
                .with_embedding(vec![0.8, 0.6, 0.0, 0.0])
                .invalidated_at(day(3)),
        ],
        episodes: vec![
            e1,
            e2,
            episode("e3", "Weekend hiking plans.", 5, &["s3"]),
            episode("e4", "We gave up on the MySQL migration.", 2, &["s4"]),
        ],
        compacted_sessions: Vec::new(),
    }
}

async fn memory_graph() -> Arc<InMemoryRecallGraph> {
    let graph = Arc::new(InMemoryRecallGraph::new());
    graph.load_snapshot(&snapshot_for("alice", "")).await.unwrap();
    graph.load_snapshot(&snapshot_for("bob", "bob-")).await.unwrap();
    graph
}

async fn service() -> RecallService {
    RecallService::new(memory_graph().await, Arc::new(FixtureEmbedder::new()))
}

fn ids(response: &SearchResponse) -> Vec<&str> {
    response.episodes.iter().map(|e| e.id.as_str()).collect()
}

fn options() -> SearchOptions {
    SearchOptions::default().without_validation()
}

// ========== Pipeline ==========

#[tokio::test]
async fn test_structural_evidence_ranks_first() {
    let service = service().await;
    let response = service.search(QUERY, "alice", &options()).await.unwrap();

    assert_eq!(ids(&response), vec!["e1", "e2", "e4"]);
    assert!(response.episodes[0].sub_scores.episode_graph > 0.0);
    assert!(response.episodes[0].sub_scores.bfs > 0.0);
    assert_eq!(response.episodes[2].sub_scores.episode_graph, 0.0);
    assert_eq!(response.diagnostics.dominant_source, Some(Strategy::EpisodeGraph));
    assert!(response.confidence > 0.7);
    assert_eq!(response.diagnostics.validation, ValidationStatus::Skipped);
    assert!(response.diagnostics.empty_reason.is_none());
}

#[tokio::test]
async fn test_all_strategies_contribute() {
    let service = service().await;
    let response = service.search(QUERY, "alice", &options()).await.unwrap();
    let counts = response.diagnostics.strategy_counts;

    assert_eq!(response.diagnostics.resolved_entities, 1);
    assert_eq!(counts.episode_graph, 2);
    assert_eq!(counts.vector, 3);
    assert!(counts.traversal >= 2);
    assert!(counts.keyword >= 3);
}

#[tokio::test]
async fn test_search_is_deterministic() {
    let service = service().await;
    let first = service.search(QUERY, "alice", &options()).await.unwrap();
    let second = service.search(QUERY, "alice", &options()).await.unwrap();

    assert_eq!(ids(&first), ids(&second));
    let scores = |r: &SearchResponse| r.episodes.iter().map(|e| e.score).collect::<Vec<_>>();
    assert_eq!(scores(&first), scores(&second));
    assert_eq!(first.facts, second.facts);
}

#[tokio::test]
async fn test_results_are_deduplicated() {
    let service = service().await;
    let response = service.search(QUERY, "alice", &options()).await.unwrap();

    let episode_ids: HashSet<&str> = ids(&response).into_iter().collect();
    assert_eq!(episode_ids.len(), response.episodes.len());

    let fact_ids: HashSet<&str> = response.facts.iter().map(|f| f.statement_id.as_str()).collect();
    assert_eq!(fact_ids.len(), response.facts.len());
    assert!(fact_ids.contains("s1"));
    assert!(!fact_ids.contains("s3"));
}

#[tokio::test]
async fn test_owner_isolation() {
    let service = service().await;

    let alice = service.search(QUERY, "alice", &options()).await.unwrap();
    assert!(alice.episodes.iter().all(|e| !e.id.starts_with("bob-")));
    assert!(alice.facts.iter().all(|f| !f.statement_id.starts_with("bob-")));

    let bob = service.search(QUERY, "bob", &options()).await.unwrap();
    assert_eq!(ids(&bob), vec!["bob-e1", "bob-e2", "bob-e4"]);

    let carol = service.search(QUERY, "carol", &options()).await.unwrap();
    assert!(carol.is_empty());
    assert_eq!(carol.diagnostics.empty_reason, Some(EmptyReason::Starved));
}

#[tokio::test]
async fn test_invalidated_statements_can_be_excluded() {
    let service = service().await;
    let mut opts = options();
    opts.include_invalidated = false;

    let response = service.search(QUERY, "alice", &opts).await.unwrap();
    assert_eq!(ids(&response), vec!["e1", "e2"]);
    assert!(response.facts.iter().all(|f| f.statement_id != "s4"));
}

#[tokio::test]
async fn test_nothing_is_known_before_the_facts_were_valid() {
    let service = service().await;
    let opts = options().with_valid_at(Utc.with_ymd_and_hms(2024, 2, 1, 0, 0, 0).unwrap());

    let response = service.search(QUERY, "alice", &opts).await.unwrap();
    assert!(response.is_empty());
    assert_eq!(response.diagnostics.empty_reason, Some(EmptyReason::Starved));
}

#[tokio::test]
async fn test_space_scope() {
    let service = service().await;
    let mut opts = options();
    opts.space_ids = vec!["work".to_string()];

    let response = service.search(QUERY, "alice", &opts).await.unwrap();
    assert!(response.is_empty());
}

#[tokio::test]
async fn test_unmatched_query_starves() {
    let service = service().await;
    let response = service
        .search("quantum chromodynamics", "alice", &options())
        .await
        .unwrap();

    assert!(response.is_empty());
    assert_eq!(response.diagnostics.candidates, 0);
    assert_eq!(response.diagnostics.empty_reason, Some(EmptyReason::Starved));
    assert_eq!(
        response.to_digest(),
        "No relevant context found."
    );
}

#[tokio::test]
async fn test_empty_query_is_rejected() {
    let service = service().await;
    let result = service.search("   ", "alice", &options()).await;
    assert!(matches!(result, Err(Error::InvalidInput(_))));

    let result = service.search(QUERY, "", &options()).await;
    assert!(matches!(result, Err(Error::InvalidInput(_))));
}

// ========== Quality filter ==========

#[tokio::test]
async fn test_raising_threshold_never_adds_results() {
    let service = service().await;
    let mut previous: Option<Vec<String>> = None;

    for threshold in [1.0, 5.0, 20.0, 32.5, 100.0] {
        let opts = options().with_quality_threshold(threshold);
        let response = service.search(QUERY, "alice", &opts).await.unwrap();
        let current: Vec<String> = response.episodes.iter().map(|e| e.id.clone()).collect();

        if let Some(previous) = &previous {
            assert!(current.len() <= previous.len(), "threshold {} added results", threshold);
            assert_eq!(&previous[..current.len()], &current[..]);
        }
        previous = Some(current);
    }

    let strict = service
        .search(QUERY, "alice", &options().with_quality_threshold(100.0))
        .await
        .unwrap();
    assert!(strict.is_empty());
    assert_eq!(strict.diagnostics.empty_reason, Some(EmptyReason::BelowThreshold));
}

#[tokio::test]
async fn test_low_confidence_fails_closed() {
    let graph = memory_graph().await;
    let mut config = SearchConfig::default();
    config.quality.max_expected.episode_graph = 1000.0;
    let service = RecallService::new(graph, Arc::new(FixtureEmbedder::new())).with_config(config);

    let response = service.search(QUERY, "alice", &options()).await.unwrap();
    assert!(response.is_empty());
    assert!(response.diagnostics.candidates > 0);
    assert!(response.confidence < 0.3);
    assert_eq!(response.diagnostics.empty_reason, Some(EmptyReason::LowConfidence));
}

#[tokio::test]
async fn test_weak_keyword_evidence_is_not_returned() {
    let service = service().await;
    let response = service.search("hiking", "alice", &options()).await.unwrap();

    assert_eq!(response.diagnostics.candidates, 1);
    assert!(response.is_empty());
}

#[tokio::test]
async fn test_limit_and_recency_sort() {
    let service = service().await;

    let top = service
        .search(QUERY, "alice", &options().with_limit(1))
        .await
        .unwrap();
    assert_eq!(ids(&top), vec!["e1"]);

    let mut opts = options();
    opts.sort_by = SortBy::Recency;
    let recent = service.search(QUERY, "alice", &opts).await.unwrap();
    assert_eq!(ids(&recent), vec!["e2", "e1", "e4"]);
}

// ========== Ranking scenarios ==========

const MIGRATION_QUERY: &str = "database migration";

fn migration_embedder() -> Arc<FixtureEmbedder> {
    Arc::new(FixtureEmbedder::with(&[
        (MIGRATION_QUERY, vec![1.0, 0.0, 0.0, 0.0]),
        ("database", vec![0.0, 0.0, 1.0, 0.0]),
    ]))
}

async fn insert_statements(graph: &InMemoryRecallGraph, owner: &str, rows: &[(&str, &str, &str, &str, [f32; 4])]) {
    for (id, fact, subject, object, embedding) in rows {
        let statement = Statement::new(*id, *fact, *subject, "relates_to", *object, owner, day(1))
            .with_embedding(embedding.to_vec());
        graph.insert_statement(statement).await.unwrap();
    }
}

#[tokio::test]
async fn test_traversal_evidence_outranks_stronger_vector_match() {
    let graph = InMemoryRecallGraph::new();
    graph
        .insert_entity(Entity::new("db", "Database", "alice").with_embedding(vec![0.0, 0.0, 1.0, 0.0]))
        .await;
    insert_statements(
        &graph,
        "alice",
        &[
            ("s-linked", "The primary cluster runs on three nodes", "db", "nodes", [0.55, 0.835, 0.0, 0.0]),
            ("s-note", "Ops keeps a runbook for failover", "ops", "runbook", [0.0, 1.0, 0.0, 0.0]),
            ("s-similar", "The team copied every table to the new host", "team", "host", [0.6, 0.8, 0.0, 0.0]),
        ],
    )
    .await;
    graph
        .insert_episode(
            Episode::new("ep-linked", "Cluster notes", "alice", day(2)),
            &["s-linked".to_string(), "s-note".to_string()],
        )
        .await
        .unwrap();
    graph
        .insert_episode(
            Episode::new("ep-similar", "Copy log", "alice", day(2)),
            &["s-similar".to_string()],
        )
        .await
        .unwrap();

    let mut config = SearchConfig::default();
    config.quality.min_confidence = 0.0;
    let service = RecallService::new(Arc::new(graph), migration_embedder()).with_config(config);
    let opts = options().with_quality_threshold(1.0);

    let response = service.search(MIGRATION_QUERY, "alice", &opts).await.unwrap();
    assert_eq!(ids(&response), vec!["ep-linked", "ep-similar"]);
    assert_eq!(response.diagnostics.strategy_counts.traversal, 1);

    let linked = &response.episodes[0].sub_scores;
    let similar = &response.episodes[1].sub_scores;
    assert_eq!(linked.episode_graph, 0.0);
    // first-hop traversal is weighted by 2.0 before the 3.0 strategy weight
    assert!((linked.bfs - linked.vector * 2.0).abs() < 1e-4);
    assert!(linked.vector < similar.vector);
    assert!(linked.bfs * 3.0 > similar.vector * 1.5);
}

#[tokio::test]
async fn test_concentration_breaks_vector_tie_end_to_end() {
    let graph = InMemoryRecallGraph::new();
    let tied = [0.7, 0.71414, 0.0, 0.0];
    insert_statements(
        &graph,
        "dana",
        &[
            ("d1", "The team copied the orders table", "team", "orders", tied),
            ("d2", "The team copied the users table", "team", "users", tied),
            ("d3", "The team copied the invoices table", "team", "invoices", tied),
            ("d4", "The team copied the audit table", "team", "audit", tied),
        ],
    )
    .await;
    graph
        .insert_episode(
            Episode::new("ep-dense", "Bulk copy", "dana", day(2)),
            &["d1".to_string(), "d2".to_string(), "d3".to_string()],
        )
        .await
        .unwrap();
    graph
        .insert_episode(Episode::new("ep-sparse", "Single copy", "dana", day(6)), &["d4".to_string()])
        .await
        .unwrap();

    let service = RecallService::new(Arc::new(graph), migration_embedder());
    let response = service.search(MIGRATION_QUERY, "dana", &options()).await.unwrap();

    assert_eq!(ids(&response), vec!["ep-dense", "ep-sparse"]);
    let (dense, sparse) = (&response.episodes[0], &response.episodes[1]);
    assert!((dense.sub_scores.vector - sparse.sub_scores.vector).abs() < 1e-6);
    assert!(dense.score > sparse.score);
}

// ========== Failure handling ==========

/// Delegates to an in-memory graph, failing selected calls
struct FlakyGraph {
    inner: Arc<InMemoryRecallGraph>,
    fail_keyword: bool,
    fail_provenance: bool,
}

fn unavailable() -> Error {
    Error::GraphQuery("backend unavailable".to_string())
}

#[async_trait]
impl RecallGraph for FlakyGraph {
    async fn find_entities_by_embedding(
        &self,
        owner_id: &str,
        embedding: &[f32],
        min_similarity: f32,
        limit: usize,
    ) -> Result<Vec<EntityMatch>> {
        self.inner
            .find_entities_by_embedding(owner_id, embedding, min_similarity, limit)
            .await
    }

    async fn keyword_search(
        &self,
        query: &str,
        filter: &StatementFilter,
        limit: usize,
    ) -> Result<Vec<KeywordHit>> {
        if self.fail_keyword {
            return Err(unavailable());
        }
        self.inner.keyword_search(query, filter, limit).await
    }

    async fn vector_search(
        &self,
        embedding: &[f32],
        filter: &StatementFilter,
        min_similarity: f32,
        limit: usize,
    ) -> Result<Vec<ScoredStatement>> {
        self.inner.vector_search(embedding, filter, min_similarity, limit).await
    }

    async fn statements_for_entities(
        &self,
        entity_ids: &[String],
        filter: &StatementFilter,
        limit: usize,
    ) -> Result<Vec<Statement>> {
        self.inner.statements_for_entities(entity_ids, filter, limit).await
    }

    async fn entities_for_statements(
        &self,
        statement_ids: &[String],
        owner_id: &str,
    ) -> Result<Vec<String>> {
        self.inner.entities_for_statements(statement_ids, owner_id).await
    }

    async fn episodes_for_statements(
        &self,
        statement_ids: &[String],
        filter: &StatementFilter,
    ) -> Result<Vec<ProvenanceLink>> {
        if self.fail_provenance {
            return Err(unavailable());
        }
        self.inner.episodes_for_statements(statement_ids, filter).await
    }

    async fn statements_for_episodes(
        &self,
        episode_ids: &[String],
        filter: &StatementFilter,
    ) -> Result<Vec<EpisodeStatement>> {
        self.inner.statements_for_episodes(episode_ids, filter).await
    }

    async fn compacted_sessions(
        &self,
        session_ids: &[String],
        owner_id: &str,
    ) -> Result<Vec<CompactedSession>> {
        self.inner.compacted_sessions(session_ids, owner_id).await
    }

    async fn stats(&self, owner_id: &str) -> Result<GraphStats> {
        self.inner.stats(owner_id).await
    }
}

#[tokio::test]
async fn test_failed_strategy_degrades_gracefully() {
    let graph = FlakyGraph {
        inner: memory_graph().await,
        fail_keyword: true,
        fail_provenance: false,
    };
    let service = RecallService::new(Arc::new(graph), Arc::new(FixtureEmbedder::new()));

    let response = service.search(QUERY, "alice", &options()).await.unwrap();
    assert_eq!(response.diagnostics.strategy_counts.keyword, 0);
    assert_eq!(response.diagnostics.failed_strategies, vec![Strategy::Keyword]);
    assert!(!response.diagnostics.entity_resolution_failed);
    assert!(response.diagnostics.is_degraded());
    assert_eq!(response.episodes[0].id, "e1");
    assert_eq!(response.episodes[0].sub_scores.bm25, 0.0);
}

#[tokio::test]
async fn test_healthy_search_is_not_degraded() {
    let service = service().await;
    let response = service.search("hiking trip", "carol", &options()).await.unwrap();
    assert!(response.is_empty());
    assert!(!response.diagnostics.is_degraded());
}

/// Every call fails as if the store were unreachable
struct DownGraph;

#[async_trait]
impl RecallGraph for DownGraph {
    async fn find_entities_by_embedding(
        &self,
        _owner_id: &str,
        _embedding: &[f32],
        _min_similarity: f32,
        _limit: usize,
    ) -> Result<Vec<EntityMatch>> {
        Err(unavailable())
    }

    async fn keyword_search(
        &self,
        _query: &str,
        _filter: &StatementFilter,
        _limit: usize,
    ) -> Result<Vec<KeywordHit>> {
        Err(unavailable())
    }

    async fn vector_search(
        &self,
        _embedding: &[f32],
        _filter: &StatementFilter,
        _min_similarity: f32,
        _limit: usize,
    ) -> Result<Vec<ScoredStatement>> {
        Err(unavailable())
    }

    async fn statements_for_entities(
        &self,
        _entity_ids: &[String],
        _filter: &StatementFilter,
        _limit: usize,
    ) -> Result<Vec<Statement>> {
        Err(unavailable())
    }

    async fn entities_for_statements(
        &self,
        _statement_ids: &[String],
        _owner_id: &str,
    ) -> Result<Vec<String>> {
        Err(unavailable())
    }

    async fn episodes_for_statements(
        &self,
        _statement_ids: &[String],
        _filter: &StatementFilter,
    ) -> Result<Vec<ProvenanceLink>> {
        Err(unavailable())
    }

    async fn statements_for_episodes(
        &self,
        _episode_ids: &[String],
        _filter: &StatementFilter,
    ) -> Result<Vec<EpisodeStatement>> {
        Err(unavailable())
    }

    async fn compacted_sessions(
        &self,
        _session_ids: &[String],
        _owner_id: &str,
    ) -> Result<Vec<CompactedSession>> {
        Err(unavailable())
    }

    async fn stats(&self, _owner_id: &str) -> Result<GraphStats> {
        Err(unavailable())
    }
}

#[tokio::test]
async fn test_unreachable_graph_fails_the_search() {
    let service = RecallService::new(Arc::new(DownGraph), Arc::new(FixtureEmbedder::new()));
    let result = service.search(QUERY, "alice", &options()).await;
    assert!(matches!(result, Err(Error::GraphQuery(_))));

    let service = RecallService::new(Arc::new(DownGraph), Arc::new(HashEmbedder::new(64)));
    let result = service.search("anything at all", "alice", &SearchOptions::default()).await;
    assert!(result.is_err());
}

#[tokio::test]
async fn test_provenance_failure_fails_the_search() {
    let graph = FlakyGraph {
        inner: memory_graph().await,
        fail_keyword: false,
        fail_provenance: true,
    };
    let service = RecallService::new(Arc::new(graph), Arc::new(FixtureEmbedder::new()));

    let result = service.search(QUERY, "alice", &options()).await;
    assert!(matches!(result, Err(Error::GraphQuery(_))));
}

struct BrokenEmbedder;

#[async_trait]
impl Embedder for BrokenEmbedder {
    async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
        Err(Error::EmbeddingFailed("model offline".to_string()))
    }
}

#[tokio::test]
async fn test_query_embedding_failure_is_an_error() {
    let service = RecallService::new(memory_graph().await, Arc::new(BrokenEmbedder));
    let result = service.search(QUERY, "alice", &options()).await;
    assert!(matches!(result, Err(Error::EmbeddingFailed(_))));
}

#[tokio::test]
async fn test_cancelled_search() {
    let service = service().await;
    let token = CancellationToken::new();
    token.cancel();

    let result = service
        .search_cancellable(QUERY, "alice", &options(), token)
        .await;
    assert!(matches!(result, Err(Error::Cancelled)));

    let response = service
        .search_cancellable(QUERY, "alice", &options(), CancellationToken::new())
        .await
        .unwrap();
    assert!(!response.is_empty());
}

// ========== Validator ==========

/// Replies with a canned answer, or fails
struct ScriptedModel {
    reply: Option<String>,
}

#[async_trait]
impl CompletionProvider for ScriptedModel {
    async fn complete(&self, _system: &str, user: &str) -> Result<String> {
        assert!(user.contains(QUERY));
        self.reply
            .clone()
            .ok_or_else(|| Error::LLMError("connection refused".to_string()))
    }
}

async fn validated_service(reply: Option<&str>) -> RecallService {
    let mut config = SearchConfig::default();
    config.quality.validation_ceiling = 1.5;
    let model = Arc::new(ScriptedModel {
        reply: reply.map(str::to_string),
    });
    RecallService::new(memory_graph().await, Arc::new(FixtureEmbedder::new()))
        .with_config(config)
        .with_validator(RelevanceValidator::new(model, ValidatorConfig::default()))
}

#[tokio::test]
async fn test_validator_keeps_selected_episodes() {
    let service = validated_service(Some(r#"<output>{"relevant_indices": [1]}</output>"#)).await;
    let response = service.search(QUERY, "alice", &SearchOptions::default()).await.unwrap();

    assert_eq!(ids(&response), vec!["e2"]);
    assert_eq!(
        response.diagnostics.validation,
        ValidationStatus::Accepted { kept: 1, of: 3 }
    );
}

#[tokio::test]
async fn test_validator_can_reject_everything() {
    let service = validated_service(Some("<output>[]</output>")).await;
    let response = service.search(QUERY, "alice", &SearchOptions::default()).await.unwrap();

    assert!(response.is_empty());
    assert_eq!(response.diagnostics.validation, ValidationStatus::RejectedAll);
    assert_eq!(
        response.diagnostics.empty_reason,
        Some(EmptyReason::ValidatorRejected)
    );
}

#[tokio::test]
async fn test_validator_fails_open() {
    for reply in [Some("All of them look relevant to me."), None] {
        let service = validated_service(reply).await;
        let response = service.search(QUERY, "alice", &SearchOptions::default()).await.unwrap();

        assert_eq!(ids(&response), vec!["e1", "e2", "e4"]);
        assert!(matches!(
            response.diagnostics.validation,
            ValidationStatus::FailedOpen { .. }
        ));
    }
}

#[tokio::test]
async fn test_validator_is_skipped_when_disabled_or_confident() {
    let service = validated_service(Some("<output>[]</output>")).await;
    let response = service.search(QUERY, "alice", &options()).await.unwrap();
    assert_eq!(response.diagnostics.validation, ValidationStatus::Skipped);
    assert_eq!(response.episodes.len(), 3);

    let model = Arc::new(ScriptedModel {
        reply: Some("<output>[]</output>".to_string()),
    });
    let confident = RecallService::new(memory_graph().await, Arc::new(FixtureEmbedder::new()))
        .with_validator(RelevanceValidator::new(model, ValidatorConfig::default()));
    let response = confident
        .search(QUERY, "alice", &SearchOptions::default())
        .await
        .unwrap();
    assert_eq!(response.diagnostics.validation, ValidationStatus::Skipped);
    assert!(!response.is_empty());
}

// ========== Compaction, output, audit ==========

#[tokio::test]
async fn test_compacted_session_replaces_members() {
    let graph = memory_graph().await;
    graph
        .insert_compacted_session(CompactedSession {
            id: "chat-1-summary".to_string(),
            session_id: "chat-1".to_string(),
            owner_id: "alice".to_string(),
            summary: "Planned and finished the Postgres migration.".to_string(),
            episode_count: 2,
            start_time: day(2),
            end_time: day(4),
            space_ids: Vec::new(),
        })
        .await;
    let service = RecallService::new(graph, Arc::new(FixtureEmbedder::new()));

    let response = service.search(QUERY, "alice", &options()).await.unwrap();
    assert_eq!(ids(&response), vec!["chat-1-summary", "e4"]);

    let summary = &response.episodes[0];
    assert_eq!(summary.compacted_from, Some(2));
    assert_eq!(summary.content, "Planned and finished the Postgres migration.");
    let facts: HashSet<&str> = summary.facts.iter().map(|f| f.statement_id.as_str()).collect();
    assert!(facts.contains("s1") && facts.contains("s2"));

    assert!(response.to_digest().contains("session summary, 2 episodes"));
}

#[tokio::test]
async fn test_recall_renders_requested_shape() {
    let service = service().await;

    let digest = service.recall(QUERY, "alice", &options()).await.unwrap();
    let RecallOutput::Digest(text) = digest else {
        panic!("expected a digest");
    };
    assert!(text.starts_with("## Recalled context"));
    assert!(text.contains("## Key facts"));
    assert!(text.contains("- Alice planned the Postgres migration (since 2024-03-01)"));
    assert!(text.contains("(valid 2024-03-01 to 2024-03-03)"));

    let mut opts = options();
    opts.structured = true;
    let structured = service.recall(QUERY, "alice", &opts).await.unwrap();
    let RecallOutput::Structured(recall) = structured else {
        panic!("expected structured output");
    };
    assert_eq!(recall.episodes.len(), 3);
    assert!(!recall.facts.is_empty());

    let json = serde_json::to_value(&recall).unwrap();
    assert!(json["facts"][0]["relevantScore"].is_number());
}

#[tokio::test]
async fn test_audit_entry_is_recorded() {
    let sink = Arc::new(InMemoryAuditSink::new());
    let service = service().await.with_audit_sink(sink.clone());

    let response = service.search(QUERY, "alice", &options()).await.unwrap();

    let mut entries = sink.entries().await;
    for _ in 0..50 {
        if !entries.is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
        entries = sink.entries().await;
    }

    assert_eq!(entries.len(), 1);
    let entry = &entries[0];
    assert_eq!(entry.owner_id, "alice");
    assert_eq!(entry.query, QUERY);
    assert_eq!(entry.source, "search");
    assert_eq!(entry.result_count, response.episodes.len());
    assert_eq!(entry.episode_graph_hits, 2);
}

// ========== SQLite backend ==========

#[tokio::test]
async fn test_sqlite_backend_matches_memory_ranking() {
    let db = Database::in_memory().await.expect("Failed to create database");
    let graph = Arc::new(SqliteRecallGraph::new(db.pool().clone()));
    graph.load_snapshot(&snapshot_for("alice", "")).await.unwrap();
    graph.load_snapshot(&snapshot_for("bob", "bob-")).await.unwrap();

    let service = RecallService::new(graph.clone(), Arc::new(FixtureEmbedder::new()))
        .with_audit_sink(graph.clone());
    let response = service.search(QUERY, "alice", &options()).await.unwrap();

    let found = ids(&response);
    assert_eq!(&found[..2], &["e1", "e2"]);
    assert!(!found.contains(&"e3"));
    assert!(found.iter().all(|id| !id.starts_with("bob-")));

    let stats = graph.stats("alice").await.unwrap();
    assert_eq!(stats.statements, 4);
    assert_eq!(stats.episodes, 4);

    let mut logged = graph.recent_recalls("alice", 10).await.unwrap();
    for _ in 0..50 {
        if !logged.is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
        logged = graph.recent_recalls("alice", 10).await.unwrap();
    }
    assert_eq!(logged.len(), 1);
}
