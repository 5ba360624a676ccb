//! SQLite implementation of the RecallGraph
//!
//! Keyword search uses the FTS5 index over statement facts; vector similarity
//! is computed in process over the filtered candidate rows. Every query binds
//! the owner so no row of another owner can be returned.
//!
//! Scope parameters are numbered so one value can appear several times:
//!
//! | statement scope | `?1` owner, `?2` horizon, `?3` start, `?4` include invalidated, `?5` spaces |
//! | episode scope   | `?1` owner, `?2` end time, `?3` start, `?4` spaces                          |

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::{FromRow, SqlitePool};
use tracing::{debug, info};

use crate::domain::recall::{
    CompactedSession, Entity, EntityMatch, Episode, EpisodeStatement, GraphStats, KeywordHit,
    ProvenanceLink, RecallAuditEntry, RecallAuditSink, RecallGraph, ScoredStatement, Statement,
    StatementFilter,
};
use crate::embedding::cosine_similarity;
use crate::error::{Error, Result};

use super::snapshot::{GraphSnapshot, LoadSummary, SnapshotLoader};

/// Owner, temporal and space predicate over `statements s`
const STATEMENT_SCOPE: &str = r#"
    s.owner_id = ?1
    AND s.valid_at <= ?2
    AND (?3 IS NULL OR s.valid_at >= ?3)
    AND (?4 OR s.invalid_at IS NULL OR s.invalid_at > ?2)
    AND (json_array_length(?5) = 0 OR EXISTS (
        SELECT 1 FROM json_each(s.space_ids) sp
        WHERE sp.value IN (SELECT value FROM json_each(?5))
    ))
"#;
/// Positional parameters used by [`STATEMENT_SCOPE`]; query-specific ones follow
const STATEMENT_SCOPE_PARAMS: usize = 5;

/// Owner, creation-time and space predicate over `episodes e`
const EPISODE_SCOPE: &str = r#"
    e.owner_id = ?1
    AND e.created_at <= ?2
    AND (?3 IS NULL OR e.created_at >= ?3)
    AND (json_array_length(?4) = 0 OR EXISTS (
        SELECT 1 FROM json_each(e.space_ids) sp
        WHERE sp.value IN (SELECT value FROM json_each(?4))
    ))
"#;
/// Positional parameters used by [`EPISODE_SCOPE`]
const EPISODE_SCOPE_PARAMS: usize = 4;

/// SQLite-backed recall graph
///
/// Also the audit sink: searches append to `recall_logs` in the same file.
/// Cloning shares the pool.
#[derive(Clone)]
pub struct SqliteRecallGraph {
    pool: SqlitePool,
}

impl SqliteRecallGraph {
    /// Wrap a pool whose schema is already migrated
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Get the underlying connection pool
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Most recent audit entries for an owner
    pub async fn recent_recalls(&self, owner_id: &str, limit: usize) -> Result<Vec<RecallAuditEntry>> {
        let rows: Vec<RecallLogRow> = sqlx::query_as(
            "SELECT * FROM recall_logs WHERE owner_id = ?1 ORDER BY created_at DESC, id LIMIT ?2",
        )
        .bind(owner_id)
        .bind(sql_int(limit))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(|r| r.into_entry()).collect()
    }
}

/// Fixed-width UTC text, so string comparison in SQL orders by time
fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(value: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| Error::GraphQuery(format!("invalid timestamp '{}': {}", value, e)))
}

/// Integer bind saturating at `i64::MAX`
fn sql_int(value: impl TryInto<i64>) -> i64 {
    value.try_into().unwrap_or(i64::MAX)
}

/// `?first, ?first+1, ...` for an `IN` list of `count` values
fn placeholders(first: usize, count: usize) -> String {
    (first..first + count)
        .map(|n| format!("?{}", n))
        .collect::<Vec<_>>()
        .join(", ")
}

/// FTS5 query matching any of the sanitized words
fn fts_query(query: &str) -> String {
    query
        .split_whitespace()
        .map(|word| format!("\"{}\"", word.replace('"', "")))
        .collect::<Vec<_>>()
        .join(" OR ")
}

/// A filter rendered into the values the scope predicates bind
struct ScopeBinds {
    owner_id: String,
    /// Point in time statements must be valid at
    horizon: String,
    /// Latest episode creation time
    end_time: String,
    start_time: Option<String>,
    include_invalidated: bool,
    /// JSON array of space ids; empty means every space
    spaces: String,
}

impl ScopeBinds {
    fn new(filter: &StatementFilter) -> Result<Self> {
        Ok(Self {
            owner_id: filter.owner_id.clone(),
            horizon: timestamp(filter.horizon()),
            end_time: timestamp(filter.end_time),
            start_time: filter.start_time.map(timestamp),
            include_invalidated: filter.include_invalidated,
            spaces: serde_json::to_string(&filter.space_ids)?,
        })
    }
}

/// Bind `?1..?5` of [`STATEMENT_SCOPE`]
macro_rules! bind_statement_scope {
    ($query:expr, $binds:expr) => {
        $query
            .bind($binds.owner_id.clone())
            .bind($binds.horizon.clone())
            .bind($binds.start_time.clone())
            .bind($binds.include_invalidated)
            .bind($binds.spaces.clone())
    };
}

/// Bind `?1..?4` of [`EPISODE_SCOPE`]
macro_rules! bind_episode_scope {
    ($query:expr, $binds:expr) => {
        $query
            .bind($binds.owner_id.clone())
            .bind($binds.end_time.clone())
            .bind($binds.start_time.clone())
            .bind($binds.spaces.clone())
    };
}

#[async_trait]
impl RecallGraph for SqliteRecallGraph {
    /// Scans the owner's entities; names are few next to statements
    async fn find_entities_by_embedding(
        &self,
        owner_id: &str,
        embedding: &[f32],
        min_similarity: f32,
        limit: usize,
    ) -> Result<Vec<EntityMatch>> {
        let rows: Vec<EntityRow> = sqlx::query_as("SELECT * FROM entities WHERE owner_id = ?1")
            .bind(owner_id)
            .fetch_all(&self.pool)
            .await?;

        let mut matches = Vec::new();
        for row in rows {
            let entity = row.into_entity()?;
            let similarity = cosine_similarity(embedding, &entity.name_embedding);
            if similarity >= min_similarity {
                matches.push(EntityMatch { entity, similarity });
            }
        }
        matches.sort_by(|a, b| {
            b.similarity
                .total_cmp(&a.similarity)
                .then_with(|| a.entity.id.cmp(&b.entity.id))
        });
        matches.truncate(limit);
        Ok(matches)
    }

    /// FTS5 match ranked by negated `bm25()`, so larger scores are better
    async fn keyword_search(
        &self,
        query: &str,
        filter: &StatementFilter,
        limit: usize,
    ) -> Result<Vec<KeywordHit>> {
        let fts = fts_query(query);
        if fts.is_empty() {
            return Ok(Vec::new());
        }
        let binds = ScopeBinds::new(filter)?;

        let sql = format!(
            r#"
            SELECT s.*,
                   -bm25(statements_fts) AS score,
                   (SELECT COUNT(DISTINCT es.episode_id)
                    FROM episode_statements es
                    WHERE es.statement_id = s.id) AS provenance_count
            FROM statements_fts
            JOIN statements s ON s.rowid = statements_fts.rowid
            WHERE statements_fts MATCH ?6 AND {scope}
            ORDER BY score DESC, s.id ASC
            LIMIT ?7
            "#,
            scope = STATEMENT_SCOPE
        );

        let rows: Vec<KeywordRow> = bind_statement_scope!(sqlx::query_as(&sql), binds)
            .bind(fts)
            .bind(sql_int(limit))
            .fetch_all(&self.pool)
            .await?;

        rows.into_iter()
            .map(|row| {
                Ok(KeywordHit {
                    score: row.score as f32,
                    provenance_count: row.provenance_count.max(0) as usize,
                    statement: row.statement.into_statement()?,
                })
            })
            .collect()
    }

    async fn vector_search(
        &self,
        embedding: &[f32],
        filter: &StatementFilter,
        min_similarity: f32,
        limit: usize,
    ) -> Result<Vec<ScoredStatement>> {
        // similarity is computed here over every in-scope row
        let binds = ScopeBinds::new(filter)?;
        let sql = format!("SELECT s.* FROM statements s WHERE {}", STATEMENT_SCOPE);
        let rows: Vec<StatementRow> = bind_statement_scope!(sqlx::query_as(&sql), binds)
            .fetch_all(&self.pool)
            .await?;

        let mut hits = Vec::new();
        for row in rows {
            let statement = row.into_statement()?;
            let similarity = cosine_similarity(embedding, &statement.fact_embedding);
            if similarity >= min_similarity {
                hits.push(ScoredStatement {
                    statement,
                    similarity,
                });
            }
        }
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
        if entity_ids.is_empty() {
            return Ok(Vec::new());
        }
        let binds = ScopeBinds::new(filter)?;
        let first = STATEMENT_SCOPE_PARAMS + 1;
        let sql = format!(
            r#"
            SELECT DISTINCT s.* FROM statements s
            JOIN statement_entities se ON se.statement_id = s.id
            WHERE se.entity_id IN ({ids}) AND {scope}
            ORDER BY s.valid_at DESC, s.id ASC
            LIMIT ?{limit}
            "#,
            ids = placeholders(first, entity_ids.len()),
            scope = STATEMENT_SCOPE,
            limit = first + entity_ids.len()
        );

        let mut query = bind_statement_scope!(sqlx::query_as::<_, StatementRow>(&sql), binds);
        for id in entity_ids {
            query = query.bind(id.clone());
        }
        let rows = query.bind(sql_int(limit)).fetch_all(&self.pool).await?;

        rows.into_iter().map(|r| r.into_statement()).collect()
    }

    async fn entities_for_statements(
        &self,
        statement_ids: &[String],
        owner_id: &str,
    ) -> Result<Vec<String>> {
        if statement_ids.is_empty() {
            return Ok(Vec::new());
        }
        let sql = format!(
            r#"
            SELECT DISTINCT se.entity_id FROM statement_entities se
            JOIN statements s ON s.id = se.statement_id
            WHERE s.owner_id = ?1 AND se.statement_id IN ({})
            ORDER BY se.entity_id
            "#,
            placeholders(2, statement_ids.len())
        );

        let mut query = sqlx::query_as::<_, (String,)>(&sql).bind(owner_id.to_string());
        for id in statement_ids {
            query = query.bind(id.clone());
        }
        let rows = query.fetch_all(&self.pool).await?;
        Ok(rows.into_iter().map(|(id,)| id).collect())
    }

    async fn episodes_for_statements(
        &self,
        statement_ids: &[String],
        filter: &StatementFilter,
    ) -> Result<Vec<ProvenanceLink>> {
        if statement_ids.is_empty() {
            return Ok(Vec::new());
        }
        let binds = ScopeBinds::new(filter)?;
        let sql = format!(
            r#"
            SELECT es.statement_id AS link_id, e.* FROM episode_statements es
            JOIN episodes e ON e.id = es.episode_id
            JOIN statements s ON s.id = es.statement_id
            WHERE s.owner_id = ?1 AND {scope} AND es.statement_id IN ({ids})
            ORDER BY es.statement_id, e.id
            "#,
            scope = EPISODE_SCOPE,
            ids = placeholders(EPISODE_SCOPE_PARAMS + 1, statement_ids.len())
        );

        let mut query = bind_episode_scope!(sqlx::query_as::<_, LinkedEpisodeRow>(&sql), binds);
        for id in statement_ids {
            query = query.bind(id.clone());
        }
        let rows = query.fetch_all(&self.pool).await?;

        rows.into_iter()
            .map(|row| {
                Ok(ProvenanceLink {
                    statement_id: row.link_id,
                    episode: row.episode.into_episode()?,
                })
            })
            .collect()
    }

    async fn statements_for_episodes(
        &self,
        episode_ids: &[String],
        filter: &StatementFilter,
    ) -> Result<Vec<EpisodeStatement>> {
        if episode_ids.is_empty() {
            return Ok(Vec::new());
        }
        let binds = ScopeBinds::new(filter)?;
        let sql = format!(
            r#"
            SELECT es.episode_id AS link_id, s.* FROM episode_statements es
            JOIN statements s ON s.id = es.statement_id
            JOIN episodes e ON e.id = es.episode_id
            WHERE e.owner_id = ?1 AND {scope} AND es.episode_id IN ({ids})
            ORDER BY es.episode_id, s.id
            "#,
            scope = STATEMENT_SCOPE,
            ids = placeholders(STATEMENT_SCOPE_PARAMS + 1, episode_ids.len())
        );

        let mut query =
            bind_statement_scope!(sqlx::query_as::<_, LinkedStatementRow>(&sql), binds);
        for id in episode_ids {
            query = query.bind(id.clone());
        }
        let rows = query.fetch_all(&self.pool).await?;

        rows.into_iter()
            .map(|row| {
                Ok(EpisodeStatement {
                    episode_id: row.link_id,
                    statement: row.statement.into_statement()?,
                })
            })
            .collect()
    }

    async fn compacted_sessions(
        &self,
        session_ids: &[String],
        owner_id: &str,
    ) -> Result<Vec<CompactedSession>> {
        if session_ids.is_empty() {
            return Ok(Vec::new());
        }
        let sql = format!(
            "SELECT * FROM compacted_sessions WHERE owner_id = ?1 AND session_id IN ({}) ORDER BY session_id",
            placeholders(2, session_ids.len())
        );

        let mut query = sqlx::query_as::<_, CompactedRow>(&sql).bind(owner_id.to_string());
        for id in session_ids {
            query = query.bind(id.clone());
        }
        let rows = query.fetch_all(&self.pool).await?;

        rows.into_iter().map(|r| r.into_session()).collect()
    }

    async fn stats(&self, owner_id: &str) -> Result<GraphStats> {
        let (entities, statements, episodes, compacted_sessions): (i64, i64, i64, i64) =
            sqlx::query_as(
                r#"
                SELECT
                    (SELECT COUNT(*) FROM entities WHERE owner_id = ?1),
                    (SELECT COUNT(*) FROM statements WHERE owner_id = ?1),
                    (SELECT COUNT(*) FROM episodes WHERE owner_id = ?1),
                    (SELECT COUNT(*) FROM compacted_sessions WHERE owner_id = ?1)
                "#,
            )
            .bind(owner_id)
            .fetch_one(&self.pool)
            .await?;

        Ok(GraphStats {
            entities: entities as u64,
            statements: statements as u64,
            episodes: episodes as u64,
            compacted_sessions: compacted_sessions as u64,
        })
    }
}

#[async_trait]
impl SnapshotLoader for SqliteRecallGraph {
    /// Upsert every record in one transaction; a failed load leaves the graph untouched
    async fn load_snapshot(&self, snapshot: &GraphSnapshot) -> Result<LoadSummary> {
        snapshot.validate()?;
        let mut tx = self.pool.begin().await?;

        for entity in &snapshot.entities {
            sqlx::query(
                r#"
                INSERT INTO entities (id, owner_id, name, entity_type, name_embedding)
                VALUES (?1, ?2, ?3, ?4, ?5)
                ON CONFLICT(id) DO UPDATE SET
                    owner_id = excluded.owner_id,
                    name = excluded.name,
                    entity_type = excluded.entity_type,
                    name_embedding = excluded.name_embedding
                "#,
            )
            .bind(&entity.id)
            .bind(&entity.owner_id)
            .bind(&entity.name)
            .bind(&entity.entity_type)
            .bind(serde_json::to_string(&entity.name_embedding)?)
            .execute(&mut *tx)
            .await?;
        }

        for statement in &snapshot.statements {
            sqlx::query(
                r#"
                INSERT INTO statements (
                    id, owner_id, fact, fact_embedding, subject_id, predicate, object_id,
                    valid_at, invalid_at, space_ids
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
                ON CONFLICT(id) DO UPDATE SET
                    owner_id = excluded.owner_id,
                    fact = excluded.fact,
                    fact_embedding = excluded.fact_embedding,
                    subject_id = excluded.subject_id,
                    predicate = excluded.predicate,
                    object_id = excluded.object_id,
                    valid_at = excluded.valid_at,
                    invalid_at = excluded.invalid_at,
                    space_ids = excluded.space_ids
                "#,
            )
            .bind(&statement.id)
            .bind(&statement.owner_id)
            .bind(&statement.fact)
            .bind(serde_json::to_string(&statement.fact_embedding)?)
            .bind(&statement.subject_id)
            .bind(&statement.predicate)
            .bind(&statement.object_id)
            .bind(timestamp(statement.valid_at))
            .bind(statement.invalid_at.map(timestamp))
            .bind(serde_json::to_string(&statement.space_ids)?)
            .execute(&mut *tx)
            .await?;
        }

        let mut links = 0;
        for item in &snapshot.episodes {
            let episode = &item.episode;
            sqlx::query(
                r#"
                INSERT INTO episodes (
                    id, owner_id, content, original_content, created_at, valid_at,
                    source, space_ids, session_id
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
                ON CONFLICT(id) DO UPDATE SET
                    owner_id = excluded.owner_id,
                    content = excluded.content,
                    original_content = excluded.original_content,
                    created_at = excluded.created_at,
                    valid_at = excluded.valid_at,
                    source = excluded.source,
                    space_ids = excluded.space_ids,
                    session_id = excluded.session_id
                "#,
            )
            .bind(&episode.id)
            .bind(&episode.owner_id)
            .bind(&episode.content)
            .bind(&episode.original_content)
            .bind(timestamp(episode.created_at))
            .bind(timestamp(episode.valid_at))
            .bind(&episode.source)
            .bind(serde_json::to_string(&episode.space_ids)?)
            .bind(&episode.session_id)
            .execute(&mut *tx)
            .await?;

            for statement_id in &item.statement_ids {
                let result = sqlx::query(
                    "INSERT OR IGNORE INTO episode_statements (episode_id, statement_id) VALUES (?1, ?2)",
                )
                .bind(&episode.id)
                .bind(statement_id)
                .execute(&mut *tx)
                .await?;
                links += result.rows_affected() as usize;
            }
        }

        for session in &snapshot.compacted_sessions {
            sqlx::query(
                r#"
                INSERT INTO compacted_sessions (
                    id, owner_id, session_id, summary, episode_count, start_time, end_time, space_ids
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                ON CONFLICT(owner_id, session_id) DO UPDATE SET
                    id = excluded.id,
                    summary = excluded.summary,
                    episode_count = excluded.episode_count,
                    start_time = excluded.start_time,
                    end_time = excluded.end_time,
                    space_ids = excluded.space_ids
                "#,
            )
            .bind(&session.id)
            .bind(&session.owner_id)
            .bind(&session.session_id)
            .bind(&session.summary)
            .bind(sql_int(session.episode_count))
            .bind(timestamp(session.start_time))
            .bind(timestamp(session.end_time))
            .bind(serde_json::to_string(&session.space_ids)?)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;

        let summary = LoadSummary::of(snapshot, links);
        info!(
            entities = summary.entities,
            statements = summary.statements,
            episodes = summary.episodes,
            links = summary.provenance_links,
            "Snapshot loaded into SQLite graph"
        );
        Ok(summary)
    }
}

#[async_trait]
impl RecallAuditSink for SqliteRecallGraph {
    async fn record(&self, entry: &RecallAuditEntry) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO recall_logs (
                id, owner_id, query, source, episode_graph_hits, traversal_hits,
                vector_hits, keyword_hits, result_count, confidence, latency_ms, created_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
            "#,
        )
        .bind(entry.id.to_string())
        .bind(&entry.owner_id)
        .bind(&entry.query)
        .bind(&entry.source)
        .bind(sql_int(entry.episode_graph_hits))
        .bind(sql_int(entry.traversal_hits))
        .bind(sql_int(entry.vector_hits))
        .bind(sql_int(entry.keyword_hits))
        .bind(sql_int(entry.result_count))
        .bind(entry.confidence as f64)
        .bind(sql_int(entry.latency_ms))
        .bind(timestamp(entry.created_at))
        .execute(&self.pool)
        .await?;

        debug!(audit_id = %entry.id, "Recall audit entry stored");
        Ok(())
    }
}

// ========== Row Types ==========
//
// Embeddings, space ids and timestamps are stored as JSON and RFC 3339 text
// and parsed back here.

#[derive(FromRow)]
struct EntityRow {
    id: String,
    owner_id: String,
    name: String,
    entity_type: Option<String>,
    name_embedding: String,
}

impl EntityRow {
    fn into_entity(self) -> Result<Entity> {
        Ok(Entity {
            id: self.id,
            name: self.name,
            entity_type: self.entity_type,
            name_embedding: serde_json::from_str(&self.name_embedding)?,
            owner_id: self.owner_id,
        })
    }
}

#[derive(FromRow)]
struct StatementRow {
    id: String,
    owner_id: String,
    fact: String,
    fact_embedding: String,
    subject_id: String,
    predicate: String,
    object_id: String,
    valid_at: String,
    invalid_at: Option<String>,
    space_ids: String,
}

impl StatementRow {
    fn into_statement(self) -> Result<Statement> {
        Ok(Statement {
            id: self.id,
            fact: self.fact,
            fact_embedding: serde_json::from_str(&self.fact_embedding)?,
            subject_id: self.subject_id,
            predicate: self.predicate,
            object_id: self.object_id,
            valid_at: parse_timestamp(&self.valid_at)?,
            invalid_at: self.invalid_at.as_deref().map(parse_timestamp).transpose()?,
            owner_id: self.owner_id,
            space_ids: serde_json::from_str(&self.space_ids)?,
        })
    }
}

/// A statement row plus its FTS score and citation count
#[derive(FromRow)]
struct KeywordRow {
    #[sqlx(flatten)]
    statement: StatementRow,
    score: f64,
    provenance_count: i64,
}

#[derive(FromRow)]
struct LinkedStatementRow {
    /// Episode id the statement was reached through
    link_id: String,
    #[sqlx(flatten)]
    statement: StatementRow,
}

#[derive(FromRow)]
struct EpisodeRow {
    id: String,
    owner_id: String,
    content: String,
    original_content: String,
    created_at: String,
    valid_at: String,
    source: String,
    space_ids: String,
    session_id: Option<String>,
}

impl EpisodeRow {
    fn into_episode(self) -> Result<Episode> {
        Ok(Episode {
            id: self.id,
            content: self.content,
            original_content: self.original_content,
            created_at: parse_timestamp(&self.created_at)?,
            valid_at: parse_timestamp(&self.valid_at)?,
            source: self.source,
            owner_id: self.owner_id,
            space_ids: serde_json::from_str(&self.space_ids)?,
            session_id: self.session_id,
        })
    }
}

#[derive(FromRow)]
struct LinkedEpisodeRow {
    /// Statement id the episode cites
    link_id: String,
    #[sqlx(flatten)]
    episode: EpisodeRow,
}

#[derive(FromRow)]
struct CompactedRow {
    id: String,
    owner_id: String,
    session_id: String,
    summary: String,
    episode_count: i64,
    start_time: String,
    end_time: String,
    space_ids: String,
}

impl CompactedRow {
    fn into_session(self) -> Result<CompactedSession> {
        Ok(CompactedSession {
            id: self.id,
            session_id: self.session_id,
            owner_id: self.owner_id,
            summary: self.summary,
            episode_count: self.episode_count.max(0) as usize,
            start_time: parse_timestamp(&self.start_time)?,
            end_time: parse_timestamp(&self.end_time)?,
            space_ids: serde_json::from_str(&self.space_ids)?,
        })
    }
}

#[derive(FromRow)]
struct RecallLogRow {
    id: String,
    owner_id: String,
    query: String,
    source: String,
    episode_graph_hits: i64,
    traversal_hits: i64,
    vector_hits: i64,
    keyword_hits: i64,
    result_count: i64,
    confidence: f64,
    latency_ms: i64,
    created_at: String,
}

impl RecallLogRow {
    fn into_entry(self) -> Result<RecallAuditEntry> {
        Ok(RecallAuditEntry {
            id: self
                .id
                .parse()
                .map_err(|e| Error::GraphQuery(format!("invalid audit id '{}': {}", self.id, e)))?,
            owner_id: self.owner_id,
            query: self.query,
            source: self.source,
            episode_graph_hits: self.episode_graph_hits.max(0) as usize,
            traversal_hits: self.traversal_hits.max(0) as usize,
            vector_hits: self.vector_hits.max(0) as usize,
            keyword_hits: self.keyword_hits.max(0) as usize,
            result_count: self.result_count.max(0) as usize,
            confidence: self.confidence as f32,
            latency_ms: self.latency_ms.max(0) as u64,
            created_at: parse_timestamp(&self.created_at)?,
        })
    }
}
