//! Database migrations
//!
//! Versioned SQLite schema for the recall graph. Migrations are applied in
//! order on connection and recorded in `_migrations`.
//!
//! Timestamps are stored as fixed-width RFC 3339 UTC text with microseconds,
//! so lexical comparison in SQL matches chronological order.

use sqlx::SqlitePool;

/// Current schema version
pub const CURRENT_VERSION: i32 = 3;

const CREATE_MIGRATIONS_TABLE: &str = r#"
    CREATE TABLE IF NOT EXISTS _migrations (
        version INTEGER PRIMARY KEY NOT NULL,
        applied_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
    );
"#;

/// Migration 1: Entities, statements, episodes and provenance
const MIGRATION_V1: &str = r#"
    CREATE TABLE IF NOT EXISTS entities (
        id TEXT PRIMARY KEY NOT NULL,
        owner_id TEXT NOT NULL,
        name TEXT NOT NULL,
        entity_type TEXT,
        name_embedding TEXT NOT NULL DEFAULT '[]'
    );

    CREATE INDEX IF NOT EXISTS idx_entities_owner_id ON entities(owner_id);

    CREATE TABLE IF NOT EXISTS statements (
        id TEXT PRIMARY KEY NOT NULL,
        owner_id TEXT NOT NULL,
        fact TEXT NOT NULL,
        fact_embedding TEXT NOT NULL DEFAULT '[]',
        subject_id TEXT NOT NULL,
        predicate TEXT NOT NULL,
        object_id TEXT NOT NULL,
        valid_at TEXT NOT NULL,
        invalid_at TEXT,
        space_ids TEXT NOT NULL DEFAULT '[]',
        CHECK (invalid_at IS NULL OR invalid_at >= valid_at)
    );

    CREATE INDEX IF NOT EXISTS idx_statements_owner_valid ON statements(owner_id, valid_at);

    -- Subject and object edges, kept in sync with statements
    CREATE TABLE IF NOT EXISTS statement_entities (
        statement_id TEXT NOT NULL REFERENCES statements(id) ON DELETE CASCADE,
        entity_id TEXT NOT NULL,
        role TEXT NOT NULL CHECK (role IN ('subject', 'object')),
        PRIMARY KEY (statement_id, role)
    );

    CREATE INDEX IF NOT EXISTS idx_statement_entities_entity ON statement_entities(entity_id);

    CREATE TRIGGER IF NOT EXISTS statements_edges_ai AFTER INSERT ON statements BEGIN
        INSERT INTO statement_entities (statement_id, entity_id, role)
        VALUES (NEW.id, NEW.subject_id, 'subject'), (NEW.id, NEW.object_id, 'object');
    END;

    CREATE TRIGGER IF NOT EXISTS statements_edges_au AFTER UPDATE OF subject_id, object_id ON statements BEGIN
        DELETE FROM statement_entities WHERE statement_id = OLD.id;
        INSERT INTO statement_entities (statement_id, entity_id, role)
        VALUES (NEW.id, NEW.subject_id, 'subject'), (NEW.id, NEW.object_id, 'object');
    END;

    CREATE TABLE IF NOT EXISTS episodes (
        id TEXT PRIMARY KEY NOT NULL,
        owner_id TEXT NOT NULL,
        content TEXT NOT NULL,
        original_content TEXT NOT NULL DEFAULT '',
        created_at TEXT NOT NULL,
        valid_at TEXT NOT NULL,
        source TEXT NOT NULL DEFAULT '',
        space_ids TEXT NOT NULL DEFAULT '[]',
        session_id TEXT
    );

    CREATE INDEX IF NOT EXISTS idx_episodes_owner_created ON episodes(owner_id, created_at);
    CREATE INDEX IF NOT EXISTS idx_episodes_session_id ON episodes(session_id);

    CREATE TABLE IF NOT EXISTS episode_statements (
        episode_id TEXT NOT NULL REFERENCES episodes(id) ON DELETE CASCADE,
        statement_id TEXT NOT NULL REFERENCES statements(id) ON DELETE CASCADE,
        PRIMARY KEY (episode_id, statement_id)
    );

    CREATE INDEX IF NOT EXISTS idx_episode_statements_statement ON episode_statements(statement_id);
"#;

/// Migration 2: Full-text index over statement facts
const MIGRATION_V2: &str = r#"
    CREATE VIRTUAL TABLE IF NOT EXISTS statements_fts USING fts5(
        fact,
        content='statements',
        content_rowid='rowid'
    );

    CREATE TRIGGER IF NOT EXISTS statements_ai AFTER INSERT ON statements BEGIN
        INSERT INTO statements_fts(rowid, fact) VALUES (NEW.rowid, NEW.fact);
    END;

    CREATE TRIGGER IF NOT EXISTS statements_ad AFTER DELETE ON statements BEGIN
        INSERT INTO statements_fts(statements_fts, rowid, fact)
        VALUES ('delete', OLD.rowid, OLD.fact);
    END;

    CREATE TRIGGER IF NOT EXISTS statements_au AFTER UPDATE ON statements BEGIN
        INSERT INTO statements_fts(statements_fts, rowid, fact)
        VALUES ('delete', OLD.rowid, OLD.fact);
        INSERT INTO statements_fts(rowid, fact) VALUES (NEW.rowid, NEW.fact);
    END;

    INSERT INTO statements_fts(statements_fts) VALUES ('rebuild');
"#;

/// Migration 3: Compacted sessions and the recall audit log
const MIGRATION_V3: &str = r#"
    CREATE TABLE IF NOT EXISTS compacted_sessions (
        id TEXT PRIMARY KEY NOT NULL,
        owner_id TEXT NOT NULL,
        session_id TEXT NOT NULL,
        summary TEXT NOT NULL,
        episode_count INTEGER NOT NULL DEFAULT 0,
        start_time TEXT NOT NULL,
        end_time TEXT NOT NULL,
        space_ids TEXT NOT NULL DEFAULT '[]',
        UNIQUE (owner_id, session_id)
    );

    CREATE TABLE IF NOT EXISTS recall_logs (
        id TEXT PRIMARY KEY NOT NULL,
        owner_id TEXT NOT NULL,
        query TEXT NOT NULL,
        source TEXT NOT NULL,
        episode_graph_hits INTEGER NOT NULL DEFAULT 0,
        traversal_hits INTEGER NOT NULL DEFAULT 0,
        vector_hits INTEGER NOT NULL DEFAULT 0,
        keyword_hits INTEGER NOT NULL DEFAULT 0,
        result_count INTEGER NOT NULL DEFAULT 0,
        confidence REAL NOT NULL DEFAULT 0.0,
        latency_ms INTEGER NOT NULL DEFAULT 0,
        created_at TEXT NOT NULL
    );

    CREATE INDEX IF NOT EXISTS idx_recall_logs_owner_created ON recall_logs(owner_id, created_at);
"#;

async fn get_current_version(pool: &SqlitePool) -> anyhow::Result<i32> {
    sqlx::raw_sql(CREATE_MIGRATIONS_TABLE).execute(pool).await?;

    let (version,): (Option<i32>,) = sqlx::query_as("SELECT MAX(version) FROM _migrations")
        .fetch_one(pool)
        .await?;

    Ok(version.unwrap_or(0))
}

async fn record_migration(pool: &SqlitePool, version: i32) -> anyhow::Result<()> {
    sqlx::query("INSERT INTO _migrations (version) VALUES (?)")
        .bind(version)
        .execute(pool)
        .await?;
    Ok(())
}

/// Run all pending migrations
pub async fn run_migrations(pool: &SqlitePool) -> anyhow::Result<()> {
    let current_version = get_current_version(pool).await?;

    tracing::info!(
        current_version = current_version,
        target_version = CURRENT_VERSION,
        "Checking database migrations"
    );

    if current_version >= CURRENT_VERSION {
        tracing::debug!("Database is up to date");
        return Ok(());
    }

    if current_version < 1 {
        tracing::info!("Applying migration v1: Graph schema");
        sqlx::raw_sql(MIGRATION_V1).execute(pool).await?;
        record_migration(pool, 1).await?;
    }

    if current_version < 2 {
        tracing::info!("Applying migration v2: Statement full-text index");
        sqlx::raw_sql(MIGRATION_V2).execute(pool).await?;
        record_migration(pool, 2).await?;
    }

    if current_version < 3 {
        tracing::info!("Applying migration v3: Compacted sessions and recall logs");
        sqlx::raw_sql(MIGRATION_V3).execute(pool).await?;
        record_migration(pool, 3).await?;
    }

    tracing::info!("Database migrations completed");
    Ok(())
}

/// Get migration status information
pub async fn migration_status(pool: &SqlitePool) -> anyhow::Result<MigrationStatus> {
    let current_version = get_current_version(pool).await?;
    Ok(MigrationStatus {
        current_version,
        target_version: CURRENT_VERSION,
        needs_migration: current_version < CURRENT_VERSION,
    })
}

/// Migration status information
#[derive(Debug, Clone)]
pub struct MigrationStatus {
    pub current_version: i32,
    pub target_version: i32,
    pub needs_migration: bool,
}
