//! SQLite database operations
//!
//! Opens the pool behind [`SqliteRecallGraph`](crate::infrastructure::graph::SqliteRecallGraph).
//! One file holds every owner's graph plus the recall audit log, so a search
//! process appending to `recall_logs` can overlap a `recall load` writing
//! statements. WAL journaling with a busy timeout lets both proceed.

use crate::storage::migrations;
use anyhow::{Context, Result, bail};
use sqlx::SqlitePool;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use tracing::debug;

/// Pool size for file databases; graph queries fan out four ways per search
const DEFAULT_MAX_CONNECTIONS: u32 = 5;

/// How long a writer waits on a locked database before failing
const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Database configuration options
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    /// Path to the SQLite file, or `:memory:`
    pub path: PathBuf,
    /// Maximum number of pooled connections
    pub max_connections: u32,
    /// Bring the schema up to date on open
    pub auto_migrate: bool,
    /// Journal mode (WAL so readers never block the audit writer)
    pub journal_mode: SqliteJournalMode,
    /// Synchronous mode
    pub synchronous: SqliteSynchronous,
    /// Wait applied when another process holds the write lock
    pub busy_timeout: Duration,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_database_path(),
            max_connections: DEFAULT_MAX_CONNECTIONS,
            auto_migrate: true,
            journal_mode: SqliteJournalMode::Wal,
            synchronous: SqliteSynchronous::Normal,
            busy_timeout: DEFAULT_BUSY_TIMEOUT,
        }
    }
}

impl DatabaseConfig {
    /// Config for the graph file at `path`
    pub fn with_path(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            ..Default::default()
        }
    }

    /// Config for an in-memory graph, used by tests
    pub fn in_memory() -> Self {
        Self {
            path: PathBuf::from(":memory:"),
            // every connection to :memory: is a separate database
            max_connections: 1,
            ..Default::default()
        }
    }

    pub fn max_connections(mut self, max: u32) -> Self {
        self.max_connections = max;
        self
    }

    pub fn busy_timeout(mut self, timeout: Duration) -> Self {
        self.busy_timeout = timeout;
        self
    }

    /// Open without touching the schema
    pub fn no_migrate(mut self) -> Self {
        self.auto_migrate = false;
        self
    }

    fn is_in_memory(&self) -> bool {
        self.path.to_string_lossy() == ":memory:"
    }
}

/// Default graph location under the platform data directory
pub fn default_database_path() -> PathBuf {
    if let Some(data_dir) = dirs::data_dir() {
        data_dir.join("recall").join("recall.db")
    } else {
        PathBuf::from("recall.db")
    }
}

/// Connection pool over one recall graph file
#[derive(Debug, Clone)]
pub struct Database {
    pool: SqlitePool,
    config: DatabaseConfig,
}

impl Database {
    pub async fn new(config: DatabaseConfig) -> Result<Self> {
        if let Some(parent) = config.path.parent() {
            if !config.is_in_memory() && !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create database directory: {:?}", parent))?;
            }
        }

        let connect_options = if config.is_in_memory() {
            SqliteConnectOptions::from_str("sqlite::memory:")?
        } else {
            SqliteConnectOptions::new().filename(&config.path)
        }
        .journal_mode(config.journal_mode)
        .synchronous(config.synchronous)
        .busy_timeout(config.busy_timeout)
        .foreign_keys(true)
        .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .connect_with(connect_options)
            .await
            .with_context(|| format!("Failed to open recall graph: {:?}", config.path))?;

        let db = Self {
            pool,
            config: config.clone(),
        };

        if config.auto_migrate {
            db.migrate().await?;
        }

        debug!(path = %config.path.display(), "Recall graph database ready");
        Ok(db)
    }

    /// Open the graph file at `path`, creating it if needed
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self> {
        Self::new(DatabaseConfig::with_path(path)).await
    }

    pub async fn in_memory() -> Result<Self> {
        Self::new(DatabaseConfig::in_memory()).await
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub fn config(&self) -> &DatabaseConfig {
        &self.config
    }

    pub async fn migrate(&self) -> Result<()> {
        migrations::run_migrations(&self.pool)
            .await
            .context("Failed to run database migrations")
    }

    pub async fn migration_status(&self) -> Result<migrations::MigrationStatus> {
        migrations::migration_status(&self.pool)
            .await
            .context("Failed to check migration status")
    }

    /// Check the connection, the schema version and the full-text index
    ///
    /// The keyword strategy reads `statements_fts`, which triggers keep in step
    /// with `statements`; a drifted index would silently miss facts.
    pub async fn health_check(&self) -> Result<()> {
        sqlx::query("SELECT 1")
            .fetch_one(&self.pool)
            .await
            .context("Database health check failed")?;

        let status = self.migration_status().await?;
        if status.needs_migration {
            bail!(
                "Recall graph schema is at version {}, expected {}",
                status.current_version,
                status.target_version
            );
        }

        sqlx::query("INSERT INTO statements_fts(statements_fts) VALUES ('integrity-check')")
            .execute(&self.pool)
            .await
            .context("Statement search index is out of sync, run `recall load` again")?;
        Ok(())
    }

    /// Rebuild the statement search index from the `statements` table
    pub async fn rebuild_search_index(&self) -> Result<()> {
        sqlx::query("INSERT INTO statements_fts(statements_fts) VALUES ('rebuild')")
            .execute(&self.pool)
            .await
            .context("Failed to rebuild statement search index")?;
        Ok(())
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }

    pub fn path(&self) -> &Path {
        &self.config.path
    }
}
