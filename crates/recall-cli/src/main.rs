//! Recall CLI - query a personal knowledge graph from the terminal

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use recall_core::config::Config;
use recall_core::domain::recall::{
    RecallAuditEntry, RecallAuditSink, RecallGraph, RecallService, RelevanceValidator,
    SearchOptions, SortBy,
};
use recall_core::embedding::{Embedder, HashEmbedder};
use recall_core::infrastructure::graph::{GraphSnapshot, SnapshotLoader, SqliteRecallGraph};
use recall_core::llm::{CompletionProvider, LlmClient};
use recall_core::storage::Database;
use tracing::{debug, info, warn};


#[derive(Parser)]
#[command(name = "recall")]
#[command(author, version, about = "Hybrid recall over a temporal knowledge graph", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Output format (text or json)
    #[arg(long, global = true, default_value = "text")]
    format: OutputFormat,

    /// SQLite database path (overrides storage.database_path)
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    /// Quiet mode (minimal output)
    #[arg(short, long, global = true)]
    quiet: bool,
}

#[derive(Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
enum OutputFormat {
    #[default]
    Text,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Search an owner's graph
    Search {
        /// Free-text query
        query: String,
        /// Owner whose graph is searched
        #[arg(short, long)]
        owner: String,
        /// Maximum episodes returned
        #[arg(short, long)]
        limit: Option<usize>,
        /// Maximum traversal depth
        #[arg(long)]
        depth: Option<usize>,
        /// Restrict to a space (repeatable)
        #[arg(long = "space")]
        spaces: Vec<String>,
        /// Emit episodes and facts as JSON instead of a digest
        #[arg(long)]
        structured: bool,
        /// Skip LLM relevance validation
        #[arg(long)]
        no_validate: bool,
        /// Quality threshold (higher is stricter)
        #[arg(long)]
        threshold: Option<f32>,
        /// Final ordering: relevance or recency
        #[arg(long, default_value = "relevance")]
        sort: String,
        /// Evaluate facts as of this RFC 3339 time
        #[arg(long)]
        at: Option<String>,
        /// Leave out facts that have since been invalidated
        #[arg(long)]
        exclude_invalidated: bool,
    },

    /// Load a JSON graph snapshot into the database
    Load {
        /// Snapshot file
        path: PathBuf,
        /// Rebuild the statement search index after loading
        #[arg(long)]
        reindex: bool,
    },

    /// Show record counts for an owner
    Stats {
        #[arg(short, long)]
        owner: String,
    },

    /// Show recent searches for an owner
    History {
        #[arg(short, long)]
        owner: String,
        #[arg(short, long, default_value = "20")]
        limit: usize,
    },

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Get a config value
    Get { key: String },
    /// Set a config value
    Set { key: String, value: String },
    /// List all config values
    List,
    /// Show the config file path
    Path,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("recall=info".parse()?),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Search {
            query,
            owner,
            limit,
            depth,
            spaces,
            structured,
            no_validate,
            threshold,
            sort,
            at,
            exclude_invalidated,
        } => {
            let config = Config::load()?;
            let mut options = SearchOptions::from_config(&config.search);
            if let Some(limit) = limit {
                options.limit = limit;
            }
            if let Some(depth) = depth {
                options.max_bfs_depth = depth;
            }
            if let Some(threshold) = threshold {
                options.quality_threshold = threshold;
            }
            if let Some(at) = at {
                options.valid_at = Some(parse_time(&at)?);
            }
            options.space_ids = spaces;
            options.structured = structured;
            options.use_llm_validation = !no_validate;
            options.include_invalidated = !exclude_invalidated;
            options.sort_by = sort.parse::<SortBy>()?;
            options.source = "cli".to_string();

            cmd_search(&config, cli.db.as_deref(), &query, &owner, &options, cli.format).await
        }

        Commands::Load { path, reindex } => {
            let config = Config::load()?;
            cmd_load(&config, cli.db.as_deref(), &path, reindex, cli.format, cli.quiet).await
        }

        Commands::Stats { owner } => {
            let config = Config::load()?;
            cmd_stats(&config, cli.db.as_deref(), &owner, cli.format).await
        }

        Commands::History { owner, limit } => {
            let config = Config::load()?;
            cmd_history(&config, cli.db.as_deref(), &owner, limit, cli.format).await
        }

        Commands::Config { action } => cmd_config(action, cli.quiet),
    }
}

// ============================================================================
// Command Implementations
// ============================================================================

async fn cmd_search(
    config: &Config,
    db_path: Option<&Path>,
    query: &str,
    owner: &str,
    options: &SearchOptions,
    format: OutputFormat,
) -> anyhow::Result<()> {
    let graph = open_graph(config, db_path).await?;
    let models = Models::from_config(config)?;

    let mut service =
        RecallService::new(graph.clone(), models.embedder.clone()).with_config(config.search.clone());
    if let Some(provider) = models.completion {
        service = service.with_validator(RelevanceValidator::new(
            provider,
            config.search.validator.clone(),
        ));
    }

    let response = service.search(query, owner, options).await?;
    if response.diagnostics.is_degraded() {
        warn!(
            failed = ?response.diagnostics.failed_strategies,
            entity_resolution_failed = response.diagnostics.entity_resolution_failed,
            "Some retrieval steps failed, results may be incomplete"
        );
    }

    // recorded inline: a detached sink task would not outlive the process
    let entry = RecallAuditEntry::new(
        owner,
        query,
        options.source.clone(),
        response.diagnostics.strategy_counts,
    )
    .with_outcome(
        response.episodes.len(),
        response.confidence,
        response.diagnostics.latency_ms,
    );
    if let Err(e) = graph.record(&entry).await {
        warn!(error = %e, "Failed to record search history");
    }

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&response)?),
        OutputFormat::Text if options.structured => {
            println!("{}", serde_json::to_string_pretty(&response.to_structured())?)
        }
        OutputFormat::Text => println!("{}", response.to_digest()),
    }
    Ok(())
}

async fn cmd_load(
    config: &Config,
    db_path: Option<&Path>,
    path: &Path,
    reindex: bool,
    format: OutputFormat,
    quiet: bool,
) -> anyhow::Result<()> {
    let mut snapshot = GraphSnapshot::from_path(path)
        .with_context(|| format!("Failed to read snapshot: {}", path.display()))?;
    snapshot.validate()?;

    let models = Models::from_config(config)?;
    let embedded = snapshot.embed_missing(models.embedder.as_ref()).await?;
    debug!(embedded, "Filled missing embeddings");

    let db = open_database(config, db_path).await?;
    let graph = SqliteRecallGraph::new(db.pool().clone());
    let summary = graph.load_snapshot(&snapshot).await?;
    if reindex {
        db.rebuild_search_index().await?;
        info!("Rebuilt statement search index");
    }
    db.health_check().await?;

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&summary)?),
        OutputFormat::Text if !quiet => {
            println!(
                "Loaded {} entities, {} statements, {} episodes ({} provenance links, {} compacted sessions)",
                summary.entities,
                summary.statements,
                summary.episodes,
                summary.provenance_links,
                summary.compacted_sessions
            );
            if embedded > 0 {
                println!("Computed {} embeddings", embedded);
            }
        }
        OutputFormat::Text => {}
    }
    Ok(())
}

async fn cmd_stats(
    config: &Config,
    db_path: Option<&Path>,
    owner: &str,
    format: OutputFormat,
) -> anyhow::Result<()> {
    let graph = open_graph(config, db_path).await?;
    let stats = graph.stats(owner).await?;

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&stats)?),
        OutputFormat::Text => {
            println!("Graph for '{}'", owner);
            println!("  Entities:           {}", stats.entities);
            println!("  Statements:         {}", stats.statements);
            println!("  Episodes:           {}", stats.episodes);
            println!("  Compacted sessions: {}", stats.compacted_sessions);
        }
    }
    Ok(())
}

async fn cmd_history(
    config: &Config,
    db_path: Option<&Path>,
    owner: &str,
    limit: usize,
    format: OutputFormat,
) -> anyhow::Result<()> {
    let graph = open_graph(config, db_path).await?;
    let entries = graph.recent_recalls(owner, limit).await?;

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&entries)?),
        OutputFormat::Text if entries.is_empty() => println!("No searches recorded."),
        OutputFormat::Text => {
            for entry in entries {
                println!(
                    "{}  {:<40} {} results  confidence {:.2}  {} ms",
                    entry.created_at.format("%Y-%m-%d %H:%M:%S"),
                    entry.query,
                    entry.result_count,
                    entry.confidence,
                    entry.latency_ms
                );
            }
        }
    }
    Ok(())
}

fn cmd_config(action: ConfigAction, quiet: bool) -> anyhow::Result<()> {
    match action {
        ConfigAction::Get { key } => {
            let config = Config::load()?;
            let value = config.get(&key)?;
            println!("{}", value);
        }
        ConfigAction::Set { key, value } => {
            let mut config = Config::load()?;
            config.set(&key, &value)?;
            config.save()?;
            if !quiet {
                println!("Set {} = {}", key, value);
            }
        }
        ConfigAction::List => {
            let config = Config::load()?;
            for (key, value) in config.list()? {
                println!("{} = {}", key, value);
            }
        }
        ConfigAction::Path => {
            let path = Config::config_path()?;
            println!("{}", path.display());
        }
    }
    Ok(())
}

// ============================================================================
// Helpers
// ============================================================================

async fn open_database(config: &Config, db_path: Option<&Path>) -> anyhow::Result<Database> {
    let path = db_path
        .map(Path::to_path_buf)
        .unwrap_or_else(|| config.database_path());
    let db = Database::open(&path).await?;
    debug!(path = %path.display(), "Opened recall database");
    Ok(db)
}

async fn open_graph(config: &Config, db_path: Option<&Path>) -> anyhow::Result<Arc<SqliteRecallGraph>> {
    let db = open_database(config, db_path).await?;
    Ok(Arc::new(SqliteRecallGraph::new(db.pool().clone())))
}

/// Embedding and completion backends chosen from the environment
struct Models {
    embedder: Arc<dyn Embedder>,
    completion: Option<Arc<dyn CompletionProvider>>,
}

impl Models {
    /// Remote models when an API key is set, offline hashing otherwise
    ///
    /// Snapshots must be loaded and searched with the same embedder.
    fn from_config(config: &Config) -> anyhow::Result<Self> {
        match config.llm.resolved_api_key()? {
            Some(key) => {
                let client = Arc::new(
                    LlmClient::builder()
                        .config(config.llm.clone())
                        .embedding(config.embedding.clone())
                        .api_key(key)
                        .build()?,
                );
                info!(model = %client.default_model(), "Using remote models");
                Ok(Self {
                    embedder: client.clone(),
                    completion: Some(client),
                })
            }
            None => {
                debug!(
                    dimensions = config.embedding.dimensions,
                    "No API key set, using offline hashing embedder"
                );
                Ok(Self {
                    embedder: Arc::new(HashEmbedder::new(config.embedding.dimensions)),
                    completion: None,
                })
            }
        }
    }
}

fn parse_time(value: &str) -> anyhow::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .with_context(|| format!("Invalid --at time '{}', expected RFC 3339", value))
}
