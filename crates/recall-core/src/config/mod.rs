//! Configuration management with file persistence
//!
//! Every tuned constant of the search pipeline lives in [`SearchConfig`] so it can be
//! adjusted per deployment without touching code.

use anyhow::{Context, anyhow};
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::PathBuf;

/// Recall configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub llm: LlmConfig,
    pub embedding: EmbeddingConfig,
    pub search: SearchConfig,
    pub storage: StorageConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    #[serde(skip)]
    pub api_key: Option<String>,
    pub base_url: String,
    pub default_model: String,
    pub fallback_models: Vec<String>,
    pub temperature: f32,
    pub max_tokens: usize,
    pub timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: "https://api.openai.com/v1".to_string(),
            default_model: "gpt-4o-mini".to_string(),
            fallback_models: vec!["gpt-4o".to_string()],
            temperature: 0.0,
            max_tokens: 1024,
            timeout_secs: 60,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    pub model: String,
    /// Vector width produced by the offline hashing embedder
    pub dimensions: usize,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            model: "text-embedding-3-small".to_string(),
            dimensions: 256,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// SQLite database path; the platform data directory is used when unset
    pub database_path: Option<PathBuf>,
}

/// Tunables for the whole retrieval pipeline
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    pub entity: EntityResolutionConfig,
    pub keyword: KeywordConfig,
    pub vector: VectorConfig,
    pub traversal: TraversalConfig,
    pub episode_graph: EpisodeGraphConfig,
    pub scoring: ScoringWeights,
    pub quality: QualityConfig,
    pub validator: ValidatorConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EntityResolutionConfig {
    pub min_similarity: f32,
    pub top_k: usize,
}

impl Default for EntityResolutionConfig {
    fn default() -> Self {
        Self {
            min_similarity: 0.7,
            top_k: 3,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct KeywordConfig {
    pub max_words: usize,
}

impl Default for KeywordConfig {
    fn default() -> Self {
        Self { max_words: 32 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VectorConfig {
    pub min_similarity: f32,
    pub default_limit: usize,
}

impl Default for VectorConfig {
    fn default() -> Self {
        Self {
            min_similarity: 0.5,
            default_limit: 100,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TraversalConfig {
    pub default_max_depth: usize,
    /// Loose bar a statement must clear to keep the walk going through it
    pub exploration_threshold: f32,
    /// Final bar a statement must clear to be returned
    pub relevance_threshold: f32,
    pub per_level_limit: usize,
}

impl Default for TraversalConfig {
    fn default() -> Self {
        Self {
            default_max_depth: 4,
            exploration_threshold: 0.3,
            relevance_threshold: 0.5,
            per_level_limit: 200,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EpisodeGraphConfig {
    pub min_avg_relevance: f32,
    pub top_episodes: usize,
    pub entity_match_weight: f32,
}

impl Default for EpisodeGraphConfig {
    fn default() -> Self {
        Self {
            min_avg_relevance: 0.5,
            top_episodes: 20,
            entity_match_weight: 2.0,
        }
    }
}

/// Composite score weights, strongest evidence first
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringWeights {
    pub episode_graph: f32,
    pub bfs: f32,
    pub vector: f32,
    pub bm25: f32,
    /// Multiplier on `ln(1 + statement_count)` for the concentration bonus
    pub concentration: f32,
    /// Weight for hop 1, 2, 3, ...; hops past the end use `hop_weight_beyond`
    pub hop_weights: Vec<f32>,
    pub hop_weight_beyond: f32,
}

impl Default for ScoringWeights {
    fn default() -> Self {
        Self {
            episode_graph: 5.0,
            bfs: 3.0,
            vector: 1.5,
            bm25: 0.2,
            concentration: 0.3,
            hop_weights: vec![2.0, 1.3, 1.0],
            hop_weight_beyond: 0.8,
        }
    }
}

impl ScoringWeights {
    /// Weight applied to a traversal hit found at a 1-indexed hop
    pub fn hop_weight(&self, hop: usize) -> f32 {
        hop.checked_sub(1)
            .and_then(|idx| self.hop_weights.get(idx))
            .copied()
            .unwrap_or(self.hop_weight_beyond)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QualityConfig {
    /// Threshold when graph or traversal evidence exists
    pub structural_threshold: f32,
    /// Threshold when only vector evidence exists
    pub vector_threshold: f32,
    /// Threshold when only keyword evidence exists
    pub keyword_threshold: f32,
    pub max_expected: MaxExpectedScores,
    /// Confidence below this empties the result
    pub min_confidence: f32,
    /// Confidence at or above this skips the validator
    pub validation_ceiling: f32,
    /// Relative drop between consecutive scores that counts as a cliff
    pub gap_ratio: f32,
    /// Survivors always kept before gap detection starts
    pub gap_min_results: usize,
}

impl Default for QualityConfig {
    fn default() -> Self {
        Self {
            structural_threshold: 5.0,
            vector_threshold: 1.0,
            keyword_threshold: 0.3,
            max_expected: MaxExpectedScores::default(),
            min_confidence: 0.3,
            validation_ceiling: 0.7,
            gap_ratio: 0.5,
            gap_min_results: 3,
        }
    }
}

/// Normalizers turning an average composite score into a confidence
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MaxExpectedScores {
    pub episode_graph: f32,
    pub bfs: f32,
    pub vector: f32,
    pub bm25: f32,
}

impl Default for MaxExpectedScores {
    fn default() -> Self {
        Self {
            episode_graph: 25.0,
            bfs: 15.0,
            vector: 3.0,
            bm25: 1.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidatorConfig {
    pub max_candidates: usize,
    pub preview_chars: usize,
    pub facts_per_candidate: usize,
}

impl Default for ValidatorConfig {
    fn default() -> Self {
        Self {
            max_candidates: 20,
            preview_chars: 400,
            facts_per_candidate: 5,
        }
    }
}

impl LlmConfig {
    pub fn resolved_api_key(&self) -> anyhow::Result<Option<String>> {
        self.enforce_env_only()?;

        Ok(env::var("RECALL_API_KEY")
            .or_else(|_| env::var("OPENAI_API_KEY"))
            .ok())
    }

    pub fn redacted_api_key(&self) -> anyhow::Result<Option<String>> {
        self.resolved_api_key().map(|opt| opt.as_deref().map(redact_key))
    }

    pub fn enforce_env_only(&self) -> anyhow::Result<()> {
        if self.api_key.is_some() {
            return Err(anyhow!(
                "LLM API keys must be provided via environment variables, not stored in configuration"
            ));
        }
        Ok(())
    }
}

/// Mask a key down to its last four characters
fn redact_key(key: &str) -> String {
    if key.chars().count() <= 4 {
        return "***".to_string();
    }
    let suffix: String = key.chars().rev().take(4).collect::<Vec<_>>().into_iter().rev().collect();
    format!("***{}", suffix)
}

impl SearchConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        let unit_values = [
            ("search.entity.min_similarity", self.entity.min_similarity),
            ("search.vector.min_similarity", self.vector.min_similarity),
            ("search.traversal.exploration_threshold", self.traversal.exploration_threshold),
            ("search.traversal.relevance_threshold", self.traversal.relevance_threshold),
            ("search.episode_graph.min_avg_relevance", self.episode_graph.min_avg_relevance),
            ("search.quality.min_confidence", self.quality.min_confidence),
            ("search.quality.validation_ceiling", self.quality.validation_ceiling),
            ("search.quality.gap_ratio", self.quality.gap_ratio),
        ];
        for (key, value) in unit_values {
            if !(0.0..=1.0).contains(&value) {
                return Err(anyhow!("{} must be between 0.0 and 1.0, got {}", key, value));
            }
        }

        if self.traversal.exploration_threshold > self.traversal.relevance_threshold {
            return Err(anyhow!(
                "search.traversal.exploration_threshold must not exceed relevance_threshold"
            ));
        }
        if self.quality.min_confidence > self.quality.validation_ceiling {
            return Err(anyhow!(
                "search.quality.min_confidence must not exceed validation_ceiling"
            ));
        }
        if self.keyword.max_words == 0 {
            return Err(anyhow!("search.keyword.max_words must be at least 1"));
        }

        let max_expected = &self.quality.max_expected;
        if [
            max_expected.episode_graph,
            max_expected.bfs,
            max_expected.vector,
            max_expected.bm25,
        ]
        .iter()
        .any(|v| *v <= 0.0)
        {
            return Err(anyhow!("search.quality.max_expected values must be positive"));
        }

        let weights = &self.scoring;
        if [weights.episode_graph, weights.bfs, weights.vector, weights.bm25, weights.concentration]
            .iter()
            .chain(weights.hop_weights.iter())
            .any(|w| *w < 0.0)
        {
            return Err(anyhow!("search.scoring weights must be non-negative"));
        }

        Ok(())
    }
}

impl Config {
    /// Get the config directory path
    pub fn config_dir() -> anyhow::Result<PathBuf> {
        let dir = if let Ok(custom_dir) = env::var("RECALL_CONFIG_DIR") {
            PathBuf::from(custom_dir)
        } else {
            dirs::config_dir()
                .ok_or_else(|| anyhow!("Could not determine config directory"))?
                .join("recall")
        };
        Ok(dir)
    }

    /// Get the config file path
    pub fn config_path() -> anyhow::Result<PathBuf> {
        Ok(Self::config_dir()?.join("config.toml"))
    }

    /// Load configuration from file, or fall back to defaults if it doesn't exist
    pub fn load() -> anyhow::Result<Self> {
        let path = Self::config_path()?;

        if path.exists() {
            let contents = fs::read_to_string(&path)
                .with_context(|| format!("Failed to read config file: {}", path.display()))?;
            let config: Config = toml::from_str(&contents)
                .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
            config.validate()?;
            Ok(config)
        } else {
            Ok(Config::default())
        }
    }

    /// Save configuration to file
    pub fn save(&self) -> anyhow::Result<()> {
        self.validate()?;

        let dir = Self::config_dir()?;
        fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create config directory: {}", dir.display()))?;

        let path = Self::config_path()?;
        let contents = toml::to_string_pretty(self).context("Failed to serialize config")?;

        fs::write(&path, contents)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        self.llm.enforce_env_only()?;
        self.search.validate()
    }

    /// Resolved database path
    pub fn database_path(&self) -> PathBuf {
        self.storage
            .database_path
            .clone()
            .unwrap_or_else(crate::storage::default_database_path)
    }

    /// Get a configuration value by dotted key
    pub fn get(&self, key: &str) -> anyhow::Result<String> {
        if key == "llm.api_key" || key == "api_key" {
            return match self.llm.redacted_api_key()? {
                Some(redacted) => Ok(redacted),
                None => Ok("(not set - use RECALL_API_KEY or OPENAI_API_KEY env var)".to_string()),
            };
        }

        let tree = toml::Value::try_from(self).context("Failed to serialize config")?;
        let value = lookup(&tree, key).ok_or_else(|| unknown_key(key))?;
        Ok(render_value(value))
    }

    /// Set a configuration value by dotted key
    ///
    /// The new value is parsed as the same kind as the current one and the whole
    /// configuration is re-validated before it is accepted.
    pub fn set(&mut self, key: &str, value: &str) -> anyhow::Result<()> {
        if key == "llm.api_key" || key == "api_key" {
            return Err(anyhow!(
                "API keys cannot be stored in config. Set RECALL_API_KEY environment variable instead."
            ));
        }

        let mut tree = toml::Value::try_from(&*self).context("Failed to serialize config")?;
        let slot = lookup_mut(&mut tree, key).ok_or_else(|| unknown_key(key))?;
        *slot = parse_like(slot, value).with_context(|| format!("Invalid value for {}", key))?;

        let updated: Config = tree
            .try_into()
            .with_context(|| format!("Invalid value for {}", key))?;
        updated.validate()?;
        *self = updated;
        Ok(())
    }

    /// List all configuration keys with their current values
    pub fn list(&self) -> anyhow::Result<Vec<(String, String)>> {
        let tree = toml::Value::try_from(self).context("Failed to serialize config")?;
        let mut entries = Vec::new();
        flatten("", &tree, &mut entries);
        entries.push(("llm.api_key".to_string(), self.get("llm.api_key")?));
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(entries)
    }
}

fn unknown_key(key: &str) -> anyhow::Error {
    anyhow!(
        "Unknown configuration key: {}. Use `recall config list` to see available keys.",
        key
    )
}

fn lookup<'a>(tree: &'a toml::Value, key: &str) -> Option<&'a toml::Value> {
    key.split('.').try_fold(tree, |node, part| node.get(part))
}

fn lookup_mut<'a>(tree: &'a mut toml::Value, key: &str) -> Option<&'a mut toml::Value> {
    key.split('.').try_fold(tree, |node, part| node.get_mut(part))
}

fn render_value(value: &toml::Value) -> String {
    match value {
        toml::Value::String(s) => s.clone(),
        // every float field is an f32; print it without widening noise
        toml::Value::Float(f) => (*f as f32).to_string(),
        toml::Value::Array(items) => items
            .iter()
            .map(render_value)
            .collect::<Vec<_>>()
            .join(", "),
        other => other.to_string(),
    }
}

fn parse_like(current: &toml::Value, raw: &str) -> anyhow::Result<toml::Value> {
    let raw = raw.trim();
    Ok(match current {
        toml::Value::String(_) => toml::Value::String(raw.to_string()),
        toml::Value::Integer(_) => toml::Value::Integer(raw.parse()?),
        toml::Value::Float(_) => toml::Value::Float(raw.parse()?),
        toml::Value::Boolean(_) => toml::Value::Boolean(raw.parse()?),
        toml::Value::Array(items) => {
            let template = items.first().cloned().unwrap_or(toml::Value::String(String::new()));
            let parsed = raw
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(|part| parse_like(&template, part))
                .collect::<anyhow::Result<Vec<_>>>()?;
            toml::Value::Array(parsed)
        }
        toml::Value::Table(_) => return Err(anyhow!("cannot assign a scalar to a section")),
        toml::Value::Datetime(_) => toml::Value::Datetime(raw.parse()?),
    })
}

fn flatten(prefix: &str, node: &toml::Value, out: &mut Vec<(String, String)>) {
    match node {
        toml::Value::Table(table) => {
            for (key, child) in table {
                let path = if prefix.is_empty() {
                    key.clone()
                } else {
                    format!("{}.{}", prefix, key)
                };
                flatten(&path, child, out);
            }
        }
        leaf => out.push((prefix.to_string(), render_value(leaf))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults_match_tuned_constants() {
        let config = Config::default();
        let search = &config.search;

        assert_eq!(search.entity.min_similarity, 0.7);
        assert_eq!(search.entity.top_k, 3);
        assert_eq!(search.keyword.max_words, 32);
        assert_eq!(search.vector.default_limit, 100);
        assert_eq!(search.traversal.per_level_limit, 200);
        assert_eq!(search.episode_graph.top_episodes, 20);
        assert_eq!(search.quality.structural_threshold, 5.0);
        assert_eq!(search.quality.max_expected.episode_graph, 25.0);
        assert_eq!(search.validator.max_candidates, 20);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_hop_weights() {
        let weights = ScoringWeights::default();
        assert_eq!(weights.hop_weight(1), 2.0);
        assert_eq!(weights.hop_weight(2), 1.3);
        assert_eq!(weights.hop_weight(3), 1.0);
        assert_eq!(weights.hop_weight(4), 0.8);
        assert_eq!(weights.hop_weight(9), 0.8);
        assert_eq!(weights.hop_weight(0), 0.8);
    }

    #[test]
    fn test_get_nested_key() {
        let config = Config::default();
        assert_eq!(config.get("search.quality.gap_min_results").unwrap(), "3");
        assert_eq!(config.get("llm.default_model").unwrap(), "gpt-4o-mini");
        assert_eq!(config.get("llm.fallback_models").unwrap(), "gpt-4o");
        assert!(config.get("search.nope").is_err());
    }

    #[test]
    fn test_set_parses_existing_kind() {
        let mut config = Config::default();
        config.set("search.quality.min_confidence", "0.25").unwrap();
        assert_eq!(config.search.quality.min_confidence, 0.25);

        config.set("search.traversal.default_max_depth", "3").unwrap();
        assert_eq!(config.search.traversal.default_max_depth, 3);

        config.set("search.scoring.hop_weights", "2.5, 1.5").unwrap();
        assert_eq!(config.search.scoring.hop_weights, vec![2.5, 1.5]);

        assert!(config.set("search.traversal.default_max_depth", "deep").is_err());
    }

    #[test]
    fn test_set_rejects_invalid_band() {
        let mut config = Config::default();
        let result = config.set("search.quality.min_confidence", "0.9");
        assert!(result.is_err());
        assert_eq!(config.search.quality.min_confidence, 0.3);
    }

    #[test]
    fn test_redact_key_keeps_last_four_chars() {
        assert_eq!(redact_key("abc"), "***");
        assert_eq!(redact_key("sk-12345678"), "***5678");
        assert_eq!(redact_key("clé-secrète"), "***rète");
        assert_eq!(redact_key("ключ-доступа"), "***тупа");
    }

    #[test]
    fn test_api_key_cannot_be_set() {
        let mut config = Config::default();
        assert!(config.set("llm.api_key", "sk-secret").is_err());
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config: Config = toml::from_str(
            r#"
            [search.quality]
            min_confidence = 0.2
            "#,
        )
        .unwrap();
        assert_eq!(config.search.quality.min_confidence, 0.2);
        assert_eq!(config.search.quality.validation_ceiling, 0.7);
        assert_eq!(config.search.vector.min_similarity, 0.5);
    }

    #[test]
    fn test_list_contains_search_keys() {
        let config = Config::default();
        let entries = config.list().unwrap();
        assert!(entries.iter().any(|(k, _)| k == "search.quality.gap_ratio"));
        assert!(entries.iter().any(|(k, _)| k == "llm.api_key"));
    }
}
