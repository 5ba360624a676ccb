//! Caller-facing search options

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::SearchConfig;
use crate::error::{Error, Result};

use super::filter::StatementFilter;

/// Final ordering of recalled episodes
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortBy {
    #[default]
    Relevance,
    Recency,
}

impl std::str::FromStr for SortBy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "relevance" => Ok(Self::Relevance),
            "recency" => Ok(Self::Recency),
            other => Err(Error::InvalidInput(format!(
                "unknown sort order '{}', expected relevance or recency",
                other
            ))),
        }
    }
}

/// Options accepted by a search
///
/// Unset timestamps resolve to the moment the search starts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SearchOptions {
    pub limit: usize,
    pub max_bfs_depth: usize,
    pub valid_at: Option<DateTime<Utc>>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub include_invalidated: bool,
    pub space_ids: Vec<String>,
    pub structured: bool,
    #[serde(rename = "useLLMValidation")]
    pub use_llm_validation: bool,
    pub quality_threshold: f32,
    #[serde(rename = "maxEpisodesForLLM")]
    pub max_episodes_for_llm: usize,
    pub sort_by: SortBy,
    /// Tag copied into the audit record
    pub source: String,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            limit: 100,
            max_bfs_depth: 4,
            valid_at: None,
            start_time: None,
            end_time: None,
            include_invalidated: true,
            space_ids: Vec::new(),
            structured: false,
            use_llm_validation: true,
            quality_threshold: 5.0,
            max_episodes_for_llm: 20,
            sort_by: SortBy::Relevance,
            source: "search".to_string(),
        }
    }
}

impl SearchOptions {
    /// Defaults taken from a search configuration
    pub fn from_config(config: &SearchConfig) -> Self {
        Self {
            limit: config.vector.default_limit,
            max_bfs_depth: config.traversal.default_max_depth,
            quality_threshold: config.quality.structural_threshold,
            max_episodes_for_llm: config.validator.max_candidates,
            ..Self::default()
        }
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    pub fn with_quality_threshold(mut self, threshold: f32) -> Self {
        self.quality_threshold = threshold;
        self
    }

    pub fn with_valid_at(mut self, valid_at: DateTime<Utc>) -> Self {
        self.valid_at = Some(valid_at);
        self
    }

    pub fn without_validation(mut self) -> Self {
        self.use_llm_validation = false;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.limit == 0 {
            return Err(Error::InvalidInput("limit must be at least 1".to_string()));
        }
        if !self.quality_threshold.is_finite() || self.quality_threshold < 0.0 {
            return Err(Error::InvalidInput(
                "qualityThreshold must be a non-negative number".to_string(),
            ));
        }
        if let (Some(start), Some(end)) = (self.start_time, self.end_time) {
            if start > end {
                return Err(Error::InvalidInput(
                    "startTime must not be after endTime".to_string(),
                ));
            }
        }
        Ok(())
    }

    /// Resolve the graph filter for one owner at `now`
    pub fn filter_for(&self, owner_id: &str, now: DateTime<Utc>) -> StatementFilter {
        StatementFilter {
            owner_id: owner_id.to_string(),
            valid_at: self.valid_at.unwrap_or(now),
            start_time: self.start_time,
            end_time: self.end_time.unwrap_or(now),
            include_invalidated: self.include_invalidated,
            space_ids: self.space_ids.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let options = SearchOptions::default();
        assert_eq!(options.limit, 100);
        assert_eq!(options.max_bfs_depth, 4);
        assert!(options.include_invalidated);
        assert!(options.use_llm_validation);
        assert_eq!(options.quality_threshold, 5.0);
        assert_eq!(options.max_episodes_for_llm, 20);
        assert_eq!(options.source, "search");
    }

    #[test]
    fn test_deserialize_partial_camel_case() {
        let raw = r#"{"limit": 5, "useLLMValidation": false, "spaceIds": ["work"], "sortBy": "recency"}"#;
        let options: SearchOptions = serde_json::from_str(raw).unwrap();
        assert_eq!(options.limit, 5);
        assert!(!options.use_llm_validation);
        assert_eq!(options.space_ids, vec!["work".to_string()]);
        assert_eq!(options.sort_by, SortBy::Recency);
        assert_eq!(options.max_bfs_depth, 4);
    }

    #[test]
    fn test_filter_resolves_now() {
        let now = Utc::now();
        let filter = SearchOptions::default().filter_for("alice", now);
        assert_eq!(filter.valid_at, now);
        assert_eq!(filter.end_time, now);
        assert!(filter.start_time.is_none());
    }

    #[test]
    fn test_validate() {
        assert!(SearchOptions::default().validate().is_ok());
        assert!(SearchOptions::default().with_limit(0).validate().is_err());
        assert!(SearchOptions::default().with_quality_threshold(-1.0).validate().is_err());
    }

    #[test]
    fn test_sort_by_parse() {
        assert_eq!("Recency".parse::<SortBy>().unwrap(), SortBy::Recency);
        assert!("oldest".parse::<SortBy>().is_err());
    }
}
