//! Episodes and compacted sessions
//!
//! An episode is one captured unit of raw context (a conversation turn or a
//! document chunk). Statements extracted from it are linked back as provenance.
//! A run of episodes sharing a session id may be summarized into a single
//! [`CompactedSession`] that stands in for them at recall time.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A captured unit of raw context
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Episode {
    pub id: String,
    /// Enriched content produced at ingestion time
    pub content: String,
    /// Verbatim text as it was captured
    #[serde(default)]
    pub original_content: String,
    pub created_at: DateTime<Utc>,
    pub valid_at: DateTime<Utc>,
    #[serde(default)]
    pub source: String,
    pub owner_id: String,
    #[serde(default)]
    pub space_ids: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
}

impl Episode {
    pub fn new(
        id: impl Into<String>,
        content: impl Into<String>,
        owner_id: impl Into<String>,
        created_at: DateTime<Utc>,
    ) -> Self {
        let content = content.into();
        Self {
            id: id.into(),
            original_content: content.clone(),
            content,
            created_at,
            valid_at: created_at,
            source: String::new(),
            owner_id: owner_id.into(),
            space_ids: Vec::new(),
            session_id: None,
        }
    }

    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = source.into();
        self
    }

    pub fn in_spaces(mut self, space_ids: Vec<String>) -> Self {
        self.space_ids = space_ids;
        self
    }

    /// Text to show for this episode, preferring the enriched form
    pub fn display_content(&self) -> &str {
        if self.content.trim().is_empty() {
            &self.original_content
        } else {
            &self.content
        }
    }
}

/// Summary record that replaces every episode of one session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompactedSession {
    pub id: String,
    pub session_id: String,
    pub owner_id: String,
    pub summary: String,
    pub episode_count: usize,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    #[serde(default)]
    pub space_ids: Vec<String>,
}
