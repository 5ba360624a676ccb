//! Owner, temporal and space scoping shared by every graph query

use chrono::{DateTime, Utc};

use super::episode::Episode;
use super::statement::Statement;

/// Scope applied to every statement and episode a search may see
#[derive(Debug, Clone, PartialEq)]
pub struct StatementFilter {
    pub owner_id: String,
    /// Point in time the facts must hold at
    pub valid_at: DateTime<Utc>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: DateTime<Utc>,
    pub include_invalidated: bool,
    /// Empty means every space
    pub space_ids: Vec<String>,
}

impl StatementFilter {
    /// Filter for one owner as of `now`
    pub fn new(owner_id: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            owner_id: owner_id.into(),
            valid_at: now,
            start_time: None,
            end_time: now,
            include_invalidated: true,
            space_ids: Vec::new(),
        }
    }

    /// Effective time statements are judged against
    pub fn horizon(&self) -> DateTime<Utc> {
        self.valid_at.min(self.end_time)
    }

    pub fn admits_statement(&self, statement: &Statement) -> bool {
        let horizon = self.horizon();
        statement.owner_id == self.owner_id
            && statement.valid_at <= horizon
            && self.start_time.is_none_or(|start| start <= statement.valid_at)
            && (self.include_invalidated
                || statement.invalid_at.is_none_or(|invalid_at| invalid_at > horizon))
            && self.admits_spaces(&statement.space_ids)
    }

    pub fn admits_episode(&self, episode: &Episode) -> bool {
        episode.owner_id == self.owner_id
            && episode.created_at <= self.end_time
            && self.start_time.is_none_or(|start| start <= episode.created_at)
            && self.admits_spaces(&episode.space_ids)
    }

    fn admits_spaces(&self, space_ids: &[String]) -> bool {
        self.space_ids.is_empty() || space_ids.iter().any(|id| self.space_ids.contains(id))
    }
}
