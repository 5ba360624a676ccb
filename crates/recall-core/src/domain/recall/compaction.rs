//! Compact-session substitution
//!
//! Episodes belonging to a session that has a compact summary are folded into
//! one record holding the summary, placed at the rank of the best member.

use std::collections::HashMap;

use tracing::{debug, warn};

use super::aggregate::AttributedStatement;
use super::episode::{CompactedSession, Episode};
use super::repository::RecallGraph;
use super::scoring::RankedEpisode;

/// A ranked result, possibly standing in for a whole session
#[derive(Debug, Clone, PartialEq)]
pub struct RecallCandidate {
    pub ranked: RankedEpisode,
    /// Number of episodes the compact record replaces
    pub compacted_from: Option<usize>,
}

impl From<RankedEpisode> for RecallCandidate {
    fn from(ranked: RankedEpisode) -> Self {
        Self {
            ranked,
            compacted_from: None,
        }
    }
}

/// Replace session members with their compact record
///
/// A failed lookup leaves the episodes untouched.
pub async fn substitute_compacted(
    graph: &dyn RecallGraph,
    owner_id: &str,
    episodes: Vec<RankedEpisode>,
) -> Vec<RecallCandidate> {
    let mut session_ids: Vec<String> = episodes
        .iter()
        .filter_map(|r| r.candidate.episode.session_id.clone())
        .collect();
    session_ids.sort();
    session_ids.dedup();

    if session_ids.is_empty() {
        return episodes.into_iter().map(RecallCandidate::from).collect();
    }

    let sessions = match graph.compacted_sessions(&session_ids, owner_id).await {
        Ok(sessions) => sessions,
        Err(e) => {
            warn!(error = %e, "Compacted session lookup failed, returning raw episodes");
            return episodes.into_iter().map(RecallCandidate::from).collect();
        }
    };

    let replaced = sessions.len();
    let result = fold_sessions(episodes, sessions);
    if replaced > 0 {
        debug!(sessions = replaced, results = result.len(), "Substituted compacted sessions");
    }
    result
}

/// Pure folding step, separated for testing
pub fn fold_sessions(
    episodes: Vec<RankedEpisode>,
    sessions: Vec<CompactedSession>,
) -> Vec<RecallCandidate> {
    let by_session: HashMap<String, CompactedSession> = sessions
        .into_iter()
        .map(|s| (s.session_id.clone(), s))
        .collect();

    let mut result: Vec<RecallCandidate> = Vec::new();
    let mut slots: HashMap<String, usize> = HashMap::new();

    for ranked in episodes {
        let compact = ranked
            .candidate
            .episode
            .session_id
            .as_ref()
            .and_then(|id| by_session.get(id));
        let Some(compact) = compact else {
            result.push(ranked.into());
            continue;
        };

        match slots.get(&compact.session_id).copied() {
            Some(at) => merge_statements(&mut result[at].ranked, ranked.candidate.statements),
            None => {
                slots.insert(compact.session_id.clone(), result.len());
                result.push(RecallCandidate {
                    ranked: into_compact(ranked, compact),
                    compacted_from: Some(compact.episode_count),
                });
            }
        }
    }

    result
}

fn into_compact(mut best: RankedEpisode, compact: &CompactedSession) -> RankedEpisode {
    let member = &best.candidate.episode;
    let space_ids = if compact.space_ids.is_empty() {
        member.space_ids.clone()
    } else {
        compact.space_ids.clone()
    };

    let mut episode = Episode::new(
        compact.id.clone(),
        compact.summary.clone(),
        compact.owner_id.clone(),
        compact.end_time,
    )
    .with_session(compact.session_id.clone())
    .with_source(member.source.clone())
    .in_spaces(space_ids);
    episode.valid_at = compact.start_time;

    best.candidate.episode = episode;
    best
}

fn merge_statements(target: &mut RankedEpisode, statements: Vec<AttributedStatement>) {
    for incoming in statements {
        let existing = target
            .candidate
            .statements
            .iter_mut()
            .find(|s| s.statement.id == incoming.statement.id);
        match existing {
            Some(current) if incoming.best_score() > current.best_score() => *current = incoming,
            Some(_) => {}
            None => target.candidate.statements.push(incoming),
        }
    }
}
