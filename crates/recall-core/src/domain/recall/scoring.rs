//! Hierarchical composite scoring
//!
//! ```text
//! base      = episode_graph * 5.0 + bfs * 3.0 + vector * 1.5 + bm25 * 0.2
//! composite = base * (1 + ln(1 + statement_count) * 0.3)
//! ```
//!
//! The weights encode a strict trust ordering: structural graph evidence over
//! guided traversal over semantic similarity over keyword overlap.

use std::cmp::Ordering;

use crate::config::ScoringWeights;

use super::aggregate::{EpisodeCandidate, SubScores};

/// A candidate with its composite score
#[derive(Debug, Clone, PartialEq)]
pub struct RankedEpisode {
    pub candidate: EpisodeCandidate,
    pub score: f32,
}

impl RankedEpisode {
    pub fn id(&self) -> &str {
        &self.candidate.episode.id
    }

    pub fn scores(&self) -> &SubScores {
        &self.candidate.scores
    }
}

pub struct HierarchicalScorer<'a> {
    weights: &'a ScoringWeights,
}

impl<'a> HierarchicalScorer<'a> {
    pub fn new(weights: &'a ScoringWeights) -> Self {
        Self { weights }
    }

    /// Weighted sum of sub-scores before the concentration bonus
    pub fn base_score(&self, scores: &SubScores) -> f32 {
        scores.episode_graph * self.weights.episode_graph
            + scores.bfs * self.weights.bfs
            + scores.vector * self.weights.vector
            + scores.bm25 * self.weights.bm25
    }

    pub fn composite(&self, scores: &SubScores, statement_count: usize) -> f32 {
        let bonus = 1.0 + (1.0 + statement_count as f32).ln() * self.weights.concentration;
        self.base_score(scores) * bonus
    }

    /// Score every candidate and sort best first
    ///
    /// Ties fall back to newest episode, then id, so ordering is total.
    pub fn rank(&self, candidates: Vec<EpisodeCandidate>) -> Vec<RankedEpisode> {
        let mut ranked: Vec<RankedEpisode> = candidates
            .into_iter()
            .map(|candidate| RankedEpisode {
                score: self.composite(&candidate.scores, candidate.statements.len()),
                candidate,
            })
            .collect();
        ranked.sort_by(compare_ranked);
        ranked
    }
}

pub(crate) fn compare_ranked(a: &RankedEpisode, b: &RankedEpisode) -> Ordering {
    b.score
        .total_cmp(&a.score)
        .then_with(|| b.candidate.episode.created_at.cmp(&a.candidate.episode.created_at))
        .then_with(|| a.id().cmp(b.id()))
}
