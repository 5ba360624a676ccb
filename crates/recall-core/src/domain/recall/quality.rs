//! Adaptive quality filtering
//!
//! The threshold depends on which kinds of evidence exist at all:
//!
//! | Evidence present               | Tier       | Threshold |
//! |--------------------------------|------------|-----------|
//! | episode graph or traversal     | structural | 5.0       |
//! | vector only                    | semantic   | 1.0       |
//! | keyword only                   | keyword    | 0.3       |
//! | nothing                        | none       | empty     |
//!
//! The caller's `quality_threshold` scales the kept set's threshold relative to
//! the structural default. Confidence is measured on the set passing the
//! unscaled tier threshold, so raising the caller threshold never changes the
//! confidence decision and can only shrink the result.

use serde::Serialize;
use tracing::debug;

use crate::config::{QualityConfig, ScoringWeights};

use super::scoring::RankedEpisode;
use super::strategy::Strategy;

/// Strongest kind of evidence among the candidates
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum EvidenceTier {
    Structural,
    Semantic,
    Keyword,
    #[default]
    None,
}

/// What the filter decided and why
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QualityReport {
    pub tier: EvidenceTier,
    /// Threshold applied to the kept set
    pub threshold: f32,
    pub dominant_source: Option<Strategy>,
    pub confidence: f32,
    /// Number of candidates passing the threshold before gap detection
    pub above_threshold: usize,
    /// Rank at which a score cliff cut the list
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gap_cut_at: Option<usize>,
    /// Whether the result was emptied for low confidence
    pub failed_closed: bool,
}

#[derive(Debug, Clone)]
pub struct QualityOutcome {
    pub episodes: Vec<RankedEpisode>,
    pub report: QualityReport,
}

pub struct QualityFilter<'a> {
    config: &'a QualityConfig,
    weights: &'a ScoringWeights,
}

impl<'a> QualityFilter<'a> {
    pub fn new(config: &'a QualityConfig, weights: &'a ScoringWeights) -> Self {
        Self { config, weights }
    }

    pub fn tier_of(ranked: &[RankedEpisode]) -> EvidenceTier {
        let any = |f: fn(&RankedEpisode) -> f32| ranked.iter().any(|r| f(r) > 0.0);
        if any(|r| r.scores().episode_graph) || any(|r| r.scores().bfs) {
            EvidenceTier::Structural
        } else if any(|r| r.scores().vector) {
            EvidenceTier::Semantic
        } else if any(|r| r.scores().bm25) {
            EvidenceTier::Keyword
        } else {
            EvidenceTier::None
        }
    }

    fn tier_threshold(&self, tier: EvidenceTier) -> Option<f32> {
        match tier {
            EvidenceTier::Structural => Some(self.config.structural_threshold),
            EvidenceTier::Semantic => Some(self.config.vector_threshold),
            EvidenceTier::Keyword => Some(self.config.keyword_threshold),
            EvidenceTier::None => None,
        }
    }

    /// Apply threshold, gap detection and the confidence gate to ranked candidates
    pub fn apply(&self, ranked: Vec<RankedEpisode>, quality_threshold: f32) -> QualityOutcome {
        let tier = Self::tier_of(&ranked);
        let Some(base_threshold) = self.tier_threshold(tier) else {
            return QualityOutcome {
                episodes: Vec::new(),
                report: QualityReport {
                    failed_closed: !ranked.is_empty(),
                    ..Default::default()
                },
            };
        };

        let scale = if self.config.structural_threshold > 0.0 {
            quality_threshold / self.config.structural_threshold
        } else {
            1.0
        };
        let threshold = base_threshold * scale;

        let reference_len = ranked.iter().take_while(|r| r.score >= base_threshold).count();
        let reference_len = reference_len.min(self.gap_cutoff(&ranked[..reference_len]));
        let reference = &ranked[..reference_len];
        let dominant_source = self.dominant_source(reference);
        let confidence = dominant_source
            .map(|source| self.confidence(reference, source))
            .unwrap_or(0.0);

        let above_threshold = ranked.iter().take_while(|r| r.score >= threshold).count();
        let keep = self.gap_cutoff(&ranked[..above_threshold]);
        let gap_cut_at = (keep < above_threshold).then_some(keep);

        let failed_closed = confidence < self.config.min_confidence;
        let mut episodes = ranked;
        episodes.truncate(if failed_closed { 0 } else { keep });

        debug!(
            ?tier,
            threshold,
            above_threshold,
            kept = episodes.len(),
            confidence,
            failed_closed,
            "Quality filter applied"
        );

        QualityOutcome {
            episodes,
            report: QualityReport {
                tier,
                threshold,
                dominant_source,
                confidence,
                above_threshold,
                gap_cut_at,
                failed_closed,
            },
        }
    }

    /// Number of leading candidates to keep before the first score cliff
    pub fn gap_cutoff(&self, ranked: &[RankedEpisode]) -> usize {
        let scores: Vec<f32> = ranked.iter().map(|r| r.score).collect();
        gap_cutoff(&scores, self.config.gap_min_results, self.config.gap_ratio)
    }

    /// Source contributing the most weighted score across the set
    ///
    /// Equal contributions resolve toward the more trusted source.
    fn dominant_source(&self, set: &[RankedEpisode]) -> Option<Strategy> {
        let w = self.weights;
        let totals = [
            (Strategy::EpisodeGraph, set.iter().map(|r| r.scores().episode_graph * w.episode_graph).sum::<f32>()),
            (Strategy::Traversal, set.iter().map(|r| r.scores().bfs * w.bfs).sum::<f32>()),
            (Strategy::Vector, set.iter().map(|r| r.scores().vector * w.vector).sum::<f32>()),
            (Strategy::Keyword, set.iter().map(|r| r.scores().bm25 * w.bm25).sum::<f32>()),
        ];

        let mut best: Option<(Strategy, f32)> = None;
        for (source, total) in totals {
            if total > 0.0 && best.is_none_or(|(_, current)| total > current) {
                best = Some((source, total));
            }
        }
        best.map(|(source, _)| source)
    }

    fn confidence(&self, set: &[RankedEpisode], source: Strategy) -> f32 {
        if set.is_empty() {
            return 0.0;
        }
        let max_expected = match source {
            Strategy::EpisodeGraph => self.config.max_expected.episode_graph,
            Strategy::Traversal => self.config.max_expected.bfs,
            Strategy::Vector => self.config.max_expected.vector,
            Strategy::Keyword => self.config.max_expected.bm25,
        };
        let avg = set.iter().map(|r| r.score).sum::<f32>() / set.len() as f32;
        (avg / max_expected).clamp(0.0, 1.0)
    }
}

/// Cut at the first consecutive relative drop greater than `ratio`
///
/// The first `min_results` scores are always kept. Returns how many leading
/// scores survive.
pub fn gap_cutoff(scores: &[f32], min_results: usize, ratio: f32) -> usize {
    for i in min_results.max(1)..scores.len() {
        let previous = scores[i - 1];
        if previous > 0.0 && (previous - scores[i]) / previous > ratio {
            return i;
        }
    }
    scores.len()
}
