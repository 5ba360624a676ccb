//! Provenance aggregation
//!
//! Folds the four strategy result sets into one candidate per episode. Each
//! statement attached to an episode appears once and records every strategy
//! that found it with that strategy's native score. Scores never live on the
//! statement itself, so one strategy's score cannot leak into another's.

use std::collections::{HashMap, HashSet};

use serde::Serialize;

use crate::config::ScoringWeights;
use crate::error::Result;

use super::episode::Episode;
use super::filter::StatementFilter;
use super::repository::{ProvenanceLink, RecallGraph};
use super::statement::Statement;
use super::strategy::{Strategy, StrategyResults};

/// One strategy's finding for one statement
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceHit {
    pub strategy: Strategy,
    pub score: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hop: Option<usize>,
}

/// A statement attached to an episode, with every strategy that found it
#[derive(Debug, Clone, PartialEq)]
pub struct AttributedStatement {
    pub statement: Statement,
    pub hits: Vec<SourceHit>,
}

impl AttributedStatement {
    pub fn hit(&self, strategy: Strategy) -> Option<&SourceHit> {
        self.hits.iter().find(|h| h.strategy == strategy)
    }

    /// Highest native score across strategies
    pub fn best_score(&self) -> f32 {
        self.hits.iter().map(|h| h.score).fold(0.0, f32::max)
    }

    fn record(&mut self, hit: SourceHit) {
        match self.hits.iter_mut().find(|h| h.strategy == hit.strategy) {
            Some(existing) if hit.score > existing.score => *existing = hit,
            Some(_) => {}
            None => self.hits.push(hit),
        }
    }
}

/// Per-strategy sub-scores of one episode
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubScores {
    pub episode_graph: f32,
    pub bfs: f32,
    pub vector: f32,
    pub bm25: f32,
}

/// One episode with everything the strategies found for it
#[derive(Debug, Clone, PartialEq)]
pub struct EpisodeCandidate {
    pub episode: Episode,
    pub statements: Vec<AttributedStatement>,
    pub scores: SubScores,
}

impl EpisodeCandidate {
    fn new(episode: Episode) -> Self {
        Self {
            episode,
            statements: Vec::new(),
            scores: SubScores::default(),
        }
    }

    fn attach(&mut self, statement: &Statement, hit: SourceHit) {
        match self
            .statements
            .iter_mut()
            .find(|s| s.statement.id == statement.id)
        {
            Some(existing) => existing.record(hit),
            None => self.statements.push(AttributedStatement {
                statement: statement.clone(),
                hits: vec![hit],
            }),
        }
    }

    fn mean_score(&self, strategy: Strategy, weight: impl Fn(&SourceHit) -> f32) -> f32 {
        let values: Vec<f32> = self
            .statements
            .iter()
            .filter_map(|s| s.hit(strategy))
            .map(weight)
            .collect();
        if values.is_empty() {
            0.0
        } else {
            values.iter().sum::<f32>() / values.len() as f32
        }
    }
}

/// Fetch the episodes citing every statement found by a statement-level strategy
pub async fn hydrate_provenance(
    graph: &dyn RecallGraph,
    results: &StrategyResults,
    filter: &StatementFilter,
) -> Result<Vec<ProvenanceLink>> {
    let mut seen = HashSet::new();
    let statement_ids: Vec<String> = results
        .traversal
        .iter()
        .map(|h| &h.statement.id)
        .chain(results.vector.iter().map(|h| &h.statement.id))
        .chain(results.keyword.iter().map(|h| &h.statement.id))
        .filter(|id| seen.insert(*id))
        .cloned()
        .collect();

    if statement_ids.is_empty() {
        return Ok(Vec::new());
    }
    graph.episodes_for_statements(&statement_ids, filter).await
}

/// Merges strategy results into per-episode candidates
pub struct ProvenanceAggregator<'a> {
    weights: &'a ScoringWeights,
}

impl<'a> ProvenanceAggregator<'a> {
    pub fn new(weights: &'a ScoringWeights) -> Self {
        Self { weights }
    }

    /// Build one candidate per distinct episode
    ///
    /// `provenance` links statements from the traversal, vector and keyword
    /// results to their citing episodes. Candidates keep first-seen order.
    pub fn aggregate(
        &self,
        results: &StrategyResults,
        provenance: &[ProvenanceLink],
    ) -> Vec<EpisodeCandidate> {
        let mut candidates: Vec<EpisodeCandidate> = Vec::new();
        let mut index: HashMap<String, usize> = HashMap::new();

        let mut slot = |episode: &Episode, candidates: &mut Vec<EpisodeCandidate>| -> usize {
            *index.entry(episode.id.clone()).or_insert_with(|| {
                candidates.push(EpisodeCandidate::new(episode.clone()));
                candidates.len() - 1
            })
        };

        for hit in &results.episode_graph {
            let at = slot(&hit.episode, &mut candidates);
            let candidate = &mut candidates[at];
            candidate.scores.episode_graph = candidate.scores.episode_graph.max(hit.score);
            for scored in &hit.statements {
                candidate.attach(
                    &scored.statement,
                    SourceHit {
                        strategy: Strategy::EpisodeGraph,
                        score: scored.similarity,
                        hop: None,
                    },
                );
            }
        }

        let mut citing: HashMap<&str, Vec<&Episode>> = HashMap::new();
        for link in provenance {
            let episodes = citing.entry(link.statement_id.as_str()).or_default();
            if !episodes.iter().any(|e| e.id == link.episode.id) {
                episodes.push(&link.episode);
            }
        }

        let statement_hits = results
            .traversal
            .iter()
            .map(|h| {
                (
                    &h.statement,
                    SourceHit {
                        strategy: Strategy::Traversal,
                        score: h.similarity,
                        hop: Some(h.hop),
                    },
                )
            })
            .chain(results.vector.iter().map(|h| {
                (
                    &h.statement,
                    SourceHit {
                        strategy: Strategy::Vector,
                        score: h.similarity,
                        hop: None,
                    },
                )
            }))
            .chain(results.keyword.iter().map(|h| {
                (
                    &h.statement,
                    SourceHit {
                        strategy: Strategy::Keyword,
                        score: h.score,
                        hop: None,
                    },
                )
            }));

        for (statement, hit) in statement_hits {
            let Some(episodes) = citing.get(statement.id.as_str()) else {
                continue;
            };
            for episode in episodes {
                let at = slot(*episode, &mut candidates);
                candidates[at].attach(statement, hit.clone());
            }
        }

        for candidate in &mut candidates {
            candidate.scores.bfs = candidate.mean_score(Strategy::Traversal, |h| {
                h.score * self.weights.hop_weight(h.hop.unwrap_or(1))
            });
            candidate.scores.vector = candidate.mean_score(Strategy::Vector, |h| h.score);
            candidate.scores.bm25 = candidate.mean_score(Strategy::Keyword, |h| h.score);
        }

        candidates
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::recall::repository::KeywordHit;
    use crate::domain::recall::statement::ScoredStatement;
    use crate::domain::recall::strategy::{EpisodeGraphHit, TraversalHit};
    use chrono::{TimeZone, Utc};

    fn statement(id: &str) -> Statement {
        let at = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        Statement::new(id, format!("fact {}", id), "a", "rel", "b", "alice", at)
    }

    fn episode(id: &str) -> Episode {
        let at = Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap();
        Episode::new(id, format!("episode {}", id), "alice", at)
    }

    fn link(statement_id: &str, episode_id: &str) -> ProvenanceLink {
        ProvenanceLink {
            statement_id: statement_id.to_string(),
            episode: episode(episode_id),
        }
    }

    #[test]
    fn test_statement_found_by_several_strategies_is_merged() {
        let weights = ScoringWeights::default();
        let results = StrategyResults {
            vector: vec![ScoredStatement {
                statement: statement("s1"),
                similarity: 0.6,
            }],
            traversal: vec![TraversalHit {
                statement: statement("s1"),
                similarity: 0.55,
                hop: 2,
            }],
            keyword: vec![KeywordHit {
                statement: statement("s1"),
                score: 1.5,
                provenance_count: 1,
            }],
            ..Default::default()
        };

        let candidates =
            ProvenanceAggregator::new(&weights).aggregate(&results, &[link("s1", "ep1")]);

        assert_eq!(candidates.len(), 1);
        let candidate = &candidates[0];
        assert_eq!(candidate.statements.len(), 1);
        assert_eq!(candidate.statements[0].hits.len(), 3);
        assert!((candidate.scores.bfs - 0.55 * 1.3).abs() < 1e-6);
        assert!((candidate.scores.vector - 0.6).abs() < 1e-6);
        assert!((candidate.scores.bm25 - 1.5).abs() < 1e-6);
        assert_eq!(candidate.scores.episode_graph, 0.0);
    }

    #[test]
    fn test_statement_cited_by_two_episodes_attaches_to_both() {
        let weights = ScoringWeights::default();
        let results = StrategyResults {
            vector: vec![ScoredStatement {
                statement: statement("s1"),
                similarity: 0.8,
            }],
            ..Default::default()
        };
        let links = [link("s1", "ep1"), link("s1", "ep2"), link("s1", "ep1")];

        let candidates = ProvenanceAggregator::new(&weights).aggregate(&results, &links);
        let ids: Vec<&str> = candidates.iter().map(|c| c.episode.id.as_str()).collect();
        assert_eq!(ids, vec!["ep1", "ep2"]);
        assert!(candidates.iter().all(|c| c.statements.len() == 1));
    }

    #[test]
    fn test_episode_graph_hit_keeps_episode_level_score() {
        let weights = ScoringWeights::default();
        let results = StrategyResults {
            episode_graph: vec![EpisodeGraphHit {
                episode: episode("ep1"),
                score: 4.2,
                entity_match_count: 1,
                total_statements: 2,
                avg_relevance: 0.7,
                statements: vec![ScoredStatement {
                    statement: statement("s1"),
                    similarity: 0.7,
                }],
            }],
            vector: vec![ScoredStatement {
                statement: statement("s1"),
                similarity: 0.7,
            }],
            ..Default::default()
        };

        let candidates =
            ProvenanceAggregator::new(&weights).aggregate(&results, &[link("s1", "ep1")]);
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].scores.episode_graph, 4.2);
        assert_eq!(candidates[0].statements.len(), 1);
        assert_eq!(candidates[0].statements[0].hits.len(), 2);
    }

    #[test]
    fn test_unlinked_statements_are_dropped() {
        let weights = ScoringWeights::default();
        let results = StrategyResults {
            vector: vec![ScoredStatement {
                statement: statement("orphan"),
                similarity: 0.9,
            }],
            ..Default::default()
        };
        assert!(
            ProvenanceAggregator::new(&weights)
                .aggregate(&results, &[])
                .is_empty()
        );
    }
}
