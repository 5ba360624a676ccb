//! Search responses and their renderings
//!
//! A [`SearchResponse`] carries the ranked episodes, the deduplicated supporting
//! facts and diagnostics. It renders either as structured JSON-ready data or
//! as a markdown digest for prompt injection.

use std::collections::HashMap;
use std::fmt::Write as _;

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::aggregate::SubScores;
use super::compaction::RecallCandidate;
use super::quality::EvidenceTier;
use super::strategy::{Strategy, StrategyCounts};
use super::validator::ValidationStatus;

/// A supporting fact, ranked by its best native score
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecalledFact {
    pub statement_id: String,
    pub fact: String,
    pub valid_at: DateTime<Utc>,
    pub invalid_at: Option<DateTime<Utc>>,
    pub relevant_score: f32,
}

/// One recalled episode or compact session summary
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecalledEpisode {
    pub id: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
    pub space_ids: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    pub score: f32,
    pub sub_scores: SubScores,
    /// Episodes a compact summary stands in for
    #[serde(skip_serializing_if = "Option::is_none")]
    pub compacted_from: Option<usize>,
    pub facts: Vec<RecalledFact>,
}

/// Why a response came back empty
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum EmptyReason {
    /// No strategy produced anything
    Starved,
    /// Candidates existed but confidence was too low
    LowConfidence,
    /// Confidence was fine but nothing cleared the caller's threshold
    BelowThreshold,
    /// The validator selected none of the candidates
    ValidatorRejected,
}

/// How a search arrived at its result
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchDiagnostics {
    pub strategy_counts: StrategyCounts,
    pub resolved_entities: usize,
    pub candidates: usize,
    pub tier: EvidenceTier,
    pub threshold: f32,
    pub dominant_source: Option<Strategy>,
    pub confidence: f32,
    pub validation: ValidationStatus,
    pub latency_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub empty_reason: Option<EmptyReason>,
    /// Strategies that errored and contributed nothing
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub failed_strategies: Vec<Strategy>,
    /// Entity lookup errored, so traversal and episode graph ran without entities
    pub entity_resolution_failed: bool,
}

impl SearchDiagnostics {
    /// Whether part of the retrieval failed, leaving the result possibly incomplete
    pub fn is_degraded(&self) -> bool {
        self.entity_resolution_failed || !self.failed_strategies.is_empty()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchResponse {
    pub episodes: Vec<RecalledEpisode>,
    pub facts: Vec<RecalledFact>,
    pub confidence: f32,
    pub diagnostics: SearchDiagnostics,
}

impl SearchResponse {
    pub fn is_empty(&self) -> bool {
        self.episodes.is_empty()
    }

    pub fn to_structured(&self) -> StructuredRecall {
        StructuredRecall {
            episodes: self
                .episodes
                .iter()
                .map(|e| StructuredEpisode {
                    content: e.content.clone(),
                    created_at: e.created_at,
                    space_ids: e.space_ids.clone(),
                })
                .collect(),
            facts: self
                .facts
                .iter()
                .map(|f| StructuredFact {
                    fact: f.fact.clone(),
                    valid_at: f.valid_at,
                    invalid_at: f.invalid_at,
                    relevant_score: f.relevant_score,
                })
                .collect(),
        }
    }

    pub fn to_digest(&self) -> String {
        render_digest(&self.episodes, &self.facts)
    }

    /// Render in the form requested by the `structured` option
    pub fn render(&self, structured: bool) -> RecallOutput {
        if structured {
            RecallOutput::Structured(self.to_structured())
        } else {
            RecallOutput::Digest(self.to_digest())
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StructuredEpisode {
    pub content: String,
    pub created_at: DateTime<Utc>,
    pub space_ids: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StructuredFact {
    pub fact: String,
    pub valid_at: DateTime<Utc>,
    pub invalid_at: Option<DateTime<Utc>>,
    pub relevant_score: f32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StructuredRecall {
    pub episodes: Vec<StructuredEpisode>,
    pub facts: Vec<StructuredFact>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum RecallOutput {
    Structured(StructuredRecall),
    Digest(String),
}

/// Convert final candidates into response episodes
pub fn recalled_episodes(candidates: &[RecallCandidate]) -> Vec<RecalledEpisode> {
    candidates
        .iter()
        .map(|c| {
            let episode = &c.ranked.candidate.episode;
            let mut facts: Vec<RecalledFact> = c
                .ranked
                .candidate
                .statements
                .iter()
                .map(|s| RecalledFact {
                    statement_id: s.statement.id.clone(),
                    fact: s.statement.fact.clone(),
                    valid_at: s.statement.valid_at,
                    invalid_at: s.statement.invalid_at,
                    relevant_score: s.best_score(),
                })
                .collect();
            sort_facts(&mut facts);

            RecalledEpisode {
                id: episode.id.clone(),
                content: episode.display_content().to_string(),
                created_at: episode.created_at,
                space_ids: episode.space_ids.clone(),
                session_id: episode.session_id.clone(),
                score: c.ranked.score,
                sub_scores: c.ranked.candidate.scores,
                compacted_from: c.compacted_from,
                facts,
            }
        })
        .collect()
}

/// Facts across all episodes, one per statement, best score kept
pub fn collect_facts(episodes: &[RecalledEpisode]) -> Vec<RecalledFact> {
    let mut best: HashMap<&str, &RecalledFact> = HashMap::new();
    for fact in episodes.iter().flat_map(|e| e.facts.iter()) {
        match best.get(fact.statement_id.as_str()) {
            Some(existing) if existing.relevant_score >= fact.relevant_score => {}
            _ => {
                best.insert(&fact.statement_id, fact);
            }
        }
    }
    let mut facts: Vec<RecalledFact> = best.into_values().cloned().collect();
    sort_facts(&mut facts);
    facts
}

fn sort_facts(facts: &mut [RecalledFact]) {
    facts.sort_by(|a, b| {
        b.relevant_score
            .total_cmp(&a.relevant_score)
            .then_with(|| a.statement_id.cmp(&b.statement_id))
    });
}

/// Markdown digest of recalled context and key facts
pub fn render_digest(episodes: &[RecalledEpisode], facts: &[RecalledFact]) -> String {
    if episodes.is_empty() {
        return "No relevant context found.".to_string();
    }

    let mut out = String::from("## Recalled context\n");
    for episode in episodes {
        let label = match episode.compacted_from {
            Some(count) => format!(
                "### {} (session summary, {} episodes)",
                episode.created_at.format("%Y-%m-%d"),
                count
            ),
            None => format!("### {}", episode.created_at.format("%Y-%m-%d %H:%M")),
        };
        let _ = write!(out, "\n{}\n{}\n", label, episode.content.trim());
    }

    if !facts.is_empty() {
        out.push_str("\n## Key facts\n");
        for fact in facts {
            match fact.invalid_at {
                Some(invalid_at) => {
                    let _ = writeln!(
                        out,
                        "- {} (valid {} to {})",
                        fact.fact,
                        fact.valid_at.format("%Y-%m-%d"),
                        invalid_at.format("%Y-%m-%d")
                    );
                }
                None => {
                    let _ = writeln!(
                        out,
                        "- {} (since {})",
                        fact.fact,
                        fact.valid_at.format("%Y-%m-%d")
                    );
                }
            }
        }
    }

    out
}
