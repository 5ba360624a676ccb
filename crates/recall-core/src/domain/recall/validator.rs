//! Language-model relevance validation for borderline results
//!
//! Only consulted when confidence falls inside the uncertain band. The model
//! returns the indices of episodes that directly answer the query inside an
//! `<output>` block. Parsing has three explicit outcomes: a clean selection,
//! a clean rejection of everything, or a parse error which callers treat as
//! "keep all candidates" and log.

use std::fmt::Write as _;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::ValidatorConfig;
use crate::llm::CompletionProvider;

use super::aggregate::AttributedStatement;
use super::scoring::RankedEpisode;

const SYSTEM_PROMPT: &str = "You judge whether retrieved memories answer a user's query. \
Select only episodes that directly answer or are essential context for the query. \
Returning no episodes is a valid answer when none are relevant. \
Respond with <output>{\"relevant_indices\": [..]}</output> and nothing else.";

/// Result of parsing validator output
#[derive(Debug, Clone, PartialEq)]
pub enum ValidationOutcome {
    /// Zero-based indices into the candidates that were sent
    Accepted(Vec<usize>),
    /// A well-formed, empty selection
    RejectedAll,
    ParseError(String),
}

/// What the validator did for one search
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase", tag = "status")]
pub enum ValidationStatus {
    #[default]
    Skipped,
    Accepted {
        kept: usize,
        of: usize,
    },
    RejectedAll,
    FailedOpen {
        reason: String,
    },
}

#[derive(Debug, Deserialize)]
struct ValidatorReply {
    relevant_indices: Vec<i64>,
}

/// Asks a completion provider which borderline episodes are relevant
#[derive(Clone)]
pub struct RelevanceValidator {
    provider: Arc<dyn CompletionProvider>,
    config: ValidatorConfig,
}

impl RelevanceValidator {
    pub fn new(provider: Arc<dyn CompletionProvider>, config: ValidatorConfig) -> Self {
        Self { provider, config }
    }

    /// Filter `episodes` down to what the model judges relevant
    ///
    /// At most `max_candidates` episodes are sent; the rest are dropped when the
    /// model answers cleanly and kept when it fails.
    pub async fn validate(
        &self,
        query: &str,
        episodes: Vec<RankedEpisode>,
        max_candidates: usize,
    ) -> (Vec<RankedEpisode>, ValidationStatus) {
        if episodes.is_empty() {
            return (episodes, ValidationStatus::Skipped);
        }

        let sent = episodes.len().min(max_candidates.max(1));
        let prompt = self.build_prompt(query, &episodes[..sent]);

        let reply = match self.provider.complete(SYSTEM_PROMPT, &prompt).await {
            Ok(reply) => reply,
            Err(e) => {
                warn!(error = %e, "Relevance validator unavailable, keeping all candidates");
                return (
                    episodes,
                    ValidationStatus::FailedOpen {
                        reason: e.to_string(),
                    },
                );
            }
        };

        match parse_validator_output(&reply, sent) {
            ValidationOutcome::Accepted(indices) => {
                let mut keep = vec![false; sent];
                for idx in indices {
                    keep[idx] = true;
                }
                let kept: Vec<RankedEpisode> = episodes
                    .into_iter()
                    .take(sent)
                    .zip(keep)
                    .filter_map(|(episode, keep)| keep.then_some(episode))
                    .collect();
                debug!(kept = kept.len(), sent, "Relevance validator accepted episodes");
                let status = ValidationStatus::Accepted {
                    kept: kept.len(),
                    of: sent,
                };
                (kept, status)
            }
            ValidationOutcome::RejectedAll => {
                debug!(sent, "Relevance validator rejected every episode");
                (Vec::new(), ValidationStatus::RejectedAll)
            }
            ValidationOutcome::ParseError(reason) => {
                warn!(reason = %reason, "Could not parse validator output, keeping all candidates");
                (episodes, ValidationStatus::FailedOpen { reason })
            }
        }
    }

    fn build_prompt(&self, query: &str, episodes: &[RankedEpisode]) -> String {
        let mut prompt = format!("Query: {}\n\nCandidate episodes:\n", query);
        for (idx, ranked) in episodes.iter().enumerate() {
            let scores = ranked.scores();
            let _ = writeln!(
                prompt,
                "\n[{}] {} (score {:.2}: graph {:.2}, traversal {:.2}, vector {:.2}, keyword {:.2})",
                idx,
                ranked.candidate.episode.created_at.format("%Y-%m-%d"),
                ranked.score,
                scores.episode_graph,
                scores.bfs,
                scores.vector,
                scores.bm25,
            );
            let _ = writeln!(
                prompt,
                "{}",
                preview(ranked.candidate.episode.display_content(), self.config.preview_chars)
            );

            let mut facts: Vec<&AttributedStatement> = ranked.candidate.statements.iter().collect();
            facts.sort_by(|a, b| b.best_score().total_cmp(&a.best_score()));
            for fact in facts.into_iter().take(self.config.facts_per_candidate) {
                let _ = writeln!(prompt, "  - {}", fact.statement.fact);
            }
        }
        prompt.push_str(
            "\nReturn the indices of episodes that directly answer the query. \
             Use an empty list if none do.",
        );
        prompt
    }
}

fn preview(content: &str, max_chars: usize) -> String {
    if content.chars().count() <= max_chars {
        return content.to_string();
    }
    let mut cut: String = content.chars().take(max_chars).collect();
    cut.push_str("...");
    cut
}

/// Parse the model's reply against the number of candidates it was shown
///
/// Accepts `<output>{"relevant_indices": [...]}</output>` or a bare index
/// array inside the block. Out-of-range and duplicate indices are ignored;
/// if nothing valid remains from a non-empty list the reply is a parse error.
pub fn parse_validator_output(reply: &str, candidates: usize) -> ValidationOutcome {
    let Some(start) = reply.find("<output>") else {
        return ValidationOutcome::ParseError("missing <output> block".to_string());
    };
    let body_start = start + "<output>".len();
    let Some(len) = reply[body_start..].find("</output>") else {
        return ValidationOutcome::ParseError("unterminated <output> block".to_string());
    };
    let body = reply[body_start..body_start + len].trim();

    let raw: Vec<i64> = match serde_json::from_str::<ValidatorReply>(body) {
        Ok(parsed) => parsed.relevant_indices,
        Err(_) => match serde_json::from_str::<Vec<i64>>(body) {
            Ok(indices) => indices,
            Err(e) => return ValidationOutcome::ParseError(format!("invalid JSON: {}", e)),
        },
    };

    if raw.is_empty() {
        return ValidationOutcome::RejectedAll;
    }

    let mut indices: Vec<usize> = raw
        .into_iter()
        .filter_map(|idx| usize::try_from(idx).ok())
        .filter(|idx| *idx < candidates)
        .collect();
    indices.sort_unstable();
    indices.dedup();

    if indices.is_empty() {
        ValidationOutcome::ParseError("every index was out of range".to_string())
    } else {
        ValidationOutcome::Accepted(indices)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_object_form() {
        let reply = "Sure.\n<output>{\"relevant_indices\": [2, 0, 2]}</output>";
        assert_eq!(
            parse_validator_output(reply, 3),
            ValidationOutcome::Accepted(vec![0, 2])
        );
    }

    #[test]
    fn test_parse_bare_array() {
        assert_eq!(
            parse_validator_output("<output>[1]</output>", 2),
            ValidationOutcome::Accepted(vec![1])
        );
    }

    #[test]
    fn test_explicit_empty_list_rejects_all() {
        assert_eq!(
            parse_validator_output("<output>{\"relevant_indices\": []}</output>", 4),
            ValidationOutcome::RejectedAll
        );
    }

    #[test]
    fn test_malformed_output_is_parse_error() {
        assert!(matches!(
            parse_validator_output("I think episode 1 is relevant", 2),
            ValidationOutcome::ParseError(_)
        ));
        assert!(matches!(
            parse_validator_output("<output>{relevant: yes}</output>", 2),
            ValidationOutcome::ParseError(_)
        ));
        assert!(matches!(
            parse_validator_output("<output>[7, -1]</output>", 2),
            ValidationOutcome::ParseError(_)
        ));
    }

    #[test]
    fn test_preview_truncates_on_char_boundary() {
        assert_eq!(preview("héllo wörld", 5), "héllo...");
        assert_eq!(preview("short", 10), "short");
    }
}
