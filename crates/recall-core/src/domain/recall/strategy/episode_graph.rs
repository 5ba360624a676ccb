//! Episode-subgraph search
//!
//! Ranks whole episodes by how densely their statements cluster around the
//! query entities:
//!
//! ```text
//! connectivity = (matched statements / total statements) * entity_match_count
//! score        = entity_match_count * entity_match_weight + connectivity + avg_relevance
//! ```

use std::collections::{BTreeMap, HashSet};
use std::time::Instant;

use tracing::debug;

use crate::domain::recall::episode::Episode;
use crate::domain::recall::statement::{ScoredStatement, Statement};
use crate::embedding::cosine_similarity;
use crate::error::Result;

use super::{QueryContext, elapsed_ms};

/// An episode ranked by topical density
#[derive(Debug, Clone, PartialEq)]
pub struct EpisodeGraphHit {
    pub episode: Episode,
    pub score: f32,
    pub entity_match_count: usize,
    pub total_statements: usize,
    pub avg_relevance: f32,
    /// Only the statements that touch a query entity
    pub statements: Vec<ScoredStatement>,
}

pub struct EpisodeGraphSearch;

impl EpisodeGraphSearch {
    pub async fn run(ctx: &QueryContext<'_>) -> Result<Vec<EpisodeGraphHit>> {
        let started = Instant::now();
        let config = &ctx.config.episode_graph;

        let entity_ids = ctx.entity_ids();
        if entity_ids.is_empty() {
            return Ok(Vec::new());
        }
        let query_entities: HashSet<String> = entity_ids.iter().cloned().collect();

        let touching = ctx
            .graph
            .statements_for_entities(&entity_ids, ctx.filter, ctx.config.traversal.per_level_limit)
            .await?;
        if touching.is_empty() {
            return Ok(Vec::new());
        }
        let touching_ids: Vec<String> = touching.into_iter().map(|s| s.id).collect();

        let mut episodes: BTreeMap<String, Episode> = BTreeMap::new();
        for link in ctx.graph.episodes_for_statements(&touching_ids, ctx.filter).await? {
            episodes.entry(link.episode.id.clone()).or_insert(link.episode);
        }
        if episodes.is_empty() {
            return Ok(Vec::new());
        }

        let episode_ids: Vec<String> = episodes.keys().cloned().collect();
        let mut provenance: BTreeMap<String, Vec<Statement>> = BTreeMap::new();
        for row in ctx.graph.statements_for_episodes(&episode_ids, ctx.filter).await? {
            let statements = provenance.entry(row.episode_id).or_default();
            if !statements.iter().any(|s| s.id == row.statement.id) {
                statements.push(row.statement);
            }
        }

        let candidates = episodes.len();
        let mut hits: Vec<EpisodeGraphHit> = episodes
            .into_values()
            .filter_map(|episode| {
                let statements = provenance.remove(&episode.id)?;
                score_episode(ctx, &query_entities, episode, statements)
            })
            .collect();

        hits.sort_by(|a, b| {
            b.score
                .total_cmp(&a.score)
                .then_with(|| a.episode.id.cmp(&b.episode.id))
        });
        hits.truncate(config.top_episodes);

        debug!(
            candidates,
            hits = hits.len(),
            elapsed_ms = elapsed_ms(started),
            "Episode graph search finished"
        );
        Ok(hits)
    }
}

fn score_episode(
    ctx: &QueryContext<'_>,
    query_entities: &HashSet<String>,
    episode: Episode,
    statements: Vec<Statement>,
) -> Option<EpisodeGraphHit> {
    let config = &ctx.config.episode_graph;
    let total_statements = statements.len();
    if total_statements == 0 {
        return None;
    }

    let mut matched_entities: HashSet<&str> = HashSet::new();
    for statement in &statements {
        for id in statement.entity_ids() {
            if query_entities.contains(id) {
                matched_entities.insert(id);
            }
        }
    }
    let entity_match_count = matched_entities.len();
    if entity_match_count == 0 {
        return None;
    }

    let scored: Vec<ScoredStatement> = statements
        .into_iter()
        .map(|statement| ScoredStatement {
            similarity: cosine_similarity(ctx.embedding, &statement.fact_embedding),
            statement,
        })
        .collect();
    let avg_relevance =
        scored.iter().map(|s| s.similarity).sum::<f32>() / total_statements as f32;
    if avg_relevance < config.min_avg_relevance {
        return None;
    }

    let matched: Vec<ScoredStatement> = scored
        .into_iter()
        .filter(|s| s.statement.touches(query_entities))
        .collect();
    let matched_fraction = matched.len() as f32 / total_statements as f32;
    let connectivity = matched_fraction * entity_match_count as f32;
    let score =
        entity_match_count as f32 * config.entity_match_weight + connectivity + avg_relevance;

    Some(EpisodeGraphHit {
        episode,
        score,
        entity_match_count,
        total_statements,
        avg_relevance,
        statements: matched,
    })
}
