//! Guided breadth-first traversal from query entities
//!
//! Levels run strictly in order, each one depending on the frontier produced by
//! the last. A statement is explored when its similarity clears the loose
//! exploration threshold and kept only if it also clears the relevance
//! threshold once the walk ends.

use std::collections::HashSet;
use std::time::Instant;

use tracing::debug;

use crate::domain::recall::statement::Statement;
use crate::embedding::cosine_similarity;
use crate::error::Result;

use super::{QueryContext, elapsed_ms};

/// A statement reached by traversal
#[derive(Debug, Clone, PartialEq)]
pub struct TraversalHit {
    pub statement: Statement,
    /// Cosine similarity between the fact and the query
    pub similarity: f32,
    /// 1-indexed level the statement was first reached at
    pub hop: usize,
}

/// Breadth-first walk over statements, seeded by the resolved entities
///
/// Each level fetches at most `per_level_limit` statements touching the
/// frontier. Entities are visited once, so the walk never cycles.
pub struct GuidedTraversal;

impl GuidedTraversal {
    /// Walk up to `ctx.max_depth` levels
    ///
    /// Returns hits above the relevance threshold, best similarity first and
    /// shallower hops before deeper ones on ties. No resolved entities means
    /// no hits.
    pub async fn run(ctx: &QueryContext<'_>) -> Result<Vec<TraversalHit>> {
        let started = Instant::now();
        let config = &ctx.config.traversal;

        let mut frontier = ctx.entity_ids();
        let mut visited: HashSet<String> = frontier.iter().cloned().collect();
        let mut seen_statements: HashSet<String> = HashSet::new();
        let mut explored: Vec<TraversalHit> = Vec::new();
        let mut levels = 0;

        for hop in 1..=ctx.max_depth {
            if frontier.is_empty() {
                break;
            }
            levels = hop;

            let statements = ctx
                .graph
                .statements_for_entities(&frontier, ctx.filter, config.per_level_limit)
                .await?;

            let mut accepted_ids = Vec::new();
            for statement in statements {
                if !seen_statements.insert(statement.id.clone()) {
                    continue;
                }
                let similarity = cosine_similarity(ctx.embedding, &statement.fact_embedding);
                if similarity >= config.exploration_threshold {
                    accepted_ids.push(statement.id.clone());
                    explored.push(TraversalHit {
                        statement,
                        similarity,
                        hop,
                    });
                }
            }

            // last level, or nothing to expand from
            if hop == ctx.max_depth || accepted_ids.is_empty() {
                break;
            }

            let reachable = ctx
                .graph
                .entities_for_statements(&accepted_ids, &ctx.filter.owner_id)
                .await?;
            frontier = reachable
                .into_iter()
                .filter(|id| visited.insert(id.clone()))
                .collect();
        }

        let explored_count = explored.len();
        let mut hits: Vec<TraversalHit> = explored
            .into_iter()
            .filter(|hit| hit.similarity >= config.relevance_threshold)
            .collect();
        hits.sort_by(|a, b| {
            b.similarity
                .total_cmp(&a.similarity)
                .then_with(|| a.hop.cmp(&b.hop))
                .then_with(|| a.statement.id.cmp(&b.statement.id))
        });

        debug!(
            levels,
            explored = explored_count,
            hits = hits.len(),
            elapsed_ms = elapsed_ms(started),
            "Guided traversal finished"
        );
        Ok(hits)
    }
}
