//! Entity resolution from free text
//!
//! The query is split into candidate mentions (tokens, adjacent bigrams and the
//! whole string), each embedded on its own so that multi-word entity names are
//! not blurred by the rest of the query.

use std::collections::HashMap;

use futures_util::future::join_all;
use tracing::{debug, warn};

use crate::config::EntityResolutionConfig;
use crate::embedding::Embedder;
use crate::error::Result;

use super::entity::EntityMatch;
use super::repository::RecallGraph;

/// Finds known entities mentioned in a query
pub struct EntityResolver<'a> {
    graph: &'a dyn RecallGraph,
    embedder: &'a dyn Embedder,
    config: &'a EntityResolutionConfig,
}

impl<'a> EntityResolver<'a> {
    pub fn new(
        graph: &'a dyn RecallGraph,
        embedder: &'a dyn Embedder,
        config: &'a EntityResolutionConfig,
    ) -> Self {
        Self {
            graph,
            embedder,
            config,
        }
    }

    /// Resolve entities for one owner
    ///
    /// A chunk whose embedding or lookup errors contributes no candidates.
    /// The call only fails when every chunk failed, returning the first error.
    /// Results are deduplicated by entity id keeping the best similarity,
    /// ordered by similarity descending then id.
    pub async fn resolve(&self, owner_id: &str, query: &str) -> Result<Vec<EntityMatch>> {
        let chunks = query_chunks(query);
        let lookups = chunks.iter().map(|chunk| self.lookup_chunk(owner_id, chunk));
        let per_chunk = join_all(lookups).await;

        let mut best: HashMap<String, EntityMatch> = HashMap::new();
        let mut first_error = None;
        let mut failed = 0;
        for outcome in per_chunk {
            let found = match outcome {
                Ok(found) => found,
                Err(e) => {
                    failed += 1;
                    first_error.get_or_insert(e);
                    continue;
                }
            };
            for found in found {
                match best.get(&found.entity.id) {
                    Some(existing) if existing.similarity >= found.similarity => {}
                    _ => {
                        best.insert(found.entity.id.clone(), found);
                    }
                }
            }
        }

        if failed == chunks.len() {
            if let Some(e) = first_error {
                return Err(e);
            }
        }

        let mut resolved: Vec<EntityMatch> = best.into_values().collect();
        resolved.sort_by(|a, b| {
            b.similarity
                .total_cmp(&a.similarity)
                .then_with(|| a.entity.id.cmp(&b.entity.id))
        });

        debug!(
            chunks = chunks.len(),
            failed,
            entities = resolved.len(),
            "Resolved query entities"
        );
        Ok(resolved)
    }

    async fn lookup_chunk(&self, owner_id: &str, chunk: &str) -> Result<Vec<EntityMatch>> {
        let embedding = self.embedder.embed(chunk).await.inspect_err(|e| {
            warn!(chunk = %chunk, error = %e, "Failed to embed query chunk");
        })?;

        self.graph
            .find_entities_by_embedding(owner_id, &embedding, self.config.min_similarity, self.config.top_k)
            .await
            .inspect_err(|e| {
                warn!(chunk = %chunk, error = %e, "Entity lookup failed for query chunk");
            })
    }
}

/// Split a query into candidate entity mentions
pub fn query_chunks(query: &str) -> Vec<String> {
    let tokens: Vec<&str> = query
        .split_whitespace()
        .map(|t| t.trim_matches(|c: char| !c.is_alphanumeric()))
        .filter(|t| !t.is_empty())
        .collect();

    let mut chunks: Vec<String> = tokens.iter().map(|t| t.to_string()).collect();
    chunks.extend(tokens.windows(2).map(|pair| pair.join(" ")));

    let full = query.trim();
    if !full.is_empty() {
        chunks.push(full.to_string());
    }

    let mut seen = std::collections::HashSet::new();
    chunks.retain(|chunk| seen.insert(chunk.clone()));
    chunks
}
