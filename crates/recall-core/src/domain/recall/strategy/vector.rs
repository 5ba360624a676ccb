use std::time::Instant;

use tracing::debug;

use crate::domain::recall::statement::ScoredStatement;
use crate::error::Result;

use super::{QueryContext, elapsed_ms};

/// Cosine similarity search over fact embeddings
pub struct VectorSearch;

impl VectorSearch {
    pub async fn run(ctx: &QueryContext<'_>) -> Result<Vec<ScoredStatement>> {
        let started = Instant::now();
        let hits = ctx
            .graph
            .vector_search(
                ctx.embedding,
                ctx.filter,
                ctx.config.vector.min_similarity,
                ctx.limit,
            )
            .await?;

        debug!(
            hits = hits.len(),
            elapsed_ms = elapsed_ms(started),
            "Vector search finished"
        );
        Ok(hits)
    }
}
