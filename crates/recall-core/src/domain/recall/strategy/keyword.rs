//! Full-text search over statement facts

use std::time::Instant;

use tracing::debug;

use crate::error::Result;

use super::{QueryContext, elapsed_ms};
use crate::domain::recall::repository::KeywordHit;

/// Characters with meaning in full-text query syntax
const RESERVED: &[char] = &[
    '+', '-', '&', '|', '!', '(', ')', '{', '}', '[', ']', '^', '"', '~', '*', '?', ':', '\\',
    '/', '\'', '.', ',', ';', '<', '>', '=', '@', '#', '$', '%',
];

/// Strip reserved syntax and cap the query at `max_words` words
///
/// Never fails; an over-long query is truncated.
pub fn sanitize_query(query: &str, max_words: usize) -> String {
    let cleaned: String = query
        .chars()
        .map(|c| if RESERVED.contains(&c) { ' ' } else { c })
        .collect();

    cleaned
        .split_whitespace()
        .filter(|w| !matches!(*w, "AND" | "OR" | "NOT" | "NEAR"))
        .take(max_words)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Lowest-trust fallback signal
pub struct KeywordSearch;

impl KeywordSearch {
    pub async fn run(ctx: &QueryContext<'_>) -> Result<Vec<KeywordHit>> {
        let started = Instant::now();
        let sanitized = sanitize_query(ctx.query, ctx.config.keyword.max_words);
        if sanitized.is_empty() {
            return Ok(Vec::new());
        }

        let hits = ctx.graph.keyword_search(&sanitized, ctx.filter, ctx.limit).await?;
        debug!(
            hits = hits.len(),
            elapsed_ms = elapsed_ms(started),
            "Keyword search finished"
        );
        Ok(hits)
    }
}
