//! LLM integration - OpenAI-compatible API
//!
//! This module provides:
//! - HTTP client for chat completions and embeddings
//! - Request/response types matching the OpenAI-compatible API
//! - Model fallback with automatic retry
//! - The [`CompletionProvider`] seam consumed by the relevance validator

mod client;
mod types;

use async_trait::async_trait;

use crate::error::Result;

pub use client::{LlmClient, LlmClientBuilder};
pub use types::{
    ChatRequest, ChatResponse, Choice, EmbeddingData, EmbeddingInput, EmbeddingRequest,
    EmbeddingResponse, FinishReason, LlmResponse, Message, MessageRole, Usage,
};

/// A language model that turns a system + user prompt into text
#[async_trait]
pub trait CompletionProvider: Send + Sync {
    async fn complete(&self, system: &str, user: &str) -> Result<String>;
}
