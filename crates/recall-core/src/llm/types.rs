//! Wire types for the OpenAI-compatible chat and embedding endpoints
//!
//! Recall sends two kinds of traffic: one short chat completion per search
//! when the relevance validator runs, and embedding requests for queries and
//! for snapshot records loaded without vectors. Snapshot loads batch their
//! texts, so [`EmbeddingInput`] carries either one string or many.

use serde::{Deserialize, Serialize};

/// Role of a message in a conversation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    /// Judging instructions
    System,
    /// The query and candidate episodes
    User,
    /// The model's verdict
    Assistant,
}

impl std::fmt::Display for MessageRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MessageRole::System => write!(f, "system"),
            MessageRole::User => write!(f, "user"),
            MessageRole::Assistant => write!(f, "assistant"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: MessageRole,
    pub content: String,
}

impl Message {
    pub fn new(role: MessageRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(MessageRole::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(MessageRole::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(MessageRole::Assistant, content)
    }
}

/// Request body for `/chat/completions`
#[derive(Debug, Clone, Serialize)]
pub struct ChatRequest {
    /// Model identifier, e.g. "gpt-4o-mini"
    pub model: String,
    pub messages: Vec<Message>,
    /// Sampling temperature; the validator runs at 0.0
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    /// Upper bound on the reply, which only needs to hold an index list
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<usize>,
}

impl ChatRequest {
    pub fn new(model: impl Into<String>, messages: Vec<Message>) -> Self {
        Self {
            model: model.into(),
            messages,
            temperature: None,
            max_tokens: None,
        }
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: usize) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }
}

/// Token usage reported with a completion
#[derive(Debug, Clone, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    /// Some providers omit this; treated as zero
    #[serde(default)]
    pub total_tokens: u32,
}

/// Reason for completion finishing
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    Stop,
    /// Hit `max_tokens`; the `<output>` block may be cut off
    Length,
    ToolCalls,
    ContentFilter,
    Error,
    #[serde(other)]
    Unknown,
}

/// A single completion choice from the API response
#[derive(Debug, Clone, Deserialize)]
pub struct Choice {
    #[serde(default)]
    pub index: usize,
    pub message: Message,
    pub finish_reason: Option<FinishReason>,
}

/// Response from the chat completions API
///
/// Only the fields Recall reads; providers add `object`, `created` and more.
#[derive(Debug, Clone, Deserialize)]
pub struct ChatResponse {
    #[serde(default)]
    pub id: String,
    pub model: String,
    pub choices: Vec<Choice>,
    pub usage: Option<Usage>,
}

/// First choice of a completion, flattened for the client
#[derive(Debug, Clone)]
pub struct LlmResponse {
    pub content: String,
    /// Model that actually answered, which may be a fallback
    pub model: String,
    /// Total tokens used (input + output)
    pub tokens_used: u32,
    pub finish_reason: FinishReason,
}

impl LlmResponse {
    /// Take the first choice; `None` when the provider returned no choices
    pub fn from_chat_response(response: ChatResponse) -> Option<Self> {
        let choice = response.choices.into_iter().next()?;

        Some(Self {
            content: choice.message.content,
            model: response.model,
            tokens_used: response.usage.map(|u| u.total_tokens).unwrap_or(0),
            finish_reason: choice.finish_reason.unwrap_or(FinishReason::Unknown),
        })
    }

    /// The reply stopped at the token limit rather than finishing
    pub fn is_truncated(&self) -> bool {
        self.finish_reason == FinishReason::Length
    }
}

/// Request body for `/embeddings`
#[derive(Debug, Clone, Serialize)]
pub struct EmbeddingRequest {
    /// Model identifier, e.g. "text-embedding-3-small"
    pub model: String,
    pub input: EmbeddingInput,
    /// Output width, for models that can shorten their vectors
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dimensions: Option<usize>,
}

/// One query, or a batch of snapshot texts
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum EmbeddingInput {
    Single(String),
    Batch(Vec<String>),
}

impl EmbeddingInput {
    /// Number of vectors the response must carry
    pub fn len(&self) -> usize {
        match self {
            EmbeddingInput::Single(_) => 1,
            EmbeddingInput::Batch(texts) => texts.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Characters sent, for request logging
    pub fn chars(&self) -> usize {
        match self {
            EmbeddingInput::Single(text) => text.len(),
            EmbeddingInput::Batch(texts) => texts.iter().map(String::len).sum(),
        }
    }
}

impl EmbeddingRequest {
    pub fn new(model: impl Into<String>, input: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            input: EmbeddingInput::Single(input.into()),
            dimensions: None,
        }
    }

    pub fn batch(model: impl Into<String>, inputs: Vec<String>) -> Self {
        Self {
            model: model.into(),
            input: EmbeddingInput::Batch(inputs),
            dimensions: None,
        }
    }
}

/// A single embedding from the API response
#[derive(Debug, Clone, Deserialize)]
pub struct EmbeddingData {
    /// Position of the input this vector belongs to
    #[serde(default)]
    pub index: usize,
    pub embedding: Vec<f32>,
}

/// Response from the embeddings API
#[derive(Debug, Clone, Deserialize)]
pub struct EmbeddingResponse {
    pub data: Vec<EmbeddingData>,
    pub model: String,
}

impl EmbeddingResponse {
    /// Vectors in input order
    ///
    /// Providers may return batch entries out of order; each carries the
    /// index of the text it embeds.
    pub fn into_vectors(self) -> Vec<Vec<f32>> {
        let mut data = self.data;
        data.sort_by_key(|d| d.index);
        data.into_iter().map(|d| d.embedding).collect()
    }
}
