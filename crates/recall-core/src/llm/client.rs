//! OpenAI-compatible LLM client implementation
//!
//! Provides async HTTP client with:
//! - Chat completions used by the relevance validator
//! - Embeddings used for query and entity-chunk vectors
//! - Model fallback with automatic retry
//! - Rate limit handling with exponential backoff

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client as HttpClient;
use tracing::{debug, error, info, warn};

use crate::config::{EmbeddingConfig, LlmConfig};
use crate::embedding::Embedder;
use crate::error::{Error, Result};

use super::CompletionProvider;
use super::types::{
    ChatRequest, ChatResponse, EmbeddingRequest, EmbeddingResponse, LlmResponse, Message,
};

/// Maximum number of retry attempts for rate-limited requests
const MAX_RETRY_ATTEMPTS: u32 = 3;

/// Base delay for exponential backoff (in milliseconds)
const BACKOFF_BASE_MS: u64 = 1000;

/// OpenAI-compatible LLM client
///
/// Thread-safe client for chat completion and embedding requests.
#[derive(Clone)]
pub struct LlmClient {
    http_client: HttpClient,
    config: LlmConfig,
    embedding: EmbeddingConfig,
    api_key: String,
}

impl std::fmt::Debug for LlmClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LlmClient")
            .field("base_url", &self.config.base_url)
            .field("default_model", &self.config.default_model)
            .field("embedding_model", &self.embedding.model)
            .finish()
    }
}

/// Builder for creating an LlmClient
#[derive(Default)]
pub struct LlmClientBuilder {
    config: Option<LlmConfig>,
    embedding: Option<EmbeddingConfig>,
    api_key: Option<String>,
    base_url: Option<String>,
    timeout_secs: Option<u64>,
}

impl LlmClientBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the LLM configuration
    pub fn config(mut self, config: LlmConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Set the embedding configuration
    pub fn embedding(mut self, embedding: EmbeddingConfig) -> Self {
        self.embedding = Some(embedding);
        self
    }

    /// Set the API key
    pub fn api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    /// Override the base URL from the configuration
    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    /// Set the request timeout
    pub fn timeout_secs(mut self, secs: u64) -> Self {
        self.timeout_secs = Some(secs);
        self
    }

    pub fn build(self) -> Result<LlmClient> {
        let mut config = self.config.unwrap_or_default();
        let api_key = self
            .api_key
            .ok_or_else(|| Error::LLMError("API key is required".to_string()))?;

        if let Some(url) = self.base_url {
            config.base_url = url;
        }
        config.base_url = config.base_url.trim_end_matches('/').to_string();

        let timeout_secs = self.timeout_secs.unwrap_or(config.timeout_secs);

        let http_client = HttpClient::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(Error::NetworkError)?;

        Ok(LlmClient {
            http_client,
            config,
            embedding: self.embedding.unwrap_or_default(),
            api_key,
        })
    }
}

impl LlmClient {
    /// Create a new LlmClient with the given configuration and API key
    pub fn new(config: LlmConfig, api_key: impl Into<String>) -> Result<Self> {
        LlmClientBuilder::new().config(config).api_key(api_key).build()
    }

    pub fn builder() -> LlmClientBuilder {
        LlmClientBuilder::new()
    }

    pub fn default_model(&self) -> &str {
        &self.config.default_model
    }

    pub fn fallback_models(&self) -> &[String] {
        &self.config.fallback_models
    }

    pub fn base_url(&self) -> &str {
        &self.config.base_url
    }

    /// Make a chat completion request against one model
    pub async fn chat(&self, messages: Vec<Message>, model: Option<&str>) -> Result<LlmResponse> {
        let model = model.unwrap_or(&self.config.default_model);

        let request = ChatRequest::new(model, messages)
            .with_temperature(self.config.temperature)
            .with_max_tokens(self.config.max_tokens);

        self.execute_request(&request).await
    }

    /// Make a chat completion request with automatic fallback
    ///
    /// Tries the default model first, then the fallback models when the failure
    /// is model-specific or a rate limit.
    pub async fn complete_with_fallback(&self, messages: Vec<Message>) -> Result<LlmResponse> {
        let mut models = vec![self.config.default_model.clone()];
        models.extend(self.config.fallback_models.clone());

        let mut last_error = None;

        for model in &models {
            debug!(model = %model, "Attempting chat completion");

            match self.chat(messages.clone(), Some(model)).await {
                Ok(response) => {
                    info!(model = %model, tokens = response.tokens_used, "Chat completion successful");
                    return Ok(response);
                }
                Err(Error::RateLimited(secs)) => {
                    warn!(model = %model, wait_secs = secs, "Rate limited, trying next model");
                    last_error = Some(Error::RateLimited(secs));
                }
                Err(Error::LLMError(msg)) if is_model_error(&msg) => {
                    warn!(model = %model, error = %msg, "Model error, trying next model");
                    last_error = Some(Error::LLMError(msg));
                }
                Err(e) => {
                    error!(model = %model, error = %e, "Non-recoverable error");
                    return Err(e);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| Error::NoSuitableModel("All models failed".to_string())))
    }

    /// Generate an embedding for a single text
    pub async fn embed_text(&self, text: &str) -> Result<Vec<f32>> {
        let request = EmbeddingRequest::new(&self.embedding.model, text);
        self.send_embedding_request(&request)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| Error::EmbeddingFailed("Empty embedding response".to_string()))
    }

    /// Generate embeddings for a batch of texts in one request
    pub async fn embed_texts(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let request = EmbeddingRequest::batch(&self.embedding.model, texts.to_vec());
        self.send_embedding_request(&request).await
    }

    async fn send_embedding_request(&self, request: &EmbeddingRequest) -> Result<Vec<Vec<f32>>> {
        let url = format!("{}/embeddings", self.config.base_url);

        debug!(
            model = %request.model,
            inputs = request.input.len(),
            chars = request.input.chars(),
            "Sending embedding request"
        );

        let response = self
            .http_client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(request)
            .send()
            .await
            .map_err(Error::NetworkError)?;

        let status = response.status();
        if !status.is_success() {
            return self.handle_error_response(status, response).await;
        }

        let embedding_response: EmbeddingResponse = response
            .json()
            .await
            .map_err(|e| Error::EmbeddingFailed(format!("Failed to parse response: {}", e)))?;

        let vectors = embedding_response.into_vectors();
        if vectors.len() != request.input.len() {
            return Err(Error::EmbeddingFailed(format!(
                "Expected {} embeddings, got {}",
                request.input.len(),
                vectors.len()
            )));
        }
        Ok(vectors)
    }

    async fn execute_request(&self, request: &ChatRequest) -> Result<LlmResponse> {
        let mut attempts = 0;

        loop {
            attempts += 1;

            match self.send_request(request).await {
                Ok(response) => return Ok(response),
                Err(Error::RateLimited(wait_secs)) if attempts < MAX_RETRY_ATTEMPTS => {
                    let backoff = calculate_backoff(attempts, wait_secs);
                    warn!(
                        attempt = attempts,
                        wait_ms = backoff,
                        "Rate limited, retrying after backoff"
                    );
                    tokio::time::sleep(Duration::from_millis(backoff)).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn send_request(&self, request: &ChatRequest) -> Result<LlmResponse> {
        let url = format!("{}/chat/completions", self.config.base_url);

        debug!(
            model = %request.model,
            messages = request.messages.len(),
            "Sending chat completion request"
        );

        let response = self
            .http_client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(request)
            .send()
            .await
            .map_err(Error::NetworkError)?;

        let status = response.status();

        if !status.is_success() {
            return self.handle_error_response(status, response).await;
        }

        let chat_response: ChatResponse = response
            .json()
            .await
            .map_err(|e| Error::LLMError(format!("Failed to parse response: {}", e)))?;

        LlmResponse::from_chat_response(chat_response)
            .ok_or_else(|| Error::LLMError("Empty response from API".to_string()))
    }

    async fn handle_error_response<T>(
        &self,
        status: reqwest::StatusCode,
        response: reqwest::Response,
    ) -> Result<T> {
        let body = response.text().await.unwrap_or_default();

        match status.as_u16() {
            401 => Err(Error::LLMError(
                "Unauthorized: Invalid API key. Set RECALL_API_KEY or OPENAI_API_KEY environment variable.".to_string(),
            )),
            429 => {
                let wait_secs = extract_retry_after(&body).unwrap_or(60);
                Err(Error::RateLimited(wait_secs))
            }
            400 => Err(Error::LLMError(format!("Bad request: {}", body))),
            403 => Err(Error::LLMError(format!("Forbidden: {}", body))),
            404 => Err(Error::LLMError(format!(
                "Model not found or endpoint unavailable: {}",
                body
            ))),
            500..=599 => Err(Error::LLMError(format!("Server error ({}): {}", status, body))),
            _ => Err(Error::LLMError(format!("HTTP error {}: {}", status, body))),
        }
    }
}

#[async_trait]
impl CompletionProvider for LlmClient {
    async fn complete(&self, system: &str, user: &str) -> Result<String> {
        let messages = vec![Message::system(system), Message::user(user)];
        let response = self.complete_with_fallback(messages).await?;
        if response.is_truncated() {
            warn!(
                model = %response.model,
                max_tokens = self.config.max_tokens,
                "Completion hit the token limit"
            );
        }
        Ok(response.content)
    }
}

#[async_trait]
impl Embedder for LlmClient {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.embed_text(text).await
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        self.embed_texts(texts).await
    }
}

/// Check if an error message indicates a model-specific error
fn is_model_error(msg: &str) -> bool {
    let model_error_patterns = [
        "model not found",
        "unavailable",
        "not available",
        "no available provider",
        "overloaded",
        "capacity",
    ];

    let msg_lower = msg.to_lowercase();
    model_error_patterns
        .iter()
        .any(|pattern| msg_lower.contains(pattern))
}

/// Calculate backoff delay with jitter
fn calculate_backoff(attempt: u32, suggested_wait: u64) -> u64 {
    let base = BACKOFF_BASE_MS * 2u64.pow(attempt.saturating_sub(1));
    let max_wait = suggested_wait * 1000;

    let delay = base.max(max_wait);

    let jitter = delay / 10;
    delay + (rand_jitter() % jitter.max(1))
}

fn rand_jitter() -> u64 {
    use std::time::SystemTime;
    SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64 % 1000)
        .unwrap_or(0)
}

/// Extract retry-after value from error response
fn extract_retry_after(body: &str) -> Option<u64> {
    let json = serde_json::from_str::<serde_json::Value>(body).ok()?;
    json.get("retry_after")
        .and_then(|v| v.as_u64())
        .or_else(|| json.get("error")?.get("retry_after")?.as_u64())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> LlmConfig {
        LlmConfig {
            api_key: None,
            base_url: "https://example.com/v1/".to_string(),
            default_model: "test/model".to_string(),
            fallback_models: vec!["fallback/model".to_string()],
            temperature: 0.0,
            max_tokens: 1024,
            timeout_secs: 30,
        }
    }

    #[test]
    fn test_client_builder() {
        let client = LlmClient::builder()
            .config(test_config())
            .api_key("test-key")
            .base_url("https://proxy.local/v1")
            .timeout_secs(60)
            .build()
            .unwrap();

        assert_eq!(client.default_model(), "test/model");
        assert_eq!(client.base_url(), "https://proxy.local/v1");
    }

    #[test]
    fn test_trailing_slash_trimmed() {
        let client = LlmClient::new(test_config(), "test-key").unwrap();
        assert_eq!(client.base_url(), "https://example.com/v1");
    }

    #[test]
    fn test_client_builder_requires_api_key() {
        let result = LlmClient::builder().config(test_config()).build();
        assert!(result.is_err());
    }

    #[test]
    fn test_client_debug_hides_key() {
        let client = LlmClient::new(test_config(), "sk-very-secret").unwrap();
        let debug = format!("{:?}", client);
        assert!(debug.contains("LlmClient"));
        assert!(debug.contains("test/model"));
        assert!(!debug.contains("sk-very-secret"));
    }

    #[tokio::test]
    async fn test_empty_batch_sends_nothing() {
        let client = LlmClient::new(test_config(), "test-key").unwrap();
        assert!(client.embed_texts(&[]).await.unwrap().is_empty());
    }

    #[test]
    fn test_client_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<LlmClient>();
    }

    #[test]
    fn test_is_model_error() {
        assert!(is_model_error("Model not found"));
        assert!(is_model_error("The model is unavailable"));
        assert!(!is_model_error("Invalid API key"));
    }

    #[test]
    fn test_calculate_backoff() {
        assert!(calculate_backoff(1, 0) >= BACKOFF_BASE_MS);
        assert!(calculate_backoff(2, 0) >= BACKOFF_BASE_MS * 2);
        assert!(calculate_backoff(1, 5) >= 5000);
    }

    #[test]
    fn test_extract_retry_after() {
        assert_eq!(extract_retry_after(r#"{"retry_after": 30}"#), Some(30));
        assert_eq!(extract_retry_after(r#"{"error": {"retry_after": 60}}"#), Some(60));
        assert_eq!(extract_retry_after(r#"{"message": "rate limited"}"#), None);
        assert_eq!(extract_retry_after("not json"), None);
    }

    // Live calls need a configured API key
    #[cfg(feature = "integration-tests")]
    mod integration {
        use super::*;
        use crate::config::Config;

        fn live_client() -> LlmClient {
            let config = Config::load().unwrap();
            let api_key = config
                .llm
                .resolved_api_key()
                .unwrap()
                .expect("API key required for integration tests");
            LlmClient::builder()
                .config(config.llm)
                .embedding(config.embedding)
                .api_key(api_key)
                .build()
                .unwrap()
        }

        #[tokio::test]
        async fn test_actual_completion() {
            let client = live_client();
            let reply = client
                .complete("Answer with one word.", "Say 'Hello' and nothing else.")
                .await
                .unwrap();
            assert!(reply.to_lowercase().contains("hello"));
        }

        #[tokio::test]
        async fn test_actual_embedding() {
            let client = live_client();
            let vector = client.embed("postgres migration").await.unwrap();
            assert!(!vector.is_empty());
        }

        #[tokio::test]
        async fn test_actual_batch_embedding() {
            let client = live_client();
            let texts = vec!["Alice".to_string(), "Postgres migration".to_string()];
            let vectors = client.embed_batch(&texts).await.unwrap();
            assert_eq!(vectors.len(), 2);
            assert_eq!(vectors[0].len(), vectors[1].len());
        }
    }
}
