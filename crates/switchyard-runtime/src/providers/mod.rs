//! Provider abstractions for switchyard-runtime.
//!
//! This module defines the contract every backend client implements, the
//! metadata the orchestrator keeps about each backend, and the registry
//! that owns both.
//!
//! Concrete clients (HTTP mapping for a given vendor) live outside this
//! crate. Anything that implements [`LlmProvider`] can be registered.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

mod factory;
mod registry;

pub use factory::{ProviderFactory, ProviderFactoryRegistry};
pub use registry::{ProviderEntry, ProviderRegistry};
pub use switchyard_core::{ChatMessage, Role};

use crate::error::CandidateFailure;

/// Errors from providers.
#[derive(Error, Debug, Clone)]
pub enum ProviderError {
    #[error("HTTP request failed: {0}")]
    HttpError(String),

    #[error("Rate limit exceeded, retry after {retry_after:?}")]
    RateLimited { retry_after: Option<Duration> },

    #[error("API error: {status} - {message}")]
    ApiError { status: u16, message: String },

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Authentication failed")]
    AuthError,

    #[error("Timeout after {0:?}")]
    Timeout(Duration),

    #[error("Provider not configured: {0}")]
    NotConfigured(String),

    #[error("{provider} does not support {modality}")]
    Unsupported { provider: String, modality: Modality },

    #[error("Circuit open for provider {0}")]
    CircuitOpen(String),

    #[error("All providers failed: {}", crate::error::describe_failures(.0))]
    Exhausted(Vec<CandidateFailure>),

    #[error("Operation cancelled")]
    Cancelled,
}

impl ProviderError {
    /// Whether retrying the same provider could plausibly succeed.
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            ProviderError::AuthError
                | ProviderError::NotConfigured(_)
                | ProviderError::Unsupported { .. }
                | ProviderError::CircuitOpen(_)
                | ProviderError::Exhausted(_)
                | ProviderError::Cancelled
        )
    }
}

/// Call modalities a provider may serve.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Modality {
    Chat,
    Streaming,
    Embeddings,
    Images,
    Speech,
}

impl fmt::Display for Modality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Modality::Chat => "chat",
            Modality::Streaming => "streaming",
            Modality::Embeddings => "embeddings",
            Modality::Images => "images",
            Modality::Speech => "speech",
        };
        write!(f, "{}", s)
    }
}

/// Feature a provider may advertise.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    Chat,
    Streaming,
    Embeddings,
    Images,
    Speech,
    Tools,
    Vision,
}

impl From<Modality> for Capability {
    fn from(modality: Modality) -> Self {
        match modality {
            Modality::Chat => Capability::Chat,
            Modality::Streaming => Capability::Streaming,
            Modality::Embeddings => Capability::Embeddings,
            Modality::Images => Capability::Images,
            Modality::Speech => Capability::Speech,
        }
    }
}

/// Capability flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Capabilities {
    pub chat: bool,
    pub streaming: bool,
    pub embeddings: bool,
    pub images: bool,
    pub speech: bool,
    pub tools: bool,
    pub vision: bool,
}

impl Default for Capabilities {
    fn default() -> Self {
        Self {
            chat: true,
            streaming: true,
            embeddings: false,
            images: false,
            speech: false,
            tools: false,
            vision: false,
        }
    }
}

impl Capabilities {
    pub fn supports(&self, capability: Capability) -> bool {
        match capability {
            Capability::Chat => self.chat,
            Capability::Streaming => self.streaming,
            Capability::Embeddings => self.embeddings,
            Capability::Images => self.images,
            Capability::Speech => self.speech,
            Capability::Tools => self.tools,
            Capability::Vision => self.vision,
        }
    }

    /// Every capability enabled.
    pub fn all() -> Self {
        Self {
            chat: true,
            streaming: true,
            embeddings: true,
            images: true,
            speech: true,
            tools: true,
            vision: true,
        }
    }
}

/// Pricing per 1K tokens, in USD.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Pricing {
    pub input_per_1k: f64,
    pub output_per_1k: f64,
    pub embedding_per_1k: f64,
}

impl Pricing {
    pub fn new(input_per_1k: f64, output_per_1k: f64) -> Self {
        Self {
            input_per_1k,
            output_per_1k,
            embedding_per_1k: 0.0,
        }
    }

    /// Cost of a usage record.
    pub fn cost(&self, usage: &TokenUsage) -> f64 {
        (usage.input_tokens as f64 / 1000.0) * self.input_per_1k
            + (usage.output_tokens as f64 / 1000.0) * self.output_per_1k
    }

    /// Single number used to rank providers by price.
    pub fn effective_price(&self) -> f64 {
        (self.input_per_1k + self.output_per_1k) / 2.0
    }
}

/// What the orchestrator knows about a provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderMetadata {
    pub name: String,
    pub display_name: String,

    /// Backend family, e.g. "openai" or "local"
    pub provider_type: String,

    pub capabilities: Capabilities,

    /// Lower is preferred
    pub priority: u32,

    pub enabled: bool,
    pub pricing: Pricing,
}

impl ProviderMetadata {
    /// Metadata with defaults: priority 100, enabled, chat + streaming, free.
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            display_name: name.clone(),
            provider_type: name.clone(),
            name,
            capabilities: Capabilities::default(),
            priority: 100,
            enabled: true,
            pricing: Pricing::default(),
        }
    }

    pub fn with_priority(mut self, priority: u32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_pricing(mut self, pricing: Pricing) -> Self {
        self.pricing = pricing;
        self
    }

    pub fn with_capabilities(mut self, capabilities: Capabilities) -> Self {
        self.capabilities = capabilities;
        self
    }

    pub fn with_type(mut self, provider_type: impl Into<String>) -> Self {
        self.provider_type = provider_type.into();
        self
    }

    pub fn with_display_name(mut self, display_name: impl Into<String>) -> Self {
        self.display_name = display_name.into();
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }
}

/// Configuration for a completion request.
#[derive(Debug, Clone)]
pub struct CompletionConfig {
    /// Model to use; `None` lets the provider pick its default
    pub model: Option<String>,

    /// Maximum tokens to generate
    pub max_tokens: u32,

    /// Temperature (0.0 for deterministic)
    pub temperature: f32,

    /// Request timeout, enforced by the provider client
    pub timeout: Duration,
}

impl Default for CompletionConfig {
    fn default() -> Self {
        Self {
            model: None,
            max_tokens: 1024,
            temperature: 0.0,
            timeout: Duration::from_secs(30),
        }
    }
}

/// Response from a chat completion.
#[derive(Debug, Clone)]
pub struct CompletionResponse {
    /// Generated content
    pub content: String,

    /// Token usage
    pub usage: TokenUsage,

    /// Model used
    pub model: String,

    /// Stop reason
    pub stop_reason: Option<String>,

    /// Provider that answered, set by the orchestrator
    pub provider: Option<String>,

    /// Cost in USD, set by the orchestrator from the provider's pricing
    pub cost: Option<f64>,
}

impl CompletionResponse {
    /// A response with no provider attribution or cost yet.
    pub fn new(content: impl Into<String>, model: impl Into<String>, usage: TokenUsage) -> Self {
        Self {
            content: content.into(),
            usage,
            model: model.into(),
            stop_reason: None,
            provider: None,
            cost: None,
        }
    }
}

/// Token usage reported by a provider.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TokenUsage {
    /// Tokens in the prompt
    pub input_tokens: u32,

    /// Tokens in the completion
    pub output_tokens: u32,
}

impl TokenUsage {
    pub fn new(input_tokens: u32, output_tokens: u32) -> Self {
        Self {
            input_tokens,
            output_tokens,
        }
    }

    /// Total tokens used.
    pub fn total(&self) -> u32 {
        self.input_tokens.saturating_add(self.output_tokens)
    }
}

/// Incremental chunk callback for streaming.
pub type StreamCallback = Arc<dyn Fn(&str) + Send + Sync>;

/// Image generation request.
#[derive(Debug, Clone, Default)]
pub struct ImageRequest {
    pub prompt: String,
    pub size: Option<String>,
    pub model: Option<String>,
}

/// Generated image.
#[derive(Debug, Clone, Default)]
pub struct ImageResponse {
    pub url: Option<String>,
    pub data: Option<Vec<u8>>,
    pub model: String,
    pub usage: Option<TokenUsage>,
}

/// Speech synthesis request.
#[derive(Debug, Clone, Default)]
pub struct SpeechRequest {
    pub text: String,
    pub voice: Option<String>,
    pub model: Option<String>,
}

/// Synthesized audio.
#[derive(Debug, Clone, Default)]
pub struct SpeechResponse {
    pub audio: Vec<u8>,

    /// Container format, e.g. "mp3"
    pub format: String,

    pub model: String,
    pub usage: Option<TokenUsage>,
}

/// Backend client contract.
///
/// Every modality except chat has a default that reports it unsupported,
/// so a client only implements what its backend offers. Streaming falls
/// back to a single chunk carrying the full completion.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Execute a chat completion.
    async fn complete(
        &self,
        messages: Vec<ChatMessage>,
        config: &CompletionConfig,
    ) -> Result<CompletionResponse, ProviderError>;

    /// Stream a chat completion, invoking `on_chunk` per increment.
    async fn stream(
        &self,
        messages: Vec<ChatMessage>,
        config: &CompletionConfig,
        on_chunk: StreamCallback,
    ) -> Result<CompletionResponse, ProviderError> {
        let response = self.complete(messages, config).await?;
        on_chunk(&response.content);
        Ok(response)
    }

    /// Generate an embedding.
    ///
    /// Embedding backends do not report usage, so embedding calls carry no
    /// cost attribution.
    async fn embed(&self, _input: &str, _model: Option<&str>) -> Result<Vec<f32>, ProviderError> {
        Err(ProviderError::Unsupported {
            provider: self.name().to_string(),
            modality: Modality::Embeddings,
        })
    }

    /// Generate an image.
    async fn generate_image(&self, _request: &ImageRequest) -> Result<ImageResponse, ProviderError> {
        Err(ProviderError::Unsupported {
            provider: self.name().to_string(),
            modality: Modality::Images,
        })
    }

    /// Synthesize speech.
    async fn synthesize_speech(
        &self,
        _request: &SpeechRequest,
    ) -> Result<SpeechResponse, ProviderError> {
        Err(ProviderError::Unsupported {
            provider: self.name().to_string(),
            modality: Modality::Speech,
        })
    }

    /// Check if provider is healthy.
    async fn health_check(&self) -> bool;

    /// Get provider name for metrics.
    fn name(&self) -> &str;

    /// Estimate tokens for a prompt.
    fn estimate_tokens(&self, text: &str) -> u32 {
        // Simple estimate: ~4 chars per token
        (text.len() / 4) as u32
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct EchoProvider;

    #[async_trait]
    impl LlmProvider for EchoProvider {
        async fn complete(
            &self,
            messages: Vec<ChatMessage>,
            _config: &CompletionConfig,
        ) -> Result<CompletionResponse, ProviderError> {
            let last = messages.last().map(|m| m.content.clone()).unwrap_or_default();
            Ok(CompletionResponse::new(last, "echo-1", TokenUsage::new(3, 3)))
        }

        async fn health_check(&self) -> bool {
            true
        }

        fn name(&self) -> &str {
            "echo"
        }
    }

    #[test]
    fn test_token_total_saturates() {
        assert_eq!(TokenUsage::new(3, 4).total(), 7);
        assert_eq!(TokenUsage::new(u32::MAX, 10).total(), u32::MAX);
    }

    #[test]
    fn test_chat_message_creation() {
        let system = ChatMessage::system("You are a helpful assistant.");
        assert_eq!(system.role, Role::System);

        let user = ChatMessage::user("Hello!");
        assert_eq!(user.role, Role::User);
    }

    #[test]
    fn test_token_usage_total() {
        let usage = TokenUsage::new(100, 50);
        assert_eq!(usage.total(), 150);
    }

    #[test]
    fn test_pricing() {
        let pricing = Pricing::new(0.5, 1.5);
        let cost = pricing.cost(&TokenUsage::new(2000, 1000));
        assert!((cost - 2.5).abs() < 1e-9);
        assert!((pricing.effective_price() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_retryable() {
        assert!(ProviderError::Timeout(Duration::from_secs(1)).is_retryable());
        assert!(ProviderError::RateLimited { retry_after: None }.is_retryable());
        assert!(!ProviderError::AuthError.is_retryable());
        assert!(!ProviderError::Cancelled.is_retryable());
    }

    #[tokio::test]
    async fn test_default_stream_emits_one_chunk() {
        let chunks = Arc::new(Mutex::new(Vec::new()));
        let sink = chunks.clone();
        let callback: StreamCallback = Arc::new(move |chunk| sink.lock().unwrap().push(chunk.to_string()));

        let response = EchoProvider
            .stream(vec![ChatMessage::user("hi")], &CompletionConfig::default(), callback)
            .await
            .unwrap();

        assert_eq!(response.content, "hi");
        assert_eq!(*chunks.lock().unwrap(), vec!["hi".to_string()]);
    }

    #[tokio::test]
    async fn test_default_modalities_unsupported() {
        let err = EchoProvider.embed("text", None).await.unwrap_err();
        assert!(matches!(
            err,
            ProviderError::Unsupported {
                modality: Modality::Embeddings,
                ..
            }
        ));
        assert!(EchoProvider.generate_image(&ImageRequest::default()).await.is_err());
        assert!(EchoProvider.synthesize_speech(&SpeechRequest::default()).await.is_err());
    }
}
