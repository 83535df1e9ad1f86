//! Provider trait: the abstraction over the model-serving side.
//!
//! A Provider knows how to submit a completion request and hand back a
//! [`CompletionStream`], how to embed a batch of texts, and how to
//! summarize a file. The agent loop, the retrieval index and the summary
//! store only ever see this trait.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ProviderError;
use crate::message::Role;
use crate::stream::CompletionStream;

/// Upper bound on texts per embedding request.
pub const MAX_EMBED_BATCH: usize = 100;

/// One prompt message as sent on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }
}

/// Generation options for a completion request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationOptions {
    /// Model id (e.g., "llama3.2:3b")
    pub model: String,

    /// Temperature (0.0 = deterministic)
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Maximum tokens to generate
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
}

fn default_temperature() -> f32 {
    0.3
}

fn default_max_tokens() -> u32 {
    4096
}

impl GenerationOptions {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InlineFile {
    pub path: String,
    pub content: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InlineSummary {
    pub path: String,
    pub summary: String,
}

/// File and summary context sent alongside the messages.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InlineContext {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub files: Vec<InlineFile>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub summaries: Vec<InlineSummary>,
}

impl InlineContext {
    pub fn is_empty(&self) -> bool {
        self.files.is_empty() && self.summaries.is_empty()
    }
}

/// A completion request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletionRequest {
    pub messages: Vec<ChatMessage>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<InlineContext>,

    pub options: GenerationOptions,
}

/// Token usage information.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    #[serde(default)]
    pub prompt_tokens: u32,
    #[serde(default)]
    pub completion_tokens: u32,
    #[serde(default)]
    pub total_tokens: u32,
}

impl Usage {
    /// Sum two usage reports (used across the model turns of one user turn).
    pub fn add(&mut self, other: &Usage) {
        self.prompt_tokens += other.prompt_tokens;
        self.completion_tokens += other.completion_tokens;
        self.total_tokens += other.total_tokens;
    }
}

/// An embedding request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingRequest {
    /// The texts to embed (at most [`MAX_EMBED_BATCH`]).
    pub texts: Vec<String>,

    /// The embedding model; the server default when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

/// An embedding response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingResponse {
    /// One vector per input text, in input order.
    pub embeddings: Vec<Vec<f32>>,

    #[serde(default)]
    pub model: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
}

/// A file summarization request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SummaryRequest {
    pub path: String,
    pub content: String,
    pub language: String,
    pub model: String,
    /// Maximum summary length in tokens
    pub max_length: u32,
}

/// The core Provider trait.
///
/// `stream` is the only required capability. Embedding is optional and
/// summarization falls back to a plain completion request.
#[async_trait]
pub trait Provider: Send + Sync {
    /// A human-readable name for this provider.
    fn name(&self) -> &str;

    /// Submit a completion request and get its event stream.
    async fn stream(&self, request: CompletionRequest) -> Result<CompletionStream, ProviderError>;

    /// Embed a batch of texts.
    async fn embed(&self, _request: EmbeddingRequest) -> Result<EmbeddingResponse, ProviderError> {
        Err(ProviderError::NotConfigured(format!(
            "{} does not support embeddings",
            self.name()
        )))
    }

    /// Summarize one file.
    ///
    /// Default implementation phrases the job as a completion request and
    /// collects the stream.
    async fn summarize(&self, request: SummaryRequest) -> Result<String, ProviderError> {
        let prompt = format!(
            "Summarize the purpose and key contents of this {} file in under {} tokens.\n\nFile: {}\n\n{}",
            request.language, request.max_length, request.path, request.content
        );
        let completion = CompletionRequest {
            messages: vec![ChatMessage::user(prompt)],
            context: None,
            options: GenerationOptions {
                model: request.model,
                temperature: 0.2,
                max_tokens: request.max_length,
            },
        };
        let (text, _usage) = self.stream(completion).await?.collect_text().await?;
        Ok(text.trim().to_string())
    }

    /// Check whether the provider is reachable.
    async fn health_check(&self) -> Result<bool, ProviderError> {
        Ok(true)
    }
}
