//! Error types for the llmcode domain.
//!
//! Uses `thiserror` for ergonomic error definitions.
//! Each bounded context has its own error variant.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// The top-level error type for all llmcode operations.
#[derive(Debug, Error)]
pub enum Error {
    // --- Provider errors ---
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    // --- Tool errors ---
    #[error("Tool error: {0}")]
    Tool(#[from] ToolError),

    // --- Index / summary store errors ---
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    // --- Configuration errors ---
    #[error("Configuration error: {message}")]
    Config { message: String },

    // --- Serialization ---
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // --- Generic ---
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias using our Error.
pub type Result<T> = std::result::Result<T, Error>;

/// Machine-readable failure codes reported by the model-serving side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    Unauthorized,
    RateLimited,
    MalformedRequest,
    ModelUnavailable,
    ContextTooLong,
    UpstreamFailure,
    InternalFailure,
}

impl ErrorCode {
    /// Map an HTTP status from the routing server to a code.
    pub fn from_status(status: u16) -> Self {
        match status {
            401 | 403 => Self::Unauthorized,
            429 => Self::RateLimited,
            400 | 422 => Self::MalformedRequest,
            404 | 503 => Self::ModelUnavailable,
            413 => Self::ContextTooLong,
            502 | 504 => Self::UpstreamFailure,
            _ => Self::InternalFailure,
        }
    }

    /// Parse a code string carried in an `error` stream event.
    ///
    /// Accepts both our snake_case names and the server's SHOUTY names
    /// (`OLLAMA_ERROR`, `INVALID_REQUEST`, ...). Unknown codes map to
    /// `InternalFailure`.
    pub fn parse(code: &str) -> Self {
        match code.to_ascii_lowercase().as_str() {
            "unauthorized" | "invalid_api_key" => Self::Unauthorized,
            "rate_limited" | "rate_limit_exceeded" => Self::RateLimited,
            "malformed_request" | "invalid_request" => Self::MalformedRequest,
            "model_unavailable" | "model_not_found" => Self::ModelUnavailable,
            "context_too_long" | "context_length_exceeded" => Self::ContextTooLong,
            "upstream_failure" | "ollama_error" | "upstream_timeout" => Self::UpstreamFailure,
            _ => Self::InternalFailure,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unauthorized => "unauthorized",
            Self::RateLimited => "rate_limited",
            Self::MalformedRequest => "malformed_request",
            Self::ModelUnavailable => "model_unavailable",
            Self::ContextTooLong => "context_too_long",
            Self::UpstreamFailure => "upstream_failure",
            Self::InternalFailure => "internal_failure",
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// --- Bounded context errors ---

#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    #[error("Request failed [{code}]: {message}")]
    Api { code: ErrorCode, message: String },

    #[error("Stream interrupted: {0}")]
    StreamInterrupted(String),

    #[error("Provider not configured: {0}")]
    NotConfigured(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

impl ProviderError {
    /// The machine-readable code for this failure.
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::Api { code, .. } => *code,
            Self::StreamInterrupted(_) | Self::Timeout(_) | Self::Network(_) => {
                ErrorCode::UpstreamFailure
            }
            Self::NotConfigured(_) => ErrorCode::ModelUnavailable,
            Self::InvalidResponse(_) => ErrorCode::InternalFailure,
        }
    }
}

#[derive(Debug, Error)]
pub enum ToolError {
    #[error("Unknown tool: {0}")]
    UnknownTool(String),

    #[error("Invalid tool arguments: {0}")]
    InvalidArguments(String),

    #[error("Path '{path}' resolves outside the project root")]
    OutsideRoot { path: String },

    #[error("Tool execution failed: {tool_name} — {reason}")]
    ExecutionFailed { tool_name: String, reason: String },

    #[error("Tool timed out: {tool_name} after {timeout_secs}s")]
    Timeout { tool_name: String, timeout_secs: u64 },

    #[error("Command blocked: {0}")]
    Blocked(String),
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Corrupt store file {path}: {reason}")]
    Corrupt { path: String, reason: String },

    #[error("Embedding generation failed: {0}")]
    EmbeddingFailed(String),

    #[error("Summary generation failed: {0}")]
    SummaryFailed(String),
}
