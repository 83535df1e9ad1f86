//! Project knowledge types: chunks, summaries and the context budget.
//!
//! `content_hash` is the single staleness signal for both summaries and
//! indexed chunks. Nothing here is invalidated by time.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// SHA-256 hex digest of file bytes.
pub fn content_hash(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// A half-open byte range `[start, end)` within a file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ByteRange {
    pub start: usize,
    pub end: usize,
}

impl ByteRange {
    pub fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }

    pub fn len(&self) -> usize {
        self.end.saturating_sub(self.start)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A contiguous slice of a file, the unit of semantic retrieval.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileChunk {
    /// Path relative to the project root
    pub path: String,

    pub byte_range: ByteRange,

    /// Hash of the whole file this chunk was cut from
    pub content_hash: String,

    /// The chunk text
    pub content: String,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub embedding: Vec<f32>,
}

/// A cached natural-language summary of one file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileSummary {
    pub path: String,
    pub content_hash: String,
    pub text: String,
    pub generated_at: DateTime<Utc>,
}

impl FileSummary {
    /// Whether this summary still describes a file with the given hash.
    pub fn is_fresh(&self, live_hash: &str) -> bool {
        self.content_hash == live_hash
    }
}

/// Token budget for one prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextBudget {
    /// The model's context length
    pub max_tokens: usize,

    /// Tokens held back for the model's reply
    pub reserved_for_response: usize,
}

impl ContextBudget {
    pub fn new(max_tokens: usize, reserved_for_response: usize) -> Self {
        Self {
            max_tokens,
            reserved_for_response,
        }
    }

    /// Tokens the prompt itself may use.
    pub fn available(&self) -> usize {
        self.max_tokens.saturating_sub(self.reserved_for_response)
    }
}

impl Default for ContextBudget {
    fn default() -> Self {
        Self::new(8192, 2048)
    }
}
