//! # llmcode Core
//!
//! Domain types, traits, and error definitions for the llmcode assistant.
//! Every other crate depends inward on this one: sessions and turns, the
//! closed tool set, project knowledge (chunks, summaries, budgets), and
//! the `Provider` seam with its cancellable completion stream.

pub mod error;
pub mod event;
pub mod knowledge;
pub mod message;
pub mod provider;
pub mod session;
pub mod stream;
pub mod tool;

// Re-export key types at crate root for ergonomics
pub use error::{Error, ErrorCode, ProviderError, Result, StoreError, ToolError};
pub use event::{DomainEvent, EventBus};
pub use knowledge::{ByteRange, ContextBudget, FileChunk, FileSummary, content_hash};
pub use message::{ConversationTurn, Role};
pub use provider::{
    ChatMessage, CompletionRequest, EmbeddingRequest, EmbeddingResponse, GenerationOptions,
    InlineContext, Provider, SummaryRequest, Usage,
};
pub use session::{Session, SessionConfig, SessionId};
pub use stream::{CompletionStream, StreamEvent, StreamSender};
pub use tool::{ToolCall, ToolKind, ToolResult, ToolStatus};
