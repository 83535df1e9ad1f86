//! Token estimation utilities.
//!
//! Uses a character-based heuristic: ~4 bytes per token, rounded up. The
//! server-side tokenizer is unknown to the client, so budgets are enforced
//! against this estimate.

use llmcode_core::ChatMessage;

/// Per-message overhead for role name and delimiters.
pub const MESSAGE_OVERHEAD: usize = 4;

/// Estimate the token count for a string.
pub fn estimate_tokens(text: &str) -> usize {
    text.len().div_ceil(4)
}

/// Estimate tokens for a single message including per-message overhead.
pub fn estimate_message_tokens(message: &ChatMessage) -> usize {
    MESSAGE_OVERHEAD + estimate_tokens(&message.content)
}

/// Estimate tokens for a slice of messages.
pub fn estimate_messages_tokens(messages: &[ChatMessage]) -> usize {
    messages.iter().map(estimate_message_tokens).sum()
}
