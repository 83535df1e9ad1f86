//! Conversation turn types.
//!
//! A turn is one append to a session's history: the user's text, an
//! assistant reply (possibly carrying tool calls), or the result of one
//! tool call.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::tool::{ToolCall, ToolResult, ToolStatus};

/// The role of a message sender.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Instructions and assembled context (prompt only, never stored in history)
    System,
    /// The end user
    User,
    /// The model
    Assistant,
    /// Tool execution result
    Tool,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::System => "system",
            Self::User => "user",
            Self::Assistant => "assistant",
            Self::Tool => "tool",
        }
    }
}

/// A single entry in a session's history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationTurn {
    /// Unique turn ID
    pub id: String,

    pub role: Role,

    /// The text content
    pub content: String,

    /// Tool calls requested by the assistant (assistant turns only)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,

    /// Which tool call this turn answers (tool turns only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,

    /// Outcome of the tool call (tool turns only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<ToolStatus>,

    pub timestamp: DateTime<Utc>,
}

impl ConversationTurn {
    fn new(role: Role, content: String) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            role,
            content,
            tool_calls: Vec::new(),
            tool_call_id: None,
            status: None,
            timestamp: Utc::now(),
        }
    }

    /// Create a new user turn.
    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content.into())
    }

    /// Create an assistant turn with no tool calls.
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content.into())
    }

    /// Create an assistant turn that issues tool calls.
    pub fn assistant_with_calls(content: impl Into<String>, tool_calls: Vec<ToolCall>) -> Self {
        let mut turn = Self::new(Role::Assistant, content.into());
        turn.tool_calls = tool_calls;
        turn
    }

    /// Create a tool turn from a resolved tool call.
    pub fn tool(result: &ToolResult) -> Self {
        let mut turn = Self::new(Role::Tool, result.output.clone());
        turn.tool_call_id = Some(result.tool_call_id.clone());
        turn.status = Some(result.status);
        turn
    }

    pub fn has_tool_calls(&self) -> bool {
        !self.tool_calls.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_user_turn() {
        let turn = ConversationTurn::user("Hello, agent!");
        assert_eq!(turn.role, Role::User);
        assert_eq!(turn.content, "Hello, agent!");
        assert!(turn.tool_calls.is_empty());
        assert!(turn.tool_call_id.is_none());
    }

    #[test]
    fn tool_turn_carries_call_id_and_status() {
        let turn = ConversationTurn::tool(&ToolResult::error("call_7", "boom"));
        assert_eq!(turn.role, Role::Tool);
        assert_eq!(turn.tool_call_id.as_deref(), Some("call_7"));
        assert_eq!(turn.status, Some(ToolStatus::Error));
        assert_eq!(turn.content, "boom");
    }

    #[test]
    fn plain_turns_omit_tool_fields_when_serialized() {
        let json = serde_json::to_string(&ConversationTurn::user("hi")).unwrap();
        assert!(!json.contains("tool_calls"));
        assert!(!json.contains("tool_call_id"));
        assert!(json.contains(r#""role":"user""#));
    }
}
