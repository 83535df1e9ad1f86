//! Agent-level events delivered to the frontend while a turn runs.

use llmcode_core::{ErrorCode, ToolStatus, Usage};
use serde::{Deserialize, Serialize};

/// Observable states of the agent loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentState {
    Idle,
    AwaitingModel,
    Streaming,
    ToolPending,
    Confirming,
    Executing,
    Cancelled,
}

impl AgentState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::AwaitingModel => "awaiting_model",
            Self::Streaming => "streaming",
            Self::ToolPending => "tool_pending",
            Self::Confirming => "confirming",
            Self::Executing => "executing",
            Self::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for AgentState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Events emitted by the agent during a turn.
///
/// - `token`       - visible text from the model
/// - `thinking`    - text inside `<think>` tags
/// - `tool_call`   - a directive was parsed and is about to run
/// - `tool_result` - the call resolved
/// - `notice`      - informational message (turn limit, cancellation)
/// - `done`        - the turn is over
/// - `error`       - the model side failed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentEvent {
    State { state: AgentState },

    Token { text: String },

    Thinking { text: String },

    ToolCall {
        id: String,
        name: String,
        arguments: serde_json::Value,
    },

    ToolResult {
        id: String,
        name: String,
        status: ToolStatus,
        output: String,
    },

    Notice { message: String },

    Done {
        usage: Usage,
        iterations: usize,
        tool_calls_made: usize,
    },

    Error { code: ErrorCode, message: String },
}

impl AgentEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::State { .. } => "state",
            Self::Token { .. } => "token",
            Self::Thinking { .. } => "thinking",
            Self::ToolCall { .. } => "tool_call",
            Self::ToolResult { .. } => "tool_result",
            Self::Notice { .. } => "notice",
            Self::Done { .. } => "done",
            Self::Error { .. } => "error",
        }
    }
}
