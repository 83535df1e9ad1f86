//! Tool call and result types, plus the closed set of tool kinds.
//!
//! The model names a tool in its output; the name is mapped onto
//! [`ToolKind`] and anything outside that set is reported back to the
//! model as an error result rather than dispatched dynamically.

use serde::{Deserialize, Serialize};

/// A request to execute a tool, parsed from an assistant turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    /// Unique call ID within the issuing turn
    pub id: String,

    /// Name of the tool to execute, as emitted by the model
    pub name: String,

    /// Arguments as a JSON object
    #[serde(default)]
    pub arguments: serde_json::Value,
}

impl ToolCall {
    pub fn new(id: impl Into<String>, name: impl Into<String>, arguments: serde_json::Value) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            arguments,
        }
    }

    /// The tool kind this call targets, if the name is known.
    pub fn kind(&self) -> Option<ToolKind> {
        ToolKind::parse(&self.name)
    }
}

/// Outcome category of a tool call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolStatus {
    Ok,
    Error,
    /// The user declined a confirmation. Not an error.
    Rejected,
}

impl std::fmt::Display for ToolStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Ok => f.write_str("ok"),
            Self::Error => f.write_str("error"),
            Self::Rejected => f.write_str("rejected"),
        }
    }
}

/// The result of resolving one tool call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    /// The call ID this result answers
    pub tool_call_id: String,

    /// Output text (or failure message)
    pub output: String,

    pub status: ToolStatus,
}

impl ToolResult {
    pub fn ok(tool_call_id: impl Into<String>, output: impl Into<String>) -> Self {
        Self {
            tool_call_id: tool_call_id.into(),
            output: output.into(),
            status: ToolStatus::Ok,
        }
    }

    pub fn error(tool_call_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            tool_call_id: tool_call_id.into(),
            output: message.into(),
            status: ToolStatus::Error,
        }
    }

    pub fn rejected(tool_call_id: impl Into<String>) -> Self {
        Self {
            tool_call_id: tool_call_id.into(),
            output: "User rejected this action; it was not performed.".into(),
            status: ToolStatus::Rejected,
        }
    }
}

/// Every tool the assistant can invoke.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolKind {
    ListFiles,
    ReadFile,
    SearchCode,
    WriteFile,
    GitStatus,
    GitDiff,
    RunCommand,
}

impl ToolKind {
    pub const ALL: [ToolKind; 7] = [
        ToolKind::ListFiles,
        ToolKind::ReadFile,
        ToolKind::SearchCode,
        ToolKind::WriteFile,
        ToolKind::GitStatus,
        ToolKind::GitDiff,
        ToolKind::RunCommand,
    ];

    pub fn parse(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.name() == name)
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::ListFiles => "list_files",
            Self::ReadFile => "read_file",
            Self::SearchCode => "search_code",
            Self::WriteFile => "write_file",
            Self::GitStatus => "git_status",
            Self::GitDiff => "git_diff",
            Self::RunCommand => "run_command",
        }
    }

    /// Mutating tools change the project tree or run arbitrary code and
    /// must be confirmed by the user first.
    pub fn is_mutating(&self) -> bool {
        matches!(self, Self::WriteFile | Self::RunCommand)
    }

    /// One-line description shown to the model.
    pub fn description(&self) -> &'static str {
        match self {
            Self::ListFiles => "List files and directories in a path",
            Self::ReadFile => "Read file content (supports line ranges for large files)",
            Self::SearchCode => "Search for text in code files",
            Self::WriteFile => "Write content to a file (requires user confirmation)",
            Self::GitStatus => "Check git status (branch, changed files)",
            Self::GitDiff => "Show git diff",
            Self::RunCommand => "Run a terminal command (requires user confirmation)",
        }
    }

    /// Example invocation in the directive format the parser accepts.
    pub fn example(&self) -> &'static str {
        match self {
            Self::ListFiles => r#"{"tool": "list_files", "args": {"path": "."}}"#,
            Self::ReadFile => r#"{"tool": "read_file", "args": {"path": "src/main.py", "line_start": 1, "line_end": 80}}"#,
            Self::SearchCode => r#"{"tool": "search_code", "args": {"query": "parse_config"}}"#,
            Self::WriteFile => r#"{"tool": "write_file", "args": {"path": "src/a.py", "content": "..."}}"#,
            Self::GitStatus => r#"{"tool": "git_status", "args": {}}"#,
            Self::GitDiff => r#"{"tool": "git_diff", "args": {"file": "src/a.py"}}"#,
            Self::RunCommand => r#"{"tool": "run_command", "args": {"command": "pytest -q"}}"#,
        }
    }
}

impl std::fmt::Display for ToolKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}
