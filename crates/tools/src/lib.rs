//! Built-in tools for llmcode.
//!
//! Every tool works inside one project root: paths are resolved through
//! `llmcode_security::resolve_in_root` and nothing outside it is read or
//! written. Read-only tools run straight away; `write_file` and
//! `run_command` are split into [`ToolExecutor::prepare`] (compute the
//! effect, show it to the user) and [`ToolExecutor::apply`] (perform it
//! once confirmed).
//!
//! Failures never escape as `Err`: they come back as a
//! [`ToolResult`] with `error` status so the model can react to them.

pub mod diff;
pub mod git;
pub mod list_files;
pub mod prompt;
pub mod read_file;
pub mod run_command;
pub mod search_code;
pub mod write_file;

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use llmcode_config::ToolsConfig;
use llmcode_core::error::ToolError;
use llmcode_core::tool::{ToolCall, ToolKind, ToolResult};
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

pub use prompt::tools_prompt;

/// Bounds applied to tool execution and tool output.
#[derive(Debug, Clone)]
pub struct ToolLimits {
    pub command_timeout: Duration,
    pub search_max_matches: usize,
    pub search_max_depth: usize,
    /// Output handed back to the model is cut to this many characters.
    pub max_output_chars: usize,
}

impl Default for ToolLimits {
    fn default() -> Self {
        Self::from(&ToolsConfig::default())
    }
}

impl From<&ToolsConfig> for ToolLimits {
    fn from(config: &ToolsConfig) -> Self {
        Self {
            command_timeout: Duration::from_secs(config.command_timeout_secs),
            search_max_matches: config.search_max_matches,
            search_max_depth: config.search_max_depth,
            max_output_chars: config.max_output_chars,
        }
    }
}

/// A side effect awaiting user confirmation.
#[derive(Debug, Clone, PartialEq)]
pub enum PendingEffect {
    WriteFile {
        /// Path as shown to the user, relative to the project root
        path: String,
        /// Resolved absolute target
        target: PathBuf,
        /// Unified diff of the current content against `new_content`
        diff: String,
        new_content: String,
    },
    RunCommand { command: String, cwd: PathBuf },
}

impl PendingEffect {
    pub fn kind(&self) -> ToolKind {
        match self {
            Self::WriteFile { .. } => ToolKind::WriteFile,
            Self::RunCommand { .. } => ToolKind::RunCommand,
        }
    }

    /// What the user is asked to approve: the diff, or the literal command.
    pub fn preview(&self) -> String {
        match self {
            Self::WriteFile { path, diff, .. } if diff.is_empty() => {
                format!("write_file {path}: content unchanged")
            }
            Self::WriteFile { diff, .. } => diff.clone(),
            Self::RunCommand { command, cwd } => format!("$ {command}\n(in {})", cwd.display()),
        }
    }
}

/// Runs tool calls against a single project root.
pub struct ToolExecutor {
    root: PathBuf,
    limits: ToolLimits,
}

impl ToolExecutor {
    pub fn new(root: impl Into<PathBuf>, limits: ToolLimits) -> Self {
        Self {
            root: root.into(),
            limits,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn limits(&self) -> &ToolLimits {
        &self.limits
    }

    /// Work out what a mutating call would do without doing it.
    ///
    /// Blocked commands and bad paths are refused here, before the user is
    /// asked anything.
    pub async fn prepare(&self, call: &ToolCall) -> Result<PendingEffect, ToolError> {
        match call.kind() {
            Some(ToolKind::WriteFile) => {
                write_file::prepare(&self.root, parse_args(call)?).await
            }
            Some(ToolKind::RunCommand) => run_command::prepare(&self.root, parse_args(call)?),
            Some(kind) => Err(ToolError::InvalidArguments(format!(
                "{kind} has no side effect to confirm"
            ))),
            None => Err(ToolError::UnknownTool(call.name.clone())),
        }
    }

    /// Perform a confirmed effect.
    pub async fn apply(&self, call_id: &str, effect: &PendingEffect) -> ToolResult {
        let kind = effect.kind();
        let started = Instant::now();
        let outcome = match effect {
            PendingEffect::WriteFile {
                path,
                target,
                new_content,
                ..
            } => write_file::apply(path, target, new_content).await,
            PendingEffect::RunCommand { command, cwd } => {
                run_command::run(command, cwd, self.limits.command_timeout).await
            }
        };
        self.finish(call_id, kind, outcome, started)
    }

    /// Execute a call end to end. Mutating calls are prepared and applied
    /// without asking; callers that need confirmation use
    /// [`prepare`](Self::prepare) and [`apply`](Self::apply) instead.
    pub async fn execute(&self, call: &ToolCall) -> ToolResult {
        let Some(kind) = call.kind() else {
            warn!(tool = %call.name, "Unknown tool requested");
            return ToolResult::error(&call.id, ToolError::UnknownTool(call.name.clone()).to_string());
        };

        if kind.is_mutating() {
            return match self.prepare(call).await {
                Ok(effect) => self.apply(&call.id, &effect).await,
                Err(e) => self.finish(&call.id, kind, Err(e), Instant::now()),
            };
        }

        let started = Instant::now();
        let outcome = self.run_read_only(kind, call).await;
        self.finish(&call.id, kind, outcome, started)
    }

    async fn run_read_only(&self, kind: ToolKind, call: &ToolCall) -> Result<String, ToolError> {
        debug!(tool = %kind, call_id = %call.id, "Executing tool");
        match kind {
            ToolKind::ListFiles => list_files::run(&self.root, parse_args(call)?),
            ToolKind::ReadFile => read_file::run(&self.root, parse_args(call)?).await,
            ToolKind::SearchCode => search_code::run(&self.root, parse_args(call)?, &self.limits),
            ToolKind::GitStatus => git::status(&self.root, parse_args(call)?).await,
            ToolKind::GitDiff => git::diff(&self.root, parse_args(call)?).await,
            ToolKind::WriteFile | ToolKind::RunCommand => Err(ToolError::InvalidArguments(
                format!("{kind} requires confirmation"),
            )),
        }
    }

    fn finish(
        &self,
        call_id: &str,
        kind: ToolKind,
        outcome: Result<String, ToolError>,
        started: Instant,
    ) -> ToolResult {
        let elapsed_ms = started.elapsed().as_millis() as u64;
        match outcome {
            Ok(output) => {
                debug!(tool = %kind, call_id, elapsed_ms, "Tool succeeded");
                ToolResult::ok(call_id, truncate(&output, self.limits.max_output_chars))
            }
            Err(e) => {
                warn!(tool = %kind, call_id, error = %e, "Tool failed");
                ToolResult::error(call_id, truncate(&e.to_string(), self.limits.max_output_chars))
            }
        }
    }
}

/// Deserialize a call's arguments. A missing `args` object counts as empty.
fn parse_args<T: DeserializeOwned>(call: &ToolCall) -> Result<T, ToolError> {
    let value = match &call.arguments {
        serde_json::Value::Null => serde_json::Value::Object(Default::default()),
        other => other.clone(),
    };
    serde_json::from_value(value)
        .map_err(|e| ToolError::InvalidArguments(format!("{}: {e}", call.name)))
}

/// Cut `text` to at most `max_chars` characters, marking the cut.
pub(crate) fn truncate(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((cut, _)) => format!("{}\n... (truncated)", &text[..cut]),
        None => text.to_string(),
    }
}

pub(crate) fn default_path() -> String {
    ".".into()
}

/// Resolve a tool path, mapping guard failures onto [`ToolError`].
pub(crate) fn resolve(root: &Path, path: &str) -> Result<PathBuf, ToolError> {
    llmcode_security::resolve_in_root(root, path).map_err(|e| match e {
        llmcode_security::PathValidationError::OutsideRoot { path } => {
            ToolError::OutsideRoot { path }
        }
        other => ToolError::InvalidArguments(other.to_string()),
    })
}

pub(crate) fn failed(kind: ToolKind, reason: impl Into<String>) -> ToolError {
    ToolError::ExecutionFailed {
        tool_name: kind.name().into(),
        reason: reason.into(),
    }
}
