//! `run_command`: run a shell command in the project root.
//!
//! Commands on the blocklist are refused before confirmation. Accepted ones
//! run under `sh -c` with a timeout and are killed if it expires.

use std::path::Path;
use std::time::Duration;

use llmcode_core::error::ToolError;
use llmcode_core::tool::ToolKind;
use serde::Deserialize;
use tokio::process::Command;
use tracing::{debug, warn};

use crate::{PendingEffect, failed, truncate};

/// Combined stdout/stderr is cut to this many characters.
const MAX_COMMAND_OUTPUT: usize = 5000;

#[derive(Debug, Deserialize)]
pub struct RunCommandArgs {
    pub command: String,
}

pub fn prepare(root: &Path, args: RunCommandArgs) -> Result<PendingEffect, ToolError> {
    let command = args.command.trim();
    if command.is_empty() {
        return Err(ToolError::InvalidArguments("run_command: empty command".into()));
    }
    llmcode_security::check_command(command).map_err(|e| ToolError::Blocked(e.to_string()))?;

    Ok(PendingEffect::RunCommand {
        command: command.to_string(),
        cwd: root.to_path_buf(),
    })
}

/// Run `command` and collect its output. A non-zero exit is an error that
/// carries the exit code and whatever the command printed.
pub async fn run(command: &str, cwd: &Path, timeout: Duration) -> Result<String, ToolError> {
    debug!(command, cwd = %cwd.display(), "Executing shell command");

    let child = Command::new("sh")
        .args(["-c", command])
        .current_dir(cwd)
        .kill_on_drop(true)
        .output();

    let output = match tokio::time::timeout(timeout, child).await {
        Ok(Ok(output)) => output,
        Ok(Err(e)) => return Err(failed(ToolKind::RunCommand, e.to_string())),
        Err(_) => {
            warn!(command, timeout_secs = timeout.as_secs(), "Command timed out");
            return Err(ToolError::Timeout {
                tool_name: ToolKind::RunCommand.name().into(),
                timeout_secs: timeout.as_secs(),
            });
        }
    };

    let stdout = String::from_utf8_lossy(&output.stdout);
    let stderr = String::from_utf8_lossy(&output.stderr);

    if output.status.success() {
        let text = if stderr.trim().is_empty() {
            stdout.into_owned()
        } else {
            format!("{stdout}\n[stderr]: {stderr}")
        };
        let text = text.trim();
        return Ok(if text.is_empty() {
            "(no output)".into()
        } else {
            truncate(text, MAX_COMMAND_OUTPUT)
        });
    }

    let code = output.status.code().unwrap_or(-1);
    warn!(command, exit_code = code, "Command failed");
    let text = format!("[exit code: {code}]\n{stdout}\n{stderr}");
    Err(failed(
        ToolKind::RunCommand,
        truncate(text.trim(), MAX_COMMAND_OUTPUT),
    ))
}
