//! `git_status` and `git_diff`, run through the `git` executable.

use std::path::Path;
use std::process::Output;
use std::time::Duration;

use llmcode_core::error::ToolError;
use llmcode_core::tool::ToolKind;
use serde::Deserialize;
use tokio::process::Command;
use tracing::debug;

use crate::{default_path, failed, resolve, truncate};

const STATUS_TIMEOUT: Duration = Duration::from_secs(10);
const DIFF_TIMEOUT: Duration = Duration::from_secs(30);
const MAX_DIFF_CHARS: usize = 10_000;

#[derive(Debug, Deserialize)]
pub struct GitStatusArgs {
    #[serde(default = "default_path")]
    pub path: String,
}

#[derive(Debug, Deserialize)]
pub struct GitDiffArgs {
    #[serde(default = "default_path")]
    pub path: String,
    #[serde(default)]
    pub file: Option<String>,
    #[serde(default)]
    pub staged: bool,
}

async fn git(kind: ToolKind, cwd: &Path, args: &[&str], timeout: Duration) -> Result<Output, ToolError> {
    debug!(?args, cwd = %cwd.display(), "Running git");
    let child = Command::new("git")
        .args(args)
        .current_dir(cwd)
        .kill_on_drop(true)
        .output();

    match tokio::time::timeout(timeout, child).await {
        Ok(Ok(output)) => Ok(output),
        Ok(Err(e)) if e.kind() == std::io::ErrorKind::NotFound => {
            Err(failed(kind, "Git not installed"))
        }
        Ok(Err(e)) => Err(failed(kind, e.to_string())),
        Err(_) => Err(ToolError::Timeout {
            tool_name: kind.name().into(),
            timeout_secs: timeout.as_secs(),
        }),
    }
}

fn stderr_or(output: &Output, fallback: &str) -> String {
    let stderr = String::from_utf8_lossy(&output.stderr);
    let stderr = stderr.trim();
    if stderr.is_empty() { fallback.into() } else { stderr.into() }
}

pub async fn status(root: &Path, args: GitStatusArgs) -> Result<String, ToolError> {
    let cwd = resolve(root, &args.path)?;
    let output = git(ToolKind::GitStatus, &cwd, &["status", "--porcelain"], STATUS_TIMEOUT).await?;
    if !output.status.success() {
        return Err(failed(ToolKind::GitStatus, stderr_or(&output, "Not a git repository")));
    }

    let branch = match git(ToolKind::GitStatus, &cwd, &["branch", "--show-current"], STATUS_TIMEOUT).await {
        Ok(out) if out.status.success() => {
            let name = String::from_utf8_lossy(&out.stdout).trim().to_string();
            if name.is_empty() { "(detached)".to_string() } else { name }
        }
        _ => "unknown".to_string(),
    };

    let porcelain = String::from_utf8_lossy(&output.stdout);
    let changes: Vec<&str> = porcelain.lines().filter(|l| l.len() >= 3).collect();

    let mut out = format!("Branch: {branch}\n");
    if changes.is_empty() {
        out.push_str("Working tree clean");
    } else {
        out.push_str(&format!("{} changed files:\n", changes.len()));
        out.push_str(&changes.join("\n"));
    }
    Ok(out)
}

pub async fn diff(root: &Path, args: GitDiffArgs) -> Result<String, ToolError> {
    let cwd = resolve(root, &args.path)?;
    let file = args.file.as_deref().map(|f| resolve(root, f)).transpose()?;
    let file = file.as_ref().map(|f| f.to_string_lossy().into_owned());

    let mut git_args = vec!["diff"];
    if args.staged {
        git_args.push("--staged");
    }
    if let Some(file) = &file {
        git_args.push("--");
        git_args.push(file);
    }

    let output = git(ToolKind::GitDiff, &cwd, &git_args, DIFF_TIMEOUT).await?;
    if !output.status.success() {
        return Err(failed(ToolKind::GitDiff, stderr_or(&output, "Git diff failed")));
    }

    let text = String::from_utf8_lossy(&output.stdout);
    if text.trim().is_empty() {
        let scope = if args.staged { "staged " } else { "" };
        return Ok(format!("No {scope}changes"));
    }
    Ok(truncate(&text, MAX_DIFF_CHARS))
}
