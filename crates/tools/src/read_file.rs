//! `read_file`: whole files up to a line cap, or a numbered line range.

use std::path::Path;

use llmcode_core::error::ToolError;
use llmcode_core::tool::ToolKind;
use llmcode_security::display_relative;
use serde::Deserialize;

use crate::{failed, resolve};

/// Files above this size must be read by range.
const MAX_WHOLE_FILE_BYTES: u64 = 1024 * 1024;

fn default_max_lines() -> usize {
    500
}

#[derive(Debug, Deserialize)]
pub struct ReadFileArgs {
    pub path: String,
    /// First line to return, 1-based
    #[serde(default)]
    pub line_start: Option<usize>,
    /// Last line to return, inclusive
    #[serde(default)]
    pub line_end: Option<usize>,
    #[serde(default = "default_max_lines")]
    pub max_lines: usize,
}

pub async fn run(root: &Path, args: ReadFileArgs) -> Result<String, ToolError> {
    let target = resolve(root, &args.path)?;
    let meta = tokio::fs::metadata(&target)
        .await
        .map_err(|_| failed(ToolKind::ReadFile, format!("File not found: {}", args.path)))?;
    if !meta.is_file() {
        return Err(failed(ToolKind::ReadFile, format!("Not a file: {}", args.path)));
    }

    let shown = display_relative(root, &target);
    if meta.len() > MAX_WHOLE_FILE_BYTES && args.line_start.is_none() {
        return Err(failed(
            ToolKind::ReadFile,
            format!(
                "File too large: {shown} ({}KB). Use search_code to find line numbers, then read_file with line_start/line_end",
                meta.len() / 1024
            ),
        ));
    }

    let bytes = tokio::fs::read(&target)
        .await
        .map_err(|e| failed(ToolKind::ReadFile, format!("read {}: {e}", args.path)))?;
    let content = String::from_utf8_lossy(&bytes);
    let lines: Vec<&str> = content.lines().collect();
    let total = lines.len();

    if let Some(line_start) = args.line_start {
        let start = line_start.saturating_sub(1);
        if start >= total {
            return Err(failed(
                ToolKind::ReadFile,
                format!("line_start {line_start} is past the end of {shown} ({total} lines)"),
            ));
        }
        let end = args
            .line_end
            .unwrap_or(start.saturating_add(args.max_lines))
            .clamp(start + 1, total);

        let mut out = format!("{shown} (lines {}-{end} of {total})\n", start + 1);
        for (i, line) in lines[start..end].iter().enumerate() {
            out.push_str(&format!("{}: {line}\n", start + i + 1));
        }
        return Ok(out.trim_end().to_string());
    }

    if total > args.max_lines {
        let mut out = lines[..args.max_lines].join("\n");
        out.push_str(&format!(
            "\n... (showing {} of {total} lines; use line_start/line_end to read specific sections)",
            args.max_lines
        ));
        return Ok(out);
    }

    Ok(content.into_owned())
}
