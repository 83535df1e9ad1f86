//! `write_file`: replace or create a file, after the user has seen the diff.

use std::path::Path;

use llmcode_core::error::ToolError;
use llmcode_core::tool::ToolKind;
use llmcode_security::display_relative;
use serde::Deserialize;
use tracing::info;

use crate::diff::unified_diff;
use crate::{PendingEffect, failed, resolve};

#[derive(Debug, Deserialize)]
pub struct WriteFileArgs {
    pub path: String,
    pub content: String,
}

/// Resolve the target and diff its current content against the proposal.
/// Nothing is written.
pub async fn prepare(root: &Path, args: WriteFileArgs) -> Result<PendingEffect, ToolError> {
    let target = resolve(root, &args.path)?;

    let old = match tokio::fs::metadata(&target).await {
        Ok(meta) if meta.is_dir() => {
            return Err(failed(
                ToolKind::WriteFile,
                format!("{} is a directory", args.path),
            ));
        }
        Ok(_) => {
            let bytes = tokio::fs::read(&target)
                .await
                .map_err(|e| failed(ToolKind::WriteFile, format!("read {}: {e}", args.path)))?;
            String::from_utf8_lossy(&bytes).into_owned()
        }
        Err(_) => String::new(),
    };

    let shown = display_relative(root, &target);
    Ok(PendingEffect::WriteFile {
        diff: unified_diff(&shown, &old, &args.content),
        path: shown,
        target,
        new_content: args.content,
    })
}

pub async fn apply(path: &str, target: &Path, content: &str) -> Result<String, ToolError> {
    let existed = tokio::fs::try_exists(target).await.unwrap_or(false);

    if let Some(parent) = target.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| failed(ToolKind::WriteFile, format!("create directory: {e}")))?;
    }
    tokio::fs::write(target, content)
        .await
        .map_err(|e| failed(ToolKind::WriteFile, format!("write {path}: {e}")))?;

    info!(path, bytes = content.len(), "File written");
    let verb = if existed { "Updated" } else { "Created" };
    Ok(format!("{verb} {path} ({} bytes)", content.len()))
}
