//! `list_files`: directory listing, optionally recursive to a fixed depth.

use std::path::Path;

use llmcode_core::error::ToolError;
use llmcode_core::tool::ToolKind;
use llmcode_security::display_relative;
use serde::Deserialize;
use walkdir::WalkDir;

use crate::{default_path, failed, resolve};

/// Directory names never listed, on top of anything hidden.
const IGNORED_DIRS: &[&str] = &[
    "node_modules",
    "__pycache__",
    "venv",
    ".venv",
    "build",
    "dist",
    "target",
];

const MAX_DEPTH: usize = 2;
const MAX_DIRS: usize = 50;
const MAX_FILES: usize = 100;

#[derive(Debug, Deserialize)]
pub struct ListFilesArgs {
    #[serde(default = "default_path")]
    pub path: String,
    #[serde(default)]
    pub recursive: bool,
}

fn is_ignored(name: &str) -> bool {
    name.starts_with('.') || IGNORED_DIRS.contains(&name)
}

pub fn run(root: &Path, args: ListFilesArgs) -> Result<String, ToolError> {
    let base = resolve(root, &args.path)?;
    if !base.exists() {
        return Err(failed(ToolKind::ListFiles, format!("Path not found: {}", args.path)));
    }
    if !base.is_dir() {
        return Err(failed(ToolKind::ListFiles, format!("Not a directory: {}", args.path)));
    }

    // Entries at depth 1 are the directory's own children.
    let max_depth = if args.recursive { MAX_DEPTH + 1 } else { 1 };
    let walker = WalkDir::new(&base)
        .min_depth(1)
        .max_depth(max_depth)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| !is_ignored(&e.file_name().to_string_lossy()));

    let mut dirs = Vec::new();
    let mut files = Vec::new();
    for entry in walker.filter_map(Result::ok) {
        let rel = entry
            .path()
            .strip_prefix(&base)
            .unwrap_or(entry.path())
            .to_string_lossy()
            .replace('\\', "/");
        if entry.file_type().is_dir() {
            dirs.push(format!("{rel}/"));
        } else {
            files.push(rel);
        }
    }

    let mut out = format!(
        "Directory: {} ({} directories, {} files)\n",
        display_relative(root, &base),
        dirs.len(),
        files.len()
    );
    render_section(&mut out, "directories", &dirs, MAX_DIRS);
    render_section(&mut out, "files", &files, MAX_FILES);
    Ok(out.trim_end().to_string())
}

fn render_section(out: &mut String, label: &str, items: &[String], cap: usize) {
    if items.is_empty() {
        return;
    }
    out.push_str(label);
    out.push_str(":\n");
    for item in items.iter().take(cap) {
        out.push_str("  ");
        out.push_str(item);
        out.push('\n');
    }
    if items.len() > cap {
        out.push_str(&format!("  ... and {} more\n", items.len() - cap));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(path: &str, recursive: bool) -> ListFilesArgs {
        ListFilesArgs {
            path: path.into(),
            recursive,
        }
    }

    fn fixture() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        std::fs::create_dir_all(root.join("src/a/b/c")).unwrap();
        std::fs::create_dir_all(root.join("node_modules/pkg")).unwrap();
        std::fs::create_dir_all(root.join(".git")).unwrap();
        std::fs::write(root.join("main.py"), "").unwrap();
        std::fs::write(root.join(".env"), "").unwrap();
        std::fs::write(root.join("src/lib.py"), "").unwrap();
        std::fs::write(root.join("src/a/b/c/deep.py"), "").unwrap();
        std::fs::write(root.join("node_modules/pkg/index.js"), "").unwrap();
        dir
    }

    #[test]
    fn flat_listing_skips_hidden_and_ignored() {
        let dir = fixture();
        let out = run(dir.path(), args(".", false)).unwrap();
        assert!(out.starts_with("Directory: . (1 directories, 1 files)"));
        assert!(out.contains("  src/"));
        assert!(out.contains("  main.py"));
        assert!(!out.contains("node_modules"));
        assert!(!out.contains(".env"));
        assert!(!out.contains("lib.py"));
    }

    #[test]
    fn recursive_listing_stops_at_depth() {
        let dir = fixture();
        let out = run(dir.path(), args(".", true)).unwrap();
        assert!(out.contains("  src/lib.py"));
        assert!(out.contains("  src/a/b/"));
        assert!(!out.contains("src/a/b/c"));
        assert!(!out.contains("deep.py"));
    }

    #[test]
    fn missing_and_non_directory_paths() {
        let dir = fixture();
        assert!(run(dir.path(), args("nope", false))
            .unwrap_err()
            .to_string()
            .contains("Path not found"));
        assert!(run(dir.path(), args("main.py", false))
            .unwrap_err()
            .to_string()
            .contains("Not a directory"));
    }

    #[test]
    fn long_listings_are_capped() {
        let dir = tempfile::tempdir().unwrap();
        for i in 0..120 {
            std::fs::write(dir.path().join(format!("f{i:03}.txt")), "").unwrap();
        }
        let out = run(dir.path(), args(".", false)).unwrap();
        assert!(out.contains("120 files"));
        assert!(out.contains("... and 20 more"));
        assert!(!out.contains("f100.txt"));
    }
}
