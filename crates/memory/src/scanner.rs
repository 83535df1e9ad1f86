//! Project file discovery for indexing.
//!
//! Walks the tree with `walkdir`, pruning ignored directories early, and
//! keeps files with a known source extension that are under the size cap.

use std::path::{Path, PathBuf};
use std::time::SystemTime;

use llmcode_config::IndexConfig;
use tracing::debug;
use walkdir::WalkDir;

/// Scanner settings.
#[derive(Debug, Clone)]
pub struct ScanOptions {
    /// Lowercase extensions with a leading dot
    pub extensions: Vec<String>,
    pub ignore_patterns: Vec<String>,
    pub max_file_size: u64,
}

impl From<&IndexConfig> for ScanOptions {
    fn from(config: &IndexConfig) -> Self {
        Self {
            extensions: config
                .extensions
                .iter()
                .map(|e| {
                    let e = e.to_lowercase();
                    if e.starts_with('.') { e } else { format!(".{e}") }
                })
                .collect(),
            ignore_patterns: config.ignore_patterns.clone(),
            max_file_size: config.max_file_size,
        }
    }
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self::from(&IndexConfig::default())
    }
}

/// A file selected for indexing.
#[derive(Debug, Clone)]
pub struct ScannedFile {
    /// Root-relative path with forward slashes
    pub path: String,
    pub absolute: PathBuf,
    pub language: &'static str,
    pub size: u64,
    pub modified: Option<SystemTime>,
}

/// `name` matches a pattern if equal to it, or if the pattern is `*suffix`
/// and the name ends with the suffix.
pub fn should_ignore(name: &str, patterns: &[String]) -> bool {
    patterns.iter().any(|p| match p.strip_prefix('*') {
        Some(suffix) => name.ends_with(suffix),
        None => name == p,
    })
}

/// Walk `targets` (files or directories, relative to `root`) and return
/// matching files sorted by path. An empty `targets` scans the whole root.
pub fn scan(root: &Path, targets: &[PathBuf], options: &ScanOptions) -> Vec<ScannedFile> {
    let default_target = [root.to_path_buf()];
    let targets: &[PathBuf] = if targets.is_empty() {
        &default_target
    } else {
        targets
    };

    let mut files = Vec::new();
    for target in targets {
        let start = if target.is_absolute() {
            target.clone()
        } else {
            root.join(target)
        };

        let walker = WalkDir::new(&start).follow_links(false).into_iter();
        for entry in walker.filter_entry(|e| {
            e.depth() == 0 || !should_ignore(&e.file_name().to_string_lossy(), &options.ignore_patterns)
        }) {
            let entry = match entry {
                Ok(e) => e,
                Err(e) => {
                    debug!(error = %e, "Skipping unreadable entry");
                    continue;
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }
            if let Some(file) = accept(root, entry.path(), options) {
                files.push(file);
            }
        }
    }

    files.sort_by(|a, b| a.path.cmp(&b.path));
    files.dedup_by(|a, b| a.path == b.path);
    files
}

fn accept(root: &Path, path: &Path, options: &ScanOptions) -> Option<ScannedFile> {
    let name = path.file_name()?.to_string_lossy();
    if should_ignore(&name, &options.ignore_patterns) {
        return None;
    }

    let ext = extension_of(path);
    if !options.extensions.is_empty() && !options.extensions.iter().any(|e| *e == ext) {
        return None;
    }

    let meta = std::fs::metadata(path).ok()?;
    if meta.len() > options.max_file_size {
        debug!(path = %path.display(), size = meta.len(), "Skipping oversized file");
        return None;
    }

    let rel = path.strip_prefix(root).unwrap_or(path);
    Some(ScannedFile {
        path: rel.to_string_lossy().replace('\\', "/"),
        absolute: path.to_path_buf(),
        language: language_for(path),
        size: meta.len(),
        modified: meta.modified().ok(),
    })
}

fn extension_of(path: &Path) -> String {
    path.extension()
        .map(|e| format!(".{}", e.to_string_lossy().to_lowercase()))
        .unwrap_or_default()
}

/// Language name from the file extension; `text` when unknown.
pub fn language_for(path: &Path) -> &'static str {
    match extension_of(path).as_str() {
        ".py" => "python",
        ".js" | ".jsx" => "javascript",
        ".ts" | ".tsx" => "typescript",
        ".c" | ".h" => "c",
        ".cpp" | ".cc" | ".hpp" => "cpp",
        ".java" => "java",
        ".kt" => "kotlin",
        ".go" => "go",
        ".rs" => "rust",
        ".rb" => "ruby",
        ".php" => "php",
        ".swift" => "swift",
        ".cs" => "csharp",
        ".lua" => "lua",
        ".sh" | ".bash" | ".zsh" => "bash",
        ".sql" => "sql",
        ".html" => "html",
        ".css" => "css",
        ".scss" => "scss",
        ".json" => "json",
        ".yaml" | ".yml" => "yaml",
        ".toml" => "toml",
        ".xml" => "xml",
        ".md" => "markdown",
        ".hlsl" => "hlsl",
        ".glsl" | ".vert" | ".frag" => "glsl",
        _ => "text",
    }
}
