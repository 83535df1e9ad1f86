//! `search_code`: case-insensitive substring search over source files.

use std::path::Path;

use llmcode_core::error::ToolError;
use llmcode_core::tool::ToolKind;
use serde::Deserialize;
use walkdir::WalkDir;

use crate::{ToolLimits, default_path, failed, resolve};

/// Extensions searched when no `file_pattern` is given.
const CODE_EXTENSIONS: &[&str] = &[
    "py", "js", "ts", "cpp", "c", "h", "java", "go", "rs", "md", "json", "yaml", "yml",
];

const SKIPPED_DIRS: &[&str] = &["node_modules", "__pycache__", ".git", "venv", ".venv", "target"];

const MAX_LINE_CHARS: usize = 200;

/// Files larger than this are not searched.
const MAX_SEARCH_FILE_BYTES: u64 = 1024 * 1024;

#[derive(Debug, Deserialize)]
pub struct SearchCodeArgs {
    pub query: String,
    #[serde(default = "default_path")]
    pub path: String,
    /// Glob on the file name with at most one `*`, e.g. `*.py`
    #[serde(default)]
    pub file_pattern: Option<String>,
}

/// Match a file name against a single-star glob.
fn matches_pattern(name: &str, pattern: &str) -> bool {
    match pattern.split_once('*') {
        Some((prefix, suffix)) => {
            name.len() >= prefix.len() + suffix.len()
                && name.starts_with(prefix)
                && name.ends_with(suffix)
        }
        None => name == pattern,
    }
}

fn wanted(name: &str, pattern: Option<&str>) -> bool {
    match pattern {
        Some(p) if p != "*" => matches_pattern(name, p),
        _ => Path::new(name)
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| CODE_EXTENSIONS.contains(&e)),
    }
}

pub fn run(root: &Path, args: SearchCodeArgs, limits: &ToolLimits) -> Result<String, ToolError> {
    let query = args.query.trim();
    if query.is_empty() {
        return Err(ToolError::InvalidArguments("search_code: empty query".into()));
    }
    let base = resolve(root, &args.path)?;
    if !base.exists() {
        return Err(failed(ToolKind::SearchCode, format!("Path not found: {}", args.path)));
    }

    let needle = query.to_lowercase();
    let pattern = args.file_pattern.as_deref();
    let mut matches = Vec::new();
    let mut truncated = false;

    let walker = WalkDir::new(&base)
        .max_depth(limits.search_max_depth)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| {
            e.depth() == 0 || !SKIPPED_DIRS.contains(&e.file_name().to_string_lossy().as_ref())
        });

    'files: for entry in walker.filter_map(Result::ok) {
        if !entry.file_type().is_file() || !wanted(&entry.file_name().to_string_lossy(), pattern) {
            continue;
        }
        if entry.metadata().map(|m| m.len() > MAX_SEARCH_FILE_BYTES).unwrap_or(true) {
            continue;
        }
        let Ok(bytes) = std::fs::read(entry.path()) else {
            continue;
        };
        let content = String::from_utf8_lossy(&bytes);
        let rel = entry
            .path()
            .strip_prefix(&base)
            .unwrap_or(entry.path())
            .to_string_lossy()
            .replace('\\', "/");

        for (i, line) in content.lines().enumerate() {
            if !line.to_lowercase().contains(&needle) {
                continue;
            }
            if matches.len() >= limits.search_max_matches {
                truncated = true;
                break 'files;
            }
            let shown: String = line.trim().chars().take(MAX_LINE_CHARS).collect();
            matches.push(format!("{rel}:{}: {shown}", i + 1));
        }
    }

    if matches.is_empty() {
        return Ok(format!("No matches for '{query}'"));
    }
    let mut out = format!("{} matches for '{query}'", matches.len());
    if truncated {
        out.push_str(&format!(" (stopped at {})", limits.search_max_matches));
    }
    out.push('\n');
    out.push_str(&matches.join("\n"));
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(query: &str) -> SearchCodeArgs {
        SearchCodeArgs {
            query: query.into(),
            path: ".".into(),
            file_pattern: None,
        }
    }

    fn fixture() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        std::fs::create_dir_all(root.join("src")).unwrap();
        std::fs::create_dir_all(root.join("node_modules")).unwrap();
        std::fs::write(root.join("src/config.py"), "def parse_config():\n    return PARSE_CONFIG\n").unwrap();
        std::fs::write(root.join("src/main.rs"), "fn main() { parse_config(); }\n").unwrap();
        std::fs::write(root.join("notes.txt"), "parse_config in a text file\n").unwrap();
        std::fs::write(root.join("node_modules/x.js"), "parse_config\n").unwrap();
        dir
    }

    #[test]
    fn case_insensitive_over_code_files() {
        let dir = fixture();
        let out = run(dir.path(), args("Parse_Config"), &ToolLimits::default()).unwrap();
        assert!(out.starts_with("3 matches for 'Parse_Config'"));
        assert!(out.contains("src/config.py:1: def parse_config():"));
        assert!(out.contains("src/config.py:2: return PARSE_CONFIG"));
        assert!(out.contains("src/main.rs:1:"));
        assert!(!out.contains("notes.txt"));
        assert!(!out.contains("node_modules"));
    }

    #[test]
    fn file_pattern_narrows_search() {
        let dir = fixture();
        let search = SearchCodeArgs {
            file_pattern: Some("*.txt".into()),
            ..args("parse_config")
        };
        let out = run(dir.path(), search, &ToolLimits::default()).unwrap();
        assert!(out.starts_with("1 matches"));
        assert!(out.contains("notes.txt:1:"));
    }

    #[test]
    fn match_cap_reported() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.py"), "hit\n".repeat(10)).unwrap();
        let limits = ToolLimits {
            search_max_matches: 4,
            ..ToolLimits::default()
        };
        let out = run(dir.path(), args("hit"), &limits).unwrap();
        assert!(out.starts_with("4 matches for 'hit' (stopped at 4)"));
    }

    #[test]
    fn no_matches_and_empty_query() {
        let dir = fixture();
        assert_eq!(
            run(dir.path(), args("zzz"), &ToolLimits::default()).unwrap(),
            "No matches for 'zzz'"
        );
        assert!(matches!(
            run(dir.path(), args(" "), &ToolLimits::default()),
            Err(ToolError::InvalidArguments(_))
        ));
    }

    #[test]
    fn single_star_patterns() {
        assert!(matches_pattern("test_a.py", "test_*.py"));
        assert!(matches_pattern("a.py", "*.py"));
        assert!(!matches_pattern("a.pyc", "*.py"));
        assert!(matches_pattern("Makefile", "Makefile"));
    }
}
