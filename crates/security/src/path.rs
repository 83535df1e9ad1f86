//! Path validation: confine tool paths to the project root.
//!
//! Paths are resolved against the root lexically first (so `src/../a.py`
//! is fine but `../a.py` is not), then the nearest existing ancestor is
//! canonicalized so a symlink inside the tree cannot point back out.
//! Dangling symlinks are followed by hand and their targets checked the
//! same way.

use std::path::{Component, Path, PathBuf};

const MAX_LINK_HOPS: usize = 40;

/// Error returned when path validation fails.
#[derive(Debug, thiserror::Error)]
pub enum PathValidationError {
    #[error("Path '{path}' resolves outside the project root")]
    OutsideRoot { path: String },

    #[error("Failed to canonicalize path '{path}': {reason}")]
    CanonicalizeFailed { path: String, reason: String },
}

/// Resolve `path` (relative to `root`, or absolute) and make sure the
/// result stays inside `root`.
///
/// The target need not exist yet, which `write_file` relies on.
pub fn resolve_in_root(root: &Path, path: &str) -> Result<PathBuf, PathValidationError> {
    let outside = || PathValidationError::OutsideRoot { path: path.into() };

    let root = root
        .canonicalize()
        .map_err(|e| PathValidationError::CanonicalizeFailed {
            path: root.display().to_string(),
            reason: e.to_string(),
        })?;

    let requested = Path::new(path.trim());
    let joined = if requested.is_absolute() {
        requested.to_path_buf()
    } else {
        root.join(requested)
    };

    let mut normalized = normalize(&joined).ok_or_else(outside)?;
    if !normalized.starts_with(&root) {
        return Err(outside());
    }

    for _ in 0..MAX_LINK_HOPS {
        // Deepest component that exists, counting dangling symlinks.
        let mut existing = normalized.as_path();
        while std::fs::symlink_metadata(existing).is_err() {
            match existing.parent() {
                Some(parent) => existing = parent,
                None => break,
            }
        }
        let rest = normalized
            .strip_prefix(existing)
            .map(Path::to_path_buf)
            .unwrap_or_default();

        match existing.canonicalize() {
            Ok(canonical_prefix) => {
                if !canonical_prefix.starts_with(&root) {
                    tracing::warn!(path, "Symlink escapes project root");
                    return Err(outside());
                }
                return Ok(if rest.as_os_str().is_empty() {
                    canonical_prefix
                } else {
                    canonical_prefix.join(rest)
                });
            }
            Err(e) => {
                // A dangling link: follow it by hand and check where it lands.
                let target = std::fs::read_link(existing).map_err(|_| {
                    PathValidationError::CanonicalizeFailed {
                        path: path.into(),
                        reason: e.to_string(),
                    }
                })?;
                let base = existing.parent().unwrap_or(&root);
                normalized = normalize(&base.join(target).join(rest)).ok_or_else(outside)?;
            }
        }
    }

    tracing::warn!(path, "Too many symlink hops");
    Err(outside())
}

/// Render `path` relative to `root` with forward slashes, for tool output.
pub fn display_relative(root: &Path, path: &Path) -> String {
    let root = root.canonicalize().unwrap_or_else(|_| root.to_path_buf());
    let rel = path.strip_prefix(&root).unwrap_or(path);
    let shown = rel.to_string_lossy().replace('\\', "/");
    if shown.is_empty() { ".".into() } else { shown }
}

/// Lexically resolve `.` and `..`. Returns `None` if `..` climbs past the
/// filesystem root.
fn normalize(path: &Path) -> Option<PathBuf> {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    return None;
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    Some(out)
}
