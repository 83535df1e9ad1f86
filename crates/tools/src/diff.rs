//! Unified diffs for `write_file` confirmations.

use similar::TextDiff;

/// Diff `old` against `new` in unified format with three lines of context.
///
/// A new file is shown against `/dev/null`. Identical content yields an
/// empty string.
pub fn unified_diff(path: &str, old: &str, new: &str) -> String {
    if old == new {
        return String::new();
    }

    let old_header = if old.is_empty() {
        "/dev/null".to_string()
    } else {
        format!("a/{path}")
    };
    let new_header = format!("b/{path}");

    TextDiff::from_lines(old, new)
        .unified_diff()
        .context_radius(3)
        .header(&old_header, &new_header)
        .to_string()
}
