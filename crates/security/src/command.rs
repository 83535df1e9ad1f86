//! Dangerous-command blocklist for `run_command`.

/// Substrings that mark a command as destructive. Matched against the
/// lowercased command with runs of whitespace collapsed.
const BLOCKED_PATTERNS: &[&str] = &[
    "rm -rf",
    "rm -fr",
    "del /",
    "format c:",
    "mkfs",
    ":(){",
    "dd if=",
    "> /dev/sd",
    "chmod -r 777 /",
    "shutdown",
    "reboot",
];

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Command blocked for safety (matches '{pattern}')")]
pub struct CommandBlocked {
    pub pattern: String,
}

/// Refuse commands matching the blocklist.
pub fn check_command(command: &str) -> Result<(), CommandBlocked> {
    let normalized = command
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase();

    match BLOCKED_PATTERNS.iter().find(|p| normalized.contains(*p)) {
        Some(pattern) => {
            tracing::warn!(command, pattern, "Blocked dangerous command");
            Err(CommandBlocked {
                pattern: (*pattern).to_string(),
            })
        }
        None => Ok(()),
    }
}
