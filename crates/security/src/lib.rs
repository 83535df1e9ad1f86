//! Security checks for llmcode tools.
//!
//! Provides:
//! - **Path guard**: every tool path resolves inside the project root
//! - **Command blocklist**: obviously destructive shell commands are refused
//!   before the user is ever asked to confirm them

pub mod command;
pub mod path;

pub use command::{CommandBlocked, check_command};
pub use path::{PathValidationError, display_relative, resolve_in_root};
