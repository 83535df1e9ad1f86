//! Session: the single owned value a conversation runs against.
//!
//! A session owns its working directory, its pinned files and its
//! history exclusively. It is passed explicitly into the agent loop and
//! the context manager; there is no ambient store.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::message::{ConversationTurn, Role};

/// Unique identifier for a session.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(pub String);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Per-session settings that shape each model turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionConfig {
    pub model: String,

    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Maximum model turns per user turn
    #[serde(default = "default_max_iterations")]
    pub max_iterations: usize,

    /// How many recent history turns the context manager considers
    #[serde(default = "default_history_turns")]
    pub history_turns: usize,

    /// How many retrieved chunks to request
    #[serde(default = "default_retrieval_k")]
    pub retrieval_k: usize,
}

fn default_temperature() -> f32 {
    0.3
}
fn default_max_iterations() -> usize {
    10
}
fn default_history_turns() -> usize {
    20
}
fn default_retrieval_k() -> usize {
    8
}

impl SessionConfig {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            temperature: default_temperature(),
            max_iterations: default_max_iterations(),
            history_turns: default_history_turns(),
            retrieval_k: default_retrieval_k(),
        }
    }
}

/// A conversation with the assistant over one project tree.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: SessionId,

    /// The project root; every tool path is resolved against it
    pub working_directory: PathBuf,

    /// Pinned files, relative to the root, in inclusion order
    #[serde(default)]
    pub included_paths: Vec<String>,

    #[serde(default)]
    pub history: Vec<ConversationTurn>,

    pub config: SessionConfig,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Session {
    pub fn new(working_directory: impl Into<PathBuf>, config: SessionConfig) -> Self {
        let now = Utc::now();
        Self {
            id: SessionId::new(),
            working_directory: working_directory.into(),
            included_paths: Vec::new(),
            history: Vec::new(),
            config,
            created_at: now,
            updated_at: now,
        }
    }

    /// Append a turn to the history.
    pub fn push(&mut self, turn: ConversationTurn) {
        self.history.push(turn);
        self.updated_at = Utc::now();
    }

    /// Pin a file. Returns `false` if it was already pinned.
    pub fn include(&mut self, path: impl Into<String>) -> bool {
        let path = path.into();
        if self.included_paths.contains(&path) {
            return false;
        }
        self.included_paths.push(path);
        self.updated_at = Utc::now();
        true
    }

    /// Unpin a file. Returns `false` if it was not pinned.
    pub fn exclude(&mut self, path: &str) -> bool {
        let before = self.included_paths.len();
        self.included_paths.retain(|p| p != path);
        let removed = self.included_paths.len() != before;
        if removed {
            self.updated_at = Utc::now();
        }
        removed
    }

    /// Drop the whole history. Pinned files stay pinned.
    pub fn clear_history(&mut self) {
        self.history.clear();
        self.updated_at = Utc::now();
    }

    pub fn last_user_message(&self) -> Option<&str> {
        self.history
            .iter()
            .rev()
            .find(|t| t.role == Role::User)
            .map(|t| t.content.as_str())
    }

    pub fn last_turn(&self) -> Option<&ConversationTurn> {
        self.history.last()
    }

    /// Check that every assistant turn carrying tool calls is followed by
    /// exactly one tool turn per call, in call order, before the next
    /// assistant turn. Returns the index of the first offending turn.
    pub fn check_tool_pairing(&self) -> Result<(), usize> {
        let mut i = 0;
        while i < self.history.len() {
            let turn = &self.history[i];
            if turn.role == Role::Assistant && turn.has_tool_calls() {
                for (offset, call) in turn.tool_calls.iter().enumerate() {
                    let idx = i + 1 + offset;
                    match self.history.get(idx) {
                        Some(t)
                            if t.role == Role::Tool
                                && t.tool_call_id.as_deref() == Some(call.id.as_str()) => {}
                        _ => return Err(idx),
                    }
                }
                i += 1 + turn.tool_calls.len();
            } else if turn.role == Role::Tool {
                // A tool turn outside a batch has no issuing call.
                return Err(i);
            } else {
                i += 1;
            }
        }
        Ok(())
    }
}
