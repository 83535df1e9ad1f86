//! Session driver: owns the session for one interactive run, interprets
//! slash commands and hands everything else to the agent loop.

use std::path::PathBuf;

use llmcode_core::{Role, Session};
use llmcode_memory::SessionStore;
use llmcode_security::resolve_in_root;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::frontend::Frontend;
use crate::loop_runner::{AgentLoop, TurnOutcome};

pub const HELP: &str = "\
Commands:
  /add <path>    Pin a file; its full content accompanies every turn
  /drop <path>   Unpin a file
  /files         List pinned files
  /clear         Clear the conversation history (pinned files stay)
  /history       Show the conversation so far
  /help          Show this help
  /quit          Exit (also /exit)

Anything else is sent to the assistant. Ctrl-C cancels a running turn.";

/// What the driver did with one line of input.
#[derive(Debug)]
pub enum Reply {
    /// A slash command ran; show this text.
    Info(String),
    /// The line went to the agent loop.
    Turn(TurnOutcome),
    Quit,
    /// Blank input.
    Nothing,
}

pub struct SessionDriver {
    agent: AgentLoop,
    session: Session,
    store: Option<SessionStore>,
    root: PathBuf,
}

impl SessionDriver {
    pub fn new(agent: AgentLoop, session: Session) -> Self {
        let root = session.working_directory.clone();
        Self {
            agent,
            session,
            store: None,
            root,
        }
    }

    /// Persist the session after every change.
    pub fn with_store(mut self, store: SessionStore) -> Self {
        self.store = Some(store);
        self
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn agent(&self) -> &AgentLoop {
        &self.agent
    }

    /// Handle one line of user input.
    pub async fn handle(
        &mut self,
        input: &str,
        frontend: &dyn Frontend,
        cancel: &CancellationToken,
    ) -> Reply {
        let input = input.trim();
        if input.is_empty() {
            return Reply::Nothing;
        }

        let Some(command) = input.strip_prefix('/') else {
            let outcome = self
                .agent
                .process(&mut self.session, input, frontend, cancel)
                .await;
            self.save().await;
            return Reply::Turn(outcome);
        };

        let (name, arg) = match command.split_once(char::is_whitespace) {
            Some((name, arg)) => (name, arg.trim()),
            None => (command, ""),
        };
        debug!(command = name, "Slash command");

        match name {
            "help" => Reply::Info(HELP.to_string()),
            "quit" | "exit" => Reply::Quit,
            "files" => Reply::Info(self.files()),
            "history" => Reply::Info(self.history()),
            "add" => {
                let reply = self.add(arg);
                self.save().await;
                Reply::Info(reply)
            }
            "drop" => {
                let reply = if arg.is_empty() {
                    "Usage: /drop <path>".to_string()
                } else if self.session.exclude(arg) {
                    format!("Dropped {arg}")
                } else {
                    format!("{arg} is not included")
                };
                self.save().await;
                Reply::Info(reply)
            }
            "clear" => {
                let turns = self.session.history.len();
                self.session.clear_history();
                self.save().await;
                Reply::Info(format!("Cleared {turns} turns"))
            }
            other => Reply::Info(format!("Unknown command: /{other}. Type /help for commands.")),
        }
    }

    fn add(&mut self, path: &str) -> String {
        if path.is_empty() {
            return "Usage: /add <path>".to_string();
        }
        let target = match resolve_in_root(&self.root, path) {
            Ok(t) => t,
            Err(e) => return format!("Cannot add {path}: {e}"),
        };
        if !target.is_file() {
            return format!("Not a file: {path}");
        }
        let shown = llmcode_security::display_relative(&self.root, &target);
        if self.session.include(shown.clone()) {
            format!("Added {shown}")
        } else {
            format!("{shown} is already included")
        }
    }

    fn files(&self) -> String {
        if self.session.included_paths.is_empty() {
            return "No files included. Use /add <path>.".to_string();
        }
        let mut out = format!("{} included files:", self.session.included_paths.len());
        for path in &self.session.included_paths {
            out.push_str("\n  ");
            out.push_str(path);
        }
        out
    }

    fn history(&self) -> String {
        if self.session.history.is_empty() {
            return "No history yet.".to_string();
        }
        let mut out = String::new();
        for turn in &self.session.history {
            let line = match turn.role {
                Role::Tool => format!(
                    "[tool {} {}] {}",
                    turn.tool_call_id.as_deref().unwrap_or("?"),
                    turn.status.map(|s| s.to_string()).unwrap_or_default(),
                    first_line(&turn.content)
                ),
                Role::Assistant if turn.has_tool_calls() => {
                    let names: Vec<&str> = turn.tool_calls.iter().map(|c| c.name.as_str()).collect();
                    format!("[assistant → {}] {}", names.join(", "), first_line(&turn.content))
                }
                role => format!("[{}] {}", role.as_str(), first_line(&turn.content)),
            };
            if !out.is_empty() {
                out.push('\n');
            }
            out.push_str(&line);
        }
        out
    }

    async fn save(&self) {
        let Some(store) = &self.store else {
            return;
        };
        if let Err(e) = store.save(&self.session).await {
            warn!(session = %self.session.id, error = %e, "Failed to save session");
        }
    }
}

fn first_line(text: &str) -> String {
    const MAX: usize = 100;
    let line = text.lines().next().unwrap_or_default();
    if line.chars().count() > MAX {
        let cut: String = line.chars().take(MAX).collect();
        format!("{cut}...")
    } else {
        line.to_string()
    }
}
