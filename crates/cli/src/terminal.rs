//! Terminal frontend: prints agent events and asks for confirmations on
//! stdin.

use std::io::Write;

use async_trait::async_trait;
use llmcode_agent::{AgentEvent, Decision, Frontend};
use llmcode_core::ToolStatus;
use llmcode_tools::PendingEffect;
use tokio::io::{AsyncBufReadExt, BufReader, Lines, Stdin};
use tokio::sync::Mutex;

const DIM: &str = "\x1b[2m";
const RESET: &str = "\x1b[0m";

/// Lines of tool output echoed to the terminal.
const RESULT_PREVIEW_LINES: usize = 8;

/// Owns stdin so the prompt and confirmations read from one reader.
pub struct Terminal {
    input: Mutex<Lines<BufReader<Stdin>>>,
}

impl Terminal {
    pub fn new() -> Self {
        Self {
            input: Mutex::new(BufReader::new(tokio::io::stdin()).lines()),
        }
    }

    /// Print `prompt` and read one line. `None` on EOF.
    pub async fn read_line(&self, prompt: &str) -> std::io::Result<Option<String>> {
        print!("{prompt}");
        std::io::stdout().flush()?;
        self.input.lock().await.next_line().await
    }
}

impl Default for Terminal {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Frontend for Terminal {
    fn on_event(&self, event: &AgentEvent) {
        match event {
            AgentEvent::Token { text } => {
                print!("{text}");
                let _ = std::io::stdout().flush();
            }
            AgentEvent::Thinking { text } => {
                eprint!("{DIM}{text}{RESET}");
            }
            AgentEvent::ToolCall { name, arguments, .. } => {
                println!();
                eprintln!("  → {name} {arguments}");
            }
            AgentEvent::ToolResult { status, output, .. } => {
                eprintln!("{}", render_result(*status, output));
            }
            AgentEvent::Notice { message } => eprintln!("\n  {message}"),
            AgentEvent::Error { code, message } => eprintln!("\n  [Error {code}] {message}"),
            AgentEvent::Done {
                usage,
                tool_calls_made,
                ..
            } => {
                println!();
                eprintln!(
                    "{DIM}  ({} tokens, {tool_calls_made} tool calls){RESET}",
                    usage.total_tokens
                );
            }
            AgentEvent::State { .. } => {}
        }
    }

    async fn confirm(&self, effect: &PendingEffect) -> Decision {
        println!();
        println!("{}", effect.preview());
        match self.read_line(&format!("  Apply {}? [y/N] ", effect.kind())).await {
            Ok(Some(answer)) => parse_decision(&answer),
            _ => Decision::Reject,
        }
    }
}

/// Only an explicit yes accepts.
pub fn parse_decision(answer: &str) -> Decision {
    match answer.trim().to_lowercase().as_str() {
        "y" | "yes" => Decision::Accept,
        _ => Decision::Reject,
    }
}

fn render_result(status: ToolStatus, output: &str) -> String {
    let marker = match status {
        ToolStatus::Ok => "✓",
        ToolStatus::Error => "✗",
        ToolStatus::Rejected => "⊘",
    };
    let mut lines = output.lines();
    let mut out = format!("  {marker} {status}");
    for line in lines.by_ref().take(RESULT_PREVIEW_LINES) {
        out.push_str(&format!("\n{DIM}    {line}{RESET}"));
    }
    let rest = lines.count();
    if rest > 0 {
        out.push_str(&format!("\n{DIM}    ... {rest} more lines{RESET}"));
    }
    out
}
