//! The agent loop and context assembly engine.
//!
//! A user message goes through a small state machine:
//!
//! 1. **Receive** the message and append it to the session
//! 2. **Assemble** a bounded prompt (pinned files, history, retrieved
//!    chunks, summaries) under the token budget
//! 3. **Stream** the model's reply to the frontend
//! 4. **If tool calls**: confirm mutating ones, execute, append one result
//!    per call, loop back to step 2
//! 5. **If text only**: the turn is done
//!
//! The loop stops at the first text-only reply, on cancellation, on a
//! transport failure, or after `max_iterations` model turns.

pub mod context;
pub mod driver;
pub mod frontend;
pub mod loop_runner;
pub mod parse;
pub mod stream_event;

pub use context::{
    AssembledPrompt, AssemblyError, AssemblyInput, AssemblyMetadata, ContextAssembler,
    ContextSnapshot, ContextSources, DropInfo, LayerStats, PinnedFile, Retrieved,
};
pub use driver::{Reply, SessionDriver};
pub use frontend::{Decision, Frontend, Unattended};
pub use loop_runner::{AgentLoop, LoopOptions, StopReason, TurnOutcome};
pub use parse::{parse_tool_calls, strip_think};
pub use stream_event::{AgentEvent, AgentState};
