//! The agent loop: one user message in, zero or more model turns and tool
//! batches out.
//!
//! ```text
//! Idle → AwaitingModel → Streaming ─┬─ no calls ──────────────→ Idle
//!                 ↑                 └─ calls → ToolPending
//!                 │                              ↓ per call
//!                 └──────── Executing ← Confirming (mutating only)
//! ```
//!
//! Cancellation is observed while streaming and while waiting for a
//! confirmation. A tool that is already executing runs to completion.

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use llmcode_core::{
    CompletionRequest, ConversationTurn, DomainEvent, ErrorCode, EventBus, GenerationOptions,
    Provider, Role, Session, StreamEvent, ToolCall, ToolResult, Usage,
};
use llmcode_tools::ToolExecutor;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::context::{AssemblyInput, ContextAssembler, ContextSnapshot, ContextSources};
use crate::frontend::{Decision, Frontend};
use crate::parse::{Segment, ThinkFilter, parse_tool_calls, strip_think};
use crate::stream_event::{AgentEvent, AgentState};

/// Why a call to [`AgentLoop::process`] ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// The model answered without requesting tools.
    Completed,
    Cancelled,
    /// `max_iterations` model turns were made without a final answer.
    TurnLimit,
    Failed(ErrorCode),
}

/// Result of processing one user message.
#[derive(Debug, Clone, PartialEq)]
pub struct TurnOutcome {
    /// Text of the last assistant turn appended.
    pub final_text: String,
    /// Model turns made.
    pub iterations: usize,
    pub tool_calls_made: usize,
    pub usage: Usage,
    pub stop: StopReason,
}

/// Generation settings for every model turn.
#[derive(Debug, Clone)]
pub struct LoopOptions {
    pub model: String,
    pub temperature: f32,
    pub max_response_tokens: u32,
    pub max_iterations: usize,
    pub retrieval_k: usize,
}

impl LoopOptions {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            temperature: 0.3,
            max_response_tokens: 2048,
            max_iterations: 10,
            retrieval_k: 8,
        }
    }
}

/// How one model turn ended.
enum StreamEnd {
    Complete { text: String },
    Cancelled { partial: String },
    Failed { code: ErrorCode, message: String },
}

/// The core agent loop that orchestrates model turns and tool execution.
pub struct AgentLoop {
    provider: Arc<dyn Provider>,
    tools: Arc<ToolExecutor>,
    sources: ContextSources,
    assembler: ContextAssembler,
    options: LoopOptions,
    tools_prompt: String,
    event_bus: Arc<EventBus>,
    state: watch::Sender<AgentState>,
}

impl AgentLoop {
    pub fn new(
        provider: Arc<dyn Provider>,
        tools: Arc<ToolExecutor>,
        sources: ContextSources,
        assembler: ContextAssembler,
        options: LoopOptions,
    ) -> Self {
        let (state, _) = watch::channel(AgentState::Idle);
        Self {
            provider,
            tools,
            sources,
            assembler,
            options,
            tools_prompt: llmcode_tools::tools_prompt(),
            event_bus: Arc::new(EventBus::default()),
            state,
        }
    }

    pub fn with_event_bus(mut self, bus: Arc<EventBus>) -> Self {
        self.event_bus = bus;
        self
    }

    pub fn with_tools_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.tools_prompt = prompt.into();
        self
    }

    pub fn options(&self) -> &LoopOptions {
        &self.options
    }

    pub fn options_mut(&mut self) -> &mut LoopOptions {
        &mut self.options
    }

    pub fn state(&self) -> AgentState {
        *self.state.borrow()
    }

    /// Follow state transitions as they happen.
    pub fn watch_state(&self) -> watch::Receiver<AgentState> {
        self.state.subscribe()
    }

    pub fn tools(&self) -> &ToolExecutor {
        &self.tools
    }

    fn transition(&self, to: AgentState, frontend: &dyn Frontend) {
        let from = self.state.send_replace(to);
        if from == to {
            return;
        }
        debug!(from = %from, to = %to, "Agent state");
        self.event_bus.publish(DomainEvent::AgentStateChanged {
            state: to.to_string(),
            timestamp: Utc::now(),
        });
        frontend.on_event(&AgentEvent::State { state: to });
    }

    /// Process one user message to completion, cancellation, failure or
    /// the turn limit. Every outcome leaves the session's tool-pairing
    /// invariant intact and the loop back in `Idle`.
    pub async fn process(
        &self,
        session: &mut Session,
        user_message: &str,
        frontend: &dyn Frontend,
        cancel: &CancellationToken,
    ) -> TurnOutcome {
        info!(
            session = %session.id,
            history = session.history.len(),
            "Processing user message"
        );
        session.push(ConversationTurn::user(user_message));

        let retrieved = self
            .sources
            .retrieve(user_message, self.options.retrieval_k)
            .await;

        let mut outcome = TurnOutcome {
            final_text: String::new(),
            iterations: 0,
            tool_calls_made: 0,
            usage: Usage::default(),
            stop: StopReason::Completed,
        };

        loop {
            if outcome.iterations >= self.options.max_iterations {
                warn!(
                    session = %session.id,
                    iterations = outcome.iterations,
                    "Turn limit reached"
                );
                let notice = format!(
                    "[turn limit reached: {} model turns without a final answer]",
                    outcome.iterations
                );
                frontend.on_event(&AgentEvent::Notice {
                    message: notice.clone(),
                });
                session.push(ConversationTurn::assistant(&notice));
                outcome.final_text = notice;
                outcome.stop = StopReason::TurnLimit;
                break;
            }
            outcome.iterations += 1;
            self.transition(AgentState::AwaitingModel, frontend);

            // ── Assemble ───────────────────────────────────────────────
            let snapshot = ContextSnapshot {
                pinned: self.sources.pinned(session).await,
                retrieved: retrieved.chunks.clone(),
                summaries: retrieved.summaries.clone(),
            };
            let prompt = match self.assembler.assemble(&AssemblyInput {
                tools_prompt: &self.tools_prompt,
                history: &session.history,
                snapshot: &snapshot,
            }) {
                Ok(p) => p,
                Err(e) => {
                    let message = e.to_string();
                    self.fail(session, &mut outcome, ErrorCode::ContextTooLong, &message, frontend);
                    break;
                }
            };
            debug!(
                tokens = prompt.metadata.total_tokens,
                budget = prompt.metadata.budget,
                drops = prompt.metadata.drops.len(),
                "Context assembled"
            );

            let request = CompletionRequest {
                messages: prompt.messages,
                context: None,
                options: GenerationOptions {
                    model: self.options.model.clone(),
                    temperature: self.options.temperature,
                    max_tokens: self.options.max_response_tokens,
                },
            };

            // ── Stream ─────────────────────────────────────────────────
            self.transition(AgentState::Streaming, frontend);
            let text = match self
                .stream_turn(&session.id.0, request, frontend, cancel, &mut outcome.usage)
                .await
            {
                StreamEnd::Complete { text } => text,
                StreamEnd::Cancelled { partial } => {
                    let partial = strip_think(&partial);
                    info!(
                        session = %session.id,
                        chars = partial.len(),
                        "Turn cancelled while streaming"
                    );
                    if !partial.is_empty() {
                        session.push(ConversationTurn::assistant(&partial));
                    }
                    outcome.final_text = partial;
                    outcome.stop = StopReason::Cancelled;
                    self.transition(AgentState::Cancelled, frontend);
                    break;
                }
                StreamEnd::Failed { code, message } => {
                    self.fail(session, &mut outcome, code, &message, frontend);
                    break;
                }
            };

            // ── Parse ──────────────────────────────────────────────────
            let visible = strip_think(&text);
            let seq = session
                .history
                .iter()
                .filter(|t| t.role == Role::Assistant)
                .count()
                + 1;
            let calls = parse_tool_calls(&visible, seq);
            outcome.final_text = visible.clone();

            if calls.is_empty() {
                session.push(ConversationTurn::assistant(visible));
                outcome.stop = StopReason::Completed;
                break;
            }

            debug!(count = calls.len(), "Tool calls parsed");
            session.push(ConversationTurn::assistant_with_calls(visible, calls.clone()));
            self.transition(AgentState::ToolPending, frontend);

            if !self
                .run_batch(session, &calls, frontend, cancel, &mut outcome)
                .await
            {
                outcome.stop = StopReason::Cancelled;
                self.transition(AgentState::Cancelled, frontend);
                break;
            }
        }

        frontend.on_event(&AgentEvent::Done {
            usage: outcome.usage,
            iterations: outcome.iterations,
            tool_calls_made: outcome.tool_calls_made,
        });
        self.transition(AgentState::Idle, frontend);
        outcome
    }

    /// Stream one model turn, forwarding visible text and thinking.
    async fn stream_turn(
        &self,
        session_id: &str,
        request: CompletionRequest,
        frontend: &dyn Frontend,
        cancel: &CancellationToken,
        usage: &mut Usage,
    ) -> StreamEnd {
        let opened = tokio::select! {
            biased;
            _ = cancel.cancelled() => return StreamEnd::Cancelled { partial: String::new() },
            r = self.provider.stream(request) => r,
        };
        let mut stream = match opened {
            Ok(s) => s,
            Err(e) => {
                return StreamEnd::Failed {
                    code: e.code(),
                    message: e.to_string(),
                };
            }
        };

        let mut text = String::new();
        let mut filter = ThinkFilter::default();
        let emit = |segments: Vec<Segment>| {
            for segment in segments {
                let event = match segment {
                    Segment::Text(text) => AgentEvent::Token { text },
                    Segment::Thinking(text) => AgentEvent::Thinking { text },
                };
                frontend.on_event(&event);
            }
        };

        loop {
            let event = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    stream.cancel();
                    emit(filter.finish());
                    return StreamEnd::Cancelled { partial: text };
                }
                e = stream.next() => e,
            };

            match event {
                Some(StreamEvent::Token { text: token }) => {
                    text.push_str(&token);
                    emit(filter.push(&token));
                }
                Some(StreamEvent::Done { usage: turn_usage }) => {
                    emit(filter.finish());
                    usage.add(&turn_usage);
                    self.event_bus.publish(DomainEvent::ResponseGenerated {
                        session_id: session_id.to_string(),
                        model: self.options.model.clone(),
                        tokens_used: turn_usage.total_tokens,
                        timestamp: Utc::now(),
                    });
                    return StreamEnd::Complete { text };
                }
                Some(StreamEvent::Error { code, message }) => {
                    emit(filter.finish());
                    return StreamEnd::Failed { code, message };
                }
                None => {
                    emit(filter.finish());
                    return StreamEnd::Failed {
                        code: ErrorCode::UpstreamFailure,
                        message: "stream ended without a completion".into(),
                    };
                }
            }
        }
    }

    /// Resolve every call of a batch, in order, one tool turn each.
    /// Returns `false` if the batch was cancelled during a confirmation.
    async fn run_batch(
        &self,
        session: &mut Session,
        calls: &[ToolCall],
        frontend: &dyn Frontend,
        cancel: &CancellationToken,
        outcome: &mut TurnOutcome,
    ) -> bool {
        for (i, call) in calls.iter().enumerate() {
            frontend.on_event(&AgentEvent::ToolCall {
                id: call.id.clone(),
                name: call.name.clone(),
                arguments: call.arguments.clone(),
            });
            let started = Instant::now();

            let mutating = call.kind().is_some_and(|k| k.is_mutating());
            let result = if mutating {
                match self.tools.prepare(call).await {
                    Err(e) => {
                        warn!(tool = %call.name, error = %e, "Tool refused before confirmation");
                        ToolResult::error(&call.id, e.to_string())
                    }
                    Ok(effect) => {
                        self.transition(AgentState::Confirming, frontend);
                        let decision = tokio::select! {
                            biased;
                            _ = cancel.cancelled() => None,
                            d = frontend.confirm(&effect) => Some(d),
                        };
                        match decision {
                            None => {
                                info!(pending = calls.len() - i, "Cancelled during confirmation");
                                for pending in &calls[i..] {
                                    let rejected = ToolResult::rejected(&pending.id);
                                    self.record(session, pending, rejected, started, frontend);
                                }
                                return false;
                            }
                            Some(Decision::Reject) => ToolResult::rejected(&call.id),
                            Some(Decision::Accept) => {
                                self.transition(AgentState::Executing, frontend);
                                self.tools.apply(&call.id, &effect).await
                            }
                        }
                    }
                }
            } else {
                self.transition(AgentState::Executing, frontend);
                self.tools.execute(call).await
            };

            self.record(session, call, result, started, frontend);
            outcome.tool_calls_made += 1;
            self.transition(AgentState::ToolPending, frontend);
        }
        true
    }

    fn record(
        &self,
        session: &mut Session,
        call: &ToolCall,
        result: ToolResult,
        started: Instant,
        frontend: &dyn Frontend,
    ) {
        self.event_bus.publish(DomainEvent::ToolExecuted {
            tool_name: call.name.clone(),
            status: result.status,
            duration_ms: started.elapsed().as_millis() as u64,
            timestamp: Utc::now(),
        });
        frontend.on_event(&AgentEvent::ToolResult {
            id: call.id.clone(),
            name: call.name.clone(),
            status: result.status,
            output: result.output.clone(),
        });
        session.push(ConversationTurn::tool(&result));
    }

    /// Append a failed assistant turn and stop.
    fn fail(
        &self,
        session: &mut Session,
        outcome: &mut TurnOutcome,
        code: ErrorCode,
        message: &str,
        frontend: &dyn Frontend,
    ) {
        warn!(session = %session.id, code = %code, message, "Model turn failed");
        self.event_bus.publish(DomainEvent::ErrorOccurred {
            context: "agent_loop".into(),
            error_message: format!("{code}: {message}"),
            timestamp: Utc::now(),
        });
        frontend.on_event(&AgentEvent::Error {
            code,
            message: message.to_string(),
        });
        let text = format!("[error:{code}] {message}");
        session.push(ConversationTurn::assistant(&text));
        outcome.final_text = text;
        outcome.stop = StopReason::Failed(code);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use llmcode_core::{CompletionStream, ContextBudget, ProviderError, SessionConfig};
    use llmcode_tools::{PendingEffect, ToolLimits};
    use std::sync::Mutex;

    /// Replays canned responses, one per model turn.
    struct Scripted {
        turns: Mutex<Vec<Vec<StreamEvent>>>,
        requests: Mutex<Vec<CompletionRequest>>,
    }

    impl Scripted {
        fn new(turns: Vec<Vec<StreamEvent>>) -> Arc<Self> {
            Arc::new(Self {
                turns: Mutex::new(turns.into_iter().rev().collect()),
                requests: Mutex::new(Vec::new()),
            })
        }
    }

    fn reply(text: &str) -> Vec<StreamEvent> {
        vec![
            StreamEvent::token(text),
            StreamEvent::Done {
                usage: Usage {
                    prompt_tokens: 10,
                    completion_tokens: 5,
                    total_tokens: 15,
                },
            },
        ]
    }

    #[async_trait]
    impl Provider for Scripted {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn stream(&self, request: CompletionRequest) -> Result<CompletionStream, ProviderError> {
            self.requests.lock().unwrap().push(request);
            let events = self
                .turns
                .lock()
                .unwrap()
                .pop()
                .ok_or_else(|| ProviderError::InvalidResponse("script exhausted".into()))?;
            Ok(CompletionStream::from_events(events))
        }
    }

    #[derive(Default)]
    struct Recorder {
        events: Mutex<Vec<AgentEvent>>,
    }

    #[async_trait]
    impl Frontend for Recorder {
        fn on_event(&self, event: &AgentEvent) {
            self.events.lock().unwrap().push(event.clone());
        }

        async fn confirm(&self, _effect: &PendingEffect) -> Decision {
            Decision::Reject
        }
    }

    fn agent(dir: &std::path::Path, provider: Arc<Scripted>, max_iterations: usize) -> AgentLoop {
        let mut options = LoopOptions::new("test-model");
        options.max_iterations = max_iterations;
        AgentLoop::new(
            provider,
            Arc::new(ToolExecutor::new(dir, ToolLimits::default())),
            ContextSources::new(dir),
            ContextAssembler::new(ContextBudget::new(8192, 2048)),
            options,
        )
    }

    fn session(dir: &std::path::Path) -> Session {
        Session::new(dir, SessionConfig::new("test-model"))
    }

    #[tokio::test]
    async fn plain_answer_completes() {
        let dir = tempfile::tempdir().unwrap();
        let provider = Scripted::new(vec![reply("<think>easy</think>Hello there")]);
        let agent = agent(dir.path(), provider.clone(), 10);
        let mut s = session(dir.path());
        let frontend = Recorder::default();

        let outcome = agent.process(&mut s, "hi", &frontend, &CancellationToken::new()).await;
        assert_eq!(outcome.stop, StopReason::Completed);
        assert_eq!(outcome.final_text, "Hello there");
        assert_eq!(outcome.iterations, 1);
        assert_eq!(outcome.usage.total_tokens, 15);
        assert_eq!(s.history.len(), 2);
        assert_eq!(s.history[1].content, "Hello there");
        assert_eq!(agent.state(), AgentState::Idle);

        let events = frontend.events.lock().unwrap();
        assert!(events.contains(&AgentEvent::Thinking { text: "easy".into() }));
        assert!(events.contains(&AgentEvent::Token { text: "Hello there".into() }));

        let request = &provider.requests.lock().unwrap()[0];
        assert_eq!(request.messages[0].role, Role::System);
        assert_eq!(request.messages.last().unwrap().content, "hi");
        assert_eq!(request.options.model, "test-model");
    }

    #[tokio::test]
    async fn tool_results_feed_next_turn() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.py"), "x = 1\n").unwrap();
        let provider = Scripted::new(vec![
            reply(r#"{"tool": "read_file", "args": {"path": "a.py"}}"#),
            reply("a.py sets x to 1"),
        ]);
        let agent = agent(dir.path(), provider.clone(), 10);
        let mut s = session(dir.path());

        let outcome = agent
            .process(&mut s, "what is in a.py?", &Recorder::default(), &CancellationToken::new())
            .await;
        assert_eq!(outcome.stop, StopReason::Completed);
        assert_eq!(outcome.iterations, 2);
        assert_eq!(outcome.tool_calls_made, 1);
        assert_eq!(outcome.usage.total_tokens, 30);
        assert_eq!(s.check_tool_pairing(), Ok(()));
        assert_eq!(s.history[1].tool_calls[0].id, "call_1_1");
        assert_eq!(s.history[2].content, "x = 1\n");

        let second = &provider.requests.lock().unwrap()[1];
        assert!(second.messages.iter().any(|m| m.content.contains("Tool result [read_file call_1_1: ok]")));
    }

    #[tokio::test]
    async fn turn_limit_appends_notice() {
        let dir = tempfile::tempdir().unwrap();
        let call = r#"{"tool": "git_status", "args": {}}"#;
        let provider = Scripted::new(vec![reply(call), reply(call)]);
        let agent = agent(dir.path(), provider, 2);
        let mut s = session(dir.path());

        let outcome = agent
            .process(&mut s, "loop", &Recorder::default(), &CancellationToken::new())
            .await;
        assert_eq!(outcome.stop, StopReason::TurnLimit);
        assert_eq!(outcome.iterations, 2);
        assert!(s.last_turn().unwrap().content.contains("turn limit reached"));
        assert_eq!(s.check_tool_pairing(), Ok(()));
        // Ids stay unique across the two assistant turns.
        assert_eq!(s.history[1].tool_calls[0].id, "call_1_1");
        assert_eq!(s.history[3].tool_calls[0].id, "call_2_1");
    }

    #[tokio::test]
    async fn error_event_becomes_failed_turn() {
        let dir = tempfile::tempdir().unwrap();
        let provider = Scripted::new(vec![vec![
            StreamEvent::token("partial"),
            StreamEvent::error(ErrorCode::RateLimited, "slow down"),
        ]]);
        let agent = agent(dir.path(), provider, 10);
        let mut s = session(dir.path());

        let outcome = agent
            .process(&mut s, "hi", &Recorder::default(), &CancellationToken::new())
            .await;
        assert_eq!(outcome.stop, StopReason::Failed(ErrorCode::RateLimited));
        assert_eq!(s.last_turn().unwrap().content, "[error:rate_limited] slow down");
        assert_eq!(agent.state(), AgentState::Idle);
    }

    #[tokio::test]
    async fn request_failure_is_not_retried() {
        let dir = tempfile::tempdir().unwrap();
        let provider = Scripted::new(vec![]);
        let agent = agent(dir.path(), provider.clone(), 10);
        let mut s = session(dir.path());

        let outcome = agent
            .process(&mut s, "hi", &Recorder::default(), &CancellationToken::new())
            .await;
        assert!(matches!(outcome.stop, StopReason::Failed(_)));
        assert_eq!(provider.requests.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn oversized_message_fails_with_context_error() {
        let dir = tempfile::tempdir().unwrap();
        let provider = Scripted::new(vec![reply("never sent")]);
        let mut agent = agent(dir.path(), provider.clone(), 10);
        agent.assembler = ContextAssembler::new(ContextBudget::new(600, 100));
        let mut s = session(dir.path());

        let outcome = agent
            .process(&mut s, &"x".repeat(10_000), &Recorder::default(), &CancellationToken::new())
            .await;
        assert_eq!(outcome.stop, StopReason::Failed(ErrorCode::ContextTooLong));
        assert!(provider.requests.lock().unwrap().is_empty());
        assert!(s.last_turn().unwrap().content.starts_with("[error:context_too_long]"));
    }
}
