//! `llmcode chat`: Interactive session in the current project.

use std::path::Path;
use std::sync::Arc;

use llmcode_agent::{
    AgentLoop, ContextAssembler, ContextSources, LoopOptions, Reply, SessionDriver, StopReason,
};
use llmcode_config::AppConfig;
use llmcode_core::{EventBus, Provider, Session};
use llmcode_memory::{RetrievalIndex, SessionStore, SummaryOptions, SummaryStore};
use llmcode_tools::{ToolExecutor, ToolLimits};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::activity::{self, ActivityLog};
use crate::terminal::Terminal;

pub async fn run(
    root: &Path,
    resume: bool,
    session_id: Option<String>,
    model: Option<String>,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = super::load_config(root)?;
    if let Some(model) = model {
        config.default_model = model;
    }

    let client: Arc<dyn Provider> = Arc::new(super::client(&config)?);
    let state_dir = AppConfig::project_dir(root);
    let store = SessionStore::new(&state_dir);

    let mut session = match (resume, session_id) {
        (_, Some(id)) => store
            .load(&id)
            .await
            .map_err(|e| format!("Cannot resume session {id}: {e}"))?,
        (true, None) => match store.latest().await? {
            Some(s) => s,
            None => {
                println!("  No saved session, starting a new one.");
                Session::new(root, config.session_config())
            }
        },
        (false, None) => Session::new(root, config.session_config()),
    };
    session.config.model = config.default_model.clone();

    let bus = Arc::new(EventBus::default());
    let log = ActivityLog::spawn(&bus);

    // Retrieval only when the project has been scanned.
    let index = Arc::new(RetrievalIndex::open(root, &state_dir));
    let stats = index.stats().await;
    let mut sources = ContextSources::new(root).with_event_bus(bus.clone());
    if stats.files > 0 {
        sources = sources
            .with_index(index, client.clone(), config.embed_model.clone())
            .with_summaries(
                Arc::new(SummaryStore::open(root, &state_dir)),
                SummaryOptions::new(&config.default_model),
            );
    }

    let assembler = ContextAssembler::new(config.context_budget())
        .with_history_turns(config.agent.history_turns)
        .with_max_summary_chars(config.agent.max_summary_chars);

    let options = LoopOptions {
        model: session.config.model.clone(),
        temperature: config.temperature,
        max_response_tokens: config.max_response_tokens,
        max_iterations: config.agent.max_iterations,
        retrieval_k: config.agent.retrieval_k,
    };

    let tools = Arc::new(ToolExecutor::new(root, ToolLimits::from(&config.tools)));
    let agent =
        AgentLoop::new(client, tools, sources, assembler, options).with_event_bus(bus.clone());

    println!();
    println!("  llmcode — interactive session");
    println!();
    println!("  Project:   {}", root.display());
    println!("  Server:    {}", config.server_url);
    println!("  Model:     {}", session.config.model);
    println!("  Index:     {} files, {} chunks", stats.files, stats.chunks);
    println!("  Session:   {} ({} turns)", session.id, session.history.len());
    println!();
    println!("  Type /help for commands, /quit or Ctrl-C to exit.");
    println!();

    let mut driver = SessionDriver::new(agent, session).with_store(store);
    let terminal = Terminal::new();

    loop {
        let line = tokio::select! {
            line = terminal.read_line("  You > ") => line?,
            _ = tokio::signal::ctrl_c() => None,
        };
        let Some(line) = line else {
            break;
        };

        // Ctrl-C while a turn runs cancels the turn, not the program.
        let cancel = CancellationToken::new();
        let watcher = tokio::spawn({
            let cancel = cancel.clone();
            async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    cancel.cancel();
                }
            }
        });

        let reply = driver.handle(&line, &terminal, &cancel).await;
        watcher.abort();

        match reply {
            Reply::Quit => break,
            Reply::Nothing => {}
            Reply::Info(text) => {
                for l in text.lines() {
                    println!("  {l}");
                }
                println!();
            }
            Reply::Turn(outcome) => {
                debug!(
                    iterations = outcome.iterations,
                    tools = outcome.tool_calls_made,
                    stop = ?outcome.stop,
                    "Turn finished"
                );
                if outcome.stop == StopReason::Cancelled {
                    eprintln!("\n  (cancelled)");
                }
                println!();
            }
        }
    }

    let session_id = driver.session().id.clone();
    drop(driver);
    let totals = activity::close(bus, log).await;

    println!();
    println!("  Session saved: {session_id}");
    if totals.model_turns > 0 {
        println!(
            "  This run: {} model turns, {} tokens, {} tool calls ({} rejected)",
            totals.model_turns,
            totals.tokens,
            totals.tool_calls(),
            totals.tools_rejected
        );
    }
    println!("  Resume with: llmcode chat --continue");
    println!();

    Ok(())
}
