//! llmcode CLI: the main entry point.
//!
//! Commands:
//! - `init`    - Write the global config (server URL, API key, model)
//! - `status`  - Show config, server health and project index state
//! - `scan`    - Summarize and index project files
//! - `chat`    - Interactive session in the current directory
//! - `clear`   - Delete the project's index, summaries and sessions

use std::path::PathBuf;

use clap::{Parser, Subcommand};

mod activity;
mod commands;
mod terminal;

#[derive(Parser)]
#[command(
    name = "llmcode",
    about = "llmcode — a code-aware assistant in your terminal",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Write the global configuration
    Init {
        /// Model server base URL
        #[arg(long)]
        server: String,

        /// API key for the server
        #[arg(long)]
        api_key: String,

        /// Default chat model
        #[arg(long)]
        model: Option<String>,
    },

    /// Show configuration, server health and index state
    Status,

    /// Summarize and index project files
    Scan {
        /// Files or directories to scan (default: the whole project)
        paths: Vec<PathBuf>,

        /// Rebuild from scratch instead of skipping unchanged files
        #[arg(long)]
        full: bool,
    },

    /// Start an interactive session
    Chat {
        /// Resume the most recent session
        #[arg(short, long = "continue", conflicts_with = "session")]
        resume: bool,

        /// Resume a specific session
        #[arg(short, long)]
        session: Option<String>,

        /// Override the chat model
        #[arg(short, long)]
        model: Option<String>,
    },

    /// Delete the project index, summaries and saved sessions
    Clear,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize tracing
    let filter = if cli.verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let root = std::env::current_dir()?;

    match cli.command {
        Commands::Init {
            server,
            api_key,
            model,
        } => commands::init::run(server, api_key, model)?,
        Commands::Status => commands::status::run(&root).await?,
        Commands::Scan { paths, full } => commands::scan::run(&root, paths, full).await?,
        Commands::Chat {
            resume,
            session,
            model,
        } => commands::chat::run(&root, resume, session, model).await?,
        Commands::Clear => commands::clear::run(&root).await?,
    }

    Ok(())
}
