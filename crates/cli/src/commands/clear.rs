//! `llmcode clear`: Delete the project's cached state.

use std::path::Path;

use llmcode_config::AppConfig;
use llmcode_memory::{RetrievalIndex, SessionStore, SummaryStore};

pub async fn run(root: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let state_dir = AppConfig::project_dir(root);
    if !state_dir.exists() {
        println!("Nothing to clear in {}", root.display());
        return Ok(());
    }

    let index = RetrievalIndex::open(root, &state_dir);
    let files = index.stats().await.files;
    index.clear().await?;

    let summaries = SummaryStore::open(root, &state_dir);
    let summary_count = summaries.len().await;
    summaries.clear().await?;

    let sessions = SessionStore::new(&state_dir);
    let session_count = sessions.list().await?.len();
    sessions.clear().await?;

    println!("✅ Cleared {files} indexed files, {summary_count} summaries, {session_count} sessions");
    Ok(())
}
