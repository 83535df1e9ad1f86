//! `llmcode scan`: Summarize and index project files.
//!
//! Unchanged files (same content hash) cost nothing: their summaries and
//! chunks are served from the caches under `.llmcode/`.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use llmcode_config::AppConfig;
use llmcode_core::EventBus;
use llmcode_memory::{
    EmbedOptions, IndexOutcome, RetrievalIndex, ScanOptions, SummaryOptions, SummaryStore, scan,
};
use tracing::warn;

use crate::activity::{self, ActivityLog};

pub async fn run(root: &Path, paths: Vec<PathBuf>, full: bool) -> Result<(), Box<dyn std::error::Error>> {
    let config = super::load_config(root)?;
    let client = Arc::new(super::client(&config)?);
    let state_dir = AppConfig::project_dir(root);

    let index = RetrievalIndex::open(root, &state_dir);
    let summaries = SummaryStore::open(root, &state_dir);
    if full {
        index.clear().await?;
        summaries.clear().await?;
        println!("Cleared existing index and summaries");
    }

    let files = scan(root, &paths, &ScanOptions::from(&config.index));
    if files.is_empty() {
        println!("No matching files found.");
        return Ok(());
    }
    println!("Scanning {} files...", files.len());

    let embed = EmbedOptions {
        model: config.embed_model.clone(),
        batch_size: config.index.embed_batch_size,
        chunk_max_tokens: config.index.chunk_max_tokens,
    };
    let summary_options = SummaryOptions::new(&config.default_model);
    let bus = Arc::new(EventBus::default());
    let log = ActivityLog::spawn(&bus);

    let (mut indexed, mut unchanged, mut failed) = (0usize, 0usize, 0usize);
    for (i, file) in files.iter().enumerate() {
        let progress = format!("[{}/{}]", i + 1, files.len());

        if let Err(e) = summaries
            .get_summary(&file.path, client.as_ref(), &summary_options, Some(bus.as_ref()))
            .await
        {
            warn!(path = %file.path, error = %e, "Summary failed");
        }

        match index
            .index_file(&file.path, client.as_ref(), &embed, Some(bus.as_ref()))
            .await
        {
            Ok(IndexOutcome::Indexed(chunks)) => {
                indexed += 1;
                println!("  {progress} {} ({chunks} chunks)", file.path);
            }
            Ok(IndexOutcome::Unchanged) => unchanged += 1,
            Ok(IndexOutcome::Removed) => {}
            Err(e) => {
                failed += 1;
                eprintln!("  {progress} {} failed: {e}", file.path);
            }
        }
    }

    let pruned = index.prune().await?;
    for summary in summaries.all().await {
        if !root.join(&summary.path).exists() {
            summaries.remove(&summary.path).await?;
        }
    }

    let stats = index.stats().await;
    let totals = activity::close(bus, log).await;
    println!();
    println!("  Indexed:    {indexed} ({} chunks embedded)", totals.chunks_embedded);
    println!("  Summarized: {}", totals.summaries_generated);
    println!("  Unchanged:  {unchanged}");
    if failed > 0 {
        println!("  Failed:     {failed}");
    }
    if pruned > 0 {
        println!("  Pruned:     {pruned} deleted files");
    }
    println!(
        "  Index now holds {} files, {} chunks; {} summaries",
        stats.files,
        stats.chunks,
        summaries.len().await
    );

    Ok(())
}
