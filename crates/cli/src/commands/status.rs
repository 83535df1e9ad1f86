//! `llmcode status`: Show config, server health and index state.

use std::path::Path;

use llmcode_config::AppConfig;
use llmcode_memory::{RetrievalIndex, SessionStore, SummaryStore};

pub async fn run(root: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let config = AppConfig::load(Some(root)).map_err(|e| format!("Failed to load config: {e}"))?;
    let state_dir = AppConfig::project_dir(root);

    println!("llmcode status");
    println!("==============");
    println!("  Config dir:   {}", AppConfig::config_dir().display());
    println!("  Project:      {}", root.display());
    println!("  Server:       {}", config.server_url);
    println!("  API key:      {}", if config.has_api_key() { "set" } else { "missing" });
    println!("  Model:        {}", config.default_model);
    println!(
        "  Embeddings:   {}",
        config.embed_model.as_deref().unwrap_or("server default")
    );
    println!(
        "  Context:      {} tokens ({} reserved for replies)",
        config.context_length, config.max_response_tokens
    );

    let stats = RetrievalIndex::open(root, &state_dir).stats().await;
    let summaries = SummaryStore::open(root, &state_dir).len().await;
    let sessions = SessionStore::new(&state_dir).list().await?.len();
    println!("\n  Index:        {} files, {} chunks", stats.files, stats.chunks);
    println!("  Summaries:    {summaries}");
    println!("  Sessions:     {sessions}");

    if !config.has_api_key() {
        println!("\n  ⚠️  No API key — run `llmcode init` first");
        return Ok(());
    }

    let client = super::client(&config)?;
    match client.health().await {
        Ok(health) => {
            let state = health
                .get("status")
                .and_then(|s| s.as_str())
                .unwrap_or("ok");
            println!("\n  ✅ Server reachable ({state})");
            match client.list_models().await {
                Ok(models) if !models.is_empty() => println!("  Models:       {}", models.join(", ")),
                Ok(_) => println!("  Models:       (none reported)"),
                Err(e) => println!("  Models:       unavailable ({e})"),
            }
        }
        Err(e) => println!("\n  ❌ Server unreachable: {e}"),
    }

    Ok(())
}
