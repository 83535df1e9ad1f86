pub mod chat;
pub mod clear;
pub mod init;
pub mod scan;
pub mod status;

use std::path::Path;

use llmcode_config::AppConfig;
use llmcode_providers::ServerClient;

/// Load the layered config for `root`, failing early without an API key.
pub(crate) fn load_config(root: &Path) -> Result<AppConfig, Box<dyn std::error::Error>> {
    let config = AppConfig::load(Some(root)).map_err(|e| format!("Failed to load config: {e}"))?;

    if !config.has_api_key() {
        eprintln!();
        eprintln!("  ERROR: No API key configured!");
        eprintln!();
        eprintln!("  Run:");
        eprintln!("    llmcode init --server <url> --api-key <key>");
        eprintln!();
        eprintln!("  or set LLMCODE_API_KEY in the environment.");
        eprintln!();
        return Err("No API key found. See above for setup instructions.".into());
    }
    Ok(config)
}

pub(crate) fn client(config: &AppConfig) -> Result<ServerClient, Box<dyn std::error::Error>> {
    Ok(ServerClient::from_config(config)?)
}
