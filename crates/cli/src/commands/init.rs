//! `llmcode init`: Write the global config.

use llmcode_config::AppConfig;

pub fn run(
    server: String,
    api_key: String,
    model: Option<String>,
) -> Result<(), Box<dyn std::error::Error>> {
    let config_path = AppConfig::config_dir().join("config.toml");

    // Keep any other settings already in the file.
    let mut config = AppConfig::load_from(&config_path)
        .map_err(|e| format!("Failed to read existing config: {e}"))?;
    config.server_url = server;
    config.api_key = Some(api_key);
    if let Some(model) = model {
        config.default_model = model;
    }
    config.validate()?;
    config.save_to(&config_path)?;

    println!("✅ Wrote {}", config_path.display());
    println!("   Server: {}", config.server_url);
    println!("   Model:  {}", config.default_model);
    println!("\nNext steps:");
    println!("   1. llmcode status      check the server is reachable");
    println!("   2. llmcode scan        index the current project");
    println!("   3. llmcode chat        start talking");

    Ok(())
}
