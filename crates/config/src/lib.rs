//! Configuration loading, validation, and management for llmcode.
//!
//! Loads `~/.llmcode/config.toml`, overlays `<project>/.llmcode/config.toml`
//! table by table, then applies environment overrides:
//! - `LLMCODE_SERVER_URL`
//! - `LLMCODE_API_KEY`
//! - `LLMCODE_MODEL`

use std::path::{Path, PathBuf};

use llmcode_core::{ContextBudget, SessionConfig};
use serde::{Deserialize, Serialize};

/// Name of the per-project state directory (index, summaries, sessions).
pub const PROJECT_DIR: &str = ".llmcode";

/// The root configuration structure.
#[derive(Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Base URL of the model-serving server
    #[serde(default = "default_server_url")]
    pub server_url: String,

    /// API key sent as `X-API-Key`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Chat model
    #[serde(default = "default_model")]
    pub default_model: String,

    /// Embedding model; server default when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embed_model: Option<String>,

    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Tokens reserved for each model reply
    #[serde(default = "default_max_response_tokens")]
    pub max_response_tokens: u32,

    /// Declared context length of the chat model
    #[serde(default = "default_context_length")]
    pub context_length: u32,

    #[serde(default)]
    pub agent: AgentConfig,

    #[serde(default)]
    pub index: IndexConfig,

    #[serde(default)]
    pub tools: ToolsConfig,
}

fn default_server_url() -> String {
    "http://localhost:8000".into()
}
fn default_model() -> String {
    "llama3.2:3b".into()
}
fn default_temperature() -> f32 {
    0.3
}
fn default_max_response_tokens() -> u32 {
    2048
}
fn default_context_length() -> u32 {
    8192
}

fn redact(s: &Option<String>) -> &'static str {
    match s {
        Some(_) => "[REDACTED]",
        None => "None",
    }
}

impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConfig")
            .field("server_url", &self.server_url)
            .field("api_key", &redact(&self.api_key))
            .field("default_model", &self.default_model)
            .field("embed_model", &self.embed_model)
            .field("temperature", &self.temperature)
            .field("max_response_tokens", &self.max_response_tokens)
            .field("context_length", &self.context_length)
            .field("agent", &self.agent)
            .field("index", &self.index)
            .field("tools", &self.tools)
            .finish()
    }
}

/// Agent loop settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Model turns allowed per user message
    #[serde(default = "default_max_iterations")]
    pub max_iterations: usize,

    /// Recent history turns offered to the context manager
    #[serde(default = "default_history_turns")]
    pub history_turns: usize,

    /// Retrieved chunks per query
    #[serde(default = "default_retrieval_k")]
    pub retrieval_k: usize,

    /// Summary text is cut to this many chars when rendered
    #[serde(default = "default_max_summary_chars")]
    pub max_summary_chars: usize,
}

fn default_max_iterations() -> usize {
    10
}
fn default_history_turns() -> usize {
    20
}
fn default_retrieval_k() -> usize {
    8
}
fn default_max_summary_chars() -> usize {
    1200
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_iterations: default_max_iterations(),
            history_turns: default_history_turns(),
            retrieval_k: default_retrieval_k(),
            max_summary_chars: default_max_summary_chars(),
        }
    }
}

/// Scanning, chunking and embedding settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexConfig {
    #[serde(default = "default_chunk_max_tokens")]
    pub chunk_max_tokens: usize,

    /// Texts per embedding request (capped at 100)
    #[serde(default = "default_embed_batch_size")]
    pub embed_batch_size: usize,

    /// Files larger than this many bytes are skipped
    #[serde(default = "default_max_file_size")]
    pub max_file_size: u64,

    /// File extensions considered source code (with leading dot)
    #[serde(default = "default_extensions")]
    pub extensions: Vec<String>,

    /// Names or `*.ext` globs skipped while scanning
    #[serde(default = "default_ignore_patterns")]
    pub ignore_patterns: Vec<String>,
}

fn default_chunk_max_tokens() -> usize {
    500
}
fn default_embed_batch_size() -> usize {
    20
}
fn default_max_file_size() -> u64 {
    200 * 1024
}

fn default_extensions() -> Vec<String> {
    [
        ".py", ".js", ".ts", ".jsx", ".tsx", ".c", ".cpp", ".cc", ".h", ".hpp", ".java", ".kt",
        ".scala", ".go", ".rs", ".rb", ".php", ".swift", ".m", ".mm", ".cs", ".fs", ".lua", ".pl",
        ".pm", ".sh", ".bash", ".zsh", ".sql", ".graphql", ".html", ".css", ".scss", ".sass",
        ".less", ".json", ".yaml", ".yml", ".toml", ".xml", ".md", ".rst", ".txt", ".hlsl",
        ".glsl", ".vert", ".frag", ".comp",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

fn default_ignore_patterns() -> Vec<String> {
    [
        ".git", ".svn", ".hg", "node_modules", "__pycache__", ".venv", "venv", ".env", "build",
        "dist", "target", ".llmcode", "*.pyc", "*.pyo", "*.exe", "*.dll", "*.so", "*.dylib",
        "*.bin", "*.obj", "*.o", "*.a", "*.lib", "*.png", "*.jpg", "*.jpeg", "*.gif", "*.ico",
        "*.pdf", "*.zip", "*.tar", "*.gz", "*.rar", "*.7z", ".DS_Store", "Thumbs.db", "*.lock",
        "package-lock.json",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            chunk_max_tokens: default_chunk_max_tokens(),
            embed_batch_size: default_embed_batch_size(),
            max_file_size: default_max_file_size(),
            extensions: default_extensions(),
            ignore_patterns: default_ignore_patterns(),
        }
    }
}

/// Tool executor limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolsConfig {
    #[serde(default = "default_command_timeout_secs")]
    pub command_timeout_secs: u64,

    #[serde(default = "default_search_max_matches")]
    pub search_max_matches: usize,

    #[serde(default = "default_search_max_depth")]
    pub search_max_depth: usize,

    /// Tool output fed back to the model is cut to this many chars
    #[serde(default = "default_max_output_chars")]
    pub max_output_chars: usize,
}

fn default_command_timeout_secs() -> u64 {
    30
}
fn default_search_max_matches() -> usize {
    50
}
fn default_search_max_depth() -> usize {
    8
}
fn default_max_output_chars() -> usize {
    3000
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            command_timeout_secs: default_command_timeout_secs(),
            search_max_matches: default_search_max_matches(),
            search_max_depth: default_search_max_depth(),
            max_output_chars: default_max_output_chars(),
        }
    }
}

impl AppConfig {
    /// Load the global config, overlaid with the project config under
    /// `project_root` (if any) and the environment.
    pub fn load(project_root: Option<&Path>) -> Result<Self, ConfigError> {
        let global = Self::config_dir().join("config.toml");
        let project = project_root.map(|root| root.join(PROJECT_DIR).join("config.toml"));
        let mut config = Self::load_layers(&global, project.as_deref())?;
        config.apply_env(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Load a single file. A missing file yields defaults.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        Self::load_layers(path, None)
    }

    /// Merge a global and an optional project file, project winning per key.
    pub fn load_layers(global: &Path, project: Option<&Path>) -> Result<Self, ConfigError> {
        let mut merged = read_table(global)?;
        if let Some(project) = project {
            let overlay = read_table(project)?;
            merge_tables(&mut merged, overlay);
        }

        let config: Self = toml::Value::Table(merged)
            .try_into()
            .map_err(|e: toml::de::Error| ConfigError::ParseError {
                path: project.unwrap_or(global).to_path_buf(),
                reason: e.to_string(),
            })?;

        config.validate()?;
        Ok(config)
    }

    /// Apply `LLMCODE_*` overrides from an environment lookup.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(url) = lookup("LLMCODE_SERVER_URL") {
            self.server_url = url;
        }
        if let Some(key) = lookup("LLMCODE_API_KEY") {
            self.api_key = Some(key);
        }
        if let Some(model) = lookup("LLMCODE_MODEL") {
            self.default_model = model;
        }
    }

    /// Get the global configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".llmcode")
    }

    /// The per-project state directory.
    pub fn project_dir(project_root: &Path) -> PathBuf {
        project_root.join(PROJECT_DIR)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=2.0).contains(&self.temperature) {
            return Err(ConfigError::ValidationError(
                "temperature must be between 0.0 and 2.0".into(),
            ));
        }

        if self.max_response_tokens >= self.context_length {
            return Err(ConfigError::ValidationError(format!(
                "max_response_tokens ({}) must be smaller than context_length ({})",
                self.max_response_tokens, self.context_length
            )));
        }

        if self.agent.max_iterations == 0 {
            return Err(ConfigError::ValidationError(
                "agent.max_iterations must be at least 1".into(),
            ));
        }

        if self.index.chunk_max_tokens == 0 {
            return Err(ConfigError::ValidationError(
                "index.chunk_max_tokens must be at least 1".into(),
            ));
        }

        if self.index.embed_batch_size == 0 || self.index.embed_batch_size > 100 {
            return Err(ConfigError::ValidationError(
                "index.embed_batch_size must be between 1 and 100".into(),
            ));
        }

        Ok(())
    }

    pub fn has_api_key(&self) -> bool {
        self.api_key.is_some()
    }

    /// Prompt budget for the configured model.
    pub fn context_budget(&self) -> ContextBudget {
        ContextBudget::new(
            self.context_length as usize,
            self.max_response_tokens as usize,
        )
    }

    /// Per-session settings derived from this config.
    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            model: self.default_model.clone(),
            temperature: self.temperature,
            max_iterations: self.agent.max_iterations,
            history_turns: self.agent.history_turns,
            retrieval_k: self.agent.retrieval_k,
        }
    }

    /// Write this config as TOML, creating parent directories.
    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        let body = toml::to_string_pretty(self)
            .map_err(|e| ConfigError::ValidationError(e.to_string()))?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| ConfigError::WriteError {
                path: parent.to_path_buf(),
                reason: e.to_string(),
            })?;
        }
        std::fs::write(path, body).map_err(|e| ConfigError::WriteError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        tracing::info!(path = %path.display(), "Config written");
        Ok(())
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server_url: default_server_url(),
            api_key: None,
            default_model: default_model(),
            embed_model: None,
            temperature: default_temperature(),
            max_response_tokens: default_max_response_tokens(),
            context_length: default_context_length(),
            agent: AgentConfig::default(),
            index: IndexConfig::default(),
            tools: ToolsConfig::default(),
        }
    }
}

fn read_table(path: &Path) -> Result<toml::Table, ConfigError> {
    if !path.exists() {
        tracing::debug!("No config file found at {}, skipping", path.display());
        return Ok(toml::Table::new());
    }

    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;

    toml::from_str::<toml::Table>(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
}

/// Recursive merge: nested tables merge, everything else is replaced.
fn merge_tables(base: &mut toml::Table, overlay: toml::Table) {
    for (key, value) in overlay {
        match (base.get_mut(&key), value) {
            (Some(toml::Value::Table(existing)), toml::Value::Table(incoming)) => {
                merge_tables(existing, incoming);
            }
            (_, value) => {
                base.insert(key, value);
            }
        }
    }
}

/// Get the user's home directory.
fn dirs_home() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("C:\\Users\\Default"))
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/tmp"))
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("Failed to write config file at {path}: {reason}")]
    WriteError { path: PathBuf, reason: String },

    #[error("Failed to parse config file at {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}

impl From<ConfigError> for llmcode_core::Error {
    fn from(e: ConfigError) -> Self {
        llmcode_core::Error::Config {
            message: e.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.default_model, "llama3.2:3b");
        assert_eq!(config.agent.max_iterations, 10);
        assert_eq!(config.tools.command_timeout_secs, 30);
    }

    #[test]
    fn config_roundtrip_toml() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        let parsed: AppConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed.server_url, config.server_url);
        assert_eq!(parsed.index.extensions, config.index.extensions);
    }

    #[test]
    fn response_reservation_must_fit_context() {
        let config = AppConfig {
            context_length: 2048,
            max_response_tokens: 2048,
            ..AppConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn invalid_temperature_rejected() {
        let config = AppConfig {
            temperature: 5.0,
            ..AppConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn missing_config_file_returns_defaults() {
        let config = AppConfig::load_from(Path::new("/nonexistent/config.toml")).unwrap();
        assert_eq!(config.server_url, "http://localhost:8000");
    }

    #[test]
    fn project_layer_overrides_per_key() {
        let dir = tempfile::tempdir().unwrap();
        let global = dir.path().join("global.toml");
        let project = dir.path().join("project.toml");
        std::fs::write(
            &global,
            "server_url = \"http://gpu-box:8000\"\napi_key = \"secret\"\n[agent]\nmax_iterations = 4\nretrieval_k = 3\n",
        )
        .unwrap();
        std::fs::write(&project, "default_model = \"qwen2.5-coder\"\n[agent]\nretrieval_k = 12\n")
            .unwrap();

        let config = AppConfig::load_layers(&global, Some(&project)).unwrap();
        assert_eq!(config.server_url, "http://gpu-box:8000");
        assert_eq!(config.default_model, "qwen2.5-coder");
        assert_eq!(config.agent.max_iterations, 4);
        assert_eq!(config.agent.retrieval_k, 12);
        assert_eq!(config.agent.history_turns, 20);
    }

    #[test]
    fn env_overrides_win() {
        let mut config = AppConfig::default();
        config.apply_env(|key| match key {
            "LLMCODE_MODEL" => Some("codellama".into()),
            "LLMCODE_API_KEY" => Some("k".into()),
            _ => None,
        });
        assert_eq!(config.default_model, "codellama");
        assert!(config.has_api_key());
        assert_eq!(config.server_url, "http://localhost:8000");
    }

    #[test]
    fn debug_redacts_api_key() {
        let config = AppConfig {
            api_key: Some("super-secret".into()),
            ..AppConfig::default()
        };
        let debug = format!("{config:?}");
        assert!(!debug.contains("super-secret"));
        assert!(debug.contains("[REDACTED]"));
    }

    #[test]
    fn save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");
        let config = AppConfig {
            server_url: "http://example:9000".into(),
            ..AppConfig::default()
        };
        config.save_to(&path).unwrap();
        let loaded = AppConfig::load_from(&path).unwrap();
        assert_eq!(loaded.server_url, "http://example:9000");
    }

    #[test]
    fn budget_follows_context_length() {
        let budget = AppConfig::default().context_budget();
        assert_eq!(budget.available(), 8192 - 2048);
    }
}
