//! Application configuration for the copilot.
//!
//! User config lives at `~/.copilot/copilot.toml`.
//! Environment variables override config file values, which override defaults.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{CopilotError, Result};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "copilot.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".copilot";

// ---------------------------------------------------------------------------
// Config structs (matching copilot.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Generation backend settings.
    #[serde(default)]
    pub llm: LlmConfig,

    /// Chunk index and retrieval settings.
    #[serde(default)]
    pub retrieval: RetrievalConfig,

    /// Run log settings.
    #[serde(default)]
    pub logs: LogsConfig,
}

/// `[llm]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// Model identifier sent with every completion request.
    #[serde(default = "default_model")]
    pub model: String,

    /// Name of the env var holding the API key (never store the key itself).
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,

    /// Base URL of the OpenAI-compatible API.
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Per-request timeout in seconds.
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            model: default_model(),
            api_key_env: default_api_key_env(),
            base_url: default_base_url(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

fn default_model() -> String {
    "gpt-4o-mini".into()
}
fn default_api_key_env() -> String {
    "OPENAI_API_KEY".into()
}
fn default_base_url() -> String {
    "https://api.openai.com/v1".into()
}
fn default_request_timeout() -> u64 {
    60
}

/// `[retrieval]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalConfig {
    /// Path to the libSQL chunk index.
    #[serde(default = "default_index_path")]
    pub index_path: String,

    /// Collection name inside the index.
    #[serde(default = "default_collection")]
    pub collection: String,

    /// Ranker identifier recorded with the collection at ingest time.
    #[serde(default = "default_embedding_model")]
    pub embedding_model: String,

    /// Maximum chunk length in characters.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    /// Characters carried over between consecutive chunks.
    #[serde(default = "default_chunk_overlap")]
    pub chunk_overlap: usize,

    /// Fragments fetched per retrieval call.
    #[serde(default = "default_top_k")]
    pub top_k: usize,

    /// Directory of `.txt` source documents for ingestion.
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            index_path: default_index_path(),
            collection: default_collection(),
            embedding_model: default_embedding_model(),
            chunk_size: default_chunk_size(),
            chunk_overlap: default_chunk_overlap(),
            top_k: default_top_k(),
            data_dir: default_data_dir(),
        }
    }
}

fn default_index_path() -> String {
    "./var/copilot-index.db".into()
}
fn default_collection() -> String {
    "business_docs".into()
}
fn default_embedding_model() -> String {
    "fts5-bm25".into()
}
fn default_chunk_size() -> usize {
    1000
}
fn default_chunk_overlap() -> usize {
    100
}
fn default_top_k() -> usize {
    5
}
fn default_data_dir() -> String {
    "./data".into()
}

/// `[logs]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogsConfig {
    /// Directory receiving one JSON file per pipeline run.
    #[serde(default = "default_logs_dir")]
    pub dir: String,
}

impl Default for LogsConfig {
    fn default() -> Self {
        Self {
            dir: default_logs_dir(),
        }
    }
}

fn default_logs_dir() -> String {
    "./logs".into()
}

// ---------------------------------------------------------------------------
// Environment overrides
// ---------------------------------------------------------------------------

impl AppConfig {
    /// Apply overrides from the process environment.
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    /// Apply overrides from an arbitrary key lookup (the environment in production).
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let text = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(v) = text("OPENAI_MODEL") {
            self.llm.model = v;
        }
        if let Some(v) = text("COPILOT_API_BASE") {
            self.llm.base_url = v;
        }
        if let Some(v) = text("COPILOT_INDEX_PATH") {
            self.retrieval.index_path = v;
        }
        if let Some(v) = text("COPILOT_COLLECTION") {
            self.retrieval.collection = v;
        }
        if let Some(v) = text("COPILOT_EMBEDDING_MODEL") {
            self.retrieval.embedding_model = v;
        }
        if let Some(v) = text("COPILOT_CHUNK_SIZE") {
            self.retrieval.chunk_size = parse_number("COPILOT_CHUNK_SIZE", &v)?;
        }
        if let Some(v) = text("COPILOT_CHUNK_OVERLAP") {
            self.retrieval.chunk_overlap = parse_number("COPILOT_CHUNK_OVERLAP", &v)?;
        }
        if let Some(v) = text("COPILOT_TOP_K") {
            self.retrieval.top_k = parse_number("COPILOT_TOP_K", &v)?;
        }
        if let Some(v) = text("COPILOT_DATA_DIR") {
            self.retrieval.data_dir = v;
        }
        if let Some(v) = text("COPILOT_LOGS_DIR") {
            self.logs.dir = v;
        }
        Ok(())
    }

    /// Reject settings the pipeline cannot run with.
    pub fn validate(&self) -> Result<()> {
        let r = &self.retrieval;
        if r.chunk_size == 0 {
            return Err(CopilotError::config("retrieval.chunk_size must be positive"));
        }
        if r.chunk_overlap >= r.chunk_size {
            return Err(CopilotError::config(format!(
                "retrieval.chunk_overlap ({}) must be smaller than retrieval.chunk_size ({})",
                r.chunk_overlap, r.chunk_size
            )));
        }
        if r.top_k == 0 {
            return Err(CopilotError::config("retrieval.top_k must be positive"));
        }
        url::Url::parse(&self.llm.base_url).map_err(|e| {
            CopilotError::config(format!("invalid llm.base_url '{}': {e}", self.llm.base_url))
        })?;
        Ok(())
    }
}

fn parse_number(key: &str, value: &str) -> Result<usize> {
    value
        .trim()
        .parse()
        .map_err(|e| CopilotError::config(format!("{key}={value} is not a valid number: {e}")))
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.copilot/`).
pub fn config_dir() -> Result<PathBuf> {
    let home =
        dirs::home_dir().ok_or_else(|| CopilotError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.copilot/copilot.toml`).
pub fn config_file_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE_NAME))
}

/// Load the application config from disk and apply environment overrides.
/// Returns defaults (plus overrides) if the file does not exist.
pub fn load_config() -> Result<AppConfig> {
    let path = config_file_path()?;

    let mut config = if path.exists() {
        load_config_from(&path)?
    } else {
        tracing::debug!(?path, "config file not found, using defaults");
        AppConfig::default()
    };

    config.apply_env_overrides()?;
    config.validate()?;
    Ok(config)
}

/// Load the application config from a specific file path (no overrides applied).
pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| CopilotError::io(path, e))?;

    toml::from_str(&content)
        .map_err(|e| CopilotError::config(format!("failed to parse {}: {e}", path.display())))
}

/// Create the config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    let dir = config_dir()?;
    std::fs::create_dir_all(&dir).map_err(|e| CopilotError::io(&dir, e))?;

    let path = dir.join(CONFIG_FILE_NAME);
    let config = AppConfig::default();
    let content =
        toml::to_string_pretty(&config).map_err(|e| CopilotError::config(e.to_string()))?;

    std::fs::write(&path, content).map_err(|e| CopilotError::io(&path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path)
}

/// Read the API key from the configured env var, failing if unset or empty.
pub fn resolve_api_key(config: &AppConfig) -> Result<String> {
    let var_name = &config.llm.api_key_env;
    match std::env::var(var_name) {
        Ok(val) if !val.trim().is_empty() => Ok(val),
        _ => Err(CopilotError::config(format!(
            "API key not found. Set the {var_name} environment variable."
        ))),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn default_config_serializes() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).expect("serialize default config");
        assert!(toml_str.contains("index_path"));
        assert!(toml_str.contains("OPENAI_API_KEY"));
    }

    #[test]
    fn config_roundtrip() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).expect("serialize");
        let parsed: AppConfig = toml::from_str(&toml_str).expect("deserialize");
        assert_eq!(parsed.retrieval.top_k, 5);
        assert_eq!(parsed.retrieval.chunk_size, 1000);
        assert_eq!(parsed.llm.api_key_env, "OPENAI_API_KEY");
    }

    #[test]
    fn partial_file_keeps_defaults() {
        let toml_str = r#"
[llm]
model = "gpt-4o"

[retrieval]
top_k = 8
"#;
        let config: AppConfig = toml::from_str(toml_str).expect("parse");
        assert_eq!(config.llm.model, "gpt-4o");
        assert_eq!(config.llm.base_url, "https://api.openai.com/v1");
        assert_eq!(config.retrieval.top_k, 8);
        assert_eq!(config.retrieval.collection, "business_docs");
        assert_eq!(config.logs.dir, "./logs");
    }

    #[test]
    fn env_overrides_win() {
        let mut config = AppConfig::default();
        config
            .apply_overrides(lookup(&[
                ("OPENAI_MODEL", "gpt-4.1"),
                ("COPILOT_TOP_K", "12"),
                ("COPILOT_COLLECTION", "pharma"),
                ("COPILOT_LOGS_DIR", "/tmp/runs"),
                ("COPILOT_CHUNK_SIZE", "   "),
            ]))
            .expect("apply overrides");
        assert_eq!(config.llm.model, "gpt-4.1");
        assert_eq!(config.retrieval.top_k, 12);
        assert_eq!(config.retrieval.collection, "pharma");
        assert_eq!(config.logs.dir, "/tmp/runs");
        // Blank values are ignored.
        assert_eq!(config.retrieval.chunk_size, 1000);
    }

    #[test]
    fn invalid_numeric_override_is_config_error() {
        let mut config = AppConfig::default();
        let err = config
            .apply_overrides(lookup(&[("COPILOT_TOP_K", "five")]))
            .unwrap_err();
        assert!(err.to_string().contains("COPILOT_TOP_K"));
    }

    #[test]
    fn validation_rejects_bad_settings() {
        let mut config = AppConfig::default();
        assert!(config.validate().is_ok());

        config.retrieval.chunk_overlap = 1000;
        assert!(config.validate().unwrap_err().to_string().contains("chunk_overlap"));

        let mut config = AppConfig::default();
        config.retrieval.top_k = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.llm.base_url = "not a url".into();
        assert!(config.validate().unwrap_err().to_string().contains("base_url"));
    }

    #[test]
    fn missing_api_key_is_a_config_error() {
        let mut config = AppConfig::default();
        // Use a unique env var name to avoid interfering with other tests
        config.llm.api_key_env = "COPILOT_TEST_NONEXISTENT_KEY_12345".into();
        let result = resolve_api_key(&config);
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("API key not found"));
    }
}
