//! Application configuration for Chronicler.
//!
//! User config lives at `~/.chronicler/chronicler.toml`.
//! CLI flags override config file values, which override defaults.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{ChroniclerError, Result};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "chronicler.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".chronicler";

// ---------------------------------------------------------------------------
// Config structs (matching chronicler.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Model endpoint and call policy.
    #[serde(default)]
    pub model: ModelConfig,

    /// Orchestrator budgets and policies.
    #[serde(default)]
    pub research: ResearchConfig,

    /// Chunking and classification limits.
    #[serde(default)]
    pub pipeline: PipelineConfig,

    /// HTTP fetch settings.
    #[serde(default)]
    pub fetch: FetchConfig,

    /// Candidate source URL templates, tried in order.
    #[serde(default = "default_sources")]
    pub sources: Vec<SourceTemplate>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            model: ModelConfig::default(),
            research: ResearchConfig::default(),
            pipeline: PipelineConfig::default(),
            fetch: FetchConfig::default(),
            sources: default_sources(),
        }
    }
}

/// `[model]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    /// OpenAI-compatible API base URL.
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Name of the env var holding the API key (never store the key itself).
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,

    /// Model identifier sent with every request.
    #[serde(default = "default_model")]
    pub default_model: String,

    /// Per-call deadline in seconds.
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// Attempts per call before giving up on a transient failure.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Base backoff between attempts; attempt `n` waits `n * retry_backoff_ms`.
    #[serde(default = "default_retry_backoff")]
    pub retry_backoff_ms: u64,

    /// Minimum spacing between consecutive calls. `0` disables throttling.
    #[serde(default)]
    pub min_call_interval_ms: u64,

    /// Upper bound on completion tokens per call.
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            api_key_env: default_api_key_env(),
            default_model: default_model(),
            request_timeout_secs: default_request_timeout(),
            max_attempts: default_max_attempts(),
            retry_backoff_ms: default_retry_backoff(),
            min_call_interval_ms: 0,
            max_tokens: default_max_tokens(),
        }
    }
}

fn default_base_url() -> String {
    "https://openrouter.ai/api/v1".into()
}
fn default_api_key_env() -> String {
    "OPENROUTER_API_KEY".into()
}
fn default_model() -> String {
    "moonshotai/kimi-k2.5".into()
}
fn default_request_timeout() -> u64 {
    120
}
fn default_max_attempts() -> u32 {
    3
}
fn default_retry_backoff() -> u64 {
    500
}
fn default_max_tokens() -> u32 {
    4096
}

/// `[research]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResearchConfig {
    /// Hard cap on orchestrator iterations.
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,

    /// Hard cap on fetch actions per run.
    #[serde(default = "default_max_fetches")]
    pub max_fetches: u32,

    /// Consecutive failed actions that end the run.
    #[serde(default = "default_max_consecutive_failures")]
    pub max_consecutive_failures: u32,

    /// Require fetch and reflect actions to alternate.
    #[serde(default = "default_true")]
    pub enforce_alternation: bool,

    /// Only fetch from domains named by `[[sources]]`.
    #[serde(default = "default_true")]
    pub restrict_to_catalog: bool,

    /// Entries kept verbatim in the conversation summary.
    #[serde(default = "default_max_summary_entries")]
    pub max_summary_entries: usize,
}

impl Default for ResearchConfig {
    fn default() -> Self {
        Self {
            max_iterations: default_max_iterations(),
            max_fetches: default_max_fetches(),
            max_consecutive_failures: default_max_consecutive_failures(),
            enforce_alternation: true,
            restrict_to_catalog: true,
            max_summary_entries: default_max_summary_entries(),
        }
    }
}

fn default_true() -> bool {
    true
}
fn default_max_iterations() -> u32 {
    10
}
fn default_max_fetches() -> u32 {
    5
}
fn default_max_consecutive_failures() -> u32 {
    3
}
fn default_max_summary_entries() -> usize {
    12
}

/// `[pipeline]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Tokens per classification chunk.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    /// Tokens shared between consecutive chunks.
    #[serde(default = "default_chunk_overlap")]
    pub chunk_overlap: usize,

    /// Chunks classified per source; the rest are dropped.
    #[serde(default = "default_max_chunks")]
    pub max_chunks_per_source: usize,

    /// Concurrent classification calls.
    #[serde(default = "default_classify_concurrency")]
    pub classify_concurrency: usize,

    /// Tokens per extraction chunk.
    #[serde(default = "default_extraction_chunk_size")]
    pub extraction_chunk_size: usize,

    /// Extraction chunks per source.
    #[serde(default = "default_max_extraction_chunks")]
    pub max_extraction_chunks: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            chunk_overlap: default_chunk_overlap(),
            max_chunks_per_source: default_max_chunks(),
            classify_concurrency: default_classify_concurrency(),
            extraction_chunk_size: default_extraction_chunk_size(),
            max_extraction_chunks: default_max_extraction_chunks(),
        }
    }
}

fn default_chunk_size() -> usize {
    1000
}
fn default_chunk_overlap() -> usize {
    20
}
fn default_max_chunks() -> usize {
    20
}
fn default_classify_concurrency() -> usize {
    4
}
fn default_extraction_chunk_size() -> usize {
    2000
}
fn default_max_extraction_chunks() -> usize {
    8
}

/// `[fetch]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchConfig {
    /// Per-request timeout in seconds.
    #[serde(default = "default_fetch_timeout")]
    pub timeout_secs: u64,

    /// Characters of converted text kept per page.
    #[serde(default = "default_max_content_chars")]
    pub max_content_chars: usize,

    /// Largest response body downloaded, in bytes.
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,

    /// User-Agent header sent with every request.
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_fetch_timeout(),
            max_content_chars: default_max_content_chars(),
            max_body_bytes: default_max_body_bytes(),
            user_agent: default_user_agent(),
        }
    }
}

fn default_fetch_timeout() -> u64 {
    30
}
fn default_max_content_chars() -> usize {
    200_000
}
fn default_max_body_bytes() -> usize {
    5 * 1024 * 1024
}
fn default_user_agent() -> String {
    format!("chronicler/{}", env!("CARGO_PKG_VERSION"))
}

/// `[[sources]]` entry: a biography source addressed by subject name.
///
/// Templates may use `{underscore}` (`Ada_Lovelace`), `{hyphen}`
/// (`Ada-Lovelace`) and `{query}` (URL-encoded) placeholders.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceTemplate {
    /// Human-readable name.
    pub name: String,
    /// URL template.
    pub url_template: String,
}

fn default_sources() -> Vec<SourceTemplate> {
    vec![
        SourceTemplate {
            name: "Wikipedia".into(),
            url_template: "https://en.wikipedia.org/wiki/{underscore}".into(),
        },
        SourceTemplate {
            name: "Britannica".into(),
            url_template: "https://www.britannica.com/biography/{hyphen}".into(),
        },
    ]
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.chronicler/`).
pub fn config_dir() -> Result<PathBuf> {
    let home = dirs::home_dir()
        .ok_or_else(|| ChroniclerError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.chronicler/chronicler.toml`).
pub fn config_file_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE_NAME))
}

/// Load the application config from disk. Returns defaults if the file does not exist.
pub fn load_config() -> Result<AppConfig> {
    let path = config_file_path()?;

    if !path.exists() {
        tracing::debug!(?path, "config file not found, using defaults");
        return Ok(AppConfig::default());
    }

    load_config_from(&path)
}

/// Load the application config from a specific file path.
pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| ChroniclerError::io(path, e))?;

    let config: AppConfig = toml::from_str(&content).map_err(|e| {
        ChroniclerError::config(format!("failed to parse {}: {e}", path.display()))
    })?;
    config.validate()?;
    Ok(config)
}

/// Create the config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    let dir = config_dir()?;
    std::fs::create_dir_all(&dir).map_err(|e| ChroniclerError::io(&dir, e))?;

    let path = dir.join(CONFIG_FILE_NAME);
    let config = AppConfig::default();
    let content =
        toml::to_string_pretty(&config).map_err(|e| ChroniclerError::config(e.to_string()))?;

    std::fs::write(&path, content).map_err(|e| ChroniclerError::io(&path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path)
}

/// Check that the model API key env var is set and non-empty, returning it.
pub fn validate_api_key(config: &AppConfig) -> Result<String> {
    let var_name = &config.model.api_key_env;
    match std::env::var(var_name) {
        Ok(val) if !val.is_empty() => Ok(val),
        _ => Err(ChroniclerError::config(format!(
            "model API key not found. Set the {var_name} environment variable.\n\
             Get an OpenRouter key at https://openrouter.ai/keys"
        ))),
    }
}

impl AppConfig {
    /// Reject settings the pipeline cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.research.max_iterations == 0 {
            return Err(ChroniclerError::config("research.max_iterations must be at least 1"));
        }
        if self.model.max_attempts == 0 {
            return Err(ChroniclerError::config("model.max_attempts must be at least 1"));
        }
        if self.pipeline.chunk_size == 0 || self.pipeline.extraction_chunk_size == 0 {
            return Err(ChroniclerError::config("chunk sizes must be at least 1 token"));
        }
        if self.pipeline.chunk_overlap >= self.pipeline.chunk_size {
            return Err(ChroniclerError::config(format!(
                "pipeline.chunk_overlap ({}) must be smaller than pipeline.chunk_size ({})",
                self.pipeline.chunk_overlap, self.pipeline.chunk_size
            )));
        }
        if self.sources.is_empty() {
            return Err(ChroniclerError::config("at least one [[sources]] entry is required"));
        }
        Ok(())
    }
}
