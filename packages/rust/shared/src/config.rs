//! Application configuration for errscribe.
//!
//! User config lives at `~/.errscribe/errscribe.toml`.
//! CLI flags override config file values, which override defaults.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "errscribe.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".errscribe";

/// Configuration loading or validation error.
#[derive(Debug, thiserror::Error)]
#[error("config error: {message}")]
pub struct ConfigError {
    pub message: String,
}

impl ConfigError {
    /// Create a config error from any displayable message.
    pub fn new(msg: impl Into<String>) -> Self {
        Self {
            message: msg.into(),
        }
    }
}

// ---------------------------------------------------------------------------
// Config structs (matching errscribe.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Global defaults.
    #[serde(default)]
    pub defaults: DefaultsConfig,

    /// Model serving endpoint and per-stage model assignments.
    #[serde(default)]
    pub models: ModelsConfig,

    /// Pipeline execution policies.
    #[serde(default)]
    pub pipeline: PipelineConfig,
}

/// `[defaults]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DefaultsConfig {
    /// Default booklet output directory.
    #[serde(default = "default_output_dir")]
    pub output_dir: String,

    /// Default execution strategy: "sequential", "concurrent", or "parallel".
    #[serde(default = "default_strategy")]
    pub strategy: String,
}

impl Default for DefaultsConfig {
    fn default() -> Self {
        Self {
            output_dir: default_output_dir(),
            strategy: default_strategy(),
        }
    }
}

fn default_output_dir() -> String {
    "~/errscribe-booklets".into()
}
fn default_strategy() -> String {
    "sequential".into()
}

/// `[models]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelsConfig {
    /// Base URL of the local model-serving endpoint.
    #[serde(default = "default_endpoint")]
    pub endpoint: String,

    /// Per-request timeout in seconds.
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// Model for documentation lookup.
    #[serde(default = "default_documentation_model")]
    pub documentation: String,

    /// Model for contextual code analysis.
    #[serde(default = "default_context_model")]
    pub context: String,

    /// Model for pattern/style validation.
    #[serde(default = "default_pattern_model")]
    pub pattern: String,

    /// Model for narrative synthesis.
    #[serde(default = "default_synthesis_model")]
    pub synthesis: String,
}

impl Default for ModelsConfig {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            request_timeout_secs: default_request_timeout(),
            documentation: default_documentation_model(),
            context: default_context_model(),
            pattern: default_pattern_model(),
            synthesis: default_synthesis_model(),
        }
    }
}

impl ModelsConfig {
    /// All configured model names, in stage-chain order.
    pub fn all_models(&self) -> Vec<String> {
        vec![
            self.documentation.clone(),
            self.context.clone(),
            self.pattern.clone(),
            self.synthesis.clone(),
        ]
    }
}

fn default_endpoint() -> String {
    "http://localhost:11434".into()
}
fn default_request_timeout() -> u64 {
    120
}
fn default_documentation_model() -> String {
    "mistral".into()
}
fn default_context_model() -> String {
    "deepseek-coder".into()
}
fn default_pattern_model() -> String {
    "codegemma".into()
}
fn default_synthesis_model() -> String {
    "llama3".into()
}

/// `[pipeline]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Maximum concurrently in-flight stage calls (throttled strategy).
    #[serde(default = "default_max_in_flight")]
    pub max_in_flight: usize,

    /// Whether context/pattern stage failures also raise alerts.
    #[serde(default)]
    pub alert_on_analysis_stages: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_in_flight: default_max_in_flight(),
            alert_on_analysis_stages: false,
        }
    }
}

fn default_max_in_flight() -> usize {
    2
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.errscribe/`).
pub fn config_dir() -> Result<PathBuf, ConfigError> {
    let home = dirs::home_dir()
        .ok_or_else(|| ConfigError::new("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.errscribe/errscribe.toml`).
pub fn config_file_path() -> Result<PathBuf, ConfigError> {
    Ok(config_dir()?.join(CONFIG_FILE_NAME))
}

/// Load the application config from disk. Returns defaults if the file does not exist.
pub fn load_config() -> Result<AppConfig, ConfigError> {
    let path = config_file_path()?;

    if !path.exists() {
        tracing::debug!(?path, "config file not found, using defaults");
        return Ok(AppConfig::default());
    }

    load_config_from(&path)
}

/// Load the application config from a specific file path.
pub fn load_config_from(path: &Path) -> Result<AppConfig, ConfigError> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| ConfigError::new(format!("cannot read {}: {e}", path.display())))?;

    toml::from_str(&content)
        .map_err(|e| ConfigError::new(format!("failed to parse {}: {e}", path.display())))
}

/// Create the config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf, ConfigError> {
    let dir = config_dir()?;
    std::fs::create_dir_all(&dir)
        .map_err(|e| ConfigError::new(format!("cannot create {}: {e}", dir.display())))?;

    let path = dir.join(CONFIG_FILE_NAME);
    let config = AppConfig::default();
    let content =
        toml::to_string_pretty(&config).map_err(|e| ConfigError::new(e.to_string()))?;

    std::fs::write(&path, content)
        .map_err(|e| ConfigError::new(format!("cannot write {}: {e}", path.display())))?;
    tracing::info!(?path, "created default config file");

    Ok(path)
}

/// Expand a leading `~/` in a configured path against the user's home.
pub fn expand_home(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(path)
}
