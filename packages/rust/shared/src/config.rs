//! Application configuration for foodprint.
//!
//! User config lives at `~/.foodprint/foodprint.toml`.
//! CLI flags override config file values, which override defaults.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{FoodprintError, Result};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "foodprint.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".foodprint";

// ---------------------------------------------------------------------------
// Config structs (matching foodprint.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Global defaults.
    #[serde(default)]
    pub defaults: DefaultsConfig,

    /// Classification service settings.
    #[serde(default)]
    pub openai: OpenAiConfig,

    /// Static data file locations.
    #[serde(default)]
    pub files: FilesConfig,
}

/// `[defaults]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DefaultsConfig {
    /// Directory where stage files and summaries are written.
    #[serde(default = "default_output_dir")]
    pub output_dir: String,

    /// Concurrent classification calls during decomposition.
    #[serde(default = "default_decompose_concurrency")]
    pub decompose_concurrency: u32,

    /// Concurrent classification calls during category resolution.
    #[serde(default = "default_categorize_concurrency")]
    pub categorize_concurrency: u32,
}

impl Default for DefaultsConfig {
    fn default() -> Self {
        Self {
            output_dir: default_output_dir(),
            decompose_concurrency: default_decompose_concurrency(),
            categorize_concurrency: default_categorize_concurrency(),
        }
    }
}

fn default_output_dir() -> String {
    "output".into()
}
fn default_decompose_concurrency() -> u32 {
    8
}
fn default_categorize_concurrency() -> u32 {
    8
}

/// `[openai]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenAiConfig {
    /// Name of the env var holding the API key (never store the key itself).
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,

    /// API base URL (an OpenAI-compatible chat-completions endpoint).
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Model used to decompose products into ingredients.
    #[serde(default = "default_decompose_model")]
    pub decompose_model: String,

    /// Model used to resolve ingredient categories.
    #[serde(default = "default_categorize_model")]
    pub categorize_model: String,

    /// Maximum rate-limit retries before a call is abandoned.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

impl Default for OpenAiConfig {
    fn default() -> Self {
        Self {
            api_key_env: default_api_key_env(),
            base_url: default_base_url(),
            decompose_model: default_decompose_model(),
            categorize_model: default_categorize_model(),
            max_retries: default_max_retries(),
        }
    }
}

fn default_api_key_env() -> String {
    "OPENAI_API_KEY".into()
}
fn default_base_url() -> String {
    "https://api.openai.com/v1".into()
}
fn default_decompose_model() -> String {
    "gpt-4o".into()
}
fn default_categorize_model() -> String {
    "gpt-4o-mini".into()
}
fn default_max_retries() -> u32 {
    8
}

/// `[files]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilesConfig {
    /// Conversion-factor table (one row per category).
    #[serde(default = "default_factors")]
    pub factors: String,

    /// Persistent ingredient→category cache.
    #[serde(default = "default_category_cache")]
    pub category_cache: String,
}

impl Default for FilesConfig {
    fn default() -> Self {
        Self {
            factors: default_factors(),
            category_cache: default_category_cache(),
        }
    }
}

fn default_factors() -> String {
    "factors.csv".into()
}
fn default_category_cache() -> String {
    "foodcategories.json".into()
}

// ---------------------------------------------------------------------------
// Classify config (runtime, merged from config + CLI flags)
// ---------------------------------------------------------------------------

/// Runtime classification configuration — merged from config file + CLI flags.
#[derive(Debug, Clone)]
pub struct ClassifyConfig {
    /// API base URL.
    pub base_url: String,
    /// Env var holding the API key.
    pub api_key_env: String,
    /// Model for product decomposition.
    pub decompose_model: String,
    /// Model for category resolution.
    pub categorize_model: String,
    /// Rate-limit retry ceiling.
    pub max_retries: u32,
    /// Bounded pool size for decomposition.
    pub decompose_concurrency: u32,
    /// Bounded pool size for category resolution.
    pub categorize_concurrency: u32,
}

impl From<&AppConfig> for ClassifyConfig {
    fn from(config: &AppConfig) -> Self {
        Self {
            base_url: config.openai.base_url.clone(),
            api_key_env: config.openai.api_key_env.clone(),
            decompose_model: config.openai.decompose_model.clone(),
            categorize_model: config.openai.categorize_model.clone(),
            max_retries: config.openai.max_retries,
            decompose_concurrency: config.defaults.decompose_concurrency,
            categorize_concurrency: config.defaults.categorize_concurrency,
        }
    }
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.foodprint/`).
pub fn config_dir() -> Result<PathBuf> {
    let home = dirs::home_dir()
        .ok_or_else(|| FoodprintError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.foodprint/foodprint.toml`).
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
    let content = std::fs::read_to_string(path).map_err(|e| FoodprintError::io(path, e))?;

    toml::from_str(&content).map_err(|e| {
        FoodprintError::config(format!("failed to parse {}: {e}", path.display()))
    })
}

/// Create the config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    let dir = config_dir()?;
    std::fs::create_dir_all(&dir).map_err(|e| FoodprintError::io(&dir, e))?;

    let path = dir.join(CONFIG_FILE_NAME);
    let config = AppConfig::default();
    let content =
        toml::to_string_pretty(&config).map_err(|e| FoodprintError::config(e.to_string()))?;

    std::fs::write(&path, content).map_err(|e| FoodprintError::io(&path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path)
}

/// Check that the classification API key env var is set and non-empty.
pub fn validate_api_key(config: &AppConfig) -> Result<()> {
    let var_name = &config.openai.api_key_env;
    match std::env::var(var_name) {
        Ok(val) if !val.is_empty() => Ok(()),
        _ => Err(FoodprintError::config(format!(
            "classification API key not found. Set the {var_name} environment variable."
        ))),
    }
}
