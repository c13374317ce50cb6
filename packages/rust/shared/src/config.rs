//! Application configuration for docflow.
//!
//! User config lives at `~/.docflow/docflow.toml`.
//! CLI flags override config file values, which override defaults.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{DocflowError, Result};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "docflow.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".docflow";

// ---------------------------------------------------------------------------
// Provider
// ---------------------------------------------------------------------------

/// LLM providers the prompt runner can address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    OpenAi,
    Anthropic,
    Gemini,
    Groq,
    Ollama,
    OpenRouter,
    /// Local model runtime; needs no credential.
    Local,
}

impl Provider {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OpenAi => "openai",
            Self::Anthropic => "anthropic",
            Self::Gemini => "gemini",
            Self::Groq => "groq",
            Self::Ollama => "ollama",
            Self::OpenRouter => "openrouter",
            Self::Local => "local",
        }
    }

    /// Whether calls to this provider need a credential.
    pub fn requires_credential(&self) -> bool {
        !matches!(self, Self::Local)
    }

    /// OpenAI-compatible API root for this provider.
    pub fn default_base_url(&self) -> Option<&'static str> {
        match self {
            Self::OpenAi => Some("https://api.openai.com/v1"),
            Self::Anthropic => Some("https://api.anthropic.com/v1"),
            Self::Gemini => Some("https://generativelanguage.googleapis.com/v1beta/openai"),
            Self::Groq => Some("https://api.groq.com/openai/v1"),
            Self::Ollama => Some("http://localhost:11434/v1"),
            Self::OpenRouter => Some("https://openrouter.ai/api/v1"),
            Self::Local => None,
        }
    }

    pub fn all() -> &'static [Self] {
        &[
            Self::OpenAi,
            Self::Anthropic,
            Self::Gemini,
            Self::Groq,
            Self::Ollama,
            Self::OpenRouter,
            Self::Local,
        ]
    }
}

impl std::fmt::Display for Provider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Provider {
    type Err = DocflowError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Self::all()
            .iter()
            .copied()
            .find(|p| p.as_str() == s.to_lowercase())
            .ok_or_else(|| {
                let names: Vec<_> = Self::all().iter().map(|p| p.as_str()).collect();
                DocflowError::config(format!(
                    "unsupported provider `{s}` (available: {})",
                    names.join(", ")
                ))
            })
    }
}

// ---------------------------------------------------------------------------
// Config structs (matching docflow.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    /// Prompt runner settings.
    #[serde(default)]
    pub llm: LlmConfig,

    /// Code step sandbox limits.
    #[serde(default)]
    pub code: CodeConfig,

    /// Per-model prices used for step statistics.
    #[serde(default = "default_model_costs")]
    pub model_costs: Vec<ModelCost>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            llm: LlmConfig::default(),
            code: CodeConfig::default(),
            model_costs: default_model_costs(),
        }
    }
}

/// `[llm]` section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LlmConfig {
    #[serde(default = "default_provider")]
    pub provider: Provider,

    #[serde(default = "default_model")]
    pub model: String,

    /// Name of the env var holding the API key (never store the key itself).
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,

    /// Override for the provider's API root.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,

    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: default_model(),
            api_key_env: default_api_key_env(),
            base_url: None,
            request_timeout_secs: default_request_timeout(),
        }
    }
}

fn default_provider() -> Provider {
    Provider::OpenAi
}
fn default_model() -> String {
    "gpt-4o-mini".into()
}
fn default_api_key_env() -> String {
    "OPENAI_API_KEY".into()
}
fn default_request_timeout() -> u64 {
    120
}

/// `[code]` section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CodeConfig {
    /// Hard execution timeout per code step invocation.
    #[serde(default = "default_code_timeout")]
    pub timeout_ms: u64,

    /// Sandbox heap cap.
    #[serde(default = "default_memory_limit")]
    pub memory_limit_mb: usize,
}

impl Default for CodeConfig {
    fn default() -> Self {
        Self {
            timeout_ms: default_code_timeout(),
            memory_limit_mb: default_memory_limit(),
        }
    }
}

fn default_code_timeout() -> u64 {
    5_000
}
fn default_memory_limit() -> usize {
    64
}

/// `[[model_costs]]` entry, USD per million tokens.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelCost {
    pub model: String,
    pub input_per_mtok: f64,
    pub output_per_mtok: f64,
}

impl ModelCost {
    fn new(model: &str, input_per_mtok: f64, output_per_mtok: f64) -> Self {
        Self {
            model: model.into(),
            input_per_mtok,
            output_per_mtok,
        }
    }

    /// Cost in USD of one call with the given token counts.
    pub fn cost_usd(&self, prompt_tokens: u64, completion_tokens: u64) -> f64 {
        (prompt_tokens as f64 * self.input_per_mtok
            + completion_tokens as f64 * self.output_per_mtok)
            / 1_000_000.0
    }
}

fn default_model_costs() -> Vec<ModelCost> {
    vec![
        ModelCost::new("gpt-4o", 2.5, 10.0),
        ModelCost::new("gpt-4o-mini", 0.15, 0.6),
        ModelCost::new("claude-3-5-sonnet-latest", 3.0, 15.0),
        ModelCost::new("claude-3-5-haiku-latest", 0.8, 4.0),
        ModelCost::new("gemini-1.5-flash", 0.075, 0.3),
        ModelCost::new("gemini-1.5-pro", 1.25, 5.0),
    ]
}

// ---------------------------------------------------------------------------
// Provider settings (runtime, merged from config + CLI flags)
// ---------------------------------------------------------------------------

/// What the LLM step runner needs to address a provider.
///
/// Fields are optional because the editor can leave any of them unset;
/// the LLM step runner rejects incomplete settings at call time.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderSettings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<Provider>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credential: Option<String>,
    /// Handle of the local model runtime (e.g. its server address).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub runtime_handle: Option<String>,
}

impl ProviderSettings {
    /// Build settings from config, reading the credential from the environment.
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            provider: Some(config.llm.provider),
            model: Some(config.llm.model.clone()),
            credential: resolve_credential(config),
            runtime_handle: config.llm.base_url.clone(),
        }
    }
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.docflow/`).
pub fn config_dir() -> Result<PathBuf> {
    let home = dirs::home_dir()
        .ok_or_else(|| DocflowError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.docflow/docflow.toml`).
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
    let content = std::fs::read_to_string(path).map_err(|e| DocflowError::io(path, e))?;

    let config: AppConfig = toml::from_str(&content).map_err(|e| {
        DocflowError::config(format!("failed to parse {}: {e}", path.display()))
    })?;
    validate_config(&config)?;
    Ok(config)
}

/// Write a default config file into `dir`, creating it if needed.
/// Returns the path to the created file.
pub fn init_config_in(dir: &Path) -> Result<PathBuf> {
    std::fs::create_dir_all(dir).map_err(|e| DocflowError::io(dir, e))?;

    let path = dir.join(CONFIG_FILE_NAME);
    let config = AppConfig::default();
    let content =
        toml::to_string_pretty(&config).map_err(|e| DocflowError::config(e.to_string()))?;

    std::fs::write(&path, content).map_err(|e| DocflowError::io(&path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path)
}

/// Create the config directory and write a default config file.
pub fn init_config() -> Result<PathBuf> {
    init_config_in(&config_dir()?)
}

/// Check values serde cannot: limits and the base URL.
pub fn validate_config(config: &AppConfig) -> Result<()> {
    if config.code.timeout_ms == 0 {
        return Err(DocflowError::config("code.timeout_ms must be greater than zero"));
    }
    if config.code.memory_limit_mb == 0 {
        return Err(DocflowError::config(
            "code.memory_limit_mb must be greater than zero",
        ));
    }
    if let Some(base) = &config.llm.base_url {
        Url::parse(base)
            .map_err(|e| DocflowError::config(format!("llm.base_url `{base}` is invalid: {e}")))?;
    }
    Ok(())
}

/// Read the credential from the env var named in the config.
pub fn resolve_credential(config: &AppConfig) -> Option<String> {
    std::env::var(&config.llm.api_key_env)
        .ok()
        .filter(|v| !v.is_empty())
}
