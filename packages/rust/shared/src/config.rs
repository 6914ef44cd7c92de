//! Application configuration for Sourcestream.
//!
//! User config lives at `~/.sourcestream/sourcestream.toml`.
//! CLI flags override config file values, which override defaults.
//! API keys are referenced by env var *name* only; the key itself is never
//! written to disk.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Result, SourcestreamError};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "sourcestream.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".sourcestream";

// ---------------------------------------------------------------------------
// Config structs (matching sourcestream.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Pipeline limits and timeouts.
    #[serde(default)]
    pub defaults: DefaultsConfig,

    /// Text-generation API settings.
    #[serde(default)]
    pub openai: OpenAiConfig,

    /// Ranked-search API settings.
    #[serde(default)]
    pub search: SearchConfig,

    /// Traffic-metrics API settings.
    #[serde(default)]
    pub metrics: MetricsConfig,

    /// Optional egress proxy for page fetches.
    #[serde(default)]
    pub proxy: ProxyConfig,

    /// Domain blocklist adjustments.
    #[serde(default)]
    pub blocklist: BlocklistConfig,
}

/// `[defaults]` section — fan-out limits and timeouts.
///
/// The planner always asks for exactly five queries per unit; that count is
/// part of the prompt contract, not a knob.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DefaultsConfig {
    /// Candidate results kept per query (rank 1 and 2).
    #[serde(default = "default_results_per_query")]
    pub results_per_query: usize,

    /// Global ceiling on simultaneous page fetches across all units.
    #[serde(default = "default_fetch_concurrency")]
    pub fetch_concurrency: usize,

    /// Per-fetch timeout in seconds.
    #[serde(default = "default_fetch_timeout")]
    pub fetch_timeout_secs: u64,

    /// Per-search-call timeout in seconds.
    #[serde(default = "default_search_timeout")]
    pub search_timeout_secs: u64,

    /// Soft watchdog: a unit exceeding this many seconds is terminated with an
    /// error event. 0 disables the deadline.
    #[serde(default = "default_unit_deadline")]
    pub unit_deadline_secs: u64,

    /// Cap on extracted page text length in characters.
    #[serde(default = "default_max_content_chars")]
    pub max_content_chars: usize,
}

impl Default for DefaultsConfig {
    fn default() -> Self {
        Self {
            results_per_query: default_results_per_query(),
            fetch_concurrency: default_fetch_concurrency(),
            fetch_timeout_secs: default_fetch_timeout(),
            search_timeout_secs: default_search_timeout(),
            unit_deadline_secs: default_unit_deadline(),
            max_content_chars: default_max_content_chars(),
        }
    }
}

fn default_results_per_query() -> usize {
    2
}
fn default_fetch_concurrency() -> usize {
    10
}
fn default_fetch_timeout() -> u64 {
    12
}
fn default_search_timeout() -> u64 {
    15
}
fn default_unit_deadline() -> u64 {
    180
}
fn default_max_content_chars() -> usize {
    10_000
}

/// `[openai]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenAiConfig {
    /// Name of the env var holding the API key (never store the key itself).
    #[serde(default = "default_openai_key_env")]
    pub api_key_env: String,

    /// API base URL (overridable for tests and proxies).
    #[serde(default = "default_openai_base_url")]
    pub base_url: String,

    /// Model used for query planning.
    #[serde(default = "default_planner_model")]
    pub planner_model: String,

    /// Model used for note synthesis.
    #[serde(default = "default_synthesis_model")]
    pub synthesis_model: String,
}

impl Default for OpenAiConfig {
    fn default() -> Self {
        Self {
            api_key_env: default_openai_key_env(),
            base_url: default_openai_base_url(),
            planner_model: default_planner_model(),
            synthesis_model: default_synthesis_model(),
        }
    }
}

fn default_openai_key_env() -> String {
    "OPENAI_API_KEY".into()
}
fn default_openai_base_url() -> String {
    "https://api.openai.com".into()
}
fn default_planner_model() -> String {
    "gpt-4o-mini".into()
}
fn default_synthesis_model() -> String {
    "gpt-4o-mini".into()
}

/// `[search]` section (Serper-compatible ranked search API).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchConfig {
    #[serde(default = "default_search_key_env")]
    pub api_key_env: String,

    #[serde(default = "default_search_base_url")]
    pub base_url: String,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            api_key_env: default_search_key_env(),
            base_url: default_search_base_url(),
        }
    }
}

fn default_search_key_env() -> String {
    "SERPER_API_KEY".into()
}
fn default_search_base_url() -> String {
    "https://google.serper.dev".into()
}

/// `[metrics]` section (SEMrush-compatible domain-traffic API).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    #[serde(default = "default_metrics_key_env")]
    pub api_key_env: String,

    #[serde(default = "default_metrics_base_url")]
    pub base_url: String,

    /// Regional database for traffic estimates.
    #[serde(default = "default_metrics_database")]
    pub database: String,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            api_key_env: default_metrics_key_env(),
            base_url: default_metrics_base_url(),
            database: default_metrics_database(),
        }
    }
}

fn default_metrics_key_env() -> String {
    "SEMRUSH_API_KEY".into()
}
fn default_metrics_base_url() -> String {
    "https://api.semrush.com".into()
}
fn default_metrics_database() -> String {
    "us".into()
}

/// `[proxy]` section — optional egress proxy for page fetches.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProxyConfig {
    /// Proxy URL (e.g. `http://unblock.example.io:60000`). Empty = direct.
    #[serde(default)]
    pub url: String,

    /// Env var holding the proxy username.
    #[serde(default)]
    pub username_env: String,

    /// Env var holding the proxy password.
    #[serde(default)]
    pub password_env: String,
}

impl ProxyConfig {
    /// Whether a proxy is configured at all.
    pub fn is_enabled(&self) -> bool {
        !self.url.is_empty()
    }
}

/// `[blocklist]` section — adjustments to the built-in low-quality domain set.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BlocklistConfig {
    /// Domains to block in addition to the defaults.
    #[serde(default)]
    pub extra_domains: Vec<String>,

    /// Default-set domains to allow anyway.
    #[serde(default)]
    pub allow_domains: Vec<String>,
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.sourcestream/`).
pub fn config_dir() -> Result<PathBuf> {
    let home = dirs::home_dir()
        .ok_or_else(|| SourcestreamError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.sourcestream/sourcestream.toml`).
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
    let content = std::fs::read_to_string(path).map_err(|e| SourcestreamError::io(path, e))?;

    toml::from_str(&content).map_err(|e| {
        SourcestreamError::config(format!("failed to parse {}: {e}", path.display()))
    })
}

/// Create the config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    let dir = config_dir()?;
    std::fs::create_dir_all(&dir).map_err(|e| SourcestreamError::io(&dir, e))?;

    let path = dir.join(CONFIG_FILE_NAME);
    let config = AppConfig::default();
    let content =
        toml::to_string_pretty(&config).map_err(|e| SourcestreamError::config(e.to_string()))?;

    std::fs::write(&path, content).map_err(|e| SourcestreamError::io(&path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path)
}

/// Read the value of the env var an API-key setting points at.
pub fn api_key_from_env(var_name: &str) -> Option<String> {
    match std::env::var(var_name) {
        Ok(val) if !val.is_empty() => Some(val),
        _ => None,
    }
}

/// Check that the env vars required for a run are set and non-empty.
///
/// The metrics key is deliberately not required: a missing traffic key
/// degrades estimates to zero instead of failing the run.
pub fn validate_required_keys(config: &AppConfig) -> Result<()> {
    for (section, var_name) in [
        ("openai", &config.openai.api_key_env),
        ("search", &config.search.api_key_env),
    ] {
        if api_key_from_env(var_name).is_none() {
            return Err(SourcestreamError::config(format!(
                "{section} API key not found. Set the {var_name} environment variable."
            )));
        }
    }
    Ok(())
}
