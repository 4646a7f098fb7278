//! Application configuration for sitegen.
//!
//! User config lives at `~/.sitegen/sitegen.toml`.
//! CLI flags override config file values, which override defaults.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Result, SiteGenError};
use crate::types::Palette;

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "sitegen.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".sitegen";

// ---------------------------------------------------------------------------
// Config structs (matching sitegen.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Global defaults.
    #[serde(default)]
    pub defaults: DefaultsConfig,

    /// Background worker and dispatch settings.
    #[serde(default)]
    pub worker: WorkerSettings,

    /// Fallback palette.
    #[serde(default)]
    pub palette: PaletteConfig,

    /// Preview addressing.
    #[serde(default)]
    pub preview: PreviewConfig,

    /// OpenRouter settings for content synthesis.
    #[serde(default)]
    pub openrouter: OpenRouterConfig,

    /// Upload limits.
    #[serde(default)]
    pub assets: AssetsConfig,

    /// Notification targets.
    #[serde(default)]
    pub notify: NotifyConfig,
}

impl AppConfig {
    /// Root for all on-disk state.
    pub fn data_dir(&self) -> PathBuf {
        expand_home(&self.defaults.data_dir)
    }

    /// Record store database file.
    pub fn database_path(&self) -> PathBuf {
        self.data_dir().join("indexes").join("sitegen.db")
    }

    /// Artifact store root (one directory per record).
    pub fn sites_dir(&self) -> PathBuf {
        self.data_dir().join("sites")
    }

    /// Optimized asset root.
    pub fn assets_dir(&self) -> PathBuf {
        self.data_dir().join("assets")
    }

    /// Raw uploads waiting for optimization.
    pub fn staging_dir(&self) -> PathBuf {
        self.data_dir().join("staging")
    }
}

/// `[defaults]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DefaultsConfig {
    /// Root directory for the database, sites, assets and staged uploads.
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
}

impl Default for DefaultsConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
        }
    }
}

fn default_data_dir() -> String {
    "~/sitegen-data".into()
}

/// `[worker]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerSettings {
    /// Seconds between sweep ticks.
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,

    /// A record GENERATING for longer than this is considered abandoned.
    #[serde(default = "default_liveness_window")]
    pub liveness_window_secs: u64,

    /// Delay before the inline trigger runs after intake.
    #[serde(default = "default_inline_delay")]
    pub inline_delay_ms: u64,

    /// How many due records a sweep tick inspects when looking for an unclaimed one.
    #[serde(default = "default_sweep_batch")]
    pub sweep_batch: u32,

    /// Reuse checkpointed synthesized content on replay instead of re-synthesizing.
    #[serde(default = "default_true")]
    pub resume_from_checkpoints: bool,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            sweep_interval_secs: default_sweep_interval(),
            liveness_window_secs: default_liveness_window(),
            inline_delay_ms: default_inline_delay(),
            sweep_batch: default_sweep_batch(),
            resume_from_checkpoints: true,
        }
    }
}

fn default_sweep_interval() -> u64 {
    30
}
fn default_liveness_window() -> u64 {
    900
}
fn default_inline_delay() -> u64 {
    250
}
fn default_sweep_batch() -> u32 {
    8
}
fn default_true() -> bool {
    true
}

/// `[palette]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaletteConfig {
    #[serde(default = "default_primary")]
    pub primary: String,
    #[serde(default = "default_secondary")]
    pub secondary: String,
    #[serde(default = "default_accent")]
    pub accent: String,
}

impl Default for PaletteConfig {
    fn default() -> Self {
        Self {
            primary: default_primary(),
            secondary: default_secondary(),
            accent: default_accent(),
        }
    }
}

impl PaletteConfig {
    /// The configured fallback palette, validated.
    pub fn fallback(&self) -> Result<Palette> {
        Palette::new(&self.primary, &self.secondary, &self.accent)
            .map_err(|e| SiteGenError::config(format!("[palette]: {e}")))
    }
}

fn default_primary() -> String {
    Palette::default_triple().primary
}
fn default_secondary() -> String {
    Palette::default_triple().secondary
}
fn default_accent() -> String {
    Palette::default_triple().accent
}

/// `[preview]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PreviewConfig {
    /// Base address; the record id and `index.html` are appended.
    #[serde(default = "default_preview_base")]
    pub base_url: String,
}

impl Default for PreviewConfig {
    fn default() -> Self {
        Self {
            base_url: default_preview_base(),
        }
    }
}

fn default_preview_base() -> String {
    "http://localhost:8080/preview".into()
}

/// `[openrouter]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenRouterConfig {
    /// Name of the env var holding the API key (never store the key itself).
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,

    /// Model used for content synthesis.
    #[serde(default = "default_model")]
    pub default_model: String,

    /// API base address.
    #[serde(default = "default_openrouter_base")]
    pub base_url: String,
}

impl Default for OpenRouterConfig {
    fn default() -> Self {
        Self {
            api_key_env: default_api_key_env(),
            default_model: default_model(),
            base_url: default_openrouter_base(),
        }
    }
}

fn default_api_key_env() -> String {
    "OPENROUTER_API_KEY".into()
}
fn default_model() -> String {
    "moonshotai/kimi-k2.5".into()
}
fn default_openrouter_base() -> String {
    "https://openrouter.ai/api/v1".into()
}

/// `[assets]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssetsConfig {
    /// Largest upload accepted by the optimizer.
    #[serde(default = "default_max_bytes")]
    pub max_bytes: u64,
}

impl Default for AssetsConfig {
    fn default() -> Self {
        Self {
            max_bytes: default_max_bytes(),
        }
    }
}

fn default_max_bytes() -> u64 {
    10 * 1024 * 1024
}

/// `[notify]` section.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NotifyConfig {
    /// Operator webhooks told about every generated site.
    #[serde(default)]
    pub operator_webhooks: Vec<String>,

    /// HTTP relay that turns a JSON message into an email. Email targets are
    /// only logged when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email_relay_url: Option<String>,
}

// ---------------------------------------------------------------------------
// Worker config (runtime, merged from config + CLI flags)
// ---------------------------------------------------------------------------

/// Runtime dispatch/orchestration configuration.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub sweep_interval: Duration,
    pub liveness_window: Duration,
    pub inline_delay: Duration,
    pub sweep_batch: u32,
    pub resume_from_checkpoints: bool,
    pub fallback_palette: Palette,
    pub preview_base_url: String,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self::from(&AppConfig::default())
    }
}

impl From<&AppConfig> for WorkerConfig {
    fn from(config: &AppConfig) -> Self {
        Self {
            sweep_interval: Duration::from_secs(config.worker.sweep_interval_secs.max(1)),
            liveness_window: Duration::from_secs(config.worker.liveness_window_secs.max(1)),
            inline_delay: Duration::from_millis(config.worker.inline_delay_ms),
            sweep_batch: config.worker.sweep_batch.max(1),
            resume_from_checkpoints: config.worker.resume_from_checkpoints,
            fallback_palette: config
                .palette
                .fallback()
                .unwrap_or_else(|_| Palette::default_triple()),
            preview_base_url: config.preview.base_url.trim_end_matches('/').to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.sitegen/`).
pub fn config_dir() -> Result<PathBuf> {
    let home =
        dirs::home_dir().ok_or_else(|| SiteGenError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.sitegen/sitegen.toml`).
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
    let content = std::fs::read_to_string(path).map_err(|e| SiteGenError::io(path, e))?;

    let config: AppConfig = toml::from_str(&content)
        .map_err(|e| SiteGenError::config(format!("failed to parse {}: {e}", path.display())))?;

    config.palette.fallback()?;
    Ok(config)
}

/// Create the config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    let dir = config_dir()?;
    std::fs::create_dir_all(&dir).map_err(|e| SiteGenError::io(&dir, e))?;

    let path = dir.join(CONFIG_FILE_NAME);
    let config = AppConfig::default();
    let content =
        toml::to_string_pretty(&config).map_err(|e| SiteGenError::config(e.to_string()))?;

    std::fs::write(&path, content).map_err(|e| SiteGenError::io(&path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path)
}

/// Read the OpenRouter API key from the configured env var, if set and non-empty.
pub fn resolve_api_key(config: &AppConfig) -> Option<String> {
    std::env::var(&config.openrouter.api_key_env)
        .ok()
        .filter(|key| !key.is_empty())
}

/// Expand a leading `~/` against the home directory.
fn expand_home(path: &str) -> PathBuf {
    match path.strip_prefix("~/") {
        Some(rest) => dirs::home_dir()
            .map(|home| home.join(rest))
            .unwrap_or_else(|| PathBuf::from(path)),
        None => PathBuf::from(path),
    }
}
