//! Configuration for tunevault.
//!
//! Configuration sources (highest priority first):
//! 1. Environment variables (TUNEVAULT_HOME, TUNEVAULT_BOT_TOKEN, TUNEVAULT_CHAT_ID)
//! 2. Config file (.tunevault/config.yaml)
//! 3. Defaults (~/.tunevault)
//!
//! Config file discovery:
//! - Searches current directory and parents for .tunevault/config.yaml
//! - `home` is relative to the .tunevault/ directory; other paths are
//!   relative to home

use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::adapters::TelegramConfig;
use crate::core::{IngestLimits, PoolSettings};

/// Global cached configuration (stores Result to handle init errors)
static CONFIG: OnceLock<Result<ResolvedConfig, String>> = OnceLock::new();

const CONFIG_DIR: &str = ".tunevault";

/// Raw config file schema (matches YAML structure)
#[derive(Debug, Clone, Deserialize)]
pub struct ConfigFile {
    pub version: String,
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub tools: ToolsConfig,
    #[serde(default)]
    pub limits: LimitsConfig,
    #[serde(default)]
    pub pool: Option<PoolSettings>,
    #[serde(default)]
    pub telegram: Option<TelegramFileConfig>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PathsConfig {
    /// State directory (relative to .tunevault/)
    pub home: Option<String>,
    /// Scratch root for per-job directories (relative to home)
    pub scratch: Option<String>,
    /// SQLite catalog file (relative to home)
    pub database: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ToolsConfig {
    pub ytdlp: Option<String>,
    pub ffprobe: Option<String>,
    pub cookies_file: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct LimitsConfig {
    pub max_file_size_mb: Option<u64>,
    pub max_duration_seconds: Option<u32>,
    pub extract_timeout_seconds: Option<u64>,
    pub probe_timeout_seconds: Option<u64>,
    pub upload_timeout_seconds: Option<u64>,
    pub persist_timeout_seconds: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TelegramFileConfig {
    pub bot_token: Option<String>,
    pub chat_id: Option<String>,
}

/// External tool locations
#[derive(Debug, Clone)]
pub struct ToolSettings {
    pub ytdlp: String,
    pub ffprobe: String,
    pub cookies_file: Option<PathBuf>,
}

impl Default for ToolSettings {
    fn default() -> Self {
        Self {
            ytdlp: "yt-dlp".to_string(),
            ffprobe: "ffprobe".to_string(),
            cookies_file: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct LimitSettings {
    pub max_file_size_bytes: u64,
    pub max_duration_seconds: Option<u32>,
    pub extract_timeout_seconds: u64,
    pub probe_timeout_seconds: u64,
    pub upload_timeout_seconds: u64,
    pub persist_timeout_seconds: u64,
}

impl Default for LimitSettings {
    fn default() -> Self {
        Self {
            max_file_size_bytes: 50 * 1024 * 1024, // 50MB
            max_duration_seconds: None,
            extract_timeout_seconds: 600,
            probe_timeout_seconds: 30,
            upload_timeout_seconds: 300,
            persist_timeout_seconds: 30,
        }
    }
}

/// Resolved configuration with absolute paths
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    /// Absolute path to tunevault home (state)
    pub home: PathBuf,
    /// Root for per-job scratch directories
    pub scratch_dir: PathBuf,
    /// SQLite catalog file
    pub database: PathBuf,
    /// Path to config file (if found)
    pub config_file: Option<PathBuf>,
    pub tools: ToolSettings,
    pub limits: LimitSettings,
    pub pool: PoolSettings,
    /// Blob host credentials; absent until both token and chat are set
    pub telegram: Option<TelegramConfig>,
}

impl ResolvedConfig {
    /// Pipeline limits; uploads go to the configured storage chat
    pub fn limits(&self) -> IngestLimits {
        let destination = self
            .telegram
            .as_ref()
            .map(|t| t.chat_id.clone())
            .unwrap_or_default();

        IngestLimits {
            max_bytes: self.limits.max_file_size_bytes,
            scratch_dir: self.scratch_dir.clone(),
            destination,
            extract_timeout: Duration::from_secs(self.limits.extract_timeout_seconds),
            upload_timeout: Duration::from_secs(self.limits.upload_timeout_seconds),
            persist_timeout: Duration::from_secs(self.limits.persist_timeout_seconds),
        }
    }

    pub fn pool_settings(&self) -> PoolSettings {
        self.pool
    }

    /// Telegram settings, or an error naming what is missing
    pub fn telegram(&self) -> Result<&TelegramConfig> {
        self.telegram.as_ref().context(
            "Telegram is not configured (set TUNEVAULT_BOT_TOKEN and TUNEVAULT_CHAT_ID \
             or the telegram section of .tunevault/config.yaml)",
        )
    }
}

/// Find config file by searching current directory and parents
fn find_config_file() -> Option<PathBuf> {
    let mut current = std::env::current_dir().ok()?;

    loop {
        let config_path = current.join(CONFIG_DIR).join("config.yaml");
        if config_path.exists() {
            return Some(config_path);
        }

        if !current.pop() {
            break;
        }
    }

    None
}

/// Load and parse config file
fn load_config_file(path: &Path) -> Result<ConfigFile> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    serde_yaml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))
}

/// Resolve a path that may be relative to `base`
fn resolve_path(base: &Path, path_str: &str) -> PathBuf {
    let path = PathBuf::from(path_str);
    if path.is_absolute() {
        path
    } else {
        base.join(path)
            .canonicalize()
            .unwrap_or_else(|_| base.join(path_str))
    }
}

/// Load configuration from all sources
fn load_config() -> Result<ResolvedConfig> {
    let default_home = dirs::home_dir()
        .context("Failed to determine home directory")?
        .join(CONFIG_DIR);

    let config_file = find_config_file();
    let file = config_file.as_deref().map(load_config_file).transpose()?;

    Ok(resolve(
        default_home,
        config_file,
        file,
        |key| std::env::var(key).ok(),
    ))
}

/// Merge defaults, file and environment into a resolved config
fn resolve(
    default_home: PathBuf,
    config_file: Option<PathBuf>,
    file: Option<ConfigFile>,
    env: impl Fn(&str) -> Option<String>,
) -> ResolvedConfig {
    let file_dir = config_file
        .as_deref()
        .and_then(Path::parent)
        .unwrap_or(Path::new("."));

    let paths = file.as_ref().map(|f| f.paths.clone()).unwrap_or_default();
    let tools_file = file.as_ref().map(|f| f.tools.clone()).unwrap_or_default();
    let limits_file = file.as_ref().map(|f| f.limits.clone()).unwrap_or_default();
    let telegram_file = file
        .as_ref()
        .and_then(|f| f.telegram.clone())
        .unwrap_or_default();

    let home = if let Some(env_home) = env("TUNEVAULT_HOME") {
        PathBuf::from(env_home)
    } else if let Some(ref home_path) = paths.home {
        resolve_path(file_dir, home_path)
    } else {
        default_home
    };

    let scratch_dir = paths
        .scratch
        .as_deref()
        .map(|p| resolve_path(&home, p))
        .unwrap_or_else(|| home.join("tmp"));

    let database = paths
        .database
        .as_deref()
        .map(|p| resolve_path(&home, p))
        .unwrap_or_else(|| home.join("catalog.db"));

    let defaults = ToolSettings::default();
    let tools = ToolSettings {
        ytdlp: tools_file.ytdlp.unwrap_or(defaults.ytdlp),
        ffprobe: tools_file.ffprobe.unwrap_or(defaults.ffprobe),
        cookies_file: tools_file
            .cookies_file
            .as_deref()
            .map(|p| resolve_path(&home, p)),
    };

    let defaults = LimitSettings::default();
    let limits = LimitSettings {
        max_file_size_bytes: limits_file
            .max_file_size_mb
            .map(|mb| mb * 1024 * 1024)
            .unwrap_or(defaults.max_file_size_bytes),
        max_duration_seconds: limits_file.max_duration_seconds,
        extract_timeout_seconds: limits_file
            .extract_timeout_seconds
            .unwrap_or(defaults.extract_timeout_seconds),
        probe_timeout_seconds: limits_file
            .probe_timeout_seconds
            .unwrap_or(defaults.probe_timeout_seconds),
        upload_timeout_seconds: limits_file
            .upload_timeout_seconds
            .unwrap_or(defaults.upload_timeout_seconds),
        persist_timeout_seconds: limits_file
            .persist_timeout_seconds
            .unwrap_or(defaults.persist_timeout_seconds),
    };

    let pool = file.as_ref().and_then(|f| f.pool).unwrap_or_default();

    let bot_token = env("TUNEVAULT_BOT_TOKEN").or(telegram_file.bot_token);
    let chat_id = env("TUNEVAULT_CHAT_ID").or(telegram_file.chat_id);
    let telegram = match (bot_token, chat_id) {
        (Some(bot_token), Some(chat_id)) => Some(TelegramConfig { bot_token, chat_id }),
        _ => None,
    };

    ResolvedConfig {
        home,
        scratch_dir,
        database,
        config_file,
        tools,
        limits,
        pool,
        telegram,
    }
}

/// Get the global configuration (loads once, then cached)
pub fn config() -> Result<&'static ResolvedConfig> {
    let result = CONFIG.get_or_init(|| load_config().map_err(|e| format!("{:#}", e)));

    match result {
        Ok(config) => Ok(config),
        Err(e) => anyhow::bail!("{}", e),
    }
}
