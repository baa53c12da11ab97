//! Configuration loading and management
//!
//! Configuration is loaded from `~/.config/tweetloom/config.toml`
//!
//! This module follows the XDG Base Directory Specification:
//! - Config: `$XDG_CONFIG_HOME/tweetloom/` (~/.config/tweetloom/)
//! - Data: `$XDG_DATA_HOME/tweetloom/` (~/.local/share/tweetloom/)
//! - State/Logs: `$XDG_STATE_HOME/tweetloom/` (~/.local/state/tweetloom/)

use crate::error::{Error, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Returns a best-effort home directory path.
fn home_dir() -> PathBuf {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Returns XDG_CONFIG_HOME or ~/.config
fn xdg_config_home() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".config"))
}

/// Returns XDG_DATA_HOME or ~/.local/share
fn xdg_data_home() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".local/share"))
}

/// Returns XDG_STATE_HOME or ~/.local/state
fn xdg_state_home() -> PathBuf {
    std::env::var("XDG_STATE_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".local/state"))
}

/// Main configuration struct
#[derive(Debug, Deserialize, Default, Clone)]
pub struct Config {
    /// Chat-completion endpoint settings
    #[serde(default)]
    pub llm: LlmConfig,

    /// Calendar storage and generation settings
    #[serde(default)]
    pub calendar: CalendarConfig,

    /// Backoff for outbound LLM calls
    #[serde(default)]
    pub retry: RetryConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// OpenAI-compatible chat-completion endpoint
#[derive(Debug, Deserialize, Clone)]
pub struct LlmConfig {
    /// Base URL; `/chat/completions` is appended
    #[serde(default = "default_api_base")]
    pub api_base: String,
    /// Model name sent with each request
    #[serde(default = "default_model")]
    pub model: String,
    /// API key (falls back to `TWEETLOOM_API_KEY`, then `OPENAI_API_KEY`)
    pub api_key: Option<String>,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    /// Request timeout in seconds
    #[serde(default = "default_llm_timeout")]
    pub timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            api_base: default_api_base(),
            model: default_model(),
            api_key: None,
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            timeout_secs: default_llm_timeout(),
        }
    }
}

impl LlmConfig {
    /// Configured key, or the first non-empty provider env var.
    pub fn resolved_api_key(&self) -> Option<String> {
        self.api_key
            .clone()
            .filter(|k| !k.trim().is_empty())
            .or_else(|| std::env::var("TWEETLOOM_API_KEY").ok())
            .or_else(|| std::env::var("OPENAI_API_KEY").ok())
            .filter(|k| !k.trim().is_empty())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs.max(1))
    }
}

fn default_api_base() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_model() -> String {
    "gpt-4".to_string()
}

fn default_temperature() -> f32 {
    0.7
}

fn default_max_tokens() -> u32 {
    10_000
}

fn default_llm_timeout() -> u64 {
    180
}

/// Calendar storage and generation
#[derive(Debug, Deserialize, Clone)]
pub struct CalendarConfig {
    /// Override for the calendar directory (default: `$XDG_DATA_HOME/tweetloom/calendars`)
    pub dir: Option<PathBuf>,

    /// Days planned per generation request
    #[serde(default = "default_days_to_generate")]
    pub days_to_generate: u32,

    /// Holiday country used when a persona's code is unknown
    #[serde(default = "default_fallback_country")]
    pub fallback_country: String,

    /// Lock timeout for reads in milliseconds
    #[serde(default = "default_load_timeout")]
    pub load_timeout_ms: u64,

    /// Lock timeout for writes in milliseconds
    #[serde(default = "default_save_timeout")]
    pub save_timeout_ms: u64,

    /// Lock poll interval in milliseconds
    #[serde(default = "default_lock_poll")]
    pub lock_poll_ms: u64,
}

impl Default for CalendarConfig {
    fn default() -> Self {
        Self {
            dir: None,
            days_to_generate: default_days_to_generate(),
            fallback_country: default_fallback_country(),
            load_timeout_ms: default_load_timeout(),
            save_timeout_ms: default_save_timeout(),
            lock_poll_ms: default_lock_poll(),
        }
    }
}

impl CalendarConfig {
    /// Effective calendar directory
    pub fn resolved_dir(&self) -> PathBuf {
        self.dir.clone().unwrap_or_else(Config::calendar_dir)
    }
}

fn default_days_to_generate() -> u32 {
    15
}

fn default_fallback_country() -> String {
    "US".to_string()
}

fn default_load_timeout() -> u64 {
    5_000
}

fn default_save_timeout() -> u64 {
    10_000
}

fn default_lock_poll() -> u64 {
    50
}

/// Retry/backoff for transient LLM failures
#[derive(Debug, Deserialize, Clone)]
pub struct RetryConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_initial_delay")]
    pub initial_delay_ms: u64,
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,
    #[serde(default = "default_max_delay")]
    pub max_delay_ms: u64,
    #[serde(default = "default_jitter")]
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay_ms: default_initial_delay(),
            backoff_multiplier: default_backoff_multiplier(),
            max_delay_ms: default_max_delay(),
            jitter: default_jitter(),
        }
    }
}

fn default_max_attempts() -> u32 {
    3
}

fn default_initial_delay() -> u64 {
    1_000
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

fn default_max_delay() -> u64 {
    60_000
}

fn default_jitter() -> bool {
    true
}

/// Logging configuration
#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Maximum number of log files to keep
    #[serde(default = "default_max_log_files")]
    pub max_files: usize,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            max_files: default_max_log_files(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_max_log_files() -> usize {
    5
}

impl Config {
    /// Load configuration from the default path
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path();

        if !config_path.exists() {
            tracing::info!("No config file found at {:?}, using defaults", config_path);
            return Ok(Config::default());
        }

        Self::load_from(&config_path)
    }

    /// Load configuration from a specific path
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("failed to read config file {:?}: {}", path, e)))?;

        let config: Config = toml::from_str(&content)
            .map_err(|e| Error::Config(format!("failed to parse config: {}", e)))?;

        config.validate()?;
        Ok(config)
    }

    /// Reject values outside their usable ranges
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=2.0).contains(&self.llm.temperature) {
            return Err(Error::Config(
                "llm.temperature must be between 0.0 and 2.0".to_string(),
            ));
        }
        if self.llm.max_tokens == 0 {
            return Err(Error::Config(
                "llm.max_tokens must be greater than 0".to_string(),
            ));
        }
        if !(1..=31).contains(&self.calendar.days_to_generate) {
            return Err(Error::Config(
                "calendar.days_to_generate must be between 1 and 31".to_string(),
            ));
        }
        if self.calendar.lock_poll_ms == 0 {
            return Err(Error::Config(
                "calendar.lock_poll_ms must be greater than 0".to_string(),
            ));
        }
        if self.retry.max_attempts == 0 {
            return Err(Error::Config(
                "retry.max_attempts must be at least 1".to_string(),
            ));
        }
        if self.retry.backoff_multiplier < 1.0 {
            return Err(Error::Config(
                "retry.backoff_multiplier must be at least 1.0".to_string(),
            ));
        }
        Ok(())
    }

    /// Returns the default config file path
    ///
    /// `$XDG_CONFIG_HOME/tweetloom/config.toml` (~/.config/tweetloom/config.toml)
    pub fn config_path() -> PathBuf {
        xdg_config_home().join("tweetloom").join("config.toml")
    }

    /// Returns the data directory path
    ///
    /// `$XDG_DATA_HOME/tweetloom/` (~/.local/share/tweetloom/)
    pub fn data_dir() -> PathBuf {
        xdg_data_home().join("tweetloom")
    }

    /// Returns the state directory path (for logs)
    ///
    /// `$XDG_STATE_HOME/tweetloom/` (~/.local/state/tweetloom/)
    pub fn state_dir() -> PathBuf {
        xdg_state_home().join("tweetloom")
    }

    /// Returns the default calendar directory
    ///
    /// `$XDG_DATA_HOME/tweetloom/calendars/`
    pub fn calendar_dir() -> PathBuf {
        Self::data_dir().join("calendars")
    }

    /// Returns the directory holding rotated log files
    ///
    /// `$XDG_STATE_HOME/tweetloom/logs/` (~/.local/state/tweetloom/logs/)
    pub fn log_dir() -> PathBuf {
        Self::state_dir().join("logs")
    }
}
