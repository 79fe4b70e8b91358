//! Configuration management with file persistence

use crate::locking::backoff::{
    BackoffPolicy, DEFAULT_CONTENTION_MULTIPLIER, DEFAULT_INITIAL_TIMEOUT,
    DEFAULT_MAX_LEVEL_RETRIES, DEFAULT_MAX_TIMEOUT, DEFAULT_TIMEOUT_STEP,
};
use crate::locking::types::{
    DEFAULT_CANCEL_POLL_INTERVAL, DEFAULT_FAIRNESS_POLL_INTERVAL, DEFAULT_THREAD_NAME_PREFIX,
    LockConfig,
};
use anyhow::{Context, anyhow};
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

/// Environment variable overriding the config directory
pub const CONFIG_DIR_ENV: &str = "CHAINLOCK_CONFIG_DIR";

/// Every key understood by [`Config::get`] and [`Config::set`]
pub const CONFIG_KEYS: [&str; 8] = [
    "backoff.initial_timeout_ms",
    "backoff.timeout_step_ms",
    "backoff.max_timeout_ms",
    "backoff.contention_multiplier",
    "backoff.max_level_retries",
    "fairness.poll_interval_ms",
    "dispatch.thread_name_prefix",
    "dispatch.cancel_poll_ms",
];

/// Chainlock configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub backoff: BackoffConfig,
    pub fairness: FairnessConfig,
    pub dispatch: DispatchConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackoffConfig {
    pub initial_timeout_ms: u64,
    pub timeout_step_ms: u64,
    pub max_timeout_ms: u64,
    pub contention_multiplier: u32,
    pub max_level_retries: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FairnessConfig {
    pub poll_interval_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    pub thread_name_prefix: String,
    pub cancel_poll_ms: u64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial_timeout_ms: DEFAULT_INITIAL_TIMEOUT.as_millis() as u64,
            timeout_step_ms: DEFAULT_TIMEOUT_STEP.as_millis() as u64,
            max_timeout_ms: DEFAULT_MAX_TIMEOUT.as_millis() as u64,
            contention_multiplier: DEFAULT_CONTENTION_MULTIPLIER,
            max_level_retries: DEFAULT_MAX_LEVEL_RETRIES,
        }
    }
}

impl Default for FairnessConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: DEFAULT_FAIRNESS_POLL_INTERVAL.as_millis() as u64,
        }
    }
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            thread_name_prefix: DEFAULT_THREAD_NAME_PREFIX.to_string(),
            cancel_poll_ms: DEFAULT_CANCEL_POLL_INTERVAL.as_millis() as u64,
        }
    }
}

impl BackoffConfig {
    pub fn policy(&self) -> BackoffPolicy {
        BackoffPolicy {
            initial_timeout: Duration::from_millis(self.initial_timeout_ms),
            timeout_step: Duration::from_millis(self.timeout_step_ms),
            max_timeout: Duration::from_millis(self.max_timeout_ms),
            contention_multiplier: self.contention_multiplier,
            max_level_retries: self.max_level_retries,
        }
    }
}

impl Config {
    /// Get the config directory path
    pub fn config_dir() -> anyhow::Result<PathBuf> {
        let dir = if let Ok(custom_dir) = env::var(CONFIG_DIR_ENV) {
            PathBuf::from(custom_dir)
        } else {
            dirs::config_dir()
                .ok_or_else(|| anyhow!("Could not determine config directory"))?
                .join("chainlock")
        };
        Ok(dir)
    }

    /// Get the config file path
    pub fn config_path() -> anyhow::Result<PathBuf> {
        Ok(Self::config_dir()?.join("config.toml"))
    }

    /// Load configuration from the default location, or defaults if absent
    pub fn load() -> anyhow::Result<Self> {
        Self::load_from(&Self::config_path()?)
    }

    /// Load configuration from `path`, or defaults if it doesn't exist
    pub fn load_from(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            return Ok(Config::default());
        }
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let config: Config = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to the default location
    pub fn save(&self) -> anyhow::Result<()> {
        self.save_to(&Self::config_path()?)
    }

    /// Save configuration to `path`, creating parent directories
    pub fn save_to(&self, path: &Path) -> anyhow::Result<()> {
        self.validate()?;

        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create config directory: {}", dir.display()))?;
        }
        let contents = toml::to_string_pretty(self).context("Failed to serialize config")?;
        fs::write(path, contents)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;
        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        let backoff = &self.backoff;
        if backoff.initial_timeout_ms == 0 {
            return Err(anyhow!("backoff.initial_timeout_ms must be positive"));
        }
        if backoff.max_timeout_ms < backoff.initial_timeout_ms {
            return Err(anyhow!(
                "backoff.max_timeout_ms ({}) must not be below backoff.initial_timeout_ms ({})",
                backoff.max_timeout_ms,
                backoff.initial_timeout_ms
            ));
        }
        if backoff.contention_multiplier == 0 {
            return Err(anyhow!("backoff.contention_multiplier must be at least 1"));
        }
        if self.fairness.poll_interval_ms == 0 {
            return Err(anyhow!("fairness.poll_interval_ms must be positive"));
        }
        if self.dispatch.cancel_poll_ms == 0 {
            return Err(anyhow!("dispatch.cancel_poll_ms must be positive"));
        }
        if self.dispatch.thread_name_prefix.trim().is_empty() {
            return Err(anyhow!("dispatch.thread_name_prefix must not be empty"));
        }
        Ok(())
    }

    /// Runtime settings for a [`crate::locking::LockCoordinator`]
    pub fn lock_config(&self) -> LockConfig {
        LockConfig::default()
            .with_backoff(self.backoff.policy())
            .with_fairness_poll_interval(Duration::from_millis(self.fairness.poll_interval_ms))
            .with_cancel_poll_interval(Duration::from_millis(self.dispatch.cancel_poll_ms))
            .with_thread_name_prefix(self.dispatch.thread_name_prefix.clone())
    }

    /// Get a configuration value by key
    pub fn get(&self, key: &str) -> anyhow::Result<String> {
        match key {
            "backoff.initial_timeout_ms" => Ok(self.backoff.initial_timeout_ms.to_string()),
            "backoff.timeout_step_ms" => Ok(self.backoff.timeout_step_ms.to_string()),
            "backoff.max_timeout_ms" => Ok(self.backoff.max_timeout_ms.to_string()),
            "backoff.contention_multiplier" => Ok(self.backoff.contention_multiplier.to_string()),
            "backoff.max_level_retries" => Ok(self.backoff.max_level_retries.to_string()),
            "fairness.poll_interval_ms" => Ok(self.fairness.poll_interval_ms.to_string()),
            "dispatch.thread_name_prefix" => Ok(self.dispatch.thread_name_prefix.clone()),
            "dispatch.cancel_poll_ms" => Ok(self.dispatch.cancel_poll_ms.to_string()),
            _ => Err(unknown_key(key)),
        }
    }

    /// Set a configuration value by key
    ///
    /// The whole configuration is re-validated; an invalid value leaves it
    /// unchanged.
    pub fn set(&mut self, key: &str, value: &str) -> anyhow::Result<()> {
        let mut next = self.clone();
        match key {
            "backoff.initial_timeout_ms" => next.backoff.initial_timeout_ms = parse(key, value)?,
            "backoff.timeout_step_ms" => next.backoff.timeout_step_ms = parse(key, value)?,
            "backoff.max_timeout_ms" => next.backoff.max_timeout_ms = parse(key, value)?,
            "backoff.contention_multiplier" => {
                next.backoff.contention_multiplier = parse(key, value)?
            }
            "backoff.max_level_retries" => next.backoff.max_level_retries = parse(key, value)?,
            "fairness.poll_interval_ms" => next.fairness.poll_interval_ms = parse(key, value)?,
            "dispatch.thread_name_prefix" => {
                next.dispatch.thread_name_prefix = value.trim().to_string()
            }
            "dispatch.cancel_poll_ms" => next.dispatch.cancel_poll_ms = parse(key, value)?,
            _ => return Err(unknown_key(key)),
        }
        next.validate()?;
        *self = next;
        Ok(())
    }

    /// List all configuration keys and their values
    pub fn list(&self) -> anyhow::Result<Vec<(String, String)>> {
        CONFIG_KEYS
            .iter()
            .map(|key| Ok((key.to_string(), self.get(key)?)))
            .collect()
    }

    /// Reset configuration to defaults by removing the config file
    pub fn reset() -> anyhow::Result<()> {
        Self::reset_at(&Self::config_path()?)
    }

    /// Remove the config file at `path` if present
    pub fn reset_at(path: &Path) -> anyhow::Result<()> {
        if path.exists() {
            fs::remove_file(path)
                .with_context(|| format!("Failed to remove config file: {}", path.display()))?;
        }
        Ok(())
    }
}

fn parse<T>(key: &str, value: &str) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    value
        .trim()
        .parse()
        .with_context(|| format!("Invalid value for {}: {}", key, value))
}

fn unknown_key(key: &str) -> anyhow::Error {
    anyhow!(
        "Unknown configuration key: {}. Use `chainlock config list` to see available keys.",
        key
    )
}
