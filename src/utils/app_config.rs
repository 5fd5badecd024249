/// Application configuration management
/// Stores user preferences in ~/.config/tinker-cli/config.toml

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::core::retry::RetryPolicy;

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub namespace: Option<String>,
    pub kube_config: Option<String>,
    pub version: Option<String>,
    pub kubectl: Option<String>,
    #[serde(default)]
    pub timing: Timings,
}

/// Phase delays and retry budgets, durations written as `"20s"`, `"1m"`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Timings {
    pub stop_settle: String,
    pub start_settle: String,
    pub ready_attempts: u32,
    pub ready_interval: String,
    pub restore_settle: String,
    pub exec_attempts: u32,
    pub exec_retry_delay: String,
}

impl Default for Timings {
    fn default() -> Self {
        Self {
            stop_settle: "20s".to_string(),
            start_settle: "20s".to_string(),
            ready_attempts: 5,
            ready_interval: "10s".to_string(),
            restore_settle: "1m".to_string(),
            exec_attempts: 5,
            exec_retry_delay: "1m".to_string(),
        }
    }
}

fn parse_duration(field: &str, value: &str) -> Result<Duration> {
    humantime::parse_duration(value.trim())
        .with_context(|| format!("Invalid duration for timing.{}: {:?}", field, value))
}

impl Timings {
    /// Wait after killing the servers, before touching data directories
    pub fn stop_settle(&self) -> Result<Duration> {
        parse_duration("stop_settle", &self.stop_settle)
    }

    /// Wait after recreating pods, before the first readiness check
    pub fn start_settle(&self) -> Result<Duration> {
        parse_duration("start_settle", &self.start_settle)
    }

    pub fn restore_settle(&self) -> Result<Duration> {
        parse_duration("restore_settle", &self.restore_settle)
    }

    pub fn readiness_policy(&self) -> Result<RetryPolicy> {
        Ok(RetryPolicy::new(
            self.ready_attempts,
            parse_duration("ready_interval", &self.ready_interval)?,
        ))
    }

    pub fn exec_policy(&self) -> Result<RetryPolicy> {
        Ok(RetryPolicy::new(
            self.exec_attempts,
            parse_duration("exec_retry_delay", &self.exec_retry_delay)?,
        ))
    }

    /// Parse every duration once so a typo fails before any cluster call
    pub fn validate(&self) -> Result<()> {
        self.stop_settle()?;
        self.start_settle()?;
        self.restore_settle()?;
        self.readiness_policy()?;
        self.exec_policy()?;
        Ok(())
    }
}

impl AppConfig {
    /// Get config file path
    pub fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .context("Could not determine config directory")?
            .join("tinker-cli");

        Ok(config_dir.join("config.toml"))
    }

    /// Load configuration from the default location
    pub fn load() -> Result<Self> {
        let path = Self::config_path()?;
        Self::load_from(&path)
    }

    /// Load configuration from `path`; a missing file yields the defaults
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;

        let config: Self = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;

        config.timing.validate()?;

        Ok(config)
    }
}
