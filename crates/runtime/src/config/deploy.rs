//! `[deploy]` configuration section

use std::path::Path;
use std::time::Duration;

use anyhow::Result;
use serde::{Deserialize, Serialize};

use super::{API_URL_ENV_VAR, Config, ConfigSection, DEFAULT_API_BASE_URL};

/// Tunables for the deployment pipeline
///
/// Every timeout is independent: HTTP connect/read, the per-subscription
/// status wait, the overall terminal wait, and the log reconnect loop.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeploySettings {
    /// Backend API base URL
    pub api_url: String,
    /// TCP connect timeout for every HTTP call
    pub connect_timeout_secs: u64,
    /// Read timeout for every HTTP call (also bounds silence on log streams)
    pub read_timeout_secs: u64,
    /// Upload attempts before a transport failure becomes fatal
    pub upload_max_attempts: u32,
    /// Initial upload retry delay, doubled after each attempt
    pub upload_backoff_ms: u64,
    /// Delay between status polls
    pub status_poll_interval_ms: u64,
    /// Wait without a terminal status before re-subscribing
    pub status_wait_timeout_secs: u64,
    /// Overall wait for a terminal status
    pub status_terminal_timeout_secs: u64,
    /// Consecutive status poll failures tolerated
    pub status_max_failures: u32,
    /// Consecutive log reconnect attempts tolerated
    pub log_max_reconnects: u32,
    /// Initial log reconnect delay, doubled after each attempt
    pub log_backoff_ms: u64,
}

impl Default for DeploySettings {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_API_BASE_URL.to_string(),
            connect_timeout_secs: 10,
            read_timeout_secs: 60,
            upload_max_attempts: 3,
            upload_backoff_ms: 500,
            status_poll_interval_ms: 2_000,
            status_wait_timeout_secs: 120,
            status_terminal_timeout_secs: 1_800,
            status_max_failures: 5,
            log_max_reconnects: 5,
            log_backoff_ms: 500,
        }
    }
}

impl ConfigSection for DeploySettings {
    fn section_name() -> &'static str {
        "deploy"
    }
}

impl DeploySettings {
    /// Load settings from `<config_dir>/config.toml`, then apply env overrides
    pub fn load(config_dir: &Path) -> Result<Self> {
        let config = Config::load_from_path(&config_dir.join(Config::CONFIG_FILE))?;
        let settings = config.get_section::<Self>()?.unwrap_or_default();
        Ok(settings.with_env_overrides(|key| std::env::var(key).ok()))
    }

    /// Apply overrides from an environment lookup
    #[must_use]
    pub fn with_env_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(url) = lookup(API_URL_ENV_VAR).filter(|u| !u.trim().is_empty()) {
            self.api_url = url;
        }
        self
    }

    /// HTTP connect timeout
    pub const fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    /// HTTP read timeout
    pub const fn read_timeout(&self) -> Duration {
        Duration::from_secs(self.read_timeout_secs)
    }

    /// Initial upload retry delay
    pub const fn upload_backoff(&self) -> Duration {
        Duration::from_millis(self.upload_backoff_ms)
    }

    /// Delay between status polls
    pub const fn status_poll_interval(&self) -> Duration {
        Duration::from_millis(self.status_poll_interval_ms)
    }

    /// Per-subscription status wait
    pub const fn status_wait_timeout(&self) -> Duration {
        Duration::from_secs(self.status_wait_timeout_secs)
    }

    /// Overall wait for a terminal status
    pub const fn status_terminal_timeout(&self) -> Duration {
        Duration::from_secs(self.status_terminal_timeout_secs)
    }

    /// Initial log reconnect delay
    pub const fn log_backoff(&self) -> Duration {
        Duration::from_millis(self.log_backoff_ms)
    }
}

/// Exponential backoff delay for the given zero-based attempt, capped at 30s
pub fn backoff_delay(initial: Duration, attempt: u32) -> Duration {
    const CAP: Duration = Duration::from_secs(30);
    initial
        .checked_mul(2u32.saturating_pow(attempt))
        .map_or(CAP, |d| d.min(CAP))
}
