//! Centralized configuration for the liftoff CLI
//!
//! This module provides a single source of truth for the constants used
//! throughout the application, plus a small sectioned configuration file
//! stored at `~/.liftoff/config.toml`.
//!
//! # Environment Variables
//!
//! The following environment variables can be used to override defaults:
//! - `LIFTOFF_API_URL`: Override the backend API URL
//! - `LIFTOFF_TOKEN`: Provide an authentication token
//! - `LIFTOFF_CONFIG_DIR`: Override the configuration directory
//!
//! # Example
//!
//! ```rust,no_run
//! use liftoff_runtime::config::{Config, DeploySettings};
//!
//! let dir = Config::default_config_dir()?;
//! let config = Config::load_from_path(&dir.join(Config::CONFIG_FILE))?;
//! let settings = config.get_section::<DeploySettings>()?.unwrap_or_default();
//! # Ok::<(), anyhow::Error>(())
//! ```

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use toml::Value;

mod deploy;

pub use deploy::{DeploySettings, backoff_delay};

/// Default backend API base URL
pub const DEFAULT_API_BASE_URL: &str = "https://api.liftoff.dev";

/// Environment variable name for overriding the API URL
pub const API_URL_ENV_VAR: &str = "LIFTOFF_API_URL";

/// Environment variable name for the auth token
pub const AUTH_TOKEN_ENV_VAR: &str = "LIFTOFF_TOKEN";

/// Environment variable name for overriding the configuration directory
pub const CONFIG_DIR_ENV_VAR: &str = "LIFTOFF_CONFIG_DIR";

/// Version-control ignore file (base tier)
pub const BASE_IGNORE_FILE: &str = ".gitignore";

/// Deployment-specific ignore file (override tier)
pub const OVERRIDE_IGNORE_FILE: &str = ".liftoffignore";

/// File inside the configuration directory holding stored credentials
pub const AUTH_FILE: &str = "auth.json";

/// Trait that all configuration sections must implement
pub trait ConfigSection: Serialize + for<'de> Deserialize<'de> + Clone {
    /// Returns the name of this configuration section
    /// This will be used as the key in the top-level TOML table
    fn section_name() -> &'static str;
}

/// Main configuration manager
#[derive(Debug)]
pub struct Config {
    /// Path to the configuration file
    path: PathBuf,
    /// Raw TOML data stored as a map
    data: HashMap<String, Value>,
}

impl Config {
    /// Default configuration directory name
    pub const CONFIG_DIR: &'static str = ".liftoff";

    /// Default configuration file name
    pub const CONFIG_FILE: &'static str = "config.toml";

    /// Load configuration from a specific path
    ///
    /// A missing or empty file yields an empty configuration.
    pub fn load_from_path(path: &Path) -> Result<Self> {
        let data = if path.exists() {
            let contents = fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file at {}", path.display()))?;

            if contents.trim().is_empty() {
                HashMap::new()
            } else {
                toml::from_str(&contents)
                    .with_context(|| format!("Failed to parse config file at {}", path.display()))?
            }
        } else {
            HashMap::new()
        };

        Ok(Self {
            path: path.to_path_buf(),
            data,
        })
    }

    /// Get the configuration directory, honoring `LIFTOFF_CONFIG_DIR`
    pub fn default_config_dir() -> Result<PathBuf> {
        if let Some(dir) = std::env::var_os(CONFIG_DIR_ENV_VAR).filter(|d| !d.is_empty()) {
            return Ok(PathBuf::from(dir));
        }
        let home = dirs::home_dir().context("Could not determine home directory")?;
        Ok(home.join(Self::CONFIG_DIR))
    }

    /// Get a configuration section
    pub fn get_section<T: ConfigSection>(&self) -> Result<Option<T>> {
        let section_name = T::section_name();

        match self.data.get(section_name) {
            Some(value) => {
                let section = value
                    .clone()
                    .try_into()
                    .with_context(|| format!("Failed to deserialize {section_name} section"))?;
                Ok(Some(section))
            }
            None => Ok(None),
        }
    }

    /// Get the path to the configuration file
    pub fn path(&self) -> &Path {
        &self.path
    }
}
