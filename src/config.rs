//! Host configuration using Figment
//!
//! Configuration is layered, highest precedence last:
//! 1. Built-in defaults
//! 2. A TOML file (`modhost.toml` unless another path is given)
//! 3. Environment variables prefixed with `MODHOST_`
//!
//! # Environment Variable Overrides
//!
//! Nested keys are separated by a double underscore:
//!
//! ```text
//! MODHOST_APPLICATION__LOG_LEVEL=debug
//! MODHOST_RUNTIME__TICK_INTERVAL_MS=20
//! MODHOST_OSC__ENABLED=true
//! ```
//!
//! # Example
//!
//! ```toml
//! [application]
//! log_level = "debug"
//!
//! [modules]
//! root = "/srv/modhost/modules"
//!
//! [runtime]
//! hook_timeout_ms = 0   # disable hook timeouts
//!
//! [overrides."local.counter"]
//! enabled = true
//! parameters = { Count = "avatar/parameters/Counter" }
//! ```

use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::runtime::RuntimeConfig;
use crate::store::StoredModule;

/// Default configuration file name.
pub const DEFAULT_CONFIG_FILE: &str = "modhost.toml";

/// Configuration error types
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Configuration load error: {0}")]
    LoadError(#[from] figment::Error),
    #[error("Configuration validation error: {0}")]
    ValidationError(String),
}

/// Top-level host configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct HostConfig {
    /// Application settings
    pub application: ApplicationConfig,
    /// Module discovery settings
    pub modules: ModulesConfig,
    /// Runtime timing
    pub runtime: RuntimeSection,
    /// OSC transport
    pub osc: OscConfig,
    /// Per-module overrides keyed by module id
    pub overrides: HashMap<String, ModuleOverride>,
}

/// Application-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApplicationConfig {
    /// Application name
    pub name: String,
    /// Logging level (trace, debug, info, warn, error)
    pub log_level: String,
    /// Log output format (pretty, json)
    pub log_format: String,
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            name: "modhost".to_string(),
            log_level: "info".to_string(),
            log_format: "pretty".to_string(),
        }
    }
}

/// Module discovery configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModulesConfig {
    /// Directory holding the local and remote module directories
    pub root: PathBuf,
    /// Name of the local directory under `root`
    pub local_dir: String,
    /// Name of the remote directory under `root`
    pub remote_dir: String,
    /// Directory for persisted module configuration, kept outside `root` by
    /// default so saves do not look like module changes
    pub config_dir: Option<PathBuf>,
    /// Operation budget for one script hook call
    pub script_max_operations: u64,
    /// Whether modules without stored configuration start enabled
    pub enabled_by_default: bool,
}

impl Default for ModulesConfig {
    fn default() -> Self {
        Self {
            root: default_modules_root(),
            local_dir: "local".to_string(),
            remote_dir: "remote".to_string(),
            config_dir: None,
            script_max_operations: crate::script::DEFAULT_MAX_OPERATIONS,
            enabled_by_default: false,
        }
    }
}

/// Runtime timing configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeSection {
    /// Interval between update ticks in milliseconds
    pub tick_interval_ms: u64,
    /// Limit for start/stop hooks in milliseconds (0 = no limit)
    pub hook_timeout_ms: u64,
}

impl Default for RuntimeSection {
    fn default() -> Self {
        Self {
            tick_interval_ms: 50,
            hook_timeout_ms: 10_000,
        }
    }
}

/// OSC transport configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OscConfig {
    /// Whether to open the UDP transport
    pub enabled: bool,
    /// Address to receive on
    pub listen: SocketAddr,
    /// Address to send to
    pub send: SocketAddr,
}

impl Default for OscConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            listen: SocketAddr::from(([127, 0, 0, 1], 9001)),
            send: SocketAddr::from(([127, 0, 0, 1], 9000)),
        }
    }
}

/// Configured defaults for one module
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ModuleOverride {
    /// Enabled flag
    pub enabled: Option<bool>,
    /// Wire names by logical parameter key
    pub parameters: HashMap<String, String>,
}

fn default_modules_root() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("modhost")
        .join("modules")
}

fn default_config_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("modhost")
        .join("module-config")
}

// ============================================================================
// Configuration Loading and Validation
// ============================================================================

impl HostConfig {
    /// Load configuration from `modhost.toml` and the environment
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(DEFAULT_CONFIG_FILE)
    }

    /// Load configuration from a specific file path
    ///
    /// A missing file is not an error; defaults and the environment still
    /// apply. The result is validated before it is returned.
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let config: Self = Figment::new()
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed("MODHOST_").split("__"))
            .extract()
            .map_err(ConfigError::LoadError)?;

        config.validate()?;
        Ok(config)
    }

    /// Validate configuration after loading
    ///
    /// Checks:
    /// - Log level and log format are known
    /// - Tick interval and script operation budget are non-zero
    /// - Local and remote directory names are set and distinct
    /// - Override wire names contain at most one `*`
    pub fn validate(&self) -> Result<(), ConfigError> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.application.log_level.as_str()) {
            return Err(ConfigError::ValidationError(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.application.log_level,
                valid_levels.join(", ")
            )));
        }

        let valid_formats = ["pretty", "json"];
        if !valid_formats.contains(&self.application.log_format.as_str()) {
            return Err(ConfigError::ValidationError(format!(
                "Invalid log_format '{}'. Must be one of: {}",
                self.application.log_format,
                valid_formats.join(", ")
            )));
        }

        if self.runtime.tick_interval_ms == 0 {
            return Err(ConfigError::ValidationError(
                "tick_interval_ms must be greater than 0".to_string(),
            ));
        }

        if self.modules.script_max_operations == 0 {
            return Err(ConfigError::ValidationError(
                "script_max_operations must be greater than 0".to_string(),
            ));
        }

        if self.modules.local_dir.is_empty() || self.modules.remote_dir.is_empty() {
            return Err(ConfigError::ValidationError(
                "local_dir and remote_dir must not be empty".to_string(),
            ));
        }
        if self.modules.local_dir == self.modules.remote_dir {
            return Err(ConfigError::ValidationError(format!(
                "local_dir and remote_dir are both '{}'",
                self.modules.local_dir
            )));
        }

        for (module, overrides) in &self.overrides {
            for (key, name) in &overrides.parameters {
                if name.matches('*').count() > 1 {
                    return Err(ConfigError::ValidationError(format!(
                        "Wire name '{}' for {}/{} has more than one wildcard",
                        name, module, key
                    )));
                }
            }
        }

        Ok(())
    }

    /// Interval between update ticks
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.runtime.tick_interval_ms)
    }

    /// Start/stop hook limit, `None` when disabled
    pub fn hook_timeout(&self) -> Option<Duration> {
        (self.runtime.hook_timeout_ms > 0).then(|| Duration::from_millis(self.runtime.hook_timeout_ms))
    }

    /// Runtime settings derived from this configuration
    pub fn runtime_config(&self) -> RuntimeConfig {
        RuntimeConfig {
            hook_timeout: self.hook_timeout(),
            enabled_by_default: self.modules.enabled_by_default,
        }
    }

    /// Directory for persisted module configuration
    pub fn config_dir(&self) -> PathBuf {
        self.modules
            .config_dir
            .clone()
            .unwrap_or_else(default_config_dir)
    }

    /// Overrides converted into configuration store entries
    pub fn store_seed(&self) -> HashMap<String, StoredModule> {
        self.overrides
            .iter()
            .map(|(id, o)| {
                (
                    id.to_lowercase(),
                    StoredModule {
                        enabled: o.enabled,
                        parameters: o.parameters.clone(),
                        settings: HashMap::new(),
                    },
                )
            })
            .collect()
    }
}
