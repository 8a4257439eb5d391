//! Configuration loading and typed config structures for the Leibniz service.
//!
//! The configuration lives in `leibniz-config.yaml` in the working
//! directory. Every field has a default, so the file (and any section of
//! it) is optional:
//!
//! ```yaml
//! server:
//!   host: "0.0.0.0"
//!   port: 3001
//! storage:
//!   state_file: "state/state.json"
//! calculation:
//!   iteration_interval_ms: 2000
//! ```
//!
//! Environment variables override file values after parsing: `PORT`,
//! `STATE_FILE_PATH`, and `ITERATION_INTERVAL_MS`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use tracing::warn;

/// Errors that can occur when loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read the configuration file from disk.
    #[error("failed to read config file: {source}")]
    Io {
        /// The underlying I/O error.
        #[from]
        source: std::io::Error,
    },

    /// Failed to parse YAML content.
    #[error("failed to parse config YAML: {source}")]
    Yaml {
        /// The underlying YAML parse error.
        source: serde_yml::Error,
    },

    /// A value parsed but is not usable.
    #[error("invalid config value for {field}: {reason}")]
    Invalid {
        /// Dotted path of the offending field.
        field: &'static str,
        /// Why the value was rejected.
        reason: String,
    },
}

impl From<serde_yml::Error> for ConfigError {
    fn from(source: serde_yml::Error) -> Self {
        Self::Yaml { source }
    }
}

/// Top-level service configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ServiceConfig {
    /// HTTP listener settings.
    #[serde(default)]
    pub server: HttpConfig,

    /// Snapshot record location.
    #[serde(default)]
    pub storage: StorageConfig,

    /// Periodic step settings.
    #[serde(default)]
    pub calculation: CalculationConfig,
}

impl ServiceConfig {
    /// Load configuration from a YAML file at the given path.
    ///
    /// Environment overrides are applied and the result validated.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Io`] if the file cannot be read,
    /// [`ConfigError::Yaml`] if the content is not valid YAML, or
    /// [`ConfigError::Invalid`] if a value is out of range.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::parse(&contents)
    }

    /// Parse configuration from a YAML string.
    ///
    /// Environment overrides are applied and the result validated.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Yaml`] if the string is not valid YAML, or
    /// [`ConfigError::Invalid`] if a value is out of range.
    pub fn parse(yaml: &str) -> Result<Self, ConfigError> {
        let mut config: Self = serde_yml::from_str(yaml)?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Load from `path` if it exists, otherwise start from defaults.
    ///
    /// Environment overrides apply in both cases.
    ///
    /// # Errors
    ///
    /// Same as [`from_file`](Self::from_file).
    pub fn load_or_default(path: &Path) -> Result<Self, ConfigError> {
        if path.exists() {
            return Self::from_file(path);
        }
        let mut config = Self::default();
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Override file values with environment variables when set.
    ///
    /// - `PORT` overrides `server.port`
    /// - `STATE_FILE_PATH` overrides `storage.state_file`
    /// - `ITERATION_INTERVAL_MS` overrides `calculation.iteration_interval_ms`
    ///
    /// Numeric variables that do not parse are ignored with a warning.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides_from(|name| std::env::var(name).ok());
    }

    /// Apply overrides from any variable source.
    fn apply_overrides_from(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(port) = override_number::<u16>("PORT", lookup("PORT").as_deref()) {
            self.server.port = port;
        }
        if let Some(val) = lookup("STATE_FILE_PATH") {
            self.storage.state_file = PathBuf::from(val);
        }
        let interval = lookup("ITERATION_INTERVAL_MS");
        if let Some(ms) = override_number::<u64>("ITERATION_INTERVAL_MS", interval.as_deref()) {
            self.calculation.iteration_interval_ms = ms;
        }
    }

    /// Reject values the service cannot run with.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] for a zero port or zero interval,
    /// or an empty state file path.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server.port == 0 {
            return Err(ConfigError::Invalid {
                field: "server.port",
                reason: String::from("must be non-zero"),
            });
        }
        if self.storage.state_file.as_os_str().is_empty() {
            return Err(ConfigError::Invalid {
                field: "storage.state_file",
                reason: String::from("must not be empty"),
            });
        }
        if self.calculation.iteration_interval_ms == 0 {
            return Err(ConfigError::Invalid {
                field: "calculation.iteration_interval_ms",
                reason: String::from("must be at least 1"),
            });
        }
        Ok(())
    }
}

fn override_number<T: std::str::FromStr>(name: &str, raw: Option<&str>) -> Option<T> {
    let raw = raw?;
    raw.trim().parse().map_or_else(
        |_| {
            warn!(variable = name, value = %raw, "ignoring unparsable environment override");
            None
        },
        Some,
    )
}

/// HTTP listener configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct HttpConfig {
    /// Address to bind (e.g. `0.0.0.0`).
    #[serde(default = "default_host")]
    pub host: String,

    /// TCP port to listen on.
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

/// Snapshot storage configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct StorageConfig {
    /// Path of the JSON snapshot record.
    #[serde(default = "default_state_file")]
    pub state_file: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            state_file: default_state_file(),
        }
    }
}

/// Periodic step configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CalculationConfig {
    /// Milliseconds between advancement steps.
    #[serde(default = "default_iteration_interval_ms")]
    pub iteration_interval_ms: u64,
}

impl CalculationConfig {
    /// The step interval as a [`Duration`].
    pub const fn interval(&self) -> Duration {
        Duration::from_millis(self.iteration_interval_ms)
    }
}

impl Default for CalculationConfig {
    fn default() -> Self {
        Self {
            iteration_interval_ms: default_iteration_interval_ms(),
        }
    }
}

fn default_host() -> String {
    String::from("0.0.0.0")
}

const fn default_port() -> u16 {
    3001
}

fn default_state_file() -> PathBuf {
    PathBuf::from("state").join("state.json")
}

const fn default_iteration_interval_ms() -> u64 {
    2000
}
