//! Configuration for the observer process.
//!
//! The configuration lives in `selfrep-config.yaml` in the working
//! directory (or wherever `SELFREP_CONFIG` points). Every section is
//! optional; missing values fall back to defaults, and selected fields can
//! be overridden from the environment.

use std::path::Path;

use selfrep_client::ClientConfig;
use selfrep_types::ChainConfig;
use serde::Deserialize;
use serde_json::{Map, Value};

/// Default configuration file, relative to the working directory.
pub const DEFAULT_CONFIG_PATH: &str = "selfrep-config.yaml";

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

    /// A value is out of range or an override does not parse.
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

impl From<serde_yml::Error> for ConfigError {
    fn from(source: serde_yml::Error) -> Self {
        Self::Yaml { source }
    }
}

/// Top-level observer configuration.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ObserverConfig {
    /// Event connection settings.
    #[serde(default)]
    pub client: ClientConfig,

    /// Log output settings.
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Replication chain settings.
    #[serde(default)]
    pub chain: ChainSettings,

    /// Experiment to launch over HTTP at startup, if any.
    #[serde(default)]
    pub launch: Option<LaunchConfig>,

    /// Identifier of the root agent in the lineage tree.
    #[serde(default = "default_root_agent")]
    pub root_agent: String,
}

impl Default for ObserverConfig {
    fn default() -> Self {
        Self {
            client: ClientConfig::default(),
            logging: LoggingConfig::default(),
            chain: ChainSettings::default(),
            launch: None,
            root_agent: default_root_agent(),
        }
    }
}

impl ObserverConfig {
    /// Load from `SELFREP_CONFIG`, else from [`DEFAULT_CONFIG_PATH`] if it
    /// exists, else defaults. Environment overrides apply in every case.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if a named file cannot be read or parsed, or
    /// if the result fails validation.
    pub fn load() -> Result<Self, ConfigError> {
        match std::env::var("SELFREP_CONFIG") {
            Ok(path) => Self::from_file(Path::new(&path)),
            Err(_) => {
                let path = Path::new(DEFAULT_CONFIG_PATH);
                if path.exists() {
                    Self::from_file(path)
                } else {
                    let mut config = Self::default();
                    config.finish()?;
                    Ok(config)
                }
            }
        }
    }

    /// Load configuration from a YAML file at the given path.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Io`] if the file cannot be read,
    /// [`ConfigError::Yaml`] if it is not valid YAML, or
    /// [`ConfigError::Invalid`] if the values are unusable.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::parse(&contents)
    }

    /// Parse configuration from a YAML string.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Yaml`] if the string is not valid YAML, or
    /// [`ConfigError::Invalid`] if the values are unusable.
    pub fn parse(yaml: &str) -> Result<Self, ConfigError> {
        let mut config: Self = serde_yml::from_str(yaml)?;
        config.finish()?;
        Ok(config)
    }

    fn finish(&mut self) -> Result<(), ConfigError> {
        self.apply_env_overrides()?;
        self.client
            .validate()
            .map_err(|e| ConfigError::Invalid(e.to_string()))
    }

    /// Override fields from the environment.
    ///
    /// - `SELFREP_URL`, `SELFREP_RECONNECT_DELAY_SECS`,
    ///   `SELFREP_MAX_RECONNECT_ATTEMPTS`, `SELFREP_HISTORY_CAPACITY`
    /// - `SELFREP_LOG_LEVEL` overrides `logging.level`
    /// - `SELFREP_LOG_JSON` overrides `logging.json`
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] if a variable does not parse.
    pub fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        self.client
            .apply_env_overrides()
            .map_err(|e| ConfigError::Invalid(e.to_string()))?;
        if let Ok(val) = std::env::var("SELFREP_LOG_LEVEL") {
            self.logging.level = val;
        }
        if let Ok(val) = std::env::var("SELFREP_LOG_JSON") {
            self.logging.json = val
                .trim()
                .parse()
                .map_err(|e| ConfigError::Invalid(format!("invalid SELFREP_LOG_JSON: {e}")))?;
        }
        Ok(())
    }
}

/// Log output configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct LoggingConfig {
    /// Default filter (trace, debug, info, warn, error). `RUST_LOG` wins.
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Emit JSON lines instead of human-readable output.
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

/// Replication chain settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct ChainSettings {
    /// Send `start_chain` as soon as the connection opens.
    #[serde(default)]
    pub auto_start: bool,

    /// Maximum replication depth.
    #[serde(default = "default_max_depth")]
    pub max_depth: u32,

    /// Per-step timeout in seconds.
    #[serde(default = "default_timeout")]
    pub timeout: u64,

    /// Retries per failed step.
    #[serde(default = "default_retry_count")]
    pub retry_count: u32,
}

impl Default for ChainSettings {
    fn default() -> Self {
        Self {
            auto_start: false,
            max_depth: default_max_depth(),
            timeout: default_timeout(),
            retry_count: default_retry_count(),
        }
    }
}

impl ChainSettings {
    /// The per-agent limits sent with `start_chain`.
    pub const fn chain_config(&self) -> ChainConfig {
        ChainConfig {
            timeout: self.timeout,
            retry_count: self.retry_count,
        }
    }
}

/// Experiment launch request.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct LaunchConfig {
    /// Base URL of the control plane's HTTP API.
    pub base_url: String,

    /// Experiment type understood by the control plane.
    #[serde(default = "default_experiment_type")]
    pub experiment_type: String,

    /// Free-form experiment parameters.
    #[serde(default)]
    pub parameters: Map<String, Value>,
}

fn default_log_level() -> String {
    "info".to_owned()
}

fn default_root_agent() -> String {
    "root".to_owned()
}

fn default_experiment_type() -> String {
    "self_replication".to_owned()
}

const fn default_max_depth() -> u32 {
    3
}

const fn default_timeout() -> u64 {
    300
}

const fn default_retry_count() -> u32 {
    3
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = ObserverConfig::default();
        assert_eq!(config.client.url, "ws://localhost:8000/ws");
        assert_eq!(config.client.max_reconnect_attempts, 5);
        assert_eq!(config.logging.level, "info");
        assert!(!config.chain.auto_start);
        assert!(config.launch.is_none());
        assert_eq!(config.root_agent, "root");
        assert!(config.client.validate().is_ok());
    }

    #[test]
    fn parse_full_yaml() {
        let yaml = r#"
client:
  url: "ws://control:9000/ws"
  reconnect_delay_secs: 1
  max_reconnect_attempts: 10
  history_capacity: 50

logging:
  level: debug
  json: true

chain:
  auto_start: true
  max_depth: 5
  timeout: 60
  retry_count: 1

launch:
  base_url: "http://control:9000"
  parameters:
    population: 4
    mutation: "low"

root_agent: "genesis"
"#;
        let config = ObserverConfig::parse(yaml).unwrap();

        assert_eq!(config.client.url, "ws://control:9000/ws");
        assert_eq!(config.client.history_capacity, 50);
        assert_eq!(config.logging.level, "debug");
        assert!(config.logging.json);
        assert_eq!(
            config.chain.chain_config(),
            ChainConfig {
                timeout: 60,
                retry_count: 1
            }
        );
        assert_eq!(config.chain.max_depth, 5);
        assert_eq!(config.root_agent, "genesis");
        assert!(config.launch.is_some_and(|l| l.experiment_type == "self_replication"
            && l.parameters.get("population") == Some(&Value::from(4))));
    }

    #[test]
    fn parse_partial_yaml_uses_defaults() {
        let config = ObserverConfig::parse("chain:\n  auto_start: true\n");
        assert!(config.is_ok_and(|c| c.chain.auto_start
            && c.chain.max_depth == 3
            && c.client.reconnect_delay_secs == 3));
    }

    #[test]
    fn invalid_values_are_rejected() {
        let result = ObserverConfig::parse("client:\n  max_reconnect_attempts: 0\n");
        assert!(matches!(result, Err(ConfigError::Invalid(_))));

        let result = ObserverConfig::parse("client: [1, 2");
        assert!(matches!(result, Err(ConfigError::Yaml { .. })));
    }
}
