//! Configuration for the event client.
//!
//! Values are fixed once the connection manager is built; nothing here can
//! be changed while connected. The struct deserializes from the `client`
//! section of the observer's YAML file, and [`ClientConfig::apply_env_overrides`]
//! lets a deployment override each field from the environment.

use std::time::Duration;

use serde::Deserialize;

use crate::error::ClientError;
use crate::history::DEFAULT_HISTORY_CAPACITY;

/// Connection settings for the event stream.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ClientConfig {
    /// WebSocket address of the control plane's event endpoint.
    #[serde(default = "default_url")]
    pub url: String,

    /// Fixed delay between a lost connection and the next attempt, in seconds.
    #[serde(default = "default_reconnect_delay_secs")]
    pub reconnect_delay_secs: u64,

    /// Consecutive failed attempts after which the session is closed.
    #[serde(default = "default_max_reconnect_attempts")]
    pub max_reconnect_attempts: u32,

    /// Number of decoded envelopes kept for inspection.
    #[serde(default = "default_history_capacity")]
    pub history_capacity: usize,
}

fn default_url() -> String {
    "ws://localhost:8000/ws".to_owned()
}

const fn default_reconnect_delay_secs() -> u64 {
    3
}

const fn default_max_reconnect_attempts() -> u32 {
    5
}

const fn default_history_capacity() -> usize {
    DEFAULT_HISTORY_CAPACITY
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            url: default_url(),
            reconnect_delay_secs: default_reconnect_delay_secs(),
            max_reconnect_attempts: default_max_reconnect_attempts(),
            history_capacity: default_history_capacity(),
        }
    }
}

impl ClientConfig {
    /// Config for `url` with every other field at its default.
    pub fn for_url(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Self::default()
        }
    }

    /// The reconnect delay as a [`Duration`].
    pub const fn reconnect_delay(&self) -> Duration {
        Duration::from_secs(self.reconnect_delay_secs)
    }

    /// Reject values the connection manager cannot work with.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Config`] for an empty URL, a zero attempt
    /// limit, or a zero history capacity.
    pub fn validate(&self) -> Result<(), ClientError> {
        if self.url.trim().is_empty() {
            return Err(ClientError::Config("url must not be empty".to_owned()));
        }
        if self.max_reconnect_attempts == 0 {
            return Err(ClientError::Config(
                "max_reconnect_attempts must be at least 1".to_owned(),
            ));
        }
        if self.history_capacity == 0 {
            return Err(ClientError::Config(
                "history_capacity must be at least 1".to_owned(),
            ));
        }
        Ok(())
    }

    /// Override fields from environment variables when set.
    ///
    /// - `SELFREP_URL`
    /// - `SELFREP_RECONNECT_DELAY_SECS`
    /// - `SELFREP_MAX_RECONNECT_ATTEMPTS`
    /// - `SELFREP_HISTORY_CAPACITY`
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Config`] if a numeric variable does not parse.
    pub fn apply_env_overrides(&mut self) -> Result<(), ClientError> {
        if let Ok(val) = std::env::var("SELFREP_URL") {
            self.url = val;
        }
        if let Some(val) = parse_env("SELFREP_RECONNECT_DELAY_SECS")? {
            self.reconnect_delay_secs = val;
        }
        if let Some(val) = parse_env("SELFREP_MAX_RECONNECT_ATTEMPTS")? {
            self.max_reconnect_attempts = val;
        }
        if let Some(val) = parse_env("SELFREP_HISTORY_CAPACITY")? {
            self.history_capacity = val;
        }
        Ok(())
    }
}

/// Read and parse an optional environment variable.
fn parse_env<T>(name: &str) -> Result<Option<T>, ClientError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|e| ClientError::Config(format!("invalid {name}: {e}"))),
        Err(_) => Ok(None),
    }
}
