//! Outbound commands sent to the control plane over the event connection.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use ts_rs::TS;

use crate::envelope::message_types;

/// Per-agent execution limits attached to a `start_chain` command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct ChainConfig {
    /// Timeout for a single agent step, in seconds.
    pub timeout: u64,
    /// How many times a failed step is retried.
    pub retry_count: u32,
}

impl Default for ChainConfig {
    fn default() -> Self {
        Self {
            timeout: 300,
            retry_count: 3,
        }
    }
}

/// Payload of the `start_chain` command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct StartChain {
    /// Maximum replication depth (generations below the root).
    pub max_depth: u32,
    /// Execution limits for every agent in the chain.
    pub config: ChainConfig,
}

/// A command this layer sends to the control plane.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Start a replication chain.
    StartChain(StartChain),
    /// Stop the running chain. Carries an empty payload.
    StopChain,
}

impl Command {
    /// The envelope `type` for this command.
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::StartChain(_) => message_types::START_CHAIN,
            Self::StopChain => message_types::STOP_CHAIN,
        }
    }

    /// The JSON payload for this command.
    ///
    /// # Errors
    ///
    /// Returns a serialization error if the payload cannot be encoded.
    pub fn payload(&self) -> Result<Value, serde_json::Error> {
        match self {
            Self::StartChain(start) => serde_json::to_value(start),
            Self::StopChain => Ok(Value::Object(serde_json::Map::new())),
        }
    }
}
