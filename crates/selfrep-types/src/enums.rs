//! Enumeration types shared across the selfrep workspace.

use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::error::ProtocolError;

/// Lifecycle status of a single agent in the replication chain.
///
/// Serialized in lowercase (`"running"`, `"success"`, `"failed"`) on both
/// the JSON and the protobuf encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[serde(rename_all = "lowercase")]
#[ts(export, export_to = "bindings/")]
pub enum AgentStatus {
    /// The agent is executing (the initial status of every spawned child).
    Running,
    /// The agent finished its replication step successfully.
    Success,
    /// The agent failed.
    Failed,
}

impl AgentStatus {
    /// The wire label for this status.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Success => "success",
            Self::Failed => "failed",
        }
    }
}

impl core::fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl core::str::FromStr for AgentStatus {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "running" => Ok(Self::Running),
            "success" => Ok(Self::Success),
            "failed" => Ok(Self::Failed),
            other => Err(ProtocolError::UnknownStatus(other.to_owned())),
        }
    }
}
