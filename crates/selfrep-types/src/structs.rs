//! Payload structs carried inside an [`Envelope`](crate::Envelope).
//!
//! Field names match the JSON keys on the wire. The protobuf encoding in
//! [`wire`](crate::wire) uses the same names with stable tag numbers.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::enums::AgentStatus;
use crate::error::ProtocolError;
use crate::ids::{AgentId, ExperimentId};

/// Upper bound for percentage gauges.
const PERCENT_MAX: f64 = 100.0;

// ---------------------------------------------------------------------------
// Log
// ---------------------------------------------------------------------------

/// A single line of the experiment's audit log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct LogMessage {
    /// When the line was produced, as formatted by the emitter.
    pub timestamp: String,
    /// Severity label (`info`, `warning`, ...).
    pub level: String,
    /// Free-text content.
    pub content: String,
    /// Additional string metadata; keys are unique.
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

// ---------------------------------------------------------------------------
// Metrics
// ---------------------------------------------------------------------------

/// Resource usage sample for the sandbox running the experiment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct ResourceMetrics {
    /// CPU usage in percent (0-100).
    pub cpu_usage: f64,
    /// Memory usage in percent (0-100).
    pub memory_usage: f64,
    /// Number of live processes.
    pub process_count: u32,
    /// Additional named gauges.
    #[serde(default)]
    pub custom_metrics: BTreeMap<String, f64>,
}

impl ResourceMetrics {
    /// Check that both percentage gauges lie within `0..=100`.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::OutOfRange`] naming the first offending gauge.
    pub fn validate(&self) -> Result<(), ProtocolError> {
        check_percent("cpu_usage", self.cpu_usage)?;
        check_percent("memory_usage", self.memory_usage)
    }
}

fn check_percent(field: &'static str, value: f64) -> Result<(), ProtocolError> {
    if (0.0..=PERCENT_MAX).contains(&value) {
        Ok(())
    } else {
        Err(ProtocolError::OutOfRange { field, value })
    }
}

// ---------------------------------------------------------------------------
// Status
// ---------------------------------------------------------------------------

/// Coarse progress report for an experiment run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct ExperimentStatus {
    /// The experiment this report belongs to.
    pub experiment_id: ExperimentId,
    /// Status label (`running`, `completed`, ...).
    pub status: String,
    /// Label of the step currently executing.
    pub current_step: String,
    /// Errors reported so far, oldest first.
    #[serde(default)]
    pub errors: Vec<String>,
}

// ---------------------------------------------------------------------------
// Replication
// ---------------------------------------------------------------------------

/// An agent changed status, possibly spawning a child.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct ReplicationUpdate {
    /// The agent whose status changed.
    pub agent_id: AgentId,
    /// Its new status.
    pub status: AgentStatus,
    /// Identifier of the child spawned by this step, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[ts(optional)]
    pub new_agent: Option<AgentId>,
}

impl ReplicationUpdate {
    /// A status-only update with no spawned child.
    pub fn status(agent_id: impl Into<AgentId>, status: AgentStatus) -> Self {
        Self {
            agent_id: agent_id.into(),
            status,
            new_agent: None,
        }
    }

    /// An update recording that `agent_id` spawned `child`.
    pub fn spawned(
        agent_id: impl Into<AgentId>,
        status: AgentStatus,
        child: impl Into<AgentId>,
    ) -> Self {
        Self {
            agent_id: agent_id.into(),
            status,
            new_agent: Some(child.into()),
        }
    }
}
