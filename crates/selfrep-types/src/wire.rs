//! Protobuf encoding of the envelope for binary transports.
//!
//! The schema, expressed in `.proto` form:
//!
//! ```text
//! message WebSocketMessage {
//!   string type = 1;
//!   oneof payload {
//!     LogMessage        log         = 2;
//!     ResourceMetrics   metrics     = 3;
//!     ExperimentStatus  status      = 4;
//!     string            error       = 5;
//!     ReplicationUpdate replication = 6;
//!   }
//! }
//! message LogMessage        { string timestamp = 1; string level = 2;
//!                             string content = 3; map<string, string> metadata = 4; }
//! message ResourceMetrics   { double cpu_usage = 1; double memory_usage = 2;
//!                             uint32 process_count = 3; map<string, double> custom_metrics = 4; }
//! message ExperimentStatus  { string experiment_id = 1; string status = 2;
//!                             string current_step = 3; repeated string errors = 4; }
//! message ReplicationUpdate { string agent_id = 1; string status = 2;
//!                             optional string new_agent = 3; }
//! ```
//!
//! Tag numbers are part of the contract. New fields take new tags; existing
//! tags are never renumbered or reused.

use std::collections::BTreeMap;

use prost::{Message, Oneof};

use crate::envelope::{Envelope, Payload, message_types};
use crate::error::ProtocolError;
use crate::ids::{AgentId, ExperimentId};
use crate::structs::{ExperimentStatus, LogMessage, ReplicationUpdate, ResourceMetrics};

#[derive(Clone, PartialEq, Message)]
struct WebSocketMessageProto {
    #[prost(string, tag = "1")]
    kind: String,
    #[prost(oneof = "PayloadProto", tags = "2, 3, 4, 5, 6")]
    payload: Option<PayloadProto>,
}

#[derive(Clone, PartialEq, Oneof)]
enum PayloadProto {
    #[prost(message, tag = "2")]
    Log(LogMessageProto),
    #[prost(message, tag = "3")]
    Metrics(ResourceMetricsProto),
    #[prost(message, tag = "4")]
    Status(ExperimentStatusProto),
    #[prost(string, tag = "5")]
    Error(String),
    #[prost(message, tag = "6")]
    Replication(ReplicationUpdateProto),
}

#[derive(Clone, PartialEq, Message)]
struct LogMessageProto {
    #[prost(string, tag = "1")]
    timestamp: String,
    #[prost(string, tag = "2")]
    level: String,
    #[prost(string, tag = "3")]
    content: String,
    #[prost(btree_map = "string, string", tag = "4")]
    metadata: BTreeMap<String, String>,
}

#[derive(Clone, PartialEq, Message)]
struct ResourceMetricsProto {
    #[prost(double, tag = "1")]
    cpu_usage: f64,
    #[prost(double, tag = "2")]
    memory_usage: f64,
    #[prost(uint32, tag = "3")]
    process_count: u32,
    #[prost(btree_map = "string, double", tag = "4")]
    custom_metrics: BTreeMap<String, f64>,
}

#[derive(Clone, PartialEq, Message)]
struct ExperimentStatusProto {
    #[prost(string, tag = "1")]
    experiment_id: String,
    #[prost(string, tag = "2")]
    status: String,
    #[prost(string, tag = "3")]
    current_step: String,
    #[prost(string, repeated, tag = "4")]
    errors: Vec<String>,
}

#[derive(Clone, PartialEq, Message)]
struct ReplicationUpdateProto {
    #[prost(string, tag = "1")]
    agent_id: String,
    #[prost(string, tag = "2")]
    status: String,
    #[prost(string, optional, tag = "3")]
    new_agent: Option<String>,
}

impl PayloadProto {
    /// The envelope type this oneof arm belongs to.
    const fn kind(&self) -> &'static str {
        match self {
            Self::Log(_) => message_types::LOG,
            Self::Metrics(_) => message_types::METRICS,
            Self::Status(_) => message_types::STATUS,
            Self::Error(_) => message_types::ERROR,
            Self::Replication(_) => message_types::REPLICATION_STATUS,
        }
    }
}

/// Decode a binary frame into an [`Envelope`].
///
/// # Errors
///
/// - [`ProtocolError::Decode`] if the bytes are not a valid message
/// - [`ProtocolError::MissingType`] if the `type` field is empty
/// - [`ProtocolError::MissingPayload`] if no oneof arm is set
/// - [`ProtocolError::MismatchedPayload`] if the arm disagrees with `type`
/// - [`ProtocolError::UnknownStatus`] / [`ProtocolError::OutOfRange`] for
///   invalid field values
pub fn decode(bytes: &[u8]) -> Result<Envelope, ProtocolError> {
    let message = WebSocketMessageProto::decode(bytes)?;
    if message.kind.is_empty() {
        return Err(ProtocolError::MissingType);
    }
    let Some(payload) = message.payload else {
        return Err(ProtocolError::MissingPayload { kind: message.kind });
    };
    if payload.kind() != message.kind {
        return Err(ProtocolError::MismatchedPayload {
            reason: format!("populated variant is {:?}", payload.kind()),
            kind: message.kind,
        });
    }

    let payload = match payload {
        PayloadProto::Log(log) => Payload::Log(LogMessage {
            timestamp: log.timestamp,
            level: log.level,
            content: log.content,
            metadata: log.metadata,
        }),
        PayloadProto::Metrics(metrics) => {
            let metrics = ResourceMetrics {
                cpu_usage: metrics.cpu_usage,
                memory_usage: metrics.memory_usage,
                process_count: metrics.process_count,
                custom_metrics: metrics.custom_metrics,
            };
            metrics.validate()?;
            Payload::Metrics(metrics)
        }
        PayloadProto::Status(status) => Payload::Status(ExperimentStatus {
            experiment_id: ExperimentId::new(status.experiment_id),
            status: status.status,
            current_step: status.current_step,
            errors: status.errors,
        }),
        PayloadProto::Error(message) => Payload::Error(message),
        PayloadProto::Replication(update) => Payload::Replication(ReplicationUpdate {
            agent_id: AgentId::new(update.agent_id),
            status: update.status.parse()?,
            new_agent: update.new_agent.map(AgentId::new),
        }),
    };
    Ok(Envelope::new(payload))
}

/// Encode an [`Envelope`] as a binary frame.
///
/// # Errors
///
/// Returns [`ProtocolError::UnsupportedBinary`] for [`Payload::Custom`],
/// which has no oneof arm.
pub fn encode(envelope: &Envelope) -> Result<Vec<u8>, ProtocolError> {
    let payload = match envelope.payload() {
        Payload::Log(log) => PayloadProto::Log(LogMessageProto {
            timestamp: log.timestamp.clone(),
            level: log.level.clone(),
            content: log.content.clone(),
            metadata: log.metadata.clone(),
        }),
        Payload::Metrics(metrics) => PayloadProto::Metrics(ResourceMetricsProto {
            cpu_usage: metrics.cpu_usage,
            memory_usage: metrics.memory_usage,
            process_count: metrics.process_count,
            custom_metrics: metrics.custom_metrics.clone(),
        }),
        Payload::Status(status) => PayloadProto::Status(ExperimentStatusProto {
            experiment_id: status.experiment_id.as_str().to_owned(),
            status: status.status.clone(),
            current_step: status.current_step.clone(),
            errors: status.errors.clone(),
        }),
        Payload::Error(message) => PayloadProto::Error(message.clone()),
        Payload::Replication(update) => PayloadProto::Replication(ReplicationUpdateProto {
            agent_id: update.agent_id.as_str().to_owned(),
            status: update.status.as_str().to_owned(),
            new_agent: update.new_agent.as_ref().map(|id| id.as_str().to_owned()),
        }),
        Payload::Custom { kind, .. } => {
            return Err(ProtocolError::UnsupportedBinary { kind: kind.clone() });
        }
    };
    let message = WebSocketMessageProto {
        kind: envelope.kind().to_owned(),
        payload: Some(payload),
    };
    Ok(message.encode_to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::enums::AgentStatus;

    #[test]
    fn binary_and_json_agree_on_fields() {
        let json = r#"{"type": "metrics", "payload": {
            "cpu_usage": 12.5, "memory_usage": 40.0, "process_count": 7,
            "custom_metrics": {"replicas": 2.0}}}"#;
        let from_json = Envelope::from_json(json).ok();
        let from_binary = from_json
            .as_ref()
            .and_then(|e| encode(e).ok())
            .and_then(|bytes| decode(&bytes).ok());
        assert!(from_json.is_some());
        assert_eq!(from_json, from_binary);
    }

    #[test]
    fn mismatched_oneof_is_rejected() {
        let message = WebSocketMessageProto {
            kind: "log".to_owned(),
            payload: Some(PayloadProto::Error("boom".to_owned())),
        };
        let result = decode(&message.encode_to_vec());
        assert!(matches!(
            result,
            Err(ProtocolError::MismatchedPayload { ref kind, .. }) if kind == "log"
        ));
    }

    #[test]
    fn missing_oneof_is_rejected() {
        let message = WebSocketMessageProto {
            kind: "status".to_owned(),
            payload: None,
        };
        assert!(matches!(
            decode(&message.encode_to_vec()),
            Err(ProtocolError::MissingPayload { .. })
        ));
    }

    #[test]
    fn unknown_replication_status_is_rejected() {
        let message = WebSocketMessageProto {
            kind: "replication_status".to_owned(),
            payload: Some(PayloadProto::Replication(ReplicationUpdateProto {
                agent_id: "root".to_owned(),
                status: "paused".to_owned(),
                new_agent: None,
            })),
        };
        assert!(matches!(
            decode(&message.encode_to_vec()),
            Err(ProtocolError::UnknownStatus(_))
        ));
    }

    #[test]
    fn replication_child_survives_binary_encoding() {
        let envelope =
            Envelope::from(ReplicationUpdate::spawned("root", AgentStatus::Running, "child1"));
        let decoded = encode(&envelope).ok().and_then(|bytes| decode(&bytes).ok());
        assert_eq!(decoded, Some(envelope));
    }

    #[test]
    fn custom_payload_has_no_binary_form() {
        let envelope = Envelope::from_parts("chain_progress", serde_json::json!({"depth": 1}));
        assert!(envelope.is_ok_and(|e| matches!(
            encode(&e),
            Err(ProtocolError::UnsupportedBinary { .. })
        )));
    }

    #[test]
    fn garbage_bytes_fail_to_decode() {
        assert!(matches!(
            decode(&[0xff, 0xff, 0xff]),
            Err(ProtocolError::Decode(_))
        ));
    }
}
