//! The typed envelope that carries every message on the wire.
//!
//! A JSON text frame has the shape `{"type": <string>, "payload": <object>}`.
//! The control plane's protobuf-JSON broadcast shape, where the payload sits
//! under a key named after the variant (`{"type": "log", "log": {...}}`), is
//! accepted as well. Binary frames use the protobuf schema in
//! [`wire`](crate::wire).
//!
//! The envelope type is derived from the populated payload variant, so an
//! [`Envelope`] value can never disagree with its own `type`.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ProtocolError;
use crate::structs::{ExperimentStatus, LogMessage, ReplicationUpdate, ResourceMetrics};
use crate::wire;

/// Well-known envelope `type` discriminators.
pub mod message_types {
    /// Audit log line ([`LogMessage`](crate::LogMessage)).
    pub const LOG: &str = "log";
    /// Resource gauge sample ([`ResourceMetrics`](crate::ResourceMetrics)).
    pub const METRICS: &str = "metrics";
    /// Experiment progress ([`ExperimentStatus`](crate::ExperimentStatus)).
    pub const STATUS: &str = "status";
    /// Free-text diagnostic from the control plane.
    pub const ERROR: &str = "error";
    /// Agent status change ([`ReplicationUpdate`](crate::ReplicationUpdate)).
    pub const REPLICATION_STATUS: &str = "replication_status";
    /// Outbound: start a replication chain.
    pub const START_CHAIN: &str = "start_chain";
    /// Outbound: stop the running chain.
    pub const STOP_CHAIN: &str = "stop_chain";
}

use message_types::{ERROR, LOG, METRICS, REPLICATION_STATUS, STATUS};

/// The payload of an envelope. Exactly one variant is populated.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    /// An audit log line.
    Log(LogMessage),
    /// A resource gauge sample.
    Metrics(ResourceMetrics),
    /// An experiment progress report.
    Status(ExperimentStatus),
    /// An agent status change.
    Replication(ReplicationUpdate),
    /// A diagnostic string from the control plane.
    Error(String),
    /// Any experiment-specific type this layer routes but does not interpret.
    ///
    /// Build these through [`Envelope::from_parts`] so that a well-known
    /// `kind` is always decoded into its typed variant instead.
    Custom {
        /// The envelope type.
        kind: String,
        /// The raw JSON payload.
        data: Value,
    },
}

impl Payload {
    /// The envelope `type` matching this variant.
    pub fn kind(&self) -> &str {
        match self {
            Self::Log(_) => LOG,
            Self::Metrics(_) => METRICS,
            Self::Status(_) => STATUS,
            Self::Replication(_) => REPLICATION_STATUS,
            Self::Error(_) => ERROR,
            Self::Custom { kind, .. } => kind,
        }
    }

    /// The payload as a JSON value, as it appears under the `payload` key.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::Malformed`] if a value cannot be represented
    /// in JSON (a non-finite metric, for instance).
    pub fn to_value(&self) -> Result<Value, ProtocolError> {
        let value = match self {
            Self::Log(log) => serde_json::to_value(log)?,
            Self::Metrics(metrics) => serde_json::to_value(metrics)?,
            Self::Status(status) => serde_json::to_value(status)?,
            Self::Replication(update) => serde_json::to_value(update)?,
            Self::Error(message) => serde_json::json!({ "error": message }),
            Self::Custom { data, .. } => data.clone(),
        };
        Ok(value)
    }
}

/// A decoded unit of wire traffic.
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    payload: Payload,
}

/// Incoming JSON shape before the payload is matched against the type.
#[derive(Deserialize)]
struct RawEnvelope {
    #[serde(rename = "type", default)]
    kind: Option<String>,
    #[serde(default)]
    payload: Option<Value>,
    #[serde(flatten)]
    inline: serde_json::Map<String, Value>,
}

/// Outgoing JSON shape.
#[derive(Serialize)]
struct OutboundFrame<'a> {
    #[serde(rename = "type")]
    kind: &'a str,
    payload: Value,
}

impl Envelope {
    /// Wrap a payload.
    pub const fn new(payload: Payload) -> Self {
        Self { payload }
    }

    /// The envelope `type`.
    pub fn kind(&self) -> &str {
        self.payload.kind()
    }

    /// Borrow the payload.
    pub const fn payload(&self) -> &Payload {
        &self.payload
    }

    /// Consume the envelope, returning its payload.
    pub fn into_payload(self) -> Payload {
        self.payload
    }

    /// Build an envelope from a `type` and a raw JSON payload.
    ///
    /// Well-known types are decoded into their typed variant; any other
    /// non-empty type becomes [`Payload::Custom`].
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::MissingType`] for an empty type,
    /// [`ProtocolError::MismatchedPayload`] when the payload does not have
    /// the shape its type requires, and [`ProtocolError::OutOfRange`] for
    /// metrics outside their bounds.
    pub fn from_parts(kind: &str, data: Value) -> Result<Self, ProtocolError> {
        let payload = match kind {
            "" => return Err(ProtocolError::MissingType),
            LOG => Payload::Log(typed(kind, data)?),
            METRICS => {
                let metrics: ResourceMetrics = typed(kind, data)?;
                metrics.validate()?;
                Payload::Metrics(metrics)
            }
            STATUS => Payload::Status(typed(kind, data)?),
            REPLICATION_STATUS => Payload::Replication(typed(kind, data)?),
            ERROR => Payload::Error(error_text(kind, data)?),
            other => Payload::Custom {
                kind: other.to_owned(),
                data,
            },
        };
        Ok(Self { payload })
    }

    /// Decode a JSON text frame.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::Malformed`] if the text is not a JSON object,
    /// [`ProtocolError::MissingType`] / [`ProtocolError::MissingPayload`] if
    /// either half of the envelope is absent, and any error of
    /// [`Envelope::from_parts`].
    pub fn from_json(text: &str) -> Result<Self, ProtocolError> {
        let RawEnvelope {
            kind,
            payload,
            mut inline,
        } = serde_json::from_str(text)?;
        let kind = kind.ok_or(ProtocolError::MissingType)?;
        let data = payload
            .or_else(|| inline.remove(inline_key(&kind)))
            .ok_or_else(|| ProtocolError::MissingPayload { kind: kind.clone() })?;
        Self::from_parts(&kind, data)
    }

    /// Encode as a `{"type", "payload"}` JSON text frame.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::Malformed`] if the payload cannot be
    /// represented in JSON.
    pub fn to_json(&self) -> Result<String, ProtocolError> {
        let frame = OutboundFrame {
            kind: self.kind(),
            payload: self.payload.to_value()?,
        };
        Ok(serde_json::to_string(&frame)?)
    }

    /// Decode a protobuf binary frame.
    ///
    /// # Errors
    ///
    /// See [`wire::decode`].
    pub fn from_protobuf(bytes: &[u8]) -> Result<Self, ProtocolError> {
        wire::decode(bytes)
    }

    /// Encode as a protobuf binary frame.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::UnsupportedBinary`] for [`Payload::Custom`].
    pub fn to_protobuf(&self) -> Result<Vec<u8>, ProtocolError> {
        wire::encode(self)
    }
}

impl From<Payload> for Envelope {
    fn from(payload: Payload) -> Self {
        Self::new(payload)
    }
}

impl From<LogMessage> for Envelope {
    fn from(log: LogMessage) -> Self {
        Self::new(Payload::Log(log))
    }
}

impl From<ResourceMetrics> for Envelope {
    fn from(metrics: ResourceMetrics) -> Self {
        Self::new(Payload::Metrics(metrics))
    }
}

impl From<ExperimentStatus> for Envelope {
    fn from(status: ExperimentStatus) -> Self {
        Self::new(Payload::Status(status))
    }
}

impl From<ReplicationUpdate> for Envelope {
    fn from(update: ReplicationUpdate) -> Self {
        Self::new(Payload::Replication(update))
    }
}

/// Encode a `{"type", "payload"}` JSON text frame around a caller-supplied
/// payload, exactly as given.
///
/// Nothing is decoded or re-shaped on the way out: extra keys survive, a
/// partial payload is sent as is, and a bare string stays a string.
///
/// # Errors
///
/// Returns [`ProtocolError::MissingType`] for an empty type.
pub fn encode_frame(kind: &str, payload: Value) -> Result<String, ProtocolError> {
    if kind.is_empty() {
        return Err(ProtocolError::MissingType);
    }
    Ok(serde_json::to_string(&OutboundFrame { kind, payload })?)
}

/// Key under which the protobuf-JSON shape nests a variant's payload.
fn inline_key(kind: &str) -> &str {
    if kind == REPLICATION_STATUS {
        "replication"
    } else {
        kind
    }
}

fn typed<T: DeserializeOwned>(kind: &str, data: Value) -> Result<T, ProtocolError> {
    serde_json::from_value(data).map_err(|e| ProtocolError::MismatchedPayload {
        kind: kind.to_owned(),
        reason: e.to_string(),
    })
}

/// Accept either a bare string or `{"error": <string>}`.
fn error_text(kind: &str, data: Value) -> Result<String, ProtocolError> {
    match data {
        Value::String(text) => Ok(text),
        Value::Object(mut map) => match map.remove("error") {
            Some(Value::String(text)) => Ok(text),
            _ => Err(ProtocolError::MismatchedPayload {
                kind: kind.to_owned(),
                reason: "expected an \"error\" string field".to_owned(),
            }),
        },
        other => Err(ProtocolError::MismatchedPayload {
            kind: kind.to_owned(),
            reason: format!("expected a string, found {other}"),
        }),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::enums::AgentStatus;

    #[test]
    fn decodes_log_envelope() {
        let text = r#"{
            "type": "log",
            "payload": {
                "timestamp": "2024-05-01T10:00:00Z",
                "level": "info",
                "content": "replica started",
                "metadata": {"agent": "root"}
            }
        }"#;
        let envelope = Envelope::from_json(text);
        assert!(envelope.as_ref().is_ok_and(|e| e.kind() == "log"));
        assert!(envelope.is_ok_and(|e| matches!(
            e.payload(),
            Payload::Log(log) if log.content == "replica started"
                && log.metadata.get("agent").map(String::as_str) == Some("root")
        )));
    }

    #[test]
    fn decodes_replication_status_with_child() {
        let text = r#"{"type": "replication_status",
            "payload": {"agent_id": "root", "status": "running", "new_agent": "child1"}}"#;
        let envelope = Envelope::from_json(text);
        let expected = ReplicationUpdate::spawned("root", AgentStatus::Running, "child1");
        assert!(envelope.is_ok_and(|e| *e.payload() == Payload::Replication(expected.clone())));
    }

    #[test]
    fn accepts_inline_variant_shape() {
        let text = r#"{"type": "status", "status": {
            "experiment_id": "exp-1", "status": "running",
            "current_step": "copy", "errors": []}}"#;
        let envelope = Envelope::from_json(text);
        assert!(envelope.is_ok_and(|e| matches!(
            e.payload(),
            Payload::Status(s) if s.experiment_id.as_str() == "exp-1"
        )));
    }

    #[test]
    fn error_payload_accepts_string_or_object() {
        let bare = Envelope::from_json(r#"{"type": "error", "payload": "boom"}"#);
        assert!(bare.is_ok_and(|e| *e.payload() == Payload::Error("boom".to_owned())));

        let object = Envelope::from_json(r#"{"type": "error", "payload": {"error": "boom"}}"#);
        assert!(object.is_ok_and(|e| *e.payload() == Payload::Error("boom".to_owned())));

        let inline = Envelope::from_json(r#"{"type": "error", "error": "boom"}"#);
        assert!(inline.is_ok_and(|e| *e.payload() == Payload::Error("boom".to_owned())));
    }

    #[test]
    fn mismatched_payload_is_a_violation() {
        let text = r#"{"type": "log", "payload": {
            "cpu_usage": 1.0, "memory_usage": 2.0, "process_count": 3}}"#;
        assert!(matches!(
            Envelope::from_json(text),
            Err(ProtocolError::MismatchedPayload { ref kind, .. }) if kind == "log"
        ));
    }

    #[test]
    fn missing_parts_are_violations() {
        assert!(matches!(
            Envelope::from_json(r#"{"payload": {}}"#),
            Err(ProtocolError::MissingType)
        ));
        assert!(matches!(
            Envelope::from_json(r#"{"type": "metrics"}"#),
            Err(ProtocolError::MissingPayload { .. })
        ));
        assert!(matches!(
            Envelope::from_json("not json"),
            Err(ProtocolError::Malformed(_))
        ));
    }

    #[test]
    fn metrics_out_of_range_rejected() {
        let text = r#"{"type": "metrics", "payload": {
            "cpu_usage": 140.0, "memory_usage": 2.0, "process_count": 3}}"#;
        assert!(matches!(
            Envelope::from_json(text),
            Err(ProtocolError::OutOfRange { field: "cpu_usage", .. })
        ));
    }

    #[test]
    fn unknown_type_routes_as_custom() {
        let text = r#"{"type": "chain_progress", "payload": {"depth": 2}}"#;
        let envelope = Envelope::from_json(text);
        assert!(envelope.is_ok_and(|e| e.kind() == "chain_progress"
            && matches!(e.payload(), Payload::Custom { data, .. } if data["depth"] == 2)));
    }

    #[test]
    fn encodes_type_and_payload_keys() {
        let envelope = Envelope::from(ReplicationUpdate::status("child1", AgentStatus::Failed));
        let json = envelope
            .to_json()
            .ok()
            .and_then(|text| serde_json::from_str::<Value>(&text).ok());
        assert_eq!(
            json,
            Some(serde_json::json!({
                "type": "replication_status",
                "payload": {"agent_id": "child1", "status": "failed"}
            }))
        );
    }

    #[test]
    fn raw_frames_carry_the_payload_verbatim() {
        let payload = serde_json::json!({
            "timestamp": "t", "level": "info", "content": "c", "agent": "a7"
        });
        let text = encode_frame("log", payload.clone()).unwrap();
        assert_eq!(
            serde_json::from_str::<Value>(&text).unwrap(),
            serde_json::json!({"type": "log", "payload": payload})
        );

        let text = encode_frame("error", Value::from("boom")).unwrap();
        assert_eq!(text, r#"{"type":"error","payload":"boom"}"#);

        assert!(encode_frame("log", serde_json::json!({"content": "partial"})).is_ok());
        assert!(matches!(
            encode_frame("", Value::Null),
            Err(ProtocolError::MissingType)
        ));
    }
}
