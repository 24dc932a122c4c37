//! Error types for envelope decoding and encoding.
//!
//! Every variant describes a protocol violation by the peer (or by a local
//! caller building an envelope). None of them is fatal to a connection.

/// Errors raised while decoding or encoding an [`Envelope`](crate::Envelope).
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// The text frame was not a JSON envelope.
    #[error("malformed JSON envelope: {0}")]
    Malformed(#[from] serde_json::Error),

    /// The binary frame was not a valid protobuf message.
    #[error("malformed protobuf envelope: {0}")]
    Decode(#[from] prost::DecodeError),

    /// The envelope carried no `type` discriminator.
    #[error("envelope is missing its type")]
    MissingType,

    /// The envelope carried a type but no payload.
    #[error("envelope of type {kind:?} has no payload")]
    MissingPayload {
        /// The declared envelope type.
        kind: String,
    },

    /// The populated payload does not match the declared type, or a
    /// required field is absent.
    #[error("payload does not match envelope type {kind:?}: {reason}")]
    MismatchedPayload {
        /// The declared envelope type.
        kind: String,
        /// What was wrong with the payload.
        reason: String,
    },

    /// A numeric field is outside its documented range.
    #[error("{field} out of range: {value}")]
    OutOfRange {
        /// Name of the offending field.
        field: &'static str,
        /// The rejected value.
        value: f64,
    },

    /// An agent status label is not one of the known values.
    #[error("unknown agent status: {0:?}")]
    UnknownStatus(String),

    /// The envelope type has no binary representation.
    #[error("envelope of type {kind:?} has no protobuf encoding")]
    UnsupportedBinary {
        /// The envelope type that could not be encoded.
        kind: String,
    },
}
