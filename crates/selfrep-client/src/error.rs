//! Error types for the event client.
//!
//! Uses `thiserror` for typed errors covering the whole client: transport
//! failures, protocol violations, send attempts while disconnected, retry
//! exhaustion, and failing subscription handlers.
//!
//! Only [`ClientError::ExhaustedRetries`] ends a session on its own. It is
//! reported through [`ConnectionHandle::closed`](crate::ConnectionHandle::closed),
//! never raised at a call site.

use selfrep_types::ProtocolError;

use crate::lifecycle::ConnectionState;

/// Errors that can occur while operating the event connection.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// Connecting failed or the live connection broke (refused, reset,
    /// timeout). Triggers a reconnect.
    #[error("transport error: {0}")]
    Transport(String),

    /// A received envelope was malformed or its payload did not match its
    /// type. The envelope is dropped; the connection stays up.
    #[error("protocol violation: {0}")]
    ProtocolViolation(#[from] ProtocolError),

    /// A send was attempted while not connected. The message is dropped.
    #[error("not connected (connection is {state})")]
    NotConnected {
        /// The state at the time of the send.
        state: ConnectionState,
    },

    /// The reconnect attempt counter reached its configured maximum and the
    /// session is closed.
    #[error("gave up after {attempts} failed connection attempts")]
    ExhaustedRetries {
        /// Number of consecutive failed attempts.
        attempts: u32,
    },

    /// A subscription handler returned an error or panicked.
    #[error("handler for {kind:?} failed: {reason}")]
    HandlerFailure {
        /// The envelope type being dispatched.
        kind: String,
        /// The handler's error message.
        reason: String,
    },

    /// The connection driver task is no longer running.
    #[error("connection driver has shut down")]
    Shutdown,

    /// Configuration is invalid.
    #[error("config error: {0}")]
    Config(String),

    /// Serialization of an outbound message failed.
    #[error("serde error: {0}")]
    Serde(#[from] serde_json::Error),
}
