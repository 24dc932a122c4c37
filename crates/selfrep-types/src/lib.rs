//! Shared type definitions for the selfrep experiment observer.
//!
//! This crate is the wire contract between the control plane and the
//! observer: the [`Envelope`] every message travels in, its payload
//! variants, and the outbound commands. Payload types flow downstream to
//! `TypeScript` via `ts-rs` for the dashboard.
//!
//! # Modules
//!
//! - [`ids`] -- Type-safe wrappers for externally assigned identifiers
//! - [`enums`] -- Agent status
//! - [`structs`] -- Payload structs (log, metrics, status, replication)
//! - [`envelope`] -- The envelope, its JSON codec, and type discriminators
//! - [`wire`] -- Protobuf codec for binary frames
//! - [`commands`] -- Outbound `start_chain` / `stop_chain`
//! - [`error`] -- Protocol violations

pub mod commands;
pub mod envelope;
pub mod enums;
pub mod error;
pub mod ids;
pub mod structs;
pub mod wire;

// Re-export all public types at crate root for convenience.
pub use commands::{ChainConfig, Command, StartChain};
pub use envelope::{Envelope, Payload, encode_frame, message_types};
pub use enums::AgentStatus;
pub use error::ProtocolError;
pub use ids::{AgentId, ExperimentId};
pub use structs::{ExperimentStatus, LogMessage, ReplicationUpdate, ResourceMetrics};
