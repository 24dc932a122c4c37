//! Real-time event client for the selfrep experiment observer.
//!
//! Maintains one logical session with the control plane over WebSocket,
//! reconnecting after a fixed delay and giving up after a bounded number of
//! consecutive failures. Every decoded envelope is appended to a bounded
//! history and then handed to the handlers subscribed to its type.
//!
//! # Modules
//!
//! - [`lifecycle`] -- Reconnect state machine with the epoch guard
//! - [`connection`] -- Driver task and the handle callers use
//! - [`transport`] -- WebSocket and in-memory links
//! - [`history`] -- Bounded envelope history
//! - [`dispatch`] -- Type-keyed handlers with failure isolation
//! - [`projection`] -- Live lineage tree fed by replication updates
//! - [`config`] -- Connection settings
//! - [`error`] -- Client errors

pub mod config;
pub mod connection;
pub mod dispatch;
pub mod error;
pub mod history;
pub mod lifecycle;
pub mod projection;
pub mod transport;

pub use config::ClientConfig;
pub use connection::{ConnectionHandle, ConnectionManager};
pub use dispatch::{DispatchReport, Dispatcher, Handler, SubscriptionId};
pub use error::ClientError;
pub use history::{DEFAULT_HISTORY_CAPACITY, HistoryBuffer, HistoryEntry};
pub use lifecycle::{Action, CloseReason, ConnectionState, Lifecycle};
pub use projection::LineageProjection;
pub use transport::{
    ChannelConnector, ChannelListener, Connector, Frame, Link, PendingConnection, ServerEnd,
    WsConnector, channel_transport,
};
