//! Error types for the observer process.

use selfrep_client::ClientError;

use crate::config::ConfigError;

/// Errors that can stop the observer.
#[derive(Debug, thiserror::Error)]
pub enum ObserverError {
    /// Configuration could not be loaded.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The event client failed to start or gave up.
    #[error(transparent)]
    Client(#[from] ClientError),

    /// The experiment launch request failed.
    #[error("launch failed: {0}")]
    Launch(String),
}
