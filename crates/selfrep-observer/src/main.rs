//! Observer entry point for selfrep experiments.
//!
//! Follows a running self-replication experiment over the control plane's
//! event stream. Audit-relevant envelopes are written to the log, and
//! replication updates are folded into a live lineage tree.
//!
//! # Startup sequence
//!
//! 1. Load configuration from `selfrep-config.yaml` and the environment
//! 2. Initialize structured logging
//! 3. Register audit handlers and the lineage projection
//! 4. Start the event connection (and the experiment launch, if configured)
//! 5. Optionally send `start_chain` once connected
//! 6. Run until Ctrl-C or until the connection gives up

mod audit;
mod config;
mod error;
mod launch;

use selfrep_client::{ConnectionHandle, ConnectionManager, Dispatcher, LineageProjection, WsConnector};
use selfrep_lineage::LineageTree;
use tokio::sync::watch;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use crate::config::{ChainSettings, LoggingConfig, ObserverConfig};
use crate::error::ObserverError;

/// Application entry point.
///
/// # Errors
///
/// Returns an error if configuration is invalid or the event connection
/// exhausts its reconnect attempts.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 1. Load configuration.
    let config = ObserverConfig::load()?;

    // 2. Initialize structured logging.
    init_logging(&config.logging);
    info!(
        url = config.client.url,
        reconnect_delay_secs = config.client.reconnect_delay_secs,
        max_reconnect_attempts = config.client.max_reconnect_attempts,
        history_capacity = config.client.history_capacity,
        "selfrep-observer starting"
    );

    // 3. Handlers.
    let projection = LineageProjection::new(config.root_agent.as_str());
    let mut dispatcher = Dispatcher::new();
    audit::register(&mut dispatcher);
    projection.attach(&mut dispatcher);
    tokio::spawn(report_lineage(projection.watch()));

    // 4. Connect.
    let manager = ConnectionManager::new(WsConnector, &config.client, dispatcher)
        .map_err(ObserverError::from)?;
    let (handle, driver) = manager.spawn();
    handle.start().map_err(ObserverError::from)?;

    if let Some(launch) = config.launch.clone() {
        launch::spawn_launch(launch);
    }

    // 5. Chain.
    if config.chain.auto_start {
        tokio::spawn(start_chain(handle.clone(), config.chain));
    }

    // 6. Run.
    let outcome = tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            if let Err(e) = signal {
                warn!(error = %e, "failed to listen for Ctrl-C, shutting down");
            }
            info!("shutdown requested");
            shutdown(&handle).await
        }
        result = handle.closed() => result.map_err(ObserverError::from),
    };

    let recorded = handle.history().await.map(|h| h.len()).unwrap_or_default();
    let tree = projection.current();
    info!(
        envelopes = recorded,
        agents = tree.node_count(),
        generations = tree.max_generation(),
        "selfrep-observer finished"
    );

    drop(handle);
    if let Err(e) = driver.await {
        warn!(error = %e, "connection driver ended abnormally");
    }
    outcome.map_err(Into::into)
}

/// Install the global subscriber. `RUST_LOG` takes precedence over the
/// configured level.
fn init_logging(config: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true);
    if config.json {
        builder.json().init();
    } else {
        builder.init();
    }
}

/// Send `start_chain` once the connection is open.
async fn start_chain(handle: ConnectionHandle, chain: ChainSettings) {
    if let Err(e) = handle.wait_connected().await {
        warn!(error = %e, "connection never opened, chain not started");
        return;
    }
    match handle.start_chain(chain.max_depth, chain.chain_config()).await {
        Ok(()) => info!(
            max_depth = chain.max_depth,
            timeout = chain.timeout,
            retry_count = chain.retry_count,
            "replication chain requested"
        ),
        Err(e) => warn!(error = %e, "failed to start replication chain"),
    }
}

/// Stop the chain if possible, then close the connection.
async fn shutdown(handle: &ConnectionHandle) -> Result<(), ObserverError> {
    if let Err(e) = handle.stop_chain().await {
        debug!(error = %e, "stop_chain not sent");
    }
    handle.stop()?;
    handle.closed().await?;
    Ok(())
}

/// Log a summary every time the lineage tree changes.
async fn report_lineage(mut tree: watch::Receiver<LineageTree>) {
    while tree.changed().await.is_ok() {
        let current = tree.borrow_and_update().clone();
        info!(
            agents = current.node_count(),
            generations = current.max_generation(),
            "lineage updated"
        );
    }
}
