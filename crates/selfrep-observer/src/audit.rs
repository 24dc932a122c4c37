//! Audit log: turns log, metrics, status, and error envelopes into
//! structured `tracing` events.

use selfrep_client::Dispatcher;
use selfrep_types::{ExperimentStatus, LogMessage, Payload, ResourceMetrics, message_types};
use tracing::{debug, error, info, warn};

/// Subscribe the audit handlers on `dispatcher`.
pub fn register(dispatcher: &mut Dispatcher) {
    dispatcher.subscribe(message_types::LOG, |payload: &Payload| {
        if let Payload::Log(log) = payload {
            emit_log(log);
        }
        Ok(())
    });
    dispatcher.subscribe(message_types::METRICS, |payload: &Payload| {
        if let Payload::Metrics(metrics) = payload {
            emit_metrics(metrics);
        }
        Ok(())
    });
    dispatcher.subscribe(message_types::STATUS, |payload: &Payload| {
        if let Payload::Status(status) = payload {
            emit_status(status);
        }
        Ok(())
    });
    dispatcher.subscribe(message_types::ERROR, |payload: &Payload| {
        if let Payload::Error(message) = payload {
            error!(target: "selfrep::audit", message = %message, "control plane error");
        }
        Ok(())
    });
}

/// Render a log message as one audit line: `[timestamp] LEVEL content k=v`.
pub fn format_line(log: &LogMessage) -> String {
    let mut line = format!(
        "[{}] {} {}",
        log.timestamp,
        log.level.to_uppercase(),
        log.content
    );
    for (key, value) in &log.metadata {
        line.push(' ');
        line.push_str(key);
        line.push('=');
        line.push_str(value);
    }
    line
}

fn emit_log(log: &LogMessage) {
    let line = format_line(log);
    match log.level.to_ascii_lowercase().as_str() {
        "error" | "critical" => error!(target: "selfrep::audit", "{line}"),
        "warn" | "warning" => warn!(target: "selfrep::audit", "{line}"),
        "debug" => debug!(target: "selfrep::audit", "{line}"),
        _ => info!(target: "selfrep::audit", "{line}"),
    }
}

fn emit_metrics(metrics: &ResourceMetrics) {
    info!(
        target: "selfrep::audit",
        cpu_usage = metrics.cpu_usage,
        memory_usage = metrics.memory_usage,
        process_count = metrics.process_count,
        custom = metrics.custom_metrics.len(),
        "resource metrics"
    );
}

fn emit_status(status: &ExperimentStatus) {
    if status.errors.is_empty() {
        info!(
            target: "selfrep::audit",
            experiment_id = %status.experiment_id,
            status = status.status,
            current_step = status.current_step,
            "experiment status"
        );
    } else {
        warn!(
            target: "selfrep::audit",
            experiment_id = %status.experiment_id,
            status = status.status,
            current_step = status.current_step,
            errors = ?status.errors,
            "experiment status with errors"
        );
    }
}
