//! Routes decoded envelopes to the handlers subscribed to their type.
//!
//! Handlers for one type run in subscription order. A handler that returns
//! an error or panics is logged and skipped; its siblings still run and the
//! dispatcher stays usable. Envelopes with no subscribers are dropped
//! silently (they are still in the history buffer).

use std::collections::HashMap;
use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};

use selfrep_types::{Envelope, Payload};
use tracing::{error, trace, warn};

use crate::error::ClientError;

/// A subscription callback.
pub type Handler = Box<dyn FnMut(&Payload) -> anyhow::Result<()> + Send>;

/// Identifies one subscription so it can be removed later.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

impl SubscriptionId {
    /// The raw counter value.
    pub const fn get(self) -> u64 {
        self.0
    }
}

/// What happened during one dispatch.
#[derive(Debug, Default)]
pub struct DispatchReport {
    /// Handlers that returned `Ok`.
    pub delivered: usize,
    /// One [`ClientError::HandlerFailure`] per failing handler, in order.
    pub failures: Vec<ClientError>,
}

impl DispatchReport {
    /// Whether every handler succeeded.
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Type-keyed handler registry.
#[derive(Default)]
pub struct Dispatcher {
    routes: HashMap<String, Vec<(SubscriptionId, Handler)>>,
    next_id: u64,
}

impl fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let counts: HashMap<&str, usize> = self
            .routes
            .iter()
            .map(|(kind, handlers)| (kind.as_str(), handlers.len()))
            .collect();
        f.debug_struct("Dispatcher")
            .field("handlers", &counts)
            .field("next_id", &self.next_id)
            .finish()
    }
}

impl Dispatcher {
    /// An empty dispatcher.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for envelopes of type `kind`.
    pub fn subscribe<F>(&mut self, kind: impl Into<String>, handler: F) -> SubscriptionId
    where
        F: FnMut(&Payload) -> anyhow::Result<()> + Send + 'static,
    {
        self.subscribe_boxed(kind, Box::new(handler))
    }

    /// Register an already boxed handler.
    pub fn subscribe_boxed(&mut self, kind: impl Into<String>, handler: Handler) -> SubscriptionId {
        self.next_id = self.next_id.saturating_add(1);
        let id = SubscriptionId(self.next_id);
        self.routes
            .entry(kind.into())
            .or_default()
            .push((id, handler));
        id
    }

    /// Remove the subscription `id` from `kind`.
    ///
    /// Returns `false` if no such subscription was registered.
    pub fn unsubscribe(&mut self, kind: &str, id: SubscriptionId) -> bool {
        let Some(handlers) = self.routes.get_mut(kind) else {
            return false;
        };
        let Some(position) = handlers.iter().position(|(sub, _)| *sub == id) else {
            return false;
        };
        drop(handlers.remove(position));
        if handlers.is_empty() {
            self.routes.remove(kind);
        }
        true
    }

    /// Number of handlers registered for `kind`.
    pub fn handler_count(&self, kind: &str) -> usize {
        self.routes.get(kind).map_or(0, Vec::len)
    }

    /// Invoke every handler subscribed to the envelope's type.
    pub fn dispatch(&mut self, envelope: &Envelope) -> DispatchReport {
        let kind = envelope.kind();
        let mut report = DispatchReport::default();
        let Some(handlers) = self.routes.get_mut(kind) else {
            trace!(kind, "no subscribers");
            return report;
        };

        for (id, handler) in handlers.iter_mut() {
            let payload = envelope.payload();
            match catch_unwind(AssertUnwindSafe(|| handler(payload))) {
                Ok(Ok(())) => report.delivered = report.delivered.saturating_add(1),
                Ok(Err(e)) => {
                    warn!(kind, subscription = id.get(), error = %e, "handler failed");
                    report.failures.push(ClientError::HandlerFailure {
                        kind: kind.to_owned(),
                        reason: e.to_string(),
                    });
                }
                Err(panic) => {
                    let reason = panic_message(panic.as_ref());
                    error!(kind, subscription = id.get(), reason = %reason, "handler panicked");
                    report.failures.push(ClientError::HandlerFailure {
                        kind: kind.to_owned(),
                        reason,
                    });
                }
            }
        }
        report
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    panic
        .downcast_ref::<&str>()
        .map(|s| (*s).to_owned())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "panic".to_owned())
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::*;
    use selfrep_types::{AgentStatus, ReplicationUpdate, message_types};

    fn log_sink() -> (Arc<Mutex<Vec<String>>>, impl Fn(&str) -> Handler) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let make = move |tag: &str| -> Handler {
            let sink = Arc::clone(&sink);
            let tag = tag.to_owned();
            Box::new(move |_payload: &Payload| {
                if let Ok(mut seen) = sink.lock() {
                    seen.push(tag.clone());
                }
                Ok(())
            })
        };
        (seen, make)
    }

    fn seen(log: &Arc<Mutex<Vec<String>>>) -> Vec<String> {
        log.lock().map(|v| v.clone()).unwrap_or_default()
    }

    fn replication() -> Envelope {
        Envelope::from(ReplicationUpdate::status("root", AgentStatus::Running))
    }

    #[test]
    fn handlers_run_in_subscription_order() {
        let (log, make) = log_sink();
        let mut dispatcher = Dispatcher::new();
        dispatcher.subscribe_boxed(message_types::REPLICATION_STATUS, make("first"));
        dispatcher.subscribe_boxed(message_types::REPLICATION_STATUS, make("second"));
        dispatcher.subscribe_boxed(message_types::LOG, make("other"));

        let report = dispatcher.dispatch(&replication());
        assert_eq!(report.delivered, 2);
        assert!(report.is_clean());
        assert_eq!(seen(&log), vec!["first", "second"]);
    }

    #[test]
    fn failing_handler_does_not_block_siblings() {
        let (log, make) = log_sink();
        let mut dispatcher = Dispatcher::new();
        dispatcher.subscribe(message_types::REPLICATION_STATUS, |_: &Payload| {
            anyhow::bail!("boom")
        });
        dispatcher.subscribe_boxed(message_types::REPLICATION_STATUS, make("h2"));

        let report = dispatcher.dispatch(&replication());
        assert_eq!(seen(&log), vec!["h2"]);
        assert_eq!(report.delivered, 1);
        assert!(matches!(
            report.failures.as_slice(),
            [ClientError::HandlerFailure { reason, .. }] if reason == "boom"
        ));
    }

    #[test]
    #[allow(clippy::panic)]
    fn panicking_handler_is_contained() {
        let (log, make) = log_sink();
        let mut dispatcher = Dispatcher::new();
        dispatcher.subscribe(message_types::REPLICATION_STATUS, |_: &Payload| {
            panic!("handler exploded")
        });
        dispatcher.subscribe_boxed(message_types::REPLICATION_STATUS, make("survivor"));

        let report = dispatcher.dispatch(&replication());
        assert_eq!(seen(&log), vec!["survivor"]);
        assert!(matches!(
            report.failures.as_slice(),
            [ClientError::HandlerFailure { reason, .. }] if reason == "handler exploded"
        ));

        // Still usable afterwards.
        let again = dispatcher.dispatch(&replication());
        assert_eq!(again.delivered, 1);
    }

    #[test]
    fn unsubscribe_removes_only_that_handler() {
        let (log, make) = log_sink();
        let mut dispatcher = Dispatcher::new();
        let first = dispatcher.subscribe_boxed(message_types::REPLICATION_STATUS, make("first"));
        dispatcher.subscribe_boxed(message_types::REPLICATION_STATUS, make("second"));

        assert!(dispatcher.unsubscribe(message_types::REPLICATION_STATUS, first));
        assert!(!dispatcher.unsubscribe(message_types::REPLICATION_STATUS, first));
        assert!(!dispatcher.unsubscribe(message_types::LOG, first));
        assert_eq!(dispatcher.handler_count(message_types::REPLICATION_STATUS), 1);

        dispatcher.dispatch(&replication());
        assert_eq!(seen(&log), vec!["second"]);
    }

    #[test]
    fn unsubscribed_type_is_dropped_silently() {
        let mut dispatcher = Dispatcher::new();
        let report = dispatcher.dispatch(&Envelope::new(Payload::Error("x".to_owned())));
        assert_eq!(report.delivered, 0);
        assert!(report.is_clean());
    }

    #[test]
    fn custom_types_route_by_name() {
        let (log, make) = log_sink();
        let mut dispatcher = Dispatcher::new();
        dispatcher.subscribe_boxed("fitness", make("fit"));
        let envelope = Envelope::from_parts("fitness", serde_json::json!({"score": 1}));
        assert!(envelope.is_ok());
        if let Ok(envelope) = envelope {
            dispatcher.dispatch(&envelope);
        }
        assert_eq!(seen(&log), vec!["fit"]);
    }
}
