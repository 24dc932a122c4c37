//! Live lineage view fed by `replication_status` envelopes.
//!
//! The projection keeps the current [`LineageTree`] in a `watch` channel.
//! Readers borrow or clone the root and get a consistent tree that later
//! updates never mutate; a new value is published only when an update
//! actually changed something.

use std::sync::Arc;

use selfrep_lineage::{AgentNode, LineageError, LineageTree, Outcome};
use selfrep_types::{AgentId, Payload, ReplicationUpdate, message_types};
use tokio::sync::watch;
use tracing::{error, info};

use crate::dispatch::{Dispatcher, Handler, SubscriptionId};

/// Shared, observable lineage tree.
#[derive(Debug, Clone)]
pub struct LineageProjection {
    tree: Arc<watch::Sender<LineageTree>>,
}

impl LineageProjection {
    /// A projection holding only the root agent.
    pub fn new(root: impl Into<AgentId>) -> Self {
        let (tree, _) = watch::channel(AgentNode::root(root).into_tree());
        Self {
            tree: Arc::new(tree),
        }
    }

    /// A receiver notified whenever the tree changes.
    pub fn watch(&self) -> watch::Receiver<LineageTree> {
        self.tree.subscribe()
    }

    /// The current tree.
    pub fn current(&self) -> LineageTree {
        Arc::clone(&self.tree.borrow())
    }

    /// Fold one update into the tree.
    ///
    /// # Errors
    ///
    /// Returns [`LineageError::DuplicateAgent`] if the tree is inconsistent;
    /// the published tree is left as it was.
    pub fn apply(&self, update: &ReplicationUpdate) -> Result<Outcome, LineageError> {
        let mut result = Ok(Outcome::UnknownAgent);
        self.tree
            .send_if_modified(|tree| match selfrep_lineage::apply(tree, update) {
                Ok(reduction) => {
                    let changed = reduction.changed();
                    if changed {
                        *tree = reduction.tree;
                    }
                    result = Ok(reduction.outcome);
                    changed
                }
                Err(e) => {
                    result = Err(e);
                    false
                }
            });

        if let Ok(Outcome::Spawned(child)) = &result {
            info!(parent = %update.agent_id, child = %child, "agent spawned");
        }
        result
    }

    /// A dispatcher handler that applies every replication payload.
    pub fn handler(&self) -> Handler {
        let projection = self.clone();
        Box::new(move |payload: &Payload| {
            let Payload::Replication(update) = payload else {
                return Ok(());
            };
            match projection.apply(update) {
                Ok(_) => Ok(()),
                Err(e) => {
                    error!(error = %e, "lineage update rejected");
                    Err(e.into())
                }
            }
        })
    }

    /// Subscribe this projection to `replication_status` on `dispatcher`.
    pub fn attach(&self, dispatcher: &mut Dispatcher) -> SubscriptionId {
        dispatcher.subscribe_boxed(message_types::REPLICATION_STATUS, self.handler())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use selfrep_types::{AgentStatus, Envelope};

    #[test]
    fn starts_with_root_only() {
        let projection = LineageProjection::new("root");
        let tree = projection.current();
        assert_eq!(tree.id.as_str(), "root");
        assert_eq!(tree.node_count(), 1);
    }

    #[test]
    fn dispatched_updates_grow_the_tree() {
        let projection = LineageProjection::new("root");
        let mut dispatcher = Dispatcher::new();
        projection.attach(&mut dispatcher);
        let mut watcher = projection.watch();

        let report = dispatcher.dispatch(&Envelope::from(ReplicationUpdate::spawned(
            "root",
            AgentStatus::Running,
            "child1",
        )));
        assert!(report.is_clean());
        assert!(watcher.has_changed().unwrap_or(false));

        let tree = watcher.borrow_and_update().clone();
        assert_eq!(tree.status, AgentStatus::Running);
        assert!(tree.children.first().is_some_and(|c| c.generation == 1));
    }

    #[test]
    fn unknown_agent_does_not_notify() {
        let projection = LineageProjection::new("root");
        let watcher = projection.watch();
        let outcome = projection.apply(&ReplicationUpdate::status("ghost", AgentStatus::Failed));
        assert_eq!(outcome, Ok(Outcome::UnknownAgent));
        assert!(!watcher.has_changed().unwrap_or(true));
    }

    #[test]
    fn earlier_snapshot_is_unaffected() {
        let projection = LineageProjection::new("root");
        let before = projection.current();
        let _ = projection.apply(&ReplicationUpdate::spawned("root", AgentStatus::Running, "a"));
        assert!(before.children.is_empty());
        assert_eq!(projection.current().children.len(), 1);
    }
}
