//! Folds [`ReplicationUpdate`]s into a lineage tree.
//!
//! [`apply`] is pure: it never mutates the input tree. The path from the
//! root to the updated node is rebuilt, every other subtree is shared with
//! the input by reference. Cost is bounded by tree depth for the rebuild
//! plus one traversal for the consistency checks.
//!
//! # Policy
//!
//! - An update for an id absent from the tree is a no-op
//!   ([`Outcome::UnknownAgent`]).
//! - An id present on more than one node is a consistency failure
//!   ([`LineageError::DuplicateAgent`]); the tree is left as it was.
//! - A `new_agent` that already exists anywhere in the tree is not added a
//!   second time. The status change still applies
//!   ([`Outcome::DuplicateChild`]). This keeps replayed updates idempotent.

use std::sync::Arc;

use selfrep_types::{AgentId, ReplicationUpdate};
use tracing::{debug, warn};

use crate::error::LineageError;
use crate::tree::{AgentNode, LineageTree};

/// What an update did to the tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// The agent's status was replaced; no child was added.
    StatusChanged,
    /// The agent's status was replaced and a child was appended.
    Spawned(AgentId),
    /// The agent is not in the tree; nothing changed.
    UnknownAgent,
    /// The status was replaced but the child already exists.
    DuplicateChild(AgentId),
}

/// The result of applying one update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reduction {
    /// The new tree (the input handle itself when nothing changed).
    pub tree: LineageTree,
    /// What happened.
    pub outcome: Outcome,
}

impl Reduction {
    /// Whether the tree value differs from the input.
    pub const fn changed(&self) -> bool {
        !matches!(self.outcome, Outcome::UnknownAgent)
    }
}

/// Apply a replication update to a tree.
///
/// # Errors
///
/// Returns [`LineageError::DuplicateAgent`] if `update.agent_id` matches more
/// than one node.
pub fn apply(tree: &LineageTree, update: &ReplicationUpdate) -> Result<Reduction, LineageError> {
    let occurrences = tree.occurrences(&update.agent_id);
    if occurrences == 0 {
        debug!(agent_id = %update.agent_id, "update for unknown agent ignored");
        return Ok(Reduction {
            tree: Arc::clone(tree),
            outcome: Outcome::UnknownAgent,
        });
    }
    if occurrences > 1 {
        return Err(LineageError::DuplicateAgent {
            id: update.agent_id.clone(),
            occurrences,
        });
    }

    let (spawn, outcome) = match &update.new_agent {
        Some(child) if tree.contains(child) => {
            warn!(
                agent_id = %update.agent_id,
                new_agent = %child,
                "spawned agent already in lineage, not adding it again"
            );
            (None, Outcome::DuplicateChild(child.clone()))
        }
        Some(child) => (Some(child), Outcome::Spawned(child.clone())),
        None => (None, Outcome::StatusChanged),
    };

    // Exactly one match exists, so the rebuild always finds it.
    let tree = rebuild(tree, update, spawn).unwrap_or_else(|| Arc::clone(tree));
    debug!(
        agent_id = %update.agent_id,
        status = %update.status,
        outcome = ?outcome,
        "lineage updated"
    );
    Ok(Reduction { tree, outcome })
}

/// Apply a sequence of updates in order, starting from `tree`.
///
/// Unknown agents and duplicate children are skipped as in [`apply`].
///
/// # Errors
///
/// Stops at the first [`LineageError`].
pub fn fold<'a, I>(tree: &LineageTree, updates: I) -> Result<LineageTree, LineageError>
where
    I: IntoIterator<Item = &'a ReplicationUpdate>,
{
    updates
        .into_iter()
        .try_fold(Arc::clone(tree), |acc, update| Ok(apply(&acc, update)?.tree))
}

/// Rebuild the path to the first node matching `update.agent_id`.
///
/// Returns `None` when no node in this subtree matches.
fn rebuild(
    node: &Arc<AgentNode>,
    update: &ReplicationUpdate,
    spawn: Option<&AgentId>,
) -> Option<Arc<AgentNode>> {
    if node.id == update.agent_id {
        let mut children = node.children.clone();
        if let Some(child) = spawn {
            children.push(Arc::new(AgentNode::spawned(node, child.clone())));
        }
        return Some(Arc::new(AgentNode {
            id: node.id.clone(),
            generation: node.generation,
            status: update.status,
            children,
        }));
    }

    node.children
        .iter()
        .enumerate()
        .find_map(|(index, child)| rebuild(child, update, spawn).map(|new| (index, new)))
        .map(|(index, replacement)| {
            let mut children = node.children.clone();
            if let Some(slot) = children.get_mut(index) {
                *slot = replacement;
            }
            Arc::new(AgentNode {
                id: node.id.clone(),
                generation: node.generation,
                status: node.status,
                children,
            })
        })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use selfrep_types::AgentStatus;

    fn root() -> LineageTree {
        AgentNode::root("root").into_tree()
    }

    fn applied(tree: &LineageTree, update: &ReplicationUpdate) -> LineageTree {
        apply(tree, update).unwrap().tree
    }

    #[test]
    fn scenario_a_spawn_from_root() {
        let update = ReplicationUpdate::spawned("root", AgentStatus::Running, "child1");
        let result = apply(&root(), &update);

        let expected = AgentNode {
            id: AgentId::new("root"),
            generation: 0,
            status: AgentStatus::Running,
            children: vec![Arc::new(AgentNode {
                id: AgentId::new("child1"),
                generation: 1,
                status: AgentStatus::Running,
                children: Vec::new(),
            })],
        };
        assert!(result.is_ok_and(|r| *r.tree == expected
            && r.outcome == Outcome::Spawned(AgentId::new("child1"))));
    }

    #[test]
    fn scenario_b_status_only_touches_target() {
        let after_a = applied(
            &root(),
            &ReplicationUpdate::spawned("root", AgentStatus::Running, "child1"),
        );
        let after_b = applied(
            &after_a,
            &ReplicationUpdate::status("child1", AgentStatus::Success),
        );

        assert_eq!(after_b.status, AgentStatus::Running);
        assert_eq!(after_b.children.len(), 1);
        assert!(after_b.children.first().is_some_and(|c| c.id.as_str() == "child1"
            && c.status == AgentStatus::Success
            && c.generation == 1));
        // The input tree is untouched.
        assert!(after_a.children.first().is_some_and(|c| c.status == AgentStatus::Running));
    }

    #[test]
    fn unknown_agent_returns_equal_tree() {
        let tree = applied(
            &root(),
            &ReplicationUpdate::spawned("root", AgentStatus::Running, "child1"),
        );
        let result = apply(
            &tree,
            &ReplicationUpdate::spawned("ghost", AgentStatus::Failed, "x"),
        );
        assert!(result.is_ok_and(|r| r.tree == tree && r.outcome == Outcome::UnknownAgent));
    }

    #[test]
    fn spawn_adds_exactly_one_child_at_next_generation() {
        let mut tree = root();
        for child in ["c1", "c2"] {
            tree = applied(&tree, &ReplicationUpdate::spawned("root", AgentStatus::Running, child));
        }
        tree = applied(&tree, &ReplicationUpdate::spawned("c2", AgentStatus::Running, "g1"));

        let before = tree.find(&AgentId::new("c2")).map(|n| n.children.len());
        let next = applied(&tree, &ReplicationUpdate::spawned("c2", AgentStatus::Success, "g2"));
        let node = next.find(&AgentId::new("c2"));

        assert_eq!(node.map(|n| n.children.len()), before.map(|n| n.saturating_add(1)));
        assert!(node
            .and_then(|n| n.children.last())
            .is_some_and(|c| c.id.as_str() == "g2"
                && c.generation == 2
                && c.status == AgentStatus::Running));
        assert!(next.check_invariants().is_ok());
    }

    #[test]
    fn status_only_update_keeps_children_in_order() {
        let mut tree = root();
        for child in ["c1", "c2", "c3"] {
            tree = applied(&tree, &ReplicationUpdate::spawned("root", AgentStatus::Running, child));
        }
        let next = applied(&tree, &ReplicationUpdate::status("root", AgentStatus::Failed));
        let order = |t: &LineageTree| -> Vec<String> {
            t.children.iter().map(|c| c.id.to_string()).collect()
        };
        assert_eq!(order(&next), order(&tree));
        assert_eq!(next.status, AgentStatus::Failed);
    }

    #[test]
    fn untouched_subtrees_are_shared() {
        let mut tree = root();
        for child in ["left", "right"] {
            tree = applied(&tree, &ReplicationUpdate::spawned("root", AgentStatus::Running, child));
        }
        let next = applied(&tree, &ReplicationUpdate::status("right", AgentStatus::Success));

        let shared = tree
            .children
            .first()
            .zip(next.children.first())
            .is_some_and(|(old, new)| Arc::ptr_eq(old, new));
        assert!(shared, "unchanged sibling should be reused by reference");
        assert!(!Arc::ptr_eq(&tree, &next));
    }

    #[test]
    fn replayed_spawn_does_not_duplicate_child() {
        let update = ReplicationUpdate::spawned("root", AgentStatus::Running, "child1");
        let once = applied(&root(), &update);
        let result = apply(&once, &update);
        assert!(result.is_ok_and(|r| r.tree.children.len() == 1
            && r.outcome == Outcome::DuplicateChild(AgentId::new("child1"))));
    }

    #[test]
    fn duplicate_target_is_a_consistency_failure() {
        let twin = || {
            Arc::new(AgentNode {
                id: AgentId::new("twin"),
                generation: 1,
                status: AgentStatus::Running,
                children: Vec::new(),
            })
        };
        let tree = Arc::new(AgentNode {
            children: vec![twin(), twin()],
            ..AgentNode::root("root")
        });
        let result = apply(&tree, &ReplicationUpdate::status("twin", AgentStatus::Failed));
        assert!(matches!(
            result,
            Err(LineageError::DuplicateAgent { occurrences: 2, .. })
        ));
    }

    #[test]
    fn fold_applies_in_order() {
        let updates = vec![
            ReplicationUpdate::spawned("root", AgentStatus::Running, "a"),
            ReplicationUpdate::spawned("a", AgentStatus::Running, "b"),
            ReplicationUpdate::status("b", AgentStatus::Success),
            ReplicationUpdate::status("nobody", AgentStatus::Failed),
        ];
        let tree = fold(&root(), &updates);
        assert!(tree.is_ok_and(|t| t.max_generation() == 2
            && t.find(&AgentId::new("b")).is_some_and(|b| b.status == AgentStatus::Success)));
    }
}
