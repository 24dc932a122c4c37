//! The agent lineage tree.
//!
//! Nodes are immutable once shared. Children are held behind [`Arc`] so an
//! updated tree can reuse every subtree the update did not touch, while a
//! reader holding the previous root keeps a complete, consistent view.
//! Equality is structural: `Arc<T>: PartialEq` compares the pointees.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use selfrep_types::{AgentId, AgentStatus};

use crate::error::LineageError;

/// Shared handle to the root of a lineage tree.
pub type LineageTree = Arc<AgentNode>;

/// A node in the lineage tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentNode {
    /// Externally assigned, unique within the tree.
    pub id: AgentId,
    /// Depth below the root (root = 0).
    pub generation: u32,
    /// Latest reported status.
    pub status: AgentStatus,
    /// Spawned agents in spawn order.
    pub children: Vec<Arc<AgentNode>>,
}

impl AgentNode {
    /// The root node created at session start: generation 0, `success`.
    pub fn root(id: impl Into<AgentId>) -> Self {
        Self {
            id: id.into(),
            generation: 0,
            status: AgentStatus::Success,
            children: Vec::new(),
        }
    }

    /// A freshly spawned child of `parent`: next generation, `running`.
    pub(crate) fn spawned(parent: &Self, id: AgentId) -> Self {
        Self {
            id,
            generation: parent.generation.saturating_add(1),
            status: AgentStatus::Running,
            children: Vec::new(),
        }
    }

    /// Wrap a root node into a shareable tree.
    pub fn into_tree(self) -> LineageTree {
        Arc::new(self)
    }

    /// Depth-first search for the first node with the given id.
    pub fn find(&self, id: &AgentId) -> Option<&Self> {
        if self.id == *id {
            return Some(self);
        }
        self.children.iter().find_map(|child| child.find(id))
    }

    /// Whether any node in this subtree carries `id`.
    pub fn contains(&self, id: &AgentId) -> bool {
        self.find(id).is_some()
    }

    /// Number of nodes in this subtree carrying `id`.
    pub fn occurrences(&self, id: &AgentId) -> usize {
        let own = usize::from(self.id == *id);
        self.children
            .iter()
            .fold(own, |acc, child| acc.saturating_add(child.occurrences(id)))
    }

    /// Total number of nodes in this subtree.
    pub fn node_count(&self) -> usize {
        self.children
            .iter()
            .fold(1, |acc, child| acc.saturating_add(child.node_count()))
    }

    /// Highest generation present in this subtree.
    pub fn max_generation(&self) -> u32 {
        self.children
            .iter()
            .map(|child| child.max_generation())
            .fold(self.generation, u32::max)
    }

    /// All ids in depth-first pre-order.
    pub fn ids(&self) -> Vec<&AgentId> {
        let mut out = Vec::new();
        self.collect_ids(&mut out);
        out
    }

    fn collect_ids<'a>(&'a self, out: &mut Vec<&'a AgentId>) {
        out.push(&self.id);
        for child in &self.children {
            child.collect_ids(out);
        }
    }

    /// Node counts per generation.
    pub fn generation_sizes(&self) -> BTreeMap<u32, usize> {
        let mut sizes = BTreeMap::new();
        self.count_generations(&mut sizes);
        sizes
    }

    fn count_generations(&self, sizes: &mut BTreeMap<u32, usize>) {
        let entry = sizes.entry(self.generation).or_insert(0_usize);
        *entry = entry.saturating_add(1);
        for child in &self.children {
            child.count_generations(sizes);
        }
    }

    /// Verify id uniqueness and the generation invariant over the subtree.
    ///
    /// # Errors
    ///
    /// Returns [`LineageError::DuplicateAgent`] for the first repeated id
    /// found in pre-order, or [`LineageError::GenerationMismatch`] for the
    /// first child whose generation is not its parent's plus one.
    pub fn check_invariants(&self) -> Result<(), LineageError> {
        self.check_generations()?;
        let mut seen: BTreeMap<&AgentId, usize> = BTreeMap::new();
        for id in self.ids() {
            let count = seen.entry(id).or_insert(0);
            *count = count.saturating_add(1);
        }
        match seen.into_iter().find(|(_, count)| *count > 1) {
            Some((id, occurrences)) => Err(LineageError::DuplicateAgent {
                id: id.clone(),
                occurrences,
            }),
            None => Ok(()),
        }
    }

    fn check_generations(&self) -> Result<(), LineageError> {
        let expected = self.generation.saturating_add(1);
        for child in &self.children {
            if child.generation != expected {
                return Err(LineageError::GenerationMismatch {
                    id: child.id.clone(),
                    expected,
                    found: child.generation,
                });
            }
            child.check_generations()?;
        }
        Ok(())
    }
}
