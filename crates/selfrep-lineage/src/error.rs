//! Error types for the selfrep-lineage crate.

use selfrep_types::AgentId;

/// Consistency failures detected in a lineage tree.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LineageError {
    /// An agent id appears on more than one node.
    #[error("agent {id} appears {occurrences} times in the lineage tree")]
    DuplicateAgent {
        /// The repeated identifier.
        id: AgentId,
        /// How many nodes carry it.
        occurrences: usize,
    },

    /// A child's generation is not its parent's generation plus one.
    #[error("agent {id} has generation {found}, expected {expected}")]
    GenerationMismatch {
        /// The offending node.
        id: AgentId,
        /// Parent generation plus one.
        expected: u32,
        /// The generation recorded on the node.
        found: u32,
    },
}
