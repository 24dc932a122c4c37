//! Agent lineage tree for self-replication experiments.
//!
//! The tree records which agent spawned which. It only grows: nodes are
//! created by [`ReplicationUpdate`](selfrep_types::ReplicationUpdate)s that
//! carry a `new_agent`, their status may change afterwards, and nothing is
//! ever removed.
//!
//! - [`tree`] -- [`AgentNode`] and read-only queries
//! - [`reducer`] -- the pure [`apply`] function folding updates into a tree
//! - [`error`] -- consistency failures

pub mod error;
pub mod reducer;
pub mod tree;

pub use error::LineageError;
pub use reducer::{Outcome, Reduction, apply, fold};
pub use tree::{AgentNode, LineageTree};
