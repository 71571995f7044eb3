//! Error types for task tree rules and parsing.

use super::{BlockingTask, NodeId, TaskStatus};
use thiserror::Error;

/// Errors raised by task tree rules.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TaskTreeDomainError {
    /// Another node in the run is scheduled or running.
    #[error("a task is already active: {0}")]
    TaskActive(BlockingTask),

    /// A node in the run failed and must be reworked first.
    #[error("a task failed and needs rework: {0}")]
    TaskFailed(BlockingTask),

    /// The requested status change is not permitted by the state machine.
    #[error("node {node_id} cannot move from {from} to {to}")]
    InvalidStatusTransition {
        /// Node being updated.
        node_id: NodeId,
        /// Current status.
        from: TaskStatus,
        /// Requested status.
        to: TaskStatus,
    },

    /// Sibling orders start at 1.
    #[error("invalid sibling order {0}")]
    InvalidSiblingOrder(u32),

    /// Runs never gain a second root.
    #[error("node {0} is a root; a follow-up would create another root")]
    RootHasNoSiblings(NodeId),
}

/// Error returned while parsing task statuses from persistence.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("unknown task status: {0}")]
pub struct ParseTaskStatusError(pub String);
