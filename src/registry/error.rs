//! Error types for task registry configuration and lookup.

use super::TaskDefinitionId;
use thiserror::Error;

/// Errors returned while building or querying the task registry.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RegistryError {
    /// A definition with the same identifier was already registered.
    #[error("duplicate task identifier {id}: already registered as {existing}")]
    DuplicateTaskId {
        /// Conflicting identifier.
        id: TaskDefinitionId,
        /// Name of the definition that claimed the identifier first.
        existing: String,
    },

    /// No definition is registered under the identifier.
    #[error("unknown task identifier: {0}")]
    UnknownTaskId(TaskDefinitionId),

    /// The display name is empty after trimming.
    #[error("task {0} must have a non-empty name")]
    EmptyTaskName(TaskDefinitionId),

    /// The workflow stage name is empty or too long.
    #[error("invalid workflow stage '{0}'")]
    InvalidWorkflowStage(String),
}
