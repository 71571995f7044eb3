//! Service-level errors and their stable failure kinds.

use crate::pipeline::{
    domain::{BlockingTask, NodeId, RunId, TaskTreeDomainError},
    ports::TaskTreeStoreError,
};
use crate::registry::RegistryError;
use serde::Serialize;
use std::fmt;
use thiserror::Error;

/// Errors returned by task tree services and the scheduler.
#[derive(Debug, Clone, Error)]
pub enum PipelineError {
    /// A task tree rule was violated.
    #[error(transparent)]
    Domain(#[from] TaskTreeDomainError),

    /// The store failed.
    #[error(transparent)]
    Store(#[from] TaskTreeStoreError),

    /// A task identifier could not be resolved.
    #[error(transparent)]
    Registry(#[from] RegistryError),

    /// The run has no `Waiting` node left.
    #[error("run {0} has no waiting task")]
    NothingToRun(RunId),

    /// The run has no nodes.
    #[error("run {0} has no tasks")]
    RunNotFound(RunId),

    /// The node does not exist.
    #[error("task node {0} not found")]
    NodeNotFound(NodeId),

    /// The run already has a root.
    #[error("run {0} is already seeded")]
    RunAlreadySeeded(RunId),
}

impl PipelineError {
    /// Returns the stable failure kind.
    #[must_use]
    pub const fn kind(&self) -> FailureKind {
        match self {
            Self::Domain(err) => match err {
                TaskTreeDomainError::TaskActive(_) => FailureKind::TaskActive,
                TaskTreeDomainError::TaskFailed(_) => FailureKind::TaskFailed,
                TaskTreeDomainError::InvalidStatusTransition { .. } => {
                    FailureKind::InvalidTransition
                }
                TaskTreeDomainError::InvalidSiblingOrder(_)
                | TaskTreeDomainError::RootHasNoSiblings(_) => FailureKind::InvalidTree,
            },
            Self::Store(err) => match err {
                TaskTreeStoreError::NodeNotFound(_) => FailureKind::NotFound,
                TaskTreeStoreError::DuplicateSiblingOrder { .. }
                | TaskTreeStoreError::ConcurrentActivation(_) => FailureKind::Conflict,
                TaskTreeStoreError::NoSavepoint
                | TaskTreeStoreError::InvalidPersistedData(_)
                | TaskTreeStoreError::Persistence(_) => FailureKind::Persistence,
            },
            Self::Registry(err) => match err {
                RegistryError::UnknownTaskId(_) => FailureKind::UnknownTaskId,
                RegistryError::DuplicateTaskId { .. } => FailureKind::DuplicateTaskId,
                RegistryError::EmptyTaskName(_) | RegistryError::InvalidWorkflowStage(_) => {
                    FailureKind::InvalidDefinition
                }
            },
            Self::NothingToRun(_) => FailureKind::NothingToRun,
            Self::RunNotFound(_) | Self::NodeNotFound(_) => FailureKind::NotFound,
            Self::RunAlreadySeeded(_) => FailureKind::AlreadySeeded,
        }
    }

    /// Returns the node blocking scheduling, for `TaskActive` and
    /// `TaskFailed`.
    #[must_use]
    pub const fn blocking_task(&self) -> Option<&BlockingTask> {
        match self {
            Self::Domain(
                TaskTreeDomainError::TaskActive(task) | TaskTreeDomainError::TaskFailed(task),
            ) => Some(task),
            _ => None,
        }
    }
}

/// Stable classification of [`PipelineError`] for callers and the CLI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// A task identifier is not registered.
    UnknownTaskId,
    /// A task identifier was registered twice.
    DuplicateTaskId,
    /// A task definition failed validation.
    InvalidDefinition,
    /// Another node of the run is scheduled or running.
    TaskActive,
    /// A node of the run failed and needs rework.
    TaskFailed,
    /// No waiting node remains.
    NothingToRun,
    /// The node or run does not exist.
    NotFound,
    /// The run already has a root.
    AlreadySeeded,
    /// The status change is not allowed.
    InvalidTransition,
    /// The change would break the tree's shape.
    InvalidTree,
    /// A concurrent change conflicted with this one.
    Conflict,
    /// Storage failed.
    Persistence,
}

impl FailureKind {
    /// Returns the snake-case name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::UnknownTaskId => "unknown_task_id",
            Self::DuplicateTaskId => "duplicate_task_id",
            Self::InvalidDefinition => "invalid_definition",
            Self::TaskActive => "task_active",
            Self::TaskFailed => "task_failed",
            Self::NothingToRun => "nothing_to_run",
            Self::NotFound => "not_found",
            Self::AlreadySeeded => "already_seeded",
            Self::InvalidTransition => "invalid_transition",
            Self::InvalidTree => "invalid_tree",
            Self::Conflict => "conflict",
            Self::Persistence => "persistence",
        }
    }

    /// Returns whether the failure comes from infrastructure rather than
    /// from the state of the run or the caller's request.
    #[must_use]
    pub const fn is_infrastructure(self) -> bool {
        matches!(self, Self::Persistence)
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
