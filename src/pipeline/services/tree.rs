//! Tree-shaped operations on a run's task nodes.

use super::PipelineError;
use crate::pipeline::{
    domain::{
        NewPipelineRunTask, NodeId, NodeUpdate, OrderedTask, PipelineRunTask, RunId,
    },
    ports::{TaskTreeStore, TaskTreeTransaction},
};
use crate::registry::{TaskDefinitionId, TaskRegistry};
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, instrument};

/// Outcome of a rework.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReworkReport {
    /// The node after being reset to `Waiting`.
    pub node: PipelineRunTask,
    /// Descendants deleted, deepest first.
    pub removed: Vec<NodeId>,
}

/// Seeds runs and edits their task trees.
#[derive(Debug, Clone)]
pub struct TaskTreeService<S> {
    store: Arc<S>,
    registry: TaskRegistry,
}

impl<S> TaskTreeService<S>
where
    S: TaskTreeStore + 'static,
{
    /// Creates a service over `store`, resolving tasks through `registry`.
    #[must_use]
    pub const fn new(store: Arc<S>, registry: TaskRegistry) -> Self {
        Self { store, registry }
    }

    /// Returns the registry used to resolve task identifiers.
    #[must_use]
    pub const fn registry(&self) -> &TaskRegistry {
        &self.registry
    }

    /// Creates the single root of a run. The root takes its workflow stage
    /// from the task definition.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::RunAlreadySeeded`] when the run has nodes and
    /// [`PipelineError::Registry`] for an unknown task.
    #[instrument(skip_all, fields(run_id = %run_id, task_id = %definition_id))]
    pub async fn seed_run(
        &self,
        run_id: RunId,
        definition_id: TaskDefinitionId,
    ) -> Result<PipelineRunTask, PipelineError> {
        let registry = self.registry.clone();
        let root = self
            .store
            .transaction(move |tx| {
                let tree = tx.lock_run(run_id)?;
                if !tree.is_empty() {
                    return Err(PipelineError::RunAlreadySeeded(run_id));
                }
                let stage = registry.resolve(definition_id)?.definition().stage().clone();
                Ok(tx.insert_node(NewPipelineRunTask::root(run_id, definition_id, stage))?)
            })
            .await?;
        info!(node_id = %root.id(), "run seeded");
        Ok(root)
    }

    /// Returns the run's nodes in pre-order with one-based positions.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::RunNotFound`] when the run has no nodes.
    pub async fn ordered_view(&self, run_id: RunId) -> Result<Vec<OrderedTask>, PipelineError> {
        let tree = self.store.load_run(run_id).await?;
        if tree.is_empty() {
            return Err(PipelineError::RunNotFound(run_id));
        }
        Ok(tree.ordered())
    }

    /// Returns the first `Waiting` node in the ordered view, if any.
    ///
    /// # Errors
    ///
    /// Returns `TaskActive` or `TaskFailed` naming the blocking node, and
    /// [`PipelineError::RunNotFound`] when the run has no nodes.
    pub async fn next_runnable(
        &self,
        run_id: RunId,
    ) -> Result<Option<PipelineRunTask>, PipelineError> {
        let tree = self.store.load_run(run_id).await?;
        if tree.is_empty() {
            return Err(PipelineError::RunNotFound(run_id));
        }
        Ok(tree.next_runnable()?)
    }

    /// Appends a `Waiting` child after the parent's existing children.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::NodeNotFound`] for a missing parent and
    /// [`PipelineError::Registry`] for an unknown task.
    #[instrument(skip_all, fields(parent_id = %parent_id, task_id = %definition_id))]
    pub async fn add_child(
        &self,
        parent_id: NodeId,
        definition_id: TaskDefinitionId,
    ) -> Result<PipelineRunTask, PipelineError> {
        let registry = self.registry.clone();
        let child = self
            .store
            .transaction(move |tx| graft_child(tx, &registry, parent_id, definition_id))
            .await?;
        info!(node_id = %child.id(), sibling_order = %child.sibling_order(), "child added");
        Ok(child)
    }

    /// Deletes every descendant of the node and resets it to `Waiting`,
    /// clearing timestamps, message, and diagnostic.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::NodeNotFound`] for a missing node and
    /// `TaskActive` when any node of the run is scheduled or running.
    #[instrument(skip_all, fields(node_id = %node_id))]
    pub async fn rework(&self, node_id: NodeId) -> Result<ReworkReport, PipelineError> {
        let report = self
            .store
            .transaction(move |tx| {
                let run_id = tx
                    .find_node(node_id)?
                    .ok_or(PipelineError::NodeNotFound(node_id))?
                    .run_id();
                let tree = tx.lock_run(run_id)?;
                if tree.find(node_id).is_none() {
                    return Err(PipelineError::NodeNotFound(node_id));
                }
                tree.ensure_idle()?;
                let removed = tree.descendants_of(node_id);
                tx.delete_nodes(&removed)?;
                let node = tx.update_node(node_id, NodeUpdate::reset())?;
                Ok(ReworkReport { node, removed })
            })
            .await?;
        info!(removed = report.removed.len(), "node reworked");
        Ok(report)
    }

    /// Applies a partial update. A status change must follow the scheduler
    /// state machine; resetting to `Waiting` goes through
    /// [`TaskTreeService::rework`].
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::NodeNotFound`] for a missing node and
    /// `InvalidStatusTransition` for a disallowed status change.
    pub async fn update_status(
        &self,
        node_id: NodeId,
        update: NodeUpdate,
    ) -> Result<PipelineRunTask, PipelineError> {
        self.store
            .transaction(move |tx| {
                let run_id = tx
                    .find_node(node_id)?
                    .ok_or(PipelineError::NodeNotFound(node_id))?
                    .run_id();
                let tree = tx.lock_run(run_id)?;
                let current = tree
                    .find(node_id)
                    .ok_or(PipelineError::NodeNotFound(node_id))?;
                if let Some(target) = update.status.filter(|target| *target != current.status()) {
                    current.ensure_transition(target)?;
                }
                Ok(tx.update_node(node_id, update)?)
            })
            .await
    }
}

/// Inserts a child of `parent_id` inside an open transaction.
pub(crate) fn graft_child(
    tx: &mut dyn TaskTreeTransaction,
    registry: &TaskRegistry,
    parent_id: NodeId,
    definition_id: TaskDefinitionId,
) -> Result<PipelineRunTask, PipelineError> {
    registry.resolve(definition_id)?;
    let parent = tx
        .find_node(parent_id)?
        .ok_or(PipelineError::NodeNotFound(parent_id))?;
    let tree = tx.lock_run(parent.run_id())?;
    let order = tree.next_sibling_order(parent_id)?;
    Ok(tx.insert_node(NewPipelineRunTask::child_of(&parent, definition_id, order))?)
}
