//! Execution context handed to system task executables.

use super::{PipelineError, tree::graft_child};
use crate::pipeline::{
    domain::{NodeId, PipelineRunTask, RunId, RunTaskTree, TaskTreeDomainError},
    ports::TaskTreeTransaction,
};
use crate::registry::{TaskDefinitionId, TaskRegistry};

/// Access to the running node and the scheduler's open transaction.
///
/// Everything done through the context commits together with the node's
/// final status. If the executable fails, its structural changes are
/// discarded and only the failure is recorded.
pub struct TaskContext<'a> {
    node: &'a PipelineRunTask,
    transaction: &'a mut dyn TaskTreeTransaction,
    registry: &'a TaskRegistry,
}

impl<'a> TaskContext<'a> {
    pub(crate) fn new(
        node: &'a PipelineRunTask,
        transaction: &'a mut dyn TaskTreeTransaction,
        registry: &'a TaskRegistry,
    ) -> Self {
        Self {
            node,
            transaction,
            registry,
        }
    }

    /// Returns the run being executed.
    #[must_use]
    pub const fn run_id(&self) -> RunId {
        self.node.run_id()
    }

    /// Returns the running node's identifier.
    #[must_use]
    pub const fn node_id(&self) -> NodeId {
        self.node.id()
    }

    /// Returns the running node as it was when execution started.
    #[must_use]
    pub const fn node(&self) -> &PipelineRunTask {
        self.node
    }

    /// Returns the open transaction.
    pub fn transaction(&mut self) -> &mut dyn TaskTreeTransaction {
        &mut *self.transaction
    }

    /// Reads the run's current tree, including changes made so far.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Store`] on storage failure.
    pub fn tree(&mut self) -> Result<RunTaskTree, PipelineError> {
        Ok(self.transaction.lock_run(self.node.run_id())?)
    }

    /// Appends a child under `parent`, which must belong to this run.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::NodeNotFound`] for a parent outside the run
    /// and [`PipelineError::Registry`] for an unknown task.
    pub fn add_child(
        &mut self,
        parent: NodeId,
        definition_id: TaskDefinitionId,
    ) -> Result<PipelineRunTask, PipelineError> {
        let run_id = self.node.run_id();
        let found = self.transaction.find_node(parent)?;
        if found.is_none_or(|node| node.run_id() != run_id) {
            return Err(PipelineError::NodeNotFound(parent));
        }
        graft_child(&mut *self.transaction, self.registry, parent, definition_id)
    }

    /// Appends a child under the running node.
    ///
    /// # Errors
    ///
    /// See [`TaskContext::add_child`].
    pub fn add_subtask(
        &mut self,
        definition_id: TaskDefinitionId,
    ) -> Result<PipelineRunTask, PipelineError> {
        self.add_child(self.node.id(), definition_id)
    }

    /// Appends a sibling after the running node's last sibling.
    ///
    /// # Errors
    ///
    /// Returns [`TaskTreeDomainError::RootHasNoSiblings`] when the running
    /// node is a root, otherwise see [`TaskContext::add_child`].
    pub fn add_follow_up(
        &mut self,
        definition_id: TaskDefinitionId,
    ) -> Result<PipelineRunTask, PipelineError> {
        let parent = self
            .node
            .parent_id()
            .ok_or(TaskTreeDomainError::RootHasNoSiblings(self.node.id()))?;
        self.add_child(parent, definition_id)
    }
}
