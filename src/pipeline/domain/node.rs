//! Task tree node aggregate.

use super::{NodeId, NodeUpdate, RunId, SiblingOrder, TaskStatus, TaskTreeDomainError};
use crate::registry::{TaskDefinitionId, WorkflowStage};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A node in a run's task tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineRunTask {
    id: NodeId,
    run_id: RunId,
    definition_id: TaskDefinitionId,
    parent_id: Option<NodeId>,
    sibling_order: SiblingOrder,
    stage: WorkflowStage,
    status: TaskStatus,
    started_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
    message: Option<String>,
    diagnostic: Option<String>,
    render_payload: Option<Value>,
}

/// Parameter object for reconstructing a persisted node.
#[derive(Debug, Clone, PartialEq)]
pub struct PersistedNodeData {
    /// Persisted node identifier.
    pub id: NodeId,
    /// Owning run.
    pub run_id: RunId,
    /// Registered task this node executes.
    pub definition_id: TaskDefinitionId,
    /// Parent node; `None` for the root.
    pub parent_id: Option<NodeId>,
    /// Position among siblings.
    pub sibling_order: SiblingOrder,
    /// Workflow stage inherited from the parent.
    pub stage: WorkflowStage,
    /// Current status.
    pub status: TaskStatus,
    /// Start timestamp.
    pub started_at: Option<DateTime<Utc>>,
    /// Completion timestamp.
    pub completed_at: Option<DateTime<Utc>>,
    /// Human-readable outcome message.
    pub message: Option<String>,
    /// Failure diagnostic.
    pub diagnostic: Option<String>,
    /// Opaque rendering payload.
    pub render_payload: Option<Value>,
}

/// Values for inserting a new `Waiting` node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewPipelineRunTask {
    /// Owning run.
    pub run_id: RunId,
    /// Registered task to execute.
    pub definition_id: TaskDefinitionId,
    /// Parent node; `None` only for a run's seed root.
    pub parent_id: Option<NodeId>,
    /// Position among siblings.
    pub sibling_order: SiblingOrder,
    /// Workflow stage.
    pub stage: WorkflowStage,
}

impl NewPipelineRunTask {
    /// Values for the single root of a newly seeded run.
    #[must_use]
    pub const fn root(run_id: RunId, definition_id: TaskDefinitionId, stage: WorkflowStage) -> Self {
        Self {
            run_id,
            definition_id,
            parent_id: None,
            sibling_order: SiblingOrder::FIRST,
            stage,
        }
    }

    /// Values for a child appended under `parent`, inheriting its run and
    /// stage.
    #[must_use]
    pub fn child_of(
        parent: &PipelineRunTask,
        definition_id: TaskDefinitionId,
        sibling_order: SiblingOrder,
    ) -> Self {
        Self {
            run_id: parent.run_id,
            definition_id,
            parent_id: Some(parent.id),
            sibling_order,
            stage: parent.stage.clone(),
        }
    }

    /// Materialises the node once storage has assigned an identifier.
    #[must_use]
    pub fn into_node(self, id: NodeId) -> PipelineRunTask {
        PipelineRunTask {
            id,
            run_id: self.run_id,
            definition_id: self.definition_id,
            parent_id: self.parent_id,
            sibling_order: self.sibling_order,
            stage: self.stage,
            status: TaskStatus::Waiting,
            started_at: None,
            completed_at: None,
            message: None,
            diagnostic: None,
            render_payload: None,
        }
    }
}

impl PipelineRunTask {
    /// Reconstructs a node from persisted storage.
    #[must_use]
    pub fn from_persisted(data: PersistedNodeData) -> Self {
        Self {
            id: data.id,
            run_id: data.run_id,
            definition_id: data.definition_id,
            parent_id: data.parent_id,
            sibling_order: data.sibling_order,
            stage: data.stage,
            status: data.status,
            started_at: data.started_at,
            completed_at: data.completed_at,
            message: data.message,
            diagnostic: data.diagnostic,
            render_payload: data.render_payload,
        }
    }

    /// Returns the node identifier.
    #[must_use]
    pub const fn id(&self) -> NodeId {
        self.id
    }

    /// Returns the owning run.
    #[must_use]
    pub const fn run_id(&self) -> RunId {
        self.run_id
    }

    /// Returns the registered task identifier.
    #[must_use]
    pub const fn definition_id(&self) -> TaskDefinitionId {
        self.definition_id
    }

    /// Returns the parent node, or `None` for a root.
    #[must_use]
    pub const fn parent_id(&self) -> Option<NodeId> {
        self.parent_id
    }

    /// Returns whether the node is a root.
    #[must_use]
    pub const fn is_root(&self) -> bool {
        self.parent_id.is_none()
    }

    /// Returns the position among siblings.
    #[must_use]
    pub const fn sibling_order(&self) -> SiblingOrder {
        self.sibling_order
    }

    /// Returns the workflow stage.
    #[must_use]
    pub const fn stage(&self) -> &WorkflowStage {
        &self.stage
    }

    /// Returns the status.
    #[must_use]
    pub const fn status(&self) -> TaskStatus {
        self.status
    }

    /// Returns the start timestamp.
    #[must_use]
    pub const fn started_at(&self) -> Option<DateTime<Utc>> {
        self.started_at
    }

    /// Returns the completion timestamp.
    #[must_use]
    pub const fn completed_at(&self) -> Option<DateTime<Utc>> {
        self.completed_at
    }

    /// Returns the outcome message.
    #[must_use]
    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    /// Returns the failure diagnostic.
    #[must_use]
    pub fn diagnostic(&self) -> Option<&str> {
        self.diagnostic.as_deref()
    }

    /// Returns the rendering payload.
    #[must_use]
    pub const fn render_payload(&self) -> Option<&Value> {
        self.render_payload.as_ref()
    }

    /// Checks that a scheduler transition to `target` is allowed.
    ///
    /// # Errors
    ///
    /// Returns [`TaskTreeDomainError::InvalidStatusTransition`] otherwise.
    pub const fn ensure_transition(&self, target: TaskStatus) -> Result<(), TaskTreeDomainError> {
        if self.status.can_transition_to(target) {
            return Ok(());
        }
        Err(TaskTreeDomainError::InvalidStatusTransition {
            node_id: self.id,
            from: self.status,
            to: target,
        })
    }

    /// Applies a partial update in place. Only supplied fields change.
    pub fn apply(&mut self, update: NodeUpdate) {
        let NodeUpdate {
            status,
            started_at,
            completed_at,
            message,
            diagnostic,
            render_payload,
        } = update;
        if let Some(new_status) = status {
            self.status = new_status;
        }
        started_at.apply_to(&mut self.started_at);
        completed_at.apply_to(&mut self.completed_at);
        message.apply_to(&mut self.message);
        diagnostic.apply_to(&mut self.diagnostic);
        render_payload.apply_to(&mut self.render_payload);
    }
}
