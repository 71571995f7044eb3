//! Persistence port for run task trees.

use crate::pipeline::domain::{
    NewPipelineRunTask, NodeId, NodeUpdate, PipelineRunTask, RunId, RunTaskTree,
};
use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;

/// Result type for task tree store operations.
pub type TaskTreeStoreResult<T> = Result<T, TaskTreeStoreError>;

/// Transactional task tree storage.
///
/// Every mutation committed through [`TaskTreeStore::transaction`] emits one
/// change event per affected run, atomically with the commit.
#[async_trait]
pub trait TaskTreeStore: Send + Sync {
    /// Runs `work` inside one transaction on a blocking-capable thread.
    ///
    /// The transaction commits when `work` returns `Ok` and rolls back when
    /// it returns `Err`.
    ///
    /// # Errors
    ///
    /// Returns the error produced by `work`, or a
    /// [`TaskTreeStoreError::Persistence`] converted into `E` when the
    /// transaction cannot be opened or committed.
    async fn transaction<T, E, F>(&self, work: F) -> Result<T, E>
    where
        F: FnOnce(&mut dyn TaskTreeTransaction) -> Result<T, E> + Send + 'static,
        T: Send + 'static,
        E: From<TaskTreeStoreError> + Send + 'static;

    /// Reads a run's nodes without locking.
    async fn load_run(&self, run_id: RunId) -> TaskTreeStoreResult<RunTaskTree>;

    /// Finds a node without locking.
    async fn find_node(&self, node_id: NodeId) -> TaskTreeStoreResult<Option<PipelineRunTask>>;
}

/// Unit of work handed to [`TaskTreeStore::transaction`] callbacks.
pub trait TaskTreeTransaction {
    /// Takes the run's exclusive lock and returns its nodes.
    ///
    /// Concurrent transactions locking the same run wait until this one
    /// finishes, which serialises scheduling and rework per run.
    ///
    /// # Errors
    ///
    /// Returns [`TaskTreeStoreError::Persistence`] on backend failure.
    fn lock_run(&mut self, run_id: RunId) -> TaskTreeStoreResult<RunTaskTree>;

    /// Reads a node inside the transaction.
    ///
    /// # Errors
    ///
    /// Returns [`TaskTreeStoreError::Persistence`] on backend failure.
    fn find_node(&mut self, node_id: NodeId) -> TaskTreeStoreResult<Option<PipelineRunTask>>;

    /// Inserts a `Waiting` node and returns it with its assigned identifier.
    ///
    /// # Errors
    ///
    /// Returns [`TaskTreeStoreError::DuplicateSiblingOrder`] when the parent
    /// already has a child at that order.
    fn insert_node(&mut self, node: NewPipelineRunTask) -> TaskTreeStoreResult<PipelineRunTask>;

    /// Applies a partial update and returns the updated node.
    ///
    /// # Errors
    ///
    /// Returns [`TaskTreeStoreError::NodeNotFound`] when the node does not
    /// exist, and [`TaskTreeStoreError::ConcurrentActivation`] when the
    /// update would leave two active nodes in the run.
    fn update_node(
        &mut self,
        node_id: NodeId,
        update: NodeUpdate,
    ) -> TaskTreeStoreResult<PipelineRunTask>;

    /// Deletes the given nodes and returns how many were removed.
    ///
    /// # Errors
    ///
    /// Returns [`TaskTreeStoreError::Persistence`] on backend failure.
    fn delete_nodes(&mut self, node_ids: &[NodeId]) -> TaskTreeStoreResult<usize>;

    /// Opens a savepoint nested in the transaction.
    ///
    /// # Errors
    ///
    /// Returns [`TaskTreeStoreError::Persistence`] on backend failure.
    fn begin_savepoint(&mut self) -> TaskTreeStoreResult<()>;

    /// Discards changes made since the latest savepoint.
    ///
    /// # Errors
    ///
    /// Returns [`TaskTreeStoreError::NoSavepoint`] when none is open.
    fn rollback_savepoint(&mut self) -> TaskTreeStoreResult<()>;

    /// Keeps changes made since the latest savepoint and closes it.
    ///
    /// # Errors
    ///
    /// Returns [`TaskTreeStoreError::NoSavepoint`] when none is open.
    fn release_savepoint(&mut self) -> TaskTreeStoreResult<()>;
}

/// Errors returned by task tree store implementations.
#[derive(Debug, Clone, Error)]
pub enum TaskTreeStoreError {
    /// The node does not exist.
    #[error("task node not found: {0}")]
    NodeNotFound(NodeId),

    /// A sibling with the same order already exists under the parent.
    #[error("sibling order {order} already used under parent {parent:?} in run {run_id}")]
    DuplicateSiblingOrder {
        /// Run being modified.
        run_id: RunId,
        /// Parent node, `None` for roots.
        parent: Option<NodeId>,
        /// Conflicting order.
        order: u32,
    },

    /// Another node of the run is already scheduled or running.
    #[error("run {0} already has a scheduled or running node")]
    ConcurrentActivation(RunId),

    /// A savepoint operation was requested with none open.
    #[error("no open savepoint")]
    NoSavepoint,

    /// Persisted data could not be reconstructed into domain types.
    #[error("invalid persisted data: {0}")]
    InvalidPersistedData(Arc<dyn std::error::Error + Send + Sync>),

    /// Persistence-layer failure.
    #[error("persistence error: {0}")]
    Persistence(Arc<dyn std::error::Error + Send + Sync>),
}

impl TaskTreeStoreError {
    /// Wraps a data-quality or deserialization error from persisted rows.
    pub fn invalid_persisted_data(err: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self::InvalidPersistedData(Arc::new(err))
    }

    /// Wraps a persistence error.
    pub fn persistence(err: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self::Persistence(Arc::new(err))
    }
}
