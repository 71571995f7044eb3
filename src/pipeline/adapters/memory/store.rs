//! In-memory task tree store for tests and local runs.

use super::InMemoryTreeChangeFeed;
use crate::pipeline::{
    domain::{
        NewPipelineRunTask, NodeId, NodeUpdate, PipelineRunTask, RunId, RunTaskTree, TaskStatus,
    },
    ports::{TaskTreeStore, TaskTreeStoreError, TaskTreeStoreResult, TaskTreeTransaction},
};
use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::broadcast;

const CHANGE_BUFFER: usize = 1024;

/// Thread-safe in-memory task tree store.
///
/// A transaction holds the store-wide lock from start to commit, so
/// transactions are fully serialised rather than per run. Committed
/// transactions publish each touched run id on an in-process broadcast
/// channel, read through [`InMemoryTaskTreeStore::change_feed`].
#[derive(Debug, Clone)]
pub struct InMemoryTaskTreeStore {
    state: Arc<Mutex<MemoryState>>,
    changes: broadcast::Sender<RunId>,
}

#[derive(Debug, Clone, Default)]
struct MemoryState {
    nodes: BTreeMap<NodeId, PipelineRunTask>,
    next_id: i64,
}

impl Default for InMemoryTaskTreeStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryTaskTreeStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        let (changes, _initial) = broadcast::channel(CHANGE_BUFFER);
        Self {
            state: Arc::new(Mutex::new(MemoryState::default())),
            changes,
        }
    }

    /// Returns a change feed publishing the run ids touched by each commit.
    #[must_use]
    pub fn change_feed(&self) -> InMemoryTreeChangeFeed {
        InMemoryTreeChangeFeed::new(self.changes.clone())
    }

    fn read(&self) -> TaskTreeStoreResult<MutexGuard<'_, MemoryState>> {
        self.state.lock().map_err(|err| poisoned(&err))
    }
}

fn poisoned(err: &impl std::fmt::Display) -> TaskTreeStoreError {
    TaskTreeStoreError::persistence(std::io::Error::other(err.to_string()))
}

#[async_trait]
impl TaskTreeStore for InMemoryTaskTreeStore {
    async fn transaction<T, E, F>(&self, work: F) -> Result<T, E>
    where
        F: FnOnce(&mut dyn TaskTreeTransaction) -> Result<T, E> + Send + 'static,
        T: Send + 'static,
        E: From<TaskTreeStoreError> + Send + 'static,
    {
        let state = Arc::clone(&self.state);
        let changes = self.changes.clone();
        let outcome = tokio::task::spawn_blocking(move || {
            let mut guard = state.lock().map_err(|err| E::from(poisoned(&err)))?;
            let mut transaction = MemoryTransaction::begin(&guard);
            let value = work(&mut transaction)?;
            let touched = transaction.commit(&mut guard);
            drop(guard);
            for run_id in touched {
                // No receivers just means nobody is listening.
                let _unobserved = changes.send(run_id);
            }
            Ok(value)
        })
        .await;
        outcome.map_err(|err| E::from(TaskTreeStoreError::persistence(err)))?
    }

    async fn load_run(&self, run_id: RunId) -> TaskTreeStoreResult<RunTaskTree> {
        let state = self.read()?;
        Ok(RunTaskTree::new(run_id, state.nodes.values().cloned()))
    }

    async fn find_node(&self, node_id: NodeId) -> TaskTreeStoreResult<Option<PipelineRunTask>> {
        let state = self.read()?;
        Ok(state.nodes.get(&node_id).cloned())
    }
}

/// Working copy of the store; applied on commit, dropped on rollback.
struct MemoryTransaction {
    working: MemoryState,
    touched: BTreeSet<RunId>,
    savepoints: Vec<(MemoryState, BTreeSet<RunId>)>,
}

impl MemoryTransaction {
    fn begin(state: &MemoryState) -> Self {
        Self {
            working: state.clone(),
            touched: BTreeSet::new(),
            savepoints: Vec::new(),
        }
    }

    fn commit(self, state: &mut MemoryState) -> BTreeSet<RunId> {
        *state = self.working;
        self.touched
    }

    fn run_nodes(&self, run_id: RunId) -> impl Iterator<Item = &PipelineRunTask> {
        self.working
            .nodes
            .values()
            .filter(move |node| node.run_id() == run_id)
    }
}

impl TaskTreeTransaction for MemoryTransaction {
    fn lock_run(&mut self, run_id: RunId) -> TaskTreeStoreResult<RunTaskTree> {
        Ok(RunTaskTree::new(run_id, self.run_nodes(run_id).cloned()))
    }

    fn find_node(&mut self, node_id: NodeId) -> TaskTreeStoreResult<Option<PipelineRunTask>> {
        Ok(self.working.nodes.get(&node_id).cloned())
    }

    fn insert_node(&mut self, node: NewPipelineRunTask) -> TaskTreeStoreResult<PipelineRunTask> {
        let conflict = self.run_nodes(node.run_id).any(|existing| {
            existing.parent_id() == node.parent_id
                && existing.sibling_order() == node.sibling_order
        });
        if conflict {
            return Err(TaskTreeStoreError::DuplicateSiblingOrder {
                run_id: node.run_id,
                parent: node.parent_id,
                order: node.sibling_order.value(),
            });
        }

        self.working.next_id += 1;
        let inserted = node.into_node(NodeId::new(self.working.next_id));
        self.touched.insert(inserted.run_id());
        self.working.nodes.insert(inserted.id(), inserted.clone());
        Ok(inserted)
    }

    fn update_node(
        &mut self,
        node_id: NodeId,
        update: NodeUpdate,
    ) -> TaskTreeStoreResult<PipelineRunTask> {
        let mut updated = self
            .working
            .nodes
            .get(&node_id)
            .cloned()
            .ok_or(TaskTreeStoreError::NodeNotFound(node_id))?;
        if update.is_empty() {
            return Ok(updated);
        }
        updated.apply(update);

        let run_id = updated.run_id();
        if updated.status().is_active()
            && self
                .run_nodes(run_id)
                .any(|other| other.id() != node_id && other.status().is_active())
        {
            return Err(TaskTreeStoreError::ConcurrentActivation(run_id));
        }

        self.touched.insert(run_id);
        self.working.nodes.insert(node_id, updated.clone());
        Ok(updated)
    }

    fn delete_nodes(&mut self, node_ids: &[NodeId]) -> TaskTreeStoreResult<usize> {
        let mut deleted = 0;
        for node_id in node_ids {
            if let Some(removed) = self.working.nodes.remove(node_id) {
                self.touched.insert(removed.run_id());
                deleted += 1;
            }
        }
        Ok(deleted)
    }

    fn begin_savepoint(&mut self) -> TaskTreeStoreResult<()> {
        self.savepoints
            .push((self.working.clone(), self.touched.clone()));
        Ok(())
    }

    fn rollback_savepoint(&mut self) -> TaskTreeStoreResult<()> {
        let (working, touched) = self
            .savepoints
            .pop()
            .ok_or(TaskTreeStoreError::NoSavepoint)?;
        self.working = working;
        self.touched = touched;
        Ok(())
    }

    fn release_savepoint(&mut self) -> TaskTreeStoreResult<()> {
        self.savepoints
            .pop()
            .map(|_released| ())
            .ok_or(TaskTreeStoreError::NoSavepoint)
    }
}
