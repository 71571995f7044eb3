//! Subscriber endpoint for task tree changes.

use crate::notify::{
    ChangeFeed, ChannelSubscriber, NotificationChannelGroup, NotifyError, NotifyResult,
    SnapshotSource, SubscriptionHandle,
};
use crate::pipeline::{
    TASK_TREE_CHANNEL,
    domain::{OrderedTask, RunId},
    ports::TaskTreeStore,
};
use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;

/// Ordered view of one run, as pushed to watchers.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TaskTreeSnapshot {
    /// The run.
    pub run_id: RunId,
    /// Nodes in pre-order; empty for a run without nodes.
    pub tasks: Vec<OrderedTask>,
}

/// Reads snapshots from a task tree store.
#[derive(Debug)]
pub struct TaskTreeSnapshots<S> {
    store: Arc<S>,
}

impl<S> TaskTreeSnapshots<S> {
    /// Creates a snapshot source over `store`.
    #[must_use]
    pub const fn new(store: Arc<S>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl<S> SnapshotSource<RunId, TaskTreeSnapshot> for TaskTreeSnapshots<S>
where
    S: TaskTreeStore + 'static,
{
    async fn snapshot(&self, key: &RunId) -> NotifyResult<TaskTreeSnapshot> {
        let tree = self
            .store
            .load_run(*key)
            .await
            .map_err(NotifyError::snapshot)?;
        Ok(TaskTreeSnapshot {
            run_id: *key,
            tasks: tree.ordered(),
        })
    }
}

/// Attach and detach point for clients watching runs.
///
/// Every attach is followed by an immediate snapshot push, so a client sees
/// the current tree even if a change lands before the listener is ready.
#[derive(Clone)]
pub struct TaskTreeWatch {
    group: NotificationChannelGroup<RunId, TaskTreeSnapshot>,
}

impl TaskTreeWatch {
    /// Creates the endpoint for the task tree channel.
    #[must_use]
    pub fn new<S>(store: Arc<S>, feed: Arc<dyn ChangeFeed<RunId>>) -> Self
    where
        S: TaskTreeStore + 'static,
    {
        let snapshots: Arc<dyn SnapshotSource<RunId, TaskTreeSnapshot>> =
            Arc::new(TaskTreeSnapshots::new(store));
        Self {
            group: NotificationChannelGroup::new(TASK_TREE_CHANNEL, feed, snapshots),
        }
    }

    /// Attaches a subscriber to `run_id` and pushes the current snapshot.
    ///
    /// # Errors
    ///
    /// Returns the feed error when the listener cannot start, or the
    /// snapshot or send error from the initial push; the subscriber is
    /// detached in that case.
    pub async fn attach(
        &self,
        run_id: RunId,
        subscriber: Arc<dyn ChannelSubscriber<TaskTreeSnapshot>>,
    ) -> NotifyResult<SubscriptionHandle<RunId>> {
        let handle = self.group.attach(run_id, subscriber).await?;
        if let Err(err) = self.group.push_snapshot(&handle).await {
            self.group.detach(&handle).await;
            return Err(err);
        }
        Ok(handle)
    }

    /// Detaches a subscriber. Returns `false` if it was already gone.
    pub async fn detach(&self, handle: &SubscriptionHandle<RunId>) -> bool {
        self.group.detach(handle).await
    }

    /// Returns the underlying channel group.
    #[must_use]
    pub const fn group(&self) -> &NotificationChannelGroup<RunId, TaskTreeSnapshot> {
        &self.group
    }
}
