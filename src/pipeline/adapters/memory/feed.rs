//! In-process change feed for the in-memory store.

use crate::notify::{ChangeFeed, ChangeStream, ChannelName, NotifyError, NotifyResult};
use crate::pipeline::{TASK_TREE_CHANNEL, domain::RunId};
use async_trait::async_trait;
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::warn;

/// Change feed backed by the store's commit broadcast.
#[derive(Debug, Clone)]
pub struct InMemoryTreeChangeFeed {
    changes: broadcast::Sender<RunId>,
}

impl InMemoryTreeChangeFeed {
    pub(super) const fn new(changes: broadcast::Sender<RunId>) -> Self {
        Self { changes }
    }
}

#[async_trait]
impl ChangeFeed<RunId> for InMemoryTreeChangeFeed {
    async fn listen(&self, channel: &ChannelName) -> NotifyResult<Box<dyn ChangeStream<RunId>>> {
        if *channel != TASK_TREE_CHANNEL {
            return Err(NotifyError::UnknownChannel(channel.to_string()));
        }
        Ok(Box::new(InMemoryChangeStream {
            receiver: self.changes.subscribe(),
        }))
    }
}

struct InMemoryChangeStream {
    receiver: broadcast::Receiver<RunId>,
}

#[async_trait]
impl ChangeStream<RunId> for InMemoryChangeStream {
    async fn next_change(&mut self) -> NotifyResult<Option<RunId>> {
        loop {
            match self.receiver.recv().await {
                Ok(run_id) => return Ok(Some(run_id)),
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "change stream lagged; events dropped");
                }
                Err(RecvError::Closed) => return Ok(None),
            }
        }
    }
}
