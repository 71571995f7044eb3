//! Port contracts for change feeds, snapshots, and subscribers.

use super::{ChannelName, NotifyResult, SubscriberError};
use async_trait::async_trait;

/// Source of change events carrying keys.
///
/// Implementations emit one key per committed change; consumers recompute
/// state from the key rather than trusting any payload.
#[async_trait]
pub trait ChangeFeed<K>: Send + Sync {
    /// Starts listening on `channel`.
    ///
    /// Changes committed after this returns are delivered by the stream.
    ///
    /// # Errors
    ///
    /// Returns [`super::NotifyError::UnknownChannel`] when the feed does not
    /// publish on `channel`, or [`super::NotifyError::Feed`] when the
    /// listener cannot be established.
    async fn listen(&self, channel: &ChannelName) -> NotifyResult<Box<dyn ChangeStream<K>>>;
}

/// Stream of change keys produced by a [`ChangeFeed`].
#[async_trait]
pub trait ChangeStream<K>: Send {
    /// Waits for the next change key. `Ok(None)` means the feed closed.
    ///
    /// # Errors
    ///
    /// Returns [`super::NotifyError::Feed`] when the listener breaks.
    async fn next_change(&mut self) -> NotifyResult<Option<K>>;
}

/// Computes the current snapshot for a key.
#[async_trait]
pub trait SnapshotSource<K, P>: Send + Sync {
    /// Reads the latest state for `key`.
    ///
    /// # Errors
    ///
    /// Returns [`super::NotifyError::Snapshot`] when the state cannot be
    /// read.
    async fn snapshot(&self, key: &K) -> NotifyResult<P>;
}

/// Receiver of snapshots pushed by a channel group.
#[async_trait]
pub trait ChannelSubscriber<P>: Send + Sync {
    /// Delivers one snapshot.
    ///
    /// # Errors
    ///
    /// Returns [`SubscriberError`] when the subscriber can no longer
    /// receive; the group then detaches it.
    async fn send(&self, payload: &P) -> Result<(), SubscriberError>;
}
