//! Lazily started fan-out of change events to keyed subscribers.

use super::{
    ChangeFeed, ChangeStream, ChannelName, ChannelSubscriber, NotifyResult, SnapshotSource,
};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Identifier of one attached subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(Uuid);

impl SubscriptionId {
    fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Returned by [`NotificationChannelGroup::attach`]; pass it back to detach.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionHandle<K> {
    id: SubscriptionId,
    key: K,
}

impl<K> SubscriptionHandle<K> {
    /// Returns the subscription identifier.
    #[must_use]
    pub const fn id(&self) -> SubscriptionId {
        self.id
    }

    /// Returns the grouping key the subscriber is filtered by.
    #[must_use]
    pub const fn key(&self) -> &K {
        &self.key
    }
}

/// Shared subscriber set for one channel with a single background listener.
///
/// The listener starts with the first attach and stops when the last
/// subscriber detaches. Each change event is turned into one snapshot per
/// key and pushed to every subscriber registered under that key. Snapshots
/// are delivered outside the subscriber-set lock, so a slow subscriber only
/// delays the broadcast it is part of.
///
/// Cloning is cheap; clones share the same subscriber set and listener.
pub struct NotificationChannelGroup<K, P> {
    shared: Arc<Shared<K, P>>,
}

impl<K, P> Clone for NotificationChannelGroup<K, P> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

struct Shared<K, P> {
    channel: ChannelName,
    feed: Arc<dyn ChangeFeed<K>>,
    snapshots: Arc<dyn SnapshotSource<K, P>>,
    state: Mutex<GroupState<K, P>>,
    // Serialises listener start-up so the feed is opened without holding
    // `state`.
    start: Mutex<()>,
    snapshot_sequence: AtomicU64,
    listener_starts: AtomicU64,
}

struct GroupState<K, P> {
    subscriptions: HashMap<SubscriptionId, Arc<Subscription<K, P>>>,
    listener: Option<ListenerHandle>,
    next_generation: u64,
}

struct ListenerHandle {
    generation: u64,
    task: JoinHandle<()>,
}

struct Subscription<K, P> {
    id: SubscriptionId,
    key: K,
    // Sends hold the lock, so a detach waits for an in-flight send and no
    // send starts afterwards.
    slot: Mutex<Slot<P>>,
}

struct Slot<P> {
    // Cleared on detach.
    subscriber: Option<Arc<dyn ChannelSubscriber<P>>>,
    // Sequence of the newest snapshot sent; older ones are dropped.
    delivered: Option<u64>,
}

impl<K, P: Sync> Subscription<K, P> {
    fn new(id: SubscriptionId, key: K, subscriber: Arc<dyn ChannelSubscriber<P>>) -> Self {
        Self {
            id,
            key,
            slot: Mutex::new(Slot {
                subscriber: Some(subscriber),
                delivered: None,
            }),
        }
    }

    /// Sends `payload` unless a snapshot computed later was already sent.
    /// Returns `false` when the subscription is closed.
    async fn deliver(&self, sequence: u64, payload: &P) -> Result<bool, super::SubscriberError> {
        let mut slot = self.slot.lock().await;
        let Some(subscriber) = slot.subscriber.clone() else {
            return Ok(false);
        };
        if slot.delivered.is_some_and(|newest| newest >= sequence) {
            debug!(subscription = %self.id, sequence, "superseded snapshot skipped");
            return Ok(true);
        }
        subscriber.send(payload).await?;
        slot.delivered = Some(sequence);
        Ok(true)
    }

    async fn close(&self) {
        self.slot.lock().await.subscriber.take();
    }
}

impl<K, P> NotificationChannelGroup<K, P>
where
    K: Clone + PartialEq + fmt::Debug + Send + Sync + 'static,
    P: Send + Sync + 'static,
{
    /// Creates a group for `channel`. No listener runs until the first
    /// attach.
    #[must_use]
    pub fn new(
        channel: ChannelName,
        feed: Arc<dyn ChangeFeed<K>>,
        snapshots: Arc<dyn SnapshotSource<K, P>>,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                channel,
                feed,
                snapshots,
                state: Mutex::new(GroupState {
                    subscriptions: HashMap::new(),
                    listener: None,
                    next_generation: 0,
                }),
                start: Mutex::new(()),
                snapshot_sequence: AtomicU64::new(0),
                listener_starts: AtomicU64::new(0),
            }),
        }
    }

    /// Returns the channel this group listens on.
    #[must_use]
    pub fn channel(&self) -> &ChannelName {
        &self.shared.channel
    }

    /// Registers `subscriber` under `key`, starting the listener if none is
    /// running.
    ///
    /// The listener is running when this returns. While the feed is being
    /// opened, other attaches wait for it; detaches and broadcasts do not.
    ///
    /// # Errors
    ///
    /// Returns the feed's error when the listener cannot be started; the
    /// subscriber is not registered in that case.
    pub async fn attach(
        &self,
        key: K,
        subscriber: Arc<dyn ChannelSubscriber<P>>,
    ) -> NotifyResult<SubscriptionHandle<K>> {
        let _starting = self.shared.start.lock().await;
        let mut state = self.shared.state.lock().await;
        if state.listener.is_none() {
            drop(state);
            let stream = self.shared.feed.listen(&self.shared.channel).await?;
            state = self.shared.state.lock().await;
            let generation = state.next_generation;
            state.next_generation = generation.wrapping_add(1);
            let task = tokio::spawn(listen(Arc::clone(&self.shared), stream, generation));
            state.listener = Some(ListenerHandle { generation, task });
            self.shared.listener_starts.fetch_add(1, Ordering::Relaxed);
            info!(channel = %self.shared.channel, generation, "change listener started");
        }

        let id = SubscriptionId::new();
        state
            .subscriptions
            .insert(id, Arc::new(Subscription::new(id, key.clone(), subscriber)));
        debug!(channel = %self.shared.channel, subscription = %id, ?key, "subscriber attached");
        Ok(SubscriptionHandle { id, key })
    }

    /// Removes a subscriber, stopping the listener when it was the last one.
    ///
    /// Once this returns, the subscriber receives no further sends. Returns
    /// `false` when the subscription was already gone.
    pub async fn detach(&self, handle: &SubscriptionHandle<K>) -> bool {
        let (removed, listener) = {
            let mut state = self.shared.state.lock().await;
            let removed = state.subscriptions.remove(&handle.id);
            let listener = if state.subscriptions.is_empty() {
                state.listener.take()
            } else {
                None
            };
            (removed, listener)
        };

        if let Some(stopped) = listener {
            stopped.task.abort();
            info!(
                channel = %self.shared.channel,
                generation = stopped.generation,
                "change listener stopped"
            );
        }

        match removed {
            Some(subscription) => {
                subscription.close().await;
                debug!(channel = %self.shared.channel, subscription = %handle.id, "subscriber detached");
                true
            }
            None => false,
        }
    }

    /// Computes a fresh snapshot for the handle's key and sends it to that
    /// subscriber only.
    ///
    /// Newly attached subscribers call this so they do not depend on the
    /// first pushed event. A broadcast whose snapshot was computed later
    /// wins, so this never overwrites newer state. Returns `false` when the
    /// subscription is no longer attached.
    ///
    /// # Errors
    ///
    /// Returns the snapshot error, or the subscriber's send error after
    /// detaching it.
    pub async fn push_snapshot(&self, handle: &SubscriptionHandle<K>) -> NotifyResult<bool> {
        let subscription = {
            let state = self.shared.state.lock().await;
            state.subscriptions.get(&handle.id).cloned()
        };
        let Some(target) = subscription else {
            return Ok(false);
        };
        let sequence = self.shared.next_sequence();
        let payload = self.shared.snapshots.snapshot(&target.key).await?;
        match target.deliver(sequence, &payload).await {
            Ok(delivered) => Ok(delivered),
            Err(err) => {
                warn!(channel = %self.shared.channel, subscription = %handle.id, error = %err, "initial snapshot send failed");
                self.detach(handle).await;
                Err(err.into())
            }
        }
    }

    /// Returns whether a background listener is running.
    pub async fn is_listening(&self) -> bool {
        self.shared.state.lock().await.listener.is_some()
    }

    /// Returns the number of attached subscribers.
    pub async fn subscriber_count(&self) -> usize {
        self.shared.state.lock().await.subscriptions.len()
    }

    /// Returns how many times a listener has been started.
    #[must_use]
    pub fn listener_starts(&self) -> u64 {
        self.shared.listener_starts.load(Ordering::Relaxed)
    }
}

async fn listen<K, P>(shared: Arc<Shared<K, P>>, mut stream: Box<dyn ChangeStream<K>>, generation: u64)
where
    K: Clone + PartialEq + fmt::Debug + Send + Sync + 'static,
    P: Send + Sync + 'static,
{
    loop {
        match stream.next_change().await {
            Ok(Some(key)) => {
                if !shared.broadcast(&key, generation).await {
                    debug!(channel = %shared.channel, generation, "no subscribers left; listener exiting");
                    return;
                }
            }
            Ok(None) => {
                info!(channel = %shared.channel, generation, "change feed closed");
                break;
            }
            Err(err) => {
                warn!(channel = %shared.channel, generation, error = %err, "change feed failed");
                break;
            }
        }
    }
    shared.release_listener(generation).await;
}

impl<K, P> Shared<K, P>
where
    K: Clone + PartialEq + fmt::Debug + Send + Sync + 'static,
    P: Send + Sync + 'static,
{
    /// Numbers a snapshot before it is computed; a higher number never
    /// reflects older state.
    fn next_sequence(&self) -> u64 {
        self.snapshot_sequence.fetch_add(1, Ordering::SeqCst)
    }

    /// Pushes one snapshot to every subscriber of `key`. Returns `false`
    /// when dropping failed subscribers emptied the group.
    async fn broadcast(&self, key: &K, generation: u64) -> bool {
        let targets: Vec<Arc<Subscription<K, P>>> = {
            let state = self.state.lock().await;
            state
                .subscriptions
                .values()
                .filter(|subscription| subscription.key == *key)
                .cloned()
                .collect()
        };
        if targets.is_empty() {
            debug!(channel = %self.channel, ?key, "change has no subscribers");
            return true;
        }

        let sequence = self.next_sequence();
        let payload = match self.snapshots.snapshot(key).await {
            Ok(payload) => payload,
            Err(err) => {
                warn!(channel = %self.channel, ?key, error = %err, "snapshot failed; change skipped");
                return true;
            }
        };

        let mut failed = Vec::new();
        for target in &targets {
            if let Err(err) = target.deliver(sequence, &payload).await {
                warn!(
                    channel = %self.channel,
                    subscription = %target.id,
                    error = %err,
                    "subscriber send failed; detaching"
                );
                failed.push(Arc::clone(target));
            }
        }
        debug!(channel = %self.channel, ?key, recipients = targets.len(), "change broadcast");

        if failed.is_empty() {
            return true;
        }
        self.drop_failed(&failed, generation).await
    }

    async fn drop_failed(&self, failed: &[Arc<Subscription<K, P>>], generation: u64) -> bool {
        let remaining = {
            let mut state = self.state.lock().await;
            for subscription in failed {
                state.subscriptions.remove(&subscription.id);
            }
            if state.subscriptions.is_empty()
                && state
                    .listener
                    .as_ref()
                    .is_some_and(|listener| listener.generation == generation)
            {
                state.listener = None;
                false
            } else {
                true
            }
        };
        for subscription in failed {
            subscription.close().await;
        }
        if !remaining {
            info!(channel = %self.channel, generation, "change listener stopped");
        }
        remaining
    }

    async fn release_listener(&self, generation: u64) {
        let mut state = self.state.lock().await;
        if state
            .listener
            .as_ref()
            .is_some_and(|listener| listener.generation == generation)
        {
            state.listener = None;
        }
    }
}
