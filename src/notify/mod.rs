//! Change notification fan-out.
//!
//! A [`NotificationChannelGroup`] owns the subscribers of one channel. The
//! first attach starts a background listener on a [`ChangeFeed`]; each change
//! key it receives is turned into a snapshot by a [`SnapshotSource`] and
//! pushed to every [`ChannelSubscriber`] registered under that key. Detaching
//! the last subscriber stops the listener, so idle channels cost nothing.
//!
//! The group is generic over the grouping key and payload, so independent
//! channels reuse the same component.

mod channel;
mod error;
mod group;
mod ports;

pub use channel::ChannelName;
pub use error::{NotifyError, NotifyResult, SubscriberError};
pub use group::{NotificationChannelGroup, SubscriptionHandle, SubscriptionId};
pub use ports::{ChangeFeed, ChangeStream, ChannelSubscriber, SnapshotSource};

#[cfg(test)]
mod tests;
