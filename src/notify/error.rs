//! Error types for change feeds and channel groups.

use std::sync::Arc;
use thiserror::Error;

/// Result type for notification operations.
pub type NotifyResult<T> = Result<T, NotifyError>;

/// Errors raised while listening for changes or computing snapshots.
#[derive(Debug, Clone, Error)]
pub enum NotifyError {
    /// Channel names are lowercase identifiers of at most 63 bytes.
    #[error("invalid channel name '{0}'")]
    InvalidChannelName(String),

    /// The feed does not publish on this channel.
    #[error("unknown channel '{0}'")]
    UnknownChannel(String),

    /// The change feed failed to start or broke while listening.
    #[error("change feed error: {0}")]
    Feed(Arc<dyn std::error::Error + Send + Sync>),

    /// The snapshot for a key could not be computed.
    #[error("snapshot error: {0}")]
    Snapshot(Arc<dyn std::error::Error + Send + Sync>),

    /// The subscriber rejected a direct push and was detached.
    #[error(transparent)]
    Subscriber(#[from] SubscriberError),
}

impl NotifyError {
    /// Wraps a change feed failure.
    pub fn feed(err: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self::Feed(Arc::new(err))
    }

    /// Wraps a snapshot failure.
    pub fn snapshot(err: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self::Snapshot(Arc::new(err))
    }
}

/// Failure reported by a subscriber's send operation.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("subscriber send failed: {reason}")]
pub struct SubscriberError {
    reason: String,
}

impl SubscriberError {
    /// Creates a send failure with a human-readable reason.
    #[must_use]
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }

    /// Returns the failure reason.
    #[must_use]
    pub fn reason(&self) -> &str {
        &self.reason
    }
}
