//! Partial updates for task nodes.

use super::TaskStatus;
use chrono::{DateTime, Utc};
use serde_json::Value;

/// Change to apply to a nullable field.
///
/// Distinguishes "leave untouched" from "clear to null" so that partial
/// updates never overwrite fields the caller did not mention.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum FieldUpdate<T> {
    /// Keep the stored value.
    #[default]
    Unchanged,
    /// Store null.
    Clear,
    /// Store the value.
    Set(T),
}

impl<T> FieldUpdate<T> {
    /// Returns whether this update changes the field.
    #[must_use]
    pub const fn is_unchanged(&self) -> bool {
        matches!(self, Self::Unchanged)
    }

    /// Applies the update to a nullable field.
    pub fn apply_to(self, field: &mut Option<T>) {
        match self {
            Self::Unchanged => {}
            Self::Clear => *field = None,
            Self::Set(value) => *field = Some(value),
        }
    }

    /// Converts to the nested-option form used by changesets: `None` skips
    /// the column, `Some(None)` writes null.
    #[must_use]
    pub fn into_changeset(self) -> Option<Option<T>> {
        match self {
            Self::Unchanged => None,
            Self::Clear => Some(None),
            Self::Set(value) => Some(Some(value)),
        }
    }
}

impl<T> From<Option<T>> for FieldUpdate<T> {
    fn from(value: Option<T>) -> Self {
        value.map_or(Self::Clear, Self::Set)
    }
}

/// Partial update of a task node; unspecified fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NodeUpdate {
    /// New status, if changing.
    pub status: Option<TaskStatus>,
    /// Start timestamp change.
    pub started_at: FieldUpdate<DateTime<Utc>>,
    /// Completion timestamp change.
    pub completed_at: FieldUpdate<DateTime<Utc>>,
    /// Message change.
    pub message: FieldUpdate<String>,
    /// Diagnostic change.
    pub diagnostic: FieldUpdate<String>,
    /// Rendering payload change.
    pub render_payload: FieldUpdate<Value>,
}

impl NodeUpdate {
    /// Creates an update that changes nothing.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Update that only changes the status.
    #[must_use]
    pub fn status(status: TaskStatus) -> Self {
        Self::new().with_status(status)
    }

    /// Update that resets a node for rework: `Waiting` with timestamps,
    /// message, and diagnostic cleared.
    #[must_use]
    pub fn reset() -> Self {
        Self {
            status: Some(TaskStatus::Waiting),
            started_at: FieldUpdate::Clear,
            completed_at: FieldUpdate::Clear,
            message: FieldUpdate::Clear,
            diagnostic: FieldUpdate::Clear,
            render_payload: FieldUpdate::Unchanged,
        }
    }

    /// Sets the status.
    #[must_use]
    pub const fn with_status(mut self, status: TaskStatus) -> Self {
        self.status = Some(status);
        self
    }

    /// Sets the start timestamp change.
    #[must_use]
    pub fn with_started_at(mut self, update: FieldUpdate<DateTime<Utc>>) -> Self {
        self.started_at = update;
        self
    }

    /// Sets the completion timestamp change.
    #[must_use]
    pub fn with_completed_at(mut self, update: FieldUpdate<DateTime<Utc>>) -> Self {
        self.completed_at = update;
        self
    }

    /// Sets the message change.
    #[must_use]
    pub fn with_message(mut self, update: FieldUpdate<String>) -> Self {
        self.message = update;
        self
    }

    /// Sets the diagnostic change.
    #[must_use]
    pub fn with_diagnostic(mut self, update: FieldUpdate<String>) -> Self {
        self.diagnostic = update;
        self
    }

    /// Sets the rendering payload change.
    #[must_use]
    pub fn with_render_payload(mut self, update: FieldUpdate<Value>) -> Self {
        self.render_payload = update;
        self
    }

    /// Returns whether the update would change nothing.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.status.is_none()
            && self.started_at.is_unchanged()
            && self.completed_at.is_unchanged()
            && self.message.is_unchanged()
            && self.diagnostic.is_unchanged()
            && self.render_payload.is_unchanged()
    }
}
