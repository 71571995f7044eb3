//! Task node status state machine.

use super::ParseTaskStatusError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Execution status of a task node.
///
/// Scheduler transitions are `Waiting → Scheduled → Running → {Complete,
/// Failed}`. Returning to `Waiting` happens only through rework.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Not yet executed.
    Waiting,
    /// Selected by the scheduler.
    Scheduled,
    /// Executable in progress.
    Running,
    /// Finished successfully.
    Complete,
    /// Executable failed; blocks the run until reworked.
    Failed,
}

impl TaskStatus {
    /// Every status, in lifecycle order.
    pub const ALL: [Self; 5] = [
        Self::Waiting,
        Self::Scheduled,
        Self::Running,
        Self::Complete,
        Self::Failed,
    ];

    /// Returns the canonical storage representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Waiting => "waiting",
            Self::Scheduled => "scheduled",
            Self::Running => "running",
            Self::Complete => "complete",
            Self::Failed => "failed",
        }
    }

    /// Returns whether the node currently holds the run's single active slot.
    #[must_use]
    pub const fn is_active(self) -> bool {
        matches!(self, Self::Scheduled | Self::Running)
    }

    /// Returns whether the node has finished executing.
    #[must_use]
    pub const fn is_finished(self) -> bool {
        matches!(self, Self::Complete | Self::Failed)
    }

    /// Returns whether the scheduler may move a node from `self` to `target`.
    #[must_use]
    pub const fn can_transition_to(self, target: Self) -> bool {
        matches!(
            (self, target),
            (Self::Waiting, Self::Scheduled)
                | (Self::Scheduled, Self::Running)
                | (Self::Running, Self::Complete | Self::Failed)
        )
    }

    /// Returns whether a node in this status may be reworked.
    #[must_use]
    pub const fn can_rework(self) -> bool {
        !self.is_active()
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TryFrom<&str> for TaskStatus {
    type Error = ParseTaskStatusError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        let normalized = value.trim().to_ascii_lowercase();
        match normalized.as_str() {
            "waiting" => Ok(Self::Waiting),
            "scheduled" => Ok(Self::Scheduled),
            "running" => Ok(Self::Running),
            "complete" => Ok(Self::Complete),
            "failed" => Ok(Self::Failed),
            _ => Err(ParseTaskStatusError(value.to_owned())),
        }
    }
}
