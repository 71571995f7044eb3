//! Task definition metadata.

use super::RegistryError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier of a task definition in the registry catalog.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskDefinitionId(i32);

impl TaskDefinitionId {
    /// Wraps a raw catalog identifier.
    #[must_use]
    pub const fn new(value: i32) -> Self {
        Self(value)
    }

    /// Returns the raw identifier.
    #[must_use]
    pub const fn value(self) -> i32 {
        self.0
    }
}

impl fmt::Display for TaskDefinitionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Workflow stage a task is intended to run in (for example `collection`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorkflowStage(String);

impl WorkflowStage {
    /// Longest stage name accepted by the persisted schema.
    const MAX_LENGTH: usize = 100;

    /// Creates a validated workflow stage name.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::InvalidWorkflowStage`] when the value is empty
    /// after trimming or exceeds 100 characters.
    pub fn new(value: impl Into<String>) -> Result<Self, RegistryError> {
        let raw = value.into();
        let trimmed = raw.trim();
        if trimmed.is_empty() || trimmed.chars().count() > Self::MAX_LENGTH {
            return Err(RegistryError::InvalidWorkflowStage(raw));
        }
        Ok(Self(trimmed.to_owned()))
    }

    /// Returns the stage name.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl AsRef<str> for WorkflowStage {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}

impl fmt::Display for WorkflowStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// How a task is carried out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    /// Executed automatically by the scheduler.
    System,
    /// Records a human acknowledgement.
    User,
}

impl TaskKind {
    /// Returns the canonical string representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::System => "system",
            Self::User => "user",
        }
    }
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Descriptive metadata for a registered task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskDefinition {
    id: TaskDefinitionId,
    name: String,
    description: String,
    stage: WorkflowStage,
    kind: TaskKind,
}

impl TaskDefinition {
    /// Creates task metadata.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::EmptyTaskName`] when the display name is blank.
    pub fn new(
        id: TaskDefinitionId,
        name: impl Into<String>,
        description: impl Into<String>,
        stage: WorkflowStage,
        kind: TaskKind,
    ) -> Result<Self, RegistryError> {
        let name_value = name.into();
        let trimmed_name = name_value.trim();
        if trimmed_name.is_empty() {
            return Err(RegistryError::EmptyTaskName(id));
        }
        Ok(Self {
            id,
            name: trimmed_name.to_owned(),
            description: description.into().trim().to_owned(),
            stage,
            kind,
        })
    }

    /// Returns the definition identifier.
    #[must_use]
    pub const fn id(&self) -> TaskDefinitionId {
        self.id
    }

    /// Returns the display name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the description.
    #[must_use]
    pub fn description(&self) -> &str {
        &self.description
    }

    /// Returns the intended workflow stage.
    #[must_use]
    pub const fn stage(&self) -> &WorkflowStage {
        &self.stage
    }

    /// Returns the task kind.
    #[must_use]
    pub const fn kind(&self) -> TaskKind {
        self.kind
    }
}
