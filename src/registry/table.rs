//! Immutable registry of task definitions and its builder.

use super::{
    RegistryError, TaskDefinition, TaskDefinitionId, TaskExecutable, TaskFailure, TaskKind,
    TaskOutput, WorkflowStage,
};
use crate::pipeline::services::TaskContext;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// Metadata supplied when registering a task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskMetadata {
    id: TaskDefinitionId,
    name: String,
    description: String,
    stage: String,
}

impl TaskMetadata {
    /// Creates metadata with required fields.
    #[must_use]
    pub fn new(id: i32, name: impl Into<String>, stage: impl Into<String>) -> Self {
        Self {
            id: TaskDefinitionId::new(id),
            name: name.into(),
            description: String::new(),
            stage: stage.into(),
        }
    }

    /// Sets the description.
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    fn into_definition(self, kind: TaskKind) -> Result<TaskDefinition, RegistryError> {
        let stage = WorkflowStage::new(self.stage)?;
        TaskDefinition::new(self.id, self.name, self.description, stage, kind)
    }
}

/// A definition together with its executable, if any.
#[derive(Clone)]
pub struct RegisteredTask {
    definition: TaskDefinition,
    executable: Option<TaskExecutable>,
}

impl RegisteredTask {
    /// Returns the task metadata.
    #[must_use]
    pub const fn definition(&self) -> &TaskDefinition {
        &self.definition
    }

    /// Returns the executable for system tasks; `None` for user tasks.
    #[must_use]
    pub const fn executable(&self) -> Option<&TaskExecutable> {
        self.executable.as_ref()
    }
}

impl fmt::Debug for RegisteredTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegisteredTask")
            .field("definition", &self.definition)
            .field("has_executable", &self.executable.is_some())
            .finish()
    }
}

/// Collects task registrations and rejects duplicate identifiers.
#[derive(Debug, Default)]
pub struct TaskRegistryBuilder {
    entries: BTreeMap<TaskDefinitionId, RegisteredTask>,
}

impl TaskRegistryBuilder {
    /// Creates an empty builder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a system task with its executable.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::DuplicateTaskId`] when the identifier is
    /// already registered (as either kind), or a validation error for the
    /// metadata.
    pub fn system<F, O>(self, metadata: TaskMetadata, executable: F) -> Result<Self, RegistryError>
    where
        F: Fn(&mut TaskContext<'_>) -> Result<O, TaskFailure> + Send + Sync + 'static,
        O: Into<TaskOutput>,
    {
        let definition = metadata.into_definition(TaskKind::System)?;
        let erased: TaskExecutable = Arc::new(move |context: &mut TaskContext<'_>| {
            executable(context).map(Into::into)
        });
        self.insert(RegisteredTask {
            definition,
            executable: Some(erased),
        })
    }

    /// Registers a user task requiring human acknowledgement.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::DuplicateTaskId`] when the identifier is
    /// already registered, or a validation error for the metadata.
    pub fn user(self, metadata: TaskMetadata) -> Result<Self, RegistryError> {
        let definition = metadata.into_definition(TaskKind::User)?;
        self.insert(RegisteredTask {
            definition,
            executable: None,
        })
    }

    /// Freezes the registry.
    #[must_use]
    pub fn build(self) -> TaskRegistry {
        TaskRegistry {
            entries: Arc::new(self.entries),
        }
    }

    fn insert(mut self, task: RegisteredTask) -> Result<Self, RegistryError> {
        let id = task.definition.id();
        if let Some(existing) = self.entries.get(&id) {
            return Err(RegistryError::DuplicateTaskId {
                id,
                existing: existing.definition.name().to_owned(),
            });
        }
        self.entries.insert(id, task);
        Ok(self)
    }
}

/// Read-only lookup table from task identifier to registered task.
///
/// Cloning is cheap; clones share the same table.
#[derive(Debug, Clone)]
pub struct TaskRegistry {
    entries: Arc<BTreeMap<TaskDefinitionId, RegisteredTask>>,
}

impl TaskRegistry {
    /// Starts building a registry.
    #[must_use]
    pub fn builder() -> TaskRegistryBuilder {
        TaskRegistryBuilder::new()
    }

    /// Resolves a task identifier.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::UnknownTaskId`] when nothing is registered
    /// under `id`.
    pub fn resolve(&self, id: TaskDefinitionId) -> Result<&RegisteredTask, RegistryError> {
        self.entries.get(&id).ok_or(RegistryError::UnknownTaskId(id))
    }

    /// Returns all definitions ordered by identifier.
    pub fn definitions(&self) -> impl Iterator<Item = &TaskDefinition> {
        self.entries.values().map(RegisteredTask::definition)
    }

    /// Returns the number of registered tasks.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns whether no task is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
