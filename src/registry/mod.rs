//! Task registry for pipeline runs.
//!
//! The registry maps a task identifier to its definition: either a system
//! task with an executable, or a user task that records a human
//! acknowledgement. It is built once at process start from an explicit
//! registration list and is immutable afterwards. Identifiers are unique
//! across both kinds; registering one twice fails fast.

mod definition;
mod error;
mod executable;
mod table;

pub use definition::{TaskDefinition, TaskDefinitionId, TaskKind, WorkflowStage};
pub use error::RegistryError;
pub use executable::{
    TaskExecutable, TaskFailure, TaskOutput, TracedFailure, render_diagnostic, render_panic,
};
pub use table::{RegisteredTask, TaskMetadata, TaskRegistry, TaskRegistryBuilder};

#[cfg(test)]
mod tests;
