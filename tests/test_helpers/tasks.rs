//! A small task registry exercising every executable outcome.

use conductor::pipeline::services::TaskContext;
use conductor::registry::{TaskDefinitionId, TaskFailure, TaskMetadata, TaskRegistry};

/// System task that grafts `TASK_A` then `TASK_B` under itself.
pub const PLAN: TaskDefinitionId = TaskDefinitionId::new(100);
/// System task completing with a message.
pub const TASK_A: TaskDefinitionId = TaskDefinitionId::new(101);
/// User task.
pub const TASK_B: TaskDefinitionId = TaskDefinitionId::new(102);
/// System task that always fails.
pub const BROKEN: TaskDefinitionId = TaskDefinitionId::new(103);
/// System task completing without a message.
pub const SINGLE: TaskDefinitionId = TaskDefinitionId::new(104);
/// System task that grafts `TASK_A` and then fails.
pub const PARTIAL: TaskDefinitionId = TaskDefinitionId::new(105);

fn plan(context: &mut TaskContext<'_>) -> Result<String, TaskFailure> {
    context.add_child(context.node_id(), TASK_A)?;
    context.add_child(context.node_id(), TASK_B)?;
    Ok("planned two steps".to_owned())
}

fn task_a(_context: &mut TaskContext<'_>) -> Result<&'static str, TaskFailure> {
    Ok("a finished")
}

fn broken(_context: &mut TaskContext<'_>) -> Result<(), TaskFailure> {
    Err(std::io::Error::other("checksum mismatch").into())
}

fn single(_context: &mut TaskContext<'_>) -> Result<(), TaskFailure> {
    Ok(())
}

fn partial(context: &mut TaskContext<'_>) -> Result<(), TaskFailure> {
    context.add_subtask(TASK_A)?;
    Err("transfer interrupted".into())
}

/// Builds the registry.
///
/// # Panics
///
/// Panics if the registrations conflict.
pub fn registry() -> TaskRegistry {
    TaskRegistry::builder()
        .system(TaskMetadata::new(PLAN.value(), "Plan", "collection"), plan)
        .and_then(|next| next.system(TaskMetadata::new(TASK_A.value(), "Task A", "collection"), task_a))
        .and_then(|next| next.user(TaskMetadata::new(TASK_B.value(), "Task B", "review")))
        .and_then(|next| next.system(TaskMetadata::new(BROKEN.value(), "Broken", "collection"), broken))
        .and_then(|next| next.system(TaskMetadata::new(SINGLE.value(), "Single", "collection"), single))
        .and_then(|next| next.system(TaskMetadata::new(PARTIAL.value(), "Partial", "collection"), partial))
        .expect("test registry registrations are unique")
        .build()
}
