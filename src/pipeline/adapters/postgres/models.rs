//! Diesel row models for task tree persistence.

use super::schema::pipeline_run_tasks;
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde_json::Value;

/// Query result row for task tree nodes.
#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = pipeline_run_tasks)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct TaskNodeRow {
    /// Node identifier.
    pub id: i64,
    /// Owning run.
    pub run_id: i64,
    /// Registered task identifier.
    pub task_id: i32,
    /// Parent node identifier, 0 for roots.
    pub parent_id: i64,
    /// Position among siblings.
    pub sibling_order: i32,
    /// Workflow stage.
    pub stage: String,
    /// Node status.
    pub status: String,
    /// Start timestamp.
    pub started_at: Option<DateTime<Utc>>,
    /// Completion timestamp.
    pub completed_at: Option<DateTime<Utc>>,
    /// Outcome message.
    pub message: Option<String>,
    /// Failure diagnostic.
    pub diagnostic: Option<String>,
    /// Rendering payload.
    pub render_payload: Option<Value>,
}

/// Insert model for new `Waiting` nodes.
#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = pipeline_run_tasks)]
pub struct NewTaskNodeRow {
    /// Owning run.
    pub run_id: i64,
    /// Registered task identifier.
    pub task_id: i32,
    /// Parent node identifier, 0 for roots.
    pub parent_id: i64,
    /// Position among siblings.
    pub sibling_order: i32,
    /// Workflow stage.
    pub stage: String,
    /// Node status.
    pub status: String,
}

/// Partial update; `None` leaves a column untouched, `Some(None)` writes
/// null.
#[derive(Debug, Clone, Default, AsChangeset)]
#[diesel(table_name = pipeline_run_tasks)]
pub struct TaskNodeChangeset {
    /// New status.
    pub status: Option<String>,
    /// Start timestamp change.
    pub started_at: Option<Option<DateTime<Utc>>>,
    /// Completion timestamp change.
    pub completed_at: Option<Option<DateTime<Utc>>>,
    /// Message change.
    pub message: Option<Option<String>>,
    /// Diagnostic change.
    pub diagnostic: Option<Option<String>>,
    /// Rendering payload change.
    pub render_payload: Option<Option<Value>>,
}
