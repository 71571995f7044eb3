//! `PostgreSQL` adapters for task tree persistence and change events.

mod listener;
mod models;
mod schema;
mod store;

pub use listener::PostgresTreeChangeFeed;
pub use store::{PostgresTaskTreeStore, TaskTreePgPool};

use crate::pipeline::ports::{TaskTreeStoreError, TaskTreeStoreResult};
use diesel::connection::SimpleConnection;
use diesel::pg::PgConnection;
use diesel::prelude::*;
use diesel::r2d2::{ConnectionManager, Pool};

/// SQL creating the task table, its indexes, and the change triggers.
pub const SCHEMA_SQL: &str = include_str!(concat!(
    env!("CARGO_MANIFEST_DIR"),
    "/migrations/2026-10-19-000000_create_pipeline_run_tasks/up.sql"
));

/// Builds a connection pool for `database_url`.
///
/// # Errors
///
/// Returns [`TaskTreeStoreError::Persistence`] when the pool cannot open its
/// first connection.
pub fn build_pool(database_url: &str, max_size: u32) -> TaskTreeStoreResult<TaskTreePgPool> {
    let manager = ConnectionManager::<PgConnection>::new(database_url);
    Pool::builder()
        .max_size(max_size)
        .build(manager)
        .map_err(TaskTreeStoreError::persistence)
}

/// Creates the task tree schema unless it already exists.
///
/// Returns `true` when the schema was created.
///
/// # Errors
///
/// Returns [`TaskTreeStoreError::Persistence`] on database failure.
pub fn apply_schema(connection: &mut PgConnection) -> TaskTreeStoreResult<bool> {
    #[derive(diesel::QueryableByName)]
    struct ExistsRow {
        #[diesel(sql_type = diesel::sql_types::Bool)]
        exists: bool,
    }

    let table = diesel::sql_query(
        "SELECT to_regclass('pipeline_run_tasks') IS NOT NULL AS exists",
    )
    .get_result::<ExistsRow>(connection)
    .map_err(TaskTreeStoreError::persistence)?;
    if table.exists {
        return Ok(false);
    }
    connection
        .transaction(|conn| conn.batch_execute(SCHEMA_SQL))
        .map_err(TaskTreeStoreError::persistence)?;
    Ok(true)
}
