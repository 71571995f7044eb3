//! `PostgreSQL` task tree store.

use super::{
    models::{NewTaskNodeRow, TaskNodeChangeset, TaskNodeRow},
    schema::pipeline_run_tasks,
};
use crate::pipeline::{
    domain::{
        NewPipelineRunTask, NodeId, NodeUpdate, PersistedNodeData, PipelineRunTask, RunId,
        RunTaskTree, SiblingOrder, TaskStatus,
    },
    ports::{TaskTreeStore, TaskTreeStoreError, TaskTreeStoreResult, TaskTreeTransaction},
};
use crate::registry::{TaskDefinitionId, WorkflowStage};
use async_trait::async_trait;
use diesel::connection::SimpleConnection;
use diesel::pg::PgConnection;
use diesel::prelude::*;
use diesel::r2d2::{ConnectionManager, Pool};
use diesel::result::{DatabaseErrorInformation, DatabaseErrorKind, Error as DieselError};

/// `PostgreSQL` connection pool type used by the task tree store.
pub type TaskTreePgPool = Pool<ConnectionManager<PgConnection>>;

/// Parent column value marking a root node.
const ROOT_PARENT: i64 = 0;

const SIBLING_ORDER_INDEX: &str = "idx_pipeline_run_tasks_sibling_order";
const SINGLE_ACTIVE_INDEX: &str = "idx_pipeline_run_tasks_single_active";

/// `PostgreSQL`-backed task tree store.
///
/// Transactions lock a run with `pg_advisory_xact_lock(run_id)` and then
/// `SELECT ... FOR UPDATE` on its rows. Change events come from the
/// statement-level triggers installed by the schema migration.
#[derive(Debug, Clone)]
pub struct PostgresTaskTreeStore {
    pool: TaskTreePgPool,
}

impl PostgresTaskTreeStore {
    /// Creates a store from a connection pool.
    #[must_use]
    pub const fn new(pool: TaskTreePgPool) -> Self {
        Self { pool }
    }

    async fn run_blocking<F, T>(&self, f: F) -> TaskTreeStoreResult<T>
    where
        F: FnOnce(&mut PgConnection) -> TaskTreeStoreResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || {
            let mut connection = pool.get().map_err(TaskTreeStoreError::persistence)?;
            f(&mut connection)
        })
        .await
        .map_err(TaskTreeStoreError::persistence)?
    }
}

/// Error carried out of a Diesel transaction: either the caller's own
/// error or a failure to begin or commit.
enum TxError<E> {
    Work(E),
    Diesel(DieselError),
}

impl<E> From<DieselError> for TxError<E> {
    fn from(err: DieselError) -> Self {
        Self::Diesel(err)
    }
}

#[async_trait]
impl TaskTreeStore for PostgresTaskTreeStore {
    async fn transaction<T, E, F>(&self, work: F) -> Result<T, E>
    where
        F: FnOnce(&mut dyn TaskTreeTransaction) -> Result<T, E> + Send + 'static,
        T: Send + 'static,
        E: From<TaskTreeStoreError> + Send + 'static,
    {
        let pool = self.pool.clone();
        let outcome = tokio::task::spawn_blocking(move || {
            let mut pooled = pool
                .get()
                .map_err(|err| E::from(TaskTreeStoreError::persistence(err)))?;
            let connection: &mut PgConnection = &mut pooled;
            connection
                .transaction::<T, TxError<E>, _>(|conn| {
                    let mut transaction = PgTaskTreeTransaction {
                        connection: conn,
                        savepoints: 0,
                    };
                    work(&mut transaction).map_err(TxError::Work)
                })
                .map_err(|err| match err {
                    TxError::Work(work_err) => work_err,
                    TxError::Diesel(diesel_err) => {
                        E::from(TaskTreeStoreError::persistence(diesel_err))
                    }
                })
        })
        .await;
        outcome.map_err(|err| E::from(TaskTreeStoreError::persistence(err)))?
    }

    async fn load_run(&self, run_id: RunId) -> TaskTreeStoreResult<RunTaskTree> {
        self.run_blocking(move |connection| {
            let rows = pipeline_run_tasks::table
                .filter(pipeline_run_tasks::run_id.eq(run_id.value()))
                .order(pipeline_run_tasks::id.asc())
                .select(TaskNodeRow::as_select())
                .load::<TaskNodeRow>(connection)
                .map_err(TaskTreeStoreError::persistence)?;
            rows_to_tree(run_id, rows)
        })
        .await
    }

    async fn find_node(&self, node_id: NodeId) -> TaskTreeStoreResult<Option<PipelineRunTask>> {
        self.run_blocking(move |connection| {
            find_row(connection, node_id)?.map(row_to_node).transpose()
        })
        .await
    }
}

struct PgTaskTreeTransaction<'conn> {
    connection: &'conn mut PgConnection,
    savepoints: u32,
}

impl PgTaskTreeTransaction<'_> {
    fn savepoint_sql(&mut self, sql: &str) -> TaskTreeStoreResult<()> {
        self.connection
            .batch_execute(sql)
            .map_err(TaskTreeStoreError::persistence)
    }

    fn current_savepoint(&self) -> TaskTreeStoreResult<String> {
        if self.savepoints == 0 {
            return Err(TaskTreeStoreError::NoSavepoint);
        }
        Ok(format!("task_tree_sp_{}", self.savepoints))
    }
}

impl TaskTreeTransaction for PgTaskTreeTransaction<'_> {
    fn lock_run(&mut self, run_id: RunId) -> TaskTreeStoreResult<RunTaskTree> {
        diesel::sql_query("SELECT pg_advisory_xact_lock($1)")
            .bind::<diesel::sql_types::BigInt, _>(run_id.value())
            .execute(self.connection)
            .map_err(TaskTreeStoreError::persistence)?;
        let rows = pipeline_run_tasks::table
            .filter(pipeline_run_tasks::run_id.eq(run_id.value()))
            .order(pipeline_run_tasks::id.asc())
            .select(TaskNodeRow::as_select())
            .for_update()
            .load::<TaskNodeRow>(self.connection)
            .map_err(TaskTreeStoreError::persistence)?;
        rows_to_tree(run_id, rows)
    }

    fn find_node(&mut self, node_id: NodeId) -> TaskTreeStoreResult<Option<PipelineRunTask>> {
        find_row(self.connection, node_id)?
            .map(row_to_node)
            .transpose()
    }

    fn insert_node(&mut self, node: NewPipelineRunTask) -> TaskTreeStoreResult<PipelineRunTask> {
        let run_id = node.run_id;
        let parent = node.parent_id;
        let order = node.sibling_order.value();
        let row = to_new_row(node)?;

        let inserted = diesel::insert_into(pipeline_run_tasks::table)
            .values(&row)
            .returning(TaskNodeRow::as_returning())
            .get_result::<TaskNodeRow>(self.connection)
            .map_err(|err| match err {
                DieselError::DatabaseError(DatabaseErrorKind::UniqueViolation, ref info)
                    if violates(info.as_ref(), SIBLING_ORDER_INDEX) =>
                {
                    TaskTreeStoreError::DuplicateSiblingOrder {
                        run_id,
                        parent,
                        order,
                    }
                }
                _ => TaskTreeStoreError::persistence(err),
            })?;
        row_to_node(inserted)
    }

    fn update_node(
        &mut self,
        node_id: NodeId,
        update: NodeUpdate,
    ) -> TaskTreeStoreResult<PipelineRunTask> {
        let current = find_row(self.connection, node_id)?
            .ok_or(TaskTreeStoreError::NodeNotFound(node_id))?;
        if update.is_empty() {
            return row_to_node(current);
        }

        let run_id = RunId::new(current.run_id);
        let updated = diesel::update(pipeline_run_tasks::table.find(node_id.value()))
            .set(&to_changeset(update))
            .returning(TaskNodeRow::as_returning())
            .get_result::<TaskNodeRow>(self.connection)
            .map_err(|err| match err {
                DieselError::DatabaseError(DatabaseErrorKind::UniqueViolation, ref info)
                    if violates(info.as_ref(), SINGLE_ACTIVE_INDEX) =>
                {
                    TaskTreeStoreError::ConcurrentActivation(run_id)
                }
                DieselError::NotFound => TaskTreeStoreError::NodeNotFound(node_id),
                _ => TaskTreeStoreError::persistence(err),
            })?;
        row_to_node(updated)
    }

    fn delete_nodes(&mut self, node_ids: &[NodeId]) -> TaskTreeStoreResult<usize> {
        if node_ids.is_empty() {
            return Ok(0);
        }
        let ids: Vec<i64> = node_ids.iter().map(|id| id.value()).collect();
        diesel::delete(pipeline_run_tasks::table.filter(pipeline_run_tasks::id.eq_any(ids)))
            .execute(self.connection)
            .map_err(TaskTreeStoreError::persistence)
    }

    fn begin_savepoint(&mut self) -> TaskTreeStoreResult<()> {
        self.savepoints += 1;
        let name = self.current_savepoint()?;
        let result = self.savepoint_sql(&format!("SAVEPOINT {name}"));
        if result.is_err() {
            self.savepoints -= 1;
        }
        result
    }

    fn rollback_savepoint(&mut self) -> TaskTreeStoreResult<()> {
        let name = self.current_savepoint()?;
        self.savepoint_sql(&format!(
            "ROLLBACK TO SAVEPOINT {name}; RELEASE SAVEPOINT {name}"
        ))?;
        self.savepoints -= 1;
        Ok(())
    }

    fn release_savepoint(&mut self) -> TaskTreeStoreResult<()> {
        let name = self.current_savepoint()?;
        self.savepoint_sql(&format!("RELEASE SAVEPOINT {name}"))?;
        self.savepoints -= 1;
        Ok(())
    }
}

fn violates(info: &dyn DatabaseErrorInformation, index: &str) -> bool {
    info.constraint_name().is_some_and(|name| name == index)
}

fn find_row(
    connection: &mut PgConnection,
    node_id: NodeId,
) -> TaskTreeStoreResult<Option<TaskNodeRow>> {
    pipeline_run_tasks::table
        .find(node_id.value())
        .select(TaskNodeRow::as_select())
        .first::<TaskNodeRow>(connection)
        .optional()
        .map_err(TaskTreeStoreError::persistence)
}

fn to_new_row(node: NewPipelineRunTask) -> TaskTreeStoreResult<NewTaskNodeRow> {
    let NewPipelineRunTask {
        run_id,
        definition_id,
        parent_id,
        sibling_order,
        stage,
    } = node;
    Ok(NewTaskNodeRow {
        run_id: run_id.value(),
        task_id: definition_id.value(),
        parent_id: parent_id.map_or(ROOT_PARENT, NodeId::value),
        sibling_order: i32::try_from(sibling_order.value())
            .map_err(TaskTreeStoreError::persistence)?,
        stage: stage.as_str().to_owned(),
        status: TaskStatus::Waiting.as_str().to_owned(),
    })
}

fn to_changeset(update: NodeUpdate) -> TaskNodeChangeset {
    let NodeUpdate {
        status,
        started_at,
        completed_at,
        message,
        diagnostic,
        render_payload,
    } = update;
    TaskNodeChangeset {
        status: status.map(|value| value.as_str().to_owned()),
        started_at: started_at.into_changeset(),
        completed_at: completed_at.into_changeset(),
        message: message.into_changeset(),
        diagnostic: diagnostic.into_changeset(),
        render_payload: render_payload.into_changeset(),
    }
}

fn rows_to_tree(run_id: RunId, rows: Vec<TaskNodeRow>) -> TaskTreeStoreResult<RunTaskTree> {
    let nodes = rows
        .into_iter()
        .map(row_to_node)
        .collect::<TaskTreeStoreResult<Vec<_>>>()?;
    Ok(RunTaskTree::new(run_id, nodes))
}

fn row_to_node(row: TaskNodeRow) -> TaskTreeStoreResult<PipelineRunTask> {
    let TaskNodeRow {
        id,
        run_id,
        task_id,
        parent_id,
        sibling_order: persisted_order,
        stage: persisted_stage,
        status: persisted_status,
        started_at,
        completed_at,
        message,
        diagnostic,
        render_payload,
    } = row;

    let order = u32::try_from(persisted_order).map_err(TaskTreeStoreError::invalid_persisted_data)?;
    let sibling_order =
        SiblingOrder::new(order).map_err(TaskTreeStoreError::invalid_persisted_data)?;
    let stage =
        WorkflowStage::new(persisted_stage).map_err(TaskTreeStoreError::invalid_persisted_data)?;
    let status = TaskStatus::try_from(persisted_status.as_str())
        .map_err(TaskTreeStoreError::invalid_persisted_data)?;

    Ok(PipelineRunTask::from_persisted(PersistedNodeData {
        id: NodeId::new(id),
        run_id: RunId::new(run_id),
        definition_id: TaskDefinitionId::new(task_id),
        parent_id: (parent_id != ROOT_PARENT).then_some(NodeId::new(parent_id)),
        sibling_order,
        stage,
        status,
        started_at,
        completed_at,
        message,
        diagnostic,
        render_payload,
    }))
}
