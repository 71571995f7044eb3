//! Fixtures for the `PostgreSQL` suite.

pub use super::cluster::{BoxError, PostgresCluster, TemporaryDatabase, postgres_cluster};
use crate::test_helpers::tasks;
use conductor::pipeline::adapters::postgres::{
    PostgresTaskTreeStore, PostgresTreeChangeFeed, apply_schema, build_pool,
};
use conductor::pipeline::services::{Scheduler, TaskTreeService, TaskTreeWatch};
use conductor::registry::TaskRegistry;
use diesel::prelude::*;
use mockable::DefaultClock;
use rstest::fixture;
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Runtime;

/// Template database with the task tree schema applied.
pub const TEMPLATE_DB: &str = "conductor_test_template";

/// Poll interval for listeners in tests.
pub const LISTEN_POLL: Duration = Duration::from_millis(20);

/// Builds a current-thread runtime for blocking set-up code.
pub fn test_runtime() -> Result<Runtime, BoxError> {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(|err| Box::new(err) as BoxError)
}

/// Ensures the template database exists with the schema applied.
pub fn ensure_template(cluster: PostgresCluster) -> Result<(), BoxError> {
    cluster.ensure_template_exists(TEMPLATE_DB, |url| {
        let mut conn = PgConnection::establish(url).map_err(|err| Box::new(err) as BoxError)?;
        apply_schema(&mut conn).map_err(|err| Box::new(err) as BoxError)?;
        Ok(())
    })
}

/// A migrated scratch database with the pipeline services wired over it.
pub struct PgPipeline {
    pub store: Arc<PostgresTaskTreeStore>,
    pub service: TaskTreeService<PostgresTaskTreeStore>,
    pub scheduler: Scheduler<PostgresTaskTreeStore, DefaultClock>,
    pub database: TemporaryDatabase,
}

impl PgPipeline {
    /// Creates a fresh database from the template.
    pub fn create(cluster: PostgresCluster, registry: TaskRegistry) -> Result<Self, BoxError> {
        ensure_template(cluster)?;
        let database = cluster.temporary_database(TEMPLATE_DB)?;
        let pool = build_pool(&database.url(), 4).map_err(|err| Box::new(err) as BoxError)?;
        let store = Arc::new(PostgresTaskTreeStore::new(pool));
        Ok(Self {
            service: TaskTreeService::new(Arc::clone(&store), registry.clone()),
            scheduler: Scheduler::new(Arc::clone(&store), registry, Arc::new(DefaultClock)),
            store,
            database,
        })
    }

    /// A second scheduler over the same store, with its own in-process gates.
    pub fn another_scheduler(&self) -> Scheduler<PostgresTaskTreeStore, DefaultClock> {
        Scheduler::new(
            Arc::clone(&self.store),
            tasks::registry(),
            Arc::new(DefaultClock),
        )
    }

    /// A watch endpoint listening on this database.
    pub fn watch(&self) -> TaskTreeWatch {
        let feed = Arc::new(PostgresTreeChangeFeed::new(self.database.url(), LISTEN_POLL));
        TaskTreeWatch::new(Arc::clone(&self.store), feed)
    }

    /// Opens a direct connection for assertions.
    pub fn connect(&self) -> Result<PgConnection, BoxError> {
        PgConnection::establish(&self.database.url()).map_err(|err| Box::new(err) as BoxError)
    }
}

/// Pipeline over a scratch database using the shared test catalog.
#[fixture]
pub fn pg_pipeline(postgres_cluster: PostgresCluster) -> PgPipeline {
    match PgPipeline::create(postgres_cluster, tasks::registry()) {
        Ok(pipeline) => pipeline,
        Err(err) => panic!("SKIP-TEST-CLUSTER: failed to prepare database: {err}"),
    }
}
