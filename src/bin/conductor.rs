//! Command-line entry point for pipeline run task trees.
//!
//! Usage:
//!
//! ```text
//! conductor [--config <path>] [--log-level <filter>] <command>
//! ```
//!
//! Every command prints one JSON document on stdout, except `watch`, which
//! prints one snapshot per line until interrupted. Failures print
//! `{"error": {"kind", "message", "blocking"?}}` and exit with 1 when the
//! run or request is at fault, or 2 for infrastructure failures. Logs go to
//! stderr.

use async_trait::async_trait;
use camino::Utf8PathBuf;
use clap::{Parser, Subcommand};
use conductor::catalog::{self, CatalogError, Workspace};
use conductor::config::{ConductorConfig, ConfigError};
use conductor::notify::{ChangeFeed, ChannelSubscriber, NotifyError, SubscriberError};
use conductor::pipeline::adapters::postgres::{
    PostgresTaskTreeStore, PostgresTreeChangeFeed, apply_schema, build_pool,
};
use conductor::pipeline::domain::{BlockingTask, NodeId, RunId};
use conductor::pipeline::ports::TaskTreeStoreError;
use conductor::pipeline::services::{
    PipelineError, Scheduler, TaskTreeService, TaskTreeSnapshot, TaskTreeWatch,
};
use conductor::registry::{RegistryError, TaskDefinition, TaskDefinitionId, TaskRegistry};
use mockable::DefaultClock;
use serde::Serialize;
use std::io::{self, Write as _};
use std::process::ExitCode;
use std::sync::Arc;
use thiserror::Error;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "conductor", version, about = "Drive pipeline run task trees")]
struct Cli {
    /// TOML configuration file.
    #[arg(long, global = true)]
    config: Option<Utf8PathBuf>,

    /// Log filter directive; overrides `RUST_LOG` and the configured filter.
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Create the task table, indexes, and change triggers.
    Migrate,
    /// List the registered task catalog.
    Tasks,
    /// Create the root node of a run.
    Seed {
        /// Run to seed.
        run_id: i64,
        /// Task for the root node.
        #[arg(long, default_value_t = catalog::PREPARE_RUN.value())]
        task: i32,
    },
    /// Print a run's ordered view.
    Show {
        /// Run to show.
        run_id: i64,
    },
    /// Execute the next waiting node of a run.
    RunNext {
        /// Run to advance.
        run_id: i64,
    },
    /// Execute nodes until the run stops.
    RunAll {
        /// Run to advance.
        run_id: i64,
    },
    /// Reset a node to waiting and delete its descendants.
    Rework {
        /// Node to rework.
        node_id: i64,
    },
    /// Stream a run's snapshots as JSON lines until Ctrl-C.
    Watch {
        /// Run to watch.
        run_id: i64,
    },
}

#[derive(Debug, Error)]
enum CliError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Workspace(#[from] CatalogError),
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error(transparent)]
    Store(#[from] TaskTreeStoreError),
    #[error(transparent)]
    Pipeline(#[from] PipelineError),
    #[error(transparent)]
    Notify(#[from] NotifyError),
    #[error("failed to write output: {0}")]
    Output(#[from] serde_json::Error),
    #[error("failed to wait for the interrupt signal: {0}")]
    Signal(#[source] io::Error),
}

impl CliError {
    fn kind(&self) -> &'static str {
        match self {
            Self::Config(_) => "config",
            Self::Workspace(_) => "workspace",
            Self::Registry(_) => "registry",
            Self::Store(_) => "persistence",
            Self::Pipeline(err) => err.kind().as_str(),
            Self::Notify(_) => "notification",
            Self::Output(_) => "output",
            Self::Signal(_) => "signal",
        }
    }

    fn exit_code(&self) -> ExitCode {
        let caller_fault = match self {
            Self::Pipeline(err) => !err.kind().is_infrastructure(),
            Self::Config(_) => true,
            _ => false,
        };
        if caller_fault {
            ExitCode::from(1)
        } else {
            ExitCode::from(2)
        }
    }

    fn blocking(&self) -> Option<&BlockingTask> {
        match self {
            Self::Pipeline(err) => err.blocking_task(),
            _ => None,
        }
    }
}

#[derive(Serialize)]
struct ErrorReport<'a> {
    error: ErrorBody<'a>,
}

#[derive(Serialize)]
struct ErrorBody<'a> {
    kind: &'static str,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    blocking: Option<&'a BlockingTask>,
}

/// Writes each snapshot as one JSON line on stdout.
struct JsonLinesSubscriber;

#[async_trait]
impl ChannelSubscriber<TaskTreeSnapshot> for JsonLinesSubscriber {
    async fn send(&self, payload: &TaskTreeSnapshot) -> Result<(), SubscriberError> {
        emit(payload).map_err(|err| SubscriberError::new(err.to_string()))
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let config = match ConductorConfig::load(cli.config.as_deref()) {
        Ok(loaded) => loaded,
        Err(err) => {
            init_logging(cli.log_level.as_deref(), "info");
            return report(&CliError::from(err));
        }
    };
    init_logging(cli.log_level.as_deref(), &config.log_filter);

    match execute(cli.command, &config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => report(&err),
    }
}

fn init_logging(cli_level: Option<&str>, configured: &str) {
    let filter = cli_level
        .and_then(|level| EnvFilter::try_new(level).ok())
        .or_else(|| EnvFilter::try_from_default_env().ok())
        .unwrap_or_else(|| EnvFilter::new(configured));
    let _already_set = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .try_init();
}

fn report(err: &CliError) -> ExitCode {
    error!(kind = err.kind(), error = %err, "command failed");
    let document = ErrorReport {
        error: ErrorBody {
            kind: err.kind(),
            message: err.to_string(),
            blocking: err.blocking(),
        },
    };
    if let Err(output) = emit(&document) {
        error!(error = %output, "failed to write error report");
    }
    err.exit_code()
}

fn emit<T: Serialize + ?Sized>(value: &T) -> Result<(), serde_json::Error> {
    let mut out = io::stdout().lock();
    serde_json::to_writer(&mut out, value)?;
    writeln!(out)
        .and_then(|()| out.flush())
        .map_err(serde_json::Error::io)
}

fn open_registry(config: &ConductorConfig) -> Result<TaskRegistry, CliError> {
    let workspace = Workspace::open(&config.staging_root, config.source_root.as_deref())?;
    Ok(catalog::standard(Arc::new(workspace))?)
}

fn open_store(config: &ConductorConfig) -> Result<Arc<PostgresTaskTreeStore>, CliError> {
    let pool = build_pool(config.require_database_url()?, config.pool_size)?;
    Ok(Arc::new(PostgresTaskTreeStore::new(pool)))
}

async fn execute(command: Command, config: &ConductorConfig) -> Result<(), CliError> {
    match command {
        Command::Migrate => {
            let pool = build_pool(config.require_database_url()?, config.pool_size)?;
            let mut connection = pool.get().map_err(TaskTreeStoreError::persistence)?;
            let created = apply_schema(&mut connection)?;
            info!(created, "schema checked");
            emit(&serde_json::json!({ "schema_created": created }))?;
        }
        Command::Tasks => {
            let registry = open_registry(config)?;
            let definitions: Vec<&TaskDefinition> = registry.definitions().collect();
            emit(&definitions)?;
        }
        Command::Seed { run_id, task } => {
            let service = TaskTreeService::new(open_store(config)?, open_registry(config)?);
            let root = service
                .seed_run(RunId::new(run_id), TaskDefinitionId::new(task))
                .await?;
            emit(&root)?;
        }
        Command::Show { run_id } => {
            let service = TaskTreeService::new(open_store(config)?, open_registry(config)?);
            emit(&service.ordered_view(RunId::new(run_id)).await?)?;
        }
        Command::RunNext { run_id } => {
            let scheduler = scheduler(config)?;
            emit(&scheduler.run_next(RunId::new(run_id)).await?)?;
        }
        Command::RunAll { run_id } => {
            let scheduler = scheduler(config)?;
            emit(&scheduler.run_all(RunId::new(run_id)).await?)?;
        }
        Command::Rework { node_id } => {
            let service = TaskTreeService::new(open_store(config)?, open_registry(config)?);
            emit(&service.rework(NodeId::new(node_id)).await?)?;
        }
        Command::Watch { run_id } => watch(config, RunId::new(run_id)).await?,
    }
    Ok(())
}

fn scheduler(
    config: &ConductorConfig,
) -> Result<Scheduler<PostgresTaskTreeStore, DefaultClock>, CliError> {
    Ok(
        Scheduler::new(open_store(config)?, open_registry(config)?, Arc::new(DefaultClock))
            .with_max_steps(config.max_steps_per_run_all),
    )
}

async fn watch(config: &ConductorConfig, run_id: RunId) -> Result<(), CliError> {
    let feed: Arc<dyn ChangeFeed<RunId>> = Arc::new(PostgresTreeChangeFeed::new(
        config.require_database_url()?,
        config.listen_poll_interval(),
    ));
    let watch = TaskTreeWatch::new(open_store(config)?, feed);
    let handle = watch.attach(run_id, Arc::new(JsonLinesSubscriber)).await?;
    info!(%run_id, "watching run; press Ctrl-C to stop");
    tokio::signal::ctrl_c().await.map_err(CliError::Signal)?;
    let detached = watch.detach(&handle).await;
    info!(%run_id, detached, "stopped watching run");
    Ok(())
}
