//! Orchestration services for run task trees.

mod context;
mod error;
mod scheduler;
mod tree;
mod watch;

pub use context::TaskContext;
pub use error::{FailureKind, PipelineError};
pub use scheduler::{
    DEFAULT_MAX_STEPS, RunAllReport, Scheduler, StopReason, TaskOutcome, TaskRunReport,
};
pub use tree::{ReworkReport, TaskTreeService};
pub use watch::{TaskTreeSnapshot, TaskTreeSnapshots, TaskTreeWatch};
