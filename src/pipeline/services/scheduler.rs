//! Runs the next task of a run under the single-active-task rule.
//!
//! Each `run_next` is one store transaction: lock the run, pick the first
//! `Waiting` node of the ordered view, move it through `Scheduled` and
//! `Running`, execute it, and record the outcome. Children grafted by the
//! executable commit in the same transaction. A failing executable is
//! recorded on its node and the call still succeeds.

use super::{PipelineError, TaskContext};
use crate::pipeline::{
    domain::{
        BlockingTask, FieldUpdate, NodeUpdate, PipelineRunTask, RunId, TaskStatus,
        TaskTreeDomainError,
    },
    ports::{TaskTreeStore, TaskTreeTransaction},
};
use crate::registry::{TaskExecutable, TaskRegistry, render_diagnostic, render_panic};
use chrono::{DateTime, Utc};
use mockable::Clock;
use serde::Serialize;
use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, PoisonError};
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{info, instrument, warn};

/// Default cap on steps taken by one [`Scheduler::run_all`] call.
pub const DEFAULT_MAX_STEPS: usize = 10_000;

const EMPTY_FAILURE: &str = "task executable failed without a message";

/// What happened to the node a scheduler step ran.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum TaskOutcome {
    /// A user task was recorded as acknowledged.
    Acknowledged,
    /// A system task completed.
    Completed {
        /// Message returned by the executable.
        message: Option<String>,
    },
    /// A system task failed; the node is now `Failed`.
    Failed {
        /// Diagnostic stored on the node.
        diagnostic: String,
    },
}

impl TaskOutcome {
    /// Returns whether the step recorded a failure.
    #[must_use]
    pub const fn is_failed(&self) -> bool {
        matches!(self, Self::Failed { .. })
    }
}

/// Result of one successful scheduler step.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TaskRunReport {
    /// Run the step belongs to.
    pub run_id: RunId,
    /// The node after its outcome was recorded.
    pub node: PipelineRunTask,
    /// Outcome of the step.
    #[serde(flatten)]
    pub outcome: TaskOutcome,
}

/// Why [`Scheduler::run_all`] stopped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum StopReason {
    /// No `Waiting` node remains.
    NothingToRun,
    /// Another node is scheduled or running.
    TaskActive {
        /// The active node.
        blocking: BlockingTask,
    },
    /// A node failed and needs rework.
    TaskFailed {
        /// The failed node.
        blocking: BlockingTask,
    },
    /// The configured step cap was reached.
    StepLimit {
        /// Steps taken.
        steps: usize,
    },
}

/// Result of [`Scheduler::run_all`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunAllReport {
    /// Run that was driven.
    pub run_id: RunId,
    /// Steps taken, in order.
    pub executed: Vec<TaskRunReport>,
    /// Why the loop ended.
    pub stopped: StopReason,
}

/// Serialises scheduler calls per run within this process.
///
/// An entry lives only while some call holds or waits for its gate.
#[derive(Debug, Default)]
struct RunGates {
    gates: std::sync::Mutex<HashMap<RunId, Arc<Mutex<()>>>>,
}

impl RunGates {
    async fn acquire(&self, run_id: RunId) -> RunGate<'_> {
        let gate = Arc::clone(self.lock_map().entry(run_id).or_default());
        // Built before waiting so a cancelled acquire still prunes the entry.
        let mut held = RunGate {
            gates: self,
            run_id,
            guard: None,
        };
        held.guard = Some(gate.lock_owned().await);
        held
    }

    fn release(&self, run_id: RunId) {
        let mut gates = self.lock_map();
        // Waiters clone the gate under the map lock, so a count of one means
        // nobody else holds or awaits it.
        if gates
            .get(&run_id)
            .is_some_and(|gate| Arc::strong_count(gate) == 1)
        {
            gates.remove(&run_id);
        }
    }

    fn lock_map(&self) -> std::sync::MutexGuard<'_, HashMap<RunId, Arc<Mutex<()>>>> {
        self.gates.lock().unwrap_or_else(PoisonError::into_inner)
    }

    #[cfg(test)]
    fn tracked(&self) -> usize {
        self.lock_map().len()
    }
}

/// Held for the duration of one scheduler call on a run.
struct RunGate<'a> {
    gates: &'a RunGates,
    run_id: RunId,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for RunGate<'_> {
    fn drop(&mut self) {
        drop(self.guard.take());
        self.gates.release(self.run_id);
    }
}

/// Executes task nodes one at a time per run.
pub struct Scheduler<S, C>
where
    S: TaskTreeStore,
    C: Clock + Send + Sync,
{
    store: Arc<S>,
    registry: TaskRegistry,
    clock: Arc<C>,
    gates: Arc<RunGates>,
    max_steps: usize,
}

impl<S, C> Clone for Scheduler<S, C>
where
    S: TaskTreeStore,
    C: Clock + Send + Sync,
{
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            registry: self.registry.clone(),
            clock: Arc::clone(&self.clock),
            gates: Arc::clone(&self.gates),
            max_steps: self.max_steps,
        }
    }
}

impl<S, C> Scheduler<S, C>
where
    S: TaskTreeStore + 'static,
    C: Clock + Send + Sync + 'static,
{
    /// Creates a scheduler with the default step cap.
    #[must_use]
    pub fn new(store: Arc<S>, registry: TaskRegistry, clock: Arc<C>) -> Self {
        Self {
            store,
            registry,
            clock,
            gates: Arc::new(RunGates::default()),
            max_steps: DEFAULT_MAX_STEPS,
        }
    }

    /// Sets the cap on steps taken by one [`Scheduler::run_all`] call.
    #[must_use]
    pub const fn with_max_steps(mut self, max_steps: usize) -> Self {
        self.max_steps = max_steps;
        self
    }

    /// Returns how many runs currently have a gate entry.
    #[cfg(test)]
    pub(crate) fn gated_runs(&self) -> usize {
        self.gates.tracked()
    }

    /// Runs the next `Waiting` node of the run.
    ///
    /// Executable failures and panics are recorded on the node and returned
    /// as [`TaskOutcome::Failed`].
    ///
    /// # Errors
    ///
    /// Returns `TaskActive` or `TaskFailed` naming the blocking node,
    /// [`PipelineError::NothingToRun`] when no node is waiting,
    /// [`PipelineError::RunNotFound`] for a run without nodes, and store or
    /// registry errors. Nothing is changed when an error is returned.
    #[instrument(skip_all, fields(run_id = %run_id))]
    pub async fn run_next(&self, run_id: RunId) -> Result<TaskRunReport, PipelineError> {
        let _gate = self.gates.acquire(run_id).await;
        self.step(run_id).await
    }

    /// Repeats [`Scheduler::run_next`] until nothing is waiting, a node is
    /// active or failed, or the step cap is reached.
    ///
    /// # Errors
    ///
    /// Returns any error other than the stop conditions above.
    #[instrument(skip_all, fields(run_id = %run_id))]
    pub async fn run_all(&self, run_id: RunId) -> Result<RunAllReport, PipelineError> {
        let _gate = self.gates.acquire(run_id).await;
        let mut executed = Vec::new();
        let stopped = loop {
            if executed.len() >= self.max_steps {
                warn!(steps = executed.len(), "step limit reached");
                break StopReason::StepLimit {
                    steps: executed.len(),
                };
            }
            match self.step(run_id).await {
                Ok(report) => executed.push(report),
                Err(PipelineError::NothingToRun(_)) => break StopReason::NothingToRun,
                Err(PipelineError::Domain(TaskTreeDomainError::TaskActive(blocking))) => {
                    break StopReason::TaskActive { blocking };
                }
                Err(PipelineError::Domain(TaskTreeDomainError::TaskFailed(blocking))) => {
                    break StopReason::TaskFailed { blocking };
                }
                Err(err) => return Err(err),
            }
        };
        info!(steps = executed.len(), ?stopped, "run_all finished");
        Ok(RunAllReport {
            run_id,
            executed,
            stopped,
        })
    }

    async fn step(&self, run_id: RunId) -> Result<TaskRunReport, PipelineError> {
        let registry = self.registry.clone();
        let clock = Arc::clone(&self.clock);
        let report = self
            .store
            .transaction(move |tx| execute_next(tx, &registry, &*clock, run_id))
            .await?;
        match &report.outcome {
            TaskOutcome::Failed { diagnostic } => warn!(
                node_id = %report.node.id(),
                task_id = %report.node.definition_id(),
                %diagnostic,
                "task failed"
            ),
            TaskOutcome::Completed { .. } | TaskOutcome::Acknowledged => info!(
                node_id = %report.node.id(),
                task_id = %report.node.definition_id(),
                "task complete"
            ),
        }
        Ok(report)
    }
}

fn execute_next<C: Clock>(
    tx: &mut dyn TaskTreeTransaction,
    registry: &TaskRegistry,
    clock: &C,
    run_id: RunId,
) -> Result<TaskRunReport, PipelineError> {
    let tree = tx.lock_run(run_id)?;
    if tree.is_empty() {
        return Err(PipelineError::RunNotFound(run_id));
    }
    let next = tree
        .next_runnable()?
        .ok_or(PipelineError::NothingToRun(run_id))?;
    let task = registry.resolve(next.definition_id())?;

    next.ensure_transition(TaskStatus::Scheduled)?;
    let scheduled = tx.update_node(next.id(), NodeUpdate::status(TaskStatus::Scheduled))?;
    scheduled.ensure_transition(TaskStatus::Running)?;
    let started_at = clock.utc();
    let running = tx.update_node(
        next.id(),
        NodeUpdate::status(TaskStatus::Running).with_started_at(FieldUpdate::Set(started_at)),
    )?;

    let (update, outcome) = match task.executable() {
        None => (
            finished(TaskStatus::Complete, started_at),
            TaskOutcome::Acknowledged,
        ),
        Some(executable) => run_executable(tx, registry, executable, &running, clock)?,
    };
    let node = tx.update_node(running.id(), update)?;
    Ok(TaskRunReport {
        run_id,
        node,
        outcome,
    })
}

fn run_executable<C: Clock>(
    tx: &mut dyn TaskTreeTransaction,
    registry: &TaskRegistry,
    executable: &TaskExecutable,
    running: &PipelineRunTask,
    clock: &C,
) -> Result<(NodeUpdate, TaskOutcome), PipelineError> {
    tx.begin_savepoint()?;
    let result = {
        let mut context = TaskContext::new(running, &mut *tx, registry);
        panic::catch_unwind(AssertUnwindSafe(|| executable(&mut context)))
    };
    let completed_at = clock.utc();

    let (message, diagnostic) = match result {
        Ok(Ok(output)) => {
            tx.release_savepoint()?;
            let message = output.into_message();
            let update = finished(TaskStatus::Complete, completed_at)
                .with_message(FieldUpdate::from(message.clone()));
            return Ok((update, TaskOutcome::Completed { message }));
        }
        Ok(Err(failure)) => (failure.to_string(), render_diagnostic(&*failure)),
        Err(payload) => (
            "task executable panicked".to_owned(),
            render_panic(&*payload),
        ),
    };

    tx.rollback_savepoint()?;
    let recorded = non_empty(diagnostic);
    let update = finished(TaskStatus::Failed, completed_at)
        .with_message(FieldUpdate::Set(non_empty(message)))
        .with_diagnostic(FieldUpdate::Set(recorded.clone()));
    Ok((
        update,
        TaskOutcome::Failed {
            diagnostic: recorded,
        },
    ))
}

fn finished(status: TaskStatus, at: DateTime<Utc>) -> NodeUpdate {
    NodeUpdate::status(status).with_completed_at(FieldUpdate::Set(at))
}

fn non_empty(text: String) -> String {
    if text.trim().is_empty() {
        EMPTY_FAILURE.to_owned()
    } else {
        text
    }
}
