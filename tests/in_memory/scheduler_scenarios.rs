//! End-to-end scheduling scenarios over the in-memory store.

use super::helpers::{Pipeline, pipeline};
use crate::test_helpers::tasks::{BROKEN, PARTIAL, PLAN, SINGLE, TASK_A, TASK_B};
use conductor::pipeline::domain::{RunId, TaskStatus};
use conductor::pipeline::ports::TaskTreeStore;
use conductor::pipeline::services::{FailureKind, PipelineError, StopReason, TaskOutcome};
use eyre::{bail, ensure};
use rstest::rstest;

const RUN: RunId = RunId::new(1_001);

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn single_root_runs_once(pipeline: Pipeline) -> eyre::Result<()> {
    let root = pipeline.service.seed_run(RUN, SINGLE).await?;

    let report = pipeline.scheduler.run_next(RUN).await?;

    ensure!(report.node.id() == root.id());
    ensure!(report.node.status() == TaskStatus::Complete);
    ensure!(pipeline.service.next_runnable(RUN).await?.is_none());
    ensure!(matches!(
        pipeline.scheduler.run_next(RUN).await,
        Err(PipelineError::NothingToRun(_))
    ));
    Ok(())
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn children_added_by_the_root_follow_it(pipeline: Pipeline) -> eyre::Result<()> {
    pipeline.service.seed_run(RUN, PLAN).await?;

    let report = pipeline.scheduler.run_next(RUN).await?;
    ensure!(report.outcome == TaskOutcome::Completed {
        message: Some("planned two steps".to_owned())
    });

    let view = pipeline.service.ordered_view(RUN).await?;
    let summary: Vec<_> = view
        .iter()
        .map(|entry| {
            (
                entry.position,
                entry.node.definition_id(),
                entry.node.sibling_order().value(),
            )
        })
        .collect();
    ensure!(summary == vec![(1, PLAN, 1), (2, TASK_A, 1), (3, TASK_B, 2)]);
    Ok(())
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn failure_blocks_until_rework(pipeline: Pipeline) -> eyre::Result<()> {
    let root = pipeline.service.seed_run(RUN, BROKEN).await?;

    let failed = pipeline.scheduler.run_next(RUN).await?;
    ensure!(failed.outcome.is_failed());
    ensure!(failed.node.status() == TaskStatus::Failed);
    ensure!(failed
        .node
        .diagnostic()
        .is_some_and(|text| text.contains("checksum mismatch")));

    let Err(blocked) = pipeline.scheduler.run_next(RUN).await else {
        bail!("the failed root must block the run");
    };
    ensure!(blocked.kind() == FailureKind::TaskFailed);
    ensure!(blocked.blocking_task().map(|task| task.node_id) == Some(root.id()));

    let reworked = pipeline.service.rework(root.id()).await?;
    ensure!(reworked.node.status() == TaskStatus::Waiting);
    ensure!(reworked.node.diagnostic().is_none());
    ensure!(reworked.removed.is_empty());

    let retried = pipeline.scheduler.run_next(RUN).await?;
    ensure!(retried.node.id() == root.id());
    Ok(())
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn partial_work_of_a_failed_task_is_discarded(pipeline: Pipeline) -> eyre::Result<()> {
    pipeline.service.seed_run(RUN, PARTIAL).await?;

    let report = pipeline.scheduler.run_next(RUN).await?;

    ensure!(report.outcome.is_failed());
    ensure!(pipeline.store.load_run(RUN).await?.len() == 1);
    Ok(())
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn run_all_completes_a_planned_run(pipeline: Pipeline) -> eyre::Result<()> {
    pipeline.service.seed_run(RUN, PLAN).await?;

    let report = pipeline.scheduler.run_all(RUN).await?;

    ensure!(report.stopped == StopReason::NothingToRun);
    let ran: Vec<_> = report
        .executed
        .iter()
        .map(|step| step.node.definition_id())
        .collect();
    ensure!(ran == vec![PLAN, TASK_A, TASK_B]);
    let Some(last) = report.executed.last() else {
        bail!("run_all should have executed steps");
    };
    ensure!(last.outcome == TaskOutcome::Acknowledged);
    Ok(())
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn runs_do_not_block_each_other(pipeline: Pipeline) -> eyre::Result<()> {
    let other = RunId::new(2_002);
    pipeline.service.seed_run(RUN, BROKEN).await?;
    pipeline.service.seed_run(other, SINGLE).await?;

    pipeline.scheduler.run_next(RUN).await?;
    let report = pipeline.scheduler.run_next(other).await?;

    ensure!(report.node.status() == TaskStatus::Complete);
    Ok(())
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn report_serialises_with_outcome_tag(pipeline: Pipeline) -> eyre::Result<()> {
    pipeline.service.seed_run(RUN, BROKEN).await?;

    let report = pipeline.scheduler.run_next(RUN).await?;
    let json = serde_json::to_value(&report)?;

    ensure!(json["outcome"] == "failed");
    ensure!(json["node"]["status"] == "failed");
    ensure!(json["run_id"] == 1_001);
    Ok(())
}
