//! The standard catalog driven end to end over real directories.

use super::helpers::{Pipeline, TempDir};
use conductor::catalog::{self, Workspace};
use conductor::pipeline::domain::{RunId, TaskStatus};
use conductor::pipeline::services::{FailureKind, RunAllReport, StopReason, TaskOutcome};
use conductor::registry::TaskDefinitionId;
use eyre::{bail, ensure};
use rstest::rstest;
use std::io::Write as _;
use std::sync::Arc;

const RUN: RunId = RunId::new(5_005);

fn write_file(dir: &cap_std::fs_utf8::Dir, name: &str, contents: &[u8]) -> eyre::Result<()> {
    let mut file = dir.create(name)?;
    file.write_all(contents)?;
    Ok(())
}

fn executed_tasks(report: &RunAllReport) -> Vec<TaskDefinitionId> {
    report
        .executed
        .iter()
        .map(|step| step.node.definition_id())
        .collect()
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn source_files_are_downloaded_and_approved() -> eyre::Result<()> {
    let root = TempDir::new("conductor_catalog")?;
    let source = root.path.join("source");
    let staging = root.path.join("staging");
    let source_dir = {
        root.dir()?.create_dir("source")?;
        root.dir()?.open_dir("source")?
    };
    write_file(&source_dir, "orders.csv", b"id,total\n1,10\n")?;
    write_file(&source_dir, "refunds.csv", b"id,total\n")?;
    let workspace = Arc::new(Workspace::open(&staging, Some(&source))?);
    let pipeline = Pipeline::with_registry(catalog::standard(Arc::clone(&workspace))?);

    pipeline.service.seed_run(RUN, catalog::PREPARE_RUN).await?;
    let report = pipeline.scheduler.run_all(RUN).await?;

    ensure!(report.stopped == StopReason::NothingToRun);
    ensure!(
        executed_tasks(&report)
            == vec![
                catalog::PREPARE_RUN,
                catalog::SCAN_FILES,
                catalog::DOWNLOAD_FILES,
                catalog::VERIFY_FILES,
                catalog::APPROVE_RUN,
            ]
    );
    ensure!(
        workspace.staged_files(RUN)?
            == vec!["orders.csv".to_owned(), "refunds.csv".to_owned()]
    );
    let approval = report
        .executed
        .last()
        .ok_or_else(|| eyre::eyre!("no steps executed"))?;
    ensure!(approval.outcome == TaskOutcome::Acknowledged);
    ensure!(approval.node.status() == TaskStatus::Complete);
    ensure!(approval.node.completed_at() == approval.node.started_at());
    Ok(())
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn manual_collection_then_rework_of_verification() -> eyre::Result<()> {
    let root = TempDir::new("conductor_catalog")?;
    let staging = root.path.join("staging");
    let workspace = Arc::new(Workspace::open(&staging, None)?);
    let pipeline = Pipeline::with_registry(catalog::standard(Arc::clone(&workspace))?);

    pipeline.service.seed_run(RUN, catalog::PREPARE_RUN).await?;
    let first = pipeline.scheduler.run_all(RUN).await?;

    let StopReason::TaskFailed { blocking } = &first.stopped else {
        bail!("verification should fail with nothing staged, got {:?}", first.stopped);
    };
    ensure!(
        executed_tasks(&first)
            == vec![
                catalog::PREPARE_RUN,
                catalog::SCAN_FILES,
                catalog::MANUAL_COLLECT,
                catalog::VERIFY_FILES,
            ]
    );
    let verify = first
        .executed
        .last()
        .map(|step| step.node.clone())
        .ok_or_else(|| eyre::eyre!("no steps executed"))?;
    ensure!(verify.id() == blocking.node_id);
    ensure!(verify
        .diagnostic()
        .is_some_and(|text| text.contains("no files staged")));
    let Err(blocked) = pipeline.scheduler.run_next(RUN).await else {
        bail!("the failed verification must block the run");
    };
    ensure!(blocked.kind() == FailureKind::TaskFailed);

    let run_dir = root.dir()?.open_dir(format!("staging/{}", Workspace::run_dir_name(RUN)))?;
    write_file(&run_dir, "collected.csv", b"id\n7\n")?;
    pipeline.service.rework(verify.id()).await?;
    let second = pipeline.scheduler.run_all(RUN).await?;

    ensure!(second.stopped == StopReason::NothingToRun);
    ensure!(executed_tasks(&second) == vec![catalog::VERIFY_FILES, catalog::APPROVE_RUN]);
    ensure!(workspace.staged_files(RUN)? == vec!["collected.csv".to_owned()]);
    Ok(())
}
