//! Watching runs through the notification channel group.

use super::helpers::{Pipeline, next_snapshot, pipeline, recorder};
use crate::test_helpers::tasks::{PLAN, SINGLE, TASK_A};
use conductor::pipeline::domain::{RunId, TaskStatus};
use eyre::ensure;
use rstest::rstest;
use std::time::Duration;

const RUN: RunId = RunId::new(3_003);

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn attach_pushes_the_current_tree(pipeline: Pipeline) -> eyre::Result<()> {
    pipeline.service.seed_run(RUN, PLAN).await?;
    let (subscriber, mut received) = recorder();

    let handle = pipeline.watch.attach(RUN, subscriber).await?;

    let initial = next_snapshot(&mut received).await?;
    ensure!(initial.run_id == RUN);
    ensure!(initial.tasks.len() == 1);
    ensure!(*handle.key() == RUN);
    pipeline.watch.detach(&handle).await;
    Ok(())
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn concurrent_attaches_see_the_same_change(pipeline: Pipeline) -> eyre::Result<()> {
    let root = pipeline.service.seed_run(RUN, PLAN).await?;
    let (first, mut first_rx) = recorder();
    let (second, mut second_rx) = recorder();

    let (left, right) = tokio::join!(
        pipeline.watch.attach(RUN, first),
        pipeline.watch.attach(RUN, second)
    );
    let (left, right) = (left?, right?);
    next_snapshot(&mut first_rx).await?;
    next_snapshot(&mut second_rx).await?;
    ensure!(pipeline.watch.group().listener_starts() == 1);

    pipeline.service.add_child(root.id(), TASK_A).await?;

    let seen_first = next_snapshot(&mut first_rx).await?;
    let seen_second = next_snapshot(&mut second_rx).await?;
    ensure!(seen_first == seen_second);
    ensure!(seen_first.tasks.len() == 2);

    pipeline.watch.detach(&left).await;
    pipeline.watch.detach(&right).await;
    ensure!(!pipeline.watch.group().is_listening().await);
    Ok(())
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn scheduler_step_is_pushed_as_one_committed_state(pipeline: Pipeline) -> eyre::Result<()> {
    pipeline.service.seed_run(RUN, PLAN).await?;
    let (subscriber, mut received) = recorder();
    let handle = pipeline.watch.attach(RUN, subscriber).await?;
    next_snapshot(&mut received).await?;

    pipeline.scheduler.run_next(RUN).await?;

    let pushed = next_snapshot(&mut received).await?;
    ensure!(pushed.tasks.len() == 3);
    ensure!(pushed
        .tasks
        .iter()
        .all(|entry| !entry.node.status().is_active()));
    ensure!(pushed
        .tasks
        .first()
        .is_some_and(|entry| entry.node.status() == TaskStatus::Complete));
    pipeline.watch.detach(&handle).await;
    Ok(())
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn changes_to_other_runs_are_not_pushed(pipeline: Pipeline) -> eyre::Result<()> {
    let other = RunId::new(4_004);
    pipeline.service.seed_run(RUN, SINGLE).await?;
    let (subscriber, mut received) = recorder();
    let handle = pipeline.watch.attach(RUN, subscriber).await?;
    next_snapshot(&mut received).await?;

    pipeline.service.seed_run(other, SINGLE).await?;
    let quiet = tokio::time::timeout(Duration::from_millis(200), received.recv()).await;
    ensure!(quiet.is_err(), "a change to another run must not be pushed");

    pipeline.scheduler.run_next(RUN).await?;
    let pushed = next_snapshot(&mut received).await?;
    ensure!(pushed.run_id == RUN);
    pipeline.watch.detach(&handle).await;
    Ok(())
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn detached_subscriber_receives_nothing_more(pipeline: Pipeline) -> eyre::Result<()> {
    let root = pipeline.service.seed_run(RUN, PLAN).await?;
    let (kept, mut kept_rx) = recorder();
    let (dropped, mut dropped_rx) = recorder();
    let kept_handle = pipeline.watch.attach(RUN, kept).await?;
    let dropped_handle = pipeline.watch.attach(RUN, dropped).await?;
    next_snapshot(&mut kept_rx).await?;
    next_snapshot(&mut dropped_rx).await?;

    ensure!(pipeline.watch.detach(&dropped_handle).await);
    ensure!(!pipeline.watch.detach(&dropped_handle).await);
    pipeline.service.add_child(root.id(), TASK_A).await?;

    next_snapshot(&mut kept_rx).await?;
    ensure!(dropped_rx.try_recv().is_err());
    pipeline.watch.detach(&kept_handle).await;
    Ok(())
}
