//! Committed changes reach watchers through `LISTEN`/`NOTIFY`.

use super::helpers::{LISTEN_POLL, PgPipeline, pg_pipeline};
use crate::test_helpers::tasks::{PLAN, SINGLE};
use async_trait::async_trait;
use conductor::notify::{ChangeFeed, ChannelSubscriber, SubscriberError};
use conductor::pipeline::TASK_TREE_CHANNEL;
use conductor::pipeline::adapters::postgres::PostgresTreeChangeFeed;
use conductor::pipeline::domain::{RunId, TaskStatus};
use conductor::pipeline::services::TaskTreeSnapshot;
use eyre::ensure;
use rstest::rstest;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

const RUN: RunId = RunId::new(88);
const WAIT: Duration = Duration::from_secs(10);

struct Forward(mpsc::UnboundedSender<TaskTreeSnapshot>);

#[async_trait]
impl ChannelSubscriber<TaskTreeSnapshot> for Forward {
    async fn send(&self, payload: &TaskTreeSnapshot) -> Result<(), SubscriberError> {
        self.0
            .send(payload.clone())
            .map_err(|_closed| SubscriberError::new("receiver dropped"))
    }
}

/// Waits for a snapshot satisfying `accept`, skipping intermediate ones.
async fn snapshot_matching(
    receiver: &mut mpsc::UnboundedReceiver<TaskTreeSnapshot>,
    accept: impl Fn(&TaskTreeSnapshot) -> bool,
) -> eyre::Result<TaskTreeSnapshot> {
    tokio::time::timeout(WAIT, async {
        while let Some(snapshot) = receiver.recv().await {
            if accept(&snapshot) {
                return Ok(snapshot);
            }
        }
        eyre::bail!("snapshot channel closed")
    })
    .await
    .map_err(|_elapsed| eyre::eyre!("no matching snapshot within {WAIT:?}"))?
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn feed_reports_the_run_of_each_commit(pg_pipeline: PgPipeline) -> eyre::Result<()> {
    let feed = PostgresTreeChangeFeed::new(pg_pipeline.database.url(), LISTEN_POLL);
    let mut stream = feed.listen(&TASK_TREE_CHANNEL).await?;

    pg_pipeline.service.seed_run(RUN, SINGLE).await?;

    let change = tokio::time::timeout(WAIT, stream.next_change())
        .await
        .map_err(|_elapsed| eyre::eyre!("no notification within {WAIT:?}"))??;
    ensure!(change == Some(RUN));
    Ok(())
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn watcher_sees_scheduler_progress(pg_pipeline: PgPipeline) -> eyre::Result<()> {
    pg_pipeline.service.seed_run(RUN, PLAN).await?;
    let watch = pg_pipeline.watch();
    let (sender, mut received) = mpsc::unbounded_channel();

    let handle = watch.attach(RUN, Arc::new(Forward(sender))).await?;
    let initial = snapshot_matching(&mut received, |_| true).await?;
    ensure!(initial.tasks.len() == 1);

    pg_pipeline.scheduler.run_next(RUN).await?;

    let planned = snapshot_matching(&mut received, |snapshot| snapshot.tasks.len() == 3).await?;
    ensure!(planned
        .tasks
        .first()
        .is_some_and(|entry| entry.node.status() == TaskStatus::Complete));
    ensure!(planned
        .tasks
        .iter()
        .all(|entry| !entry.node.status().is_active()));
    watch.detach(&handle).await;
    Ok(())
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn rework_deleting_many_rows_is_pushed(pg_pipeline: PgPipeline) -> eyre::Result<()> {
    let root = pg_pipeline.service.seed_run(RUN, PLAN).await?;
    pg_pipeline.scheduler.run_all(RUN).await?;
    let watch = pg_pipeline.watch();
    let (sender, mut received) = mpsc::unbounded_channel();
    let handle = watch.attach(RUN, Arc::new(Forward(sender))).await?;
    snapshot_matching(&mut received, |snapshot| snapshot.tasks.len() == 3).await?;

    pg_pipeline.service.rework(root.id()).await?;

    let reworked = snapshot_matching(&mut received, |snapshot| snapshot.tasks.len() == 1).await?;
    ensure!(reworked
        .tasks
        .first()
        .is_some_and(|entry| entry.node.status() == TaskStatus::Waiting));
    ensure!(watch.detach(&handle).await);
    ensure!(!watch.group().is_listening().await);
    Ok(())
}
