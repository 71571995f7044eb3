//! `LISTEN`-based change feed.
//!
//! A dedicated connection issues `LISTEN` and is polled on a blocking thread.
//! Each notification payload is parsed as a run id and forwarded to the
//! async stream. The thread exits once the stream is dropped.

use crate::notify::{ChangeFeed, ChangeStream, ChannelName, NotifyError, NotifyResult};
use crate::pipeline::domain::RunId;
use async_trait::async_trait;
use diesel::connection::SimpleConnection;
use diesel::pg::PgConnection;
use diesel::prelude::*;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

const CHANGE_BUFFER: usize = 256;

/// Change feed reading `NOTIFY` events from `PostgreSQL`.
#[derive(Debug, Clone)]
pub struct PostgresTreeChangeFeed {
    database_url: String,
    poll_interval: Duration,
}

impl PostgresTreeChangeFeed {
    /// Creates a feed that opens its own connection to `database_url` per
    /// listener and polls it every `poll_interval`.
    #[must_use]
    pub fn new(database_url: impl Into<String>, poll_interval: Duration) -> Self {
        Self {
            database_url: database_url.into(),
            poll_interval,
        }
    }
}

#[async_trait]
impl ChangeFeed<RunId> for PostgresTreeChangeFeed {
    async fn listen(&self, channel: &ChannelName) -> NotifyResult<Box<dyn ChangeStream<RunId>>> {
        let url = self.database_url.clone();
        let listen_channel = channel.clone();
        let connection = tokio::task::spawn_blocking(move || {
            let mut connection = PgConnection::establish(&url).map_err(NotifyError::feed)?;
            connection
                .batch_execute(&format!("LISTEN \"{}\"", listen_channel.as_str()))
                .map_err(NotifyError::feed)?;
            Ok::<_, NotifyError>(connection)
        })
        .await
        .map_err(NotifyError::feed)??;

        let (sender, receiver) = mpsc::channel(CHANGE_BUFFER);
        let poll_interval = self.poll_interval;
        let pump_channel = channel.clone();
        tokio::task::spawn_blocking(move || pump(connection, &pump_channel, &sender, poll_interval));
        info!(channel = %channel, "listening for notifications");
        Ok(Box::new(PostgresChangeStream { receiver }))
    }
}

struct PostgresChangeStream {
    receiver: mpsc::Receiver<NotifyResult<RunId>>,
}

#[async_trait]
impl ChangeStream<RunId> for PostgresChangeStream {
    async fn next_change(&mut self) -> NotifyResult<Option<RunId>> {
        self.receiver.recv().await.transpose()
    }
}

fn pump(
    mut connection: PgConnection,
    channel: &ChannelName,
    sender: &mpsc::Sender<NotifyResult<RunId>>,
    poll_interval: Duration,
) {
    while !sender.is_closed() {
        for notification in connection.notifications_iter() {
            let event = match notification {
                Ok(event) => event,
                Err(err) => {
                    warn!(channel = %channel, error = %err, "notification connection failed");
                    let _closed = sender.blocking_send(Err(NotifyError::feed(err)));
                    return;
                }
            };
            if event.channel != channel.as_str() {
                continue;
            }
            match event.payload.trim().parse::<i64>() {
                Ok(raw) => {
                    debug!(channel = %channel, run_id = raw, "notification received");
                    if sender.blocking_send(Ok(RunId::new(raw))).is_err() {
                        return;
                    }
                }
                Err(err) => {
                    warn!(channel = %channel, payload = %event.payload, error = %err, "ignoring notification with non-numeric payload");
                }
            }
        }
        std::thread::sleep(poll_interval);
    }
    debug!(channel = %channel, "notification listener released");
}
