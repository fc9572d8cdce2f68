// SQLite Event Stream - cursor over the `events` table

use crate::store::JobStore;
use async_trait::async_trait;
use conveyor_core::domain::QueueEvent;
use conveyor_core::error::Result;
use conveyor_core::port::{EventStream, OpenStreamGuard};
use std::collections::VecDeque;
use std::sync::atomic::AtomicUsize;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

const EVENT_BATCH_SIZE: i64 = 100;

/// Subscription to one queue's completion/failure events
///
/// Starts after the newest event present when it was opened. Polls the table,
/// woken early whenever this process appends an event. Released on `close`
/// or on drop.
pub struct SqliteEventStream {
    store: Arc<JobStore>,
    queue: String,
    cursor: i64,
    buffered: VecDeque<QueueEvent>,
    poll_interval: Duration,
    guard: OpenStreamGuard,
}

impl SqliteEventStream {
    pub(crate) async fn open(
        store: Arc<JobStore>,
        queue: &str,
        poll_interval: Duration,
        open_streams: Arc<AtomicUsize>,
    ) -> Result<Self> {
        let cursor = store.latest_event_seq(queue).await?;
        debug!(queue = %queue, cursor, "Event stream opened");

        Ok(Self {
            store,
            queue: queue.to_string(),
            cursor,
            buffered: VecDeque::new(),
            poll_interval,
            guard: OpenStreamGuard::new(open_streams),
        })
    }
}

#[async_trait]
impl EventStream for SqliteEventStream {
    async fn next_event(&mut self) -> Result<Option<QueueEvent>> {
        loop {
            if let Some(event) = self.buffered.pop_front() {
                return Ok(Some(event));
            }

            // Register interest before reading so an append in between still wakes us
            let notify = Arc::clone(self.store.events_notify());
            let notified = notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let batch = self
                .store
                .events_after(&self.queue, self.cursor, EVENT_BATCH_SIZE)
                .await?;

            if batch.is_empty() {
                tokio::select! {
                    _ = &mut notified => {}
                    _ = tokio::time::sleep(self.poll_interval) => {}
                }
                continue;
            }

            for (seq, event) in batch {
                self.cursor = seq;
                self.buffered.push_back(event);
            }
        }
    }

    async fn close(mut self: Box<Self>) -> Result<()> {
        self.guard.release();
        debug!(queue = %self.queue, "Event stream closed");
        Ok(())
    }
}
