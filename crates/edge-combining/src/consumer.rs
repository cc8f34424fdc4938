// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Serialized pull loop over one durable shared queue.
//!
//! Polls for the same queue id run one at a time on that queue's lane;
//! different queue ids poll in parallel. A poll reads at most one message,
//! hands it to the [`MessageHandler`], acknowledges it whatever the handler
//! did and immediately polls again. Read failures are retried at once,
//! without backoff and without a cap.
//!
//! Messages delivered at [`Qos::AtMostOnce`] are never acknowledged: the
//! queue engine already dropped them on read, and removing them again made
//! the broker republish.

use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use futures_util::FutureExt;
use tokio::runtime::Handle;
use tokio::sync::Mutex;
use tracing::{debug, instrument, warn};

use crate::error::CombiningError;
use crate::ports::{Qos, QueueEngine, QueuedMessage};
use crate::QUEUE_READ_LIMIT;

/// Reacts to one delivered message.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    /// Handle `message`. The message is acknowledged whether this succeeds,
    /// fails or panics.
    async fn process(&self, message: &QueuedMessage) -> Result<(), CombiningError>;
}

/// Per-queue-id serialization lanes.
///
/// Each queue id maps to a FIFO lock; a poll holds its lane for the whole
/// read-process-acknowledge cycle.
#[derive(Clone, Default)]
pub struct PollLanes {
    lanes: Arc<DashMap<String, Arc<Mutex<()>>>>,
}

impl PollLanes {
    fn lane(&self, queue_id: &str) -> Arc<Mutex<()>> {
        Arc::clone(self.lanes.entry(queue_id.to_string()).or_default().value())
    }

    /// Forget the lane of `queue_id` if no poll holds or awaits it.
    fn release(&self, queue_id: &str) {
        self.lanes
            .remove_if(queue_id, |_, lane| Arc::strong_count(lane) == 1);
    }

    /// Number of queue ids with a live lane.
    pub fn len(&self) -> usize {
        self.lanes.len()
    }

    /// Whether no lane is live.
    pub fn is_empty(&self) -> bool {
        self.lanes.is_empty()
    }
}

/// Pull loop bound to exactly one queue id.
pub struct QueueConsumer {
    queue_id: String,
    engine: Arc<dyn QueueEngine>,
    handler: Arc<dyn MessageHandler>,
    lanes: PollLanes,
    max_bytes: u64,
    runtime: Handle,
    closed: AtomicBool,
}

impl QueueConsumer {
    /// Build a consumer; nothing happens until [`QueueConsumer::start`].
    pub fn new(
        queue_id: impl Into<String>,
        engine: Arc<dyn QueueEngine>,
        handler: Arc<dyn MessageHandler>,
        lanes: PollLanes,
        max_bytes: u64,
        runtime: Handle,
    ) -> Arc<Self> {
        Arc::new(Self {
            queue_id: queue_id.into(),
            engine,
            handler,
            lanes,
            max_bytes,
            runtime,
            closed: AtomicBool::new(false),
        })
    }

    /// Queue this consumer drains.
    pub fn queue_id(&self) -> &str {
        &self.queue_id
    }

    /// Whether [`QueueConsumer::close`] was called.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Register for availability notifications and poll once right away.
    #[instrument(skip(self), fields(queue_id = %self.queue_id))]
    pub fn start(self: &Arc<Self>) {
        let weak = Arc::downgrade(self);
        self.engine.add_publish_available_callback(
            &self.queue_id,
            Arc::new(move || {
                if let Some(consumer) = weak.upgrade() {
                    consumer.submit_poll();
                }
            }),
        );
        self.submit_poll();
    }

    /// Stop listening for availability. A poll already submitted still runs
    /// to completion but does not schedule another one; the last such poll
    /// drops the queue's lane.
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.engine.remove_publish_available_callback(&self.queue_id);
        self.lanes.release(&self.queue_id);
    }

    /// Queue one poll on this queue's lane.
    pub fn submit_poll(self: &Arc<Self>) {
        let consumer = Arc::clone(self);
        let lane = self.lanes.lane(&self.queue_id);
        self.runtime.spawn(async move {
            {
                let _turn = lane.lock().await;
                consumer.poll_and_forward().await;
            }
            drop(lane);
            if consumer.is_closed() {
                consumer.lanes.release(&consumer.queue_id);
            }
        });
    }

    async fn poll_and_forward(self: &Arc<Self>) {
        let messages = match self
            .engine
            .read_shared(&self.queue_id, QUEUE_READ_LIMIT, self.max_bytes)
            .await
        {
            Ok(messages) => messages,
            Err(err) => {
                warn!(queue_id = %self.queue_id, %err, "queue read failed, polling again");
                self.resubmit();
                return;
            }
        };
        let Some(message) = messages.into_iter().next() else {
            return;
        };

        match AssertUnwindSafe(self.handler.process(&message))
            .catch_unwind()
            .await
        {
            Ok(Ok(())) => {}
            Ok(Err(err)) => warn!(
                queue_id = %self.queue_id,
                unique_id = %message.unique_id,
                %err,
                "message handler failed, dropping message"
            ),
            Err(_) => warn!(
                queue_id = %self.queue_id,
                unique_id = %message.unique_id,
                "message handler panicked, dropping message"
            ),
        }

        if message.qos == Qos::AtMostOnce {
            debug!(
                queue_id = %self.queue_id,
                unique_id = %message.unique_id,
                "qos 0 message, not acknowledging"
            );
        } else if let Err(err) = self
            .engine
            .remove_shared(&self.queue_id, &message.unique_id)
            .await
        {
            warn!(queue_id = %self.queue_id, %err, "failed to acknowledge message");
        }
        self.resubmit();
    }

    fn resubmit(self: &Arc<Self>) {
        if !self.is_closed() {
            self.submit_poll();
        }
    }
}
