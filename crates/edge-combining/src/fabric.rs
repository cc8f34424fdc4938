// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! The set of collaborators a combination runtime is wired to.

use std::sync::Arc;

use tokio::runtime::Handle;

use crate::consumer::PollLanes;
use crate::ports::{NoopTransformation, PubSubEngine, Publisher, QueueEngine, TagSubsystem, TransformationHook};
use crate::publish::PublishSink;

/// Default byte budget of a single queue read (1 MiB).
pub const DEFAULT_QUEUE_READ_MAX_BYTES: u64 = 1024 * 1024;

/// Default client id stamped on combined messages.
pub const DEFAULT_PUBLISHER_CLIENT_ID: &str = "data-combining";

/// Shared handles to the external collaborators plus the engine-wide poll
/// lanes. Cheap to clone; every runtime holds one.
#[derive(Clone)]
pub struct Fabric {
    pub(crate) tags: Arc<dyn TagSubsystem>,
    pub(crate) pubsub: Arc<dyn PubSubEngine>,
    pub(crate) queues: Arc<dyn QueueEngine>,
    pub(crate) publisher: Arc<dyn Publisher>,
    pub(crate) transformation: Arc<dyn TransformationHook>,
    pub(crate) client_id: Arc<str>,
    pub(crate) poll_lanes: PollLanes,
    pub(crate) queue_read_max_bytes: u64,
    pub(crate) runtime: Handle,
}

impl Fabric {
    /// Wire the collaborators together. Queue polls are spawned on `runtime`.
    ///
    /// Uses [`NoopTransformation`], [`DEFAULT_PUBLISHER_CLIENT_ID`] and
    /// [`DEFAULT_QUEUE_READ_MAX_BYTES`] until overridden.
    pub fn new(
        tags: Arc<dyn TagSubsystem>,
        pubsub: Arc<dyn PubSubEngine>,
        queues: Arc<dyn QueueEngine>,
        publisher: Arc<dyn Publisher>,
        runtime: Handle,
    ) -> Self {
        Self {
            tags,
            pubsub,
            queues,
            publisher,
            transformation: Arc::new(NoopTransformation),
            client_id: Arc::from(DEFAULT_PUBLISHER_CLIENT_ID),
            poll_lanes: PollLanes::default(),
            queue_read_max_bytes: DEFAULT_QUEUE_READ_MAX_BYTES,
            runtime,
        }
    }

    /// Use `hook` to shape combined payloads.
    pub fn with_transformation(mut self, hook: Arc<dyn TransformationHook>) -> Self {
        self.transformation = hook;
        self
    }

    /// Stamp `client_id` on combined messages.
    pub fn with_client_id(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = Arc::from(client_id.into());
        self
    }

    /// Bound every queue read to `max_bytes`.
    pub fn with_queue_read_max_bytes(mut self, max_bytes: u64) -> Self {
        self.queue_read_max_bytes = max_bytes;
        self
    }

    /// Publish sink built from the publisher, hook and client id.
    pub fn publish_sink(&self) -> PublishSink {
        PublishSink::new(
            Arc::clone(&self.publisher),
            Arc::clone(&self.transformation),
            Arc::clone(&self.client_id),
        )
    }

    /// Poll lanes shared by every queue consumer built from this fabric.
    pub fn poll_lanes(&self) -> &PollLanes {
        &self.poll_lanes
    }
}
