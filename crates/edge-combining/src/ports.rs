// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Collaborator ports consumed by the engine, plus the message types that
//! cross them.
//!
//! Implementations live outside this crate: the host wires in a real broker,
//! tests wire in recording doubles.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use edge_app_core::events::{EventLog, EventSeverity};
use serde_json::Value;

use crate::error::{CombiningError, PublishError, QueueError, TransformError};
use crate::model::Combination;

/// A single value delivered for a tag.
#[derive(Debug, Clone, PartialEq)]
pub struct DataPoint {
    /// Tag the value belongs to.
    pub tag_name: String,
    /// The value.
    pub value: Value,
}

impl DataPoint {
    /// New data point.
    pub fn new(tag_name: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            tag_name: tag_name.into(),
            value: value.into(),
        }
    }

    /// Text form of the value: strings verbatim, everything else as JSON.
    pub fn render(&self) -> String {
        match &self.value {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        }
    }
}

/// Text form of a delivered value list: a single value renders on its own,
/// several render as a JSON array.
pub fn render_values(values: &[DataPoint]) -> String {
    match values {
        [single] => single.render(),
        many => Value::Array(many.iter().map(|p| p.value.clone()).collect()).to_string(),
    }
}

/// MQTT quality-of-service level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Qos {
    /// Fire and forget.
    AtMostOnce = 0,
    /// Acknowledged delivery.
    AtLeastOnce = 1,
    /// Assured delivery.
    ExactlyOnce = 2,
}

impl Qos {
    /// Numeric level.
    pub const fn level(self) -> u8 {
        self as u8
    }
}

/// Message read from a durable shared queue.
#[derive(Clone, PartialEq, Eq)]
pub struct QueuedMessage {
    /// Id used to acknowledge (remove) the message.
    pub unique_id: String,
    /// Topic the message was published to.
    pub topic: String,
    /// Raw payload.
    pub payload: Bytes,
    /// Effective delivery QoS.
    pub qos: Qos,
}

impl QueuedMessage {
    /// Payload decoded as UTF-8, replacing invalid sequences.
    pub fn payload_text(&self) -> String {
        String::from_utf8_lossy(&self.payload).into_owned()
    }

    /// Bytes counted against a read's byte budget.
    pub fn size(&self) -> usize {
        self.topic.len() + self.payload.len()
    }
}

impl fmt::Debug for QueuedMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueuedMessage")
            .field("unique_id", &self.unique_id)
            .field("topic", &self.topic)
            .field("payload_len", &self.payload.len())
            .field("qos", &self.qos)
            .finish()
    }
}

/// Message handed to the publish pathway.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishMessage {
    /// Destination topic.
    pub topic: String,
    /// Payload bytes.
    pub payload: Bytes,
    /// Requested QoS.
    pub qos: Qos,
    /// Publishing client id.
    pub client_id: String,
}

/// Receives value updates for one tag.
#[async_trait]
pub trait TagConsumer: Send + Sync {
    /// Tag this consumer listens to.
    fn tag_name(&self) -> &str;
    /// Adapter/device owning the tag.
    fn scope(&self) -> Option<&str>;
    /// Deliver the latest values. Errors come from the work the delivery
    /// triggered (serialization, publish) and are the dispatcher's to log.
    async fn accept(&self, values: Vec<DataPoint>) -> Result<(), CombiningError>;
}

/// The tag data-source subsystem.
pub trait TagSubsystem: Send + Sync {
    /// Register a consumer; it receives every update of its tag/scope.
    fn add_consumer(&self, consumer: Arc<dyn TagConsumer>);
    /// Unregister a consumer previously passed to `add_consumer` (by identity).
    fn remove_consumer(&self, consumer: &Arc<dyn TagConsumer>);
}

/// Subscription options passed to the pub/sub engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SubscriptionFlags {
    /// Do not deliver messages published by the same client.
    pub no_local: bool,
    /// Keep the retain flag as published.
    pub retain_as_published: bool,
    /// Member of a shared subscription group.
    pub shared: bool,
}

impl SubscriptionFlags {
    /// Flags for a shared-group subscription.
    pub const fn shared() -> Self {
        Self {
            no_local: false,
            retain_as_published: false,
            shared: true,
        }
    }
}

/// The publish/subscribe topic-matching engine.
pub trait PubSubEngine: Send + Sync {
    /// Subscribe `subscriber_id` to `topic_filter`. Returns whether the
    /// subscription was newly created.
    fn add_topic(
        &self,
        subscriber_id: &str,
        topic_filter: &str,
        qos: Qos,
        flags: SubscriptionFlags,
        shared_group: Option<&str>,
    ) -> bool;
    /// Drop the subscription of `subscriber_id` to `topic_filter`.
    fn remove_subscriber(&self, subscriber_id: &str, topic_filter: &str, shared_group: Option<&str>);
}

/// Callback fired by the queue engine when a queue has data available.
pub type AvailabilityCallback = Arc<dyn Fn() + Send + Sync>;

/// The durable shared message-queue engine.
#[async_trait]
pub trait QueueEngine: Send + Sync {
    /// Register the availability callback for `queue_id`, replacing any previous one.
    fn add_publish_available_callback(&self, queue_id: &str, callback: AvailabilityCallback);
    /// Drop the availability callback for `queue_id`.
    fn remove_publish_available_callback(&self, queue_id: &str);
    /// Read up to `limit` messages totalling at most `max_bytes`.
    ///
    /// Messages at [`Qos::AtMostOnce`] leave the queue as they are read;
    /// all others stay until [`QueueEngine::remove_shared`].
    async fn read_shared(
        &self,
        queue_id: &str,
        limit: usize,
        max_bytes: u64,
    ) -> Result<Vec<QueuedMessage>, QueueError>;
    /// Remove (acknowledge) a previously read message.
    async fn remove_shared(&self, queue_id: &str, unique_id: &str) -> Result<(), QueueError>;
}

/// The outbound publish pathway. Resolves once the broker accepted or
/// refused the message.
#[async_trait]
pub trait Publisher: Send + Sync {
    /// Publish `message`.
    async fn publish(&self, message: PublishMessage) -> Result<(), PublishError>;
}

/// Pluggable payload transformation.
#[async_trait]
pub trait TransformationHook: Send + Sync {
    /// Install whatever script the combination needs.
    fn add_script_for_data_combining(&self, combination: &Combination);
    /// Remove the script installed for the combination (idempotent).
    fn remove_script_for_data_combining(&self, combination: &Combination);
    /// Shape `message` in place before it is published.
    async fn apply_mappings(
        &self,
        message: &mut PublishMessage,
        combination: &Combination,
    ) -> Result<(), TransformError>;
}

/// Transformation hook that leaves every message untouched.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopTransformation;

#[async_trait]
impl TransformationHook for NoopTransformation {
    fn add_script_for_data_combining(&self, _combination: &Combination) {}

    fn remove_script_for_data_combining(&self, _combination: &Combination) {}

    async fn apply_mappings(
        &self,
        _message: &mut PublishMessage,
        _combination: &Combination,
    ) -> Result<(), TransformError> {
        Ok(())
    }
}

/// Informational lifecycle event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LifecycleEvent {
    /// Severity.
    pub severity: EventSeverity,
    /// Entity the event is about.
    pub source: String,
    /// Human-readable message.
    pub message: String,
}

impl LifecycleEvent {
    /// Info-level event.
    pub fn info(source: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            severity: EventSeverity::Info,
            source: source.into(),
            message: message.into(),
        }
    }
}

/// Fire-and-forget sink for lifecycle events.
pub trait EventSink: Send + Sync {
    /// Record `event`.
    fn fire(&self, event: LifecycleEvent);
}

impl EventSink for EventLog {
    fn fire(&self, event: LifecycleEvent) {
        self.push(event.severity, event.source, event.message);
    }
}
