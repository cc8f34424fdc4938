// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Per-combination runtime: source subscriptions, latest-value cache and
//! primary-triggered emission.
//!
//! A runtime moves `Idle -> Running -> Stopped` exactly once; a stopped
//! runtime is discarded and a fresh one built instead.
//!
//! Emission is not serialized: two primary deliveries arriving together each
//! take their own snapshot of the cache and each publish.

use std::collections::HashSet;
use std::mem;
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use serde_json::{Map, Value};
use tracing::{debug, error, info};

use crate::consumer::{MessageHandler, QueueConsumer};
use crate::error::CombiningError;
use crate::fabric::Fabric;
use crate::model::{Combination, SourceKind, SourceRef};
use crate::ports::{render_values, DataPoint, Qos, QueuedMessage, SubscriptionFlags, TagConsumer};
use crate::publish::PublishSink;
use crate::sanitize::sanitize;

/// Lifecycle state of a [`CombinationRuntime`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuntimeState {
    /// Built, nothing subscribed yet.
    Idle,
    /// Subscriptions active.
    Running,
    /// Subscriptions torn down; terminal.
    Stopped,
}

/// Queue id of the shared queue feeding `topic_filter` for `combination`.
pub fn queue_id(combination: &Combination, topic_filter: &str) -> String {
    format!("{}/{}", combination.id, topic_filter)
}

/// Subscriber id under which a combination's topic filters are subscribed.
pub fn subscriber_id(combination: &Combination) -> String {
    format!("{}#", combination.id)
}

#[derive(Clone)]
struct TagResult {
    scope: Option<String>,
    values: Vec<DataPoint>,
}

/// Latest value per source; last write wins per key.
#[derive(Default)]
struct Accumulator {
    tags: DashMap<String, TagResult>,
    topic_filters: DashMap<String, QueuedMessage>,
}

struct RuntimeCore {
    combination: Combination,
    accumulator: Accumulator,
    sink: PublishSink,
}

impl RuntimeCore {
    fn record_tag(&self, tag_name: &str, scope: Option<&str>, values: Vec<DataPoint>) {
        self.accumulator.tags.insert(
            tag_name.to_string(),
            TagResult {
                scope: scope.map(str::to_string),
                values,
            },
        );
    }

    fn record_topic_filter(&self, topic_filter: &str, message: QueuedMessage) {
        self.accumulator
            .topic_filters
            .insert(topic_filter.to_string(), message);
    }

    /// Copy of the cache rendered as the output object.
    fn snapshot(&self) -> Map<String, Value> {
        let mut out = Map::new();
        for entry in &self.accumulator.topic_filters {
            out.insert(entry.key().clone(), Value::String(entry.value().payload_text()));
        }
        for entry in &self.accumulator.tags {
            let source = SourceRef {
                id: entry.key().clone(),
                kind: SourceKind::Tag,
                scope: entry.value().scope.clone(),
            };
            out.insert(sanitize(&source), Value::String(render_values(&entry.value().values)));
        }
        out
    }

    async fn trigger_publish(&self) -> Result<(), CombiningError> {
        let result = self.publish_snapshot().await;
        if let Err(err) = &result {
            error!(combination_id = %self.combination.id, %err, "combined publish failed");
        }
        result
    }

    async fn publish_snapshot(&self) -> Result<(), CombiningError> {
        let payload = serde_json::to_vec(&Value::Object(self.snapshot()))?;
        self.sink
            .publish(
                &self.combination.destination.topic,
                Bytes::from(payload),
                &self.combination,
            )
            .await
    }

    fn clear(&self) {
        self.accumulator.tags.clear();
        self.accumulator.topic_filters.clear();
    }
}

struct CombinationTagConsumer {
    tag_name: String,
    scope: Option<String>,
    is_primary: bool,
    core: Arc<RuntimeCore>,
}

#[async_trait]
impl TagConsumer for CombinationTagConsumer {
    fn tag_name(&self) -> &str {
        &self.tag_name
    }

    fn scope(&self) -> Option<&str> {
        self.scope.as_deref()
    }

    async fn accept(&self, values: Vec<DataPoint>) -> Result<(), CombiningError> {
        self.core
            .record_tag(&self.tag_name, self.scope.as_deref(), values);
        if self.is_primary {
            self.core.trigger_publish().await?;
        }
        Ok(())
    }
}

struct TopicFilterHandler {
    topic_filter: String,
    is_primary: bool,
    core: Arc<RuntimeCore>,
}

#[async_trait]
impl MessageHandler for TopicFilterHandler {
    async fn process(&self, message: &QueuedMessage) -> Result<(), CombiningError> {
        self.core
            .record_topic_filter(&self.topic_filter, message.clone());
        if self.is_primary {
            self.core.trigger_publish().await?;
        }
        Ok(())
    }
}

struct TopicSubscription {
    subscriber_id: String,
    topic_filter: String,
    shared_group: String,
    consumer: Arc<QueueConsumer>,
}

/// Runtime of one [`Combination`].
pub struct CombinationRuntime {
    core: Arc<RuntimeCore>,
    fabric: Fabric,
    state: Mutex<RuntimeState>,
    tag_consumers: Mutex<Vec<Arc<dyn TagConsumer>>>,
    subscriptions: Mutex<Vec<TopicSubscription>>,
}

impl CombinationRuntime {
    /// Idle runtime for `combination`.
    pub fn new(combination: Combination, fabric: Fabric) -> Self {
        let core = Arc::new(RuntimeCore {
            combination,
            accumulator: Accumulator::default(),
            sink: fabric.publish_sink(),
        });
        Self {
            core,
            fabric,
            state: Mutex::new(RuntimeState::Idle),
            tag_consumers: Mutex::new(Vec::new()),
            subscriptions: Mutex::new(Vec::new()),
        }
    }

    /// The combination this runtime serves.
    pub fn combination(&self) -> &Combination {
        &self.core.combination
    }

    /// Current lifecycle state.
    pub fn state(&self) -> RuntimeState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Subscribe to every source and go `Running`.
    ///
    /// Instruction sources come first, in encounter order, skipping any that
    /// equal the primary or an earlier instruction source. The primary is
    /// subscribed last. Queue consumers start only once every subscription
    /// is registered.
    pub fn start(&self) -> Result<(), CombiningError> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if *state != RuntimeState::Idle {
            return Err(CombiningError::InvalidState {
                combination_id: self.core.combination.id,
                state: *state,
            });
        }
        let combination = &self.core.combination;
        self.fabric
            .transformation
            .add_script_for_data_combining(combination);

        let primary = &combination.sources.primary;
        let mut seen: HashSet<&SourceRef> = HashSet::new();
        let mut consumers = Vec::new();
        for source in combination
            .instructions
            .iter()
            .filter_map(|instruction| instruction.source.as_ref())
        {
            if source == primary || !seen.insert(source) {
                continue;
            }
            consumers.extend(self.subscribe(source, false));
        }
        consumers.extend(self.subscribe(primary, true));

        for consumer in &consumers {
            consumer.start();
        }
        *state = RuntimeState::Running;
        info!(
            combination_id = %combination.id,
            primary = %primary.id,
            tag_consumers = self.lock_tag_consumers().len(),
            topic_filters = consumers.len(),
            "combination started"
        );
        Ok(())
    }

    /// Register one source; returns the queue consumer to start for topic filters.
    fn subscribe(&self, source: &SourceRef, is_primary: bool) -> Option<Arc<QueueConsumer>> {
        match source.kind {
            SourceKind::Tag => {
                let consumer: Arc<dyn TagConsumer> = Arc::new(CombinationTagConsumer {
                    tag_name: source.id.clone(),
                    scope: source.scope.clone(),
                    is_primary,
                    core: Arc::clone(&self.core),
                });
                self.fabric.tags.add_consumer(Arc::clone(&consumer));
                self.lock_tag_consumers().push(consumer);
                None
            }
            SourceKind::TopicFilter => {
                let combination = &self.core.combination;
                let subscriber_id = subscriber_id(combination);
                let shared_group = combination.id.to_string();
                self.fabric.pubsub.add_topic(
                    &subscriber_id,
                    &source.id,
                    Qos::AtLeastOnce,
                    SubscriptionFlags::shared(),
                    Some(&shared_group),
                );
                let handler = Arc::new(TopicFilterHandler {
                    topic_filter: source.id.clone(),
                    is_primary,
                    core: Arc::clone(&self.core),
                });
                let consumer = QueueConsumer::new(
                    queue_id(combination, &source.id),
                    Arc::clone(&self.fabric.queues),
                    handler,
                    self.fabric.poll_lanes.clone(),
                    self.fabric.queue_read_max_bytes,
                    self.fabric.runtime.clone(),
                );
                self.lock_subscriptions().push(TopicSubscription {
                    subscriber_id,
                    topic_filter: source.id.clone(),
                    shared_group,
                    consumer: Arc::clone(&consumer),
                });
                Some(consumer)
            }
        }
    }

    /// Tear down every subscription and go `Stopped`.
    ///
    /// The transformation hook is always told to drop its script, even when
    /// the runtime never started or was already stopped.
    pub fn stop(&self) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let combination = &self.core.combination;
        self.fabric
            .transformation
            .remove_script_for_data_combining(combination);

        let consumers = mem::take(&mut *self.lock_tag_consumers());
        for consumer in &consumers {
            self.fabric.tags.remove_consumer(consumer);
        }
        let subscriptions = mem::take(&mut *self.lock_subscriptions());
        for subscription in &subscriptions {
            subscription.consumer.close();
            self.fabric.pubsub.remove_subscriber(
                &subscription.subscriber_id,
                &subscription.topic_filter,
                Some(&subscription.shared_group),
            );
        }
        self.core.clear();

        if *state != RuntimeState::Stopped {
            debug!(
                combination_id = %combination.id,
                tag_consumers = consumers.len(),
                topic_filters = subscriptions.len(),
                "combination stopped"
            );
        }
        *state = RuntimeState::Stopped;
    }

    /// Snapshot the cache and publish it to the destination topic.
    ///
    /// Topic filters are keyed by the filter and carry the payload as text;
    /// tags are keyed by [`sanitize`] and carry their rendered values. An
    /// empty cache publishes `{}`.
    pub async fn trigger_publish(&self) -> Result<(), CombiningError> {
        self.core.trigger_publish().await
    }

    fn lock_tag_consumers(&self) -> std::sync::MutexGuard<'_, Vec<Arc<dyn TagConsumer>>> {
        self.tag_consumers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_subscriptions(&self) -> std::sync::MutexGuard<'_, Vec<TopicSubscription>> {
        self.subscriptions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for CombinationRuntime {
    fn drop(&mut self) {
        if self.state() == RuntimeState::Running {
            self.stop();
        }
    }
}
