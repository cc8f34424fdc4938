// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! In-memory reference fabric: tag bus, MQTT-style pub/sub with shared
//! groups, durable shared queues, and the publish pathway feeding them.
//!
//! Every subscription owns one queue. Members of the same shared group
//! subscribing to the same filter share that queue, so each message is
//! queued once per group. The queue id is `<group>/<filter>` (or
//! `<subscriber>/<filter>` outside a group), which is the id the combining
//! engine polls.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use edge_combining::{
    AvailabilityCallback, DataPoint, PubSubEngine, PublishError, PublishMessage, Publisher, Qos,
    QueueEngine, QueueError, QueuedMessage, SubscriptionFlags, TagConsumer, TagSubsystem,
};
use tracing::{debug, info, warn};

/// Whether `topic` matches the MQTT topic filter `filter`.
///
/// `+` matches exactly one level, a trailing `#` matches the parent level
/// and everything below it. Topics starting with `$` never match a filter
/// that starts with a wildcard.
pub fn topic_matches(filter: &str, topic: &str) -> bool {
    if topic.starts_with('$') && (filter.starts_with('+') || filter.starts_with('#')) {
        return false;
    }
    let mut levels = topic.split('/');
    for part in filter.split('/') {
        match part {
            "#" => return true,
            "+" => {
                if levels.next().is_none() {
                    return false;
                }
            }
            literal => {
                if levels.next() != Some(literal) {
                    return false;
                }
            }
        }
    }
    levels.next().is_none()
}

fn queue_key(subscriber_id: &str, topic_filter: &str, shared_group: Option<&str>) -> String {
    format!("{}/{}", shared_group.unwrap_or(subscriber_id), topic_filter)
}

struct Subscription {
    topic_filter: String,
    qos: Qos,
    members: HashSet<String>,
}

#[derive(Default)]
struct HubState {
    tag_consumers: Mutex<Vec<Arc<dyn TagConsumer>>>,
    subscriptions: Mutex<HashMap<String, Subscription>>,
    queues: DashMap<String, VecDeque<QueuedMessage>>,
    callbacks: DashMap<String, AvailabilityCallback>,
    next_message_id: AtomicU64,
}

/// The whole fabric in one process. Clones share state.
#[derive(Clone, Default)]
pub struct MemoryFabric {
    state: Arc<HubState>,
}

impl MemoryFabric {
    /// Empty fabric.
    pub fn new() -> Self {
        Self::default()
    }

    /// Hand `values` to every consumer of `tag_name` under `scope`. Returns
    /// how many consumers were reached; their failures are logged here.
    pub async fn deliver_tag(
        &self,
        tag_name: &str,
        scope: Option<&str>,
        values: Vec<DataPoint>,
    ) -> usize {
        let targets: Vec<Arc<dyn TagConsumer>> = self
            .state
            .tag_consumers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|c| c.tag_name() == tag_name && c.scope() == scope)
            .cloned()
            .collect();
        for consumer in &targets {
            if let Err(err) = consumer.accept(values.clone()).await {
                warn!(tag = tag_name, ?scope, %err, "tag consumer failed");
            }
        }
        targets.len()
    }

    /// Queue `payload` on every subscription matching `topic`, at the lower
    /// of the published and subscribed QoS. Returns the number of queues
    /// that received it.
    pub fn route(&self, topic: &str, payload: &Bytes, qos: Qos) -> usize {
        let targets: Vec<(String, Qos)> = self
            .lock_subscriptions()
            .iter()
            .filter(|(_, sub)| topic_matches(&sub.topic_filter, topic))
            .map(|(queue_id, sub)| (queue_id.clone(), qos.min(sub.qos)))
            .collect();

        for (queue_id, qos) in &targets {
            let unique_id = self
                .state
                .next_message_id
                .fetch_add(1, Ordering::Relaxed)
                .to_string();
            self.state
                .queues
                .entry(queue_id.clone())
                .or_default()
                .push_back(QueuedMessage {
                    unique_id,
                    topic: topic.to_string(),
                    payload: payload.clone(),
                    qos: *qos,
                });
            let callback = self
                .state
                .callbacks
                .get(queue_id)
                .map(|entry| Arc::clone(entry.value()));
            if let Some(callback) = callback {
                callback();
            }
        }
        targets.len()
    }

    /// Messages waiting on `queue_id`.
    #[cfg(test)]
    pub fn queue_depth(&self, queue_id: &str) -> usize {
        self.state.queues.get(queue_id).map_or(0, |q| q.len())
    }

    /// Number of registered tag consumers.
    pub fn tag_consumer_count(&self) -> usize {
        self.state
            .tag_consumers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    fn lock_subscriptions(&self) -> std::sync::MutexGuard<'_, HashMap<String, Subscription>> {
        self.state
            .subscriptions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl TagSubsystem for MemoryFabric {
    fn add_consumer(&self, consumer: Arc<dyn TagConsumer>) {
        debug!(tag = consumer.tag_name(), scope = ?consumer.scope(), "tag consumer added");
        self.state
            .tag_consumers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(consumer);
    }

    fn remove_consumer(&self, consumer: &Arc<dyn TagConsumer>) {
        self.state
            .tag_consumers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|c| !Arc::ptr_eq(c, consumer));
    }
}

impl PubSubEngine for MemoryFabric {
    fn add_topic(
        &self,
        subscriber_id: &str,
        topic_filter: &str,
        qos: Qos,
        _flags: SubscriptionFlags,
        shared_group: Option<&str>,
    ) -> bool {
        let queue_id = queue_key(subscriber_id, topic_filter, shared_group);
        let mut subscriptions = self.lock_subscriptions();
        let subscription = subscriptions
            .entry(queue_id.clone())
            .or_insert_with(|| Subscription {
                topic_filter: topic_filter.to_string(),
                qos,
                members: HashSet::new(),
            });
        subscription.qos = subscription.qos.max(qos);
        let added = subscription.members.insert(subscriber_id.to_string());
        debug!(%queue_id, subscriber_id, added, "subscription added");
        added
    }

    fn remove_subscriber(&self, subscriber_id: &str, topic_filter: &str, shared_group: Option<&str>) {
        let queue_id = queue_key(subscriber_id, topic_filter, shared_group);
        let mut subscriptions = self.lock_subscriptions();
        let emptied = subscriptions.get_mut(&queue_id).is_some_and(|sub| {
            sub.members.remove(subscriber_id);
            sub.members.is_empty()
        });
        if emptied {
            subscriptions.remove(&queue_id);
            self.state.queues.remove(&queue_id);
            debug!(%queue_id, "last subscriber left, queue dropped");
        }
    }
}

#[async_trait]
impl QueueEngine for MemoryFabric {
    fn add_publish_available_callback(&self, queue_id: &str, callback: AvailabilityCallback) {
        self.state.callbacks.insert(queue_id.to_string(), callback);
    }

    fn remove_publish_available_callback(&self, queue_id: &str) {
        self.state.callbacks.remove(queue_id);
    }

    async fn read_shared(
        &self,
        queue_id: &str,
        limit: usize,
        max_bytes: u64,
    ) -> Result<Vec<QueuedMessage>, QueueError> {
        let Some(mut queue) = self.state.queues.get_mut(queue_id) else {
            return Ok(Vec::new());
        };
        let mut out = Vec::new();
        let mut budget = max_bytes;
        let mut index = 0;
        while out.len() < limit && index < queue.len() {
            let size = u64::try_from(queue[index].size()).unwrap_or(u64::MAX);
            if size > budget {
                break;
            }
            budget -= size;
            if queue[index].qos == Qos::AtMostOnce {
                out.extend(queue.remove(index));
            } else {
                out.push(queue[index].clone());
                index += 1;
            }
        }
        Ok(out)
    }

    async fn remove_shared(&self, queue_id: &str, unique_id: &str) -> Result<(), QueueError> {
        let Some(mut queue) = self.state.queues.get_mut(queue_id) else {
            return Err(QueueError::Remove {
                queue_id: queue_id.to_string(),
                unique_id: unique_id.to_string(),
                reason: "no such queue".into(),
            });
        };
        queue.retain(|m| m.unique_id != unique_id);
        Ok(())
    }
}

#[async_trait]
impl Publisher for MemoryFabric {
    async fn publish(&self, message: PublishMessage) -> Result<(), PublishError> {
        info!(
            topic = %message.topic,
            client_id = %message.client_id,
            payload = %String::from_utf8_lossy(&message.payload),
            "message published"
        );
        self.route(&message.topic, &message.payload, message.qos);
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::time::Duration;

    use edge_combining::{
        CombinationRuntime, Combination, CombiningError, Destination, Fabric, Instruction,
        SourceRef,
    };
    use serde_json::json;
    use tokio::runtime::Handle;

    #[test]
    fn single_level_wildcard_matches_one_level() {
        assert!(topic_matches("sensors/+/temp", "sensors/a/temp"));
        assert!(!topic_matches("sensors/+/temp", "sensors/a/b/temp"));
        assert!(!topic_matches("sensors/+", "sensors"));
        assert!(topic_matches("+", ""));
    }

    #[test]
    fn multi_level_wildcard_matches_parent_and_below() {
        assert!(topic_matches("sensors/#", "sensors"));
        assert!(topic_matches("sensors/#", "sensors/a/b"));
        assert!(topic_matches("#", "anything/at/all"));
        assert!(!topic_matches("sensors/#", "actuators/a"));
    }

    #[test]
    fn literal_filters_match_exactly() {
        assert!(topic_matches("a/b", "a/b"));
        assert!(!topic_matches("a/b", "a/b/c"));
        assert!(!topic_matches("a/b/c", "a/b"));
    }

    #[test]
    fn system_topics_escape_leading_wildcards() {
        assert!(!topic_matches("#", "$SYS/uptime"));
        assert!(!topic_matches("+/uptime", "$SYS/uptime"));
        assert!(topic_matches("$SYS/#", "$SYS/uptime"));
    }

    #[tokio::test]
    async fn shared_group_members_share_one_queue() {
        let hub = MemoryFabric::new();
        let flags = SubscriptionFlags::shared();
        assert!(hub.add_topic("a#", "s/#", Qos::AtLeastOnce, flags, Some("g")));
        assert!(hub.add_topic("b#", "s/#", Qos::AtLeastOnce, flags, Some("g")));
        assert!(!hub.add_topic("a#", "s/#", Qos::AtLeastOnce, flags, Some("g")));

        assert_eq!(hub.route("s/1", &Bytes::from_static(b"x"), Qos::AtLeastOnce), 1);
        assert_eq!(hub.queue_depth("g/s/#"), 1);

        hub.remove_subscriber("a#", "s/#", Some("g"));
        assert_eq!(hub.queue_depth("g/s/#"), 1);
        hub.remove_subscriber("b#", "s/#", Some("g"));
        assert_eq!(hub.queue_depth("g/s/#"), 0);
        assert_eq!(hub.route("s/1", &Bytes::from_static(b"x"), Qos::AtLeastOnce), 0);
    }

    #[tokio::test]
    async fn qos0_leaves_the_queue_on_read() {
        let hub = MemoryFabric::new();
        hub.add_topic("s#", "t", Qos::AtLeastOnce, SubscriptionFlags::default(), None);
        hub.route("t", &Bytes::from_static(b"0"), Qos::AtMostOnce);
        hub.route("t", &Bytes::from_static(b"1"), Qos::ExactlyOnce);

        let first = hub.read_shared("s#/t", 1, 1024).await.unwrap();
        assert_eq!(first[0].qos, Qos::AtMostOnce);
        let second = hub.read_shared("s#/t", 1, 1024).await.unwrap();
        assert_eq!(second[0].qos, Qos::AtLeastOnce);
        assert_eq!(hub.queue_depth("s#/t"), 1);

        hub.remove_shared("s#/t", &second[0].unique_id).await.unwrap();
        assert_eq!(hub.queue_depth("s#/t"), 0);
    }

    #[tokio::test]
    async fn removing_from_an_unknown_queue_fails() {
        let hub = MemoryFabric::new();
        assert!(matches!(
            hub.remove_shared("nope", "1").await,
            Err(QueueError::Remove { .. })
        ));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn combination_runs_end_to_end() {
        let hub = MemoryFabric::new();
        let fabric = Fabric::new(
            Arc::new(hub.clone()),
            Arc::new(hub.clone()),
            Arc::new(hub.clone()),
            Arc::new(hub.clone()),
            Handle::current(),
        );
        let mut combination = Combination::new(
            SourceRef::topic_filter("sensors/+/temp"),
            Destination::topic("plant/combined"),
        );
        combination.instructions.push(Instruction {
            source_path: "$.state".into(),
            destination_key: "state".into(),
            source: Some(SourceRef::tag("state", "plc1")),
        });
        let runtime = CombinationRuntime::new(combination, fabric);
        hub.add_topic("observer", "plant/#", Qos::AtLeastOnce, SubscriptionFlags::default(), None);
        runtime.start().unwrap();

        let reached = hub
            .deliver_tag("state", Some("plc1"), vec![DataPoint::new("state", "run")])
            .await;
        assert_eq!(reached, 1);
        hub.route("sensors/a/temp", &Bytes::from_static(b"21"), Qos::AtLeastOnce);

        let output = tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                let read = hub.read_shared("observer/plant/#", 1, 1 << 20).await;
                if let Some(message) = read.ok().and_then(|m| m.into_iter().next()) {
                    return message;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();

        let payload: serde_json::Value = serde_json::from_slice(&output.payload).unwrap();
        assert_eq!(payload, json!({ "sensors/+/temp": "21", "TAG:state": "run" }));
        runtime.stop();
        assert_eq!(hub.tag_consumer_count(), 0);
    }

    #[tokio::test]
    async fn tag_failures_are_absorbed_by_the_bus() {
        struct Failing;
        #[async_trait]
        impl TagConsumer for Failing {
            fn tag_name(&self) -> &str {
                "t"
            }
            fn scope(&self) -> Option<&str> {
                None
            }
            async fn accept(&self, _values: Vec<DataPoint>) -> Result<(), CombiningError> {
                Err(CombiningError::Handler("nope".into()))
            }
        }
        let hub = MemoryFabric::new();
        hub.add_consumer(Arc::new(Failing));
        assert_eq!(hub.deliver_tag("t", None, vec![DataPoint::new("t", 1)]).await, 1);
        assert_eq!(hub.deliver_tag("t", Some("x"), vec![]).await, 0);
    }
}
