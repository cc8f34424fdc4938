// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Pub/sub engine double.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use edge_combining::{PubSubEngine, Qos, SubscriptionFlags};

/// One recorded `add_topic` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscribeCall {
    /// Subscriber id.
    pub subscriber_id: String,
    /// Topic filter.
    pub topic_filter: String,
    /// Requested QoS.
    pub qos: Qos,
    /// Subscription flags.
    pub flags: SubscriptionFlags,
    /// Shared group, if any.
    pub shared_group: Option<String>,
}

type SubscriptionKey = (String, String, Option<String>);

#[derive(Default)]
struct Inner {
    calls: Vec<SubscribeCall>,
    removals: Vec<SubscriptionKey>,
    active: HashSet<SubscriptionKey>,
}

/// [`PubSubEngine`] that records subscribe/unsubscribe calls and tracks the
/// live subscription set.
#[derive(Clone, Default)]
pub struct RecordingPubSub {
    inner: Arc<Mutex<Inner>>,
}

impl RecordingPubSub {
    /// Empty engine.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Every `add_topic` call, in call order.
    pub fn subscribe_calls(&self) -> Vec<SubscribeCall> {
        self.lock().calls.clone()
    }

    /// Topic filters subscribed, in call order.
    pub fn subscribed_filters(&self) -> Vec<String> {
        self.lock()
            .calls
            .iter()
            .map(|c| c.topic_filter.clone())
            .collect()
    }

    /// Number of `remove_subscriber` calls.
    pub fn removal_count(&self) -> usize {
        self.lock().removals.len()
    }

    /// Number of live subscriptions.
    pub fn active_count(&self) -> usize {
        self.lock().active.len()
    }
}

impl PubSubEngine for RecordingPubSub {
    fn add_topic(
        &self,
        subscriber_id: &str,
        topic_filter: &str,
        qos: Qos,
        flags: SubscriptionFlags,
        shared_group: Option<&str>,
    ) -> bool {
        let mut inner = self.lock();
        inner.calls.push(SubscribeCall {
            subscriber_id: subscriber_id.to_string(),
            topic_filter: topic_filter.to_string(),
            qos,
            flags,
            shared_group: shared_group.map(str::to_string),
        });
        inner.active.insert((
            subscriber_id.to_string(),
            topic_filter.to_string(),
            shared_group.map(str::to_string),
        ))
    }

    fn remove_subscriber(&self, subscriber_id: &str, topic_filter: &str, shared_group: Option<&str>) {
        let key = (
            subscriber_id.to_string(),
            topic_filter.to_string(),
            shared_group.map(str::to_string),
        );
        let mut inner = self.lock();
        inner.active.remove(&key);
        inner.removals.push(key);
    }
}
