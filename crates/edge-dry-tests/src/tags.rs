// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Tag subsystem double.

use std::sync::{Arc, Mutex};

use edge_combining::{CombiningError, DataPoint, TagConsumer, TagSubsystem};

#[derive(Default)]
struct Inner {
    consumers: Vec<Arc<dyn TagConsumer>>,
    added: Vec<(String, Option<String>)>,
    removed: Vec<(String, Option<String>)>,
}

/// [`TagSubsystem`] that keeps registered consumers and lets tests push
/// values to them.
#[derive(Clone, Default)]
pub struct RecordingTagSubsystem {
    inner: Arc<Mutex<Inner>>,
}

impl RecordingTagSubsystem {
    /// Empty subsystem.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// `(tag, scope)` of every `add_consumer` call, in call order.
    pub fn added(&self) -> Vec<(String, Option<String>)> {
        self.lock().added.clone()
    }

    /// `(tag, scope)` of every `remove_consumer` call, in call order.
    pub fn removed(&self) -> Vec<(String, Option<String>)> {
        self.lock().removed.clone()
    }

    /// Number of currently registered consumers.
    pub fn consumer_count(&self) -> usize {
        self.lock().consumers.len()
    }

    /// Deliver `values` to every consumer of `tag_name` under `scope`.
    /// Returns one result per consumer reached.
    pub async fn deliver(
        &self,
        tag_name: &str,
        scope: Option<&str>,
        values: Vec<DataPoint>,
    ) -> Vec<Result<(), CombiningError>> {
        let targets: Vec<Arc<dyn TagConsumer>> = self
            .lock()
            .consumers
            .iter()
            .filter(|c| c.tag_name() == tag_name && c.scope() == scope)
            .cloned()
            .collect();
        let mut results = Vec::with_capacity(targets.len());
        for consumer in targets {
            results.push(consumer.accept(values.clone()).await);
        }
        results
    }

    /// Deliver a single value for `tag_name` under `scope`.
    pub async fn deliver_value(
        &self,
        tag_name: &str,
        scope: &str,
        value: impl Into<serde_json::Value>,
    ) -> Vec<Result<(), CombiningError>> {
        self.deliver(tag_name, Some(scope), vec![DataPoint::new(tag_name, value)])
            .await
    }
}

impl TagSubsystem for RecordingTagSubsystem {
    fn add_consumer(&self, consumer: Arc<dyn TagConsumer>) {
        let mut inner = self.lock();
        inner.added.push((
            consumer.tag_name().to_string(),
            consumer.scope().map(str::to_string),
        ));
        inner.consumers.push(consumer);
    }

    fn remove_consumer(&self, consumer: &Arc<dyn TagConsumer>) {
        let mut inner = self.lock();
        inner.removed.push((
            consumer.tag_name().to_string(),
            consumer.scope().map(str::to_string),
        ));
        inner.consumers.retain(|c| !Arc::ptr_eq(c, consumer));
    }
}
