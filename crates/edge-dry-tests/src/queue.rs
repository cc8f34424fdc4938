// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Scripted in-memory shared queue engine.
//!
//! Messages stay queued until acknowledged, except at QoS 0 where reading
//! removes them. Pushing a message fires the queue's availability callback,
//! as a broker would.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bytes::Bytes;
use edge_combining::{AvailabilityCallback, Qos, QueueEngine, QueueError, QueuedMessage};

#[derive(Default)]
struct Inner {
    queues: HashMap<String, VecDeque<QueuedMessage>>,
    callbacks: HashMap<String, AvailabilityCallback>,
    removed: Vec<(String, String)>,
    reads: usize,
    fail_reads: usize,
    next_id: u64,
}

/// [`QueueEngine`] double backed by per-queue deques.
#[derive(Clone, Default)]
pub struct ScriptedQueueEngine {
    inner: Arc<Mutex<Inner>>,
}

impl ScriptedQueueEngine {
    /// Engine with no queues.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Enqueue a message on `queue_id` and fire its availability callback.
    /// Returns the message's unique id.
    pub fn push(&self, queue_id: &str, topic: &str, payload: impl Into<Bytes>, qos: Qos) -> String {
        let (callback, unique_id) = {
            let mut inner = self.lock();
            inner.next_id += 1;
            let unique_id = format!("msg-{}", inner.next_id);
            inner
                .queues
                .entry(queue_id.to_string())
                .or_default()
                .push_back(QueuedMessage {
                    unique_id: unique_id.clone(),
                    topic: topic.to_string(),
                    payload: payload.into(),
                    qos,
                });
            (inner.callbacks.get(queue_id).cloned(), unique_id)
        };
        if let Some(callback) = callback {
            callback();
        }
        unique_id
    }

    /// Make the next `count` reads fail.
    pub fn fail_next_reads(&self, count: usize) {
        self.lock().fail_reads = count;
    }

    /// Messages still queued on `queue_id`.
    pub fn pending(&self, queue_id: &str) -> usize {
        self.lock().queues.get(queue_id).map_or(0, VecDeque::len)
    }

    /// `(queue_id, unique_id)` of every acknowledged message.
    pub fn removed(&self) -> Vec<(String, String)> {
        self.lock().removed.clone()
    }

    /// Number of `read_shared` calls, failed ones included.
    pub fn reads(&self) -> usize {
        self.lock().reads
    }

    /// Whether an availability callback is registered for `queue_id`.
    pub fn has_callback(&self, queue_id: &str) -> bool {
        self.lock().callbacks.contains_key(queue_id)
    }
}

#[async_trait]
impl QueueEngine for ScriptedQueueEngine {
    fn add_publish_available_callback(&self, queue_id: &str, callback: AvailabilityCallback) {
        self.lock().callbacks.insert(queue_id.to_string(), callback);
    }

    fn remove_publish_available_callback(&self, queue_id: &str) {
        self.lock().callbacks.remove(queue_id);
    }

    async fn read_shared(
        &self,
        queue_id: &str,
        limit: usize,
        max_bytes: u64,
    ) -> Result<Vec<QueuedMessage>, QueueError> {
        let mut inner = self.lock();
        inner.reads += 1;
        if inner.fail_reads > 0 {
            inner.fail_reads -= 1;
            return Err(QueueError::Read {
                queue_id: queue_id.to_string(),
                reason: "simulated read failure".into(),
            });
        }
        let Some(queue) = inner.queues.get_mut(queue_id) else {
            return Ok(Vec::new());
        };

        let mut out = Vec::new();
        let mut budget = max_bytes;
        let mut index = 0;
        while out.len() < limit && index < queue.len() {
            let size = queue[index].size() as u64;
            if size > budget {
                break;
            }
            budget -= size;
            if queue[index].qos == Qos::AtMostOnce {
                if let Some(message) = queue.remove(index) {
                    out.push(message);
                }
            } else {
                out.push(queue[index].clone());
                index += 1;
            }
        }
        Ok(out)
    }

    async fn remove_shared(&self, queue_id: &str, unique_id: &str) -> Result<(), QueueError> {
        let mut inner = self.lock();
        if let Some(queue) = inner.queues.get_mut(queue_id) {
            queue.retain(|m| m.unique_id != unique_id);
        }
        inner
            .removed
            .push((queue_id.to_string(), unique_id.to_string()));
        Ok(())
    }
}
