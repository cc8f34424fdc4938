// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Publisher double.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use edge_combining::{PublishError, PublishMessage, Publisher};

/// [`Publisher`] that records accepted messages.
///
/// It can be told to refuse everything, and to hold each publish for a fixed
/// delay so tests can observe overlapping publishes.
#[derive(Clone, Default)]
pub struct RecordingPublisher {
    inner: Arc<Inner>,
}

#[derive(Default)]
struct Inner {
    published: Mutex<Vec<PublishMessage>>,
    attempts: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    fail: AtomicBool,
    delay: Mutex<Option<Duration>>,
}

impl RecordingPublisher {
    /// Publisher accepting every message immediately.
    pub fn new() -> Self {
        Self::default()
    }

    /// Refuse (or accept again) every subsequent publish.
    pub fn set_fail(&self, fail: bool) {
        self.inner.fail.store(fail, Ordering::SeqCst);
    }

    /// Hold each publish for `delay` before resolving.
    pub fn set_delay(&self, delay: Option<Duration>) {
        *self.inner.delay.lock().unwrap_or_else(|e| e.into_inner()) = delay;
    }

    /// Messages accepted so far, in acceptance order.
    pub fn published(&self) -> Vec<PublishMessage> {
        self.inner
            .published
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Payloads accepted so far, parsed as JSON.
    pub fn published_json(&self) -> Vec<serde_json::Value> {
        self.published()
            .iter()
            .filter_map(|m| serde_json::from_slice(&m.payload).ok())
            .collect()
    }

    /// Publish calls seen, refused ones included.
    pub fn attempts(&self) -> usize {
        self.inner.attempts.load(Ordering::SeqCst)
    }

    /// Highest number of publishes observed in flight at once.
    pub fn max_in_flight(&self) -> usize {
        self.inner.max_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Publisher for RecordingPublisher {
    async fn publish(&self, message: PublishMessage) -> Result<(), PublishError> {
        self.inner.attempts.fetch_add(1, Ordering::SeqCst);
        let now = self.inner.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.inner.max_in_flight.fetch_max(now, Ordering::SeqCst);

        let delay = *self.inner.delay.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.inner.in_flight.fetch_sub(1, Ordering::SeqCst);

        if self.inner.fail.load(Ordering::SeqCst) {
            return Err(PublishError::Rejected {
                topic: message.topic,
                reason: "simulated refusal".into(),
            });
        }
        self.inner
            .published
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(message);
        Ok(())
    }
}
