// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Event sink that keeps every fired event.

use std::sync::{Arc, Mutex};

use edge_combining::{EventSink, LifecycleEvent};

/// [`EventSink`] recording events in firing order.
#[derive(Clone, Default)]
pub struct RecordingEventSink {
    events: Arc<Mutex<Vec<LifecycleEvent>>>,
}

impl RecordingEventSink {
    /// Empty sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Every event fired so far.
    pub fn events(&self) -> Vec<LifecycleEvent> {
        self.events.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

impl EventSink for RecordingEventSink {
    fn fire(&self, event: LifecycleEvent) {
        self.events
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(event);
    }
}
