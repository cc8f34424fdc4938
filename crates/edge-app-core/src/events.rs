// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Bounded lifecycle event log with dedupe for gateway components.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

/// Event severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventSeverity {
    /// Informational note.
    Info,
    /// Warning that may need attention.
    Warn,
    /// Error requiring operator awareness.
    Error,
}

/// Identifier for an event entry.
pub type EventId = u64;

/// Event data stored in the log.
#[derive(Debug, Clone)]
pub struct Event {
    /// Stable identifier.
    pub id: EventId,
    /// Severity.
    pub severity: EventSeverity,
    /// Component or entity the event is about (e.g. a combiner id).
    pub source: String,
    /// Human-readable message.
    pub message: String,
    /// How many identical events were folded into this one.
    pub repeats: u32,
    /// Time of the most recent occurrence.
    pub last_seen: Instant,
}

struct EventLogInner {
    queue: VecDeque<Event>,
    max: usize,
    dedupe_window: Duration,
    next_id: EventId,
}

/// In-memory event log with a maximum length and a dedupe window.
///
/// Cloning shares the underlying log.
#[derive(Clone)]
pub struct EventLog {
    inner: Arc<Mutex<EventLogInner>>,
}

impl EventLog {
    /// Create a new log holding at most `max` events.
    pub fn new(max: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(EventLogInner {
                queue: VecDeque::new(),
                max: max.max(1),
                dedupe_window: Duration::from_millis(500),
                next_id: 1,
            })),
        }
    }

    /// Record an event now.
    pub fn push<S, M>(&self, severity: EventSeverity, source: S, message: M) -> EventId
    where
        S: Into<String>,
        M: Into<String>,
    {
        self.push_at(severity, source, message, Instant::now())
    }

    /// Record an event at `now`, folding identical entries (same
    /// severity/source/message seen within the dedupe window).
    pub fn push_at<S, M>(&self, severity: EventSeverity, source: S, message: M, now: Instant) -> EventId
    where
        S: Into<String>,
        M: Into<String>,
    {
        let source = source.into();
        let message = message.into();
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        let window = inner.dedupe_window;

        if let Some(existing) = inner.queue.iter_mut().find(|e| {
            e.severity == severity
                && e.source == source
                && e.message == message
                && now.saturating_duration_since(e.last_seen) <= window
        }) {
            existing.last_seen = now;
            existing.repeats = existing.repeats.saturating_add(1);
            return existing.id;
        }

        let id = inner.next_id;
        inner.next_id += 1;
        if inner.queue.len() == inner.max {
            inner.queue.pop_front();
        }
        inner.queue.push_back(Event {
            id,
            severity,
            source,
            message,
            repeats: 0,
            last_seen: now,
        });
        id
    }

    /// Snapshot of the retained events, oldest first.
    pub fn recent(&self) -> Vec<Event> {
        let inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        inner.queue.iter().cloned().collect()
    }

    /// Number of retained events.
    pub fn len(&self) -> usize {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .queue
            .len()
    }

    /// Whether the log holds no events.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
