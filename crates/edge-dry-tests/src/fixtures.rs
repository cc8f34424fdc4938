// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Fixture builders and a fully wired fabric of doubles.
//!
//! # Example
//!
//! ```
//! use edge_combining::SourceRef;
//! use edge_dry_tests::CombinationBuilder;
//!
//! let combination = CombinationBuilder::new(SourceRef::tag("temp", "plc1"))
//!     .destination("plant/combined")
//!     .topic_filter("sensors/#")
//!     .build();
//! assert_eq!(combination.instructions.len(), 1);
//! assert!(combination.sources.topic_filters.contains("sensors/#"));
//! ```

use std::sync::Arc;
use std::time::Duration;

use edge_combining::{
    CombinerRegistry, Combination, ConfigCombinerStore, Destination, Fabric, Instruction, SourceKind,
    SourceRef,
};
use tokio::runtime::Handle;
use tokio::time::{sleep, Instant};

use crate::{
    InMemoryConfigStore, RecordingEventSink, RecordingPubSub, RecordingPublisher,
    RecordingTagSubsystem, RecordingTransformation, ScriptedQueueEngine,
};

/// Builder for [`Combination`] values in tests.
#[derive(Debug, Clone)]
pub struct CombinationBuilder {
    combination: Combination,
}

impl CombinationBuilder {
    /// Combination with `primary` publishing to `combined/out`.
    pub fn new(primary: SourceRef) -> Self {
        let mut combination = Combination::new(primary.clone(), Destination::topic("combined/out"));
        register_source(&mut combination, &primary);
        Self { combination }
    }

    /// Publish to `topic` instead.
    pub fn destination(mut self, topic: &str) -> Self {
        self.combination.destination = Destination::topic(topic);
        self
    }

    /// Add an instruction reading from tag `id` under `scope`.
    pub fn tag(self, id: &str, scope: &str) -> Self {
        self.source(SourceRef::tag(id, scope))
    }

    /// Add an instruction reading from topic filter `filter`.
    pub fn topic_filter(self, filter: &str) -> Self {
        self.source(SourceRef::topic_filter(filter))
    }

    /// Add an instruction reading from `source`.
    pub fn source(mut self, source: SourceRef) -> Self {
        register_source(&mut self.combination, &source);
        let index = self.combination.instructions.len();
        self.combination.instructions.push(Instruction {
            source_path: format!("$.{}", source.id),
            destination_key: format!("field{index}"),
            source: Some(source),
        });
        self
    }

    /// Add an instruction without a pinned source.
    pub fn unsourced_instruction(mut self, path: &str, key: &str) -> Self {
        self.combination.instructions.push(Instruction {
            source_path: path.to_string(),
            destination_key: key.to_string(),
            source: None,
        });
        self
    }

    /// Finish.
    pub fn build(self) -> Combination {
        self.combination
    }
}

fn register_source(combination: &mut Combination, source: &SourceRef) {
    match source.kind {
        SourceKind::Tag => combination.sources.tags.insert(source.id.clone()),
        SourceKind::TopicFilter => combination.sources.topic_filters.insert(source.id.clone()),
    };
}

/// Every collaborator double, plus a way to wire them into a [`Fabric`].
#[derive(Clone, Default)]
pub struct TestFabric {
    /// Tag subsystem.
    pub tags: RecordingTagSubsystem,
    /// Pub/sub engine.
    pub pubsub: RecordingPubSub,
    /// Shared queue engine.
    pub queues: ScriptedQueueEngine,
    /// Publish pathway.
    pub publisher: RecordingPublisher,
    /// Transformation hook.
    pub transformation: RecordingTransformation,
    /// Lifecycle event sink.
    pub events: RecordingEventSink,
}

impl TestFabric {
    /// Fresh doubles.
    pub fn new() -> Self {
        Self::default()
    }

    /// Fabric over the doubles, spawning polls on the current Tokio runtime.
    ///
    /// Must be called from within a runtime.
    pub fn fabric(&self) -> Fabric {
        Fabric::new(
            Arc::new(self.tags.clone()),
            Arc::new(self.pubsub.clone()),
            Arc::new(self.queues.clone()),
            Arc::new(self.publisher.clone()),
            Handle::current(),
        )
        .with_transformation(Arc::new(self.transformation.clone()))
    }

    /// Registry over the doubles, persisting into `store`.
    pub fn registry(&self, store: &InMemoryConfigStore) -> CombinerRegistry {
        CombinerRegistry::new(
            self.fabric(),
            Arc::new(ConfigCombinerStore::new(store.clone())),
            Arc::new(self.events.clone()),
        )
    }
}

/// Fresh config store plus a combiner store persisting into it.
pub fn memory_combiner_store() -> (InMemoryConfigStore, ConfigCombinerStore<InMemoryConfigStore>) {
    let config = InMemoryConfigStore::new();
    let store = ConfigCombinerStore::new(config.clone());
    (config, store)
}

/// Poll `condition` every few milliseconds until it holds or `timeout`
/// elapses. Returns whether it held.
pub async fn wait_until<F>(timeout: Duration, mut condition: F) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = Instant::now() + timeout;
    loop {
        if condition() {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        sleep(Duration::from_millis(5)).await;
    }
}

