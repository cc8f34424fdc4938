// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! edge-combining: aggregates data from independent, asynchronously updating
//! sources into one composite message per primary-source update.
//!
//! A [`CombinerRegistry`] owns the [`DataCombiner`] definitions and builds one
//! [`CombinationRuntime`] per [`Combination`]. Each runtime subscribes to tag
//! sources through the [`TagSubsystem`] and to topic-filter sources through a
//! shared subscription drained by a [`QueueConsumer`]. Whenever the primary
//! source delivers, the runtime snapshots its latest-value-per-source cache,
//! serializes it to a JSON object and hands it to the [`PublishSink`].
//!
//! The queue engine, pub/sub engine, tag subsystem, publish pathway,
//! transformation hook and lifecycle event sink are collaborators described
//! by the traits in [`ports`]; the engine never talks to a concrete broker.
#![forbid(unsafe_code)]

pub mod consumer;
pub mod error;
pub mod fabric;
pub mod model;
pub mod ports;
pub mod publish;
pub mod registry;
pub mod runtime;
pub mod sanitize;
pub mod store;

pub use consumer::{MessageHandler, PollLanes, QueueConsumer};
pub use error::{CombiningError, PublishError, QueueError, RegistryError, TransformError};
pub use fabric::Fabric;
pub use model::{Combination, DataCombiner, DataSources, Destination, Instruction, SourceKind, SourceRef};
pub use ports::{
    AvailabilityCallback, DataPoint, EventSink, LifecycleEvent, NoopTransformation, PubSubEngine,
    PublishMessage, Publisher, Qos, QueueEngine, QueuedMessage, SubscriptionFlags, TagConsumer,
    TagSubsystem, TransformationHook,
};
pub use publish::PublishSink;
pub use registry::{AddResult, CombinerRegistry};
pub use runtime::{CombinationRuntime, RuntimeState};
pub use sanitize::sanitize;
pub use store::{CombinerStore, ConfigCombinerStore, DATA_COMBINERS_KEY};

/// Maximum number of messages a [`QueueConsumer`] pulls per poll.
pub const QUEUE_READ_LIMIT: usize = 1;
