// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Shared test doubles and fixtures for edge gateway crates.
#![forbid(unsafe_code)]
//!
//! # Modules
//!
//! - [`config`] - In-memory config store fake for testing without filesystem
//! - [`events`] - Event sink that records lifecycle events
//! - [`fixtures`] - Combination builders and a fully wired [`TestFabric`]
//! - [`publisher`] - Publisher double with failure and latency knobs
//! - [`pubsub`] - Pub/sub engine double that records subscriptions
//! - [`queue`] - Scripted in-memory shared queue engine
//! - [`tags`] - Tag subsystem double that can deliver values to consumers
//! - [`transform`] - Transformation hook double counting script installs

pub mod config;
pub mod events;
pub mod fixtures;
pub mod publisher;
pub mod pubsub;
pub mod queue;
pub mod tags;
pub mod transform;

pub use config::InMemoryConfigStore;
pub use events::RecordingEventSink;
pub use fixtures::{memory_combiner_store, wait_until, CombinationBuilder, TestFabric};
pub use publisher::RecordingPublisher;
pub use pubsub::{RecordingPubSub, SubscribeCall};
pub use queue::ScriptedQueueEngine;
pub use tags::RecordingTagSubsystem;
pub use transform::RecordingTransformation;
