// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Error types for the combining engine and the collaborators it calls.

use edge_app_core::config::ConfigError;
use thiserror::Error;
use tokio::task::JoinError;
use uuid::Uuid;

use crate::runtime::RuntimeState;

/// Failure reported by the durable shared queue engine.
#[derive(Debug, Error)]
pub enum QueueError {
    /// Reading from a shared queue failed.
    #[error("read from queue {queue_id} failed: {reason}")]
    Read {
        /// Queue that was read.
        queue_id: String,
        /// Engine-provided cause.
        reason: String,
    },
    /// Removing (acknowledging) a message failed.
    #[error("remove of {unique_id} from queue {queue_id} failed: {reason}")]
    Remove {
        /// Queue the message belongs to.
        queue_id: String,
        /// Unique id of the message.
        unique_id: String,
        /// Engine-provided cause.
        reason: String,
    },
}

/// Failure reported by the publish pathway.
#[derive(Debug, Error)]
pub enum PublishError {
    /// The broker refused the message.
    #[error("publish to {topic} rejected: {reason}")]
    Rejected {
        /// Destination topic.
        topic: String,
        /// Broker-provided cause.
        reason: String,
    },
    /// The pathway could not be reached at all.
    #[error("publish pathway unavailable: {0}")]
    Unavailable(String),
}

/// Failure reported by the transformation hook.
#[derive(Debug, Error)]
#[error("transformation for combination {combination_id} failed: {reason}")]
pub struct TransformError {
    /// Combination whose payload was being shaped.
    pub combination_id: Uuid,
    /// Hook-provided cause.
    pub reason: String,
}

/// Errors raised while a combination runtime reacts to source data.
#[derive(Debug, Error)]
pub enum CombiningError {
    /// The accumulated payload could not be serialized.
    #[error("failed to serialize combined payload: {0}")]
    Serialization(#[from] serde_json::Error),
    /// The publish pathway failed.
    #[error(transparent)]
    Publish(#[from] PublishError),
    /// The transformation hook failed.
    #[error(transparent)]
    Transform(#[from] TransformError),
    /// The queue engine failed.
    #[error(transparent)]
    Queue(#[from] QueueError),
    /// `start` was called on a runtime that already left the idle state.
    #[error("combination {combination_id} runtime is {state:?}, expected idle")]
    InvalidState {
        /// Combination of the runtime.
        combination_id: Uuid,
        /// State the runtime was in.
        state: RuntimeState,
    },
    /// A message handler reported a failure of its own.
    #[error("message handler failed: {0}")]
    Handler(String),
}

/// Errors surfaced by registry operations.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// A combiner with this id is already registered.
    #[error("data combiner {0} already exists")]
    AlreadyExists(Uuid),
    /// The persistent configuration store failed.
    #[error("failed to persist data combiner: {0}")]
    Persistence(#[from] ConfigError),
    /// The task carrying the operation panicked or was aborted.
    #[error("registry task failed: {0}")]
    Task(#[from] JoinError),
}
