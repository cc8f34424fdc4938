// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Outbound send of combined messages.

use std::sync::Arc;

use bytes::Bytes;
use tracing::debug;

use crate::error::CombiningError;
use crate::model::Combination;
use crate::ports::{PublishMessage, Publisher, Qos, TransformationHook};

/// Wraps the publish pathway for combined messages.
///
/// `publish` resolves only after the pathway accepted or refused the
/// message; the triggering delivery waits for it and receives its error.
/// Nothing is retried here.
#[derive(Clone)]
pub struct PublishSink {
    publisher: Arc<dyn Publisher>,
    transformation: Arc<dyn TransformationHook>,
    client_id: Arc<str>,
}

impl PublishSink {
    /// New sink publishing through `publisher` as `client_id`.
    pub fn new(
        publisher: Arc<dyn Publisher>,
        transformation: Arc<dyn TransformationHook>,
        client_id: Arc<str>,
    ) -> Self {
        Self {
            publisher,
            transformation,
            client_id,
        }
    }

    /// Publish `payload` to `topic` at [`Qos::AtLeastOnce`], after letting
    /// the transformation hook shape it for `combination`.
    pub async fn publish(
        &self,
        topic: &str,
        payload: Bytes,
        combination: &Combination,
    ) -> Result<(), CombiningError> {
        let mut message = PublishMessage {
            topic: topic.to_string(),
            payload,
            qos: Qos::AtLeastOnce,
            client_id: self.client_id.to_string(),
        };
        self.transformation
            .apply_mappings(&mut message, combination)
            .await?;
        debug!(
            combination_id = %combination.id,
            topic = %message.topic,
            bytes = message.payload.len(),
            "publishing combined message"
        );
        self.publisher.publish(message).await?;
        Ok(())
    }
}
