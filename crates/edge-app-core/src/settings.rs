// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Host settings for the data combining engine (queue limits, publisher
//! identity, event log size, tag simulation).

use serde::{Deserialize, Serialize};

/// Config key under which [`HostSettings`] are persisted.
pub const HOST_SETTINGS_KEY: &str = "combining_host";

/// Saved settings for a combining host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct HostSettings {
    /// Upper bound on the bytes returned by a single queue read.
    pub queue_read_max_bytes: u64,
    /// Client id stamped on every combined message handed to the publish pathway.
    pub publisher_client_id: String,
    /// Number of lifecycle events kept in memory.
    pub event_log_capacity: usize,
    /// Emit synthetic values for every referenced tag.
    pub simulate_tags: bool,
    /// Interval between simulated tag values (milliseconds).
    pub simulate_interval_ms: u64,
}

impl Default for HostSettings {
    fn default() -> Self {
        Self {
            queue_read_max_bytes: 1024 * 1024,
            publisher_client_id: "data-combining".to_string(),
            event_log_capacity: 256,
            simulate_tags: false,
            simulate_interval_ms: 1000,
        }
    }
}
