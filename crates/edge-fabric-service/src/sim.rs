// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Tag traffic simulator.
//!
//! Ticks at a fixed interval and, on every tick, delivers the tick number
//! as the value of each tag referenced by the loaded combiners.

use std::collections::BTreeSet;
use std::time::Duration;

use edge_combining::{DataCombiner, DataPoint, SourceKind, SourceRef};
use tokio::time;
use tracing::{debug, info, instrument};

use crate::hub::MemoryFabric;

/// Interval-driven source of synthetic tag values.
pub struct TagSimulator {
    interval: Duration,
    tick_count: u64,
    tags: BTreeSet<(String, Option<String>)>,
}

impl TagSimulator {
    /// Simulator for every tag source of `combiners`, ticking every
    /// `interval_ms` milliseconds.
    pub fn new(interval_ms: u64, combiners: &[DataCombiner]) -> Self {
        let tags = combiners
            .iter()
            .flat_map(|combiner| &combiner.combinations)
            .flat_map(|combination| {
                std::iter::once(&combination.sources.primary).chain(
                    combination
                        .instructions
                        .iter()
                        .filter_map(|instruction| instruction.source.as_ref()),
                )
            })
            .filter(|source| source.kind == SourceKind::Tag)
            .map(|SourceRef { id, scope, .. }| (id.clone(), scope.clone()))
            .collect();
        Self {
            interval: Duration::from_millis(interval_ms.max(1)),
            tick_count: 0,
            tags,
        }
    }

    /// Number of distinct `(tag, scope)` pairs driven by this simulator.
    pub fn tag_count(&self) -> usize {
        self.tags.len()
    }

    /// Tick forever, delivering values through `hub`.
    #[instrument(skip_all, fields(tags = self.tags.len()))]
    pub async fn run(mut self, hub: MemoryFabric) {
        let mut interval = time::interval(self.interval);
        info!(interval = ?self.interval, "tag simulator started");
        loop {
            interval.tick().await;
            self.tick(&hub).await;
        }
    }

    async fn tick(&mut self, hub: &MemoryFabric) -> usize {
        self.tick_count += 1;
        let mut reached = 0;
        for (tag, scope) in &self.tags {
            reached += hub
                .deliver_tag(
                    tag,
                    scope.as_deref(),
                    vec![DataPoint::new(tag.clone(), self.tick_count)],
                )
                .await;
        }
        if self.tick_count.is_multiple_of(10) {
            debug!(tick = self.tick_count, reached, "simulated tag values delivered");
        }
        reached
    }
}
