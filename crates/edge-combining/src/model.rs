// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Persisted definitions: combiners, combinations and source references.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Kind of a data source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SourceKind {
    /// A device/adapter tag.
    Tag,
    /// A topic filter backed by a durable shared queue.
    TopicFilter,
}

impl SourceKind {
    /// Stable upper-case name, as used in result keys.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Tag => "TAG",
            Self::TopicFilter => "TOPIC_FILTER",
        }
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Reference to a single source. Equality is structural over
/// `id`, `kind` and `scope`, so the same tag name under two scopes is two
/// different sources.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceRef {
    /// Tag name or topic filter.
    pub id: String,
    /// Source kind.
    #[serde(rename = "type")]
    pub kind: SourceKind,
    /// Owning adapter/device; only meaningful for tags.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
}

impl SourceRef {
    /// Tag source owned by `scope`.
    pub fn tag(id: impl Into<String>, scope: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind: SourceKind::Tag,
            scope: Some(scope.into()),
        }
    }

    /// Topic-filter source.
    pub fn topic_filter(filter: impl Into<String>) -> Self {
        Self {
            id: filter.into(),
            kind: SourceKind::TopicFilter,
            scope: None,
        }
    }
}

/// Declared sources of a combination.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataSources {
    /// Source whose updates trigger emission.
    pub primary: SourceRef,
    /// Tag names the combination draws from.
    #[serde(default)]
    pub tags: BTreeSet<String>,
    /// Topic filters the combination draws from.
    #[serde(default)]
    pub topic_filters: BTreeSet<String>,
}

/// Where the combined message goes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Destination {
    /// Topic the combined message is published to.
    pub topic: String,
    /// Optional schema used by the transformation hook to shape the payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema: Option<String>,
}

impl Destination {
    /// Destination without a payload schema.
    pub fn topic(topic: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            schema: None,
        }
    }
}

/// One extraction step: copy the value at `source_path` of the accumulated
/// data into `destination_key` of the output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Instruction {
    /// JSON-pointer-like path into the accumulated data.
    pub source_path: String,
    /// Key written in the output.
    pub destination_key: String,
    /// Source the path reads from, if pinned to one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<SourceRef>,
}

/// One aggregation definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Combination {
    /// Unique id.
    pub id: Uuid,
    /// Declared sources.
    pub sources: DataSources,
    /// Output destination.
    pub destination: Destination,
    /// Ordered extraction instructions.
    #[serde(default)]
    pub instructions: Vec<Instruction>,
}

impl Combination {
    /// Combination with a fresh id, the given primary source and destination,
    /// and nothing else.
    pub fn new(primary: SourceRef, destination: Destination) -> Self {
        Self {
            id: Uuid::new_v4(),
            sources: DataSources {
                primary,
                tags: BTreeSet::new(),
                topic_filters: BTreeSet::new(),
            },
            destination,
            instructions: Vec::new(),
        }
    }
}

/// A group of combinations persisted and controlled as a unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataCombiner {
    /// Unique id.
    pub id: Uuid,
    /// Combinations, in declaration order.
    #[serde(default)]
    pub combinations: Vec<Combination>,
}

impl DataCombiner {
    /// Combiner with a fresh id.
    pub fn new(combinations: Vec<Combination>) -> Self {
        Self {
            id: Uuid::new_v4(),
            combinations,
        }
    }
}
