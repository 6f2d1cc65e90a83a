//! Sourcemap model and composition.
//!
//! Transform hooks that rewrite content can return a sourcemap for the
//! rewrite. When several transforms run over the same node the engine
//! composes each new map with the previous one, so the final node carries a
//! single map back to the original source.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

fn default_version() -> u32 {
    3
}

/// A standard v3 sourcemap, as exchanged with transform hooks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceMap {
    /// Sourcemap spec version, always 3 in practice.
    #[serde(default = "default_version")]
    pub version: u32,
    /// Name of the generated file, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
    /// Original source paths.
    #[serde(default)]
    pub sources: Vec<String>,
    /// Symbol names referenced by the mappings.
    #[serde(default)]
    pub names: Vec<String>,
    /// VLQ-encoded mappings.
    #[serde(default)]
    pub mappings: String,
    /// Inlined original source contents, aligned with `sources`.
    #[serde(
        default,
        rename = "sourcesContent",
        skip_serializing_if = "Option::is_none"
    )]
    pub sources_content: Option<Vec<Option<String>>>,
}

impl SourceMap {
    /// An empty map for `file`.
    pub fn empty(file: impl Into<String>) -> Self {
        Self {
            version: 3,
            file: Some(file.into()),
            sources: Vec::new(),
            names: Vec::new(),
            mappings: String::new(),
            sources_content: None,
        }
    }

    /// A map with no mappings or no sources carries no usable information.
    pub fn is_trivial(&self) -> bool {
        self.mappings.is_empty() || self.sources.is_empty()
    }

    /// Number of distinct original sources the map covers.
    pub fn distinct_sources(&self) -> usize {
        self.sources.iter().collect::<HashSet<_>>().len()
    }

    /// Compose the map of a previous transform with the map produced by the
    /// next transform over its output.
    ///
    /// Trivial maps are discarded in favor of the other side. When both are
    /// non-trivial, the producer with more distinct original sources wins as
    /// the base (it retains more provenance) and the mappings are
    /// concatenated so downstream consumers still see both segments.
    pub fn compose(previous: Option<Self>, next: Option<Self>) -> Option<Self> {
        match (previous, next) {
            (None, next) => next,
            (previous, None) => previous,
            (Some(previous), Some(next)) => {
                if previous.is_trivial() {
                    return Some(next);
                }
                if next.is_trivial() {
                    return Some(previous);
                }
                let (mut base, other) = if next.distinct_sources() >= previous.distinct_sources() {
                    (next, previous)
                } else {
                    (previous, next)
                };
                for source in &other.sources {
                    if !base.sources.contains(source) {
                        base.sources.push(source.clone());
                    }
                }
                for name in &other.names {
                    if !base.names.contains(name) {
                        base.names.push(name.clone());
                    }
                }
                base.mappings = format!("{};{}", other.mappings, base.mappings);
                Some(base)
            }
        }
    }
}
