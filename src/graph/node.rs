//! Per-resource node state.

use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::fmt;
use url::Url;

use crate::core::{Content, ResourceKind};
use crate::sourcemap::SourceMap;

/// Lifecycle state of a node in the resource graph.
///
/// Nodes move `Pending → Resolving → Fetching → Transforming → Ready` through
/// the cook pipeline. `Errored` is terminal for the cook that produced it;
/// `Stale` marks a ready node invalidated by an external change, which
/// re-enters the pipeline on its next cook.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum NodeState {
    /// Created, not yet cooked.
    Pending,
    /// Resolve hooks are running.
    Resolving,
    /// Fetch hooks are running.
    Fetching,
    /// Transform hooks are running; references are being discovered.
    Transforming,
    /// Fully cooked; content is frozen.
    Ready,
    /// The last cook failed. Previous successful content, if any, is kept.
    Errored,
    /// Invalidated by an external change; will re-cook on next request.
    Stale,
}

impl NodeState {
    /// Whether the node holds usable content from a completed cook.
    pub const fn is_cooked(self) -> bool {
        matches!(self, Self::Ready | Self::Stale)
    }
}

impl fmt::Display for NodeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Pending => "pending",
            Self::Resolving => "resolving",
            Self::Fetching => "fetching",
            Self::Transforming => "transforming",
            Self::Ready => "ready",
            Self::Errored => "errored",
            Self::Stale => "stale",
        };
        f.write_str(name)
    }
}

/// One resource's cooked state: content, classification, and plugin data.
///
/// Edge sets live in the graph itself, not here, so that every edge mutation
/// goes through the graph's transactional operations.
#[derive(Debug, Clone)]
pub struct UrlInfo {
    /// The node's resolved URL, its identity in the graph.
    pub url: Url,
    /// Resource classification, refined during fetch.
    pub kind: ResourceKind,
    /// Free-form refinement of the kind (e.g. `"text/javascript"`).
    pub subtype: Option<String>,
    /// Content exactly as fetched, before any transform.
    pub original_content: Option<Content>,
    /// Current content. Only meaningful once the node has been cooked.
    pub content: Option<Content>,
    /// Composed sourcemap covering all transforms applied so far.
    pub sourcemap: Option<SourceMap>,
    /// Plugin-owned storage, opaque to the engine.
    pub data: HashMap<String, serde_json::Value>,
    /// Dependencies this node declared it can absorb hot updates for.
    /// Consumed by the invalidation walk to stop short of a full reload.
    pub accepted_hot_deps: HashSet<Url>,
    /// Lifecycle state.
    pub state: NodeState,
}

impl UrlInfo {
    /// A fresh pending node. The kind is a first guess from the URL path
    /// extension; fetch hooks may refine it.
    pub fn new(url: Url) -> Self {
        let kind = url
            .path()
            .rsplit('.')
            .next()
            .filter(|ext| !ext.contains('/'))
            .map_or(ResourceKind::Asset, ResourceKind::from_extension);
        Self {
            url,
            kind,
            subtype: None,
            original_content: None,
            content: None,
            sourcemap: None,
            data: HashMap::new(),
            accepted_hot_deps: HashSet::new(),
            state: NodeState::Pending,
        }
    }
}
