//! The resource graph: one node per distinct resolved URL, with bidirectional
//! dependency edges.
//!
//! The graph is the only cross-task shared mutable state in the engine. Every
//! mutation runs inside a single critical section that updates both edge
//! sides together, so `dependencies`/`dependents` can never be observed
//! asymmetric. No other component touches edge sets directly: the kitchen
//! commits cook results through [`UrlGraph::commit_cook`] and the
//! invalidation channel flips states through [`UrlGraph::set_state`].
//!
//! Orphan pruning is built into edge removal: unlinking the last dependent of
//! a non-entry node removes the node and cascades through its own
//! dependencies.

pub mod node;

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Mutex;
use url::Url;

pub use node::{NodeState, UrlInfo};

/// A node together with its outgoing edges, exported for the versioning pass.
#[derive(Debug, Clone)]
pub struct ExportedNode {
    /// The node's cooked state.
    pub info: UrlInfo,
    /// Outgoing dependency edges.
    pub dependencies: HashSet<Url>,
    /// Whether the node is an entry point.
    pub entry_point: bool,
}

#[derive(Debug)]
struct NodeRecord {
    info: UrlInfo,
    dependencies: HashSet<Url>,
    dependents: HashSet<Url>,
}

impl NodeRecord {
    fn new(url: Url) -> Self {
        Self {
            info: UrlInfo::new(url),
            dependencies: HashSet::new(),
            dependents: HashSet::new(),
        }
    }
}

#[derive(Debug, Default)]
struct GraphInner {
    nodes: HashMap<Url, NodeRecord>,
    entry_points: HashSet<Url>,
}

impl GraphInner {
    /// Whether `url` has no dependent other than (possibly) itself and is not
    /// an entry point. Self-loops do not keep a node alive.
    fn is_orphan(&self, url: &Url) -> bool {
        if self.entry_points.contains(url) {
            return false;
        }
        self.nodes
            .get(url)
            .is_some_and(|record| record.dependents.iter().all(|dependent| dependent == url))
    }

    /// Remove `url` if orphaned, cascading through its dependencies.
    fn prune_if_orphan(&mut self, url: &Url, pruned: &mut Vec<Url>) {
        if !self.is_orphan(url) {
            return;
        }
        let Some(record) = self.nodes.remove(url) else {
            return;
        };
        tracing::debug!(target: "graph", "pruned orphan node {url}");
        pruned.push(url.clone());
        for dep in record.dependencies {
            if dep == *url {
                continue;
            }
            if let Some(dep_record) = self.nodes.get_mut(&dep) {
                dep_record.dependents.remove(url);
            }
            self.prune_if_orphan(&dep, pruned);
        }
    }
}

/// Owner of all nodes and edges. Cheap to share: all methods take `&self`.
#[derive(Debug, Default)]
pub struct UrlGraph {
    inner: Mutex<GraphInner>,
}

impl UrlGraph {
    /// Create an empty graph.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, GraphInner> {
        self.inner.lock().expect("graph mutex poisoned")
    }

    /// Create a pending node for `url` if absent.
    pub fn get_or_create(&self, url: &Url) {
        let mut inner = self.lock();
        inner.nodes.entry(url.clone()).or_insert_with(|| NodeRecord::new(url.clone()));
    }

    /// Whether a node exists for `url`.
    pub fn contains(&self, url: &Url) -> bool {
        self.lock().nodes.contains_key(url)
    }

    /// Mark `url` as an entry point, creating the node if needed. Entry
    /// points are never pruned.
    pub fn mark_entry_point(&self, url: &Url) {
        let mut inner = self.lock();
        inner.nodes.entry(url.clone()).or_insert_with(|| NodeRecord::new(url.clone()));
        inner.entry_points.insert(url.clone());
    }

    /// Whether `url` is an entry point.
    pub fn is_entry_point(&self, url: &Url) -> bool {
        self.lock().entry_points.contains(url)
    }

    /// All entry points.
    pub fn entry_points(&self) -> Vec<Url> {
        self.lock().entry_points.iter().cloned().collect()
    }

    /// Register `owner → dep`, creating missing nodes. Idempotent; both edge
    /// sides are updated in the same critical section.
    pub fn register_dependency(&self, owner: &Url, dep: &Url) {
        let mut inner = self.lock();
        inner.nodes.entry(owner.clone()).or_insert_with(|| NodeRecord::new(owner.clone()));
        inner.nodes.entry(dep.clone()).or_insert_with(|| NodeRecord::new(dep.clone()));
        let inserted = inner
            .nodes
            .get_mut(owner)
            .expect("owner node just ensured")
            .dependencies
            .insert(dep.clone());
        inner
            .nodes
            .get_mut(dep)
            .expect("dep node just ensured")
            .dependents
            .insert(owner.clone());
        if inserted {
            tracing::debug!(target: "graph", "edge {owner} -> {dep}");
        }
    }

    /// Reconcile `owner`'s dependency set with the set produced by a
    /// re-cook: unlink edges no longer present and prune any dependency left
    /// orphaned. Returns the URLs of pruned nodes.
    pub fn remove_stale_dependencies(&self, owner: &Url, new_deps: &HashSet<Url>) -> Vec<Url> {
        let mut inner = self.lock();
        let Some(record) = inner.nodes.get(owner) else {
            return Vec::new();
        };
        let removed: Vec<Url> = record.dependencies.difference(new_deps).cloned().collect();
        let mut pruned = Vec::new();
        for dep in removed {
            if let Some(owner_record) = inner.nodes.get_mut(owner) {
                owner_record.dependencies.remove(&dep);
            }
            if let Some(dep_record) = inner.nodes.get_mut(&dep) {
                dep_record.dependents.remove(owner);
            }
            inner.prune_if_orphan(&dep, &mut pruned);
        }
        pruned
    }

    /// Commit the outcome of a cook: register the new dependency edges and
    /// reconcile away the stale ones, as one transaction. Returns pruned
    /// URLs.
    pub fn commit_cook(&self, owner: &Url, new_deps: &HashSet<Url>) -> Vec<Url> {
        for dep in new_deps {
            self.register_dependency(owner, dep);
        }
        self.remove_stale_dependencies(owner, new_deps)
    }

    /// Snapshot of a node's state.
    pub fn info(&self, url: &Url) -> Option<UrlInfo> {
        self.lock().nodes.get(url).map(|record| record.info.clone())
    }

    /// Current lifecycle state of a node.
    pub fn state_of(&self, url: &Url) -> Option<NodeState> {
        self.lock().nodes.get(url).map(|record| record.info.state)
    }

    /// Set a node's lifecycle state. Returns false if the node is gone.
    pub fn set_state(&self, url: &Url, state: NodeState) -> bool {
        let mut inner = self.lock();
        match inner.nodes.get_mut(url) {
            Some(record) => {
                record.info.state = state;
                true
            }
            None => false,
        }
    }

    /// Mutate a node's info in place. Used by the kitchen, which holds
    /// exclusivity for the URL through the in-flight cook table.
    pub fn update_info(&self, url: &Url, apply: impl FnOnce(&mut UrlInfo)) -> bool {
        let mut inner = self.lock();
        match inner.nodes.get_mut(url) {
            Some(record) => {
                apply(&mut record.info);
                true
            }
            None => false,
        }
    }

    /// Outgoing edges of `url`.
    pub fn dependencies_of(&self, url: &Url) -> HashSet<Url> {
        self.lock().nodes.get(url).map(|record| record.dependencies.clone()).unwrap_or_default()
    }

    /// Incoming edges of `url`.
    pub fn dependents_of(&self, url: &Url) -> HashSet<Url> {
        self.lock().nodes.get(url).map(|record| record.dependents.clone()).unwrap_or_default()
    }

    /// Whether `from` transitively depends on `to`. Drives the cycle-safe
    /// milestone selection in the kitchen.
    pub fn depends_on(&self, from: &Url, to: &Url) -> bool {
        let inner = self.lock();
        let mut queue = VecDeque::from([from]);
        let mut seen = HashSet::new();
        while let Some(current) = queue.pop_front() {
            let Some(record) = inner.nodes.get(current) else {
                continue;
            };
            for dep in &record.dependencies {
                if dep == to {
                    return true;
                }
                if seen.insert(dep) {
                    queue.push_back(dep);
                }
            }
        }
        false
    }

    /// Shortest import chain from an entry point down to `url`, rebuilt by
    /// walking "imported by" edges upward. Empty when the node is unknown; a
    /// single element when `url` is itself an entry point; `[url]` when no
    /// entry point reaches it.
    pub fn import_trace(&self, url: &Url) -> Vec<Url> {
        let inner = self.lock();
        if !inner.nodes.contains_key(url) {
            return Vec::new();
        }
        if inner.entry_points.contains(url) {
            return vec![url.clone()];
        }
        // BFS upward through dependents, tracking the first predecessor of
        // each visited node so the chain can be rebuilt.
        let mut queue = VecDeque::from([url.clone()]);
        let mut came_from: HashMap<Url, Url> = HashMap::new();
        while let Some(current) = queue.pop_front() {
            let Some(record) = inner.nodes.get(&current) else {
                continue;
            };
            for dependent in &record.dependents {
                if dependent == url || came_from.contains_key(dependent) {
                    continue;
                }
                came_from.insert(dependent.clone(), current.clone());
                if inner.entry_points.contains(dependent) {
                    // came_from points one step closer to `url`, so following
                    // it from the entry point yields the import chain in
                    // entry → url order.
                    let mut trace = vec![dependent.clone()];
                    let mut step = dependent;
                    while let Some(next) = came_from.get(step) {
                        trace.push(next.clone());
                        step = next;
                    }
                    return trace;
                }
                queue.push_back(dependent.clone());
            }
        }
        vec![url.clone()]
    }

    /// All node URLs.
    pub fn urls(&self) -> Vec<Url> {
        self.lock().nodes.keys().cloned().collect()
    }

    /// Number of nodes.
    pub fn node_count(&self) -> usize {
        self.lock().nodes.len()
    }

    /// Export every node with its edges, for the versioning pass.
    pub fn export(&self) -> Vec<ExportedNode> {
        let inner = self.lock();
        let mut nodes: Vec<ExportedNode> = inner
            .nodes
            .values()
            .map(|record| ExportedNode {
                info: record.info.clone(),
                dependencies: record.dependencies.clone(),
                entry_point: inner.entry_points.contains(&record.info.url),
            })
            .collect();
        // Deterministic order for downstream passes.
        nodes.sort_by(|a, b| a.info.url.as_str().cmp(b.info.url.as_str()));
        nodes
    }

    /// Check that every edge is mirrored on both sides. Exposed for tests
    /// and debug assertions.
    pub fn edges_are_symmetric(&self) -> bool {
        let inner = self.lock();
        inner.nodes.iter().all(|(url, record)| {
            record.dependencies.iter().all(|dep| {
                inner.nodes.get(dep).is_some_and(|dep_record| dep_record.dependents.contains(url))
            }) && record.dependents.iter().all(|dependent| {
                inner
                    .nodes
                    .get(dependent)
                    .is_some_and(|record| record.dependencies.contains(url))
            })
        })
    }
}
