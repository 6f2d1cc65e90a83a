//! The cook pipeline: resolve → fetch → transform → finalize.
//!
//! The [`Kitchen`] drives one resource at a time through the plugin hook
//! chain, discovers its references, and commits the result to the
//! [`UrlGraph`]. Two mechanisms make it safe under concurrent and circular
//! dependencies:
//!
//! - **In-flight memoization**: a `DashMap<Url, CookState>` holds either a
//!   `Pending` notification handle or the finished result. A second request
//!   for a URL that is already cooking waits on the handle instead of
//!   starting a second cook, so there is at most one active cook per URL and
//!   every concurrent caller receives the same result.
//! - **Two-phase milestones**: every cook exposes `dependencies_known` (set
//!   once its reference set is fixed) and `ready` (fully cooked) as watch
//!   channels. A cook awaiting a dependency that transitively depends back on
//!   it waits only for `dependencies_known`, which breaks the deadlock while
//!   every node still reaches `Ready` exactly once. A `ready` wait that
//!   stalls across a cycle past the diagnostic timeout is reported as
//!   [`KilnError::CookStalled`].
//!
//! Cancellation is cooperative: the kitchen's `CancellationToken` unblocks
//! every milestone wait, and a cancelled cook rolls its node back to
//! `Pending` without touching edges.

mod build;

use dashmap::DashMap;
use futures::future::BoxFuture;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::{Notify, watch};
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::config::KilnConfig;
use crate::core::{Content, FetchFailure, KilnError, ResourceKind};
use crate::graph::{NodeState, UrlGraph};
use crate::plugin::{Phase, PluginContext, PluginController, TransformInput};
use crate::reference::Reference;
use crate::versioning::content_hash;

pub use build::BuildOutput;

/// Memoization state of one URL's cook.
#[derive(Clone)]
enum CookState {
    /// A cook is in flight; waiters park on the handle.
    Pending(Arc<Notify>),
    /// The cook finished; every caller gets this result.
    Done(Result<(), KilnError>),
}

/// The two observable milestones of a cook.
#[derive(Clone)]
struct NodeMilestones {
    dependencies_known: Arc<watch::Sender<bool>>,
    ready: Arc<watch::Sender<bool>>,
}

impl NodeMilestones {
    fn new() -> Self {
        Self {
            dependencies_known: Arc::new(watch::Sender::new(false)),
            ready: Arc::new(watch::Sender::new(false)),
        }
    }
}

struct KitchenInner {
    graph: Arc<UrlGraph>,
    plugins: Arc<PluginController>,
    phase: Phase,
    config: KilnConfig,
    cooks: DashMap<Url, CookState>,
    milestones: DashMap<Url, NodeMilestones>,
    cancel: CancellationToken,
}

/// Drives resources through the cook pipeline. Cheap to clone and share
/// across tasks.
#[derive(Clone)]
pub struct Kitchen {
    inner: Arc<KitchenInner>,
}

impl Kitchen {
    /// A kitchen over `graph`, dispatching hooks through `plugins`, running
    /// in `phase`.
    pub fn new(
        graph: Arc<UrlGraph>,
        plugins: Arc<PluginController>,
        phase: Phase,
        config: KilnConfig,
    ) -> Self {
        Self {
            inner: Arc::new(KitchenInner {
                graph,
                plugins,
                phase,
                config,
                cooks: DashMap::new(),
                milestones: DashMap::new(),
                cancel: CancellationToken::new(),
            }),
        }
    }

    /// The graph this kitchen cooks into.
    pub fn graph(&self) -> &Arc<UrlGraph> {
        &self.inner.graph
    }

    /// The phase the kitchen runs in.
    pub fn phase(&self) -> Phase {
        self.inner.phase
    }

    /// Token cancelling every operation of this kitchen. Timeouts layer on
    /// top: fire the token from a deadline task.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.inner.cancel.clone()
    }

    /// Cooked content of a node, when it has any.
    pub fn content_of(&self, url: &Url) -> Option<Content> {
        self.inner.graph.info(url).and_then(|info| info.content)
    }

    fn plugin_context(&self) -> PluginContext {
        let root_url = std::path::absolute(&self.inner.config.root_dir)
            .ok()
            .and_then(|root| Url::from_directory_path(root).ok());
        PluginContext {
            phase: self.inner.phase,
            root_url,
        }
    }

    fn checkpoint(&self) -> Result<(), KilnError> {
        if self.inner.cancel.is_cancelled() {
            return Err(KilnError::Cancelled);
        }
        Ok(())
    }

    fn milestones(&self, url: &Url) -> NodeMilestones {
        self.inner.milestones.entry(url.clone()).or_insert_with(NodeMilestones::new).clone()
    }

    fn reset_milestones(&self, url: &Url) {
        let milestones = self.milestones(url);
        milestones.dependencies_known.send_replace(false);
        milestones.ready.send_replace(false);
    }

    /// Drop memoization for a pruned node.
    fn forget(&self, url: &Url) {
        self.inner.cooks.remove(url);
        self.inner.milestones.remove(url);
    }

    /// Wait until `url`'s dependency set is fixed for the current cook.
    pub async fn wait_dependencies_known(&self, url: &Url) -> Result<(), KilnError> {
        let milestones = self.milestones(url);
        let mut rx = milestones.dependencies_known.subscribe();
        tokio::select! {
            result = rx.wait_for(|known| *known) => {
                result.map_err(|_| KilnError::Cancelled)?;
                Ok(())
            }
            () = self.inner.cancel.cancelled() => Err(KilnError::Cancelled),
        }
    }

    /// Wait until `url`'s cook completed (successfully or not).
    pub async fn wait_ready(&self, url: &Url) -> Result<(), KilnError> {
        let milestones = self.milestones(url);
        let mut rx = milestones.ready.subscribe();
        tokio::select! {
            result = rx.wait_for(|ready| *ready) => {
                result.map_err(|_| KilnError::Cancelled)?;
                Ok(())
            }
            () = self.inner.cancel.cancelled() => Err(KilnError::Cancelled),
        }
    }

    /// Resolve a reference through the resolve hook chain without cooking.
    pub async fn resolve_reference(&self, reference: &Reference) -> Result<Url, KilnError> {
        let ctx = self.plugin_context();
        match self.inner.plugins.resolve_url(reference, &ctx).await? {
            Some(url) => Ok(url),
            None => Err(KilnError::ResolveFailed {
                specifier: reference.specifier.clone(),
                importer: reference.importer(),
            }),
        }
    }

    /// Seed and cook an entry point. Returns the entry's resolved URL.
    pub async fn cook_entry(&self, specifier: &str) -> Result<Url, KilnError> {
        let reference = Reference::entry(specifier);
        let url = self.resolve_reference(&reference).await?;
        self.inner.graph.mark_entry_point(&url);
        self.cook(&url).await?;
        Ok(url)
    }

    /// Resolve a reference, cook its target, and verify integrity if the
    /// reference declared a hash. Returns the resolved URL.
    pub async fn cook_reference(&self, reference: &Reference) -> Result<Url, KilnError> {
        let url = self.resolve_reference(reference).await?;
        self.inner.graph.get_or_create(&url);
        if let Some(expected_kind) = reference.expected_kind {
            // Only a first guess; the fetch hook may still refine it.
            self.inner.graph.update_info(&url, |info| {
                if info.state == NodeState::Pending {
                    info.kind = expected_kind;
                }
            });
        }
        self.cook(&url).await?;
        if let Some(expected) = &reference.integrity {
            let actual = self
                .inner
                .graph
                .info(&url)
                .and_then(|info| info.original_content)
                .map(|content| content_hash(content.as_bytes()))
                .unwrap_or_default();
            if actual != *expected {
                return Err(KilnError::IntegrityMismatch {
                    url: url.to_string(),
                    expected: expected.clone(),
                    actual,
                });
            }
        }
        Ok(url)
    }

    /// Cook on a detached task. The box keeps `cook`'s otherwise recursive
    /// future type finite so it can cross `tokio::spawn`.
    fn cook_detached(&self, url: Url) -> BoxFuture<'static, Result<(), KilnError>> {
        let kitchen = self.clone();
        Box::pin(async move { kitchen.cook(&url).await })
    }

    /// Cook `url`, or await the in-flight cook if one exists. Stale nodes
    /// re-enter the pipeline.
    pub async fn cook(&self, url: &Url) -> Result<(), KilnError> {
        let notify = Arc::new(Notify::new());
        loop {
            self.checkpoint()?;
            match self.inner.cooks.entry(url.clone()) {
                dashmap::mapref::entry::Entry::Occupied(entry) => match entry.get().clone() {
                    CookState::Done(result) => {
                        if self.inner.graph.state_of(url) == Some(NodeState::Stale) {
                            entry.remove();
                            self.reset_milestones(url);
                            continue;
                        }
                        return result;
                    }
                    CookState::Pending(existing) => {
                        // Subscribe before releasing the entry so a wake
                        // between the drop and the await is not missed.
                        let notified = existing.notified();
                        drop(entry);
                        tokio::select! {
                            () = notified => continue,
                            () = self.inner.cancel.cancelled() => {
                                return Err(KilnError::Cancelled);
                            }
                        }
                    }
                },
                dashmap::mapref::entry::Entry::Vacant(vacant) => {
                    vacant.insert(CookState::Pending(notify.clone()));
                    break;
                }
            }
        }

        // This task owns the cook for `url`.
        let result = self.perform_cook(url).await;
        match &result {
            Ok(()) => {
                self.inner.cooks.insert(url.clone(), CookState::Done(Ok(())));
                self.set_completion_milestones(url);
            }
            Err(KilnError::Cancelled) => {
                // Roll back: the node re-enters as pending, nothing memoized.
                self.inner.graph.set_state(url, NodeState::Pending);
                self.inner.cooks.remove(url);
            }
            Err(error) => {
                tracing::warn!(target: "kitchen", "cook of {url} failed: {error}");
                self.inner.graph.set_state(url, NodeState::Errored);
                self.inner.cooks.insert(url.clone(), CookState::Done(Err(error.clone())));
                self.set_completion_milestones(url);
            }
        }
        notify.notify_waiters();
        result
    }

    /// Both milestones are set on completion, error included, so no waiter
    /// can hang on a finished cook.
    fn set_completion_milestones(&self, url: &Url) {
        let milestones = self.milestones(url);
        milestones.dependencies_known.send_replace(true);
        milestones.ready.send_replace(true);
    }

    async fn perform_cook(&self, url: &Url) -> Result<(), KilnError> {
        let graph = &self.inner.graph;
        graph.get_or_create(url);
        self.reset_milestones(url);
        let ctx = self.plugin_context();
        tracing::debug!(target: "kitchen", "cooking {url}");

        // The URL itself was resolved by the reference that created the
        // node; the state is still surfaced for observability.
        graph.set_state(url, NodeState::Resolving);
        self.checkpoint()?;

        graph.set_state(url, NodeState::Fetching);
        let fetched = self.inner.plugins.fetch_url_content(url, &ctx).await?;
        let Some(fetched) = fetched else {
            return Err(KilnError::FetchFailed(FetchFailure::unhandled(url.as_str())));
        };
        let kind = fetched.kind.unwrap_or_else(|| {
            graph.info(url).map_or(ResourceKind::Asset, |info| info.kind)
        });
        graph.update_info(url, |info| {
            info.kind = kind;
            info.subtype = fetched.subtype.clone();
            info.original_content = Some(fetched.content.clone());
        });
        self.checkpoint()?;

        graph.set_state(url, NodeState::Transforming);
        let subtype = fetched.subtype;
        let input = TransformInput {
            url: url.clone(),
            kind,
            subtype: subtype.clone(),
            content: fetched.content,
            sourcemap: None,
            data: graph.info(url).map(|info| info.data).unwrap_or_default(),
        };
        let collected = self.inner.plugins.transform_url_content(input, &ctx).await?;

        // Resolve discovered references. In dev an unresolved specifier is
        // reported and skipped; in build it fails the cook.
        let mut new_deps: HashSet<Url> = HashSet::new();
        let mut resolved_references = Vec::new();
        for reference in collected.references {
            match self.inner.plugins.resolve_url(&reference, &ctx).await? {
                Some(dep_url) => {
                    new_deps.insert(dep_url.clone());
                    resolved_references.push((reference, dep_url));
                }
                None if self.inner.phase == Phase::Build => {
                    return Err(KilnError::ResolveFailed {
                        importer: reference.importer(),
                        specifier: reference.specifier,
                    });
                }
                None => {
                    tracing::warn!(target: "kitchen", "unresolved reference {reference}");
                }
            }
        }

        let pruned = graph.commit_cook(url, &new_deps);
        for stale in &pruned {
            self.forget(stale);
        }
        for (reference, dep_url) in &resolved_references {
            if let Some(expected) = reference.expected_kind {
                graph.update_info(dep_url, |info| {
                    if info.state == NodeState::Pending {
                        info.kind = expected;
                    }
                });
            }
        }
        // The dependency set is fixed: cooks waiting across a cycle may
        // proceed from here on. Content stays out of the graph until the
        // cook commits, so a late failure keeps the previous result intact.
        self.milestones(url).dependencies_known.send_replace(true);

        for dep in &new_deps {
            // Detached: failures are memoized and surface when the dependency
            // is requested, or through the build driver.
            let _ = tokio::spawn(self.cook_detached(dep.clone()));
        }
        if self.inner.phase == Phase::Build {
            for dep in &new_deps {
                self.wait_for_dependency(url, dep).await?;
            }
        }
        self.checkpoint()?;

        let finalize_input = TransformInput {
            url: url.clone(),
            kind,
            subtype: subtype.clone(),
            content: collected.content,
            sourcemap: collected.sourcemap,
            data: collected.data,
        };
        let finalized = self.inner.plugins.finalize_url_content(finalize_input, &ctx).await?;
        graph.update_info(url, |info| {
            info.content = Some(finalized.content);
            info.sourcemap = finalized.sourcemap;
            info.data = finalized.data;
            info.accepted_hot_deps = collected.accepted_hot_deps.iter().cloned().collect();
            info.state = NodeState::Ready;
        });
        tracing::debug!(target: "kitchen", "cooked {url} ({kind})");
        Ok(())
    }

    /// Await a dependency with the cycle-safe milestone rule: a dependency
    /// that (transitively) depends back on `owner` is only awaited to its
    /// `dependencies_known` milestone.
    async fn wait_for_dependency(&self, owner: &Url, dep: &Url) -> Result<(), KilnError> {
        if dep == owner || self.inner.graph.depends_on(dep, owner) {
            return self.wait_dependencies_known(dep).await;
        }
        let stall_timeout = self.inner.config.stall_timeout();
        loop {
            match tokio::time::timeout(stall_timeout, self.wait_ready(dep)).await {
                Ok(result) => return result,
                Err(_) => {
                    // The cycle may have formed after the first check.
                    if self.inner.graph.depends_on(dep, owner) {
                        return Err(KilnError::CookStalled {
                            url: dep.to_string(),
                        });
                    }
                    tracing::warn!(
                        target: "kitchen",
                        "still waiting on {dep} after {stall_timeout:?} (requested by {owner})"
                    );
                }
            }
        }
    }
}
