//! Plugin hook surface and the controller that dispatches it.
//!
//! The engine itself knows nothing about any concrete content kind; all
//! resolution, loading and rewriting behavior comes from plugins registered
//! on a [`PluginController`]. The controller is an explicit instance threaded
//! through the kitchen - there is no process-wide registry.
//!
//! Each hook kind has a fixed merge policy, declared in [`HOOK_TABLE`]:
//!
//! - `Resolve`, `Fetch` - *first non-null*: plugins run in priority order and
//!   the first one returning `Some` owns the URL.
//! - `Transform`, `Finalize` - *collect*: every applicable plugin runs in
//!   registration order, each seeing the previous one's output; results are
//!   merged (content chained, sourcemaps composed, references accumulated).
//!
//! A hook returning an error fails the owning node's cook; errors are never
//! swallowed.

pub mod fs;

use async_trait::async_trait;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use url::Url;

use crate::core::{Content, KilnError, ResourceKind};
use crate::reference::Reference;
use crate::sourcemap::SourceMap;

pub use fs::FileSystemPlugin;

/// Execution phase a plugin can apply to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    /// Dev server: partial, repeated cooking, hot updates.
    Dev,
    /// Build: one-shot whole-graph cooking, versioning, output writing.
    Build,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Dev => "dev",
            Self::Build => "build",
        })
    }
}

/// The four hook kinds a plugin can implement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookKind {
    /// Turn a specifier into a URL.
    Resolve,
    /// Load raw content for a URL.
    Fetch,
    /// Rewrite content and discover references.
    Transform,
    /// Last-chance rewrite of final output.
    Finalize,
}

/// How results from multiple plugins are merged for one hook kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergePolicy {
    /// Stop at the first plugin returning `Some`.
    FirstNonNull,
    /// Run every applicable plugin and merge all results.
    Collect,
}

/// Static hook table binding each hook kind to its merge policy.
pub const HOOK_TABLE: [(HookKind, MergePolicy); 4] = [
    (HookKind::Resolve, MergePolicy::FirstNonNull),
    (HookKind::Fetch, MergePolicy::FirstNonNull),
    (HookKind::Transform, MergePolicy::Collect),
    (HookKind::Finalize, MergePolicy::Collect),
];

/// Merge policy for a hook kind, per [`HOOK_TABLE`].
pub fn merge_policy(kind: HookKind) -> MergePolicy {
    HOOK_TABLE
        .iter()
        .find(|(hook, _)| *hook == kind)
        .map(|(_, policy)| *policy)
        .expect("every hook kind is in the table")
}

/// Context handed to every hook invocation.
#[derive(Debug, Clone)]
pub struct PluginContext {
    /// The phase the kitchen is running in.
    pub phase: Phase,
    /// Base URL entry-point specifiers resolve against (typically the
    /// project root directory as a `file:` URL).
    pub root_url: Option<Url>,
}

/// Content produced by a fetch hook.
#[derive(Debug, Clone)]
pub struct FetchedContent {
    /// The raw content.
    pub content: Content,
    /// Kind override, when the fetcher knows better than the extension
    /// registry (e.g. from a content-type header).
    pub kind: Option<ResourceKind>,
    /// Free-form refinement, e.g. the full media type.
    pub subtype: Option<String>,
}

impl FetchedContent {
    /// Content with kind left to the extension registry.
    pub fn new(content: impl Into<Content>) -> Self {
        Self {
            content: content.into(),
            kind: None,
            subtype: None,
        }
    }

    /// Override the resource kind.
    #[must_use]
    pub fn with_kind(mut self, kind: ResourceKind) -> Self {
        self.kind = Some(kind);
        self
    }
}

/// Read-only view of a node handed to transform and finalize hooks.
#[derive(Debug, Clone)]
pub struct TransformInput {
    /// The node's URL.
    pub url: Url,
    /// Current resource kind.
    pub kind: ResourceKind,
    /// Current subtype.
    pub subtype: Option<String>,
    /// Content as produced by the fetch hook or the previous transform.
    pub content: Content,
    /// Sourcemap composed so far.
    pub sourcemap: Option<SourceMap>,
    /// Plugin-owned node data.
    pub data: HashMap<String, serde_json::Value>,
}

/// What a transform or finalize hook hands back.
#[derive(Debug, Clone, Default)]
pub struct TransformOutput {
    /// Replacement content; `None` leaves the content untouched (the hook
    /// only discovered references).
    pub content: Option<Content>,
    /// Sourcemap for this rewrite, composed with the previous one.
    pub sourcemap: Option<SourceMap>,
    /// References discovered in the content.
    pub references: Vec<Reference>,
    /// Dependencies this node accepts hot updates for.
    pub accepted_hot_deps: Vec<Url>,
    /// Entries merged into the node's plugin data.
    pub data: HashMap<String, serde_json::Value>,
}

impl TransformOutput {
    /// An output that only rewrites content.
    pub fn rewrite(content: impl Into<Content>) -> Self {
        Self {
            content: Some(content.into()),
            ..Self::default()
        }
    }

    /// Attach a sourcemap for the rewrite.
    #[must_use]
    pub fn with_sourcemap(mut self, sourcemap: SourceMap) -> Self {
        self.sourcemap = Some(sourcemap);
        self
    }

    /// Add a discovered reference.
    #[must_use]
    pub fn with_reference(mut self, reference: Reference) -> Self {
        self.references.push(reference);
        self
    }

    /// Declare that this node absorbs hot updates of `dep`.
    #[must_use]
    pub fn accepting_hot_updates_of(mut self, dep: Url) -> Self {
        self.accepted_hot_deps.push(dep);
        self
    }
}

/// Result of running the whole transform (or finalize) chain over a node.
#[derive(Debug, Clone)]
pub struct CollectedTransform {
    /// Content after every applicable hook ran.
    pub content: Content,
    /// Sourcemap composed across every rewrite.
    pub sourcemap: Option<SourceMap>,
    /// All discovered references, in hook execution order.
    pub references: Vec<Reference>,
    /// Union of accepted hot-update dependencies.
    pub accepted_hot_deps: Vec<Url>,
    /// Merged plugin data entries.
    pub data: HashMap<String, serde_json::Value>,
}

/// A pluggable pipeline stage.
///
/// Every hook has a no-op default so a plugin only implements the stages it
/// cares about. Hooks return `anyhow::Result` so plugin authors are free to
/// bubble any error; the controller converts failures into
/// [`KilnError::TransformFailed`] (or passes through an embedded
/// [`KilnError`]) and fails the owning cook.
#[async_trait]
pub trait Plugin: Send + Sync {
    /// Plugin name, used in error reporting and logs.
    fn name(&self) -> &str;

    /// Which phases the plugin applies to. Defaults to both.
    fn applies_to_phase(&self, _phase: Phase) -> bool {
        true
    }

    /// Which resource kinds the transform/finalize hooks apply to.
    /// Defaults to all kinds.
    fn applies_to(&self, _kind: ResourceKind) -> bool {
        true
    }

    /// Resolve a specifier to a URL. First non-null wins.
    async fn resolve(
        &self,
        _reference: &Reference,
        _ctx: &PluginContext,
    ) -> anyhow::Result<Option<Url>> {
        Ok(None)
    }

    /// Load raw content for a URL. First non-null wins.
    async fn fetch(
        &self,
        _url: &Url,
        _ctx: &PluginContext,
    ) -> anyhow::Result<Option<FetchedContent>> {
        Ok(None)
    }

    /// Rewrite content and/or discover references.
    async fn transform(
        &self,
        _input: &TransformInput,
        _ctx: &PluginContext,
    ) -> anyhow::Result<Option<TransformOutput>> {
        Ok(None)
    }

    /// Last-chance rewrite of the final output (e.g. inject resource hints).
    async fn finalize(
        &self,
        _input: &TransformInput,
        _ctx: &PluginContext,
    ) -> anyhow::Result<Option<TransformOutput>> {
        Ok(None)
    }
}

struct RegisteredPlugin {
    plugin: Arc<dyn Plugin>,
    priority: i32,
    order: usize,
}

/// Ordered hook registry. See the module docs for dispatch semantics.
#[derive(Default)]
pub struct PluginController {
    plugins: Vec<RegisteredPlugin>,
}

impl PluginController {
    /// An empty controller.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a plugin. Higher `priority` wins for first-non-null hooks;
    /// registration order decides ties and the execution order of collect
    /// hooks.
    pub fn register(&mut self, plugin: Arc<dyn Plugin>, priority: i32) {
        let order = self.plugins.len();
        tracing::debug!(
            target: "plugin",
            "registered plugin '{}' (priority {priority})",
            plugin.name()
        );
        self.plugins.push(RegisteredPlugin {
            plugin,
            priority,
            order,
        });
    }

    /// Number of registered plugins.
    pub fn len(&self) -> usize {
        self.plugins.len()
    }

    /// Whether no plugin is registered.
    pub fn is_empty(&self) -> bool {
        self.plugins.is_empty()
    }

    /// Plugins applicable to `phase`, highest priority first, registration
    /// order breaking ties.
    fn by_priority(&self, phase: Phase) -> Vec<&RegisteredPlugin> {
        let mut applicable: Vec<&RegisteredPlugin> = self
            .plugins
            .iter()
            .filter(|registered| registered.plugin.applies_to_phase(phase))
            .collect();
        applicable.sort_by(|a, b| b.priority.cmp(&a.priority).then(a.order.cmp(&b.order)));
        applicable
    }

    /// Plugins applicable to `phase`, in registration order.
    fn in_registration_order(&self, phase: Phase) -> impl Iterator<Item = &RegisteredPlugin> {
        self.plugins.iter().filter(move |registered| registered.plugin.applies_to_phase(phase))
    }

    /// Run the resolve hook chain: first non-null wins.
    pub async fn resolve_url(
        &self,
        reference: &Reference,
        ctx: &PluginContext,
    ) -> Result<Option<Url>, KilnError> {
        for registered in self.by_priority(ctx.phase) {
            let result = registered.plugin.resolve(reference, ctx).await.map_err(|error| {
                hook_error(error, &reference.importer(), registered.plugin.name())
            })?;
            if let Some(url) = result {
                tracing::debug!(
                    target: "plugin",
                    "'{}' resolved '{}' -> {url}",
                    registered.plugin.name(),
                    reference.specifier
                );
                return Ok(Some(url));
            }
        }
        Ok(None)
    }

    /// Run the fetch hook chain: first non-null wins.
    pub async fn fetch_url_content(
        &self,
        url: &Url,
        ctx: &PluginContext,
    ) -> Result<Option<FetchedContent>, KilnError> {
        for registered in self.by_priority(ctx.phase) {
            let result = registered
                .plugin
                .fetch(url, ctx)
                .await
                .map_err(|error| hook_error(error, url.as_str(), registered.plugin.name()))?;
            if let Some(fetched) = result {
                return Ok(Some(fetched));
            }
        }
        Ok(None)
    }

    /// Run the transform hook chain (collect policy): every applicable
    /// plugin in registration order, each seeing the previous output.
    pub async fn transform_url_content(
        &self,
        input: TransformInput,
        ctx: &PluginContext,
    ) -> Result<CollectedTransform, KilnError> {
        self.run_collect_chain(input, ctx, HookKind::Transform).await
    }

    /// Run the finalize hook chain (collect policy).
    pub async fn finalize_url_content(
        &self,
        input: TransformInput,
        ctx: &PluginContext,
    ) -> Result<CollectedTransform, KilnError> {
        self.run_collect_chain(input, ctx, HookKind::Finalize).await
    }

    async fn run_collect_chain(
        &self,
        mut input: TransformInput,
        ctx: &PluginContext,
        hook: HookKind,
    ) -> Result<CollectedTransform, KilnError> {
        debug_assert_eq!(merge_policy(hook), MergePolicy::Collect);
        let mut references = Vec::new();
        let mut accepted_hot_deps = Vec::new();
        let mut collected_data = input.data.clone();
        for registered in self.in_registration_order(ctx.phase) {
            if !registered.plugin.applies_to(input.kind) {
                continue;
            }
            let result = match hook {
                HookKind::Transform => registered.plugin.transform(&input, ctx).await,
                HookKind::Finalize => registered.plugin.finalize(&input, ctx).await,
                HookKind::Resolve | HookKind::Fetch => unreachable!("not a collect hook"),
            };
            let output = result
                .map_err(|error| hook_error(error, input.url.as_str(), registered.plugin.name()))?;
            let Some(output) = output else {
                continue;
            };
            if let Some(content) = output.content {
                input.content = content;
            }
            input.sourcemap = SourceMap::compose(input.sourcemap.take(), output.sourcemap);
            references.extend(output.references);
            accepted_hot_deps.extend(output.accepted_hot_deps);
            collected_data.extend(output.data);
        }
        Ok(CollectedTransform {
            content: input.content,
            sourcemap: input.sourcemap,
            references,
            accepted_hot_deps,
            data: collected_data,
        })
    }
}

/// Convert a hook error, preserving an embedded [`KilnError`] when the hook
/// surfaced one (e.g. a structured fetch failure).
fn hook_error(error: anyhow::Error, url: &str, plugin: &str) -> KilnError {
    match error.downcast::<KilnError>() {
        Ok(kiln_error) => kiln_error,
        Err(other) => KilnError::TransformFailed {
            url: url.to_string(),
            plugin: plugin.to_string(),
            reason: format!("{other:#}"),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reference::ReferenceKind;

    struct Resolver {
        name: &'static str,
        claims: Option<&'static str>,
        phase: Option<Phase>,
    }

    #[async_trait]
    impl Plugin for Resolver {
        fn name(&self) -> &str {
            self.name
        }

        fn applies_to_phase(&self, phase: Phase) -> bool {
            self.phase.is_none_or(|own| own == phase)
        }

        async fn resolve(
            &self,
            _reference: &Reference,
            _ctx: &PluginContext,
        ) -> anyhow::Result<Option<Url>> {
            Ok(self.claims.map(|url| Url::parse(url).unwrap()))
        }
    }

    struct Appender {
        name: &'static str,
        suffix: &'static str,
        kind: Option<ResourceKind>,
    }

    #[async_trait]
    impl Plugin for Appender {
        fn name(&self) -> &str {
            self.name
        }

        fn applies_to(&self, kind: ResourceKind) -> bool {
            self.kind.is_none_or(|own| own == kind)
        }

        async fn transform(
            &self,
            input: &TransformInput,
            _ctx: &PluginContext,
        ) -> anyhow::Result<Option<TransformOutput>> {
            let text = input.content.as_text().unwrap_or_default();
            Ok(Some(TransformOutput::rewrite(format!("{text}{}", self.suffix))))
        }
    }

    fn ctx(phase: Phase) -> PluginContext {
        PluginContext {
            phase,
            root_url: None,
        }
    }

    fn input(kind: ResourceKind, content: &str) -> TransformInput {
        TransformInput {
            url: Url::parse("file:///app.js").unwrap(),
            kind,
            subtype: None,
            content: content.into(),
            sourcemap: None,
            data: HashMap::new(),
        }
    }

    #[test]
    fn hook_table_policies() {
        assert_eq!(merge_policy(HookKind::Resolve), MergePolicy::FirstNonNull);
        assert_eq!(merge_policy(HookKind::Fetch), MergePolicy::FirstNonNull);
        assert_eq!(merge_policy(HookKind::Transform), MergePolicy::Collect);
        assert_eq!(merge_policy(HookKind::Finalize), MergePolicy::Collect);
    }

    #[tokio::test]
    async fn resolve_stops_at_first_non_null_by_priority() {
        let mut controller = PluginController::new();
        controller.register(
            Arc::new(Resolver {
                name: "low",
                claims: Some("file:///from-low.js"),
                phase: None,
            }),
            0,
        );
        controller.register(
            Arc::new(Resolver {
                name: "high",
                claims: Some("file:///from-high.js"),
                phase: None,
            }),
            10,
        );

        let reference = Reference::entry("./app.js");
        let resolved = controller.resolve_url(&reference, &ctx(Phase::Dev)).await.unwrap();
        assert_eq!(resolved.unwrap().as_str(), "file:///from-high.js");
    }

    #[tokio::test]
    async fn phase_filter_applies_at_dispatch() {
        let mut controller = PluginController::new();
        controller.register(
            Arc::new(Resolver {
                name: "build-only",
                claims: Some("file:///build.js"),
                phase: Some(Phase::Build),
            }),
            0,
        );

        let reference = Reference::entry("./app.js");
        assert!(controller.resolve_url(&reference, &ctx(Phase::Dev)).await.unwrap().is_none());
        assert!(controller.resolve_url(&reference, &ctx(Phase::Build)).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn transforms_chain_in_registration_order() {
        let mut controller = PluginController::new();
        controller.register(
            Arc::new(Appender {
                name: "first",
                suffix: "-a",
                kind: None,
            }),
            // Priority is irrelevant for collect hooks.
            100,
        );
        controller.register(
            Arc::new(Appender {
                name: "second",
                suffix: "-b",
                kind: None,
            }),
            0,
        );

        let collected = controller
            .transform_url_content(input(ResourceKind::JsModule, "base"), &ctx(Phase::Dev))
            .await
            .unwrap();
        assert_eq!(collected.content.as_text(), Some("base-a-b"));
    }

    #[tokio::test]
    async fn transforms_skip_inapplicable_kinds() {
        let mut controller = PluginController::new();
        controller.register(
            Arc::new(Appender {
                name: "css-only",
                suffix: "-css",
                kind: Some(ResourceKind::Css),
            }),
            0,
        );

        let collected = controller
            .transform_url_content(input(ResourceKind::JsModule, "js"), &ctx(Phase::Dev))
            .await
            .unwrap();
        assert_eq!(collected.content.as_text(), Some("js"));
    }

    #[tokio::test]
    async fn hook_errors_are_surfaced_with_plugin_name() {
        struct Failing;

        #[async_trait]
        impl Plugin for Failing {
            fn name(&self) -> &str {
                "failing"
            }

            async fn transform(
                &self,
                _input: &TransformInput,
                _ctx: &PluginContext,
            ) -> anyhow::Result<Option<TransformOutput>> {
                anyhow::bail!("syntax error at 3:14")
            }
        }

        let mut controller = PluginController::new();
        controller.register(Arc::new(Failing), 0);

        let error = controller
            .transform_url_content(input(ResourceKind::JsModule, "x"), &ctx(Phase::Dev))
            .await
            .unwrap_err();
        match error {
            KilnError::TransformFailed { plugin, reason, .. } => {
                assert_eq!(plugin, "failing");
                assert!(reason.contains("syntax error"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn references_accumulate_across_the_chain() {
        struct RefFinder;

        #[async_trait]
        impl Plugin for RefFinder {
            fn name(&self) -> &str {
                "ref-finder"
            }

            async fn transform(
                &self,
                input: &TransformInput,
                _ctx: &PluginContext,
            ) -> anyhow::Result<Option<TransformOutput>> {
                Ok(Some(TransformOutput::default().with_reference(Reference::new(
                    input.url.clone(),
                    "./dep.js",
                    ReferenceKind::ImportStatic,
                ))))
            }
        }

        let mut controller = PluginController::new();
        controller.register(Arc::new(RefFinder), 0);

        let collected = controller
            .transform_url_content(input(ResourceKind::JsModule, "import x"), &ctx(Phase::Dev))
            .await
            .unwrap();
        assert_eq!(collected.references.len(), 1);
        assert_eq!(collected.references[0].specifier, "./dep.js");
    }
}
