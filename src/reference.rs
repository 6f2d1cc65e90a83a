//! Edge descriptors: one [`Reference`] per discovered pointer from a
//! resource's content to another resource.
//!
//! References are produced by transform hooks when they walk content (an
//! import statement, a `url(...)` in CSS, a `src` attribute) and by callers
//! seeding entry points. A reference is immutable once created; resolution
//! produces a new value via [`Reference::resolved`]. Many references may
//! resolve to the same graph node.

use serde::Serialize;
use std::fmt;
use url::Url;

use crate::core::ResourceKind;

/// Line/column of a reference inside its owner's content. 1-based line,
/// 0-based column, matching sourcemap conventions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize)]
pub struct Position {
    /// 1-based line number (0 when unknown, e.g. generated references).
    pub line: u32,
    /// 0-based column.
    pub column: u32,
}

impl Position {
    /// Create a position.
    pub const fn new(line: u32, column: u32) -> Self {
        Self { line, column }
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.line, self.column)
    }
}

/// The syntactic site a reference was discovered at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ReferenceKind {
    /// Static `import` declaration.
    ImportStatic,
    /// Dynamic `import()` expression.
    ImportDynamic,
    /// `url(...)` inside CSS.
    CssUrl,
    /// `@import` inside CSS.
    CssImport,
    /// `<script src>` in HTML.
    ScriptSrc,
    /// `<link href>` in HTML.
    LinkHref,
    /// `new Worker(url)` site.
    WorkerUrl,
    /// `serviceWorker.register(url)` site.
    ServiceWorkerUrl,
    /// `//# sourceMappingURL=` comment.
    SourcemapComment,
    /// An entry point seeded by the caller rather than discovered in content.
    EntryPoint,
}

impl ReferenceKind {
    /// The resource kind this reference site implies for its target, when the
    /// site alone is enough to know (a worker URL always targets a worker).
    pub fn implied_resource_kind(self) -> Option<ResourceKind> {
        match self {
            Self::ImportStatic | Self::ImportDynamic => Some(ResourceKind::JsModule),
            Self::CssUrl => None,
            Self::CssImport => Some(ResourceKind::Css),
            Self::WorkerUrl => Some(ResourceKind::Worker),
            Self::ServiceWorkerUrl => Some(ResourceKind::ServiceWorker),
            Self::SourcemapComment => Some(ResourceKind::Json),
            Self::ScriptSrc | Self::LinkHref | Self::EntryPoint => None,
        }
    }
}

/// A directed edge descriptor: specifier text, discovery site, expectations
/// about the target, and (after resolution) the target URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reference {
    /// The specifier exactly as written in the owner's content.
    pub specifier: String,
    /// Where the reference was found.
    pub kind: ReferenceKind,
    /// The resource kind the reference site expects its target to be, when
    /// known. Used to classify nodes that cannot be classified by extension.
    pub expected_kind: Option<ResourceKind>,
    /// Position inside the owner's content.
    pub position: Position,
    /// URL of the resource whose content contains this reference. `None` for
    /// entry points.
    pub owner_url: Option<Url>,
    /// Whether the reference was injected by a transform rather than written
    /// by the author. Generated references are excluded from hot-update
    /// position reporting.
    pub generated: bool,
    /// Integrity hash (hex sha256) the target content must match, when the
    /// reference site declared one.
    pub integrity: Option<String>,
    /// Resolution result, filled by [`Reference::resolved`].
    pub resolved_url: Option<Url>,
}

impl Reference {
    /// A reference discovered inside `owner`'s content.
    pub fn new(owner: Url, specifier: impl Into<String>, kind: ReferenceKind) -> Self {
        let expected_kind = kind.implied_resource_kind();
        Self {
            specifier: specifier.into(),
            kind,
            expected_kind,
            position: Position::default(),
            owner_url: Some(owner),
            generated: false,
            integrity: None,
            resolved_url: None,
        }
    }

    /// An entry-point reference seeded by the caller.
    pub fn entry(specifier: impl Into<String>) -> Self {
        Self {
            specifier: specifier.into(),
            kind: ReferenceKind::EntryPoint,
            expected_kind: None,
            position: Position::default(),
            owner_url: None,
            generated: false,
            integrity: None,
            resolved_url: None,
        }
    }

    /// Set the discovery position.
    #[must_use]
    pub fn at(mut self, position: Position) -> Self {
        self.position = position;
        self
    }

    /// Override the expected target kind.
    #[must_use]
    pub fn expecting(mut self, kind: ResourceKind) -> Self {
        self.expected_kind = Some(kind);
        self
    }

    /// Mark the reference as transform-generated.
    #[must_use]
    pub fn generated(mut self) -> Self {
        self.generated = true;
        self
    }

    /// Declare an integrity hash the fetched target must match.
    #[must_use]
    pub fn with_integrity(mut self, hash: impl Into<String>) -> Self {
        self.integrity = Some(hash.into());
        self
    }

    /// Produce the resolved form of this reference.
    #[must_use]
    pub fn resolved(mut self, url: Url) -> Self {
        self.resolved_url = Some(url);
        self
    }

    /// Display name of the owner for error messages.
    pub fn importer(&self) -> String {
        self.owner_url.as_ref().map_or_else(|| "entry".to_string(), ToString::to_string)
    }
}

impl fmt::Display for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "'{}' at {} in {}", self.specifier, self.position, self.importer())
    }
}
