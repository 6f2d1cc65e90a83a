//! Resource kind classification.
//!
//! Every node in the resource graph carries a [`ResourceKind`] describing what
//! the engine is looking at (markup, module script, stylesheet, ...). The kind
//! drives which transform plugins apply to a node and how its content is
//! treated during versioning (text substitution vs opaque bytes).
//!
//! Kinds form a closed set. Anything the registry cannot classify is an
//! [`ResourceKind::Asset`]: it flows through the pipeline untouched and is
//! hashed as raw bytes.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Closed set of resource kinds understood by the engine.
///
/// Plugins declare which kinds they apply to via
/// [`Plugin::applies_to`](crate::plugin::Plugin::applies_to), so adding a
/// variant here is a breaking change for plugin authors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ResourceKind {
    /// HTML documents, the usual entry points.
    Html,
    /// ECMAScript modules (`import`/`export`).
    JsModule,
    /// Classic scripts loaded via `<script>` without `type="module"`.
    JsClassic,
    /// Stylesheets.
    Css,
    /// JSON documents (including importable JSON modules).
    Json,
    /// Dedicated worker scripts.
    Worker,
    /// Service worker scripts.
    ServiceWorker,
    /// Anything else: images, fonts, wasm, plain text. Treated as opaque.
    Asset,
}

impl ResourceKind {
    /// Classify a resource from its file extension (without the leading dot).
    ///
    /// Worker and service-worker kinds cannot be told apart from a plain
    /// module by extension alone; those are assigned by the reference that
    /// discovered the resource (e.g. a `new Worker(...)` site).
    pub fn from_extension(ext: &str) -> Self {
        match ext.to_ascii_lowercase().as_str() {
            "html" | "htm" => Self::Html,
            "js" | "mjs" | "jsx" | "ts" | "tsx" => Self::JsModule,
            "cjs" => Self::JsClassic,
            "css" => Self::Css,
            "json" | "map" => Self::Json,
            _ => Self::Asset,
        }
    }

    /// Classify a resource from a media type (MIME), e.g. from a fetch hook
    /// that talked to a server.
    pub fn from_media_type(media_type: &str) -> Self {
        // Parameters (";charset=...") are not part of the essence.
        let essence = media_type.split(';').next().unwrap_or(media_type).trim();
        match essence {
            "text/html" => Self::Html,
            "text/javascript" | "application/javascript" => Self::JsModule,
            "text/css" => Self::Css,
            "application/json" | "application/manifest+json" => Self::Json,
            _ => Self::Asset,
        }
    }

    /// Whether content of this kind is handled as UTF-8 text.
    ///
    /// Text kinds participate in reference substitution during versioning;
    /// binary assets are hashed as-is.
    pub const fn is_text(self) -> bool {
        !matches!(self, Self::Asset)
    }

    /// Stable lowercase name, used in logs and serialized events.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Html => "html",
            Self::JsModule => "js-module",
            Self::JsClassic => "js-classic",
            Self::Css => "css",
            Self::Json => "json",
            Self::Worker => "worker",
            Self::ServiceWorker => "service-worker",
            Self::Asset => "asset",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Resource content, either text or opaque bytes.
///
/// Transforms and the versioning substitution passes only apply to
/// [`Content::Text`]; binary content flows through the pipeline untouched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Content {
    /// UTF-8 text content.
    Text(String),
    /// Opaque binary content.
    Bytes(Vec<u8>),
}

impl Content {
    /// View the content as bytes regardless of representation.
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Self::Text(text) => text.as_bytes(),
            Self::Bytes(bytes) => bytes,
        }
    }

    /// View the content as text, if it is text.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(text) => Some(text),
            Self::Bytes(_) => None,
        }
    }

    /// Content length in bytes.
    pub fn len(&self) -> usize {
        self.as_bytes().len()
    }

    /// Whether the content is empty.
    pub fn is_empty(&self) -> bool {
        self.as_bytes().is_empty()
    }
}

impl From<String> for Content {
    fn from(text: String) -> Self {
        Self::Text(text)
    }
}

impl From<&str> for Content {
    fn from(text: &str) -> Self {
        Self::Text(text.to_string())
    }
}

impl From<Vec<u8>> for Content {
    fn from(bytes: Vec<u8>) -> Self {
        Self::Bytes(bytes)
    }
}
