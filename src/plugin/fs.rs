//! Built-in filesystem plugin.
//!
//! Resolves relative and root-relative specifiers against a project root,
//! fetches `file:` URLs through `tokio::fs`, and maps OS errors to the
//! structured outcomes in [`crate::core::fetch_error`]. Bare specifiers
//! (`"react"`) are left for other plugins to claim.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use url::Url;

use crate::core::{Content, FetchFailure, KilnError, ResourceKind};
use crate::reference::Reference;

use super::{FetchedContent, Plugin, PluginContext};

/// Filesystem resolution and fetching rooted at a project directory.
#[derive(Debug)]
pub struct FileSystemPlugin {
    root: PathBuf,
}

impl FileSystemPlugin {
    /// A plugin rooted at `root`. The path should be absolute.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// The project root.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn root_relative(&self, specifier: &str) -> Option<Url> {
        let relative = specifier.trim_start_matches('/');
        Url::from_file_path(self.root.join(relative)).ok()
    }
}

#[async_trait]
impl Plugin for FileSystemPlugin {
    fn name(&self) -> &str {
        "kiln:filesystem"
    }

    async fn resolve(
        &self,
        reference: &Reference,
        _ctx: &PluginContext,
    ) -> anyhow::Result<Option<Url>> {
        let specifier = reference.specifier.as_str();

        // Already-absolute file URLs pass through.
        if let Ok(url) = Url::parse(specifier) {
            if url.scheme() == "file" {
                return Ok(Some(url));
            }
            // Some other scheme; not ours.
            return Ok(None);
        }

        match &reference.owner_url {
            Some(owner) if owner.scheme() == "file" => {
                if specifier.starts_with('/') {
                    return Ok(self.root_relative(specifier));
                }
                if specifier.starts_with("./") || specifier.starts_with("../") {
                    return Ok(owner.join(specifier).ok());
                }
                // Bare specifier: another plugin's job.
                Ok(None)
            }
            Some(_) => Ok(None),
            // Entry points resolve against the project root.
            None => Ok(self.root_relative(specifier)),
        }
    }

    async fn fetch(
        &self,
        url: &Url,
        _ctx: &PluginContext,
    ) -> anyhow::Result<Option<FetchedContent>> {
        if url.scheme() != "file" {
            return Ok(None);
        }
        let Ok(path) = url.to_file_path() else {
            return Ok(None);
        };
        let bytes = tokio::fs::read(&path).await.map_err(|error| {
            KilnError::FetchFailed(FetchFailure::from_io(&path, &error))
        })?;
        let kind = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map_or(ResourceKind::Asset, ResourceKind::from_extension);
        let content = if kind.is_text() {
            match String::from_utf8(bytes) {
                Ok(text) => Content::Text(text),
                // Claimed-text file with invalid UTF-8 degrades to bytes.
                Err(invalid) => Content::Bytes(invalid.into_bytes()),
            }
        } else {
            Content::Bytes(bytes)
        };
        Ok(Some(FetchedContent::new(content).with_kind(kind)))
    }
}
