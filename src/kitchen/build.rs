//! Whole-graph build driver.
//!
//! Cooks every entry point, waits for the graph to settle, aborts on the
//! first errored node with its import trace, then runs the versioning engine
//! and writes the output tree plus `manifest.json`.

use anyhow::{Context, Result, anyhow};
use std::collections::BTreeMap;
use std::path::PathBuf;
use url::Url;

use crate::core::KilnError;
use crate::graph::NodeState;
use crate::versioning::{VersionedBuild, VersioningEngine};

use super::Kitchen;

/// What a finished build produced.
#[derive(Debug)]
pub struct BuildOutput {
    /// Original relative path → final output path (hashed when versioning is
    /// enabled).
    pub manifest: BTreeMap<String, String>,
    /// Directory the output tree was written to.
    pub out_dir: PathBuf,
    /// Every file written, manifest included.
    pub written: Vec<PathBuf>,
}

impl Kitchen {
    /// Build `entry_specifiers` into the configured output directory.
    ///
    /// Any cook failure is fatal: the error carries the chain of "imported
    /// by" edges from an entry point down to the failing resource.
    pub async fn build(&self, entry_specifiers: &[&str]) -> Result<BuildOutput> {
        let cooked = futures::future::join_all(
            entry_specifiers.iter().map(|specifier| self.cook_entry(specifier)),
        )
        .await;
        for result in cooked {
            result.map_err(|error| self.trace_error(None, error))?;
        }
        self.settle().await?;

        let config = &self.inner.config;
        let root_url = self.plugin_context().root_url;
        let nodes = self.inner.graph.export();
        let versioned = if config.versioning {
            VersioningEngine::new(config.hash_length).run(&nodes, root_url.as_ref())
        } else {
            VersioningEngine::passthrough(&nodes, root_url.as_ref())
        };
        self.write_output(versioned).await
    }

    /// Await every node until no cook is in flight and no new node appears.
    ///
    /// Cooks spawned for dependencies are memoized, so awaiting them here
    /// costs nothing when they already finished.
    async fn settle(&self) -> Result<()> {
        loop {
            let urls = self.inner.graph.urls();
            let mut all_done = true;
            for url in &urls {
                match self.inner.graph.state_of(url) {
                    Some(NodeState::Ready) => {}
                    Some(NodeState::Errored) => {
                        let error = match self.cook(url).await {
                            Err(error) => error,
                            Ok(()) => continue,
                        };
                        return Err(self.trace_error(Some(url), error));
                    }
                    // Pending nodes can exist in a settled dev graph, but in
                    // build mode every discovered dependency gets cooked.
                    _ => {
                        all_done = false;
                        self.cook(url).await.map_err(|error| self.trace_error(Some(url), error))?;
                    }
                }
            }
            if all_done && urls.len() == self.inner.graph.node_count() {
                return Ok(());
            }
        }
    }

    /// Wrap a cook error with the import chain back to an entry point.
    fn trace_error(&self, url: Option<&Url>, error: KilnError) -> anyhow::Error {
        let trace = url.map(|url| self.inner.graph.import_trace(url)).unwrap_or_default();
        if trace.len() > 1 {
            // Failing resource first, entry point last.
            let chain =
                trace.iter().rev().map(Url::as_str).collect::<Vec<_>>().join("\n  imported by ");
            anyhow!(error).context(format!("import trace:\n  {chain}"))
        } else {
            anyhow!(error)
        }
    }

    async fn write_output(&self, versioned: VersionedBuild) -> Result<BuildOutput> {
        let out_dir = self.inner.config.out_dir.clone();
        let mut written = Vec::new();
        for output in &versioned.outputs {
            let path = out_dir.join(&output.output_path);
            if let Some(parent) = path.parent() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .with_context(|| format!("failed to create {}", parent.display()))?;
            }
            tokio::fs::write(&path, output.content.as_bytes())
                .await
                .with_context(|| format!("failed to write {}", path.display()))?;
            written.push(path);
        }

        let manifest_path = out_dir.join("manifest.json");
        let manifest_json = serde_json::to_vec_pretty(&versioned.manifest)
            .context("failed to serialize build manifest")?;
        if let Some(parent) = manifest_path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        tokio::fs::write(&manifest_path, manifest_json)
            .await
            .with_context(|| format!("failed to write {}", manifest_path.display()))?;
        written.push(manifest_path);

        tracing::debug!(
            target: "kitchen",
            "build wrote {} files to {}",
            written.len(),
            out_dir.display()
        );
        Ok(BuildOutput {
            manifest: versioned.manifest,
            out_dir,
            written,
        })
    }
}
