//! Shared fixtures for the integration tests: an in-memory resource plugin
//! with fetch counting and a line-based import scanner.

#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex;
use url::Url;

use kiln::config::KilnConfig;
use kiln::core::{Content, FetchFailure, KilnError, ResourceKind};
use kiln::graph::UrlGraph;
use kiln::kitchen::Kitchen;
use kiln::plugin::{
    FetchedContent, Phase, Plugin, PluginContext, PluginController, TransformInput,
    TransformOutput,
};
use kiln::reference::{Reference, ReferenceKind};

/// Serves a fixed set of in-memory resources under the `mem:` scheme and
/// counts how often each URL is fetched.
pub struct MemoryPlugin {
    files: HashMap<String, String>,
    fetch_counts: Mutex<HashMap<String, usize>>,
}

impl MemoryPlugin {
    pub fn new(files: &[(&str, &str)]) -> Self {
        Self {
            files: files
                .iter()
                .map(|(path, content)| (path.to_string(), content.to_string()))
                .collect(),
            fetch_counts: Mutex::new(HashMap::new()),
        }
    }

    /// How many times `url` was fetched so far.
    pub fn fetch_count(&self, url: &Url) -> usize {
        self.fetch_counts.lock().unwrap().get(url.as_str()).copied().unwrap_or(0)
    }
}

pub fn mem_url(path: &str) -> Url {
    Url::parse(&format!("mem:///{}", path.trim_start_matches('/'))).unwrap()
}

#[async_trait]
impl Plugin for MemoryPlugin {
    fn name(&self) -> &str {
        "test:memory"
    }

    async fn resolve(
        &self,
        reference: &Reference,
        _ctx: &PluginContext,
    ) -> anyhow::Result<Option<Url>> {
        let specifier = reference.specifier.as_str();
        if let Ok(url) = Url::parse(specifier) {
            return Ok((url.scheme() == "mem").then_some(url));
        }
        match &reference.owner_url {
            Some(owner) if owner.scheme() == "mem" => {
                if specifier.starts_with("./") || specifier.starts_with("../") {
                    Ok(owner.join(specifier).ok())
                } else {
                    Ok(Some(mem_url(specifier)))
                }
            }
            Some(_) => Ok(None),
            None => Ok(Some(mem_url(specifier))),
        }
    }

    async fn fetch(
        &self,
        url: &Url,
        _ctx: &PluginContext,
    ) -> anyhow::Result<Option<FetchedContent>> {
        if url.scheme() != "mem" {
            return Ok(None);
        }
        *self.fetch_counts.lock().unwrap().entry(url.to_string()).or_insert(0) += 1;
        let path = url.path().trim_start_matches('/');
        let Some(content) = self.files.get(path) else {
            return Err(KilnError::FetchFailed(FetchFailure::unhandled(path)).into());
        };
        let kind = path
            .rsplit_once('.')
            .map_or(ResourceKind::Asset, |(_, ext)| ResourceKind::from_extension(ext));
        Ok(Some(FetchedContent::new(Content::from(content.as_str())).with_kind(kind)))
    }
}

/// Discovers `import "SPEC";` references and `accept "SPEC";` hot-update
/// declarations in text content, line by line.
pub struct ImportScanner;

fn quoted_specifier<'a>(line: &'a str, directive: &str) -> Option<&'a str> {
    let rest = line.trim().strip_prefix(directive)?.trim();
    rest.strip_prefix('"')?.split('"').next()
}

#[async_trait]
impl Plugin for ImportScanner {
    fn name(&self) -> &str {
        "test:import-scanner"
    }

    async fn transform(
        &self,
        input: &TransformInput,
        _ctx: &PluginContext,
    ) -> anyhow::Result<Option<TransformOutput>> {
        let Some(text) = input.content.as_text() else {
            return Ok(None);
        };
        let mut output = TransformOutput::default();
        for line in text.lines() {
            if let Some(specifier) = quoted_specifier(line, "import") {
                output = output.with_reference(Reference::new(
                    input.url.clone(),
                    specifier,
                    ReferenceKind::ImportStatic,
                ));
            }
            if let Some(specifier) = quoted_specifier(line, "accept") {
                if let Ok(url) = input.url.join(specifier) {
                    output = output.accepting_hot_updates_of(url);
                }
            }
        }
        Ok(Some(output))
    }
}

/// Route engine logs through the test harness; `RUST_LOG` filters as usual.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// A kitchen over `files` with the memory plugin and import scanner.
pub fn memory_kitchen(
    phase: Phase,
    files: &[(&str, &str)],
) -> (Kitchen, Arc<MemoryPlugin>, Arc<UrlGraph>) {
    init_tracing();
    let memory = Arc::new(MemoryPlugin::new(files));
    let mut plugins = PluginController::new();
    plugins.register(memory.clone(), 0);
    plugins.register(Arc::new(ImportScanner), 0);
    let graph = Arc::new(UrlGraph::new());
    let kitchen = Kitchen::new(graph.clone(), Arc::new(plugins), phase, KilnConfig::default());
    (kitchen, memory, graph)
}
