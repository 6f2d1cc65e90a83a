//! Content-hash versioning.
//!
//! Build outputs get their content hash embedded in the filename so serving
//! layers can cache them forever. Resources can reference each other's hashed
//! names, including cyclically, so hashing is a two-pass algorithm:
//!
//! 1. **Placeholder pass** - every output node gets a unique fixed-width
//!    token (index-based, not content-based). Wherever a node's content
//!    references another node, the referenced name is rewritten to its
//!    versioned form with the token standing in for the not-yet-known hash.
//!    The set of tokens contained in each node is recorded.
//! 2. **Resolution pass** - nodes are processed dependencies-first (strongly
//!    connected components, so cycles are handled as a unit). A node whose
//!    contained tokens are all resolved is hashed with the real hashes
//!    substituted in. A node inside a cycle still contains unresolved
//!    tokens; those are replaced by a fixed default so its hash is stable
//!    across runs, and the real token→hash substitution is applied to its
//!    content afterwards.
//!
//! The result is deterministic across repeated runs on an unchanged graph,
//! cyclic graphs included.
//!
//! A hash longer than the configured length is truncated to it; the
//! placeholder token is replaced wholesale so the width reserved in content
//! never constrains the final name.

use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashMap, HashSet};
use url::Url;

use crate::core::Content;
use crate::graph::ExportedNode;

/// Full hex sha256 of `bytes`. Also used for reference integrity checks.
pub fn content_hash(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// One file of the final output tree.
#[derive(Debug, Clone)]
pub struct OutputFile {
    /// The node's URL.
    pub url: Url,
    /// Path relative to the project root, before versioning.
    pub original_path: String,
    /// Path relative to the output directory, hashed when versioned.
    pub output_path: String,
    /// Final content, placeholders fully resolved.
    pub content: Content,
}

/// Manifest plus output files, as produced by one versioning run.
#[derive(Debug, Clone)]
pub struct VersionedBuild {
    /// Original relative path → output path.
    pub manifest: BTreeMap<String, String>,
    /// The output tree.
    pub outputs: Vec<OutputFile>,
}

/// The two-pass placeholder/hash engine.
#[derive(Debug, Clone)]
pub struct VersioningEngine {
    hash_length: usize,
}

impl VersioningEngine {
    /// An engine embedding `hash_length` hex characters in filenames
    /// (clamped to the 64 characters a sha256 provides).
    pub fn new(hash_length: usize) -> Self {
        Self {
            hash_length: hash_length.clamp(1, 64),
        }
    }

    /// Output tree without versioning: original paths, identity manifest.
    pub fn passthrough(nodes: &[ExportedNode], root_url: Option<&Url>) -> VersionedBuild {
        let mut manifest = BTreeMap::new();
        let mut outputs = Vec::new();
        for node in nodes {
            let Some(content) = node.info.content.clone() else {
                continue;
            };
            let path = relative_url_path(&node.info.url, root_url);
            manifest.insert(path.clone(), path.clone());
            outputs.push(OutputFile {
                url: node.info.url.clone(),
                original_path: path.clone(),
                output_path: path,
                content,
            });
        }
        VersionedBuild { manifest, outputs }
    }

    /// Run both passes over an exported graph.
    pub fn run(&self, nodes: &[ExportedNode], root_url: Option<&Url>) -> VersionedBuild {
        // Only cooked nodes produce output. `nodes` is sorted by URL, which
        // makes placeholder allocation deterministic.
        let candidates: Vec<&ExportedNode> =
            nodes.iter().filter(|node| node.info.content.is_some()).collect();
        let index_of: HashMap<&Url, usize> = candidates
            .iter()
            .enumerate()
            .map(|(index, node)| (&node.info.url, index))
            .collect();
        let paths: Vec<String> = candidates
            .iter()
            .map(|node| relative_url_path(&node.info.url, root_url))
            .collect();
        let placeholders: Vec<String> =
            (0..candidates.len()).map(|index| format!("!~{index:08x}~!")).collect();

        // Placeholder pass: rewrite referenced names to their versioned form
        // with the token standing in for the hash.
        let mut contents: Vec<Content> = candidates
            .iter()
            .map(|node| node.info.content.clone().expect("candidates are cooked"))
            .collect();
        let mut contained: Vec<HashSet<usize>> = vec![HashSet::new(); candidates.len()];
        for (index, node) in candidates.iter().enumerate() {
            let Some(text) = contents[index].as_text().map(ToString::to_string) else {
                continue;
            };
            let mut rewritten = text;
            let mut touched = false;
            for dep in &node.dependencies {
                let Some(&dep_index) = index_of.get(dep) else {
                    continue;
                };
                // Entry points keep their original output names, so
                // references to them must stay as written.
                if candidates[dep_index].entry_point {
                    continue;
                }
                let dep_name = file_name(&paths[dep_index]);
                if dep_name.is_empty() {
                    continue;
                }
                let versioned = versioned_name(dep_name, &placeholders[dep_index]);
                let (replaced, any) = replace_name_anchored(&rewritten, dep_name, &versioned);
                if any {
                    rewritten = replaced;
                    contained[index].insert(dep_index);
                    touched = true;
                }
            }
            if touched {
                contents[index] = Content::Text(rewritten);
            }
        }

        // Resolution pass: strongly connected components, dependencies
        // first. `tarjan_scc` returns components in reverse topological
        // order, which is exactly deps-before-dependents for our edges.
        let mut hash_graph = petgraph::graph::DiGraph::<usize, ()>::new();
        let node_indices: Vec<_> = (0..candidates.len()).map(|i| hash_graph.add_node(i)).collect();
        for (index, deps) in contained.iter().enumerate() {
            for &dep_index in deps {
                hash_graph.add_edge(node_indices[index], node_indices[dep_index], ());
            }
        }
        let default_token = "0".repeat(self.hash_length);
        let mut hashes: Vec<Option<String>> = vec![None; candidates.len()];
        for component in petgraph::algo::tarjan_scc(&hash_graph) {
            let mut members: Vec<usize> =
                component.iter().map(|&node_index| hash_graph[node_index]).collect();
            members.sort_unstable();
            for &index in &members {
                let hashed_bytes = match contents[index].as_text() {
                    Some(text) => {
                        let mut substituted = text.to_string();
                        for &dep_index in &contained[index] {
                            let replacement =
                                hashes[dep_index].as_deref().unwrap_or(&default_token);
                            substituted =
                                substituted.replace(&placeholders[dep_index], replacement);
                        }
                        self.short_hash(substituted.as_bytes())
                    }
                    None => self.short_hash(contents[index].as_bytes()),
                };
                hashes[index] = Some(hashed_bytes);
            }
        }

        // Final substitution: within cycles the cheap default was hashed,
        // the written output still carries the real hashes.
        for index in 0..candidates.len() {
            if contained[index].is_empty() {
                continue;
            }
            let Some(text) = contents[index].as_text().map(ToString::to_string) else {
                continue;
            };
            let mut substituted = text;
            for &dep_index in &contained[index] {
                let hash = hashes[dep_index].as_deref().expect("all hashes resolved");
                substituted = substituted.replace(&placeholders[dep_index], hash);
            }
            contents[index] = Content::Text(substituted);
        }

        let mut manifest = BTreeMap::new();
        let mut outputs = Vec::new();
        for (index, node) in candidates.iter().enumerate() {
            let original_path = paths[index].clone();
            // Entry points keep their name: callers address them directly.
            let output_path = if node.entry_point {
                original_path.clone()
            } else {
                let hash = hashes[index].as_deref().expect("all hashes resolved");
                versioned_path(&original_path, hash)
            };
            tracing::debug!(
                target: "versioning",
                "{original_path} -> {output_path}"
            );
            manifest.insert(original_path.clone(), output_path.clone());
            outputs.push(OutputFile {
                url: node.info.url.clone(),
                original_path,
                output_path,
                content: contents[index].clone(),
            });
        }
        VersionedBuild { manifest, outputs }
    }

    fn short_hash(&self, bytes: &[u8]) -> String {
        let mut hash = content_hash(bytes);
        hash.truncate(self.hash_length);
        hash
    }
}

/// Path of `url` relative to the project root URL, falling back to the URL
/// path without its leading slash.
pub fn relative_url_path(url: &Url, root_url: Option<&Url>) -> String {
    if let Some(root) = root_url {
        if let Some(suffix) = url.as_str().strip_prefix(root.as_str()) {
            if !suffix.is_empty() {
                return suffix.to_string();
            }
        }
    }
    url.path().trim_start_matches('/').to_string()
}

/// Last path segment.
fn file_name(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

/// Whether `c` can be part of a file name.
fn is_name_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.')
}

/// Replace whole-name occurrences of `name` in `text`. An occurrence
/// adjacent to another name character is part of a larger name (`app.js`
/// inside `webapp.js` or `app.js.map`) and is left alone. Returns the
/// rewritten text and whether anything matched.
fn replace_name_anchored(text: &str, name: &str, replacement: &str) -> (String, bool) {
    let mut result = String::with_capacity(text.len());
    let mut rest = text;
    let mut replaced = false;
    while let Some(pos) = rest.find(name) {
        let before = &rest[..pos];
        let after = &rest[pos + name.len()..];
        let anchored = !before.chars().next_back().is_some_and(is_name_char)
            && !after.chars().next().is_some_and(is_name_char);
        result.push_str(before);
        if anchored {
            result.push_str(replacement);
            replaced = true;
        } else {
            result.push_str(name);
        }
        rest = after;
    }
    result.push_str(rest);
    (result, replaced)
}

/// Insert `token` before the extension: `app.js` → `app-{token}.js`.
fn versioned_name(name: &str, token: &str) -> String {
    match name.rsplit_once('.') {
        Some((stem, ext)) => format!("{stem}-{token}.{ext}"),
        None => format!("{name}-{token}"),
    }
}

/// Like [`versioned_name`] but only the file-name segment of a path.
fn versioned_path(path: &str, token: &str) -> String {
    match path.rsplit_once('/') {
        Some((dir, name)) => format!("{dir}/{}", versioned_name(name, token)),
        None => versioned_name(path, token),
    }
}
