//! Kiln - an incremental resource compilation engine
//!
//! Kiln models a web project as a graph of URL-addressed resources (HTML,
//! scripts, stylesheets, workers, assets) and "cooks" each resource through
//! a plugin pipeline: resolve the specifier to a URL, fetch the content,
//! transform it while collecting the references it makes to other resources,
//! and finalize it once those references are known. Cooked results feed a
//! dev server serving resources on demand, or a whole-graph build writing a
//! content-hashed output tree.
//!
//! # Architecture Overview
//!
//! Kiln follows a cook/commit model where:
//! - Every resource is identified by a [`url::Url`] and tracked as a node in
//!   the [`graph::UrlGraph`], with dependency edges kept symmetric under a
//!   single lock
//! - The [`kitchen::Kitchen`] memoizes in-flight cooks per URL, so any
//!   number of concurrent requests for a resource share one pipeline run
//! - Circular imports are cooked to completion via two per-node milestones
//!   (`dependencies_known` and `ready`) instead of deadlocking
//! - Builds version outputs with a two-pass content-hash scheme that stays
//!   deterministic even across hash cycles
//!
//! # Core Modules
//!
//! ## The pipeline
//! - [`kitchen`] - the cook pipeline, in-flight memoization, build driver
//! - [`plugin`] - hook traits, merge policies, and the built-in filesystem
//!   plugin
//! - [`graph`] - the URL graph: nodes, edges, pruning, traversals
//! - [`reference`] - typed references discovered inside resources
//!
//! ## Build and dev
//! - [`versioning`] - content-hash filename versioning and the manifest
//! - [`invalidation`] - staleness propagation and the hot-update channel
//! - [`sourcemap`] - sourcemap carriage and composition across transforms
//!
//! ## Supporting modules
//! - [`core`] - resource kinds, content, and the error model
//! - [`config`] - `kiln.toml` configuration
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use kiln::config::KilnConfig;
//! use kiln::graph::UrlGraph;
//! use kiln::kitchen::Kitchen;
//! use kiln::plugin::{Phase, PluginController, fs::FileSystemPlugin};
//!
//! # async fn run() -> anyhow::Result<()> {
//! let config = KilnConfig::default();
//! let mut plugins = PluginController::new();
//! plugins.register(Arc::new(FileSystemPlugin::new("/project")), 0);
//!
//! let kitchen = Kitchen::new(
//!     Arc::new(UrlGraph::new()),
//!     Arc::new(plugins),
//!     Phase::Build,
//!     config,
//! );
//! let output = kitchen.build(&["index.html"]).await?;
//! println!("wrote {} files", output.written.len());
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod core;
pub mod graph;
pub mod invalidation;
pub mod kitchen;
pub mod plugin;
pub mod reference;
pub mod sourcemap;
pub mod versioning;

pub use config::KilnConfig;
pub use core::{Content, FetchFailure, KilnError, ResourceKind, Result};
pub use graph::{NodeState, UrlGraph};
pub use invalidation::{Invalidator, UpdateEvent};
pub use kitchen::Kitchen;
pub use plugin::{Phase, Plugin, PluginController};
pub use reference::{Reference, ReferenceKind};
