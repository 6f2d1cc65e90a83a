//! Error types for the build engine.
//!
//! The engine uses a two-tier error model:
//! - [`KilnError`] - strongly-typed variants for every engine failure mode,
//!   used where callers need to branch on the failure (dev-server response
//!   mapping, retry decisions, build abort).
//! - [`anyhow::Result`] at outer boundaries (build driver, config loading)
//!   where failures only need context, not discrimination.
//!
//! Every variant is `Clone`: a cook result is memoized and handed to every
//! caller that requested the same URL concurrently, so errors own their
//! context as strings instead of carrying live sources.

use thiserror::Error;

use super::fetch_error::FetchFailure;

/// All failure modes of the resolve/fetch/transform/finalize pipeline.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum KilnError {
    /// No resolve hook claimed a specifier.
    ///
    /// Fatal in build mode (the import trace back to an entry point is
    /// attached by the build driver); scoped to the single request in dev.
    #[error("no plugin resolved '{specifier}' (referenced by {importer})")]
    ResolveFailed {
        /// The specifier text as written in the referencing resource.
        specifier: String,
        /// URL of the resource containing the reference, or "entry" for
        /// entry points.
        importer: String,
    },

    /// A fetch hook failed to load content, with a structured outcome.
    #[error(transparent)]
    FetchFailed(#[from] FetchFailure),

    /// A transform or finalize hook returned an error.
    #[error("plugin '{plugin}' failed transforming {url}: {reason}")]
    TransformFailed {
        /// URL of the node being transformed.
        url: String,
        /// Name of the plugin whose hook failed.
        plugin: String,
        /// Stringified plugin error.
        reason: String,
    },

    /// Fetched content did not match the integrity hash declared by the
    /// reference that requested it.
    #[error("integrity mismatch for {url}: expected {expected}, got {actual}")]
    IntegrityMismatch {
        /// URL of the fetched resource.
        url: String,
        /// Hash the reference declared.
        expected: String,
        /// Hash of the bytes actually fetched.
        actual: String,
    },

    /// A cook waited on the `ready` milestone of a node that transitively
    /// depends back on it, past the diagnostic timeout.
    ///
    /// This is an engine invariant violation indicating a plugin bug: cyclic
    /// module graphs are handled transparently by waiting on the
    /// `dependencies_known` milestone instead.
    #[error("cook for {url} stalled: a hook is waiting for 'ready' across a dependency cycle")]
    CookStalled {
        /// URL of the node the stalled wait targeted.
        url: String,
    },

    /// The operation's cancellation token fired.
    ///
    /// A cancelled cook rolls its node back to `Pending`; it never leaves
    /// the graph in a partially-mutated state.
    #[error("operation cancelled")]
    Cancelled,
}

impl KilnError {
    /// HTTP-style status class for dev-server response mapping.
    pub fn status_class(&self) -> u16 {
        match self {
            Self::ResolveFailed { .. } => 404,
            Self::FetchFailed(failure) => failure.status_class,
            Self::TransformFailed { .. } | Self::CookStalled { .. } => 500,
            Self::IntegrityMismatch { .. } => 502,
            Self::Cancelled => 499,
        }
    }

    /// Whether retrying the operation may succeed without any other change.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::FetchFailed(failure) => failure.retryable,
            _ => false,
        }
    }
}

/// Result alias used throughout the engine.
pub type Result<T, E = KilnError> = std::result::Result<T, E>;
