//! Core types shared by every engine component.
//!
//! This module provides the foundations the rest of the crate builds on:
//!
//! - [`error`] - the [`KilnError`] taxonomy and the crate-wide [`Result`]
//!   alias.
//! - [`fetch_error`] - structured filesystem failure mapping
//!   ([`FetchFailure`]) with the exact OS-error → status-class table.
//! - [`kind`] - the closed [`ResourceKind`] union, the extension/media-type
//!   registry, and the [`Content`] text/bytes representation.
//!
//! Everything here is deliberately free of async and graph concerns so it can
//! be depended on from any layer.

pub mod error;
pub mod fetch_error;
pub mod kind;

pub use error::{KilnError, Result};
pub use fetch_error::FetchFailure;
pub use kind::{Content, ResourceKind};
