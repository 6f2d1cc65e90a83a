//! Structured filesystem fetch failures.
//!
//! Fetch hooks that touch the operating system map raw I/O errors into a
//! [`FetchFailure`] at the operation site, so callers (the dev server, the
//! build driver) get a deterministic status class and retry hint instead of
//! having to parse error strings.
//!
//! The mapping table is part of the engine contract:
//!
//! | OS error | Status class | Retryable |
//! |----------|--------------|-----------|
//! | `ENOENT` | 404 | no |
//! | `EACCES` / `EPERM` | 403 | no |
//! | `EBUSY` | 503 | yes, after ~10ms |
//! | `EMFILE` | 503 | yes, after ~100ms |
//! | `EISDIR` | 500 | no |
//! | anything else | 500 | no |

use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Retry hint for busy-resource conditions.
const RETRY_AFTER_BUSY: Duration = Duration::from_millis(10);
/// Retry hint when the process ran out of file descriptors.
const RETRY_AFTER_FD_EXHAUSTED: Duration = Duration::from_millis(100);

#[cfg(unix)]
const EPERM: i32 = 1;
#[cfg(unix)]
const EBUSY: i32 = 16;
#[cfg(unix)]
const EISDIR: i32 = 21;
#[cfg(unix)]
const EMFILE: i32 = 24;

/// A filesystem fetch that failed, mapped to a structured outcome.
///
/// Cloneable by design: a cook result is shared with every caller that was
/// waiting on the same in-flight cook, so errors carry owned strings rather
/// than a live [`io::Error`] source.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("failed to fetch {}: {message} ({status_class})", path.display())]
pub struct FetchFailure {
    /// The path that was being read.
    pub path: PathBuf,
    /// HTTP-style status class: 404, 403, 503 or 500.
    pub status_class: u16,
    /// Whether retrying the fetch may succeed.
    pub retryable: bool,
    /// Suggested delay before retrying, when `retryable` is true.
    pub retry_after: Option<Duration>,
    /// Human-readable description of the underlying error.
    pub message: String,
}

impl FetchFailure {
    /// Map an [`io::Error`] returned while reading `path`.
    pub fn from_io(path: impl Into<PathBuf>, error: &io::Error) -> Self {
        let (status_class, retryable, retry_after) = classify(error);
        Self {
            path: path.into(),
            status_class,
            retryable,
            retry_after,
            message: error.to_string(),
        }
    }

    /// A failure for a URL no fetch hook claimed, surfaced as a 404.
    pub fn unhandled(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            status_class: 404,
            retryable: false,
            retry_after: None,
            message: "no plugin provided content for this url".to_string(),
        }
    }

    /// The path being fetched.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Classify an I/O error into `(status_class, retryable, retry_after)`.
///
/// Raw OS error codes are consulted first because several of the interesting
/// conditions (`EBUSY`, `EMFILE`) have no dedicated [`io::ErrorKind`] on
/// every platform.
fn classify(error: &io::Error) -> (u16, bool, Option<Duration>) {
    #[cfg(unix)]
    if let Some(code) = error.raw_os_error() {
        match code {
            EPERM => return (403, false, None),
            EBUSY => return (503, true, Some(RETRY_AFTER_BUSY)),
            EISDIR => return (500, false, None),
            EMFILE => return (503, true, Some(RETRY_AFTER_FD_EXHAUSTED)),
            _ => {}
        }
    }
    match error.kind() {
        io::ErrorKind::NotFound => (404, false, None),
        io::ErrorKind::PermissionDenied => (403, false, None),
        io::ErrorKind::ResourceBusy => (503, true, Some(RETRY_AFTER_BUSY)),
        io::ErrorKind::IsADirectory => (500, false, None),
        _ => (500, false, None),
    }
}
