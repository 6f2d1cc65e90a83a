//! Engine configuration.
//!
//! [`KilnConfig`] gathers the tunables of the engine: project root, output
//! directory, versioning, invalidation debounce and the diagnostic stall
//! timeout. It deserializes from a `kiln.toml` file; every field has a
//! default so an empty file (or no file) is a valid configuration.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

fn default_root_dir() -> PathBuf {
    PathBuf::from(".")
}

fn default_out_dir() -> PathBuf {
    PathBuf::from("dist")
}

fn default_versioning() -> bool {
    true
}

fn default_hash_length() -> usize {
    8
}

fn default_debounce_ms() -> u64 {
    150
}

fn default_stall_timeout_ms() -> u64 {
    10_000
}

/// Tunables for the kitchen, versioning engine and invalidation channel.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct KilnConfig {
    /// Project root; entry-point specifiers and root-relative references
    /// resolve against it.
    #[serde(default = "default_root_dir")]
    pub root_dir: PathBuf,

    /// Where builds write their output tree and manifest.
    #[serde(default = "default_out_dir")]
    pub out_dir: PathBuf,

    /// Whether builds rewrite output paths with content hashes.
    #[serde(default = "default_versioning")]
    pub versioning: bool,

    /// Number of hash characters embedded in versioned filenames. A hash
    /// longer than the reserved placeholder width is truncated to it.
    #[serde(default = "default_hash_length")]
    pub hash_length: usize,

    /// Coalescing window for file-change events, in milliseconds.
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,

    /// Diagnostic timeout for a cook waiting on a dependency's `ready`
    /// milestone, in milliseconds. Expiry across a dependency cycle is
    /// reported as an engine invariant violation.
    #[serde(default = "default_stall_timeout_ms")]
    pub stall_timeout_ms: u64,
}

impl Default for KilnConfig {
    fn default() -> Self {
        Self {
            root_dir: default_root_dir(),
            out_dir: default_out_dir(),
            versioning: default_versioning(),
            hash_length: default_hash_length(),
            debounce_ms: default_debounce_ms(),
            stall_timeout_ms: default_stall_timeout_ms(),
        }
    }
}

impl KilnConfig {
    /// Parse a configuration from TOML text.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        toml::from_str(text).context("invalid kiln configuration")
    }

    /// Load a configuration file. A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self> {
        match std::fs::read_to_string(path) {
            Ok(text) => Self::from_toml_str(&text)
                .with_context(|| format!("failed to parse {}", path.display())),
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(error) => {
                Err(error).with_context(|| format!("failed to read {}", path.display()))
            }
        }
    }

    /// Debounce window as a [`Duration`].
    pub fn debounce_window(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    /// Stall timeout as a [`Duration`].
    pub fn stall_timeout(&self) -> Duration {
        Duration::from_millis(self.stall_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_config_uses_defaults() {
        let config = KilnConfig::from_toml_str("").unwrap();
        assert_eq!(config.out_dir, PathBuf::from("dist"));
        assert!(config.versioning);
        assert_eq!(config.hash_length, 8);
        assert_eq!(config.debounce_window(), Duration::from_millis(150));
    }

    #[test]
    fn fields_override_defaults() {
        let config = KilnConfig::from_toml_str(
            r#"
            root_dir = "web"
            out_dir = "build"
            versioning = false
            debounce_ms = 250
            "#,
        )
        .unwrap();
        assert_eq!(config.root_dir, PathBuf::from("web"));
        assert_eq!(config.out_dir, PathBuf::from("build"));
        assert!(!config.versioning);
        assert_eq!(config.debounce_ms, 250);
    }

    #[test]
    fn unknown_fields_are_rejected() {
        assert!(KilnConfig::from_toml_str("no_such_option = 1").is_err());
    }
}
