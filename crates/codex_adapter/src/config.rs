use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::error::{AdapterError, ConfigLoadError};

/// Static configuration for a [`crate::service::Service`] (spec.md §6
/// "Configuration").
///
/// All fields have defaults matching the spec's stated constants; a host may
/// override any subset by deserializing a TOML file with [`AdapterConfig::from_toml_file`]
/// and layering it over [`AdapterConfig::default`].
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct AdapterConfig {
    /// Path to the `codex` binary. `app-server` is appended as the first
    /// argument by the supervisor.
    pub binary: PathBuf,
    /// Model requested at `thread/start` when a call does not specify one.
    pub default_model: Option<String>,
    /// `thread_registry` capacity bound (spec.md §4.E). Default 100.
    pub registry_capacity: usize,
    /// Per-thread subscription queue depth (spec.md §3, §4.C). Default 64.
    pub subscription_queue_depth: usize,
    /// Maximum accepted line length in bytes for the framing codec
    /// (spec.md §4.A). Default 16 MiB.
    pub max_frame_bytes: usize,
    /// Timeout applied to each handshake RPC (`initialize`, `account/get`)
    /// so a child that accepts the connection but never answers cannot hang
    /// `ensure()` forever.
    pub startup_timeout: Duration,
    /// Value reported by [`crate::service::Service::token_context_window`]
    /// pending real protocol-level discovery (spec.md §4.G).
    pub token_context_window: u32,
}

impl Default for AdapterConfig {
    fn default() -> Self {
        Self {
            binary: PathBuf::from("codex"),
            default_model: None,
            registry_capacity: 100,
            subscription_queue_depth: 64,
            max_frame_bytes: 16 * 1024 * 1024,
            startup_timeout: Duration::from_secs(30),
            token_context_window: 200_000,
        }
    }
}

impl AdapterConfig {
    /// Load overrides from a TOML file, falling back to [`Default`] for any
    /// field the file omits.
    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self, AdapterError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|source| AdapterError::Config {
            path: path.display().to_string(),
            source: ConfigLoadError::Io(source),
        })?;
        toml::from_str(&contents).map_err(|source| AdapterError::Config {
            path: path.display().to_string(),
            source: ConfigLoadError::Parse(source),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec_constants() {
        let config = AdapterConfig::default();
        assert_eq!(config.registry_capacity, 100);
        assert_eq!(config.subscription_queue_depth, 64);
        assert_eq!(config.max_frame_bytes, 16 * 1024 * 1024);
    }

    #[test]
    fn partial_toml_overrides_only_named_fields() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "registry_capacity = 10\n").expect("write");

        let config = AdapterConfig::from_toml_file(&path).expect("load");
        assert_eq!(config.registry_capacity, 10);
        assert_eq!(config.subscription_queue_depth, 64);
    }

    #[test]
    fn missing_file_is_a_config_error() {
        let err = AdapterConfig::from_toml_file("/nonexistent/path.toml").unwrap_err();
        assert!(matches!(err, AdapterError::Config { .. }));
    }
}
