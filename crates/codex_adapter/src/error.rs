use std::time::Duration;

use thiserror::Error;

/// Errors returned from [`crate::service::Service::do_turn`] and the
/// subsystems it drives.
///
/// Variant names double as the stable error categories a caller switches on
/// (spec.md §7): `Unauthorized`, `TurnFailed`, `Transport`, `Protocol`,
/// `ToolFailure`, `Cancelled`.
#[derive(Debug, Error)]
pub enum AdapterError {
    #[error("codex binary `{binary}` could not be spawned: {source}")]
    Spawn {
        binary: String,
        #[source]
        source: std::io::Error,
    },

    #[error("codex app-server did not complete initialize handshake: {0}")]
    Handshake(String),

    #[error("upstream sign-in required")]
    Unauthorized,

    #[error("turn failed: {0}")]
    TurnFailed(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("tool `{tool}` failed: {message}")]
    ToolFailure { tool: String, message: String },

    #[error("call was cancelled")]
    Cancelled,

    #[error("request contained no user input")]
    NoUserInput,

    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("failed to serialize request: {0}")]
    Serialize(#[source] serde_json::Error),

    #[error("failed to deserialize message: {0}")]
    Deserialize(#[source] serde_json::Error),

    #[error("internal channel closed unexpectedly")]
    ChannelClosed,

    #[error("failed to load adapter configuration from `{path}`: {source}")]
    Config {
        path: String,
        #[source]
        source: ConfigLoadError,
    },
}

/// Lower-level reason a configuration file failed to load, kept distinct from
/// [`AdapterError::Config`] so callers formatting a user-facing message only
/// need one branch, while programmatic callers can still match the source.
#[derive(Debug, Error)]
pub enum ConfigLoadError {
    #[error("failed to read file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),
}

impl AdapterError {
    /// True for errors that invalidate the shared subprocess state and
    /// require the façade to respawn before the next call (spec.md §7).
    pub fn invalidates_supervisor(&self) -> bool {
        matches!(self, AdapterError::Transport(_) | AdapterError::ChannelClosed)
    }
}
