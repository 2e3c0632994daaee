//! Plugin engine error types.

use std::path::PathBuf;
use thiserror::Error;

use super::guard::GuardError;

/// Result type for plugin operations.
pub type PluginResult<T> = Result<T, PluginError>;

/// Errors that can occur while admitting, loading, or running a plugin.
#[derive(Debug, Error)]
pub enum PluginError {
    /// Candidate path is not contained in any trusted root.
    #[error("Plugin path '{}' is outside configured trusted roots", .0.display())]
    OutsideTrustedRoots(PathBuf),

    /// No trusted root holds a directory for the namespace.
    #[error("Unable to resolve plugin root for namespace '{0}'")]
    RootNotFound(String),

    /// Namespace cannot be used as a directory name.
    #[error("Invalid plugin namespace '{0}'")]
    InvalidNamespace(String),

    /// Entrypoint candidate escapes the plugin root or the trusted roots.
    #[error("Plugin '{namespace}' entrypoint '{}' escapes its plugin root", .path.display())]
    EntrypointEscape { namespace: String, path: PathBuf },

    /// Entrypoint vanished or is not a regular file.
    #[error("Plugin entrypoint does not exist: {}", .0.display())]
    EntrypointMissing(PathBuf),

    /// Plugin declares no entrypoint for the requested surface.
    #[error("Plugin '{namespace}' has no {surface} entrypoint")]
    NoEntrypoint { namespace: String, surface: &'static str },

    /// Loaded module does not expose the expected interface.
    #[error("Invalid plugin module {}: {reason}", .path.display())]
    InvalidModule { path: PathBuf, reason: String },

    /// Invalid plugin manifest.
    #[error("Invalid plugin manifest: {0}")]
    InvalidManifest(String),

    /// Action is not declared by the manifest or not exported by the module.
    #[error("Plugin '{namespace}' does not provide action '{action_id}'")]
    UnknownAction { namespace: String, action_id: String },

    /// Permission denied.
    #[error("Plugin '{namespace}' action '{action_id}' requires missing permissions: {}", .missing.join(", "))]
    PermissionDenied { namespace: String, action_id: String, missing: Vec<String> },

    /// Plugin is not enabled.
    #[error("Plugin '{0}' is not enabled")]
    Disabled(String),

    /// Resource guard rejected the invocation.
    #[error(transparent)]
    Guard(#[from] GuardError),

    /// Plugin execution failed.
    #[error("{0}")]
    ExecutionError(String),

    /// Plugin task panicked or was aborted.
    #[error("Plugin task panicked")]
    ActionPanicked,

    /// Plugin wrote more than the loader keeps of its stdout.
    #[error("Plugin output exceeded {0} bytes")]
    OutputLimitExceeded(usize),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),
}

impl PluginError {
    /// Whether this error is a trust violation (never retried, never softened).
    pub fn is_trust_violation(&self) -> bool {
        matches!(
            self,
            Self::OutsideTrustedRoots(_)
                | Self::RootNotFound(_)
                | Self::InvalidNamespace(_)
                | Self::EntrypointEscape { .. }
        )
    }

    /// The guard failure carried by this error, if any.
    pub fn as_guard(&self) -> Option<&GuardError> {
        match self {
            Self::Guard(err) => Some(err),
            _ => None,
        }
    }
}
