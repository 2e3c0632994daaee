//! Plugin root resolution.
//!
//! Maps a namespace, or an explicit candidate path, to a single verified plugin
//! directory inside the trusted roots.

use std::path::{Path, PathBuf};

use super::manifest::is_valid_namespace;
use super::trust::{absolutize, ensure_trusted, is_canonically_contained, is_lexically_trusted};
use super::{PluginError, PluginResult};

/// Resolve the directory holding a plugin's files.
///
/// With `plugin_path`, the candidate is resolved against `cwd` and must be
/// contained in the trusted roots lexically and canonically. Without it, each
/// `<root>/<namespace>` is probed in order and the first contained directory wins.
pub fn resolve_plugin_root(
    namespace: &str,
    trusted_roots: &[PathBuf],
    plugin_path: Option<&Path>,
    cwd: &Path,
) -> PluginResult<PathBuf> {
    if let Some(candidate) = plugin_path {
        let candidate = absolutize(candidate, cwd);
        ensure_trusted(trusted_roots, &candidate)?;

        if !candidate.is_dir() {
            return Err(PluginError::RootNotFound(namespace.to_string()));
        }

        tracing::debug!(namespace, root = %candidate.display(), "Resolved explicit plugin root");
        return Ok(candidate);
    }

    if !is_valid_namespace(namespace) {
        return Err(PluginError::InvalidNamespace(namespace.to_string()));
    }

    for root in trusted_roots {
        let candidate = absolutize(&root.join(namespace), cwd);

        if !candidate.is_dir() {
            continue;
        }

        // Each probe must pass both checks on its own; a symlinked namespace
        // directory pointing elsewhere is skipped, not followed.
        if !is_lexically_trusted(trusted_roots, &candidate)
            || is_canonically_contained(trusted_roots, &candidate) != Some(true)
        {
            tracing::warn!(
                namespace,
                path = %candidate.display(),
                "Skipping plugin directory that resolves outside trusted roots"
            );
            continue;
        }

        tracing::debug!(namespace, root = %candidate.display(), "Resolved plugin root");
        return Ok(candidate);
    }

    Err(PluginError::RootNotFound(namespace.to_string()))
}
