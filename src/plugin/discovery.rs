//! Runtime asset discovery.
//!
//! Locates the CLI and UI entrypoints of a verified plugin root, either from the
//! manifest or from a fixed convention list, re-checking containment for every
//! candidate before it is tested for existence.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use super::manifest::{CAPABILITY_CLI_ACTIONS, CAPABILITY_UI_PANELS};
use super::trust::{absolutize, ensure_trusted, is_lexically_contained};
use super::{PluginError, PluginManifest, PluginResult};

/// Conventional CLI entrypoints, probed in order.
pub const CLI_ENTRYPOINT_CONVENTIONS: &[&str] =
    &["dist/cli.js", "dist/cli.mjs", "cli.js", "cli.mjs", "index.js"];

/// Conventional UI entrypoints, probed in order.
pub const UI_ENTRYPOINT_CONVENTIONS: &[&str] = &["dist/ui.js", "dist/ui.mjs", "ui.js", "ui.mjs"];

/// Where an entrypoint was found.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiscoverySource {
    /// Declared explicitly in the manifest.
    Manifest,
    /// Found by probing the convention list.
    Convention,
}

/// A discovered, verified entrypoint file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuntimeEntrypoint {
    /// Path relative to the plugin root, as declared or probed.
    pub relative_path: String,
    /// Absolute, normalized path.
    pub absolute_path: PathBuf,
    /// How the entrypoint was found.
    pub discovered_from: DiscoverySource,
}

/// Result of a discovery pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuntimeAssets {
    /// CLI entrypoint, if any.
    pub cli_entrypoint: Option<RuntimeEntrypoint>,
    /// UI entrypoint, if any.
    pub ui_entrypoint: Option<RuntimeEntrypoint>,
    /// Non-fatal discovery gaps.
    pub warnings: Vec<String>,
}

/// A plugin surface that has its own entrypoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Surface {
    Cli,
    Ui,
}

impl Surface {
    fn label(self) -> &'static str {
        match self {
            Self::Cli => "cli",
            Self::Ui => "ui",
        }
    }

    fn capability(self) -> &'static str {
        match self {
            Self::Cli => CAPABILITY_CLI_ACTIONS,
            Self::Ui => CAPABILITY_UI_PANELS,
        }
    }

    fn conventions(self) -> &'static [&'static str] {
        match self {
            Self::Cli => CLI_ENTRYPOINT_CONVENTIONS,
            Self::Ui => UI_ENTRYPOINT_CONVENTIONS,
        }
    }

    fn declared(self, manifest: &PluginManifest) -> Option<&str> {
        match self {
            Self::Cli => manifest.cli_entrypoint(),
            Self::Ui => manifest.ui_entrypoint(),
        }
    }
}

/// Discover the CLI and UI entrypoints of a plugin.
///
/// Containment failures are hard errors. A declared capability (or declared
/// entrypoint) with no file on disk only produces a warning, so the host can
/// still register the plugin's metadata with that surface disabled.
pub fn discover_plugin_runtime_assets(
    plugin_root: &Path,
    manifest: &PluginManifest,
    trusted_roots: &[PathBuf],
) -> PluginResult<RuntimeAssets> {
    let mut assets = RuntimeAssets::default();

    assets.cli_entrypoint =
        discover_surface(Surface::Cli, plugin_root, manifest, trusted_roots, &mut assets.warnings)?;
    assets.ui_entrypoint =
        discover_surface(Surface::Ui, plugin_root, manifest, trusted_roots, &mut assets.warnings)?;

    Ok(assets)
}

fn discover_surface(
    surface: Surface,
    plugin_root: &Path,
    manifest: &PluginManifest,
    trusted_roots: &[PathBuf],
    warnings: &mut Vec<String>,
) -> PluginResult<Option<RuntimeEntrypoint>> {
    let (candidates, source): (Vec<&str>, DiscoverySource) = match surface.declared(manifest) {
        Some(declared) => (vec![declared], DiscoverySource::Manifest),
        None if manifest.has_capability(surface.capability()) => {
            (surface.conventions().to_vec(), DiscoverySource::Convention)
        }
        None => return Ok(None),
    };

    for relative in candidates {
        let absolute = absolutize(Path::new(relative), plugin_root);

        if !is_lexically_contained(plugin_root, &absolute) {
            return Err(PluginError::EntrypointEscape {
                namespace: manifest.namespace.clone(),
                path: absolute,
            });
        }

        ensure_trusted(trusted_roots, &absolute).map_err(|_| PluginError::EntrypointEscape {
            namespace: manifest.namespace.clone(),
            path: absolute.clone(),
        })?;

        if absolute.is_file() {
            tracing::debug!(
                namespace = %manifest.namespace,
                surface = surface.label(),
                entrypoint = %absolute.display(),
                "Discovered plugin entrypoint"
            );
            return Ok(Some(RuntimeEntrypoint {
                relative_path: relative.to_string(),
                absolute_path: absolute,
                discovered_from: source,
            }));
        }
    }

    let warning = match source {
        DiscoverySource::Manifest => format!(
            "Plugin '{}' declares {} entrypoint '{}' but the file does not exist",
            manifest.namespace,
            surface.label(),
            surface.declared(manifest).unwrap_or_default()
        ),
        DiscoverySource::Convention => format!(
            "Plugin '{}' declares capability '{}' but no {} entrypoint was found",
            manifest.namespace,
            surface.capability(),
            surface.label()
        ),
    };
    warnings.push(warning);

    Ok(None)
}
