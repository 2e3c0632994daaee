//! Plugin manifest parsing and validation.
//!
//! A plugin manifest is a JSON document (`plugin.json`) that describes a
//! plugin's namespace, the surfaces it offers, and the permissions it has been
//! granted. The manifest is owned by the plugin registry; the engine only reads it.

use std::collections::{BTreeSet, HashSet};
use std::path::Path;

use serde::{Deserialize, Serialize};

use super::{PluginError, PluginResult};

/// Capability flag requesting CLI action discovery.
pub const CAPABILITY_CLI_ACTIONS: &str = "cli_actions";

/// Capability flag requesting UI panel discovery.
pub const CAPABILITY_UI_PANELS: &str = "ui_panels";

/// Plugin manifest containing identity, capabilities and granted permissions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PluginManifest {
    /// Unique plugin key.
    pub namespace: String,
    /// Manifest schema version.
    #[serde(default = "default_schema_version")]
    pub schema_version: u32,
    /// Feature flags (e.g. `cli_actions`, `ui_panels`).
    #[serde(default)]
    pub capabilities: BTreeSet<String>,
    /// Permission tokens granted to this plugin instance.
    #[serde(default)]
    pub permissions: BTreeSet<String>,
    /// CLI surface.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cli: Option<CliManifest>,
    /// UI surface.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ui: Option<UiManifest>,
}

fn default_schema_version() -> u32 {
    1
}

/// CLI section of a manifest.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CliManifest {
    /// Entrypoint path relative to the plugin root.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entrypoint: Option<String>,
    /// Declared actions.
    #[serde(default)]
    pub actions: Vec<CliAction>,
}

/// A CLI action declared by a plugin.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CliAction {
    /// Action identifier.
    pub id: String,
    /// Human readable description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Permissions this action needs.
    #[serde(default)]
    pub required_permissions: Vec<String>,
}

/// UI section of a manifest.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UiManifest {
    /// Entrypoint path relative to the plugin root.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entrypoint: Option<String>,
    /// Declared panels.
    #[serde(default)]
    pub panels: Vec<UiPanel>,
}

/// A UI panel declared by a plugin.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UiPanel {
    /// Panel identifier.
    pub id: String,
    /// Panel title.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
}

/// Lifecycle state of a plugin as tracked by the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PluginState {
    /// Known to the registry but not installed.
    Registered,
    /// Installed but never enabled.
    Installed,
    /// Enabled and allowed to run actions.
    Enabled,
    /// Explicitly disabled.
    Disabled,
}

impl Default for PluginState {
    fn default() -> Self {
        Self::Registered
    }
}

impl PluginState {
    /// Only enabled plugins may run actions.
    pub fn is_enabled(self) -> bool {
        self == Self::Enabled
    }
}

impl std::fmt::Display for PluginState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Registered => "registered",
            Self::Installed => "installed",
            Self::Enabled => "enabled",
            Self::Disabled => "disabled",
        };
        f.write_str(name)
    }
}

impl PluginManifest {
    /// Parse a manifest from a JSON string.
    pub fn from_json(content: &str) -> PluginResult<Self> {
        serde_json::from_str(content).map_err(|e| PluginError::InvalidManifest(e.to_string()))
    }

    /// Parse a manifest from a file.
    pub fn from_file(path: &Path) -> PluginResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_json(&content)
    }

    /// Serialize to a pretty JSON string.
    pub fn to_json(&self) -> PluginResult<String> {
        serde_json::to_string_pretty(self).map_err(|e| PluginError::InvalidManifest(e.to_string()))
    }

    /// Validate the manifest.
    pub fn validate(&self) -> PluginResult<()> {
        if self.namespace.is_empty() {
            return Err(PluginError::InvalidManifest("Plugin namespace is required".to_string()));
        }

        if !is_valid_namespace(&self.namespace) {
            return Err(PluginError::InvalidManifest(
                "Plugin namespace must contain only alphanumeric characters, '-', '_' and '.'"
                    .to_string(),
            ));
        }

        if self.schema_version == 0 {
            return Err(PluginError::InvalidManifest(
                "schemaVersion must be a positive integer".to_string(),
            ));
        }

        if let Some(cli) = &self.cli {
            let mut seen = HashSet::new();
            for action in &cli.actions {
                if action.id.is_empty() {
                    return Err(PluginError::InvalidManifest("Action id is required".to_string()));
                }
                if !seen.insert(action.id.as_str()) {
                    return Err(PluginError::InvalidManifest(format!(
                        "Duplicate action id '{}'",
                        action.id
                    )));
                }
            }
            validate_entrypoint(cli.entrypoint.as_deref())?;
        }

        if let Some(ui) = &self.ui {
            validate_entrypoint(ui.entrypoint.as_deref())?;
        }

        Ok(())
    }

    /// Check whether a capability flag is declared.
    pub fn has_capability(&self, capability: &str) -> bool {
        self.capabilities.contains(capability)
    }

    /// Explicit CLI entrypoint, if declared.
    pub fn cli_entrypoint(&self) -> Option<&str> {
        self.cli.as_ref().and_then(|cli| cli.entrypoint.as_deref())
    }

    /// Explicit UI entrypoint, if declared.
    pub fn ui_entrypoint(&self) -> Option<&str> {
        self.ui.as_ref().and_then(|ui| ui.entrypoint.as_deref())
    }

    /// Look up a declared CLI action by id.
    pub fn cli_action(&self, action_id: &str) -> Option<&CliAction> {
        self.cli.as_ref()?.actions.iter().find(|action| action.id == action_id)
    }

    /// Look up a declared UI panel by id.
    pub fn ui_panel(&self, panel_id: &str) -> Option<&UiPanel> {
        self.ui.as_ref()?.panels.iter().find(|panel| panel.id == panel_id)
    }
}

/// Namespaces double as directory names, so they must be a single plain segment.
pub fn is_valid_namespace(namespace: &str) -> bool {
    !namespace.is_empty()
        && namespace != "."
        && namespace != ".."
        && namespace.chars().all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
}

fn validate_entrypoint(entrypoint: Option<&str>) -> PluginResult<()> {
    match entrypoint {
        Some("") => Err(PluginError::InvalidManifest("Entrypoint must not be empty".to_string())),
        Some(path) if Path::new(path).is_absolute() => Err(PluginError::InvalidManifest(format!(
            "Entrypoint '{path}' must be relative to the plugin root"
        ))),
        _ => Ok(()),
    }
}
