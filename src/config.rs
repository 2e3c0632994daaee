//! Configuration management for the plugin engine.
//!
//! Handles loading configuration from TOML files. Lookup order is
//! `.notes-plugins.toml` in the working directory, then
//! `<config_dir>/notes-plugins/config.toml`, then built-in defaults.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::plugin::{
    default_interpreters, InterpreterMap, LoaderOptions, PartialRuntimePolicy, PluginState,
    DEFAULT_DESCRIBE_TIMEOUT_MS, TRUSTED_ROOTS_ENV,
};

/// Local configuration file name.
pub const LOCAL_CONFIG_FILE: &str = ".notes-plugins.toml";

/// Application directory under the platform config dir.
pub const APP_DIR: &str = "notes-plugins";

/// Engine configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Trusted root sources
    pub roots: RootsConfig,

    /// Default runtime policy
    pub policy: PartialRuntimePolicy,

    /// Module loading settings
    pub runtime: RuntimeConfig,

    /// Plugin lifecycle overrides
    pub plugins: PluginsConfig,

    /// File this configuration was read from, if any
    #[serde(skip)]
    pub source: Option<PathBuf>,
}

/// Trusted root sources.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RootsConfig {
    /// Roots shipped with the host
    pub bundled: Vec<PathBuf>,

    /// Operator configured roots (`~` and `$VAR` are expanded)
    pub configured: Vec<String>,

    /// Environment variable with extra roots
    pub env_var: String,
}

impl Default for RootsConfig {
    fn default() -> Self {
        Self { bundled: Vec::new(), configured: Vec::new(), env_var: TRUSTED_ROOTS_ENV.to_string() }
    }
}

impl RootsConfig {
    /// Configured roots with `~` and environment references expanded.
    ///
    /// Entries that fail to expand are kept verbatim.
    pub fn expanded_configured(&self) -> Vec<PathBuf> {
        self.configured
            .iter()
            .map(|raw| match shellexpand::full(raw) {
                Ok(expanded) => PathBuf::from(expanded.as_ref()),
                Err(e) => {
                    tracing::warn!(root = %raw, error = %e, "Could not expand configured root");
                    PathBuf::from(raw)
                }
            })
            .collect()
    }
}

/// Module loading settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Time a module gets to answer `describe`
    pub describe_timeout_ms: u64,

    /// Interpreter overrides by file extension
    pub interpreters: InterpreterMap,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self { describe_timeout_ms: DEFAULT_DESCRIBE_TIMEOUT_MS, interpreters: InterpreterMap::new() }
    }
}

impl RuntimeConfig {
    /// Loader options with overrides applied on top of the default interpreters.
    pub fn loader_options(&self) -> LoaderOptions {
        let mut interpreters = default_interpreters();
        for (ext, argv) in &self.interpreters {
            interpreters.insert(ext.to_ascii_lowercase(), argv.clone());
        }

        let describe_timeout_ms = if self.describe_timeout_ms == 0 {
            DEFAULT_DESCRIBE_TIMEOUT_MS
        } else {
            self.describe_timeout_ms
        };

        LoaderOptions { interpreters, describe_timeout: Duration::from_millis(describe_timeout_ms) }
    }
}

/// Plugin lifecycle overrides.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PluginsConfig {
    /// Namespaces that must not run
    pub disabled: BTreeSet<String>,
}

impl PluginsConfig {
    /// Lifecycle state for a locally discovered plugin.
    pub fn state_of(&self, namespace: &str) -> PluginState {
        if self.disabled.contains(namespace) {
            PluginState::Disabled
        } else {
            PluginState::Enabled
        }
    }
}

impl Config {
    /// Load configuration from the default locations.
    pub fn load() -> anyhow::Result<Self> {
        let local_config = PathBuf::from(LOCAL_CONFIG_FILE);
        if local_config.exists() {
            let config = Self::load_from_file(&local_config)?;
            if !config.runtime.interpreters.is_empty() {
                tracing::warn!(
                    path = %local_config.display(),
                    extensions = ?config.runtime.interpreters.keys().collect::<Vec<_>>(),
                    "Project-local configuration overrides plugin interpreters"
                );
            }
            return Ok(config);
        }

        if let Some(config_dir) = Self::config_dir() {
            let global_config = config_dir.join("config.toml");
            if global_config.exists() {
                return Self::load_from_file(&global_config);
            }
        }

        Ok(Self::default())
    }

    /// Load configuration from a specific file.
    pub fn load_from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let mut config: Self = toml::from_str(&content)?;
        config.source = Some(path.to_path_buf());

        tracing::info!(
            path = %path.display(),
            bundled_roots = config.roots.bundled.len(),
            configured_roots = config.roots.configured.len(),
            interpreter_overrides = config.runtime.interpreters.len(),
            "Loaded configuration"
        );
        Ok(config)
    }

    /// Get the config directory path.
    pub fn config_dir() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join(APP_DIR))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use tempfile::TempDir;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.roots.env_var, "NOTES_PLUGIN_ROOTS");
        assert!(config.roots.bundled.is_empty());
        assert_eq!(config.policy, PartialRuntimePolicy::default());
        assert_eq!(config.runtime.describe_timeout_ms, 5_000);
        assert_eq!(config.source, None);
    }

    #[test]
    fn test_parse_full_config() {
        let toml = r#"
[roots]
bundled = ["./bundled-plugins"]
configured = ["/srv/plugins"]
env_var = "MY_ROOTS"

[policy]
timeout_ms = 2500
max_concurrent_invocations_per_plugin = 4

[runtime]
describe_timeout_ms = 750

[runtime.interpreters]
JS = ["deno", "run"]

[plugins]
disabled = ["legacy-sync"]
"#;
        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.roots.bundled, vec![PathBuf::from("./bundled-plugins")]);
        assert_eq!(config.roots.env_var, "MY_ROOTS");
        assert_eq!(config.policy.timeout_ms, Some(2500));
        assert_eq!(config.policy.max_input_bytes, None);

        let options = config.runtime.loader_options();
        assert_eq!(options.describe_timeout, Duration::from_millis(750));
        assert_eq!(options.interpreters["js"], vec!["deno", "run"]);
        assert_eq!(options.interpreters["py"], vec!["python3"]);

        assert_eq!(config.plugins.state_of("legacy-sync"), PluginState::Disabled);
        assert_eq!(config.plugins.state_of("digest"), PluginState::Enabled);
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let config: Config = toml::from_str("[policy]\ntimeout_ms = 10\n").unwrap();
        assert_eq!(config.roots, RootsConfig::default());
        assert!(config.roots.bundled.is_empty(), "no implicit bundled root");
        assert_eq!(config.policy.resolve().max_output_bytes, 262_144);
    }

    #[test]
    fn test_load_from_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[roots]\nconfigured = [\"/opt/notes/plugins\"]\n").unwrap();

        let config = Config::load_from_file(&path).unwrap();
        assert_eq!(config.roots.configured, vec!["/opt/notes/plugins"]);
        assert_eq!(config.source.as_deref(), Some(path.as_path()));
    }

    #[test]
    fn test_invalid_file_is_an_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[roots\n").unwrap();
        assert!(Config::load_from_file(&path).is_err());
    }

    #[test]
    #[serial]
    fn test_configured_roots_expand_env() {
        std::env::set_var("NOTES_TEST_PLUGIN_BASE", "/srv/base");
        let roots = RootsConfig {
            configured: vec!["$NOTES_TEST_PLUGIN_BASE/plugins".to_string(), "${UNSET_NOTES_VAR_X}/p".to_string()],
            ..RootsConfig::default()
        };
        let expanded = roots.expanded_configured();
        std::env::remove_var("NOTES_TEST_PLUGIN_BASE");

        assert_eq!(expanded[0], PathBuf::from("/srv/base/plugins"));
        assert_eq!(expanded[1], PathBuf::from("${UNSET_NOTES_VAR_X}/p"));
    }
}
