//! The full invocation pipeline.
//!
//! `PluginEngine` strings the components together for one call:
//! trusted roots → plugin root → entrypoint discovery → module load →
//! permission gate → guarded execution. Nothing is cached between calls, so
//! edits on disk and changes to the roots environment variable take effect on
//! the next invocation.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;
use tracing::Instrument;

use super::discovery::{discover_plugin_runtime_assets, RuntimeAssets, RuntimeEntrypoint};
use super::guard::{
    run_plugin_action_with_guards, GuardedInvocation, GuardedOutcome, InvocationTracker,
    PartialRuntimePolicy,
};
use super::loader::{load_plugin_runtime_module, LoaderOptions, PluginModule};
use super::permissions::evaluate_plugin_permission_gate;
use super::roots::resolve_plugin_root;
use super::trust::resolve_trusted_roots;
use super::{PluginError, PluginManifest, PluginResult, PluginState};
use crate::config::Config;

/// A plugin whose root and entrypoints have been verified for this call.
#[derive(Debug, Clone, Serialize)]
pub struct PreparedPlugin {
    /// Verified plugin directory.
    pub root: PathBuf,
    /// Discovered entrypoints and warnings.
    pub assets: RuntimeAssets,
}

/// One action invocation request.
#[derive(Debug, Clone)]
pub struct ActionRequest<'a> {
    pub manifest: &'a PluginManifest,
    pub state: PluginState,
    pub action_id: &'a str,
    pub input: Value,
    /// Explicit plugin directory instead of a namespace lookup.
    pub plugin_path: Option<&'a Path>,
    /// Per-call overrides; gaps fall back to the configured policy, then defaults.
    pub policy: PartialRuntimePolicy,
}

/// One panel render request.
#[derive(Debug, Clone)]
pub struct PanelRequest<'a> {
    pub manifest: &'a PluginManifest,
    pub state: PluginState,
    pub panel_id: &'a str,
    pub props: Value,
    pub plugin_path: Option<&'a Path>,
    pub policy: PartialRuntimePolicy,
}

/// Runs plugin actions under the engine's trust and resource rules.
#[derive(Debug, Clone)]
pub struct PluginEngine {
    config: Config,
    loader: LoaderOptions,
    tracker: Arc<InvocationTracker>,
}

impl PluginEngine {
    /// Create an engine with its own invocation tracker.
    pub fn new(config: Config) -> Self {
        Self::with_tracker(config, Arc::new(InvocationTracker::new()))
    }

    /// Create an engine sharing an existing tracker.
    pub fn with_tracker(config: Config, tracker: Arc<InvocationTracker>) -> Self {
        let loader = config.runtime.loader_options();
        Self { config, loader, tracker }
    }

    /// Engine configuration.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Shared invocation tracker.
    pub fn tracker(&self) -> &Arc<InvocationTracker> {
        &self.tracker
    }

    /// Resolve trusted roots, reading the roots environment variable now.
    pub fn trusted_roots(&self, cwd: &Path) -> Vec<PathBuf> {
        let env_value = std::env::var(&self.config.roots.env_var).ok();
        resolve_trusted_roots(
            &self.config.roots.bundled,
            self.config.roots.expanded_configured(),
            env_value.as_deref(),
            cwd,
        )
    }

    /// Verify a plugin's root and discover its entrypoints.
    pub fn prepare(
        &self,
        manifest: &PluginManifest,
        plugin_path: Option<&Path>,
        cwd: &Path,
    ) -> PluginResult<PreparedPlugin> {
        let roots = self.trusted_roots(cwd);
        let root = resolve_plugin_root(&manifest.namespace, &roots, plugin_path, cwd)?;
        let assets = discover_plugin_runtime_assets(&root, manifest, &roots)?;

        for warning in &assets.warnings {
            tracing::warn!(namespace = %manifest.namespace, "{}", warning);
        }

        Ok(PreparedPlugin { root, assets })
    }

    /// Run a CLI action through the whole pipeline.
    pub async fn run_action(
        &self,
        request: ActionRequest<'_>,
        cwd: &Path,
    ) -> PluginResult<GuardedOutcome<Value>> {
        let manifest = request.manifest;
        let namespace = manifest.namespace.as_str();
        let span = tracing::info_span!(
            "plugin_action",
            namespace,
            action_id = request.action_id,
            invocation_id = %uuid::Uuid::new_v4()
        );

        async move {
            ensure_enabled(namespace, request.state)?;

            let declared = manifest.cli_action(request.action_id).ok_or_else(|| {
                PluginError::UnknownAction {
                    namespace: namespace.to_string(),
                    action_id: request.action_id.to_string(),
                }
            })?;

            let prepared = self.prepare(manifest, request.plugin_path, cwd)?;
            let entrypoint =
                require_entrypoint(namespace, prepared.assets.cli_entrypoint.as_ref(), "cli")?;
            let module = self.load(entrypoint).await?;

            let cli = module
                .cli
                .as_ref()
                .filter(|cli| cli.has_action(request.action_id))
                .ok_or_else(|| PluginError::UnknownAction {
                    namespace: namespace.to_string(),
                    action_id: request.action_id.to_string(),
                })?;

            let gate = evaluate_plugin_permission_gate(
                &manifest.permissions,
                &declared.required_permissions,
            );
            if !gate.allowed {
                return Err(PluginError::PermissionDenied {
                    namespace: namespace.to_string(),
                    action_id: request.action_id.to_string(),
                    missing: gate.missing_permissions,
                });
            }

            let policy = request.policy.or(self.config.policy).resolve();
            let invocation = GuardedInvocation {
                namespace,
                action_id: request.action_id,
                input: &request.input,
                policy,
            };
            let future =
                cli.invoke(request.action_id, request.input.clone(), policy.max_output_bytes);

            let outcome =
                run_plugin_action_with_guards(&self.tracker, invocation, || future).await?;
            tracing::info!(
                duration_ms = outcome.duration_ms,
                input_bytes = outcome.input_bytes,
                output_bytes = outcome.output_bytes,
                "Plugin action finished"
            );
            Ok(outcome)
        }
        .instrument(span)
        .await
    }

    /// Render a UI panel through the whole pipeline.
    ///
    /// The panel must be declared in the manifest and exported by the module.
    /// Panels need no permissions beyond the plugin being enabled, but they run
    /// under the same guards as actions and share the namespace's slots.
    pub async fn render_panel(
        &self,
        request: PanelRequest<'_>,
        cwd: &Path,
    ) -> PluginResult<GuardedOutcome<Value>> {
        let manifest = request.manifest;
        let namespace = manifest.namespace.as_str();
        let span = tracing::info_span!(
            "plugin_panel",
            namespace,
            panel_id = request.panel_id,
            invocation_id = %uuid::Uuid::new_v4()
        );

        async move {
            ensure_enabled(namespace, request.state)?;

            manifest.ui_panel(request.panel_id).ok_or_else(|| PluginError::UnknownAction {
                namespace: namespace.to_string(),
                action_id: request.panel_id.to_string(),
            })?;

            let prepared = self.prepare(manifest, request.plugin_path, cwd)?;
            let entrypoint =
                require_entrypoint(namespace, prepared.assets.ui_entrypoint.as_ref(), "ui")?;
            let module = self.load(entrypoint).await?;

            let ui = module
                .ui
                .as_ref()
                .filter(|ui| ui.has_panel(request.panel_id))
                .ok_or_else(|| PluginError::UnknownAction {
                    namespace: namespace.to_string(),
                    action_id: request.panel_id.to_string(),
                })?;

            let policy = request.policy.or(self.config.policy).resolve();
            let invocation = GuardedInvocation {
                namespace,
                action_id: request.panel_id,
                input: &request.props,
                policy,
            };
            let future = ui.render(request.panel_id, request.props.clone(), policy.max_output_bytes);

            run_plugin_action_with_guards(&self.tracker, invocation, || future).await
        }
        .instrument(span)
        .await
    }

    async fn load(&self, entrypoint: &RuntimeEntrypoint) -> PluginResult<PluginModule> {
        load_plugin_runtime_module(&entrypoint.absolute_path, &self.loader).await
    }
}

fn ensure_enabled(namespace: &str, state: PluginState) -> PluginResult<()> {
    if state.is_enabled() {
        Ok(())
    } else {
        tracing::debug!(namespace, %state, "Refusing to run plugin that is not enabled");
        Err(PluginError::Disabled(namespace.to_string()))
    }
}

fn require_entrypoint<'a>(
    namespace: &str,
    entrypoint: Option<&'a RuntimeEntrypoint>,
    surface: &'static str,
) -> PluginResult<&'a RuntimeEntrypoint> {
    entrypoint.ok_or_else(|| PluginError::NoEntrypoint { namespace: namespace.to_string(), surface })
}
