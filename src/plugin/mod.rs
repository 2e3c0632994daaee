//! Plugin trust and guarded execution.
//!
//! This module decides which directories may hold plugin code, finds and loads
//! that code without letting it escape its root, gates each call on the
//! plugin's granted permissions, and runs the call under resource governors.
//!
//! # Pipeline
//!
//! 1. [`resolve_trusted_roots`] builds the list of authorized directories
//! 2. [`resolve_plugin_root`] picks the plugin's directory inside them
//! 3. [`discover_plugin_runtime_assets`] finds its CLI/UI entrypoints
//! 4. [`load_plugin_runtime_module`] loads an entrypoint as a module
//! 5. [`evaluate_plugin_permission_gate`] checks required vs granted permissions
//! 6. [`run_plugin_action_with_guards`] applies size, concurrency and time limits
//! 7. [`map_plugin_action_error`] turns any failure into a stable host code
//!
//! [`PluginEngine`] runs the whole pipeline for one invocation.
//!
//! # Example Configuration
//!
//! ```toml
//! [roots]
//! bundled = ["./plugins"]
//! configured = ["~/notes/plugins"]
//!
//! [policy]
//! timeout_ms = 5000
//! max_concurrent_invocations_per_plugin = 2
//! ```
//!
//! There is no OS-level isolation: admitted code runs with the host's
//! privileges once loaded.

mod discovery;
mod engine;
mod error;
mod guard;
mod loader;
mod manifest;
mod mapping;
mod permissions;
mod roots;
mod trust;

pub use discovery::{
    discover_plugin_runtime_assets, DiscoverySource, RuntimeAssets, RuntimeEntrypoint,
    CLI_ENTRYPOINT_CONVENTIONS, UI_ENTRYPOINT_CONVENTIONS,
};
pub use engine::{ActionRequest, PanelRequest, PluginEngine, PreparedPlugin};
pub use error::{PluginError, PluginResult};
pub use guard::{
    run_plugin_action_with_guards, GuardError, GuardErrorKind, GuardedInvocation, GuardedOutcome,
    InvocationSlot, InvocationTracker, PartialRuntimePolicy, PluginRuntimePolicy,
    DEFAULT_MAX_CONCURRENT_INVOCATIONS, DEFAULT_MAX_INPUT_BYTES, DEFAULT_MAX_OUTPUT_BYTES,
    DEFAULT_TIMEOUT_MS,
};
pub use loader::{
    default_interpreters, load_plugin_runtime_module, CliSurface, InterpreterMap, LoaderOptions,
    PluginModule, UiSurface, DEFAULT_DESCRIBE_TIMEOUT_MS,
};
pub use manifest::{
    is_valid_namespace, CliAction, CliManifest, PluginManifest, PluginState, UiManifest, UiPanel,
    CAPABILITY_CLI_ACTIONS, CAPABILITY_UI_PANELS,
};
pub use mapping::{
    map_plugin_action_error, ActionErrorResponse, CODE_CONCURRENCY_LIMITED, CODE_INPUT_TOO_LARGE,
    CODE_OUTPUT_TOO_LARGE, CODE_RUN_FAILED, CODE_TIMEOUT, DEFAULT_FALLBACK_MESSAGE,
};
pub use permissions::{evaluate_plugin_permission_gate, PermissionGateResult};
pub use roots::resolve_plugin_root;
pub use trust::{
    absolutize, ensure_trusted, is_canonically_contained, is_lexically_contained,
    is_lexically_trusted, normalize_lexically, resolve_trusted_roots, split_env_roots,
    PATH_LIST_SEPARATOR, TRUSTED_ROOTS_ENV,
};

/// Plugin manifest file name at the plugin root.
pub const MANIFEST_FILE: &str = "plugin.json";
