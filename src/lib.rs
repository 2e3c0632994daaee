//! # Notes Plugin Engine
//!
//! Trust and guarded execution for third-party plugins of a local-first note
//! store.
//!
//! Plugins contribute CLI actions and UI panels. Before any of their code runs,
//! the engine:
//!
//! - **Confines** it to operator-trusted directories, checked both lexically and
//!   through symlink resolution
//! - **Gates** each action on the permissions granted in the plugin's manifest
//! - **Governs** each call with payload ceilings, a wall-clock timeout and a
//!   per-plugin concurrency limit
//!
//! ## Quick Start
//!
//! ```bash
//! # Show the trusted roots in effect
//! notes-plugins roots
//!
//! # Run an action
//! notes-plugins run daily-digest summarize --input '{"noteId": "n1"}'
//! ```

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_const_for_fn)]
#![allow(clippy::doc_markdown)]
#![allow(clippy::derivable_impls)]
#![allow(clippy::option_if_let_else)]
#![allow(clippy::significant_drop_tightening)]
#![allow(clippy::uninlined_format_args)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::items_after_statements)]
#![allow(clippy::cast_possible_truncation)]

pub mod config;
pub mod plugin;

pub use config::Config;
pub use plugin::{
    discover_plugin_runtime_assets, evaluate_plugin_permission_gate, load_plugin_runtime_module,
    map_plugin_action_error, resolve_plugin_root, resolve_trusted_roots,
    run_plugin_action_with_guards, ActionErrorResponse, GuardError, GuardErrorKind,
    InvocationTracker, PluginEngine, PluginError, PluginManifest, PluginResult,
    PluginRuntimePolicy, PluginState,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name
pub const APP_NAME: &str = "notes-plugins";
