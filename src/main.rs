//! notes-plugins - inspect and run note store plugins from the terminal.
//!
//! Every subcommand goes through the same trust and guard pipeline the host
//! application uses, so it doubles as a diagnostic tool for operators.

use std::io;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::{generate, Shell};
use serde_json::Value;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use notes_plugin_engine::plugin::{
    evaluate_plugin_permission_gate, map_plugin_action_error, resolve_plugin_root, ActionRequest,
    PanelRequest, PartialRuntimePolicy, PluginEngine, PluginError, PluginManifest, MANIFEST_FILE,
};
use notes_plugin_engine::Config;

/// Inspect and run note store plugins
#[derive(Parser)]
#[command(name = "notes-plugins")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Subcommand to run
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Use this configuration file instead of the default lookup
    #[arg(long, global = true, env = "NOTES_PLUGINS_CONFIG")]
    config: Option<PathBuf>,

    /// Print machine-readable JSON
    #[arg(long, global = true)]
    json: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// List the trusted plugin roots in effect
    Roots,

    /// Resolve a plugin's root directory
    Resolve {
        /// Plugin namespace
        namespace: String,

        /// Explicit plugin directory (must be inside a trusted root)
        #[arg(long)]
        path: Option<PathBuf>,
    },

    /// Discover a plugin's CLI and UI entrypoints
    Discover {
        /// Plugin namespace
        namespace: String,

        /// Explicit plugin directory (must be inside a trusted root)
        #[arg(long)]
        path: Option<PathBuf>,
    },

    /// Check required permissions against granted ones
    Gate {
        /// Granted permissions (comma separated)
        #[arg(long, value_delimiter = ',')]
        granted: Vec<String>,

        /// Required permissions (comma separated)
        #[arg(long, value_delimiter = ',')]
        required: Vec<String>,
    },

    /// Run a plugin CLI action
    Run {
        /// Plugin namespace
        namespace: String,

        /// Action id
        action: String,

        /// JSON input passed to the action
        #[arg(short, long, default_value = "null")]
        input: String,

        /// Explicit plugin directory (must be inside a trusted root)
        #[arg(long)]
        path: Option<PathBuf>,

        #[command(flatten)]
        limits: LimitArgs,
    },

    /// Render a plugin UI panel
    Render {
        /// Plugin namespace
        namespace: String,

        /// Panel id
        panel: String,

        /// JSON props passed to the panel
        #[arg(short, long, default_value = "{}")]
        props: String,

        /// Explicit plugin directory (must be inside a trusted root)
        #[arg(long)]
        path: Option<PathBuf>,

        #[command(flatten)]
        limits: LimitArgs,
    },

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        shell: Shell,
    },
}

/// Per-call runtime policy overrides.
#[derive(clap::Args)]
struct LimitArgs {
    /// Wall-clock limit in milliseconds
    #[arg(long)]
    timeout_ms: Option<u64>,

    /// Maximum serialized input size in bytes
    #[arg(long)]
    max_input_bytes: Option<usize>,

    /// Maximum serialized output size in bytes
    #[arg(long)]
    max_output_bytes: Option<usize>,
}

impl From<LimitArgs> for PartialRuntimePolicy {
    fn from(args: LimitArgs) -> Self {
        Self {
            timeout_ms: args.timeout_ms,
            max_input_bytes: args.max_input_bytes,
            max_output_bytes: args.max_output_bytes,
            max_concurrent_invocations_per_plugin: None,
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let filter = if cli.verbose { EnvFilter::new("debug") } else { EnvFilter::new("warn") };
    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false).with_writer(io::stderr))
        .with(filter)
        .init();

    // A missing .env file is fine; roots may come from the real environment.
    if let Err(e) = dotenvy::dotenv() {
        if !e.not_found() {
            tracing::warn!(error = %e, "Failed to load .env file");
        }
    }

    let config = match &cli.config {
        Some(path) => Config::load_from_file(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => Config::load()?,
    };
    let engine = PluginEngine::new(config);
    let cwd = std::env::current_dir()?;

    match cli.command {
        Commands::Roots => cmd_roots(&engine, &cwd, cli.json)?,
        Commands::Resolve { namespace, path } => {
            cmd_resolve(&engine, &cwd, &namespace, path.as_deref(), cli.json)?;
        }
        Commands::Discover { namespace, path } => {
            cmd_discover(&engine, &cwd, &namespace, path.as_deref(), cli.json)?;
        }
        Commands::Gate { granted, required } => cmd_gate(&granted, &required, cli.json)?,
        Commands::Run { namespace, action, input, path, limits } => {
            let input: Value = serde_json::from_str(&input).context("--input is not valid JSON")?;
            let target = Target { namespace: &namespace, path: path.as_deref() };
            cmd_run(&engine, &cwd, target, &action, input, limits.into(), cli.json)?;
        }
        Commands::Render { namespace, panel, props, path, limits } => {
            let props: Value = serde_json::from_str(&props).context("--props is not valid JSON")?;
            let target = Target { namespace: &namespace, path: path.as_deref() };
            cmd_render(&engine, &cwd, target, &panel, props, limits.into(), cli.json)?;
        }
        Commands::Completions { shell } => cmd_completions(shell),
    }

    Ok(())
}

/// Which plugin a command addresses.
#[derive(Clone, Copy)]
struct Target<'a> {
    namespace: &'a str,
    path: Option<&'a Path>,
}

/// Print the trusted roots.
fn cmd_roots(engine: &PluginEngine, cwd: &Path, json: bool) -> Result<()> {
    let roots = engine.trusted_roots(cwd);

    if let Some(source) = &engine.config().source {
        eprintln!("config: {}", source.display());
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&roots)?);
    } else if roots.is_empty() {
        println!("No trusted plugin roots configured.");
        println!(
            "Add [roots] to {} or set {}.",
            notes_plugin_engine::config::LOCAL_CONFIG_FILE,
            engine.config().roots.env_var
        );
    } else {
        for root in roots {
            println!("{}", root.display());
        }
    }

    Ok(())
}

/// Print a plugin's verified root.
fn cmd_resolve(
    engine: &PluginEngine,
    cwd: &Path,
    namespace: &str,
    path: Option<&Path>,
    json: bool,
) -> Result<()> {
    let roots = engine.trusted_roots(cwd);
    let root = resolve_plugin_root(namespace, &roots, path, cwd)?;

    if json {
        println!("{}", serde_json::json!({ "namespace": namespace, "root": root }));
    } else {
        println!("{}", root.display());
    }

    Ok(())
}

/// Print a plugin's entrypoints and discovery warnings.
fn cmd_discover(
    engine: &PluginEngine,
    cwd: &Path,
    namespace: &str,
    path: Option<&Path>,
    json: bool,
) -> Result<()> {
    let manifest = read_manifest(engine, cwd, Target { namespace, path })?;
    let prepared = engine.prepare(&manifest, path, cwd)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&prepared)?);
        return Ok(());
    }

    println!("root: {}", prepared.root.display());
    for (label, entry) in
        [("cli", &prepared.assets.cli_entrypoint), ("ui", &prepared.assets.ui_entrypoint)]
    {
        match entry {
            Some(entry) => println!(
                "{label}: {} ({:?})",
                entry.relative_path, entry.discovered_from
            ),
            None => println!("{label}: -"),
        }
    }
    for warning in &prepared.assets.warnings {
        println!("warning: {warning}");
    }

    Ok(())
}

/// Print the outcome of a permission check.
fn cmd_gate(granted: &[String], required: &[String], json: bool) -> Result<()> {
    let result = evaluate_plugin_permission_gate(granted, required);

    if json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else if result.allowed {
        println!("allowed");
    } else {
        println!("denied: missing {}", result.missing_permissions.join(", "));
    }

    if !result.allowed {
        std::process::exit(1);
    }
    Ok(())
}

/// Run an action and print its result.
fn cmd_run(
    engine: &PluginEngine,
    cwd: &Path,
    target: Target<'_>,
    action_id: &str,
    input: Value,
    policy: PartialRuntimePolicy,
    json: bool,
) -> Result<()> {
    let manifest = read_manifest(engine, cwd, target)?;
    let state = engine.config().plugins.state_of(&manifest.namespace);

    let rt = tokio::runtime::Runtime::new()?;
    let outcome = rt.block_on(engine.run_action(
        ActionRequest {
            manifest: &manifest,
            state,
            action_id,
            input,
            plugin_path: target.path,
            policy,
        },
        cwd,
    ));

    print_outcome(outcome, json)
}

/// Render a panel and print the payload.
fn cmd_render(
    engine: &PluginEngine,
    cwd: &Path,
    target: Target<'_>,
    panel_id: &str,
    props: Value,
    policy: PartialRuntimePolicy,
    json: bool,
) -> Result<()> {
    let manifest = read_manifest(engine, cwd, target)?;
    let state = engine.config().plugins.state_of(&manifest.namespace);

    let rt = tokio::runtime::Runtime::new()?;
    let outcome = rt.block_on(engine.render_panel(
        PanelRequest {
            manifest: &manifest,
            state,
            panel_id,
            props,
            plugin_path: target.path,
            policy,
        },
        cwd,
    ));

    print_outcome(outcome, json)
}

fn print_outcome(
    outcome: Result<notes_plugin_engine::plugin::GuardedOutcome<Value>, PluginError>,
    json: bool,
) -> Result<()> {
    match outcome {
        Ok(outcome) => {
            if json {
                println!("{}", serde_json::to_string_pretty(&outcome)?);
            } else {
                println!("{}", serde_json::to_string_pretty(&outcome.result)?);
                eprintln!(
                    "({}ms, {} bytes in, {} bytes out)",
                    outcome.duration_ms, outcome.input_bytes, outcome.output_bytes
                );
            }
            Ok(())
        }
        Err(err) => {
            let mapped = map_plugin_action_error(&err, None);
            if json {
                println!("{}", serde_json::to_string_pretty(&mapped)?);
            } else {
                eprintln!("error[{}]: {}", mapped.code, mapped.message);
            }
            std::process::exit(1);
        }
    }
}

/// Read and validate `plugin.json` from the plugin's verified root.
fn read_manifest(engine: &PluginEngine, cwd: &Path, target: Target<'_>) -> Result<PluginManifest> {
    let roots = engine.trusted_roots(cwd);
    let root = resolve_plugin_root(target.namespace, &roots, target.path, cwd)?;
    let manifest_path = root.join(MANIFEST_FILE);

    let manifest = PluginManifest::from_file(&manifest_path)
        .with_context(|| format!("Failed to read {}", manifest_path.display()))?;
    manifest.validate()?;

    if manifest.namespace != target.namespace {
        anyhow::bail!(
            "Manifest at {} declares namespace '{}', expected '{}'",
            manifest_path.display(),
            manifest.namespace,
            target.namespace
        );
    }

    Ok(manifest)
}

/// Generate shell completions.
fn cmd_completions(shell: Shell) {
    let mut cmd = Cli::command();
    generate(shell, &mut cmd, "notes-plugins", &mut io::stdout());
}
