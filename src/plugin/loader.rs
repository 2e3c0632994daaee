//! Plugin module loading.
//!
//! A verified entrypoint is loaded through a small subprocess ABI. The
//! entrypoint is launched through an interpreter picked by its file extension
//! and answers three verbs:
//!
//! - `describe`: print `{"cli": {"actions": [..]}, "ui": {"panels": [..]}}`
//! - `run <action>`: read the JSON input on stdin, print the JSON result
//! - `render <panel>`: read JSON props on stdin, print the JSON render payload
//!
//! A non-zero exit status is an action failure carrying the trimmed stderr.
//! Output pipes are read up to a bound and drained past it, so a chatty plugin
//! cannot grow the host's memory.
//! Containment is not re-checked here; discovery already admitted the path.

use std::collections::{BTreeMap, BTreeSet};
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use serde::Deserialize;
use serde_json::Value;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;

use super::{PluginError, PluginResult};

/// Default time a module gets to describe itself.
pub const DEFAULT_DESCRIBE_TIMEOUT_MS: u64 = 5_000;

/// Most stdout kept from a `describe` handshake.
pub const MAX_DESCRIBE_BYTES: usize = 1024 * 1024;

/// Most stderr kept for an action failure message.
pub const MAX_STDERR_BYTES: usize = 64 * 1024;

/// Room for whitespace around a result on top of its output limit.
const STDOUT_SLACK_BYTES: usize = 4 * 1024;

/// Interpreter argv keyed by lowercase file extension.
pub type InterpreterMap = BTreeMap<String, Vec<String>>;

/// Interpreters used when the configuration does not override them.
pub fn default_interpreters() -> InterpreterMap {
    let mut map = InterpreterMap::new();
    for ext in ["js", "mjs", "cjs"] {
        map.insert(ext.to_string(), vec!["node".to_string()]);
    }
    map.insert("py".to_string(), vec!["python3".to_string()]);
    map.insert("sh".to_string(), vec!["sh".to_string()]);
    map
}

/// Options for loading a module.
#[derive(Debug, Clone)]
pub struct LoaderOptions {
    /// Interpreters by extension; unknown extensions are executed directly.
    pub interpreters: InterpreterMap,
    /// Upper bound for the `describe` handshake.
    pub describe_timeout: Duration,
}

impl Default for LoaderOptions {
    fn default() -> Self {
        Self {
            interpreters: default_interpreters(),
            describe_timeout: Duration::from_millis(DEFAULT_DESCRIBE_TIMEOUT_MS),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Verb {
    Describe,
    Run,
    Render,
}

impl Verb {
    fn as_str(self) -> &'static str {
        match self {
            Self::Describe => "describe",
            Self::Run => "run",
            Self::Render => "render",
        }
    }
}

/// How to start the entrypoint process.
#[derive(Debug, Clone)]
struct Launcher {
    program: OsString,
    args: Vec<OsString>,
    working_dir: PathBuf,
}

impl Launcher {
    fn for_entrypoint(entrypoint: &Path, interpreters: &InterpreterMap) -> PluginResult<Self> {
        let extension = entrypoint
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.to_ascii_lowercase());

        let working_dir = entrypoint.parent().map(Path::to_path_buf).unwrap_or_default();

        match extension.and_then(|ext| interpreters.get(&ext)) {
            Some(argv) => {
                let (program, rest) = argv.split_first().ok_or_else(|| {
                    PluginError::Config(format!(
                        "Empty interpreter for {}",
                        entrypoint.display()
                    ))
                })?;
                let mut args: Vec<OsString> = rest.iter().map(OsString::from).collect();
                args.push(entrypoint.as_os_str().to_os_string());
                Ok(Self { program: OsString::from(program), args, working_dir })
            }
            None => Ok(Self {
                program: entrypoint.as_os_str().to_os_string(),
                args: Vec::new(),
                working_dir,
            }),
        }
    }

    /// Run one verb and return the trimmed stdout.
    ///
    /// Stdout beyond `stdout_limit` bytes is discarded unread into memory and the
    /// call fails with [`PluginError::OutputLimitExceeded`].
    async fn call(
        &self,
        verb: Verb,
        target: Option<&str>,
        stdin_payload: Vec<u8>,
        stdout_limit: usize,
    ) -> PluginResult<String> {
        let mut command = Command::new(&self.program);
        command
            .args(&self.args)
            .arg(verb.as_str())
            .args(target)
            .current_dir(&self.working_dir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            // Actions outlive an abandoned wait; only the load handshake is reaped.
            .kill_on_drop(verb == Verb::Describe);

        let mut child = command.spawn().map_err(|e| {
            PluginError::ExecutionError(format!(
                "Failed to start {:?} for '{}': {e}",
                self.program,
                verb.as_str()
            ))
        })?;

        let stdin = child.stdin.take();
        let feed = async move {
            if let Some(mut stdin) = stdin {
                // The plugin may exit without reading its input.
                let _ = stdin.write_all(&stdin_payload).await;
                let _ = stdin.shutdown().await;
            }
        };

        let (stdout, stderr) = (child.stdout.take(), child.stderr.take());
        let ((), stdout, stderr) = tokio::join!(
            feed,
            read_bounded(stdout, stdout_limit),
            read_bounded(stderr, MAX_STDERR_BYTES)
        );
        let ((stdout, stdout_overflow), (stderr, _)) = (stdout?, stderr?);
        let status = child.wait().await?;

        if !status.success() {
            let stderr = String::from_utf8_lossy(&stderr).trim().to_string();
            let message = if stderr.is_empty() {
                format!("Plugin process exited with {status}")
            } else {
                stderr
            };
            return Err(PluginError::ExecutionError(message));
        }

        if stdout_overflow {
            tracing::debug!(
                verb = verb.as_str(),
                limit = stdout_limit,
                "Plugin stdout exceeded its bound"
            );
            return Err(PluginError::OutputLimitExceeded(stdout_limit));
        }

        Ok(String::from_utf8_lossy(&stdout).trim().to_string())
    }

    async fn call_json(
        &self,
        verb: Verb,
        target: &str,
        payload: &Value,
        max_output_bytes: usize,
    ) -> PluginResult<Value> {
        let stdin_payload = serde_json::to_vec(payload)
            .map_err(|e| PluginError::ExecutionError(format!("Failed to encode plugin input: {e}")))?;
        let stdout_limit = max_output_bytes.saturating_add(STDOUT_SLACK_BYTES);
        let stdout = self.call(verb, Some(target), stdin_payload, stdout_limit).await?;

        if stdout.is_empty() {
            return Ok(Value::Null);
        }

        serde_json::from_str(&stdout)
            .map_err(|e| PluginError::ExecutionError(format!("Plugin returned invalid JSON: {e}")))
    }
}

/// Read a pipe keeping at most `limit` bytes, then drain the rest.
///
/// Returns the kept bytes and whether anything past `limit` was seen.
async fn read_bounded<R>(pipe: Option<R>, limit: usize) -> std::io::Result<(Vec<u8>, bool)>
where
    R: AsyncRead + Unpin,
{
    let Some(mut pipe) = pipe else {
        return Ok((Vec::new(), false));
    };

    let mut kept = Vec::new();
    (&mut pipe).take((limit as u64).saturating_add(1)).read_to_end(&mut kept).await?;

    let overflow = kept.len() > limit;
    if overflow {
        kept.truncate(limit);
        tokio::io::copy(&mut pipe, &mut tokio::io::sink()).await?;
    }

    Ok((kept, overflow))
}

#[derive(Debug, Deserialize)]
struct ModuleDescription {
    #[serde(default)]
    cli: Option<CliDescription>,
    #[serde(default)]
    ui: Option<UiDescription>,
}

#[derive(Debug, Deserialize)]
struct CliDescription {
    #[serde(default)]
    actions: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
struct UiDescription {
    #[serde(default)]
    panels: Option<Vec<String>>,
}

/// The action surface a module exports.
#[derive(Debug, Clone)]
pub struct CliSurface {
    launcher: Arc<Launcher>,
    actions: BTreeSet<String>,
}

impl CliSurface {
    /// Exported action ids.
    pub fn actions(&self) -> &BTreeSet<String> {
        &self.actions
    }

    /// Whether the module exports `action_id`.
    pub fn has_action(&self, action_id: &str) -> bool {
        self.actions.contains(action_id)
    }

    /// Start an action. The returned future owns everything it needs, so it can
    /// be handed to a detached task.
    ///
    /// `max_output_bytes` bounds how much of the plugin's stdout is held in
    /// memory; the guard still checks the decoded result exactly.
    pub fn invoke(
        &self,
        action_id: &str,
        input: Value,
        max_output_bytes: usize,
    ) -> BoxFuture<'static, PluginResult<Value>> {
        let launcher = Arc::clone(&self.launcher);
        let action_id = action_id.to_string();
        Box::pin(async move {
            launcher.call_json(Verb::Run, &action_id, &input, max_output_bytes).await
        })
    }
}

/// The panel surface a module exports.
#[derive(Debug, Clone)]
pub struct UiSurface {
    launcher: Arc<Launcher>,
    panels: BTreeSet<String>,
}

impl UiSurface {
    /// Exported panel ids.
    pub fn panels(&self) -> &BTreeSet<String> {
        &self.panels
    }

    /// Whether the module exports `panel_id`.
    pub fn has_panel(&self, panel_id: &str) -> bool {
        self.panels.contains(panel_id)
    }

    /// Render a panel with the given props.
    pub fn render(
        &self,
        panel_id: &str,
        props: Value,
        max_output_bytes: usize,
    ) -> BoxFuture<'static, PluginResult<Value>> {
        let launcher = Arc::clone(&self.launcher);
        let panel_id = panel_id.to_string();
        Box::pin(async move {
            launcher.call_json(Verb::Render, &panel_id, &props, max_output_bytes).await
        })
    }
}

/// A loaded plugin module.
#[derive(Debug, Clone)]
pub struct PluginModule {
    entrypoint: PathBuf,
    /// CLI surface, when exported.
    pub cli: Option<CliSurface>,
    /// UI surface, when exported.
    pub ui: Option<UiSurface>,
}

impl PluginModule {
    /// Entrypoint the module was loaded from.
    pub fn entrypoint(&self) -> &Path {
        &self.entrypoint
    }
}

/// Load a verified entrypoint into a module.
///
/// Fails with [`PluginError::EntrypointMissing`] when the file vanished since
/// discovery and with [`PluginError::InvalidModule`] when the module does not
/// describe a usable surface.
pub async fn load_plugin_runtime_module(
    entrypoint: &Path,
    options: &LoaderOptions,
) -> PluginResult<PluginModule> {
    match tokio::fs::metadata(entrypoint).await {
        Ok(meta) if meta.is_file() => {}
        _ => return Err(PluginError::EntrypointMissing(entrypoint.to_path_buf())),
    }

    let launcher = Arc::new(Launcher::for_entrypoint(entrypoint, &options.interpreters)?);
    let invalid = |reason: String| PluginError::InvalidModule {
        path: entrypoint.to_path_buf(),
        reason,
    };

    let stdout = tokio::time::timeout(
        options.describe_timeout,
        launcher.call(Verb::Describe, None, Vec::new(), MAX_DESCRIBE_BYTES),
    )
    .await
    .map_err(|_| {
        invalid(format!(
            "module did not describe itself within {}ms",
            options.describe_timeout.as_millis()
        ))
    })?
    .map_err(|e| invalid(format!("describe failed: {e}")))?;

    let description: ModuleDescription =
        serde_json::from_str(&stdout).map_err(|e| invalid(format!("malformed description: {e}")))?;

    let cli = match description.cli {
        Some(CliDescription { actions: Some(actions) }) => Some(CliSurface {
            launcher: Arc::clone(&launcher),
            actions: actions.into_iter().collect(),
        }),
        Some(CliDescription { actions: None }) => {
            return Err(invalid("cli surface does not list its actions".to_string()));
        }
        None => None,
    };

    let ui = match description.ui {
        Some(UiDescription { panels: Some(panels) }) => Some(UiSurface {
            launcher: Arc::clone(&launcher),
            panels: panels.into_iter().collect(),
        }),
        Some(UiDescription { panels: None }) => {
            return Err(invalid("ui surface does not list its panels".to_string()));
        }
        None => None,
    };

    if cli.is_none() && ui.is_none() {
        return Err(invalid("module exports neither a cli nor a ui surface".to_string()));
    }

    tracing::debug!(
        entrypoint = %entrypoint.display(),
        actions = cli.as_ref().map_or(0, |c| c.actions.len()),
        panels = ui.as_ref().map_or(0, |u| u.panels.len()),
        "Loaded plugin module"
    );

    Ok(PluginModule { entrypoint: entrypoint.to_path_buf(), cli, ui })
}
