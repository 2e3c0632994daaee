//! CLI Integration Tests
//!
//! Tests the command-line interface end-to-end.

use assert_cmd::Command;
use assert_fs::prelude::*;
use predicates::prelude::*;

/// Get the binary to test, isolated from the caller's environment.
fn notes_plugins(dir: &assert_fs::TempDir) -> Command {
    let mut cmd = Command::cargo_bin("notes-plugins").unwrap();
    cmd.current_dir(dir.path())
        .env_remove("NOTES_PLUGIN_ROOTS")
        .env_remove("NOTES_PLUGINS_CONFIG")
        .env_remove("RUST_LOG");
    cmd
}

// ============================================================================
// Help & Version Tests
// ============================================================================

#[test]
fn test_help_flag() {
    let temp = assert_fs::TempDir::new().unwrap();
    notes_plugins(&temp)
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("Inspect and run note store plugins"));
}

#[test]
fn test_version_flag() {
    let temp = assert_fs::TempDir::new().unwrap();
    notes_plugins(&temp)
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains(env!("CARGO_PKG_VERSION")));
}

#[test]
fn test_run_command_help() {
    let temp = assert_fs::TempDir::new().unwrap();
    notes_plugins(&temp)
        .args(["run", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("--timeout-ms"))
        .stdout(predicate::str::contains("--max-input-bytes"));
}

#[test]
fn test_invalid_subcommand() {
    let temp = assert_fs::TempDir::new().unwrap();
    notes_plugins(&temp).arg("frobnicate").assert().failure();
}

// ============================================================================
// Gate Command Tests
// ============================================================================

#[test]
fn test_gate_allowed() {
    let temp = assert_fs::TempDir::new().unwrap();
    notes_plugins(&temp)
        .args(["gate", "--granted", "notes:read,notes:write", "--required", "notes:read"])
        .assert()
        .success()
        .stdout(predicate::str::contains("allowed"));
}

#[test]
fn test_gate_denied_lists_missing() {
    let temp = assert_fs::TempDir::new().unwrap();
    notes_plugins(&temp)
        .args(["gate", "--granted", "notes:read", "--required", "net:fetch,notes:read,fs:write"])
        .assert()
        .code(1)
        .stdout(predicate::str::contains("denied: missing fs:write, net:fetch"));
}

#[test]
fn test_gate_json_output() {
    let temp = assert_fs::TempDir::new().unwrap();
    notes_plugins(&temp)
        .args(["--json", "gate", "--required", "notes:read"])
        .assert()
        .code(1)
        .stdout(predicate::str::contains("\"missingPermissions\""));
}

// ============================================================================
// Roots Command Tests
// ============================================================================

#[test]
fn test_roots_empty() {
    let temp = assert_fs::TempDir::new().unwrap();
    notes_plugins(&temp)
        .env("XDG_CONFIG_HOME", temp.path())
        .arg("roots")
        .assert()
        .success()
        .stdout(predicate::str::contains("No trusted plugin roots configured"));
}

#[test]
fn test_roots_from_env_are_deduplicated() {
    let temp = assert_fs::TempDir::new().unwrap();
    let cwd = temp.path().canonicalize().unwrap();

    let output = notes_plugins(&temp)
        .env("NOTES_PLUGIN_ROOTS", "b,./a,a/,b/../a")
        .arg("roots")
        .output()
        .unwrap();

    assert!(output.status.success());
    let stdout = String::from_utf8(output.stdout).unwrap();
    let lines: Vec<&str> = stdout.lines().collect();
    assert_eq!(
        lines,
        vec![cwd.join("a").display().to_string(), cwd.join("b").display().to_string()]
    );
}

#[test]
fn test_roots_from_local_config() {
    let temp = assert_fs::TempDir::new().unwrap();
    temp.child(".notes-plugins.toml")
        .write_str("[roots]\nbundled = [\"./bundled\"]\n")
        .unwrap();

    notes_plugins(&temp)
        .arg("roots")
        .assert()
        .success()
        .stdout(predicate::str::contains("bundled"))
        .stderr(predicate::str::contains("config: .notes-plugins.toml"));
}

#[test]
fn test_missing_config_file_fails() {
    let temp = assert_fs::TempDir::new().unwrap();
    notes_plugins(&temp)
        .args(["--config", "does-not-exist.toml", "roots"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Failed to load config"));
}

// ============================================================================
// Plugin Command Tests
// ============================================================================

#[cfg(unix)]
mod plugins {
    use super::*;

    const SCRIPT: &str = r#"
case "$1" in
  describe) echo '{"cli": {"actions": ["ping", "slow", "fail"]}, "ui": {"panels": ["summary"]}}' ;;
  run)
    case "$2" in
      ping) echo '{"pong": true}' ;;
      slow) sleep 1; echo null ;;
      fail) echo "digest store unavailable" >&2; exit 3 ;;
    esac ;;
  render) echo '{"title": "Summary"}' ;;
esac
"#;

    const MANIFEST: &str = r#"{
  "namespace": "digest",
  "capabilities": ["cli_actions", "ui_panels"],
  "permissions": ["notes:read"],
  "cli": {
    "actions": [
      { "id": "ping", "requiredPermissions": ["notes:read"] },
      { "id": "slow" },
      { "id": "fail" },
      { "id": "publish", "requiredPermissions": ["net:publish"] }
    ]
  },
  "ui": { "entrypoint": "dist/cli.js", "panels": [{ "id": "summary" }] }
}"#;

    fn workspace() -> assert_fs::TempDir {
        let temp = assert_fs::TempDir::new().unwrap();
        temp.child(".notes-plugins.toml")
            .write_str("[roots]\nbundled = [\"./plugins\"]\n\n[runtime.interpreters]\njs = [\"sh\"]\n")
            .unwrap();
        temp.child("plugins/digest/plugin.json").write_str(MANIFEST).unwrap();
        temp.child("plugins/digest/dist/cli.js").write_str(SCRIPT).unwrap();
        temp
    }

    #[test]
    fn test_resolve_by_namespace() {
        let temp = workspace();
        notes_plugins(&temp)
            .args(["resolve", "digest"])
            .assert()
            .success()
            .stdout(predicate::str::ends_with("plugins/digest\n"));
    }

    #[test]
    fn test_resolve_unknown_namespace_fails() {
        let temp = workspace();
        notes_plugins(&temp)
            .args(["resolve", "missing"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("missing"));
    }

    #[test]
    fn test_resolve_untrusted_path_fails() {
        let temp = workspace();
        temp.child("elsewhere/digest").create_dir_all().unwrap();
        notes_plugins(&temp)
            .args(["resolve", "digest", "--path", "elsewhere/digest"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("outside configured trusted roots"));
    }

    #[test]
    fn test_discover_reports_entrypoints() {
        let temp = workspace();
        notes_plugins(&temp)
            .args(["discover", "digest"])
            .assert()
            .success()
            .stdout(predicate::str::contains("cli: dist/cli.js (Convention)"))
            .stdout(predicate::str::contains("ui: dist/cli.js (Manifest)"));
    }

    #[test]
    fn test_run_action() {
        let temp = workspace();
        notes_plugins(&temp)
            .args(["run", "digest", "ping", "--input", r#"{"noteId": "n-1"}"#])
            .assert()
            .success()
            .stdout(predicate::str::contains("\"pong\": true"));
    }

    #[test]
    fn test_run_action_json_outcome() {
        let temp = workspace();
        notes_plugins(&temp)
            .args(["--json", "run", "digest", "ping"])
            .assert()
            .success()
            .stdout(predicate::str::contains("\"durationMs\""))
            .stdout(predicate::str::contains("\"outputBytes\""));
    }

    #[test]
    fn test_run_failure_is_mapped() {
        let temp = workspace();
        notes_plugins(&temp)
            .args(["run", "digest", "fail"])
            .assert()
            .code(1)
            .stderr(predicate::str::contains("error[plugin_run_failed]: digest store unavailable"));
    }

    #[test]
    fn test_run_timeout_is_mapped() {
        let temp = workspace();
        notes_plugins(&temp)
            .args(["run", "digest", "slow", "--timeout-ms", "50"])
            .assert()
            .code(1)
            .stderr(predicate::str::contains("error[plugin_action_timeout]"));
    }

    #[test]
    fn test_run_oversized_input_is_mapped() {
        let temp = workspace();
        notes_plugins(&temp)
            .args(["run", "digest", "ping", "--input", r#""0123456789""#, "--max-input-bytes", "4"])
            .assert()
            .code(1)
            .stderr(predicate::str::contains("error[plugin_input_too_large]"));
    }

    #[test]
    fn test_run_invalid_input_json() {
        let temp = workspace();
        notes_plugins(&temp)
            .args(["run", "digest", "ping", "--input", "{not json"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("--input is not valid JSON"));
    }

    #[test]
    fn test_run_disabled_plugin() {
        let temp = workspace();
        temp.child(".notes-plugins.toml")
            .write_str(
                "[roots]\nbundled = [\"./plugins\"]\n\n[runtime.interpreters]\njs = [\"sh\"]\n\n[plugins]\ndisabled = [\"digest\"]\n",
            )
            .unwrap();

        notes_plugins(&temp)
            .args(["run", "digest", "ping"])
            .assert()
            .code(1)
            .stderr(predicate::str::contains("error[plugin_run_failed]"));
    }

    #[test]
    fn test_render_panel() {
        let temp = workspace();
        notes_plugins(&temp)
            .args(["render", "digest", "summary"])
            .assert()
            .success()
            .stdout(predicate::str::contains("\"title\": \"Summary\""));
    }
}

// ============================================================================
// Completions Tests
// ============================================================================

#[test]
fn test_completions_bash() {
    let temp = assert_fs::TempDir::new().unwrap();
    notes_plugins(&temp)
        .args(["completions", "bash"])
        .assert()
        .success()
        .stdout(predicate::str::contains("notes-plugins"));
}
