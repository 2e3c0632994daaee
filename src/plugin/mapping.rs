//! Host-facing error codes for plugin action failures.

use serde::{Deserialize, Serialize};

use super::guard::GuardErrorKind;
use super::PluginError;

/// Message used when a failure carries no usable message of its own.
pub const DEFAULT_FALLBACK_MESSAGE: &str = "Plugin action failed";

/// Stable error code for guard timeouts.
pub const CODE_TIMEOUT: &str = "plugin_action_timeout";
/// Stable error code for oversized input.
pub const CODE_INPUT_TOO_LARGE: &str = "plugin_input_too_large";
/// Stable error code for oversized output.
pub const CODE_OUTPUT_TOO_LARGE: &str = "plugin_output_too_large";
/// Stable error code for concurrency saturation.
pub const CODE_CONCURRENCY_LIMITED: &str = "plugin_concurrency_limited";
/// Stable error code for everything else.
pub const CODE_RUN_FAILED: &str = "plugin_run_failed";

/// Error shape handed to HTTP handlers and CLI commands.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionErrorResponse {
    pub code: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub guard_code: Option<GuardErrorKind>,
}

impl GuardErrorKind {
    /// Host-facing code for this guard failure.
    pub fn host_code(self) -> &'static str {
        match self {
            Self::Timeout => CODE_TIMEOUT,
            Self::PayloadTooLarge => CODE_INPUT_TOO_LARGE,
            Self::OutputTooLarge => CODE_OUTPUT_TOO_LARGE,
            Self::ConcurrencyLimit => CODE_CONCURRENCY_LIMITED,
        }
    }
}

/// Map any plugin failure to exactly one host error.
///
/// Only the error's display message is used, never its debug form or source
/// chain.
pub fn map_plugin_action_error(
    error: &PluginError,
    fallback_message: Option<&str>,
) -> ActionErrorResponse {
    let fallback = fallback_message.unwrap_or(DEFAULT_FALLBACK_MESSAGE);

    if let Some(guard) = error.as_guard() {
        return ActionErrorResponse {
            code: guard.kind.host_code().to_string(),
            message: non_empty_or(&guard.message, fallback),
            guard_code: Some(guard.kind),
        };
    }

    let message = match error {
        // Panics always surface as the fallback message.
        PluginError::ActionPanicked => fallback.to_string(),
        other => non_empty_or(&other.to_string(), fallback),
    };

    ActionErrorResponse { code: CODE_RUN_FAILED.to_string(), message, guard_code: None }
}

fn non_empty_or(message: &str, fallback: &str) -> String {
    let trimmed = message.trim();
    if trimmed.is_empty() {
        fallback.to_string()
    } else {
        trimmed.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugin::GuardError;

    fn guard(kind: GuardErrorKind) -> PluginError {
        PluginError::Guard(GuardError {
            kind,
            namespace: "digest".to_string(),
            action_id: "ping".to_string(),
            message: format!("guard tripped: {kind}"),
        })
    }

    #[test]
    fn test_guard_kinds_map_to_stable_codes() {
        let cases = [
            (GuardErrorKind::Timeout, "plugin_action_timeout"),
            (GuardErrorKind::PayloadTooLarge, "plugin_input_too_large"),
            (GuardErrorKind::OutputTooLarge, "plugin_output_too_large"),
            (GuardErrorKind::ConcurrencyLimit, "plugin_concurrency_limited"),
        ];

        for (kind, code) in cases {
            let mapped = map_plugin_action_error(&guard(kind), None);
            assert_eq!(mapped.code, code);
            assert_eq!(mapped.guard_code, Some(kind));
            assert!(mapped.message.contains(kind.as_str()));
        }
    }

    #[test]
    fn test_generic_error_passes_message_through() {
        let err = PluginError::ExecutionError("note 42 is locked".to_string());
        let mapped = map_plugin_action_error(&err, None);
        assert_eq!(mapped.code, "plugin_run_failed");
        assert_eq!(mapped.message, "note 42 is locked");
        assert_eq!(mapped.guard_code, None);
    }

    #[test]
    fn test_messageless_errors_use_fallback() {
        let mapped = map_plugin_action_error(&PluginError::ActionPanicked, None);
        assert_eq!(mapped.code, "plugin_run_failed");
        assert_eq!(mapped.message, DEFAULT_FALLBACK_MESSAGE);

        let mapped =
            map_plugin_action_error(&PluginError::ExecutionError("  ".to_string()), Some("Sync failed"));
        assert_eq!(mapped.message, "Sync failed");
    }

    #[test]
    fn test_trust_violation_maps_to_run_failed() {
        let err = PluginError::RootNotFound("digest".to_string());
        let mapped = map_plugin_action_error(&err, None);
        assert_eq!(mapped.code, CODE_RUN_FAILED);
        assert!(mapped.message.contains("digest"));
    }

    #[test]
    fn test_response_serialization() {
        let json = serde_json::to_value(map_plugin_action_error(&guard(GuardErrorKind::Timeout), None))
            .unwrap();
        assert_eq!(json["code"], "plugin_action_timeout");
        assert_eq!(json["guardCode"], "timeout");

        let json = serde_json::to_value(map_plugin_action_error(&PluginError::ActionPanicked, None))
            .unwrap();
        assert!(json.get("guardCode").is_none());
    }
}
