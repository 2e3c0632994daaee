//! Permission gate.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

/// Outcome of a permission check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PermissionGateResult {
    /// Whether every required permission is granted.
    pub allowed: bool,
    /// Required permissions that are not granted, sorted and distinct.
    pub missing_permissions: Vec<String>,
}

/// Check that `required` is a subset of `granted`.
///
/// Order and duplicates are irrelevant on both sides.
pub fn evaluate_plugin_permission_gate<G, R>(granted: G, required: R) -> PermissionGateResult
where
    G: IntoIterator,
    G::Item: AsRef<str>,
    R: IntoIterator,
    R::Item: AsRef<str>,
{
    let granted: BTreeSet<String> = granted.into_iter().map(|p| p.as_ref().to_string()).collect();

    let missing_permissions: Vec<String> = required
        .into_iter()
        .map(|p| p.as_ref().to_string())
        .filter(|p| !granted.contains(p))
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();

    PermissionGateResult { allowed: missing_permissions.is_empty(), missing_permissions }
}
