//! Guarded execution of plugin actions.
//!
//! Every invocation passes through the same governors, in order:
//!
//! 1. the serialized input must fit `max_input_bytes`;
//! 2. the namespace must have a free concurrency slot;
//! 3. the action races a `timeout_ms` timer;
//! 4. the serialized result must fit `max_output_bytes`.
//!
//! The concurrency slot is an RAII guard, so it is released exactly once on
//! every exit path, including action errors, panics and timeouts.
//!
//! A timeout abandons the wait, not the work: the action runs on a detached
//! task and keeps running after the caller has been told it timed out. Actions
//! with side effects may therefore complete after a `timeout` error. Do not wire
//! cancellation into this race without changing that contract for every caller.

use std::collections::HashMap;
use std::future::Future;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::{PluginError, PluginResult};

/// Default wall-clock limit per invocation.
pub const DEFAULT_TIMEOUT_MS: u64 = 15_000;

/// Default ceiling for the serialized input.
pub const DEFAULT_MAX_INPUT_BYTES: usize = 64 * 1024;

/// Default ceiling for the serialized result.
pub const DEFAULT_MAX_OUTPUT_BYTES: usize = 256 * 1024;

/// Default number of in-flight invocations per namespace.
pub const DEFAULT_MAX_CONCURRENT_INVOCATIONS: usize = 1;

/// Resource limits applied to one invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginRuntimePolicy {
    /// Wall-clock limit in milliseconds.
    pub timeout_ms: u64,
    /// Maximum serialized input size.
    pub max_input_bytes: usize,
    /// Maximum serialized output size.
    pub max_output_bytes: usize,
    /// Maximum concurrent invocations for one namespace.
    pub max_concurrent_invocations_per_plugin: usize,
}

impl Default for PluginRuntimePolicy {
    fn default() -> Self {
        Self {
            timeout_ms: DEFAULT_TIMEOUT_MS,
            max_input_bytes: DEFAULT_MAX_INPUT_BYTES,
            max_output_bytes: DEFAULT_MAX_OUTPUT_BYTES,
            max_concurrent_invocations_per_plugin: DEFAULT_MAX_CONCURRENT_INVOCATIONS,
        }
    }
}

/// A policy where any field may be left out.
///
/// Missing or zero fields fall back to the defaults one by one.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PartialRuntimePolicy {
    pub timeout_ms: Option<u64>,
    pub max_input_bytes: Option<usize>,
    pub max_output_bytes: Option<usize>,
    pub max_concurrent_invocations_per_plugin: Option<usize>,
}

impl PartialRuntimePolicy {
    /// Fill the gaps in `self` from `fallback`.
    pub fn or(self, fallback: Self) -> Self {
        Self {
            timeout_ms: positive(self.timeout_ms).or(fallback.timeout_ms),
            max_input_bytes: positive(self.max_input_bytes).or(fallback.max_input_bytes),
            max_output_bytes: positive(self.max_output_bytes).or(fallback.max_output_bytes),
            max_concurrent_invocations_per_plugin: positive(
                self.max_concurrent_invocations_per_plugin,
            )
            .or(fallback.max_concurrent_invocations_per_plugin),
        }
    }

    /// Resolve into a complete policy.
    pub fn resolve(self) -> PluginRuntimePolicy {
        let defaults = PluginRuntimePolicy::default();
        PluginRuntimePolicy {
            timeout_ms: positive(self.timeout_ms).unwrap_or(defaults.timeout_ms),
            max_input_bytes: positive(self.max_input_bytes).unwrap_or(defaults.max_input_bytes),
            max_output_bytes: positive(self.max_output_bytes).unwrap_or(defaults.max_output_bytes),
            max_concurrent_invocations_per_plugin: positive(
                self.max_concurrent_invocations_per_plugin,
            )
            .unwrap_or(defaults.max_concurrent_invocations_per_plugin),
        }
    }
}

fn positive<N: PartialEq + Default>(value: Option<N>) -> Option<N> {
    value.filter(|v| *v != N::default())
}

/// Kind of guard failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GuardErrorKind {
    /// The action did not settle within `timeout_ms`.
    Timeout,
    /// The input exceeded `max_input_bytes`.
    PayloadTooLarge,
    /// The result exceeded `max_output_bytes`.
    OutputTooLarge,
    /// The namespace had no free concurrency slot.
    ConcurrencyLimit,
}

impl GuardErrorKind {
    /// Stable wire name.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Timeout => "timeout",
            Self::PayloadTooLarge => "payload_too_large",
            Self::OutputTooLarge => "output_too_large",
            Self::ConcurrencyLimit => "concurrency_limit",
        }
    }
}

impl std::fmt::Display for GuardErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A typed failure raised by the resource governors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct GuardError {
    pub kind: GuardErrorKind,
    pub namespace: String,
    pub action_id: String,
    pub message: String,
}

impl GuardError {
    fn new(kind: GuardErrorKind, namespace: &str, action_id: &str, message: String) -> Self {
        Self { kind, namespace: namespace.to_string(), action_id: action_id.to_string(), message }
    }
}

/// Per-namespace count of in-flight invocations.
///
/// Owned by whoever runs invocations and shared by reference, so independent
/// engines (and tests) never see each other's counts.
#[derive(Debug, Default)]
pub struct InvocationTracker {
    active: Mutex<HashMap<String, usize>>,
}

impl InvocationTracker {
    /// Create an empty tracker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of in-flight invocations for a namespace.
    pub fn active(&self, namespace: &str) -> usize {
        self.active.lock().get(namespace).copied().unwrap_or(0)
    }

    /// Claim a slot if the namespace is below `limit`.
    ///
    /// The read-increment-compare happens under one lock, and a rejected claim
    /// never touches the count.
    pub fn try_acquire(&self, namespace: &str, limit: usize) -> Option<InvocationSlot<'_>> {
        let mut active = self.active.lock();
        let count = active.entry(namespace.to_string()).or_insert(0);

        if *count + 1 > limit {
            if *count == 0 {
                active.remove(namespace);
            }
            return None;
        }

        *count += 1;
        Some(InvocationSlot { tracker: self, namespace: namespace.to_string() })
    }

    fn release(&self, namespace: &str) {
        let mut active = self.active.lock();
        if let Some(count) = active.get_mut(namespace) {
            *count = count.saturating_sub(1);
            if *count == 0 {
                active.remove(namespace);
            }
        }
    }
}

/// One held concurrency slot, released on drop.
#[derive(Debug)]
pub struct InvocationSlot<'a> {
    tracker: &'a InvocationTracker,
    namespace: String,
}

impl Drop for InvocationSlot<'_> {
    fn drop(&mut self) {
        self.tracker.release(&self.namespace);
    }
}

/// Identity and input of one guarded invocation.
#[derive(Debug)]
pub struct GuardedInvocation<'a, I: ?Sized> {
    pub namespace: &'a str,
    pub action_id: &'a str,
    pub input: &'a I,
    pub policy: PluginRuntimePolicy,
}

/// Successful guarded invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GuardedOutcome<T> {
    pub result: T,
    pub duration_ms: u64,
    pub input_bytes: usize,
    pub output_bytes: usize,
}

/// Run `invoke` under the payload, concurrency and timeout governors.
pub async fn run_plugin_action_with_guards<I, T, F, Fut>(
    tracker: &InvocationTracker,
    invocation: GuardedInvocation<'_, I>,
    invoke: F,
) -> PluginResult<GuardedOutcome<T>>
where
    I: Serialize + ?Sized,
    T: Serialize + Send + 'static,
    F: FnOnce() -> Fut,
    Fut: Future<Output = PluginResult<T>> + Send + 'static,
{
    let GuardedInvocation { namespace, action_id, input, policy } = invocation;

    let input_bytes = serialized_len(input)?;
    if input_bytes > policy.max_input_bytes {
        return Err(GuardError::new(
            GuardErrorKind::PayloadTooLarge,
            namespace,
            action_id,
            format!(
                "Plugin action '{namespace}:{action_id}' input is {input_bytes} bytes, exceeding the {} byte limit",
                policy.max_input_bytes
            ),
        )
        .into());
    }

    let _slot = tracker
        .try_acquire(namespace, policy.max_concurrent_invocations_per_plugin)
        .ok_or_else(|| {
            GuardError::new(
                GuardErrorKind::ConcurrencyLimit,
                namespace,
                action_id,
                format!(
                    "Plugin '{namespace}' already has {} concurrent invocation(s) in flight",
                    policy.max_concurrent_invocations_per_plugin
                ),
            )
        })?;

    let started = Instant::now();
    let task = tokio::spawn(invoke());

    let result = match tokio::time::timeout(Duration::from_millis(policy.timeout_ms), task).await {
        Err(_) => {
            tracing::warn!(
                namespace,
                action_id,
                timeout_ms = policy.timeout_ms,
                "Plugin action timed out; leaving it to finish in the background"
            );
            return Err(GuardError::new(
                GuardErrorKind::Timeout,
                namespace,
                action_id,
                format!(
                    "Plugin action '{namespace}:{action_id}' timed out after {}ms",
                    policy.timeout_ms
                ),
            )
            .into());
        }
        Ok(Err(join_error)) => {
            tracing::debug!(namespace, action_id, error = %join_error, "Plugin action task failed");
            return Err(PluginError::ActionPanicked);
        }
        Ok(Ok(Err(PluginError::OutputLimitExceeded(bound)))) => {
            return Err(GuardError::new(
                GuardErrorKind::OutputTooLarge,
                namespace,
                action_id,
                format!(
                    "Plugin action '{namespace}:{action_id}' output passed {bound} bytes, exceeding the {} byte limit",
                    policy.max_output_bytes
                ),
            )
            .into());
        }
        Ok(Ok(result)) => result?,
    };

    let duration = started.elapsed();
    let output_bytes = serialized_len(&result)?;
    if output_bytes > policy.max_output_bytes {
        return Err(GuardError::new(
            GuardErrorKind::OutputTooLarge,
            namespace,
            action_id,
            format!(
                "Plugin action '{namespace}:{action_id}' output is {output_bytes} bytes, exceeding the {} byte limit",
                policy.max_output_bytes
            ),
        )
        .into());
    }

    tracing::debug!(
        namespace,
        action_id,
        duration_ms = duration.as_millis() as u64,
        input_bytes,
        output_bytes,
        "Plugin action completed"
    );

    Ok(GuardedOutcome { result, duration_ms: duration.as_millis() as u64, input_bytes, output_bytes })
}

fn serialized_len<V: Serialize + ?Sized>(value: &V) -> PluginResult<usize> {
    serde_json::to_vec(value)
        .map(|bytes| bytes.len())
        .map_err(|e| PluginError::ExecutionError(format!("Failed to serialize plugin payload: {e}")))
}
