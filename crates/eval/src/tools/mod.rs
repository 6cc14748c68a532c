//! Tool dispatch.
//!
//! `execute_tool_call` resolves the tool kind, checks the binding and the
//! capability policy, runs the tool and records exactly one trace entry per
//! call. A placeholder opened by the AI loop for the same call id is
//! finalized in place.

pub mod bindings;
pub mod builtin;
pub mod policy;
pub mod runner;
pub mod schema;

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use namel3ss_ir::ToolKind;

use crate::context::ExecutionContext;
use crate::error::RuntimeError;
use crate::trace::{CallId, ToolOutcome, ToolSource, TraceEvent};
use crate::value::Value;

pub use bindings::{ToolBinding, ToolBindings};
pub use policy::{normalize_capabilities, DecisionStatus, ToolDecision};
pub use runner::{SubprocessRunner, ToolFailure, ToolInvocation, ToolRunner};

const SUMMARY_LIMIT: usize = 200;

/// Result of one dispatched call.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolCallOutcome {
    pub call_id: CallId,
    pub tool_name: String,
    pub kind: String,
    pub decision: ToolDecision,
    pub outcome: ToolOutcome,
    pub result_summary: Option<String>,
    /// Normalized object result, present when `outcome` is `Ok`.
    pub result_value: Option<serde_json::Map<String, serde_json::Value>>,
    pub error: Option<ToolFailure>,
}

impl ToolCallOutcome {
    /// Convert a blocked or failed call into an error.
    pub fn into_result(self) -> Result<Value, RuntimeError> {
        match self.outcome {
            ToolOutcome::Ok => Value::from_json(&serde_json::Value::Object(
                self.result_value.unwrap_or_default(),
            )),
            ToolOutcome::Blocked
                if self.decision.reason.as_deref() == Some(policy::REASON_UNKNOWN_TOOL) =>
            {
                Err(RuntimeError::UnknownTool {
                    tool: self.tool_name,
                })
            }
            ToolOutcome::Blocked => Err(RuntimeError::ToolBlocked {
                tool: self.tool_name,
                capability: self.decision.capability,
                reason: self.decision.reason.unwrap_or_default(),
            }),
            ToolOutcome::Error | ToolOutcome::Pending => {
                let failure = self
                    .error
                    .unwrap_or_else(|| ToolFailure::new("tool_error", "tool did not complete"));
                Err(RuntimeError::ToolFailed {
                    tool: self.tool_name,
                    error_type: failure.error_type,
                    message: failure.message,
                })
            }
        }
    }
}

/// Tool call made directly by a flow expression.
pub fn call_from_flow(
    ctx: &mut ExecutionContext,
    tool: &str,
    args: BTreeMap<String, Value>,
) -> Result<Value, RuntimeError> {
    let payload = args.into_iter().map(|(k, v)| (k, v.to_json())).collect();
    execute_tool_call(ctx, tool, payload, ToolSource::Flow, None).into_result()
}

/// Dispatch one call and record its trace entry. Never fails: blocked and
/// failed calls are reported through the outcome.
pub fn execute_tool_call(
    ctx: &mut ExecutionContext,
    tool: &str,
    payload: serde_json::Map<String, serde_json::Value>,
    source: ToolSource,
    call_id: Option<CallId>,
) -> ToolCallOutcome {
    let call_id = call_id.unwrap_or_else(|| ctx.runtime.next_call_id());
    let started = Instant::now();
    let mut outcome = dispatch(ctx, tool, payload, source, call_id);
    if outcome.outcome == ToolOutcome::Blocked {
        tracing::info!(tool, reason = ?outcome.decision.reason, "tool call blocked");
    } else {
        tracing::debug!(tool, outcome = outcome.outcome.as_str(), "tool call finished");
    }
    outcome.result_summary = summarize(&outcome);
    let event = TraceEvent::ToolCall {
        call_id,
        tool: tool.to_string(),
        kind: outcome.kind.clone(),
        source,
        decision: Some(outcome.decision.clone()),
        outcome: outcome.outcome,
        result_summary: outcome.result_summary.clone(),
        duration_ms: started.elapsed().as_millis() as u64,
    };
    record(ctx, call_id, event);
    outcome
}

fn record(ctx: &mut ExecutionContext, call_id: CallId, event: TraceEvent) {
    if let Some(pending) = ctx.pending_tool_traces.as_mut() {
        if pending.is_open(call_id) {
            pending.finalize(call_id, event);
            return;
        }
    }
    ctx.traces.finalize(call_id, event);
}

fn dispatch(
    ctx: &mut ExecutionContext,
    tool: &str,
    payload: serde_json::Map<String, serde_json::Value>,
    source: ToolSource,
    call_id: CallId,
) -> ToolCallOutcome {
    let decl = ctx.program().tool(tool).cloned();
    let kind = match &decl {
        Some(decl) => decl.kind,
        None if source == ToolSource::Ai && builtin::is_builtin(tool) => ToolKind::Builtin,
        None => {
            return blocked(call_id, tool, "unknown", policy::REASON_UNKNOWN_TOOL, None);
        }
    };
    let kind_name = kind.as_str();
    let capabilities = decl
        .as_ref()
        .map(|d| normalize_capabilities(&d.capabilities))
        .unwrap_or_default();

    let binding = if kind.needs_binding() {
        let root = ctx.config().project_root().to_path_buf();
        let bindings = match ToolBindings::load(&ctx.config().bindings_file()) {
            Ok(bindings) => bindings,
            Err(e) => {
                tracing::warn!(tool, error = %e, "tool bindings could not be loaded");
                return blocked(call_id, tool, kind_name, policy::REASON_BINDING_INVALID, None);
            }
        };
        match bindings.get(tool) {
            Some(binding) if binding.kind != kind => {
                return blocked(call_id, tool, kind_name, policy::REASON_BINDING_INVALID, None);
            }
            Some(binding) if !binding.verify(&root) => {
                return blocked(call_id, tool, kind_name, policy::REASON_BINDING_UNVERIFIED, None);
            }
            Some(binding) => Some(binding.clone()),
            None => {
                return blocked(call_id, tool, kind_name, policy::REASON_MISSING_BINDING, None);
            }
        }
    } else {
        None
    };

    let decision = policy::decide(tool, &capabilities, &ctx.config().tools);
    if !decision.is_allowed() {
        let mut outcome = blocked(call_id, tool, kind_name, "", None);
        outcome.decision = decision;
        return outcome;
    }

    let fail = |failure: ToolFailure| ToolCallOutcome {
        call_id,
        tool_name: tool.to_string(),
        kind: kind_name.to_string(),
        decision: ToolDecision::allowed(),
        outcome: ToolOutcome::Error,
        result_summary: None,
        result_value: None,
        error: Some(failure),
    };

    if let Some(decl) = &decl {
        if let Err(message) = schema::validate_fields("input", &decl.input_fields, &payload) {
            return fail(ToolFailure::new("invalid_input", message));
        }
    }

    let result = match (kind, &binding) {
        (ToolKind::Builtin, _) => match builtin::lookup(tool) {
            Some(run) => run(&payload, ctx.now()),
            None => return blocked(call_id, tool, kind_name, policy::REASON_UNKNOWN_TOOL, None),
        },
        (_, Some(binding)) => {
            let timeout_ms = decl
                .as_ref()
                .and_then(|d| d.timeout_ms)
                .or(binding.timeout_ms)
                .unwrap_or(ctx.config().tools.default_timeout_ms);
            let program = match kind {
                ToolKind::Node => ctx.config().tools.node.clone(),
                _ => ctx.config().tools.python.clone(),
            };
            let invocation = ToolInvocation {
                tool: tool.to_string(),
                kind,
                entry: binding.entry.clone(),
                payload: serde_json::Value::Object(payload),
                timeout: Duration::from_millis(timeout_ms),
                program,
                working_dir: ctx.config().project_root().to_path_buf(),
            };
            ctx.runtime.tool_runner.run(&invocation)
        }
        (_, None) => Err(ToolFailure::new("runtime_error", "no binding resolved")),
    };

    let value = match result {
        Ok(value) => normalize_result(value),
        Err(failure) => return fail(failure),
    };
    if let Err(e) = Value::from_json(&serde_json::Value::Object(value.clone())) {
        return fail(ToolFailure::new("invalid_output", e.to_string()));
    }
    if let Some(decl) = &decl {
        if let Err(message) = schema::validate_fields("output", &decl.output_fields, &value) {
            return fail(ToolFailure::new("invalid_output", message));
        }
    }
    ToolCallOutcome {
        call_id,
        tool_name: tool.to_string(),
        kind: kind_name.to_string(),
        decision: ToolDecision::allowed(),
        outcome: ToolOutcome::Ok,
        result_summary: None,
        result_value: Some(value),
        error: None,
    }
}

fn blocked(
    call_id: CallId,
    tool: &str,
    kind: &str,
    reason: &str,
    capability: Option<&str>,
) -> ToolCallOutcome {
    ToolCallOutcome {
        call_id,
        tool_name: tool.to_string(),
        kind: kind.to_string(),
        decision: ToolDecision::blocked(reason, capability),
        outcome: ToolOutcome::Blocked,
        result_summary: None,
        result_value: None,
        error: None,
    }
}

/// Tool results are always objects; anything else is wrapped as
/// `{"result": value}`.
pub fn normalize_result(value: serde_json::Value) -> serde_json::Map<String, serde_json::Value> {
    match value {
        serde_json::Value::Object(map) => map,
        other => {
            let mut map = serde_json::Map::new();
            map.insert("result".to_string(), other);
            map
        }
    }
}

fn summarize(outcome: &ToolCallOutcome) -> Option<String> {
    let text = match outcome.outcome {
        ToolOutcome::Ok => serde_json::Value::Object(outcome.result_value.clone()?).to_string(),
        ToolOutcome::Blocked => outcome.decision.reason.clone()?,
        ToolOutcome::Error => {
            let failure = outcome.error.as_ref()?;
            format!("{}: {}", failure.error_type, failure.message)
        }
        ToolOutcome::Pending => return None,
    };
    Some(truncate(&text, SUMMARY_LIMIT))
}

fn truncate(text: &str, limit: usize) -> String {
    match text.char_indices().nth(limit) {
        Some((cut, _)) => format!("{}...", &text[..cut]),
        None => text.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn non_objects_are_wrapped() {
        assert_eq!(
            serde_json::Value::Object(normalize_result(json!(3))),
            json!({"result": 3})
        );
        assert_eq!(
            serde_json::Value::Object(normalize_result(json!({"a": 1}))),
            json!({"a": 1})
        );
    }

    #[test]
    fn summaries_are_truncated_on_char_boundaries() {
        let long = "é".repeat(300);
        let cut = truncate(&long, SUMMARY_LIMIT);
        assert_eq!(cut.chars().count(), SUMMARY_LIMIT + 3);
        assert_eq!(truncate("short", SUMMARY_LIMIT), "short");
    }
}
