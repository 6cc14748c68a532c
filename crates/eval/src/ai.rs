//! AI invocation and the provider tool-call loop.
//!
//! A provider answers either with text or with a batch of tool calls. Each
//! requested call gets a placeholder trace in `pending_tool_traces` before
//! dispatch; the dispatcher finalizes it in place. Pending traces are
//! flushed into the main trace list when the loop ends, whether it
//! succeeded or not.

use std::sync::Arc;

use serde::Serialize;

use namel3ss_ir::{AgentEntry, AiProfile, Span};

use crate::context::ExecutionContext;
use crate::error::RuntimeError;
use crate::expr::eval_expr;
use crate::tools::{self, builtin};
use crate::trace::{CallId, ToolOutcome, ToolSource, TraceEvent, TraceLog};
use crate::value::Value;

/// Agents that may run in one `run agents in parallel` block.
pub const MAX_PARALLEL_AGENTS: usize = 3;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AiRequest {
    pub ai: String,
    pub model: String,
    pub system_prompt: Option<String>,
    pub role: Option<String>,
    pub input: serde_json::Value,
    /// Tools exposed to the model.
    pub tools: Vec<String>,
    /// Results of the previous round's tool calls.
    pub tool_results: Vec<AiToolResult>,
    /// Zero-based round number.
    pub round: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AiToolCall {
    pub name: String,
    pub arguments: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AiToolResult {
    pub call_id: CallId,
    pub name: String,
    pub outcome: ToolOutcome,
    pub result: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq)]
pub enum AiResponse {
    Text(String),
    ToolCalls(Vec<AiToolCall>),
}

/// Model backend. The engine ships no provider; embedders supply one.
pub trait AiProvider: Send + Sync {
    fn ask(&self, request: &AiRequest) -> Result<AiResponse, RuntimeError>;
}

#[derive(Default)]
struct LoopStats {
    rounds: u32,
    tool_calls: usize,
}

/// Ask `ai` with `input` and return the model's final text.
pub fn ask_ai(
    ctx: &mut ExecutionContext,
    ai: &str,
    input: Value,
    role: Option<&str>,
    span: Span,
) -> Result<Value, RuntimeError> {
    let profile = ctx
        .program()
        .ai(ai)
        .cloned()
        .ok_or_else(|| RuntimeError::UnknownAi {
            name: ai.to_string(),
        })?;
    let provider = ctx.runtime.ai.clone().ok_or_else(|| {
        RuntimeError::Config(format!("no AI provider configured for \"{}\"", ai))
    })?;

    let outer = ctx.pending_tool_traces.replace(TraceLog::new());
    let mut stats = LoopStats::default();
    let result = tool_loop(ctx, &profile, provider, input, role, span, &mut stats);
    let pending = std::mem::replace(&mut ctx.pending_tool_traces, outer).unwrap_or_default();
    ctx.traces.append(pending);
    ctx.traces.push(TraceEvent::Ai {
        ai: profile.name.clone(),
        model: profile.model.clone(),
        rounds: stats.rounds,
        tool_calls: stats.tool_calls,
    });
    tracing::debug!(
        ai = %profile.name,
        rounds = stats.rounds,
        tool_calls = stats.tool_calls,
        ok = result.is_ok(),
        "ai call finished"
    );
    result
}

fn tool_loop(
    ctx: &mut ExecutionContext,
    profile: &AiProfile,
    provider: Arc<dyn AiProvider>,
    input: Value,
    role: Option<&str>,
    span: Span,
    stats: &mut LoopStats,
) -> Result<Value, RuntimeError> {
    let max_rounds = ctx.config().ai.max_tool_rounds;
    let mut request = AiRequest {
        ai: profile.name.clone(),
        model: profile.model.clone(),
        system_prompt: profile.system_prompt.clone(),
        role: role.map(str::to_string),
        input: input.to_json(),
        tools: profile.tools.clone(),
        tool_results: Vec::new(),
        round: 0,
    };
    loop {
        stats.rounds += 1;
        let calls = match provider.ask(&request)? {
            AiResponse::Text(text) => return Ok(Value::Text(text)),
            AiResponse::ToolCalls(calls) => calls,
        };
        if request.round >= max_rounds {
            return Err(RuntimeError::Limit {
                message: format!(
                    "AI \"{}\" requested tools after {} rounds",
                    profile.name, max_rounds
                ),
                span,
            });
        }
        let mut results = Vec::with_capacity(calls.len());
        for call in calls {
            stats.tool_calls += 1;
            results.push(dispatch_ai_tool(ctx, call));
        }
        request.tool_results = results;
        request.round += 1;
    }
}

fn dispatch_ai_tool(ctx: &mut ExecutionContext, call: AiToolCall) -> AiToolResult {
    let call_id = ctx.runtime.next_call_id();
    let kind = match ctx.program().tool(&call.name) {
        Some(decl) => decl.kind.as_str(),
        None if builtin::is_builtin(&call.name) => "builtin",
        None => "unknown",
    };
    let placeholder = TraceEvent::ToolCall {
        call_id,
        tool: call.name.clone(),
        kind: kind.to_string(),
        source: ToolSource::Ai,
        decision: None,
        outcome: ToolOutcome::Pending,
        result_summary: None,
        duration_ms: 0,
    };
    if let Some(pending) = ctx.pending_tool_traces.as_mut() {
        pending.open(call_id, placeholder);
    }
    let outcome =
        tools::execute_tool_call(ctx, &call.name, call.arguments, ToolSource::Ai, Some(call_id));
    let result = match (&outcome.result_value, &outcome.error) {
        (Some(value), _) => serde_json::Value::Object(value.clone()),
        (None, Some(failure)) => serde_json::json!({
            "error": {"type": failure.error_type, "message": failure.message}
        }),
        (None, None) => serde_json::json!({"blocked": outcome.decision.reason}),
    };
    AiToolResult {
        call_id,
        name: call.name,
        outcome: outcome.outcome,
        result,
    }
}

/// Run one agent: its AI profile with the agent's role.
pub fn run_agent(
    ctx: &mut ExecutionContext,
    agent: &str,
    input: Value,
    span: Span,
) -> Result<Value, RuntimeError> {
    let decl = ctx
        .program()
        .agent(agent)
        .cloned()
        .ok_or_else(|| RuntimeError::UnknownAgent {
            name: agent.to_string(),
        })?;
    let max = ctx.config().ai.max_agent_calls;
    if ctx.agent_calls >= max {
        return Err(RuntimeError::Limit {
            message: format!("agent call limit of {} reached", max),
            span,
        });
    }
    ctx.agent_calls += 1;
    ask_ai(ctx, &decl.ai, input, decl.role.as_deref(), span)
}

/// Run several agents in declaration order and collect their outputs.
pub fn run_agents_parallel(
    ctx: &mut ExecutionContext,
    entries: &[AgentEntry],
    span: Span,
) -> Result<Value, RuntimeError> {
    if entries.len() > MAX_PARALLEL_AGENTS {
        return Err(RuntimeError::Limit {
            message: format!("at most {} agents may run in parallel", MAX_PARALLEL_AGENTS),
            span,
        });
    }
    let mut outputs = Vec::with_capacity(entries.len());
    for entry in entries {
        let input = eval_expr(ctx, &entry.input)?;
        let output = run_agent(ctx, &entry.agent, input, span).map_err(|e| {
            RuntimeError::invalid(format!("agent \"{}\" failed: {}", entry.agent, e), span)
        })?;
        outputs.push(output);
    }
    Ok(Value::List(outputs))
}
