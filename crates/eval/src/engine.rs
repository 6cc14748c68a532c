//! Engine entry point: one validated program, many flow invocations.

use std::sync::Arc;

use serde::Serialize;

use namel3ss_ir::Program;
use namel3ss_storage::{ChangeMarker, RecordStore};

use crate::ai::AiProvider;
use crate::config::RuntimeConfig;
use crate::context::{ExecutionContext, Job, LogicalClock, Runtime};
use crate::error::RuntimeError;
use crate::flow;
use crate::guards::AuthContext;
use crate::tools::{SubprocessRunner, ToolRunner};
use crate::trace::TraceEvent;
use crate::value::Value;

/// Who is invoking a flow.
#[derive(Debug, Clone, Default)]
pub struct Caller {
    /// Identity claims, e.g. `{"id": "u1", "roles": ["admin"]}`.
    pub identity: Option<serde_json::Value>,
    pub auth: AuthContext,
}

impl Caller {
    pub fn anonymous() -> Self {
        Caller {
            identity: None,
            auth: AuthContext::anonymous(),
        }
    }

    pub fn authenticated(identity: serde_json::Value) -> Self {
        Caller {
            identity: Some(identity),
            auth: AuthContext::authenticated(),
        }
    }

    /// A caller whose credentials were presented but rejected.
    pub fn with_auth(identity: Option<serde_json::Value>, auth: AuthContext) -> Self {
        Caller { identity, auth }
    }
}

/// Everything one invocation produced. Traces, changes and jobs are
/// returned even when the flow failed.
#[derive(Debug, Serialize)]
pub struct FlowResult {
    #[serde(serialize_with = "serialize_result")]
    pub result: Result<serde_json::Value, RuntimeError>,
    pub state: serde_json::Value,
    pub traces: Vec<TraceEvent>,
    pub changes: Vec<ChangeMarker>,
    pub jobs: Vec<Job>,
}

impl FlowResult {
    pub fn is_ok(&self) -> bool {
        self.result.is_ok()
    }

    /// Tool-call trace entries, in order.
    pub fn tool_calls(&self) -> impl Iterator<Item = &TraceEvent> {
        self.traces
            .iter()
            .filter(|t| matches!(t, TraceEvent::ToolCall { .. }))
    }
}

fn serialize_result<S: serde::Serializer>(
    result: &Result<serde_json::Value, RuntimeError>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    match result {
        Ok(value) => serde_json::json!({"ok": true, "value": value}).serialize(serializer),
        Err(e) => serde_json::json!({
            "ok": false,
            "error": {"kind": e.kind(), "message": e.to_string()}
        })
        .serialize(serializer),
    }
}

/// Runs flows of one program against one store and state tree.
pub struct Engine {
    runtime: Runtime,
}

impl Engine {
    /// Validate `program` and build an engine. Pure flows that violate their
    /// contract are rejected here.
    pub fn new(
        program: Program,
        config: RuntimeConfig,
        store: Arc<dyn RecordStore>,
    ) -> Result<Self, RuntimeError> {
        namel3ss_analyze::validate_program(&program)?;
        tracing::debug!(
            flows = program.flows.len(),
            records = program.records.len(),
            tools = program.tools.len(),
            "program loaded"
        );
        let runner: Arc<dyn ToolRunner> = Arc::new(SubprocessRunner);
        Ok(Engine {
            runtime: Runtime::new(Arc::new(program), Arc::new(config), store, runner),
        })
    }

    pub fn with_ai_provider(mut self, provider: Arc<dyn AiProvider>) -> Self {
        self.runtime.ai = Some(provider);
        self
    }

    pub fn with_tool_runner(mut self, runner: Arc<dyn ToolRunner>) -> Self {
        self.runtime.tool_runner = runner;
        self
    }

    pub fn with_clock(mut self, clock: LogicalClock) -> Self {
        self.runtime.clock = Arc::new(clock);
        self
    }

    pub fn program(&self) -> &Program {
        &self.runtime.program
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.runtime.config
    }

    pub fn clock(&self) -> &LogicalClock {
        &self.runtime.clock
    }

    /// Snapshot of the shared state tree.
    pub fn state(&self) -> serde_json::Value {
        Value::Map(self.runtime.state().clone()).to_json()
    }

    /// Replace one top-level state key.
    pub fn set_state(&self, key: &str, value: serde_json::Value) -> Result<(), RuntimeError> {
        let value = Value::from_json(&value)?;
        self.runtime.state().insert(key.to_string(), value);
        Ok(())
    }

    /// Run flow `name` with `input` on behalf of `caller`.
    pub fn run_flow(&self, name: &str, input: serde_json::Value, caller: Caller) -> FlowResult {
        let converted = Value::from_json(&input).and_then(|input| {
            let identity = caller.identity.as_ref().map(Value::from_json).transpose()?;
            Ok((input, identity))
        });
        let (input, identity) = match converted {
            Ok(pair) => pair,
            Err(e) => {
                tracing::debug!(flow = name, error = %e, "flow input rejected");
                return FlowResult {
                    result: Err(e),
                    state: self.state(),
                    traces: Vec::new(),
                    changes: Vec::new(),
                    jobs: Vec::new(),
                };
            }
        };
        let runtime = Arc::new(self.runtime.clone());
        let mut ctx = ExecutionContext::new(runtime, name, identity, caller.auth);
        tracing::debug!(flow = name, "flow started");

        let result = match self.runtime.program.flow(name) {
            Some(flow) => flow::run_flow(&mut ctx, flow, input),
            None => Err(RuntimeError::UnknownFlow {
                name: name.to_string(),
            }),
        };
        match &result {
            Ok(_) => tracing::debug!(flow = name, traces = ctx.traces.len(), "flow finished"),
            Err(e) => tracing::debug!(flow = name, kind = e.kind(), error = %e, "flow failed"),
        }

        let mut traces = ctx.traces;
        if let Some(pending) = ctx.pending_tool_traces.take() {
            traces.append(pending);
        }
        FlowResult {
            result: result.map(|v| v.to_json()),
            state: self.state(),
            traces: traces.into_events(),
            changes: ctx.changes,
            jobs: ctx.jobs,
        }
    }
}
