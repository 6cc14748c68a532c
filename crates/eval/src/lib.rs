//! namel3ss flow interpreter.
//!
//! The [`Engine`] validates a [`Program`](namel3ss_ir::Program) once and then
//! runs flows on behalf of callers. Each invocation gets its own
//! [`ExecutionContext`] and threads it through record operations, the
//! `requires` guard engine, the tool dispatcher and orchestration merges.
//! The result carries the flow's value, the shared state after the run,
//! the ordered trace log, change markers and queued jobs.

pub mod ai;
pub mod builtins;
pub mod config;
pub mod context;
pub mod engine;
pub mod error;
pub mod expr;
pub mod flow;
pub mod guards;
pub mod ops;
pub mod orchestration;
pub mod records;
pub mod tools;
pub mod trace;
pub mod value;

pub use ai::{AiProvider, AiRequest, AiResponse, AiToolCall, AiToolResult};
pub use config::RuntimeConfig;
pub use context::{ExecutionContext, Job, LogicalClock, Runtime};
pub use engine::{Caller, Engine, FlowResult};
pub use error::{AuthCategory, AuthReason, RuntimeError};
pub use guards::{AuthContext, AuthError};
pub use tools::{
    execute_tool_call, ToolCallOutcome, ToolDecision, ToolFailure, ToolInvocation, ToolRunner,
};
pub use trace::{AuthDecision, CallId, ToolOutcome, ToolSource, TraceEvent};
pub use value::Value;
