//! Shared runtime handles and the per-invocation `ExecutionContext`.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use serde::Serialize;
use time::OffsetDateTime;

use namel3ss_ir::Program;
use namel3ss_storage::{ChangeMarker, RecordStore};

use crate::ai::AiProvider;
use crate::config::RuntimeConfig;
use crate::error::RuntimeError;
use crate::guards::AuthContext;
use crate::tools::ToolRunner;
use crate::trace::{CallId, TraceLog};
use crate::value::Value;

/// Logical clock in unix seconds. `advance time` moves it forward without
/// touching the wall clock.
#[derive(Debug)]
pub struct LogicalClock {
    base: i64,
    offset: AtomicI64,
}

impl LogicalClock {
    pub fn system() -> Self {
        Self::fixed(OffsetDateTime::now_utc().unix_timestamp())
    }

    pub fn fixed(unix_seconds: i64) -> Self {
        LogicalClock {
            base: unix_seconds,
            offset: AtomicI64::new(0),
        }
    }

    pub fn now(&self) -> i64 {
        self.base + self.offset.load(Ordering::SeqCst)
    }

    pub fn advance(&self, seconds: i64) {
        self.offset.fetch_add(seconds, Ordering::SeqCst);
    }

    /// RFC 3339 rendering of a logical timestamp.
    pub fn format(unix_seconds: i64) -> String {
        OffsetDateTime::from_unix_timestamp(unix_seconds)
            .ok()
            .and_then(|t| t.format(&time::format_description::well_known::Rfc3339).ok())
            .unwrap_or_else(|| unix_seconds.to_string())
    }
}

/// Handles shared by every invocation of one engine. Cloning is cheap.
#[derive(Clone)]
pub struct Runtime {
    pub program: Arc<Program>,
    pub config: Arc<RuntimeConfig>,
    pub store: Arc<dyn RecordStore>,
    pub state: Arc<Mutex<BTreeMap<String, Value>>>,
    pub clock: Arc<LogicalClock>,
    pub ai: Option<Arc<dyn AiProvider>>,
    pub tool_runner: Arc<dyn ToolRunner>,
    call_ids: Arc<AtomicU64>,
}

impl Runtime {
    pub fn new(
        program: Arc<Program>,
        config: Arc<RuntimeConfig>,
        store: Arc<dyn RecordStore>,
        tool_runner: Arc<dyn ToolRunner>,
    ) -> Self {
        Runtime {
            program,
            config,
            store,
            state: Arc::new(Mutex::new(BTreeMap::new())),
            clock: Arc::new(LogicalClock::system()),
            ai: None,
            tool_runner,
            call_ids: Arc::new(AtomicU64::new(1)),
        }
    }

    pub fn next_call_id(&self) -> CallId {
        self.call_ids.fetch_add(1, Ordering::SeqCst)
    }

    /// Lock the shared state tree, recovering the data from a poisoned lock.
    pub fn state(&self) -> MutexGuard<'_, BTreeMap<String, Value>> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// A queued background job.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Job {
    pub job: String,
    pub payload: serde_json::Value,
    /// Logical unix time at which the job becomes due.
    pub run_at: i64,
    pub enqueued_at: String,
}

/// Mutable state of exactly one flow invocation.
///
/// Contexts are never shared between invocations. Nested flow calls and
/// orchestration branches get a fresh child context and are merged back
/// with [`ExecutionContext::absorb`].
pub struct ExecutionContext {
    pub runtime: Arc<Runtime>,
    pub flow_name: String,
    pub locals: BTreeMap<String, Value>,
    pub constants: BTreeSet<String>,
    pub identity: Option<Value>,
    pub auth: AuthContext,
    pub traces: TraceLog,
    /// Buffer used while an AI tool loop is running.
    pub pending_tool_traces: Option<TraceLog>,
    pub jobs: Vec<Job>,
    pub changes: Vec<ChangeMarker>,
    pub parallel_mode: bool,
    pub call_depth: u32,
    pub function_depth: u32,
    pub agent_calls: u32,
    pub last_value: Value,
}

impl ExecutionContext {
    pub fn new(
        runtime: Arc<Runtime>,
        flow_name: &str,
        identity: Option<Value>,
        auth: AuthContext,
    ) -> Self {
        ExecutionContext {
            runtime,
            flow_name: flow_name.to_string(),
            locals: BTreeMap::new(),
            constants: BTreeSet::new(),
            identity,
            auth,
            traces: TraceLog::new(),
            pending_tool_traces: None,
            jobs: Vec::new(),
            changes: Vec::new(),
            parallel_mode: false,
            call_depth: 0,
            function_depth: 0,
            agent_calls: 0,
            last_value: Value::Null,
        }
    }

    /// Fresh context for a nested flow call.
    pub fn child(&self, flow_name: &str) -> Result<Self, RuntimeError> {
        let depth = self.call_depth + 1;
        let max = self.runtime.config.limits.max_call_depth;
        if depth > max {
            return Err(RuntimeError::Limit {
                message: format!("call depth exceeded {} calling \"{}\"", max, flow_name),
                span: Default::default(),
            });
        }
        let mut child = ExecutionContext::new(
            Arc::clone(&self.runtime),
            flow_name,
            self.identity.clone(),
            self.auth.clone(),
        );
        child.call_depth = depth;
        child.agent_calls = self.agent_calls;
        child.parallel_mode = self.parallel_mode;
        Ok(child)
    }

    /// Copy of this context for one parallel task: same locals, no shared
    /// trace or change buffers, state writes forbidden.
    pub fn fork(&self) -> Self {
        let mut forked = ExecutionContext::new(
            Arc::clone(&self.runtime),
            &self.flow_name,
            self.identity.clone(),
            self.auth.clone(),
        );
        forked.locals = self.locals.clone();
        forked.constants = self.constants.clone();
        forked.call_depth = self.call_depth;
        forked.function_depth = self.function_depth;
        forked.agent_calls = self.agent_calls;
        forked.parallel_mode = true;
        forked
    }

    /// Merge a finished child or forked context back into this one.
    pub fn absorb(&mut self, other: ExecutionContext) {
        self.traces.append(other.traces);
        if let Some(pending) = other.pending_tool_traces {
            self.traces.append(pending);
        }
        self.jobs.extend(other.jobs);
        self.changes.extend(other.changes);
        self.agent_calls = self.agent_calls.max(other.agent_calls);
    }

    pub fn program(&self) -> &Program {
        &self.runtime.program
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.runtime.config
    }

    pub fn now(&self) -> i64 {
        self.runtime.clock.now()
    }

    /// The caller identity, or an empty map when unauthenticated.
    pub fn identity_value(&self) -> Value {
        self.identity.clone().unwrap_or_else(|| Value::Map(BTreeMap::new()))
    }
}
