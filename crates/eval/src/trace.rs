//! Trace events emitted during a flow invocation.
//!
//! Tool calls are keyed by a call id. A call started inside an AI tool loop
//! opens a placeholder entry first; finishing the call replaces that entry
//! in place, so each logical call yields exactly one event.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::error::AuthCategory;
use crate::tools::ToolDecision;

pub type CallId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthDecision {
    Allowed,
    Denied,
    Invalid,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolSource {
    Flow,
    Ai,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolOutcome {
    Pending,
    Ok,
    Blocked,
    Error,
}

impl ToolOutcome {
    pub fn as_str(self) -> &'static str {
        match self {
            ToolOutcome::Pending => "pending",
            ToolOutcome::Ok => "ok",
            ToolOutcome::Blocked => "blocked",
            ToolOutcome::Error => "error",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TraceEvent {
    Authorization {
        subject: String,
        decision: AuthDecision,
        #[serde(skip_serializing_if = "Option::is_none")]
        category: Option<AuthCategory>,
        #[serde(skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },
    ToolCall {
        call_id: CallId,
        tool: String,
        kind: String,
        source: ToolSource,
        /// `None` while the call is still a placeholder.
        decision: Option<ToolDecision>,
        outcome: ToolOutcome,
        #[serde(skip_serializing_if = "Option::is_none")]
        result_summary: Option<String>,
        duration_ms: u64,
    },
    Log {
        level: String,
        message: String,
        fields: serde_json::Value,
    },
    Metric {
        metric: String,
        name: String,
        operation: String,
        value: serde_json::Value,
        labels: serde_json::Value,
    },
    Merge {
        construct: &'static str,
        policy: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        selected: Option<String>,
        failed: Vec<String>,
    },
    FlowStep {
        flow: String,
        step: String,
        index: usize,
        status: &'static str,
    },
    Ai {
        ai: String,
        model: String,
        rounds: u32,
        tool_calls: usize,
    },
}

impl TraceEvent {
    /// Call id of a tool-call event.
    pub fn call_id(&self) -> Option<CallId> {
        match self {
            TraceEvent::ToolCall { call_id, .. } => Some(*call_id),
            _ => None,
        }
    }
}

/// Ordered trace list with call-id handles for in-flight tool calls.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TraceLog {
    events: Vec<TraceEvent>,
    open: BTreeMap<CallId, usize>,
}

impl TraceLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, event: TraceEvent) {
        self.events.push(event);
    }

    /// Insert a placeholder for `call_id`, to be replaced by [`finalize`].
    ///
    /// [`finalize`]: TraceLog::finalize
    pub fn open(&mut self, call_id: CallId, placeholder: TraceEvent) {
        self.open.insert(call_id, self.events.len());
        self.events.push(placeholder);
    }

    pub fn is_open(&self, call_id: CallId) -> bool {
        self.open.contains_key(&call_id)
    }

    /// Replace the placeholder for `call_id`, or append when none exists.
    pub fn finalize(&mut self, call_id: CallId, event: TraceEvent) {
        match self.open.remove(&call_id) {
            Some(index) => self.events[index] = event,
            None => self.events.push(event),
        }
    }

    /// Append another log, keeping its open handles valid.
    pub fn append(&mut self, other: TraceLog) {
        let offset = self.events.len();
        self.open
            .extend(other.open.into_iter().map(|(id, index)| (id, index + offset)));
        self.events.extend(other.events);
    }

    pub fn events(&self) -> &[TraceEvent] {
        &self.events
    }

    pub fn into_events(self) -> Vec<TraceEvent> {
        self.events
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn call(id: CallId, outcome: ToolOutcome) -> TraceEvent {
        TraceEvent::ToolCall {
            call_id: id,
            tool: "t".into(),
            kind: "builtin".into(),
            source: ToolSource::Ai,
            decision: None,
            outcome,
            result_summary: None,
            duration_ms: 0,
        }
    }

    #[test]
    fn finalize_replaces_placeholder() {
        let mut log = TraceLog::new();
        log.open(7, call(7, ToolOutcome::Pending));
        log.push(TraceEvent::Log {
            level: "info".into(),
            message: "between".into(),
            fields: serde_json::Value::Null,
        });
        log.finalize(7, call(7, ToolOutcome::Ok));
        assert_eq!(log.len(), 2);
        assert_eq!(log.events()[0], call(7, ToolOutcome::Ok));
        assert!(!log.is_open(7));

        log.finalize(8, call(8, ToolOutcome::Blocked));
        assert_eq!(log.len(), 3);
    }

    #[test]
    fn append_shifts_open_handles() {
        let mut outer = TraceLog::new();
        outer.push(call(1, ToolOutcome::Ok));
        let mut inner = TraceLog::new();
        inner.open(2, call(2, ToolOutcome::Pending));
        outer.append(inner);
        outer.finalize(2, call(2, ToolOutcome::Error));
        assert_eq!(outer.len(), 2);
        assert_eq!(outer.events()[1], call(2, ToolOutcome::Error));
    }
}
