//! Tool dispatch through the engine. Whatever path a call takes (flow
//! expression, AI tool loop, blocked by policy, failed in the runner), it
//! leaves exactly one tool-call trace entry.

use std::collections::BTreeSet;
use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use namel3ss_eval::{
    AiProvider, AiRequest, AiResponse, AiToolCall, Caller, Engine, FlowResult, RuntimeConfig,
    RuntimeError, ToolFailure, ToolInvocation, ToolOutcome, ToolRunner, ToolSource, TraceEvent,
};
use namel3ss_ir::Program;
use namel3ss_storage::MemoryStore;
use serde_json::json;

// ──────────────────────────────────────────────
// Fakes
// ──────────────────────────────────────────────

#[derive(Default)]
struct GreetRunner {
    calls: AtomicUsize,
}

impl ToolRunner for GreetRunner {
    fn run(&self, invocation: &ToolInvocation) -> Result<serde_json::Value, ToolFailure> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match invocation.payload.get("name").and_then(|n| n.as_str()) {
            Some("crash") => Err(ToolFailure::new("runtime_error", "boom")),
            Some("huge") => Ok(json!({"greeting": 1e30})),
            Some(name) => Ok(json!({"greeting": format!("hi {}", name)})),
            None => Ok(json!("anonymous")),
        }
    }
}

/// Asks for the scripted tool calls on round 0, then answers with text.
struct ScriptedAi {
    calls: Vec<AiToolCall>,
}

impl AiProvider for ScriptedAi {
    fn ask(&self, request: &AiRequest) -> Result<AiResponse, RuntimeError> {
        if request.round == 0 {
            return Ok(AiResponse::ToolCalls(self.calls.clone()));
        }
        let outcomes: Vec<_> = request
            .tool_results
            .iter()
            .map(|r| format!("{}={}", r.name, r.outcome.as_str()))
            .collect();
        Ok(AiResponse::Text(outcomes.join(",")))
    }
}

/// Never stops asking for tools.
struct GreedyAi;

impl AiProvider for GreedyAi {
    fn ask(&self, _request: &AiRequest) -> Result<AiResponse, RuntimeError> {
        Ok(AiResponse::ToolCalls(vec![call("echo", json!({"n": 1}))]))
    }
}

fn call(name: &str, arguments: serde_json::Value) -> AiToolCall {
    AiToolCall {
        name: name.to_string(),
        arguments: arguments.as_object().cloned().unwrap_or_default(),
    }
}

// ──────────────────────────────────────────────
// Fixtures
// ──────────────────────────────────────────────

fn program() -> Program {
    Program::from_json(&json!({
        "tools": [
            {"name": "greet", "kind": "python", "capabilities": ["network"]},
            {"name": "echo", "kind": "builtin"}
        ],
        "ais": [{"name": "helper", "model": "test-model", "tools": ["greet", "echo"]}],
        "flows": [
            {
                "name": "hello",
                "body": [{"kind": "return", "expression": {
                    "kind": "tool_call",
                    "tool": "greet",
                    "args": [{"name": "name", "value": {"kind": "attr", "base": "input", "attrs": ["name"]}}]
                }}]
            },
            {
                "name": "hello_twice",
                "body": [
                    {"kind": "let", "name": "a", "expression": {"kind": "tool_call", "tool": "greet",
                        "args": [{"name": "name", "value": {"kind": "literal", "value": "ada"}}]}},
                    {"kind": "let", "name": "b", "expression": {"kind": "tool_call", "tool": "echo",
                        "args": [{"name": "x", "value": {"kind": "literal", "value": 1}}]}},
                    {"kind": "return", "expression": {"kind": "list", "items": [
                        {"kind": "var", "name": "a"}, {"kind": "var", "name": "b"}
                    ]}}
                ]
            },
            {
                "name": "assist",
                "body": [
                    {"kind": "ask_ai", "ai": "helper", "input": {"kind": "literal", "value": "help"}, "target": "answer"},
                    {"kind": "return", "expression": {"kind": "var", "name": "answer"}}
                ]
            }
        ]
    }))
    .unwrap()
}

fn write_bindings(root: &Path) {
    fs::create_dir_all(root.join(".namel3ss")).unwrap();
    fs::write(
        root.join(".namel3ss/tools.yaml"),
        "tools:\n  greet:\n    kind: python\n    entry: tools.greet:run\n",
    )
    .unwrap();
}

/// Dispatch decisions are logged at debug; `RUST_LOG=namel3ss_eval=debug`
/// shows them under `cargo test -- --nocapture`.
fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn engine_in(root: &Path, config: RuntimeConfig, runner: Arc<GreetRunner>) -> Engine {
    init_tracing();
    let config = RuntimeConfig {
        project_root: Some(root.to_path_buf()),
        ..config
    };
    Engine::new(program(), config, Arc::new(MemoryStore::new()))
        .unwrap()
        .with_tool_runner(runner)
}

fn tool_events(result: &FlowResult) -> Vec<(String, ToolSource, ToolOutcome)> {
    result
        .tool_calls()
        .map(|t| match t {
            TraceEvent::ToolCall {
                tool,
                source,
                outcome,
                ..
            } => (tool.clone(), *source, *outcome),
            _ => unreachable!(),
        })
        .collect()
}

// ──────────────────────────────────────────────
// Flow calls
// ──────────────────────────────────────────────

#[test]
fn flow_tool_call_runs_through_the_runner_once() {
    let dir = tempfile::tempdir().unwrap();
    write_bindings(dir.path());
    let runner = Arc::new(GreetRunner::default());
    let engine = engine_in(dir.path(), RuntimeConfig::default(), Arc::clone(&runner));

    let result = engine.run_flow("hello", json!({"name": "ada"}), Caller::anonymous());
    assert_eq!(result.result.as_ref().unwrap(), &json!({"greeting": "hi ada"}));
    assert_eq!(runner.calls.load(Ordering::SeqCst), 1);
    assert_eq!(
        tool_events(&result),
        vec![("greet".to_string(), ToolSource::Flow, ToolOutcome::Ok)]
    );
}

#[test]
fn non_object_results_are_wrapped() {
    let dir = tempfile::tempdir().unwrap();
    write_bindings(dir.path());
    let engine = engine_in(dir.path(), RuntimeConfig::default(), Arc::default());
    let result = engine.run_flow("hello", json!({"name": null}), Caller::anonymous());
    assert_eq!(result.result.unwrap(), json!({"result": "anonymous"}));
}

#[test]
fn each_call_gets_its_own_entry_in_order() {
    let dir = tempfile::tempdir().unwrap();
    write_bindings(dir.path());
    let engine = engine_in(dir.path(), RuntimeConfig::default(), Arc::default());
    let result = engine.run_flow("hello_twice", json!({}), Caller::anonymous());
    assert_eq!(
        *result.result.as_ref().unwrap(),
        json!([{"greeting": "hi ada"}, {"x": 1}])
    );
    let tools: Vec<_> = tool_events(&result).into_iter().map(|(t, ..)| t).collect();
    assert_eq!(tools, vec!["greet", "echo"]);
}

#[test]
fn missing_binding_blocks_without_running() {
    let dir = tempfile::tempdir().unwrap();
    let runner = Arc::new(GreetRunner::default());
    let engine = engine_in(dir.path(), RuntimeConfig::default(), Arc::clone(&runner));

    let result = engine.run_flow("hello", json!({"name": "ada"}), Caller::anonymous());
    assert_eq!(result.result.as_ref().unwrap_err().kind(), "tool_blocked");
    assert_eq!(runner.calls.load(Ordering::SeqCst), 0);
    assert_eq!(
        tool_events(&result),
        vec![("greet".to_string(), ToolSource::Flow, ToolOutcome::Blocked)]
    );
}

#[test]
fn capability_policy_blocks_with_a_reason() {
    let dir = tempfile::tempdir().unwrap();
    write_bindings(dir.path());
    let mut config = RuntimeConfig::default();
    config.tools.allowed_capabilities = Some(vec!["filesystem".to_string()]);
    let engine = engine_in(dir.path(), config, Arc::default());

    let result = engine.run_flow("hello", json!({"name": "ada"}), Caller::anonymous());
    assert!(result.result.is_err());
    let serialized = serde_json::to_value(result.tool_calls().collect::<Vec<_>>()).unwrap();
    assert_eq!(serialized[0]["outcome"], "blocked");
    assert_eq!(serialized[0]["decision"]["reason"], "capability_not_allowed");
    assert_eq!(serialized[0]["decision"]["capability"], "network");
}

#[test]
fn runner_failure_is_an_error_outcome() {
    let dir = tempfile::tempdir().unwrap();
    write_bindings(dir.path());
    let engine = engine_in(dir.path(), RuntimeConfig::default(), Arc::default());
    let result = engine.run_flow("hello", json!({"name": "crash"}), Caller::anonymous());
    assert_eq!(result.result.as_ref().unwrap_err().kind(), "tool_failed");
    assert_eq!(
        tool_events(&result),
        vec![("greet".to_string(), ToolSource::Flow, ToolOutcome::Error)]
    );
}

#[test]
fn out_of_range_tool_result_is_an_error_outcome() {
    let dir = tempfile::tempdir().unwrap();
    write_bindings(dir.path());
    let engine = engine_in(dir.path(), RuntimeConfig::default(), Arc::default());
    let result = engine.run_flow("hello", json!({"name": "huge"}), Caller::anonymous());
    assert_eq!(result.result.as_ref().unwrap_err().kind(), "tool_failed");
    let serialized = serde_json::to_value(result.tool_calls().collect::<Vec<_>>()).unwrap();
    assert_eq!(serialized.as_array().unwrap().len(), 1);
    assert_eq!(serialized[0]["outcome"], "error");
    assert!(serialized[0]["result_summary"]
        .as_str()
        .unwrap()
        .starts_with("invalid_output: number 1e30"));
}

#[test]
fn out_of_range_input_is_rejected_before_the_flow_runs() {
    let dir = tempfile::tempdir().unwrap();
    write_bindings(dir.path());
    let runner = Arc::new(GreetRunner::default());
    let engine = engine_in(dir.path(), RuntimeConfig::default(), Arc::clone(&runner));

    let result = engine.run_flow("hello", json!({"name": 1e30}), Caller::anonymous());
    assert_eq!(result.result.as_ref().unwrap_err().kind(), "number_range");
    assert!(result.traces.is_empty());
    assert_eq!(runner.calls.load(Ordering::SeqCst), 0);

    let caller = Caller::authenticated(json!({"id": "u1", "quota": 1e30}));
    let result = engine.run_flow("hello", json!({"name": "ada"}), caller);
    assert_eq!(result.result.as_ref().unwrap_err().kind(), "number_range");
}

// ──────────────────────────────────────────────
// AI tool loop
// ──────────────────────────────────────────────

#[test]
fn ai_tool_calls_leave_one_final_entry_each() {
    let dir = tempfile::tempdir().unwrap();
    write_bindings(dir.path());
    let ai = ScriptedAi {
        calls: vec![
            call("greet", json!({"name": "grace"})),
            call("echo", json!({"n": 2})),
            call("launch_missiles", json!({})),
        ],
    };
    let engine =
        engine_in(dir.path(), RuntimeConfig::default(), Arc::default()).with_ai_provider(Arc::new(ai));

    let result = engine.run_flow("assist", json!({}), Caller::anonymous());
    assert_eq!(
        result.result.as_ref().unwrap(),
        &json!("greet=ok,echo=ok,launch_missiles=blocked")
    );
    assert_eq!(
        tool_events(&result),
        vec![
            ("greet".to_string(), ToolSource::Ai, ToolOutcome::Ok),
            ("echo".to_string(), ToolSource::Ai, ToolOutcome::Ok),
            ("launch_missiles".to_string(), ToolSource::Ai, ToolOutcome::Blocked),
        ]
    );
    let ids: BTreeSet<_> = result.tool_calls().filter_map(TraceEvent::call_id).collect();
    assert_eq!(ids.len(), 3);
    assert!(result.traces.iter().any(|t| matches!(
        t,
        TraceEvent::Ai { rounds: 2, tool_calls: 3, .. }
    )));
}

#[test]
fn ai_round_limit_keeps_entries_final() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = RuntimeConfig::default();
    config.ai.max_tool_rounds = 2;
    let engine = engine_in(dir.path(), config, Arc::default()).with_ai_provider(Arc::new(GreedyAi));

    let result = engine.run_flow("assist", json!({}), Caller::anonymous());
    assert_eq!(result.result.as_ref().unwrap_err().kind(), "limit");
    let outcomes: Vec<_> = tool_events(&result).into_iter().map(|(.., o)| o).collect();
    assert_eq!(outcomes, vec![ToolOutcome::Ok, ToolOutcome::Ok]);
}

#[test]
fn ask_ai_without_a_provider_is_a_config_error() {
    let dir = tempfile::tempdir().unwrap();
    let engine = engine_in(dir.path(), RuntimeConfig::default(), Arc::default());
    let result = engine.run_flow("assist", json!({}), Caller::anonymous());
    assert_eq!(result.result.as_ref().unwrap_err().kind(), "config");
    assert_eq!(result.tool_calls().count(), 0);
}
