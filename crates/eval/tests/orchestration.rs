//! Orchestration blocks through the engine: each merge policy, and
//! deterministic trace order no matter how the branch threads interleave.

use std::sync::Arc;

use namel3ss_eval::{Caller, Engine, RuntimeConfig, TraceEvent};
use namel3ss_ir::Program;
use namel3ss_storage::MemoryStore;
use serde_json::json;

fn quote(name: &str, amount: serde_json::Value) -> serde_json::Value {
    json!({
        "name": name,
        "body": [
            {"kind": "log", "level": "info", "message": {"kind": "literal", "value": name}},
            {"kind": "return", "expression": {"kind": "literal", "value": amount}}
        ]
    })
}

fn orchestrate(name: &str, branches: &[&str], merge: serde_json::Value) -> serde_json::Value {
    let branches: Vec<_> = branches
        .iter()
        .map(|b| json!({"name": b, "call": {"kind": "call_flow", "flow": b}}))
        .collect();
    json!({
        "name": name,
        "body": [
            {"kind": "orchestration", "branches": branches, "merge": merge, "target": "out"},
            {"kind": "return", "expression": {"kind": "var", "name": "out"}}
        ]
    })
}

fn engine() -> Engine {
    let program = Program::from_json(&json!({
        "flows": [
            quote("vendor_a", json!(10)),
            quote("vendor_b", json!(20)),
            quote("vendor_c", json!(10)),
            {
                "name": "vendor_down",
                "body": [{"kind": "return", "expression": {"kind": "binary", "op": "/",
                    "left": {"kind": "literal", "value": 1}, "right": {"kind": "literal", "value": 0}}}]
            },
            orchestrate("first", &["vendor_down", "vendor_a", "vendor_b"], json!({"policy": "first_ok"})),
            orchestrate("preferred", &["vendor_a", "vendor_b"], json!({"policy": "prefer", "precedence": ["vendor_b"]})),
            orchestrate("preferred_fallback", &["vendor_a", "vendor_down"], json!({"policy": "prefer", "precedence": ["vendor_down"]})),
            orchestrate("everyone", &["vendor_a", "vendor_b"], json!({"policy": "all_ok"})),
            orchestrate("everyone_broken", &["vendor_a", "vendor_down"], json!({"policy": "all_ok"})),
            orchestrate("gather", &["vendor_a", "vendor_down"], json!({"policy": "collect"})),
            orchestrate("agree", &["vendor_a", "vendor_c"], json!({"policy": "strict"})),
            orchestrate("disagree", &["vendor_a", "vendor_b"], json!({"policy": "strict"})),
            orchestrate("nobody", &["vendor_down"], json!({"policy": "first_ok"}))
        ]
    }))
    .unwrap();
    Engine::new(program, RuntimeConfig::default(), Arc::new(MemoryStore::new())).unwrap()
}

fn run(flow: &str) -> namel3ss_eval::FlowResult {
    engine().run_flow(flow, json!({}), Caller::anonymous())
}

#[test]
fn first_ok_skips_failed_branches() {
    assert_eq!(run("first").result.unwrap(), json!(10));
}

#[test]
fn prefer_follows_precedence_then_declaration_order() {
    assert_eq!(run("preferred").result.unwrap(), json!(20));
    assert_eq!(run("preferred_fallback").result.unwrap(), json!(10));
}

#[test]
fn all_ok_keys_values_by_branch() {
    assert_eq!(
        run("everyone").result.unwrap(),
        json!({"vendor_a": 10, "vendor_b": 20})
    );
    let err = run("everyone_broken").result.unwrap_err();
    assert_eq!(err.kind(), "orchestration");
    assert!(err.to_string().contains("vendor_down"));
}

#[test]
fn collect_reports_every_branch() {
    assert_eq!(
        run("gather").result.unwrap(),
        json!([
            {"branch": "vendor_a", "ok": true, "value": 10},
            {"branch": "vendor_down", "ok": false, "kind": "division_by_zero",
             "error": run("vendor_down").result.unwrap_err().to_string()}
        ])
    );
}

#[test]
fn strict_requires_agreement() {
    assert_eq!(run("agree").result.unwrap(), json!(10));
    let err = run("disagree").result.unwrap_err();
    assert_eq!(err.kind(), "orchestration");
}

#[test]
fn no_successful_branch_is_an_error() {
    assert_eq!(run("nobody").result.unwrap_err().kind(), "orchestration");
}

#[test]
fn traces_follow_declaration_order() {
    for _ in 0..20 {
        let result = run("everyone");
        let messages: Vec<_> = result
            .traces
            .iter()
            .filter_map(|t| match t {
                TraceEvent::Log { message, .. } => Some(message.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(messages, vec!["vendor_a", "vendor_b"]);
        assert!(matches!(
            result.traces.last(),
            Some(TraceEvent::Merge { construct: "orchestration", .. })
        ));
    }
}
