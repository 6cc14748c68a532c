use namel3ss_ir::{Expression, IrError, MergeKind, Program, Purity, Statement, ToolKind};
use serde_json::json;

fn orchestration_program(merge: serde_json::Value, branches: serde_json::Value) -> serde_json::Value {
    json!({
        "flows": [
            {"name": "a", "body": [{"kind": "return", "expression": {"kind": "literal", "value": 1}}]},
            {"name": "b", "body": [{"kind": "return", "expression": {"kind": "literal", "value": 2}}]},
            {
                "name": "main",
                "body": [{
                    "kind": "orchestration",
                    "branches": branches,
                    "merge": merge,
                    "target": "out",
                    "span": {"line": 4, "column": 3}
                }]
            }
        ]
    })
}

#[test]
fn loads_flows_records_and_tools() {
    let program = Program::from_json(&json!({
        "flows": [{
            "name": "total",
            "purity": "pure",
            "contract": {"inputs": [{"name": "a", "type_name": "number"}]},
            "body": [
                {"kind": "let", "name": "x", "expression": {
                    "kind": "binary", "op": "+",
                    "left": {"kind": "attr", "base": "input", "attrs": ["a"]},
                    "right": {"kind": "literal", "value": 1}
                }},
                {"kind": "return", "expression": {"kind": "var", "name": "x"}}
            ]
        }],
        "records": [{
            "name": "Order",
            "fields": [{"name": "id", "type_name": "number"}, {"name": "total", "type_name": "number", "required": true}],
            "tenant_key": {"kind": "attr", "base": "identity", "attrs": ["org_id"]}
        }],
        "tools": [{"name": "fetch", "kind": "python", "capabilities": ["network"]}]
    }))
    .unwrap();

    let flow = program.flow("total").unwrap();
    assert_eq!(flow.purity, Purity::Pure);
    assert!(flow.contract.as_ref().unwrap().inputs[0].required);
    assert!(matches!(flow.body[1], Statement::Return { .. }));

    let order = program.record("Order").unwrap();
    assert_eq!(order.id_field(), "id");
    assert!(matches!(order.tenant_key, Some(Expression::Attr { .. })));

    let tool = program.tool("fetch").unwrap();
    assert_eq!(tool.kind, ToolKind::Python);
    assert!(tool.kind.needs_binding());
}

#[test]
fn unknown_statement_kind_is_malformed() {
    let err = Program::from_json(&json!({
        "flows": [{"name": "f", "body": [{"kind": "teleport"}]}]
    }))
    .unwrap_err();
    assert!(matches!(err, IrError::Malformed(_)));
}

#[test]
fn duplicate_flow_names_are_rejected() {
    let err = Program::from_json(&json!({
        "flows": [{"name": "f"}, {"name": "f"}]
    }))
    .unwrap_err();
    assert_eq!(
        err,
        IrError::DuplicateName {
            kind: "flow".to_string(),
            name: "f".to_string()
        }
    );
}

#[test]
fn prefer_precedence_must_name_declared_branches() {
    let err = Program::from_json(&orchestration_program(
        json!({"policy": "prefer", "precedence": ["b", "zzz"]}),
        json!([
            {"name": "a", "call": {"kind": "call_flow", "flow": "a"}},
            {"name": "b", "call": {"kind": "call_flow", "flow": "b"}}
        ]),
    ))
    .unwrap_err();
    match err {
        IrError::Orchestration { flow, message, span } => {
            assert_eq!(flow, "main");
            assert!(message.contains("zzz"));
            assert_eq!(span.line, Some(4));
        }
        other => panic!("unexpected {:?}", other),
    }
}

#[test]
fn branch_must_be_a_flow_or_pipeline_call() {
    let err = Program::from_json(&orchestration_program(
        json!({"policy": "collect"}),
        json!([{"name": "a", "call": {"kind": "tool_call", "tool": "fetch"}}]),
    ))
    .unwrap_err();
    assert!(err.to_string().contains("single flow or pipeline call"));
}

#[test]
fn duplicate_branch_names_are_rejected() {
    let err = Program::from_json(&orchestration_program(
        json!({"policy": "first_ok"}),
        json!([
            {"name": "a", "call": {"kind": "call_flow", "flow": "a"}},
            {"name": "a", "call": {"kind": "call_flow", "flow": "b"}}
        ]),
    ))
    .unwrap_err();
    assert!(err.to_string().contains("more than once"));
}

#[test]
fn valid_prefer_block_loads() {
    let program = Program::from_json(&orchestration_program(
        json!({"policy": "prefer", "precedence": ["b", "a"]}),
        json!([
            {"name": "a", "call": {"kind": "call_flow", "flow": "a"}},
            {"name": "b", "call": {"kind": "call_flow", "flow": "b"}}
        ]),
    ))
    .unwrap();
    match &program.flow("main").unwrap().body[0] {
        Statement::Orchestration { merge, branches, .. } => {
            assert_eq!(merge.policy, MergeKind::Prefer);
            assert_eq!(branches.len(), 2);
        }
        other => panic!("unexpected {:?}", other),
    }
}
