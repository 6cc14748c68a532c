//! Record operations through the engine: the SQL plan and the closure agree,
//! tenant scoping isolates callers, and strict SQL mode refuses predicates
//! it cannot compile.

use std::sync::Arc;

use namel3ss_eval::{Caller, Engine, RuntimeConfig};
use namel3ss_ir::Program;
use namel3ss_storage::{MemoryStore, StoreDialect, TENANT_KEY_FIELD};
use serde_json::json;

// ──────────────────────────────────────────────
// Fixtures
// ──────────────────────────────────────────────

fn field(name: &str) -> serde_json::Value {
    json!({"kind": "attr", "base": "order", "attrs": [name]})
}

fn input(name: &str) -> serde_json::Value {
    json!({"kind": "attr", "base": "input", "attrs": [name]})
}

fn find_and_return(predicate: serde_json::Value) -> serde_json::Value {
    json!([
        {"kind": "find", "record": "Order", "predicate": predicate, "target": "hits"},
        {"kind": "return", "expression": {"kind": "var", "name": "hits"}}
    ])
}

fn program(tenant_key: Option<serde_json::Value>) -> Program {
    Program::from_json(&json!({
        "records": [{
            "name": "Order",
            "fields": [
                {"name": "customer", "type_name": "text", "required": true},
                {"name": "total", "type_name": "number", "required": true},
                {"name": "note", "type_name": "text"}
            ],
            "tenant_key": tenant_key
        }],
        "flows": [
            {
                "name": "seed",
                "body": [{
                    "kind": "for_each",
                    "var": "item",
                    "iterable": input("orders"),
                    "body": [{"kind": "create", "record": "Order", "values": {"kind": "var", "name": "item"}, "target": "created"}]
                }]
            },
            {
                "name": "large",
                "body": find_and_return(json!({
                    "kind": "binary", "op": "and",
                    "left": {"kind": "comparison", "op": "gte", "left": field("total"), "right": input("min")},
                    "right": {"kind": "comparison", "op": "ne", "left": field("customer"), "right": {"kind": "literal", "value": "void"}}
                }))
            },
            {
                "name": "unnoted",
                "body": find_and_return(json!({
                    "kind": "comparison", "op": "eq", "left": field("note"), "right": {"kind": "literal", "value": null}
                }))
            },
            {
                "name": "not_large",
                "body": find_and_return(json!({
                    "kind": "unary", "op": "not",
                    "operand": {"kind": "comparison", "op": "gt", "left": field("total"), "right": {"kind": "literal", "value": 10}}
                }))
            },
            {
                "name": "customer_above",
                "body": find_and_return(json!({
                    "kind": "comparison", "op": "gt", "left": field("customer"), "right": {"kind": "literal", "value": 5}
                }))
            },
            {
                "name": "exact_total",
                "body": find_and_return(json!({
                    "kind": "comparison", "op": "eq", "left": field("total"), "right": input("total")
                }))
            },
            {
                "name": "everything",
                "body": find_and_return(json!({"kind": "literal", "value": true}))
            },
            {
                "name": "discount",
                "body": [
                    {
                        "kind": "update",
                        "record": "Order",
                        "predicate": {"kind": "comparison", "op": "gt", "left": field("total"), "right": {"kind": "literal", "value": 10}},
                        "updates": [{"field": "note", "expression": {"kind": "literal", "value": "discounted"}}]
                    }
                ]
            },
            {
                "name": "purge",
                "body": [{"kind": "delete", "record": "Order", "predicate": {"kind": "comparison", "op": "eq", "left": field("customer"), "right": input("customer")}}]
            }
        ]
    }))
    .unwrap()
}

fn seed_orders() -> serde_json::Value {
    json!({"orders": [
        {"customer": "ada", "total": 5},
        {"customer": "grace", "total": 12.5, "note": "rush"},
        {"customer": "void", "total": 40},
        {"customer": "linus", "total": 20}
    ]})
}

fn engine(store: MemoryStore, config: RuntimeConfig, tenant_key: Option<serde_json::Value>) -> Engine {
    Engine::new(program(tenant_key), config, Arc::new(store)).unwrap()
}

fn customers(value: &serde_json::Value) -> Vec<String> {
    let mut names: Vec<String> = value
        .as_array()
        .unwrap()
        .iter()
        .map(|r| r["customer"].as_str().unwrap().to_string())
        .collect();
    names.sort();
    names
}

// ──────────────────────────────────────────────
// Closure and SQL agree
// ──────────────────────────────────────────────

#[test]
fn sql_and_closure_plans_select_the_same_rows() {
    let cases = [
        ("large", json!({"min": 10})),
        ("unnoted", json!({})),
        ("not_large", json!({})),
        ("everything", json!({})),
    ];
    let memory = engine(MemoryStore::new(), RuntimeConfig::default(), None);
    let sqlite = engine(MemoryStore::with_dialect(StoreDialect::Sqlite), RuntimeConfig::default(), None);
    for engine in [&memory, &sqlite] {
        assert!(engine.run_flow("seed", seed_orders(), Caller::anonymous()).is_ok());
    }
    for (flow, input) in cases {
        let a = memory.run_flow(flow, input.clone(), Caller::anonymous());
        let b = sqlite.run_flow(flow, input, Caller::anonymous());
        assert_eq!(
            customers(a.result.as_ref().unwrap()),
            customers(b.result.as_ref().unwrap()),
            "flow {}",
            flow
        );
    }
    let large = memory.run_flow("large", json!({"min": 10}), Caller::anonymous());
    assert_eq!(customers(&large.result.unwrap()), vec!["grace", "linus"]);
}

#[test]
fn ordering_a_text_field_fails_the_same_way_on_both_stores() {
    let memory = engine(MemoryStore::new(), RuntimeConfig::default(), None);
    let sqlite = engine(MemoryStore::with_dialect(StoreDialect::Sqlite), RuntimeConfig::default(), None);
    for engine in [&memory, &sqlite] {
        assert!(engine.run_flow("seed", seed_orders(), Caller::anonymous()).is_ok());
        let result = engine.run_flow("customer_above", json!({}), Caller::anonymous());
        assert_eq!(result.result.unwrap_err().kind(), "storage");
    }
}

#[test]
fn large_integers_match_exactly_on_both_stores() {
    let memory = engine(MemoryStore::new(), RuntimeConfig::default(), None);
    let sqlite = engine(MemoryStore::with_dialect(StoreDialect::Sqlite), RuntimeConfig::default(), None);
    let big = json!({"orders": [{"customer": "whale", "total": 9007199254740992_i64}]});
    for engine in [&memory, &sqlite] {
        assert!(engine.run_flow("seed", big.clone(), Caller::anonymous()).is_ok());

        let off_by_one = engine.run_flow(
            "exact_total",
            json!({"total": 9007199254740993_i64}),
            Caller::anonymous(),
        );
        assert_eq!(off_by_one.result.unwrap(), json!([]));

        let exact = engine.run_flow(
            "exact_total",
            json!({"total": 9007199254740992_i64}),
            Caller::anonymous(),
        );
        assert_eq!(customers(&exact.result.unwrap()), vec!["whale"]);
    }
}

#[test]
fn strict_sql_rejects_uncompilable_predicates() {
    let mut config = RuntimeConfig::default();
    config.store.strict_sql = true;
    let engine = engine(MemoryStore::with_dialect(StoreDialect::Postgres), config, None);
    assert!(engine.run_flow("seed", seed_orders(), Caller::anonymous()).is_ok());

    let result = engine.run_flow("not_large", json!({}), Caller::anonymous());
    assert_eq!(result.result.unwrap_err().kind(), "sql_required");

    let result = engine.run_flow("large", json!({"min": 10}), Caller::anonymous());
    assert_eq!(customers(&result.result.unwrap()), vec!["grace", "linus"]);
}

#[test]
fn strict_sql_is_ignored_by_stores_without_sql() {
    let mut config = RuntimeConfig::default();
    config.store.strict_sql = true;
    let engine = engine(MemoryStore::new(), config, None);
    assert!(engine.run_flow("seed", seed_orders(), Caller::anonymous()).is_ok());
    let result = engine.run_flow("not_large", json!({}), Caller::anonymous());
    assert_eq!(customers(&result.result.unwrap()), vec!["ada"]);
}

// ──────────────────────────────────────────────
// Writes
// ──────────────────────────────────────────────

#[test]
fn create_validates_the_payload() {
    let engine = engine(MemoryStore::new(), RuntimeConfig::default(), None);
    let result = engine.run_flow(
        "seed",
        json!({"orders": [{"customer": "ada", "total": "lots"}]}),
        Caller::anonymous(),
    );
    assert_eq!(result.result.unwrap_err().kind(), "invalid_payload");

    let result = engine.run_flow(
        "seed",
        json!({"orders": [{"customer": "ada", "total": 1, "colour": "red"}]}),
        Caller::anonymous(),
    );
    assert_eq!(result.result.unwrap_err().kind(), "unknown_field");
}

#[test]
fn writes_emit_change_markers() {
    let engine = engine(MemoryStore::new(), RuntimeConfig::default(), None);
    let seeded = engine.run_flow("seed", seed_orders(), Caller::anonymous());
    assert_eq!(seeded.changes.len(), 4);
    assert!(seeded.changes.iter().all(|c| c.record == "Order"));

    let updated = engine.run_flow("discount", json!({}), Caller::anonymous());
    assert_eq!(updated.result.unwrap(), json!(3));
    assert_eq!(updated.changes.len(), 3);

    let purged = engine.run_flow("purge", json!({"customer": "void"}), Caller::anonymous());
    assert_eq!(purged.result.unwrap(), json!(1));
    let left = engine.run_flow("everything", json!({}), Caller::anonymous());
    assert_eq!(customers(&left.result.unwrap()), vec!["ada", "grace", "linus"]);
}

// ──────────────────────────────────────────────
// Tenant scoping
// ──────────────────────────────────────────────

#[test]
fn tenants_only_see_their_own_rows() {
    let store = Arc::new(MemoryStore::new());
    let tenant_key = Some(json!({"kind": "attr", "base": "identity", "attrs": ["org"]}));
    let engine = Engine::new(program(tenant_key), RuntimeConfig::default(), store.clone()).unwrap();
    let acme = || Caller::authenticated(json!({"id": "u1", "org": "acme"}));
    let globex = || Caller::authenticated(json!({"id": "u2", "org": "globex"}));

    assert!(engine.run_flow("seed", seed_orders(), acme()).is_ok());
    assert!(engine
        .run_flow("seed", json!({"orders": [{"customer": "hank", "total": 99}]}), globex())
        .is_ok());

    let mine = engine.run_flow("everything", json!({}), globex());
    assert_eq!(customers(&mine.result.unwrap()), vec!["hank"]);

    let theirs = engine.run_flow("large", json!({"min": 10}), acme());
    assert_eq!(customers(&theirs.result.unwrap()), vec!["grace", "linus"]);

    // Globex cannot touch Acme's rows.
    let purged = engine.run_flow("purge", json!({"customer": "ada"}), globex());
    assert_eq!(purged.result.unwrap(), json!(0));

    let rows = store.rows("Order").unwrap();
    assert_eq!(rows.len(), 5);
    assert!(rows.iter().all(|r| r.contains_key(TENANT_KEY_FIELD)));
}

#[test]
fn missing_tenant_claim_is_an_error() {
    let tenant_key = Some(json!({"kind": "attr", "base": "identity", "attrs": ["org"]}));
    let engine = engine(MemoryStore::new(), RuntimeConfig::default(), tenant_key);
    let result = engine.run_flow("everything", json!({}), Caller::authenticated(json!({"id": "u1"})));
    assert_eq!(result.result.unwrap_err().kind(), "invalid");
}
