//! Loading runtime configuration from disk and feeding it to the engine.

use std::fs;
use std::sync::Arc;

use namel3ss_eval::{Caller, Engine, RuntimeConfig};
use namel3ss_ir::Program;
use namel3ss_storage::MemoryStore;
use serde_json::json;

#[test]
fn relative_project_root_resolves_against_the_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("namel3ss.toml");
    fs::write(
        &path,
        r#"
project_root = "app"

[tools]
bindings_path = "tools.yaml"
"#,
    )
    .unwrap();

    let config = RuntimeConfig::load(&path).unwrap();
    assert_eq!(config.project_root(), dir.path().join("app"));
    assert_eq!(config.bindings_file(), dir.path().join("app").join("tools.yaml"));
}

#[test]
fn missing_file_is_a_config_error() {
    let dir = tempfile::tempdir().unwrap();
    let err = RuntimeConfig::load(&dir.path().join("absent.toml")).unwrap_err();
    assert_eq!(err.kind(), "config");
}

#[test]
fn loaded_limits_apply_to_flows() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("namel3ss.toml");
    fs::write(&path, "[limits]\nmax_repeat_while = 3\n").unwrap();
    let config = RuntimeConfig::load(&path).unwrap();

    let program = Program::from_json(&json!({
        "flows": [{
            "name": "spin",
            "body": [
                {"kind": "let", "name": "n", "expression": {"kind": "literal", "value": 0}},
                {
                    "kind": "repeat_while",
                    "condition": {"kind": "comparison", "op": "lt",
                        "left": {"kind": "var", "name": "n"}, "right": {"kind": "literal", "value": 10}},
                    "body": [{"kind": "set", "target": {"kind": "local", "name": "n"}, "expression": {
                        "kind": "binary", "op": "+",
                        "left": {"kind": "var", "name": "n"}, "right": {"kind": "literal", "value": 1}}}]
                }
            ]
        }]
    }))
    .unwrap();
    let engine = Engine::new(program, config, Arc::new(MemoryStore::new())).unwrap();
    let result = engine.run_flow("spin", json!({}), Caller::anonymous());
    assert_eq!(result.result.unwrap_err().kind(), "limit");
}

#[test]
fn secrets_section_is_kept_verbatim() {
    let config = RuntimeConfig::from_toml_str("[secrets]\nSTRIPE_KEY = \"sk_test\"\n").unwrap();
    assert_eq!(config.secrets.get("STRIPE_KEY").map(String::as_str), Some("sk_test"));
}
