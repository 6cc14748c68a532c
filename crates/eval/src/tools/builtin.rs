//! In-process builtin tools.

use serde_json::{json, Map, Value as Json};

use crate::context::LogicalClock;

use super::runner::ToolFailure;

type BuiltinFn = fn(&Map<String, Json>, i64) -> Result<Json, ToolFailure>;

const BUILTINS: &[(&str, BuiltinFn)] = &[
    ("echo", echo),
    ("text_length", text_length),
    ("current_time", current_time),
];

pub fn lookup(name: &str) -> Option<BuiltinFn> {
    BUILTINS
        .iter()
        .find(|(builtin, _)| *builtin == name)
        .map(|(_, f)| *f)
}

pub fn is_builtin(name: &str) -> bool {
    lookup(name).is_some()
}

fn echo(payload: &Map<String, Json>, _now: i64) -> Result<Json, ToolFailure> {
    Ok(Json::Object(payload.clone()))
}

fn text_length(payload: &Map<String, Json>, _now: i64) -> Result<Json, ToolFailure> {
    let text = payload
        .get("text")
        .and_then(Json::as_str)
        .ok_or_else(|| ToolFailure::new("invalid_input", "text_length needs a \"text\" string"))?;
    Ok(json!({"length": text.chars().count()}))
}

fn current_time(_payload: &Map<String, Json>, now: i64) -> Result<Json, ToolFailure> {
    Ok(json!({"unix": now, "iso": LogicalClock::format(now)}))
}
