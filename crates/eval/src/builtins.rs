//! Builtin functions callable from expressions.

use std::collections::BTreeMap;

use base64::Engine as _;

use namel3ss_ir::Span;

use crate::context::ExecutionContext;
use crate::error::RuntimeError;
use crate::value::Value;

pub fn call(
    ctx: &ExecutionContext,
    name: &str,
    args: &[Value],
    span: Span,
) -> Result<Value, RuntimeError> {
    match name {
        "length" => {
            let [target] = arity::<1>(name, args, span)?;
            match target {
                Value::Text(s) => Ok(Value::from(s.chars().count())),
                Value::List(items) => Ok(Value::from(items.len())),
                Value::Map(map) => Ok(Value::from(map.len())),
                other => Err(type_mismatch(name, "text, list or map", other, span)),
            }
        }
        "keys" => {
            let [target] = arity::<1>(name, args, span)?;
            match target {
                Value::Map(map) => Ok(Value::List(map.keys().cloned().map(Value::Text).collect())),
                other => Err(type_mismatch(name, "map", other, span)),
            }
        }
        "has_role" => {
            let (identity, role) = claim_args(ctx, name, args, span)?;
            Ok(Value::Bool(claim_contains(identity, "role", "roles", role)))
        }
        "has_permission" => {
            let (identity, permission) = claim_args(ctx, name, args, span)?;
            Ok(Value::Bool(claim_contains(
                identity,
                "permission",
                "permissions",
                permission,
            )))
        }
        "secret" => {
            let [key] = arity::<1>(name, args, span)?;
            let key = text(name, key, span)?;
            ctx.config()
                .secrets
                .get(key)
                .map(|s| Value::Text(s.clone()))
                .ok_or_else(|| RuntimeError::Config(format!("secret \"{}\" is not configured", key)))
        }
        "auth_bearer" => {
            let [token] = arity::<1>(name, args, span)?;
            let token = text(name, token, span)?;
            Ok(header("Authorization", format!("Bearer {}", token)))
        }
        "auth_basic" => {
            let [user, password] = arity::<2>(name, args, span)?;
            let credentials = format!("{}:{}", text(name, user, span)?, text(name, password, span)?);
            let encoded = base64::engine::general_purpose::STANDARD.encode(credentials);
            Ok(header("Authorization", format!("Basic {}", encoded)))
        }
        "auth_header" => {
            let [key, value] = arity::<2>(name, args, span)?;
            Ok(header(text(name, key, span)?, text(name, value, span)?.to_string()))
        }
        other => Err(RuntimeError::UnknownFunction {
            name: other.to_string(),
        }),
    }
}

fn arity<'a, const N: usize>(
    name: &str,
    args: &'a [Value],
    span: Span,
) -> Result<&'a [Value; N], RuntimeError> {
    args.try_into().map_err(|_| {
        RuntimeError::invalid(
            format!("{} takes {} argument(s), got {}", name, N, args.len()),
            span,
        )
    })
}

/// `has_role(role)` reads the caller identity; `has_role(identity, role)`
/// checks an explicit claims map.
fn claim_args<'a>(
    ctx: &'a ExecutionContext,
    name: &str,
    args: &'a [Value],
    span: Span,
) -> Result<(&'a Value, &'a Value), RuntimeError> {
    const ANONYMOUS: &Value = &Value::Null;
    match args {
        [wanted] => Ok((ctx.identity.as_ref().unwrap_or(ANONYMOUS), wanted)),
        [identity, wanted] => Ok((identity, wanted)),
        _ => Err(RuntimeError::invalid(
            format!("{} takes 1 or 2 argument(s), got {}", name, args.len()),
            span,
        )),
    }
}

fn text<'a>(name: &str, value: &'a Value, span: Span) -> Result<&'a str, RuntimeError> {
    value
        .as_text()
        .ok_or_else(|| type_mismatch(name, "text", value, span))
}

fn type_mismatch(name: &str, expected: &str, got: &Value, span: Span) -> RuntimeError {
    RuntimeError::type_error(
        format!("{} expects {}, got {}", name, expected, got.type_name()),
        span,
    )
}

fn header(key: &str, value: String) -> Value {
    let mut map = BTreeMap::new();
    map.insert(key.to_string(), Value::Text(value));
    Value::Map(map)
}

/// True when `identity.<single>` equals `wanted` or `identity.<plural>`
/// contains it.
fn claim_contains(identity: &Value, single: &str, plural: &str, wanted: &Value) -> bool {
    let Some(claims) = identity.as_map() else {
        return false;
    };
    if claims.get(single) == Some(wanted) {
        return true;
    }
    claims
        .get(plural)
        .and_then(Value::as_list)
        .is_some_and(|items| items.contains(wanted))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn role_claims_accept_single_and_list_forms() {
        let single = Value::from_json(&json!({"role": "admin"})).unwrap();
        let many = Value::from_json(&json!({"roles": ["viewer", "admin"]})).unwrap();
        let admin = Value::from("admin");
        assert!(claim_contains(&single, "role", "roles", &admin));
        assert!(claim_contains(&many, "role", "roles", &admin));
        assert!(!claim_contains(&Value::Null, "role", "roles", &admin));
    }
}
