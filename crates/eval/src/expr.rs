//! Expression evaluation.

use std::collections::BTreeMap;

use namel3ss_ir::{Argument, BinaryOp, Expression, ListOpKind, MapOpKind, Span};

use crate::builtins;
use crate::context::ExecutionContext;
use crate::error::RuntimeError;
use crate::flow;
use crate::ops;
use crate::tools;
use crate::value::Value;

pub fn eval_expr(ctx: &mut ExecutionContext, expr: &Expression) -> Result<Value, RuntimeError> {
    match expr {
        Expression::Literal { value, span } => Value::from_json(value).map_err(|e| match e {
            RuntimeError::NumberRange { value, .. } => RuntimeError::NumberRange { value, span: *span },
            other => other,
        }),
        Expression::Var { name, span } => lookup(ctx, name, *span),
        Expression::Attr { base, attrs, span } => {
            let root = lookup(ctx, base, *span)?;
            // Missing identity claims read as null so guards can fail cleanly.
            let lenient = base == "identity";
            walk_attrs(root, base, attrs, lenient, *span)
        }
        Expression::StatePath { path, span } => {
            let Some((first, rest)) = path.split_first() else {
                return Ok(Value::Map(ctx.runtime.state().clone()));
            };
            let root = ctx
                .runtime
                .state()
                .get(first)
                .cloned()
                .ok_or_else(|| RuntimeError::MissingAttribute {
                    base: "state".to_string(),
                    attr: first.clone(),
                    span: *span,
                })?;
            walk_attrs(root, &format!("state.{}", first), rest, false, *span)
        }
        Expression::Unary { op, operand, span } => {
            let value = eval_expr(ctx, operand)?;
            ops::unary(*op, &value, *span)
        }
        Expression::Binary {
            op: op @ (BinaryOp::And | BinaryOp::Or),
            left,
            right,
            span,
        } => {
            let l = eval_expr(ctx, left)?;
            let l = ops::expect_bool(&l, &format!("left operand of '{}'", op.symbol()), *span)?;
            match (op, l) {
                (BinaryOp::And, false) => return Ok(Value::Bool(false)),
                (BinaryOp::Or, true) => return Ok(Value::Bool(true)),
                _ => {}
            }
            let r = eval_expr(ctx, right)?;
            let r = ops::expect_bool(&r, &format!("right operand of '{}'", op.symbol()), *span)?;
            Ok(Value::Bool(r))
        }
        Expression::Binary {
            op,
            left,
            right,
            span,
        } => {
            let l = eval_expr(ctx, left)?;
            let r = eval_expr(ctx, right)?;
            ops::binary(*op, &l, &r, *span)
        }
        Expression::Comparison {
            op,
            left,
            right,
            span,
        } => {
            let l = eval_expr(ctx, left)?;
            let r = eval_expr(ctx, right)?;
            ops::compare(*op, &l, &r, *span).map(Value::Bool)
        }
        Expression::List { items, .. } => items
            .iter()
            .map(|item| eval_expr(ctx, item))
            .collect::<Result<Vec<_>, _>>()
            .map(Value::List),
        Expression::Map { entries, span } => {
            let mut map = BTreeMap::new();
            for entry in entries {
                let key = eval_expr(ctx, &entry.key)?;
                let Value::Text(key) = key else {
                    return Err(RuntimeError::type_error(
                        format!("map keys must be text, got {}", key.type_name()),
                        *span,
                    ));
                };
                let value = eval_expr(ctx, &entry.value)?;
                map.insert(key, value);
            }
            Ok(Value::Map(map))
        }
        Expression::ListOp {
            op,
            target,
            value,
            span,
        } => {
            let target = eval_expr(ctx, target)?;
            let operand = match value {
                Some(v) => Some(eval_expr(ctx, v)?),
                None => None,
            };
            list_op(*op, target, operand, *span)
        }
        Expression::ListMap {
            var,
            target,
            body,
            span,
        } => {
            let items = expect_list(eval_expr(ctx, target)?, "list map", *span)?;
            with_binding(ctx, var, |ctx| {
                items
                    .into_iter()
                    .map(|item| {
                        ctx.locals.insert(var.clone(), item);
                        eval_expr(ctx, body)
                    })
                    .collect::<Result<Vec<_>, _>>()
                    .map(Value::List)
            })
        }
        Expression::ListFilter {
            var,
            target,
            predicate,
            span,
        } => {
            let items = expect_list(eval_expr(ctx, target)?, "list filter", *span)?;
            with_binding(ctx, var, |ctx| {
                let mut kept = Vec::new();
                for item in items {
                    ctx.locals.insert(var.clone(), item.clone());
                    let keep = eval_expr(ctx, predicate)?;
                    if ops::expect_bool(&keep, "filter predicate", *span)? {
                        kept.push(item);
                    }
                }
                Ok(Value::List(kept))
            })
        }
        Expression::ListReduce {
            acc,
            var,
            target,
            start,
            body,
            span,
        } => {
            let items = expect_list(eval_expr(ctx, target)?, "list reduce", *span)?;
            let initial = eval_expr(ctx, start)?;
            with_binding(ctx, acc, |ctx| {
                with_binding(ctx, var, |ctx| {
                    let mut accumulator = initial;
                    for item in items {
                        ctx.locals.insert(acc.clone(), accumulator);
                        ctx.locals.insert(var.clone(), item);
                        accumulator = eval_expr(ctx, body)?;
                    }
                    Ok(accumulator)
                })
            })
        }
        Expression::MapOp {
            op,
            target,
            key,
            value,
            span,
        } => {
            let target = eval_expr(ctx, target)?;
            let key = match key {
                Some(k) => Some(eval_expr(ctx, k)?),
                None => None,
            };
            let value = match value {
                Some(v) => Some(eval_expr(ctx, v)?),
                None => None,
            };
            map_op(*op, target, key, value, *span)
        }
        Expression::CallFunction { name, args, span } => {
            let args = eval_args(ctx, args)?;
            flow::call_function(ctx, name, args, *span)
        }
        Expression::CallFlow { flow, args, .. } => {
            let args = eval_args(ctx, args)?;
            flow::call_flow(ctx, flow, args)
        }
        Expression::CallPipeline { pipeline, args, .. } => {
            let args = eval_args(ctx, args)?;
            flow::call_pipeline(ctx, pipeline, args)
        }
        Expression::ToolCall { tool, args, .. } => {
            let args = eval_args(ctx, args)?;
            tools::call_from_flow(ctx, tool, args)
        }
        Expression::Builtin { name, args, span } => {
            let args = args
                .iter()
                .map(|a| eval_expr(ctx, a))
                .collect::<Result<Vec<_>, _>>()?;
            builtins::call(ctx, name, &args, *span)
        }
    }
}

/// Evaluate named call arguments in order.
pub fn eval_args(
    ctx: &mut ExecutionContext,
    args: &[Argument],
) -> Result<BTreeMap<String, Value>, RuntimeError> {
    let mut out = BTreeMap::new();
    for arg in args {
        let value = eval_expr(ctx, &arg.value)?;
        out.insert(arg.name.clone(), value);
    }
    Ok(out)
}

fn lookup(ctx: &ExecutionContext, name: &str, span: Span) -> Result<Value, RuntimeError> {
    if let Some(value) = ctx.locals.get(name) {
        return Ok(value.clone());
    }
    if name == "identity" {
        return Ok(ctx.identity_value());
    }
    Err(RuntimeError::UnknownVariable {
        name: name.to_string(),
        span,
    })
}

fn walk_attrs(
    mut current: Value,
    base: &str,
    attrs: &[String],
    lenient: bool,
    span: Span,
) -> Result<Value, RuntimeError> {
    for attr in attrs {
        current = match current {
            Value::Map(mut map) => match map.remove(attr) {
                Some(next) => next,
                None if lenient => Value::Null,
                None => {
                    return Err(RuntimeError::MissingAttribute {
                        base: base.to_string(),
                        attr: attr.clone(),
                        span,
                    })
                }
            },
            Value::Null if lenient => Value::Null,
            other => {
                return Err(RuntimeError::type_error(
                    format!("cannot read \"{}\" from {}", attr, other.type_name()),
                    span,
                ))
            }
        };
    }
    Ok(current)
}

/// Run `f` with `name` available as a scratch local, restoring any prior
/// binding afterwards.
fn with_binding<T>(
    ctx: &mut ExecutionContext,
    name: &str,
    f: impl FnOnce(&mut ExecutionContext) -> Result<T, RuntimeError>,
) -> Result<T, RuntimeError> {
    let saved = ctx.locals.remove(name);
    let result = f(ctx);
    match saved {
        Some(previous) => {
            ctx.locals.insert(name.to_string(), previous);
        }
        None => {
            ctx.locals.remove(name);
        }
    }
    result
}

fn expect_list(value: Value, what: &str, span: Span) -> Result<Vec<Value>, RuntimeError> {
    match value {
        Value::List(items) => Ok(items),
        other => Err(RuntimeError::type_error(
            format!("{} needs a list, got {}", what, other.type_name()),
            span,
        )),
    }
}

fn list_op(
    op: ListOpKind,
    target: Value,
    operand: Option<Value>,
    span: Span,
) -> Result<Value, RuntimeError> {
    let mut items = expect_list(target, "list operation", span)?;
    match op {
        ListOpKind::Length => Ok(Value::from(items.len())),
        ListOpKind::Get => {
            let index = operand
                .as_ref()
                .and_then(Value::as_count)
                .ok_or_else(|| RuntimeError::type_error("list get needs a non-negative integer index", span))?;
            usize::try_from(index)
                .ok()
                .and_then(|i| items.get(i).cloned())
                .ok_or_else(|| {
                    RuntimeError::invalid(
                        format!("index {} is out of range for a list of {}", index, items.len()),
                        span,
                    )
                })
        }
        ListOpKind::Append => {
            items.push(operand.unwrap_or_default());
            Ok(Value::List(items))
        }
        ListOpKind::Contains => {
            let needle = operand.unwrap_or_default();
            Ok(Value::Bool(items.iter().any(|i| ops::values_equal(i, &needle))))
        }
    }
}

fn map_op(
    op: MapOpKind,
    target: Value,
    key: Option<Value>,
    value: Option<Value>,
    span: Span,
) -> Result<Value, RuntimeError> {
    let Value::Map(mut map) = target else {
        return Err(RuntimeError::type_error(
            format!("map operation needs a map, got {}", target.type_name()),
            span,
        ));
    };
    if op == MapOpKind::Keys {
        return Ok(Value::List(map.into_keys().map(Value::Text).collect()));
    }
    let key = match key {
        Some(Value::Text(k)) => k,
        Some(other) => {
            return Err(RuntimeError::type_error(
                format!("map keys must be text, got {}", other.type_name()),
                span,
            ))
        }
        None => return Err(RuntimeError::invalid("map operation needs a key", span)),
    };
    match op {
        MapOpKind::Get => map.remove(&key).ok_or(RuntimeError::MissingAttribute {
            base: "map".to_string(),
            attr: key,
            span,
        }),
        MapOpKind::Set => {
            map.insert(key, value.unwrap_or_default());
            Ok(Value::Map(map))
        }
        MapOpKind::Has => Ok(Value::Bool(map.contains_key(&key))),
        MapOpKind::Keys => Ok(Value::Null),
    }
}
