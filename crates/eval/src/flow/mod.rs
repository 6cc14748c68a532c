//! Statement interpreter.
//!
//! A flow body is walked in document order against one
//! [`ExecutionContext`]. Control constructs share the context's single
//! local scope; only function calls and nested flow calls get fresh locals.
//! `TryCatch` is the only recovery point: any other error unwinds to the
//! caller of [`run_flow`].

mod declarative;

use std::collections::BTreeMap;

use namel3ss_ir::{Assignable, Flow, FlowContract, LogLevel, MetricKind, Span, Statement};

use crate::ai;
use crate::context::{ExecutionContext, Job, LogicalClock};
use crate::error::RuntimeError;
use crate::expr::eval_expr;
use crate::guards::enforce_requires;
use crate::ops::{expect_bool, values_equal};
use crate::orchestration;
use crate::records;
use crate::tools::schema;
use crate::trace::TraceEvent;
use crate::value::Value;

/// Control signal returned by every statement.
#[derive(Debug, Clone, PartialEq)]
pub enum Exec {
    Next,
    Return(Value),
}

// ──────────────────────────────────────────────
// Flow, pipeline and function calls
// ──────────────────────────────────────────────

/// Run `flow` in `ctx` with `input` bound as the `input` local.
///
/// Checks the input contract and the `requires` guard before the body runs
/// and the output contract after it. The flow result is its `return` value,
/// or the value of the last statement when the body falls off the end.
pub fn run_flow(
    ctx: &mut ExecutionContext,
    flow: &Flow,
    input: Value,
) -> Result<Value, RuntimeError> {
    if let Some(contract) = &flow.contract {
        check_contract(flow, contract, "input", &input)?;
    }
    ctx.locals.insert("input".to_string(), input.clone());
    if let Some(requires) = &flow.requires {
        enforce_requires(ctx, requires, &format!("flow {}", flow.name))?;
    }

    let result = match (&flow.steps, flow.declarative) {
        (Some(steps), true) => declarative::run_steps(ctx, flow, steps, &input)?,
        _ => match exec_block(ctx, &flow.body)? {
            Exec::Return(value) => value,
            Exec::Next => ctx.last_value.clone(),
        },
    };

    if let Some(contract) = &flow.contract {
        check_contract(flow, contract, "output", &result)?;
    }
    Ok(result)
}

/// Look up `name` and run it in `ctx`, which must be a fresh child context.
pub fn run_flow_in(
    ctx: &mut ExecutionContext,
    name: &str,
    args: BTreeMap<String, Value>,
) -> Result<Value, RuntimeError> {
    let flow = ctx
        .program()
        .flow(name)
        .cloned()
        .ok_or_else(|| RuntimeError::UnknownFlow {
            name: name.to_string(),
        })?;
    run_flow(ctx, &flow, Value::Map(args))
}

/// Call another flow from an expression.
pub fn call_flow(
    ctx: &mut ExecutionContext,
    name: &str,
    args: BTreeMap<String, Value>,
) -> Result<Value, RuntimeError> {
    let mut child = ctx.child(name)?;
    let result = run_flow_in(&mut child, name, args);
    ctx.absorb(child);
    result
}

/// Run a pipeline's steps in order. Each step receives the previous
/// step's output; non-map outputs are passed on as `{"value": output}`.
pub fn run_pipeline_in(
    ctx: &mut ExecutionContext,
    name: &str,
    args: BTreeMap<String, Value>,
) -> Result<Value, RuntimeError> {
    let pipeline = ctx
        .program()
        .pipeline(name)
        .cloned()
        .ok_or_else(|| RuntimeError::UnknownPipeline {
            name: name.to_string(),
        })?;
    let mut current = Value::Map(args);
    for step in &pipeline.steps {
        let args = match current {
            Value::Map(map) => map,
            other => BTreeMap::from([("value".to_string(), other)]),
        };
        current = call_flow(ctx, step, args)?;
    }
    Ok(current)
}

pub fn call_pipeline(
    ctx: &mut ExecutionContext,
    name: &str,
    args: BTreeMap<String, Value>,
) -> Result<Value, RuntimeError> {
    let mut child = ctx.child(name)?;
    let result = run_pipeline_in(&mut child, name, args);
    ctx.absorb(child);
    result
}

/// Call a user function. Functions see only their parameters and may not
/// write state.
pub fn call_function(
    ctx: &mut ExecutionContext,
    name: &str,
    args: BTreeMap<String, Value>,
    span: Span,
) -> Result<Value, RuntimeError> {
    let function = ctx
        .program()
        .function(name)
        .cloned()
        .ok_or_else(|| RuntimeError::UnknownFunction {
            name: name.to_string(),
        })?;
    if let Some(extra) = args.keys().find(|k| !function.params.contains(k)) {
        return Err(RuntimeError::invalid(
            format!("function \"{}\" has no parameter \"{}\"", name, extra),
            span,
        ));
    }
    if let Some(missing) = function.params.iter().find(|p| !args.contains_key(*p)) {
        return Err(RuntimeError::invalid(
            format!("function \"{}\" is missing argument \"{}\"", name, missing),
            span,
        ));
    }
    let max = ctx.config().limits.max_call_depth;
    if ctx.function_depth + ctx.call_depth >= max {
        return Err(RuntimeError::Limit {
            message: format!("call depth exceeded {} calling \"{}\"", max, name),
            span,
        });
    }

    let saved_locals = std::mem::replace(&mut ctx.locals, args);
    let saved_constants = std::mem::take(&mut ctx.constants);
    let saved_last = std::mem::take(&mut ctx.last_value);
    ctx.function_depth += 1;
    let result = exec_block(ctx, &function.body);
    ctx.function_depth -= 1;
    ctx.locals = saved_locals;
    ctx.constants = saved_constants;
    ctx.last_value = saved_last;

    match result? {
        Exec::Return(value) => Ok(value),
        Exec::Next => Ok(Value::Null),
    }
}

fn check_contract(
    flow: &Flow,
    contract: &FlowContract,
    direction: &str,
    value: &Value,
) -> Result<(), RuntimeError> {
    let fields = match direction {
        "input" => &contract.inputs,
        _ => &contract.outputs,
    };
    if fields.is_empty() {
        return Ok(());
    }
    let serde_json::Value::Object(object) = value.to_json() else {
        return Err(RuntimeError::Contract {
            flow: flow.name.clone(),
            message: format!("{} must be a map, got {}", direction, value.type_name()),
        });
    };
    schema::validate_fields(direction, fields, &object).map_err(|message| {
        RuntimeError::Contract {
            flow: flow.name.clone(),
            message,
        }
    })
}

// ──────────────────────────────────────────────
// Statements
// ──────────────────────────────────────────────

pub fn exec_block(ctx: &mut ExecutionContext, body: &[Statement]) -> Result<Exec, RuntimeError> {
    for stmt in body {
        if let Exec::Return(value) = exec_stmt(ctx, stmt)? {
            return Ok(Exec::Return(value));
        }
    }
    Ok(Exec::Next)
}

pub fn exec_stmt(ctx: &mut ExecutionContext, stmt: &Statement) -> Result<Exec, RuntimeError> {
    match stmt {
        Statement::Let {
            name,
            expression,
            constant,
            span,
        } => {
            let value = eval_expr(ctx, expression)?;
            assign_local(ctx, name, value, *span)?;
            if *constant {
                ctx.constants.insert(name.clone());
            }
        }
        Statement::Set {
            target,
            expression,
            span,
        } => match target {
            Assignable::Local { name } => {
                let value = eval_expr(ctx, expression)?;
                assign_local(ctx, name, value, *span)?;
            }
            Assignable::StatePath { path } => {
                if ctx.parallel_mode {
                    return Err(state_write("Parallel tasks cannot change state", *span));
                }
                if ctx.function_depth > 0 {
                    return Err(state_write("Functions cannot change state", *span));
                }
                let value = eval_expr(ctx, expression)?;
                set_state(ctx, path, value.clone(), *span)?;
                ctx.last_value = value;
            }
        },
        Statement::If {
            condition,
            then_body,
            else_body,
            span,
        } => {
            let value = eval_expr(ctx, condition)?;
            let body = if expect_bool(&value, "if condition", *span)? {
                then_body
            } else {
                else_body
            };
            return exec_block(ctx, body);
        }
        Statement::Return { expression, .. } => {
            let value = eval_expr(ctx, expression)?;
            ctx.last_value = value.clone();
            return Ok(Exec::Return(value));
        }
        Statement::Repeat { count, body, span } => {
            let value = eval_expr(ctx, count)?;
            let times = value.as_count().ok_or_else(|| {
                RuntimeError::type_error(
                    format!("repeat count must be a non-negative integer, got {}", value),
                    *span,
                )
            })?;
            for _ in 0..times {
                if let Exec::Return(value) = exec_block(ctx, body)? {
                    return Ok(Exec::Return(value));
                }
            }
        }
        Statement::RepeatWhile {
            condition,
            limit,
            body,
            span,
        } => {
            let limit = limit.unwrap_or(ctx.config().limits.max_repeat_while);
            let mut iterations = 0u64;
            loop {
                let value = eval_expr(ctx, condition)?;
                if !expect_bool(&value, "repeat while condition", *span)? {
                    break;
                }
                iterations += 1;
                if iterations > limit {
                    return Err(RuntimeError::Limit {
                        message: format!("repeat while exceeded {} iterations", limit),
                        span: *span,
                    });
                }
                if let Exec::Return(value) = exec_block(ctx, body)? {
                    return Ok(Exec::Return(value));
                }
            }
        }
        Statement::ForEach {
            var,
            iterable,
            body,
            span,
        } => {
            let value = eval_expr(ctx, iterable)?;
            let Value::List(items) = value else {
                return Err(RuntimeError::type_error(
                    format!("for each expects a list, got {}", value.type_name()),
                    *span,
                ));
            };
            for item in items {
                assign_local(ctx, var, item, *span)?;
                if let Exec::Return(value) = exec_block(ctx, body)? {
                    return Ok(Exec::Return(value));
                }
            }
        }
        Statement::Match {
            subject,
            cases,
            otherwise,
            ..
        } => {
            let subject = eval_expr(ctx, subject)?;
            for case in cases {
                let pattern = eval_expr(ctx, &case.pattern)?;
                if values_equal(&subject, &pattern) {
                    return exec_block(ctx, &case.body);
                }
            }
            if let Some(body) = otherwise {
                return exec_block(ctx, body);
            }
        }
        Statement::TryCatch {
            try_body,
            catch_var,
            catch_body,
            ..
        } => match exec_block(ctx, try_body) {
            Ok(exec) => return Ok(exec),
            Err(err) => {
                tracing::debug!(flow = %ctx.flow_name, kind = err.kind(), "caught error");
                let mut caught = BTreeMap::new();
                caught.insert("message".to_string(), Value::Text(err.to_string()));
                caught.insert("kind".to_string(), Value::from(err.kind()));
                ctx.locals.insert(catch_var.clone(), Value::Map(caught));
                return exec_block(ctx, catch_body);
            }
        },
        Statement::Parallel {
            tasks,
            merge,
            target,
            span,
        } => {
            let value = orchestration::run_parallel(ctx, tasks, merge.as_ref(), *span)?;
            match target {
                Some(target) => assign_local(ctx, target, value, *span)?,
                None => ctx.last_value = value,
            }
        }
        Statement::Orchestration {
            branches,
            merge,
            target,
            span,
        } => {
            let value = orchestration::run_orchestration(ctx, branches, merge, *span)?;
            assign_local(ctx, target, value, *span)?;
        }
        Statement::AskAi {
            ai: name,
            input,
            target,
            span,
        } => {
            let input = eval_expr(ctx, input)?;
            let value = ai::ask_ai(ctx, name, input, None, *span)?;
            assign_local(ctx, target, value, *span)?;
        }
        Statement::RunAgent {
            agent,
            input,
            target,
            span,
        } => {
            let input = eval_expr(ctx, input)?;
            let value = ai::run_agent(ctx, agent, input, *span)?;
            assign_local(ctx, target, value, *span)?;
        }
        Statement::RunAgentsParallel {
            agents,
            target,
            span,
        } => {
            let value = ai::run_agents_parallel(ctx, agents, *span)?;
            assign_local(ctx, target, value, *span)?;
        }
        Statement::Save { record, span } => {
            ctx.last_value = records::save(ctx, record, *span)?;
        }
        Statement::Create {
            record,
            values,
            target,
            span,
        } => {
            let values = eval_expr(ctx, values)?;
            let created = records::create(ctx, record, values, *span)?;
            assign_local(ctx, target, created, *span)?;
        }
        Statement::Find {
            record,
            predicate,
            target,
            span,
        } => {
            let rows = records::find(ctx, record, predicate, *span)?;
            let target = match target {
                Some(target) => target.clone(),
                None => format!("{}_results", record.to_lowercase()),
            };
            assign_local(ctx, &target, Value::List(rows), *span)?;
        }
        Statement::Update {
            record,
            predicate,
            updates,
            span,
        } => {
            let updates: Vec<_> = updates
                .iter()
                .map(|u| (u.field.clone(), u.expression.clone()))
                .collect();
            let count = records::update(ctx, record, predicate, &updates, *span)?;
            ctx.last_value = Value::from(count);
        }
        Statement::Delete {
            record,
            predicate,
            span,
        } => {
            let count = records::delete(ctx, record, predicate, *span)?;
            ctx.last_value = Value::from(count);
        }
        Statement::EnqueueJob {
            job,
            input,
            schedule,
            span,
        } => {
            let payload = match input {
                Some(input) => eval_expr(ctx, input)?.to_json(),
                None => serde_json::json!({}),
            };
            let now = ctx.now();
            let run_at = match schedule {
                None => now,
                Some(schedule) => {
                    let value = eval_expr(ctx, &schedule.value)?;
                    let seconds = value.as_count().ok_or_else(|| {
                        RuntimeError::type_error(
                            format!("job schedule must be a non-negative integer, got {}", value),
                            *span,
                        )
                    })? as i64;
                    match schedule.kind.as_str() {
                        "after" => now + seconds,
                        "at" => seconds,
                        other => {
                            return Err(RuntimeError::invalid(
                                format!("unknown job schedule \"{}\"", other),
                                *span,
                            ))
                        }
                    }
                }
            };
            tracing::debug!(job = %job, run_at, "job enqueued");
            ctx.jobs.push(Job {
                job: job.clone(),
                payload,
                run_at,
                enqueued_at: LogicalClock::format(now),
            });
        }
        Statement::AdvanceTime { amount, span } => {
            let value = eval_expr(ctx, amount)?;
            let seconds = value.as_count().ok_or_else(|| {
                RuntimeError::type_error(
                    format!("advance time expects non-negative seconds, got {}", value),
                    *span,
                )
            })?;
            ctx.runtime.clock.advance(seconds as i64);
        }
        Statement::Log {
            level,
            message,
            fields,
            ..
        } => {
            let message = eval_expr(ctx, message)?.to_string();
            let fields = match fields {
                Some(fields) => eval_expr(ctx, fields)?.to_json(),
                None => serde_json::json!({}),
            };
            match level {
                LogLevel::Debug => tracing::debug!(flow = %ctx.flow_name, %fields, "{}", message),
                LogLevel::Info => tracing::info!(flow = %ctx.flow_name, %fields, "{}", message),
                LogLevel::Warn => tracing::warn!(flow = %ctx.flow_name, %fields, "{}", message),
                LogLevel::Error => tracing::error!(flow = %ctx.flow_name, %fields, "{}", message),
            }
            ctx.traces.push(TraceEvent::Log {
                level: level.as_str().to_string(),
                message,
                fields,
            });
        }
        Statement::Metric {
            metric,
            name,
            operation,
            value,
            labels,
            span,
        } => {
            let value = match value {
                Some(value) => eval_expr(ctx, value)?,
                None => Value::Null,
            };
            let value = match (metric, operation.as_str()) {
                (MetricKind::Counter, "increment" | "add") if value.is_null() => Value::from(1i64),
                (MetricKind::Counter, "increment" | "add") | (MetricKind::Timing, "record")
                    if value.is_number() =>
                {
                    value
                }
                (MetricKind::Timing, "record") => {
                    return Err(RuntimeError::type_error(
                        format!("timing \"{}\" needs a number", name),
                        *span,
                    ))
                }
                (MetricKind::Counter, "increment" | "add") => {
                    return Err(RuntimeError::type_error(
                        format!("counter \"{}\" needs a number", name),
                        *span,
                    ))
                }
                (_, other) => {
                    return Err(RuntimeError::invalid(
                        format!("unsupported metric operation \"{}\"", other),
                        *span,
                    ))
                }
            };
            let labels = match labels {
                Some(labels) => eval_expr(ctx, labels)?.to_json(),
                None => serde_json::json!({}),
            };
            ctx.traces.push(TraceEvent::Metric {
                metric: match metric {
                    MetricKind::Counter => "counter".to_string(),
                    MetricKind::Timing => "timing".to_string(),
                },
                name: name.clone(),
                operation: operation.clone(),
                value: value.to_json(),
                labels,
            });
        }
    }
    Ok(Exec::Next)
}

fn assign_local(
    ctx: &mut ExecutionContext,
    name: &str,
    value: Value,
    span: Span,
) -> Result<(), RuntimeError> {
    if ctx.constants.contains(name) {
        return Err(RuntimeError::invalid(
            format!("cannot assign to constant \"{}\"", name),
            span,
        ));
    }
    ctx.locals.insert(name.to_string(), value.clone());
    ctx.last_value = value;
    Ok(())
}

fn state_write(message: &str, span: Span) -> RuntimeError {
    RuntimeError::StateWrite {
        message: message.to_string(),
        span,
    }
}

/// Write `value` at `path`, creating intermediate maps.
fn set_state(
    ctx: &ExecutionContext,
    path: &[String],
    value: Value,
    span: Span,
) -> Result<(), RuntimeError> {
    let Some((last, parents)) = path.split_last() else {
        return Err(state_write("state path is empty", span));
    };
    let mut state = ctx.runtime.state();
    let mut node: &mut BTreeMap<String, Value> = &mut state;
    for (depth, key) in parents.iter().enumerate() {
        let entry = node
            .entry(key.clone())
            .or_insert_with(|| Value::Map(BTreeMap::new()));
        node = match entry {
            Value::Map(map) => map,
            other => {
                return Err(state_write(
                    &format!(
                        "state.{} is {}, not a map",
                        parents[..=depth].join("."),
                        other.type_name()
                    ),
                    span,
                ))
            }
        };
    }
    node.insert(last.clone(), value);
    Ok(())
}
