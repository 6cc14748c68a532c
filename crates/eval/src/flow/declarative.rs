//! Declarative flows: a fixed sequence of input, require, create, update,
//! delete and foreign-call steps.
//!
//! Each step records one `flow_step` trace. A failing `require` marks the
//! step `blocked`, every later step `skipped`, and then raises the denial.

use std::collections::BTreeMap;

use namel3ss_ir::{Expression, Flow, FlowStep, Span};

use crate::context::ExecutionContext;
use crate::error::RuntimeError;
use crate::expr::{eval_args, eval_expr};
use crate::guards::{check_requires, GuardOutcome};
use crate::records;
use crate::tools;
use crate::trace::TraceEvent;
use crate::value::Value;

pub(super) fn run_steps(
    ctx: &mut ExecutionContext,
    flow: &Flow,
    steps: &[FlowStep],
    input: &Value,
) -> Result<Value, RuntimeError> {
    let mut denial: Option<RuntimeError> = None;
    for (index, step) in steps.iter().enumerate() {
        if denial.is_some() {
            record(ctx, flow, step, index, "skipped");
            continue;
        }
        match run_step(ctx, flow, step, input) {
            Ok(StepResult::Ran) => record(ctx, flow, step, index, "ran"),
            Ok(StepResult::Blocked(err)) => {
                record(ctx, flow, step, index, "blocked");
                denial = Some(err);
            }
            Err(err) => {
                record(ctx, flow, step, index, "failed");
                return Err(err);
            }
        }
    }
    match denial {
        Some(err) => Err(err),
        None => Ok(ctx.last_value.clone()),
    }
}

enum StepResult {
    Ran,
    Blocked(RuntimeError),
}

fn run_step(
    ctx: &mut ExecutionContext,
    flow: &Flow,
    step: &FlowStep,
    input: &Value,
) -> Result<StepResult, RuntimeError> {
    match step {
        FlowStep::Input { fields, span } => {
            let Some(values) = input.as_map() else {
                return Err(RuntimeError::Contract {
                    flow: flow.name.clone(),
                    message: format!("input must be a map, got {}", input.type_name()),
                });
            };
            for field in fields {
                let value = values.get(&field.name).unwrap_or(&Value::Null);
                if value.is_null() || !value.matches_type(&field.type_name) {
                    return Err(RuntimeError::InvalidPayload {
                        record: flow.name.clone(),
                        message: format!(
                            "input \"{}\" must be {}, got {}",
                            field.name,
                            field.type_name,
                            value.type_name()
                        ),
                        span: *span,
                    });
                }
            }
        }
        FlowStep::Require { condition, .. } => {
            let subject = format!("flow {}", flow.name);
            if let GuardOutcome::Denied(err) = check_requires(ctx, condition, &subject)? {
                return Ok(StepResult::Blocked(err));
            }
        }
        FlowStep::Create {
            record,
            fields,
            span,
        } => {
            let mut values = BTreeMap::new();
            for field in fields {
                values.insert(field.name.clone(), eval_expr(ctx, &field.value)?);
            }
            ctx.last_value = records::create(ctx, record, Value::Map(values), *span)?;
        }
        FlowStep::Update {
            record,
            selector,
            updates,
            span,
        } => {
            let predicate = selector.clone().unwrap_or_else(|| match_all(*span));
            let updates: Vec<_> = updates
                .iter()
                .map(|u| (u.name.clone(), u.value.clone()))
                .collect();
            let count = records::update(ctx, record, &predicate, &updates, *span)?;
            ctx.last_value = Value::from(count);
        }
        FlowStep::Delete {
            record,
            selector,
            span,
        } => {
            let predicate = selector.clone().unwrap_or_else(|| match_all(*span));
            let count = records::delete(ctx, record, &predicate, *span)?;
            ctx.last_value = Value::from(count);
        }
        FlowStep::CallForeign {
            name, arguments, ..
        } => {
            let args = eval_args(ctx, arguments)?;
            ctx.last_value = tools::call_from_flow(ctx, name, args)?;
        }
    }
    Ok(StepResult::Ran)
}

fn match_all(span: Span) -> Expression {
    Expression::Literal {
        value: serde_json::Value::Bool(true),
        span,
    }
}

fn record(
    ctx: &mut ExecutionContext,
    flow: &Flow,
    step: &FlowStep,
    index: usize,
    status: &'static str,
) {
    ctx.traces.push(TraceEvent::FlowStep {
        flow: flow.name.clone(),
        step: step.kind_name().to_string(),
        index,
        status,
    });
}
