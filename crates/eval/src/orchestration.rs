//! Orchestration and parallel blocks.
//!
//! Branches run on scoped worker threads, each in its own context, and are
//! joined before the statement completes. Child contexts are absorbed in
//! declaration order, so traces, jobs and change markers come out in the
//! same order regardless of scheduling.

use std::collections::BTreeMap;

use namel3ss_ir::{
    Expression, MergeKind, MergePolicy, OrchestrationBranch, ParallelTask, Span,
};

use crate::context::ExecutionContext;
use crate::error::RuntimeError;
use crate::expr::eval_args;
use crate::flow::{self, Exec};
use crate::ops::values_equal;
use crate::trace::TraceEvent;
use crate::value::Value;

/// Outcome of a merge: the combined value and the branch it came from, for
/// policies that select a single branch.
#[derive(Debug, Clone, PartialEq)]
pub struct Merged {
    pub value: Value,
    pub selected: Option<String>,
}

/// Combine branch outcomes, given in declaration order, under `policy`.
pub fn merge(
    policy: &MergePolicy,
    outcomes: Vec<(String, Result<Value, RuntimeError>)>,
) -> Result<Merged, RuntimeError> {
    let name = policy.policy.as_str();
    match policy.policy {
        MergeKind::FirstOk => first_success(outcomes.into_iter(), name),
        MergeKind::Prefer => {
            let mut ordered: Vec<(String, Result<Value, RuntimeError>)> = Vec::new();
            let mut rest = outcomes;
            for preferred in &policy.precedence {
                if let Some(pos) = rest.iter().position(|(branch, _)| branch == preferred) {
                    ordered.push(rest.remove(pos));
                }
            }
            ordered.extend(rest);
            first_success(ordered.into_iter(), name)
        }
        MergeKind::AllOk => {
            let mut values = BTreeMap::new();
            for (branch, outcome) in outcomes {
                match outcome {
                    Ok(value) => {
                        values.insert(branch, value);
                    }
                    Err(e) => return Err(branch_failed(name, &branch, &e)),
                }
            }
            Ok(Merged {
                value: Value::Map(values),
                selected: None,
            })
        }
        MergeKind::Collect => {
            let items = outcomes
                .into_iter()
                .map(|(branch, outcome)| {
                    let mut entry = BTreeMap::new();
                    entry.insert("branch".to_string(), Value::Text(branch));
                    match outcome {
                        Ok(value) => {
                            entry.insert("ok".to_string(), Value::Bool(true));
                            entry.insert("value".to_string(), value);
                        }
                        Err(e) => {
                            entry.insert("ok".to_string(), Value::Bool(false));
                            entry.insert("error".to_string(), Value::Text(e.to_string()));
                            entry.insert("kind".to_string(), Value::from(e.kind()));
                        }
                    }
                    Value::Map(entry)
                })
                .collect();
            Ok(Merged {
                value: Value::List(items),
                selected: None,
            })
        }
        MergeKind::Strict => {
            let mut agreed: Option<(String, Value)> = None;
            for (branch, outcome) in outcomes {
                let value = outcome.map_err(|e| branch_failed(name, &branch, &e))?;
                match &agreed {
                    None => agreed = Some((branch, value)),
                    Some((first, expected)) if !values_equal(expected, &value) => {
                        return Err(RuntimeError::Orchestration {
                            policy: name,
                            message: format!(
                                "branch \"{}\" disagrees with branch \"{}\"",
                                branch, first
                            ),
                        });
                    }
                    Some(_) => {}
                }
            }
            let (_, value) = agreed.ok_or_else(|| RuntimeError::Orchestration {
                policy: name,
                message: "no branches".to_string(),
            })?;
            Ok(Merged {
                value,
                selected: None,
            })
        }
    }
}

fn first_success(
    outcomes: impl Iterator<Item = (String, Result<Value, RuntimeError>)>,
    policy: &'static str,
) -> Result<Merged, RuntimeError> {
    let mut failures = Vec::new();
    for (branch, outcome) in outcomes {
        match outcome {
            Ok(value) => {
                return Ok(Merged {
                    value,
                    selected: Some(branch),
                })
            }
            Err(e) => failures.push(format!("{}: {}", branch, e)),
        }
    }
    Err(RuntimeError::Orchestration {
        policy,
        message: format!("no branch succeeded ({})", failures.join("; ")),
    })
}

fn branch_failed(policy: &'static str, branch: &str, error: &RuntimeError) -> RuntimeError {
    RuntimeError::Orchestration {
        policy,
        message: format!("branch \"{}\" failed: {}", branch, error),
    }
}

// ── Orchestration ───────────────────────────────────────────────────

#[derive(Clone, Copy)]
enum Target<'a> {
    Flow(&'a str),
    Pipeline(&'a str),
}

struct Prepared<'a> {
    branch: &'a str,
    target: Target<'a>,
    args: BTreeMap<String, Value>,
    child: ExecutionContext,
}

/// Run every branch to completion and merge the results.
pub fn run_orchestration(
    ctx: &mut ExecutionContext,
    branches: &[OrchestrationBranch],
    policy: &MergePolicy,
    span: Span,
) -> Result<Value, RuntimeError> {
    namel3ss_ir::validate_orchestration(branches, policy)
        .map_err(|e| RuntimeError::invalid(e, span))?;

    let mut prepared = Vec::with_capacity(branches.len());
    for branch in branches {
        let (target, args) = match &branch.call {
            Expression::CallFlow { flow, args, .. } => (Target::Flow(flow), args),
            Expression::CallPipeline { pipeline, args, .. } => {
                (Target::Pipeline(pipeline), args)
            }
            _ => {
                return Err(RuntimeError::invalid(
                    format!("branch \"{}\" must call a flow or pipeline", branch.name),
                    branch.span,
                ))
            }
        };
        let args = eval_args(ctx, args)?;
        let name = match target {
            Target::Flow(name) | Target::Pipeline(name) => name,
        };
        let child = ctx.child(name)?;
        prepared.push(Prepared {
            branch: &branch.name,
            target,
            args,
            child,
        });
    }

    let finished = std::thread::scope(|scope| {
        let handles: Vec<_> = prepared
            .into_iter()
            .map(|p| {
                let branch = p.branch;
                let handle = scope.spawn(move || {
                    let Prepared {
                        target,
                        args,
                        mut child,
                        ..
                    } = p;
                    let result = match target {
                        Target::Flow(name) => flow::run_flow_in(&mut child, name, args),
                        Target::Pipeline(name) => flow::run_pipeline_in(&mut child, name, args),
                    };
                    (child, result)
                });
                (branch, handle)
            })
            .collect();
        handles
            .into_iter()
            .map(|(branch, handle)| (branch, handle.join()))
            .collect::<Vec<_>>()
    });

    let mut outcomes = Vec::with_capacity(finished.len());
    for (branch, joined) in finished {
        match joined {
            Ok((child, result)) => {
                ctx.absorb(child);
                outcomes.push((branch.to_string(), result));
            }
            Err(_) => outcomes.push((
                branch.to_string(),
                Err(RuntimeError::Orchestration {
                    policy: policy.policy.as_str(),
                    message: format!("branch \"{}\" panicked", branch),
                }),
            )),
        }
    }
    finish("orchestration", ctx, policy, outcomes)
}

fn finish(
    construct: &'static str,
    ctx: &mut ExecutionContext,
    policy: &MergePolicy,
    outcomes: Vec<(String, Result<Value, RuntimeError>)>,
) -> Result<Value, RuntimeError> {
    let failed: Vec<String> = outcomes
        .iter()
        .filter(|(_, outcome)| outcome.is_err())
        .map(|(branch, _)| branch.clone())
        .collect();
    let merged = merge(policy, outcomes);
    let selected = merged.as_ref().ok().and_then(|m| m.selected.clone());
    tracing::debug!(
        construct,
        policy = policy.policy.as_str(),
        selected = ?selected,
        failed = failed.len(),
        ok = merged.is_ok(),
        "merge finished"
    );
    ctx.traces.push(TraceEvent::Merge {
        construct,
        policy: policy.policy.as_str().to_string(),
        selected,
        failed,
    });
    merged.map(|m| m.value)
}

// ── Parallel ────────────────────────────────────────────────────────

/// Run parallel tasks on forked contexts. Without a merge policy the result
/// maps task names to values and the first failing task fails the block.
pub fn run_parallel(
    ctx: &mut ExecutionContext,
    tasks: &[ParallelTask],
    policy: Option<&MergePolicy>,
    span: Span,
) -> Result<Value, RuntimeError> {
    if tasks.is_empty() {
        return Err(RuntimeError::invalid("parallel block has no tasks", span));
    }
    let forks: Vec<ExecutionContext> = tasks.iter().map(|_| ctx.fork()).collect();
    let finished = std::thread::scope(|scope| {
        let handles: Vec<_> = tasks
            .iter()
            .zip(forks)
            .map(|(task, mut fork)| {
                scope.spawn(move || {
                    let result = flow::exec_block(&mut fork, &task.body).map(|exec| match exec {
                        Exec::Return(value) => value,
                        Exec::Next => fork.last_value.clone(),
                    });
                    (fork, result)
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join()).collect::<Vec<_>>()
    });

    let mut outcomes = Vec::with_capacity(tasks.len());
    for (task, joined) in tasks.iter().zip(finished) {
        match joined {
            Ok((fork, result)) => {
                ctx.absorb(fork);
                outcomes.push((task.name.clone(), result));
            }
            Err(_) => outcomes.push((
                task.name.clone(),
                Err(RuntimeError::Parallel {
                    task: task.name.clone(),
                    message: "task panicked".to_string(),
                }),
            )),
        }
    }

    match policy {
        Some(policy) => finish("parallel", ctx, policy, outcomes),
        None => {
            let mut values = BTreeMap::new();
            for (task, outcome) in outcomes {
                match outcome {
                    Ok(value) => {
                        values.insert(task, value);
                    }
                    Err(e @ RuntimeError::Parallel { .. }) => return Err(e),
                    Err(e) => {
                        return Err(RuntimeError::Parallel {
                            task,
                            message: e.to_string(),
                        })
                    }
                }
            }
            Ok(Value::Map(values))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(kind: MergeKind, precedence: &[&str]) -> MergePolicy {
        MergePolicy {
            policy: kind,
            precedence: precedence.iter().map(|s| s.to_string()).collect(),
            span: Span::default(),
        }
    }

    fn ok(branch: &str, n: i64) -> (String, Result<Value, RuntimeError>) {
        (branch.to_string(), Ok(Value::from(n)))
    }

    fn failed(branch: &str) -> (String, Result<Value, RuntimeError>) {
        (
            branch.to_string(),
            Err(RuntimeError::UnknownFlow {
                name: branch.to_string(),
            }),
        )
    }

    #[test]
    fn prefer_follows_precedence() {
        let merged = merge(
            &policy(MergeKind::Prefer, &["b", "a"]),
            vec![ok("a", 1), ok("b", 2)],
        )
        .unwrap();
        assert_eq!(merged.value, Value::from(2i64));
        assert_eq!(merged.selected.as_deref(), Some("b"));
    }

    #[test]
    fn prefer_falls_back_when_preferred_fails() {
        let merged = merge(
            &policy(MergeKind::Prefer, &["b"]),
            vec![ok("a", 1), failed("b"), ok("c", 3)],
        )
        .unwrap();
        assert_eq!(merged.value, Value::from(1i64));
    }

    #[test]
    fn first_ok_skips_failures_in_declaration_order() {
        let merged = merge(
            &policy(MergeKind::FirstOk, &[]),
            vec![failed("a"), ok("b", 2)],
        )
        .unwrap();
        assert_eq!(merged.value, Value::from(2i64));
        assert_eq!(merged.selected.as_deref(), Some("b"));
        assert!(merge(&policy(MergeKind::FirstOk, &[]), vec![failed("a")]).is_err());
    }

    #[test]
    fn all_ok_names_the_failing_branch() {
        let err = merge(
            &policy(MergeKind::AllOk, &[]),
            vec![ok("a", 1), failed("b")],
        )
        .unwrap_err();
        assert!(err.to_string().contains("\"b\""));

        let merged = merge(&policy(MergeKind::AllOk, &[]), vec![ok("a", 1), ok("b", 2)]).unwrap();
        let map = merged.value.as_map().unwrap();
        assert_eq!(map.get("b"), Some(&Value::from(2i64)));
    }

    #[test]
    fn collect_keeps_failures() {
        let merged = merge(
            &policy(MergeKind::Collect, &[]),
            vec![failed("a"), ok("b", 2)],
        )
        .unwrap();
        let items = merged.value.as_list().unwrap();
        assert_eq!(items.len(), 2);
        let first = items[0].as_map().unwrap();
        assert_eq!(first.get("ok"), Some(&Value::Bool(false)));
        assert_eq!(first.get("kind"), Some(&Value::from("unknown_flow")));
    }

    #[test]
    fn strict_requires_agreement() {
        let p = policy(MergeKind::Strict, &[]);
        assert_eq!(
            merge(&p, vec![ok("a", 2), ok("b", 2)]).unwrap().value,
            Value::from(2i64)
        );
        assert!(merge(&p, vec![ok("a", 1), ok("b", 2)]).is_err());
        assert!(merge(&p, vec![ok("a", 1), failed("b")]).is_err());
    }
}
