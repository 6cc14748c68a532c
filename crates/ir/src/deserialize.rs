//! Loading a [`Program`] from the lowering pass's JSON, plus the structural
//! checks the engine relies on before anything executes.

use std::collections::BTreeSet;
use std::fmt;

use crate::expr::{Expression, Span};
use crate::stmt::{MergeKind, MergePolicy, OrchestrationBranch, Statement};
use crate::types::Program;

/// Errors while loading or validating a program.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IrError {
    /// The JSON does not match the IR shape.
    Malformed(String),
    /// Two declarations of the same kind share a name.
    DuplicateName { kind: String, name: String },
    /// An orchestration block is structurally invalid.
    Orchestration {
        flow: String,
        message: String,
        span: Span,
    },
}

impl fmt::Display for IrError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IrError::Malformed(msg) => write!(f, "malformed program: {}", msg),
            IrError::DuplicateName { kind, name } => {
                write!(f, "duplicate {} name '{}'", kind, name)
            }
            IrError::Orchestration {
                flow,
                message,
                span,
            } => write!(f, "orchestration in flow '{}' ({}): {}", flow, span, message),
        }
    }
}

impl std::error::Error for IrError {}

impl Program {
    /// Deserialize and validate a program.
    pub fn from_json(value: &serde_json::Value) -> Result<Program, IrError> {
        let program: Program = serde_json::from_value(value.clone())
            .map_err(|e| IrError::Malformed(e.to_string()))?;
        program.validate()?;
        Ok(program)
    }

    /// Name uniqueness and orchestration shape checks.
    pub fn validate(&self) -> Result<(), IrError> {
        unique("flow", self.flows.iter().map(|f| f.name.as_str()))?;
        unique("record", self.records.iter().map(|r| r.name.as_str()))?;
        unique("tool", self.tools.iter().map(|t| t.name.as_str()))?;
        unique("function", self.functions.iter().map(|f| f.name.as_str()))?;
        unique("pipeline", self.pipelines.iter().map(|p| p.name.as_str()))?;
        for flow in &self.flows {
            walk_orchestrations(&flow.body, &mut |branches, merge, span| {
                validate_orchestration(branches, merge).map_err(|message| IrError::Orchestration {
                    flow: flow.name.clone(),
                    message,
                    span,
                })
            })?;
        }
        Ok(())
    }
}

fn unique<'a>(kind: &str, names: impl Iterator<Item = &'a str>) -> Result<(), IrError> {
    let mut seen = BTreeSet::new();
    for name in names {
        if !seen.insert(name) {
            return Err(IrError::DuplicateName {
                kind: kind.to_string(),
                name: name.to_string(),
            });
        }
    }
    Ok(())
}

fn walk_orchestrations<F>(body: &[Statement], check: &mut F) -> Result<(), IrError>
where
    F: FnMut(&[OrchestrationBranch], &MergePolicy, Span) -> Result<(), IrError>,
{
    for stmt in body {
        match stmt {
            Statement::Orchestration {
                branches,
                merge,
                span,
                ..
            } => check(branches, merge, *span)?,
            Statement::If {
                then_body,
                else_body,
                ..
            } => {
                walk_orchestrations(then_body, check)?;
                walk_orchestrations(else_body, check)?;
            }
            Statement::Repeat { body, .. }
            | Statement::RepeatWhile { body, .. }
            | Statement::ForEach { body, .. } => walk_orchestrations(body, check)?,
            Statement::Match {
                cases, otherwise, ..
            } => {
                for case in cases {
                    walk_orchestrations(&case.body, check)?;
                }
                if let Some(otherwise) = otherwise {
                    walk_orchestrations(otherwise, check)?;
                }
            }
            Statement::TryCatch {
                try_body,
                catch_body,
                ..
            } => {
                walk_orchestrations(try_body, check)?;
                walk_orchestrations(catch_body, check)?;
            }
            Statement::Parallel { tasks, .. } => {
                for task in tasks {
                    walk_orchestrations(&task.body, check)?;
                }
            }
            _ => {}
        }
    }
    Ok(())
}

/// Structural rules for an orchestration block: at least one branch, unique
/// branch names, each branch a single flow or pipeline call, and `precedence`
/// only under `prefer`, naming declared branches.
pub fn validate_orchestration(
    branches: &[OrchestrationBranch],
    merge: &MergePolicy,
) -> Result<(), String> {
    if branches.is_empty() {
        return Err("orchestration needs at least one branch".to_string());
    }
    let mut names = BTreeSet::new();
    for branch in branches {
        if !names.insert(branch.name.as_str()) {
            return Err(format!("branch '{}' is declared more than once", branch.name));
        }
        if !matches!(
            branch.call,
            Expression::CallFlow { .. } | Expression::CallPipeline { .. }
        ) {
            return Err(format!(
                "branch '{}' must be a single flow or pipeline call, found {}",
                branch.name,
                branch.call.kind_name()
            ));
        }
    }
    match merge.policy {
        MergeKind::Prefer => {
            if merge.precedence.is_empty() {
                return Err("merge policy 'prefer' needs a precedence list".to_string());
            }
            for name in &merge.precedence {
                if !names.contains(name.as_str()) {
                    return Err(format!("precedence names unknown branch '{}'", name));
                }
            }
        }
        _ => {
            if !merge.precedence.is_empty() {
                return Err(format!(
                    "precedence is only allowed with 'prefer', not '{}'",
                    merge.policy.as_str()
                ));
            }
        }
    }
    Ok(())
}
