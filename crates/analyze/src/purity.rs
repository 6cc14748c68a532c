//! Purity validation: pure flows must declare a contract and reach no
//! effectful construct.
//!
//! The scan is purely structural. Calls into other flows and pipelines are
//! resolved against the declared purity table rather than re-analyzed;
//! user functions carry no purity tag, so their bodies are scanned
//! transitively (each at most once). Structured steps are only scanned on
//! declarative flows, the only flows that run them.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::Serialize;

use namel3ss_ir::{
    Assignable, Expression, Flow, FlowStep, Program, Purity, Span, Statement,
};

/// Builtins that read secrets or build credentials.
pub const EFFECTFUL_BUILTINS: &[&str] = &["secret", "auth_bearer", "auth_basic", "auth_header"];

/// The effectful construct a pure flow reached.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "effect", rename_all = "snake_case")]
pub enum Effect {
    StateWrite { target: String },
    RecordMutation { operation: String, record: String },
    AiCall { ai: String },
    AgentCall { agent: String },
    ToolCall { tool: String },
    JobEnqueue { job: String },
    TimeAdvance,
    EffectfulFlowCall { flow: String },
    EffectfulPipelineCall { pipeline: String },
    EffectfulBuiltin { name: String },
    DeclarativeStep { step: String },
}

impl fmt::Display for Effect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Effect::StateWrite { target } => write!(f, "writes state ({})", target),
            Effect::RecordMutation { operation, record } => {
                write!(f, "{}s record \"{}\"", operation, record)
            }
            Effect::AiCall { ai } => write!(f, "calls AI \"{}\"", ai),
            Effect::AgentCall { agent } => write!(f, "runs agent \"{}\"", agent),
            Effect::ToolCall { tool } => write!(f, "calls tool \"{}\"", tool),
            Effect::JobEnqueue { job } => write!(f, "enqueues job \"{}\"", job),
            Effect::TimeAdvance => write!(f, "advances time"),
            Effect::EffectfulFlowCall { flow } => write!(f, "calls effectful flow \"{}\"", flow),
            Effect::EffectfulPipelineCall { pipeline } => {
                write!(f, "calls effectful pipeline \"{}\"", pipeline)
            }
            Effect::EffectfulBuiltin { name } => write!(f, "calls effectful builtin \"{}\"", name),
            Effect::DeclarativeStep { step } => write!(f, "uses declarative {} step", step),
        }
    }
}

/// A load-time purity failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PurityViolation {
    MissingContract { flow: String, span: Span },
    Effect { flow: String, effect: Effect, span: Span },
}

impl PurityViolation {
    pub fn flow(&self) -> &str {
        match self {
            PurityViolation::MissingContract { flow, .. } | PurityViolation::Effect { flow, .. } => {
                flow
            }
        }
    }

    pub fn span(&self) -> Span {
        match self {
            PurityViolation::MissingContract { span, .. } | PurityViolation::Effect { span, .. } => {
                *span
            }
        }
    }
}

impl fmt::Display for PurityViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PurityViolation::MissingContract { flow, .. } => {
                write!(f, "Pure flow \"{}\" is missing a contract.", flow)
            }
            PurityViolation::Effect { flow, effect, span } => {
                write!(f, "Pure flow \"{}\" {} at {}.", flow, effect, span)
            }
        }
    }
}

impl std::error::Error for PurityViolation {}

/// Declared purity of every flow and pipeline.
#[derive(Debug, Clone, Default)]
pub struct PurityTable {
    flows: BTreeMap<String, Purity>,
    pipelines: BTreeMap<String, Purity>,
}

impl PurityTable {
    pub fn from_program(program: &Program) -> Self {
        PurityTable {
            flows: program
                .flows
                .iter()
                .map(|f| (f.name.clone(), f.purity))
                .collect(),
            pipelines: program
                .pipelines
                .iter()
                .map(|p| (p.name.clone(), p.purity))
                .collect(),
        }
    }

    /// Only a declared effectful flow is effectful. Calling an unknown flow
    /// fails when it runs, not here.
    pub fn flow_is_effectful(&self, name: &str) -> bool {
        self.flows.get(name).is_some_and(|p| !p.is_pure())
    }

    /// Pipelines without a declared purity are effectful.
    pub fn pipeline_is_pure(&self, name: &str) -> bool {
        self.pipelines.get(name).is_some_and(|p| p.is_pure())
    }
}

/// Validates pure flows of one program.
pub struct PurityValidator<'a> {
    program: &'a Program,
    table: PurityTable,
}

impl<'a> PurityValidator<'a> {
    pub fn new(program: &'a Program) -> Self {
        PurityValidator {
            program,
            table: PurityTable::from_program(program),
        }
    }

    pub fn table(&self) -> &PurityTable {
        &self.table
    }

    /// Validate one flow. Effectful flows always pass.
    pub fn validate_flow(&self, flow: &Flow) -> Result<(), PurityViolation> {
        if !flow.purity.is_pure() {
            return Ok(());
        }
        if flow.contract.is_none() {
            return Err(PurityViolation::MissingContract {
                flow: flow.name.clone(),
                span: flow.span,
            });
        }
        let mut scan = Scan {
            validator: self,
            flow: &flow.name,
            visited_functions: BTreeSet::new(),
        };
        if flow.declarative {
            for step in flow.steps.iter().flatten() {
                scan.step(step)?;
            }
        }
        scan.block(&flow.body)
    }
}

struct Scan<'v, 'a> {
    validator: &'v PurityValidator<'a>,
    flow: &'v str,
    visited_functions: BTreeSet<String>,
}

impl Scan<'_, '_> {
    fn fail(&self, effect: Effect, span: Span) -> Result<(), PurityViolation> {
        Err(PurityViolation::Effect {
            flow: self.flow.to_string(),
            effect,
            span,
        })
    }

    fn step(&mut self, step: &FlowStep) -> Result<(), PurityViolation> {
        match step {
            FlowStep::Input { .. } => Ok(()),
            FlowStep::Require { condition, .. } => self.expr(condition),
            FlowStep::Create { .. }
            | FlowStep::Update { .. }
            | FlowStep::Delete { .. }
            | FlowStep::CallForeign { .. } => self.fail(
                Effect::DeclarativeStep {
                    step: step.kind_name().to_string(),
                },
                step.span(),
            ),
        }
    }

    fn block(&mut self, body: &[Statement]) -> Result<(), PurityViolation> {
        body.iter().try_for_each(|stmt| self.stmt(stmt))
    }

    fn stmt(&mut self, stmt: &Statement) -> Result<(), PurityViolation> {
        match stmt {
            Statement::Let { expression, .. } | Statement::Return { expression, .. } => {
                self.expr(expression)
            }
            Statement::Set {
                target: target @ Assignable::StatePath { .. },
                span,
                ..
            } => self.fail(
                Effect::StateWrite {
                    target: target.to_string(),
                },
                *span,
            ),
            Statement::Set { expression, .. } => self.expr(expression),
            Statement::If {
                condition,
                then_body,
                else_body,
                ..
            } => {
                self.expr(condition)?;
                self.block(then_body)?;
                self.block(else_body)
            }
            Statement::Repeat { count, body, .. } => {
                self.expr(count)?;
                self.block(body)
            }
            Statement::RepeatWhile {
                condition, body, ..
            } => {
                self.expr(condition)?;
                self.block(body)
            }
            Statement::ForEach { iterable, body, .. } => {
                self.expr(iterable)?;
                self.block(body)
            }
            Statement::Match {
                subject,
                cases,
                otherwise,
                ..
            } => {
                self.expr(subject)?;
                for case in cases {
                    self.expr(&case.pattern)?;
                    self.block(&case.body)?;
                }
                match otherwise {
                    Some(body) => self.block(body),
                    None => Ok(()),
                }
            }
            Statement::TryCatch {
                try_body,
                catch_body,
                ..
            } => {
                self.block(try_body)?;
                self.block(catch_body)
            }
            Statement::Parallel { tasks, .. } => {
                tasks.iter().try_for_each(|task| self.block(&task.body))
            }
            Statement::Orchestration { branches, .. } => {
                branches.iter().try_for_each(|b| self.expr(&b.call))
            }
            Statement::AskAi { ai, span, .. } => self.fail(Effect::AiCall { ai: ai.clone() }, *span),
            Statement::RunAgent { agent, span, .. } => self.fail(
                Effect::AgentCall {
                    agent: agent.clone(),
                },
                *span,
            ),
            Statement::RunAgentsParallel { agents, span, .. } => self.fail(
                Effect::AgentCall {
                    agent: agents
                        .iter()
                        .map(|a| a.agent.as_str())
                        .collect::<Vec<_>>()
                        .join(", "),
                },
                *span,
            ),
            Statement::Save { record, span } => self.fail(mutation("save", record), *span),
            Statement::Create { record, span, .. } => self.fail(mutation("create", record), *span),
            Statement::Update { record, span, .. } => self.fail(mutation("update", record), *span),
            Statement::Delete { record, span, .. } => self.fail(mutation("delete", record), *span),
            Statement::EnqueueJob { job, span, .. } => {
                self.fail(Effect::JobEnqueue { job: job.clone() }, *span)
            }
            Statement::AdvanceTime { span, .. } => self.fail(Effect::TimeAdvance, *span),
            Statement::Find { predicate, .. } => self.expr(predicate),
            Statement::Log {
                message, fields, ..
            } => {
                self.expr(message)?;
                self.opt_expr(fields.as_ref())
            }
            Statement::Metric { value, labels, .. } => {
                self.opt_expr(value.as_ref())?;
                self.opt_expr(labels.as_ref())
            }
        }
    }

    fn opt_expr(&mut self, expr: Option<&Expression>) -> Result<(), PurityViolation> {
        match expr {
            Some(e) => self.expr(e),
            None => Ok(()),
        }
    }

    fn expr(&mut self, expr: &Expression) -> Result<(), PurityViolation> {
        match expr {
            Expression::ToolCall { tool, span, .. } => {
                return self.fail(Effect::ToolCall { tool: tool.clone() }, *span);
            }
            Expression::CallFlow { flow, span, .. }
                if self.validator.table.flow_is_effectful(flow) =>
            {
                return self.fail(Effect::EffectfulFlowCall { flow: flow.clone() }, *span);
            }
            Expression::CallPipeline { pipeline, span, .. }
                if !self.validator.table.pipeline_is_pure(pipeline) =>
            {
                return self.fail(
                    Effect::EffectfulPipelineCall {
                        pipeline: pipeline.clone(),
                    },
                    *span,
                );
            }
            Expression::Builtin { name, span, .. } if EFFECTFUL_BUILTINS.contains(&name.as_str()) => {
                return self.fail(Effect::EffectfulBuiltin { name: name.clone() }, *span);
            }
            Expression::CallFunction { name, .. } => {
                if self.visited_functions.insert(name.clone()) {
                    if let Some(function) = self.validator.program.function(name) {
                        self.block(&function.body)?;
                    }
                }
            }
            _ => {}
        }
        expr.children().into_iter().try_for_each(|child| self.expr(child))
    }
}

fn mutation(operation: &str, record: &str) -> Effect {
    Effect::RecordMutation {
        operation: operation.to_string(),
        record: record.to_string(),
    }
}
