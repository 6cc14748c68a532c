//! Statement nodes of the Program IR.

use serde::{Deserialize, Serialize};

use crate::expr::{Argument, Expression, Span};

/// Left-hand side of a `set` statement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Assignable {
    Local { name: String },
    StatePath { path: Vec<String> },
}

impl std::fmt::Display for Assignable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Assignable::Local { name } => write!(f, "{}", name),
            Assignable::StatePath { path } => write!(f, "state.{}", path.join(".")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchCase {
    pub pattern: Expression,
    pub body: Vec<Statement>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParallelTask {
    pub name: String,
    pub body: Vec<Statement>,
}

/// One named branch of an orchestration block. `call` must be a single
/// flow or pipeline call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrchestrationBranch {
    pub name: String,
    pub call: Expression,
    #[serde(default)]
    pub span: Span,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergeKind {
    FirstOk,
    AllOk,
    Collect,
    Prefer,
    Strict,
}

impl MergeKind {
    pub fn as_str(self) -> &'static str {
        match self {
            MergeKind::FirstOk => "first_ok",
            MergeKind::AllOk => "all_ok",
            MergeKind::Collect => "collect",
            MergeKind::Prefer => "prefer",
            MergeKind::Strict => "strict",
        }
    }
}

/// Merge policy for orchestration and parallel blocks. `precedence` is only
/// populated for [`MergeKind::Prefer`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MergePolicy {
    pub policy: MergeKind,
    #[serde(default)]
    pub precedence: Vec<String>,
    #[serde(default)]
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldUpdate {
    pub field: String,
    pub expression: Expression,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentEntry {
    pub agent: String,
    pub input: Expression,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobSchedule {
    /// `after` (logical seconds from now) or `at` (absolute logical time).
    pub kind: String,
    pub value: Expression,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricKind {
    Counter,
    Timing,
}

/// A statement node. Bodies are executed in document order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Statement {
    Let {
        name: String,
        expression: Expression,
        #[serde(default)]
        constant: bool,
        #[serde(default)]
        span: Span,
    },
    Set {
        target: Assignable,
        expression: Expression,
        #[serde(default)]
        span: Span,
    },
    If {
        condition: Expression,
        then_body: Vec<Statement>,
        #[serde(default)]
        else_body: Vec<Statement>,
        #[serde(default)]
        span: Span,
    },
    Return {
        expression: Expression,
        #[serde(default)]
        span: Span,
    },
    Repeat {
        count: Expression,
        body: Vec<Statement>,
        #[serde(default)]
        span: Span,
    },
    RepeatWhile {
        condition: Expression,
        #[serde(default)]
        limit: Option<u64>,
        body: Vec<Statement>,
        #[serde(default)]
        span: Span,
    },
    ForEach {
        var: String,
        iterable: Expression,
        body: Vec<Statement>,
        #[serde(default)]
        span: Span,
    },
    Match {
        subject: Expression,
        cases: Vec<MatchCase>,
        #[serde(default)]
        otherwise: Option<Vec<Statement>>,
        #[serde(default)]
        span: Span,
    },
    TryCatch {
        try_body: Vec<Statement>,
        catch_var: String,
        catch_body: Vec<Statement>,
        #[serde(default)]
        span: Span,
    },
    Parallel {
        tasks: Vec<ParallelTask>,
        #[serde(default)]
        merge: Option<MergePolicy>,
        #[serde(default)]
        target: Option<String>,
        #[serde(default)]
        span: Span,
    },
    Orchestration {
        branches: Vec<OrchestrationBranch>,
        merge: MergePolicy,
        target: String,
        #[serde(default)]
        span: Span,
    },
    AskAi {
        ai: String,
        input: Expression,
        target: String,
        #[serde(default)]
        span: Span,
    },
    RunAgent {
        agent: String,
        input: Expression,
        target: String,
        #[serde(default)]
        span: Span,
    },
    RunAgentsParallel {
        agents: Vec<AgentEntry>,
        target: String,
        #[serde(default)]
        span: Span,
    },
    Save {
        record: String,
        #[serde(default)]
        span: Span,
    },
    Create {
        record: String,
        values: Expression,
        target: String,
        #[serde(default)]
        span: Span,
    },
    Find {
        record: String,
        predicate: Expression,
        #[serde(default)]
        target: Option<String>,
        #[serde(default)]
        span: Span,
    },
    Update {
        record: String,
        predicate: Expression,
        updates: Vec<FieldUpdate>,
        #[serde(default)]
        span: Span,
    },
    Delete {
        record: String,
        predicate: Expression,
        #[serde(default)]
        span: Span,
    },
    EnqueueJob {
        job: String,
        #[serde(default)]
        input: Option<Expression>,
        #[serde(default)]
        schedule: Option<JobSchedule>,
        #[serde(default)]
        span: Span,
    },
    AdvanceTime {
        amount: Expression,
        #[serde(default)]
        span: Span,
    },
    Log {
        level: LogLevel,
        message: Expression,
        #[serde(default)]
        fields: Option<Expression>,
        #[serde(default)]
        span: Span,
    },
    Metric {
        metric: MetricKind,
        name: String,
        operation: String,
        #[serde(default)]
        value: Option<Expression>,
        #[serde(default)]
        labels: Option<Expression>,
        #[serde(default)]
        span: Span,
    },
}

impl Statement {
    pub fn span(&self) -> Span {
        match self {
            Statement::Let { span, .. }
            | Statement::Set { span, .. }
            | Statement::If { span, .. }
            | Statement::Return { span, .. }
            | Statement::Repeat { span, .. }
            | Statement::RepeatWhile { span, .. }
            | Statement::ForEach { span, .. }
            | Statement::Match { span, .. }
            | Statement::TryCatch { span, .. }
            | Statement::Parallel { span, .. }
            | Statement::Orchestration { span, .. }
            | Statement::AskAi { span, .. }
            | Statement::RunAgent { span, .. }
            | Statement::RunAgentsParallel { span, .. }
            | Statement::Save { span, .. }
            | Statement::Create { span, .. }
            | Statement::Find { span, .. }
            | Statement::Update { span, .. }
            | Statement::Delete { span, .. }
            | Statement::EnqueueJob { span, .. }
            | Statement::AdvanceTime { span, .. }
            | Statement::Log { span, .. }
            | Statement::Metric { span, .. } => *span,
        }
    }

    /// Snake-case node name, matching the serialized `kind` tag.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Statement::Let { .. } => "let",
            Statement::Set { .. } => "set",
            Statement::If { .. } => "if",
            Statement::Return { .. } => "return",
            Statement::Repeat { .. } => "repeat",
            Statement::RepeatWhile { .. } => "repeat_while",
            Statement::ForEach { .. } => "for_each",
            Statement::Match { .. } => "match",
            Statement::TryCatch { .. } => "try_catch",
            Statement::Parallel { .. } => "parallel",
            Statement::Orchestration { .. } => "orchestration",
            Statement::AskAi { .. } => "ask_ai",
            Statement::RunAgent { .. } => "run_agent",
            Statement::RunAgentsParallel { .. } => "run_agents_parallel",
            Statement::Save { .. } => "save",
            Statement::Create { .. } => "create",
            Statement::Find { .. } => "find",
            Statement::Update { .. } => "update",
            Statement::Delete { .. } => "delete",
            Statement::EnqueueJob { .. } => "enqueue_job",
            Statement::AdvanceTime { .. } => "advance_time",
            Statement::Log { .. } => "log",
            Statement::Metric { .. } => "metric",
        }
    }
}

// ── Declarative flow steps ──────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepInputField {
    pub name: String,
    pub type_name: String,
    #[serde(default)]
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepField {
    pub name: String,
    pub value: Expression,
}

/// A structured step in a declarative flow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FlowStep {
    Input {
        fields: Vec<StepInputField>,
        #[serde(default)]
        span: Span,
    },
    Require {
        condition: Expression,
        #[serde(default)]
        span: Span,
    },
    Create {
        record: String,
        fields: Vec<StepField>,
        #[serde(default)]
        span: Span,
    },
    Update {
        record: String,
        #[serde(default)]
        selector: Option<Expression>,
        updates: Vec<StepField>,
        #[serde(default)]
        span: Span,
    },
    Delete {
        record: String,
        #[serde(default)]
        selector: Option<Expression>,
        #[serde(default)]
        span: Span,
    },
    CallForeign {
        name: String,
        #[serde(default)]
        arguments: Vec<Argument>,
        #[serde(default)]
        span: Span,
    },
}

impl FlowStep {
    pub fn span(&self) -> Span {
        match self {
            FlowStep::Input { span, .. }
            | FlowStep::Require { span, .. }
            | FlowStep::Create { span, .. }
            | FlowStep::Update { span, .. }
            | FlowStep::Delete { span, .. }
            | FlowStep::CallForeign { span, .. } => *span,
        }
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            FlowStep::Input { .. } => "input",
            FlowStep::Require { .. } => "require",
            FlowStep::Create { .. } => "create",
            FlowStep::Update { .. } => "update",
            FlowStep::Delete { .. } => "delete",
            FlowStep::CallForeign { .. } => "call_foreign",
        }
    }
}
