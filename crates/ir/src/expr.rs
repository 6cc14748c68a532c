//! Expression nodes of the Program IR.
//!
//! Expressions form a closed sum type. Consumers walk them with exhaustive
//! `match`es, and [`Expression::children`] gives a single exhaustive
//! enumeration of sub-expressions for structural scans (purity, identity
//! mentions) that only care about a handful of node kinds.

use serde::{Deserialize, Serialize};

/// Source position recorded by the lowering pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub column: Option<u32>,
}

impl Span {
    pub fn new(line: u32, column: u32) -> Self {
        Span {
            line: Some(line),
            column: Some(column),
        }
    }
}

impl std::fmt::Display for Span {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match (self.line, self.column) {
            (Some(line), Some(column)) => write!(f, "line {}, column {}", line, column),
            (Some(line), None) => write!(f, "line {}", line),
            _ => write!(f, "unknown position"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UnaryOp {
    #[serde(rename = "not")]
    Not,
    #[serde(rename = "-")]
    Neg,
    #[serde(rename = "+")]
    Pos,
}

impl UnaryOp {
    pub fn symbol(self) -> &'static str {
        match self {
            UnaryOp::Not => "not",
            UnaryOp::Neg => "-",
            UnaryOp::Pos => "+",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BinaryOp {
    #[serde(rename = "and")]
    And,
    #[serde(rename = "or")]
    Or,
    #[serde(rename = "+")]
    Add,
    #[serde(rename = "-")]
    Sub,
    #[serde(rename = "*")]
    Mul,
    #[serde(rename = "/")]
    Div,
    #[serde(rename = "%")]
    Mod,
}

impl BinaryOp {
    pub fn symbol(self) -> &'static str {
        match self {
            BinaryOp::And => "and",
            BinaryOp::Or => "or",
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Mod => "%",
        }
    }

    /// True for `+ - * / %`.
    pub fn is_arithmetic(self) -> bool {
        !matches!(self, BinaryOp::And | BinaryOp::Or)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompareOp {
    Eq,
    Ne,
    Gt,
    Lt,
    Gte,
    Lte,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ListOpKind {
    Length,
    Get,
    Append,
    Contains,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MapOpKind {
    Get,
    Set,
    Keys,
    Has,
}

/// A `name: value` argument in a flow, pipeline, function or tool call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Argument {
    pub name: String,
    pub value: Expression,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MapEntry {
    pub key: Expression,
    pub value: Expression,
}

/// An expression node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Expression {
    /// A JSON scalar literal (`null`, bool, number or text).
    Literal {
        value: serde_json::Value,
        #[serde(default)]
        span: Span,
    },
    /// A local variable, or `identity` / `input`.
    Var {
        name: String,
        #[serde(default)]
        span: Span,
    },
    /// `base.a.b` attribute access on a local.
    Attr {
        base: String,
        attrs: Vec<String>,
        #[serde(default)]
        span: Span,
    },
    /// `state.a.b` path into the shared state tree.
    StatePath {
        path: Vec<String>,
        #[serde(default)]
        span: Span,
    },
    Unary {
        op: UnaryOp,
        operand: Box<Expression>,
        #[serde(default)]
        span: Span,
    },
    Binary {
        op: BinaryOp,
        left: Box<Expression>,
        right: Box<Expression>,
        #[serde(default)]
        span: Span,
    },
    Comparison {
        op: CompareOp,
        left: Box<Expression>,
        right: Box<Expression>,
        #[serde(default)]
        span: Span,
    },
    List {
        items: Vec<Expression>,
        #[serde(default)]
        span: Span,
    },
    Map {
        entries: Vec<MapEntry>,
        #[serde(default)]
        span: Span,
    },
    ListOp {
        op: ListOpKind,
        target: Box<Expression>,
        #[serde(default)]
        value: Option<Box<Expression>>,
        #[serde(default)]
        span: Span,
    },
    ListMap {
        var: String,
        target: Box<Expression>,
        body: Box<Expression>,
        #[serde(default)]
        span: Span,
    },
    ListFilter {
        var: String,
        target: Box<Expression>,
        predicate: Box<Expression>,
        #[serde(default)]
        span: Span,
    },
    ListReduce {
        acc: String,
        var: String,
        target: Box<Expression>,
        start: Box<Expression>,
        body: Box<Expression>,
        #[serde(default)]
        span: Span,
    },
    MapOp {
        op: MapOpKind,
        target: Box<Expression>,
        #[serde(default)]
        key: Option<Box<Expression>>,
        #[serde(default)]
        value: Option<Box<Expression>>,
        #[serde(default)]
        span: Span,
    },
    CallFunction {
        name: String,
        #[serde(default)]
        args: Vec<Argument>,
        #[serde(default)]
        span: Span,
    },
    CallFlow {
        flow: String,
        #[serde(default)]
        args: Vec<Argument>,
        #[serde(default)]
        span: Span,
    },
    CallPipeline {
        pipeline: String,
        #[serde(default)]
        args: Vec<Argument>,
        #[serde(default)]
        span: Span,
    },
    ToolCall {
        tool: String,
        #[serde(default)]
        args: Vec<Argument>,
        #[serde(default)]
        span: Span,
    },
    Builtin {
        name: String,
        #[serde(default)]
        args: Vec<Expression>,
        #[serde(default)]
        span: Span,
    },
}

impl Expression {
    pub fn span(&self) -> Span {
        match self {
            Expression::Literal { span, .. }
            | Expression::Var { span, .. }
            | Expression::Attr { span, .. }
            | Expression::StatePath { span, .. }
            | Expression::Unary { span, .. }
            | Expression::Binary { span, .. }
            | Expression::Comparison { span, .. }
            | Expression::List { span, .. }
            | Expression::Map { span, .. }
            | Expression::ListOp { span, .. }
            | Expression::ListMap { span, .. }
            | Expression::ListFilter { span, .. }
            | Expression::ListReduce { span, .. }
            | Expression::MapOp { span, .. }
            | Expression::CallFunction { span, .. }
            | Expression::CallFlow { span, .. }
            | Expression::CallPipeline { span, .. }
            | Expression::ToolCall { span, .. }
            | Expression::Builtin { span, .. } => *span,
        }
    }

    /// Direct sub-expressions, in evaluation order.
    pub fn children(&self) -> Vec<&Expression> {
        match self {
            Expression::Literal { .. }
            | Expression::Var { .. }
            | Expression::Attr { .. }
            | Expression::StatePath { .. } => Vec::new(),
            Expression::Unary { operand, .. } => vec![operand.as_ref()],
            Expression::Binary { left, right, .. } | Expression::Comparison { left, right, .. } => {
                vec![left.as_ref(), right.as_ref()]
            }
            Expression::List { items, .. } => items.iter().collect(),
            Expression::Map { entries, .. } => entries
                .iter()
                .flat_map(|e| [&e.key, &e.value])
                .collect(),
            Expression::ListOp { target, value, .. } => {
                let mut out: Vec<&Expression> = vec![target.as_ref()];
                out.extend(value.as_deref());
                out
            }
            Expression::ListMap { target, body, .. } => vec![target.as_ref(), body.as_ref()],
            Expression::ListFilter {
                target, predicate, ..
            } => vec![target.as_ref(), predicate.as_ref()],
            Expression::ListReduce {
                target, start, body, ..
            } => vec![target.as_ref(), start.as_ref(), body.as_ref()],
            Expression::MapOp {
                target, key, value, ..
            } => {
                let mut out: Vec<&Expression> = vec![target.as_ref()];
                out.extend(key.as_deref());
                out.extend(value.as_deref());
                out
            }
            Expression::CallFunction { args, .. }
            | Expression::CallFlow { args, .. }
            | Expression::CallPipeline { args, .. }
            | Expression::ToolCall { args, .. } => args.iter().map(|a| &a.value).collect(),
            Expression::Builtin { args, .. } => args.iter().collect(),
        }
    }

    /// Short node-kind label used in diagnostics.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Expression::Literal { .. } => "literal",
            Expression::Var { .. } => "variable",
            Expression::Attr { .. } => "attribute access",
            Expression::StatePath { .. } => "state path",
            Expression::Unary { .. } => "unary operation",
            Expression::Binary { .. } => "binary operation",
            Expression::Comparison { .. } => "comparison",
            Expression::List { .. } => "list",
            Expression::Map { .. } => "map",
            Expression::ListOp { .. } => "list operation",
            Expression::ListMap { .. } => "list map",
            Expression::ListFilter { .. } => "list filter",
            Expression::ListReduce { .. } => "list reduce",
            Expression::MapOp { .. } => "map operation",
            Expression::CallFunction { .. } => "function call",
            Expression::CallFlow { .. } => "flow call",
            Expression::CallPipeline { .. } => "pipeline call",
            Expression::ToolCall { .. } => "tool call",
            Expression::Builtin { .. } => "builtin call",
        }
    }

    // Constructors used by tests and by callers that synthesize IR.

    pub fn literal(value: serde_json::Value) -> Self {
        Expression::Literal {
            value,
            span: Span::default(),
        }
    }

    pub fn var(name: &str) -> Self {
        Expression::Var {
            name: name.to_string(),
            span: Span::default(),
        }
    }

    pub fn attr(base: &str, attrs: &[&str]) -> Self {
        Expression::Attr {
            base: base.to_string(),
            attrs: attrs.iter().map(|a| a.to_string()).collect(),
            span: Span::default(),
        }
    }

    pub fn binary(op: BinaryOp, left: Expression, right: Expression) -> Self {
        Expression::Binary {
            op,
            left: Box::new(left),
            right: Box::new(right),
            span: Span::default(),
        }
    }

    pub fn compare(op: CompareOp, left: Expression, right: Expression) -> Self {
        Expression::Comparison {
            op,
            left: Box::new(left),
            right: Box::new(right),
            span: Span::default(),
        }
    }
}
