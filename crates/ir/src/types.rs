//! Program-level declarations: flows, records, tools, AI profiles.
//!
//! A [`Program`] is produced by the lowering collaborator and is never
//! mutated by the engine.

use serde::{Deserialize, Serialize};

use crate::expr::{Expression, Span};
use crate::stmt::{FlowStep, Statement};

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Purity {
    Pure,
    #[default]
    Effectful,
}

impl Purity {
    pub fn is_pure(self) -> bool {
        matches!(self, Purity::Pure)
    }
}

/// A typed field in a flow contract or tool schema.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContractField {
    pub name: String,
    pub type_name: String,
    #[serde(default = "default_true")]
    pub required: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FlowContract {
    #[serde(default)]
    pub inputs: Vec<ContractField>,
    #[serde(default)]
    pub outputs: Vec<ContractField>,
}

/// A named procedure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Flow {
    pub name: String,
    #[serde(default)]
    pub body: Vec<Statement>,
    #[serde(default)]
    pub purity: Purity,
    #[serde(default)]
    pub requires: Option<Expression>,
    #[serde(default)]
    pub contract: Option<FlowContract>,
    #[serde(default)]
    pub audited: bool,
    #[serde(default)]
    pub declarative: bool,
    /// Structured steps of a declarative flow. Declarative flows run these
    /// instead of `body`.
    #[serde(default)]
    pub steps: Option<Vec<FlowStep>>,
    #[serde(default)]
    pub span: Span,
}

impl Flow {
    /// Minimal effectful flow with the given body.
    pub fn new(name: &str, body: Vec<Statement>) -> Self {
        Flow {
            name: name.to_string(),
            body,
            purity: Purity::Effectful,
            requires: None,
            contract: None,
            audited: false,
            declarative: false,
            steps: None,
            span: Span::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordField {
    pub name: String,
    pub type_name: String,
    #[serde(default)]
    pub required: bool,
}

/// Field map and tenant-scoping rule for one record type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordSchema {
    pub name: String,
    #[serde(default)]
    pub fields: Vec<RecordField>,
    /// Expression evaluated against the caller identity to produce the
    /// tenant value (e.g. `identity.org_id`).
    #[serde(default)]
    pub tenant_key: Option<Expression>,
    #[serde(default)]
    pub ttl_hours: Option<u64>,
}

impl RecordSchema {
    pub fn field(&self, name: &str) -> Option<&RecordField> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Name of the identifier column: `id` when declared, else `_id`.
    pub fn id_field(&self) -> &'static str {
        if self.field("id").is_some() {
            "id"
        } else {
            "_id"
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolKind {
    Python,
    Node,
    Builtin,
}

impl ToolKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ToolKind::Python => "python",
            ToolKind::Node => "node",
            ToolKind::Builtin => "builtin",
        }
    }

    /// Python and node tools run out of process and need an on-disk binding.
    pub fn needs_binding(self) -> bool {
        matches!(self, ToolKind::Python | ToolKind::Node)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDecl {
    pub name: String,
    pub kind: ToolKind,
    #[serde(default)]
    pub capabilities: Vec<String>,
    #[serde(default)]
    pub input_fields: Vec<ContractField>,
    #[serde(default)]
    pub output_fields: Vec<ContractField>,
    #[serde(default)]
    pub purity: Purity,
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

/// A user-defined function. Functions may not write state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionDecl {
    pub name: String,
    #[serde(default)]
    pub params: Vec<String>,
    pub body: Vec<Statement>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AiProfile {
    pub name: String,
    pub model: String,
    #[serde(default)]
    pub system_prompt: Option<String>,
    /// Tools the model may call from its tool-call loop.
    #[serde(default)]
    pub tools: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentDecl {
    pub name: String,
    pub ai: String,
    #[serde(default)]
    pub role: Option<String>,
}

/// A named sequence of flows; each step receives the previous output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineDecl {
    pub name: String,
    #[serde(default)]
    pub purity: Purity,
    pub steps: Vec<String>,
}

/// The immutable program consumed by the engine.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Program {
    #[serde(default)]
    pub flows: Vec<Flow>,
    #[serde(default)]
    pub records: Vec<RecordSchema>,
    #[serde(default)]
    pub tools: Vec<ToolDecl>,
    #[serde(default)]
    pub functions: Vec<FunctionDecl>,
    #[serde(default)]
    pub ais: Vec<AiProfile>,
    #[serde(default)]
    pub agents: Vec<AgentDecl>,
    #[serde(default)]
    pub pipelines: Vec<PipelineDecl>,
}

impl Program {
    pub fn flow(&self, name: &str) -> Option<&Flow> {
        self.flows.iter().find(|f| f.name == name)
    }

    pub fn record(&self, name: &str) -> Option<&RecordSchema> {
        self.records.iter().find(|r| r.name == name)
    }

    pub fn tool(&self, name: &str) -> Option<&ToolDecl> {
        self.tools.iter().find(|t| t.name == name)
    }

    pub fn function(&self, name: &str) -> Option<&FunctionDecl> {
        self.functions.iter().find(|f| f.name == name)
    }

    pub fn ai(&self, name: &str) -> Option<&AiProfile> {
        self.ais.iter().find(|a| a.name == name)
    }

    pub fn agent(&self, name: &str) -> Option<&AgentDecl> {
        self.agents.iter().find(|a| a.name == name)
    }

    pub fn pipeline(&self, name: &str) -> Option<&PipelineDecl> {
        self.pipelines.iter().find(|p| p.name == name)
    }
}
