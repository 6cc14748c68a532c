//! Native compilation of pure numeric flows.
//!
//! A flow qualifies when it is declared `pure`, has no `requires` guard, is
//! neither audited nor declarative, and its body is a run of `let`
//! statements over numeric literals, single-level `input.<field>` reads and
//! earlier locals, closed by one `return`. [`build_numeric_flow_plan`]
//! lowers such a flow into a [`NumericFlowPlan`]; [`generate_native_project`]
//! renders the plan as a self-contained C project exposing
//!
//! ```c
//! int run_flow(const char *input_json, char **output_json, char **error_json);
//! void free_json_string(char *ptr);
//! ```
//!
//! Generation is deterministic: the same plan and target always yield
//! byte-identical files.

use std::fmt;

use namel3ss_ir::{Program, Span};

mod c;
pub mod plan;
pub mod project;

pub use plan::{
    build_numeric_flow_plan, plan_flow, NumericAssignment, NumericBinaryOp, NumericExpr,
    NumericFlowPlan, NumericUnaryOp,
};
pub use project::{generate_native_project, slug, GeneratedProject, Target};

/// Error type for planning and generation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CodegenError {
    /// No flow with this name exists in the program.
    UnknownFlow { name: String, available: Vec<String> },
    /// The flow exists but cannot be lowered to a numeric plan.
    NotCompilable {
        flow: String,
        reason: String,
        span: Span,
    },
    /// Writing generated files failed.
    Io(String),
}

impl fmt::Display for CodegenError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CodegenError::UnknownFlow { name, available } => {
                let sample = if available.is_empty() {
                    "none".to_string()
                } else {
                    available.join(", ")
                };
                write!(f, "unknown flow '{}' (available: {})", name, sample)
            }
            CodegenError::NotCompilable { flow, reason, span } => {
                write!(f, "flow '{}' cannot be compiled at {}: {}", flow, span, reason)
            }
            CodegenError::Io(msg) => write!(f, "I/O error: {}", msg),
        }
    }
}

impl std::error::Error for CodegenError {}

impl From<std::io::Error> for CodegenError {
    fn from(e: std::io::Error) -> Self {
        CodegenError::Io(e.to_string())
    }
}

/// Plan `flow_name` and render it for `target` in one step.
pub fn compile_flow(
    program: &Program,
    flow_name: &str,
    target: Target,
) -> Result<GeneratedProject, CodegenError> {
    let plan = build_numeric_flow_plan(program, flow_name)?;
    Ok(generate_native_project(&plan, target))
}
