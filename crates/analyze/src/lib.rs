//! namel3ss static analyzer: purity/effect analysis over the Program IR.
//!
//! [`validate_program`] is the load-time gate: the first violation is
//! fatal. [`analyze_purity`] runs the same checks over every flow and
//! returns a serializable report for tooling.

pub mod purity;

use serde::Serialize;

use namel3ss_ir::Program;

pub use purity::{Effect, PurityTable, PurityValidator, PurityViolation, EFFECTFUL_BUILTINS};

/// Result of checking every flow of a program.
#[derive(Debug, Clone, Default, Serialize)]
pub struct PurityReport {
    pub flows_checked: usize,
    pub pure_flows: Vec<String>,
    pub violations: Vec<PurityViolation>,
}

impl PurityReport {
    pub fn is_clean(&self) -> bool {
        self.violations.is_empty()
    }
}

/// Check every flow and collect all violations.
pub fn analyze_purity(program: &Program) -> PurityReport {
    let validator = PurityValidator::new(program);
    let mut report = PurityReport::default();
    for flow in &program.flows {
        report.flows_checked += 1;
        match validator.validate_flow(flow) {
            Ok(()) if flow.purity.is_pure() => report.pure_flows.push(flow.name.clone()),
            Ok(()) => {}
            Err(violation) => report.violations.push(violation),
        }
    }
    report
}

/// Load-time gate: fails on the first pure flow that violates its contract.
pub fn validate_program(program: &Program) -> Result<(), PurityViolation> {
    let validator = PurityValidator::new(program);
    for flow in &program.flows {
        if let Err(violation) = validator.validate_flow(flow) {
            tracing::warn!(flow = %flow.name, %violation, "purity validation failed");
            return Err(violation);
        }
    }
    Ok(())
}
