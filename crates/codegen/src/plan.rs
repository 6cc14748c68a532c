//! Lowering of an eligible flow into a closed numeric expression plan.

use std::collections::BTreeSet;

use serde::Serialize;

use namel3ss_ir::{BinaryOp, Expression, Flow, Program, Span, Statement, UnaryOp};

use crate::CodegenError;

/// A numeric expression over inputs, earlier locals and literals.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum NumericExpr {
    /// Literal text as it will appear in the generated source.
    NumberLiteral { text: String },
    InputNumber { key: String },
    LocalNumber { name: String },
    UnaryNumber {
        op: NumericUnaryOp,
        operand: Box<NumericExpr>,
    },
    BinaryNumber {
        op: NumericBinaryOp,
        left: Box<NumericExpr>,
        right: Box<NumericExpr>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum NumericUnaryOp {
    #[serde(rename = "+")]
    Plus,
    #[serde(rename = "-")]
    Minus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum NumericBinaryOp {
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

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NumericAssignment {
    pub name: String,
    pub expr: NumericExpr,
}

/// Straight-line numeric program: assignments in order, then the result.
///
/// Every `LocalNumber` refers to a name bound by a strictly earlier
/// assignment. `input_keys` lists each input field once, in first-use order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NumericFlowPlan {
    pub flow_name: String,
    pub assignments: Vec<NumericAssignment>,
    pub result: NumericExpr,
    pub input_keys: Vec<String>,
}

/// Find `flow_name` in `program` and plan it.
pub fn build_numeric_flow_plan(
    program: &Program,
    flow_name: &str,
) -> Result<NumericFlowPlan, CodegenError> {
    let flow = program
        .flow(flow_name)
        .ok_or_else(|| CodegenError::UnknownFlow {
            name: flow_name.to_string(),
            available: {
                let mut names: Vec<String> = program.flows.iter().map(|f| f.name.clone()).collect();
                names.sort();
                names.truncate(5);
                names
            },
        })?;
    plan_flow(flow)
}

/// Plan a single flow.
pub fn plan_flow(flow: &Flow) -> Result<NumericFlowPlan, CodegenError> {
    let reject = |reason: &str, span: Span| CodegenError::NotCompilable {
        flow: flow.name.clone(),
        reason: reason.to_string(),
        span,
    };
    if !flow.purity.is_pure() {
        return Err(reject("only pure flows can be compiled", flow.span));
    }
    if flow.requires.is_some() {
        return Err(reject("compiled flows cannot evaluate requires guards", flow.span));
    }
    if flow.audited {
        return Err(reject("audited flows cannot be compiled", flow.span));
    }
    if flow.declarative {
        return Err(reject("declarative flows cannot be compiled", flow.span));
    }

    let mut lowering = Lowering {
        flow: &flow.name,
        locals: BTreeSet::new(),
        seen_inputs: BTreeSet::new(),
        input_keys: Vec::new(),
    };
    let mut assignments = Vec::new();
    let mut result = None;

    for stmt in &flow.body {
        if result.is_some() {
            return Err(reject("statements after return are not supported", stmt.span()));
        }
        match stmt {
            Statement::Let {
                name, expression, ..
            } => {
                let expr = lowering.lower(expression)?;
                lowering.locals.insert(name.clone());
                assignments.push(NumericAssignment {
                    name: name.clone(),
                    expr,
                });
            }
            Statement::Return { expression, .. } => {
                result = Some(lowering.lower(expression)?);
            }
            other => {
                return Err(reject(
                    &format!(
                        "statement '{}' is not supported; only let and return are",
                        other.kind_name()
                    ),
                    other.span(),
                ));
            }
        }
    }

    let result = result.ok_or_else(|| reject("flow has no return", flow.span))?;
    tracing::debug!(
        flow = %flow.name,
        assignments = assignments.len(),
        inputs = lowering.input_keys.len(),
        "numeric plan built"
    );
    Ok(NumericFlowPlan {
        flow_name: flow.name.clone(),
        assignments,
        result,
        input_keys: lowering.input_keys,
    })
}

struct Lowering<'a> {
    flow: &'a str,
    locals: BTreeSet<String>,
    seen_inputs: BTreeSet<String>,
    input_keys: Vec<String>,
}

impl Lowering<'_> {
    fn unsupported(&self, reason: String, span: Span) -> CodegenError {
        CodegenError::NotCompilable {
            flow: self.flow.to_string(),
            reason,
            span,
        }
    }

    fn lower(&mut self, expr: &Expression) -> Result<NumericExpr, CodegenError> {
        match expr {
            Expression::Literal { value, span } => match value {
                serde_json::Value::Number(n) => Ok(NumericExpr::NumberLiteral {
                    text: literal_text(n),
                }),
                serde_json::Value::Bool(_) => Err(self.unsupported(
                    "boolean literals are not supported in compiled numeric flows".to_string(),
                    *span,
                )),
                _ => Err(self.unsupported("only numeric literals are supported".to_string(), *span)),
            },
            Expression::Var { name, span } => {
                if !self.locals.contains(name) {
                    return Err(self.unsupported(
                        format!("local '{}' must be declared earlier with let", name),
                        *span,
                    ));
                }
                Ok(NumericExpr::LocalNumber { name: name.clone() })
            }
            Expression::Attr { base, attrs, span } => {
                if base != "input" {
                    return Err(self.unsupported(
                        format!("attribute access on '{}'; only input fields are supported", base),
                        *span,
                    ));
                }
                let [key] = attrs.as_slice() else {
                    return Err(self.unsupported(
                        "only one input field level is supported".to_string(),
                        *span,
                    ));
                };
                if self.seen_inputs.insert(key.clone()) {
                    self.input_keys.push(key.clone());
                }
                Ok(NumericExpr::InputNumber { key: key.clone() })
            }
            Expression::Unary { op, operand, span } => {
                let op = match op {
                    UnaryOp::Pos => NumericUnaryOp::Plus,
                    UnaryOp::Neg => NumericUnaryOp::Minus,
                    UnaryOp::Not => {
                        return Err(self.unsupported(
                            "unary operator 'not' is not supported".to_string(),
                            *span,
                        ))
                    }
                };
                Ok(NumericExpr::UnaryNumber {
                    op,
                    operand: Box::new(self.lower(operand)?),
                })
            }
            Expression::Binary {
                op,
                left,
                right,
                span,
            } => {
                let op = match op {
                    BinaryOp::Add => NumericBinaryOp::Add,
                    BinaryOp::Sub => NumericBinaryOp::Sub,
                    BinaryOp::Mul => NumericBinaryOp::Mul,
                    BinaryOp::Div => NumericBinaryOp::Div,
                    BinaryOp::Mod => NumericBinaryOp::Mod,
                    BinaryOp::And | BinaryOp::Or => {
                        return Err(self.unsupported(
                            format!("binary operator '{}' is not supported", op.symbol()),
                            *span,
                        ))
                    }
                };
                let left = self.lower(left)?;
                let right = self.lower(right)?;
                Ok(NumericExpr::BinaryNumber {
                    op,
                    left: Box::new(left),
                    right: Box::new(right),
                })
            }
            other => Err(self.unsupported(
                format!("expression '{}' is not supported", other.kind_name()),
                other.span(),
            )),
        }
    }
}

/// Render a JSON number as a C double literal. Integers get a `.0` suffix
/// so literal-only subexpressions never use integer division.
fn literal_text(n: &serde_json::Number) -> String {
    let text = n.to_string();
    if text.contains(['.', 'e', 'E']) {
        text
    } else {
        format!("{}.0", text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn flow(value: serde_json::Value) -> Flow {
        serde_json::from_value(value).unwrap()
    }

    fn pure(body: serde_json::Value) -> Flow {
        flow(json!({
            "name": "calc",
            "purity": "pure",
            "contract": {"inputs": [], "outputs": []},
            "body": body
        }))
    }

    fn input(key: &str) -> serde_json::Value {
        json!({"kind": "attr", "base": "input", "attrs": [key]})
    }

    fn reason(err: CodegenError) -> String {
        match err {
            CodegenError::NotCompilable { reason, .. } => reason,
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[test]
    fn plans_lets_and_return_with_deduplicated_inputs() {
        let plan = plan_flow(&pure(json!([
            {"kind": "let", "name": "sum", "expression": {"kind": "binary", "op": "+", "left": input("b"), "right": input("a")}},
            {"kind": "let", "name": "twice", "expression": {"kind": "binary", "op": "*", "left": {"kind": "var", "name": "sum"}, "right": input("b")}},
            {"kind": "return", "expression": {"kind": "unary", "op": "-", "operand": {"kind": "var", "name": "twice"}}}
        ])))
        .unwrap();
        assert_eq!(plan.input_keys, vec!["b", "a"]);
        assert_eq!(plan.assignments.len(), 2);
        assert_eq!(
            plan.result,
            NumericExpr::UnaryNumber {
                op: NumericUnaryOp::Minus,
                operand: Box::new(NumericExpr::LocalNumber { name: "twice".into() }),
            }
        );
    }

    #[test]
    fn integer_literals_become_doubles() {
        let plan = plan_flow(&pure(json!([
            {"kind": "return", "expression": {"kind": "binary", "op": "/",
                "left": {"kind": "literal", "value": 1}, "right": {"kind": "literal", "value": 2.5}}}
        ])))
        .unwrap();
        assert_eq!(
            serde_json::to_value(&plan.result).unwrap(),
            json!({
                "kind": "binary_number",
                "op": "/",
                "left": {"kind": "number_literal", "text": "1.0"},
                "right": {"kind": "number_literal", "text": "2.5"}
            })
        );
    }

    #[test]
    fn rejection_order_checks_purity_first() {
        let err = plan_flow(&flow(json!({
            "name": "calc",
            "requires": {"kind": "literal", "value": true},
            "audited": true,
            "body": [{"kind": "return", "expression": {"kind": "literal", "value": 1}}]
        })))
        .unwrap_err();
        assert_eq!(reason(err), "only pure flows can be compiled");

        let err = plan_flow(&flow(json!({
            "name": "calc",
            "purity": "pure",
            "requires": {"kind": "literal", "value": true},
            "audited": true,
            "body": []
        })))
        .unwrap_err();
        assert!(reason(err).contains("requires"));

        let err = plan_flow(&flow(json!({
            "name": "calc", "purity": "pure", "audited": true, "declarative": true, "body": []
        })))
        .unwrap_err();
        assert!(reason(err).contains("audited"));
    }

    #[test]
    fn unbound_local_is_rejected() {
        let err = plan_flow(&pure(json!([
            {"kind": "let", "name": "a", "expression": {"kind": "var", "name": "b"}},
            {"kind": "let", "name": "b", "expression": {"kind": "literal", "value": 1}},
            {"kind": "return", "expression": {"kind": "var", "name": "a"}}
        ])))
        .unwrap_err();
        assert!(reason(err).contains("'b'"));
    }

    #[test]
    fn self_reference_is_unbound() {
        let err = plan_flow(&pure(json!([
            {"kind": "let", "name": "a", "expression": {"kind": "var", "name": "a"}},
            {"kind": "return", "expression": {"kind": "var", "name": "a"}}
        ])))
        .unwrap_err();
        assert!(matches!(err, CodegenError::NotCompilable { .. }));
    }

    #[test]
    fn return_must_be_last_and_present() {
        let err = plan_flow(&pure(json!([
            {"kind": "return", "expression": {"kind": "literal", "value": 1}},
            {"kind": "let", "name": "a", "expression": {"kind": "literal", "value": 2}}
        ])))
        .unwrap_err();
        assert!(reason(err).contains("after return"));

        let err = plan_flow(&pure(json!([
            {"kind": "let", "name": "a", "expression": {"kind": "literal", "value": 2}}
        ])))
        .unwrap_err();
        assert_eq!(reason(err), "flow has no return");
    }

    #[test]
    fn unsupported_statements_and_expressions_name_themselves() {
        let err = plan_flow(&pure(json!([
            {"kind": "if", "condition": {"kind": "literal", "value": true}, "then_body": []},
            {"kind": "return", "expression": {"kind": "literal", "value": 1}}
        ])))
        .unwrap_err();
        assert!(reason(err).contains("'if'"));

        let err = plan_flow(&pure(json!([
            {"kind": "return", "expression": {"kind": "attr", "base": "input", "attrs": ["a", "b"]}}
        ])))
        .unwrap_err();
        assert!(reason(err).contains("one input field level"));

        let err = plan_flow(&pure(json!([
            {"kind": "return", "expression": {"kind": "literal", "value": "ten"}}
        ])))
        .unwrap_err();
        assert!(reason(err).contains("numeric literals"));
    }

    #[test]
    fn unknown_flow_lists_available_names() {
        let program = Program::from_json(&json!({
            "flows": [{"name": "b", "body": []}, {"name": "a", "body": []}]
        }))
        .unwrap();
        let err = build_numeric_flow_plan(&program, "missing").unwrap_err();
        assert_eq!(err.to_string(), "unknown flow 'missing' (available: a, b)");
    }
}
