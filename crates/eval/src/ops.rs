//! Operator semantics shared by the interpreter and record predicates.

use std::cmp::Ordering;

use namel3ss_ir::{BinaryOp, CompareOp, Span, UnaryOp};

use crate::error::RuntimeError;
use crate::value::Value;

pub fn expect_bool(value: &Value, what: &str, span: Span) -> Result<bool, RuntimeError> {
    value.as_bool().ok_or_else(|| {
        RuntimeError::type_error(
            format!("{} must be boolean, got {}", what, value.type_name()),
            span,
        )
    })
}

pub fn unary(op: UnaryOp, value: &Value, span: Span) -> Result<Value, RuntimeError> {
    match (op, value) {
        (UnaryOp::Not, Value::Bool(b)) => Ok(Value::Bool(!b)),
        (UnaryOp::Neg, Value::Number(d)) => Ok(Value::Number(-*d)),
        (UnaryOp::Pos, Value::Number(d)) => Ok(Value::Number(*d)),
        (op, other) => Err(RuntimeError::type_error(
            format!("cannot apply '{}' to {}", op.symbol(), other.type_name()),
            span,
        )),
    }
}

/// Evaluate a binary operator on already-evaluated operands. `and`/`or`
/// here are strict; the interpreter short-circuits before calling this.
pub fn binary(op: BinaryOp, left: &Value, right: &Value, span: Span) -> Result<Value, RuntimeError> {
    if let BinaryOp::And | BinaryOp::Or = op {
        let l = expect_bool(left, &format!("left operand of '{}'", op.symbol()), span)?;
        let r = expect_bool(right, &format!("right operand of '{}'", op.symbol()), span)?;
        return Ok(Value::Bool(match op {
            BinaryOp::And => l && r,
            _ => l || r,
        }));
    }
    let (a, b) = match (left, right) {
        (Value::Number(a), Value::Number(b)) => (*a, *b),
        (Value::Text(a), Value::Text(b)) if op == BinaryOp::Add => {
            return Ok(Value::Text(format!("{}{}", a, b)));
        }
        _ => {
            return Err(RuntimeError::type_error(
                format!(
                    "cannot apply '{}' to {} and {}",
                    op.symbol(),
                    left.type_name(),
                    right.type_name()
                ),
                span,
            ))
        }
    };
    let result = match op {
        BinaryOp::Add => a.checked_add(b),
        BinaryOp::Sub => a.checked_sub(b),
        BinaryOp::Mul => a.checked_mul(b),
        BinaryOp::Div | BinaryOp::Mod if b.is_zero() => {
            return Err(RuntimeError::DivisionByZero { span })
        }
        BinaryOp::Div => a.checked_div(b),
        BinaryOp::Mod => a.checked_rem(b),
        BinaryOp::And | BinaryOp::Or => None,
    };
    result
        .map(Value::Number)
        .ok_or(RuntimeError::Overflow { span })
}

/// Structural equality; numbers compare by value regardless of scale.
pub fn values_equal(left: &Value, right: &Value) -> bool {
    left == right
}

pub fn compare(op: CompareOp, left: &Value, right: &Value, span: Span) -> Result<bool, RuntimeError> {
    match op {
        CompareOp::Eq => return Ok(values_equal(left, right)),
        CompareOp::Ne => return Ok(!values_equal(left, right)),
        _ => {}
    }
    let (Value::Number(a), Value::Number(b)) = (left, right) else {
        return Err(RuntimeError::type_error(
            format!(
                "ordering comparison needs numbers, got {} and {}",
                left.type_name(),
                right.type_name()
            ),
            span,
        ));
    };
    let ordering = a.cmp(b);
    Ok(match op {
        CompareOp::Gt => ordering == Ordering::Greater,
        CompareOp::Lt => ordering == Ordering::Less,
        CompareOp::Gte => ordering != Ordering::Less,
        CompareOp::Lte => ordering != Ordering::Greater,
        CompareOp::Eq | CompareOp::Ne => false,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn num(v: serde_json::Value) -> Value {
        Value::from_json(&v).unwrap()
    }

    #[test]
    fn arithmetic_is_exact() {
        let sum = binary(BinaryOp::Add, &num(json!(0.1)), &num(json!(0.2)), Span::default()).unwrap();
        assert_eq!(sum, num(json!(0.3)));
        let rem = binary(BinaryOp::Mod, &num(json!(7)), &num(json!(3)), Span::default()).unwrap();
        assert_eq!(rem, num(json!(1)));
    }

    #[test]
    fn division_by_zero_is_an_error() {
        let err = binary(BinaryOp::Div, &num(json!(1)), &num(json!(0)), Span::new(2, 3)).unwrap_err();
        assert!(matches!(err, RuntimeError::DivisionByZero { .. }));
    }

    #[test]
    fn equality_ignores_scale_but_not_type() {
        assert!(compare(CompareOp::Eq, &num(json!(1)), &num(json!(1.0)), Span::default()).unwrap());
        assert!(!compare(CompareOp::Eq, &num(json!(1)), &Value::from("1"), Span::default()).unwrap());
        assert!(compare(CompareOp::Ne, &Value::Null, &num(json!(1)), Span::default()).unwrap());
    }

    #[test]
    fn ordering_requires_numbers() {
        assert!(compare(CompareOp::Gte, &num(json!(2)), &num(json!(2)), Span::default()).unwrap());
        assert!(compare(CompareOp::Gt, &Value::from("b"), &Value::from("a"), Span::default()).is_err());
    }

    #[test]
    fn logical_operators_require_booleans() {
        assert!(binary(BinaryOp::And, &Value::Bool(true), &num(json!(1)), Span::default()).is_err());
        assert!(unary(UnaryOp::Not, &num(json!(0)), Span::default()).is_err());
    }
}
