//! Record-predicate lowering.
//!
//! A predicate expression is split into the parts that read the record
//! variable and the parts that do not. The latter are evaluated once,
//! against the invocation context, and folded into constants. What remains
//! is a small `FilterExpr` tree that owns no context and can be handed to a
//! store as a `Send + Sync` closure.

use std::collections::BTreeMap;

use namel3ss_ir::{BinaryOp, CompareOp, Expression, RecordSchema, Span, UnaryOp};
use namel3ss_storage::{Record, StorageError, EXPIRES_AT_FIELD, TENANT_KEY_FIELD};

use crate::context::ExecutionContext;
use crate::error::RuntimeError;
use crate::expr::eval_expr;
use crate::ops;
use crate::value::Value;

#[derive(Debug, Clone, PartialEq)]
pub enum FilterExpr {
    /// A path into the record; empty means the whole record.
    Field(Vec<String>),
    Const(Value),
    Unary(UnaryOp, Box<FilterExpr>),
    Binary(BinaryOp, Box<FilterExpr>, Box<FilterExpr>),
    Compare(CompareOp, Box<FilterExpr>, Box<FilterExpr>),
}

/// Name the record is bound to inside predicates and updates.
pub fn record_var(schema: &RecordSchema) -> String {
    schema.name.to_lowercase()
}

pub fn lower(
    ctx: &mut ExecutionContext,
    schema: &RecordSchema,
    expr: &Expression,
) -> Result<FilterExpr, RuntimeError> {
    let var = record_var(schema);
    Lowering {
        ctx,
        schema,
        var: &var,
    }
    .lower(expr)
}

struct Lowering<'c, 's> {
    ctx: &'c mut ExecutionContext,
    schema: &'s RecordSchema,
    var: &'s str,
}

impl Lowering<'_, '_> {
    fn lower(&mut self, expr: &Expression) -> Result<FilterExpr, RuntimeError> {
        if !mentions_var(expr, self.var) {
            return Ok(FilterExpr::Const(eval_expr(self.ctx, expr)?));
        }
        match expr {
            Expression::Var { .. } => Ok(FilterExpr::Field(Vec::new())),
            Expression::Attr { attrs, span, .. } => {
                if let Some(first) = attrs.first() {
                    self.check_field(first, *span)?;
                }
                Ok(FilterExpr::Field(attrs.clone()))
            }
            Expression::Unary { op, operand, .. } => {
                Ok(FilterExpr::Unary(*op, Box::new(self.lower(operand)?)))
            }
            Expression::Binary {
                op, left, right, ..
            } => Ok(FilterExpr::Binary(
                *op,
                Box::new(self.lower(left)?),
                Box::new(self.lower(right)?),
            )),
            Expression::Comparison {
                op, left, right, ..
            } => Ok(FilterExpr::Compare(
                *op,
                Box::new(self.lower(left)?),
                Box::new(self.lower(right)?),
            )),
            other => Err(RuntimeError::invalid(
                format!(
                    "{} over a record is not supported in a {} predicate",
                    other.kind_name(),
                    self.schema.name
                ),
                other.span(),
            )),
        }
    }

    fn check_field(&self, field: &str, span: Span) -> Result<(), RuntimeError> {
        if is_known_field(self.schema, field) {
            Ok(())
        } else {
            Err(RuntimeError::UnknownField {
                record: self.schema.name.clone(),
                field: field.to_string(),
                span,
            })
        }
    }
}

/// Declared fields plus the id and reserved bookkeeping columns.
pub fn is_known_field(schema: &RecordSchema, field: &str) -> bool {
    schema.field(field).is_some()
        || field == schema.id_field()
        || field == TENANT_KEY_FIELD
        || field == EXPIRES_AT_FIELD
}

fn mentions_var(expr: &Expression, var: &str) -> bool {
    match expr {
        Expression::Var { name, .. } => name == var,
        Expression::Attr { base, .. } => base == var,
        _ => expr.children().into_iter().any(|c| mentions_var(c, var)),
    }
}

impl FilterExpr {
    pub fn eval(&self, record: &Record) -> Result<Value, RuntimeError> {
        let span = Span::default();
        match self {
            FilterExpr::Field(path) => read_field(record, path),
            FilterExpr::Const(v) => Ok(v.clone()),
            FilterExpr::Unary(op, inner) => ops::unary(*op, &inner.eval(record)?, span),
            FilterExpr::Binary(op @ (BinaryOp::And | BinaryOp::Or), l, r) => {
                let left = ops::expect_bool(&l.eval(record)?, "predicate operand", span)?;
                match (op, left) {
                    (BinaryOp::And, false) => Ok(Value::Bool(false)),
                    (BinaryOp::Or, true) => Ok(Value::Bool(true)),
                    _ => {
                        let right = ops::expect_bool(&r.eval(record)?, "predicate operand", span)?;
                        Ok(Value::Bool(right))
                    }
                }
            }
            FilterExpr::Binary(op, l, r) => ops::binary(*op, &l.eval(record)?, &r.eval(record)?, span),
            FilterExpr::Compare(op, l, r) => {
                let left = l.eval(record)?;
                let right = r.eval(record)?;
                // Ordering against a missing field selects nothing, as in SQL.
                let ordering = !matches!(op, CompareOp::Eq | CompareOp::Ne);
                if ordering && (left.is_null() || right.is_null()) {
                    return Ok(Value::Bool(false));
                }
                ops::compare(*op, &left, &right, span).map(Value::Bool)
            }
        }
    }

    /// Evaluate as a row filter.
    pub fn matches(&self, record: &Record) -> Result<bool, StorageError> {
        match self.eval(record) {
            Ok(Value::Bool(b)) => Ok(b),
            Ok(other) => Err(StorageError::Predicate(format!(
                "predicate must be boolean, got {}",
                other.type_name()
            ))),
            Err(e) => Err(StorageError::Predicate(e.to_string())),
        }
    }
}

fn read_field(record: &Record, path: &[String]) -> Result<Value, RuntimeError> {
    let Some((first, rest)) = path.split_first() else {
        return record
            .iter()
            .map(|(k, v)| Ok((k.clone(), Value::from_json(v)?)))
            .collect::<Result<BTreeMap<_, _>, RuntimeError>>()
            .map(Value::Map);
    };
    let mut current = match record.get(first) {
        Some(v) => Value::from_json(v)?,
        None => return Ok(Value::Null),
    };
    for key in rest {
        current = match current {
            Value::Map(mut map) => map.remove(key).unwrap_or(Value::Null),
            _ => Value::Null,
        };
    }
    Ok(current)
}
