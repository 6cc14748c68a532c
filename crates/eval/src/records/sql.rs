//! SQL compilation of lowered predicates.
//!
//! Only shapes whose SQL three-valued result agrees with the closure are
//! compiled: comparisons between a top-level field and a scalar constant,
//! joined by `AND`/`OR`. Ordering comparisons additionally need a field
//! declared as a number, since the closure raises a type error where SQL
//! would quietly drop the row. Anything else reports a reason and the
//! caller keeps the closure alone.

use namel3ss_ir::{BinaryOp, CompareOp, RecordSchema};
use namel3ss_storage::{SqlFragment, StoreDialect};

use super::filter::FilterExpr;
use crate::value::Value;

pub fn compile(
    filter: &FilterExpr,
    schema: &RecordSchema,
    dialect: StoreDialect,
) -> Result<SqlFragment, String> {
    let mut compiler = Compiler {
        schema,
        dialect,
        params: Vec::new(),
    };
    let clause = compiler.node(filter)?;
    Ok(SqlFragment {
        clause,
        params: compiler.params,
    })
}

struct Compiler<'s> {
    schema: &'s RecordSchema,
    dialect: StoreDialect,
    params: Vec<serde_json::Value>,
}

impl Compiler<'_> {
    fn node(&mut self, filter: &FilterExpr) -> Result<String, String> {
        match filter {
            FilterExpr::Binary(op @ (BinaryOp::And | BinaryOp::Or), l, r) => {
                let left = self.node(l)?;
                let right = self.node(r)?;
                let joiner = if *op == BinaryOp::And { "AND" } else { "OR" };
                Ok(format!("({} {} {})", left, joiner, right))
            }
            FilterExpr::Compare(op, l, r) => match (l.as_ref(), r.as_ref()) {
                (FilterExpr::Field(path), FilterExpr::Const(c)) => self.comparison(path, *op, c),
                (FilterExpr::Const(c), FilterExpr::Field(path)) => {
                    self.comparison(path, flip(*op), c)
                }
                _ => Err("comparison is not between a field and a constant".to_string()),
            },
            FilterExpr::Unary(..) => Err("unary operators are not compiled".to_string()),
            FilterExpr::Binary(op, ..) => Err(format!("operator '{}' is not compiled", op.symbol())),
            FilterExpr::Field(_) => Err("bare field used as a condition".to_string()),
            FilterExpr::Const(_) => Err("constant predicate".to_string()),
        }
    }

    fn comparison(&mut self, path: &[String], op: CompareOp, constant: &Value) -> Result<String, String> {
        let [name] = path else {
            return Err("only top-level fields are compiled".to_string());
        };
        let column = quote_ident(name);
        match constant {
            Value::Null => match op {
                CompareOp::Eq => Ok(format!("{} IS NULL", column)),
                CompareOp::Ne => Ok(format!("{} IS NOT NULL", column)),
                _ => Err("ordering against null".to_string()),
            },
            Value::List(_) | Value::Map(_) => Err("container constants are not compiled".to_string()),
            Value::Number(_) | Value::Text(_) | Value::Bool(_) => {
                if !matches!(op, CompareOp::Eq | CompareOp::Ne) {
                    if !constant.is_number() {
                        return Err("ordering against a non-number".to_string());
                    }
                    if !self.is_number_field(name) {
                        return Err(format!("ordering on field '{}' which is not a number", name));
                    }
                }
                let placeholder = self.bind(constant);
                Ok(match op {
                    CompareOp::Eq => format!("{} = {}", column, placeholder),
                    // A missing field is unequal to any constant.
                    CompareOp::Ne => format!("({} <> {} OR {} IS NULL)", column, placeholder, column),
                    CompareOp::Gt => format!("{} > {}", column, placeholder),
                    CompareOp::Lt => format!("{} < {}", column, placeholder),
                    CompareOp::Gte => format!("{} >= {}", column, placeholder),
                    CompareOp::Lte => format!("{} <= {}", column, placeholder),
                })
            }
        }
    }

    fn is_number_field(&self, name: &str) -> bool {
        self.schema.field(name).is_some_and(|field| {
            matches!(
                field.type_name.to_ascii_lowercase().as_str(),
                "number" | "int" | "integer" | "float" | "decimal"
            )
        })
    }

    fn bind(&mut self, value: &Value) -> String {
        self.params.push(value.to_json());
        self.dialect.placeholder(self.params.len())
    }
}

fn flip(op: CompareOp) -> CompareOp {
    match op {
        CompareOp::Gt => CompareOp::Lt,
        CompareOp::Lt => CompareOp::Gt,
        CompareOp::Gte => CompareOp::Lte,
        CompareOp::Lte => CompareOp::Gte,
        other => other,
    }
}

fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn schema() -> RecordSchema {
        serde_json::from_value(json!({
            "name": "Order",
            "fields": [
                {"name": "total", "type_name": "number"},
                {"name": "status", "type_name": "text"}
            ]
        }))
        .unwrap()
    }

    fn field(name: &str) -> Box<FilterExpr> {
        Box::new(FilterExpr::Field(vec![name.to_string()]))
    }

    fn constant(v: serde_json::Value) -> Box<FilterExpr> {
        Box::new(FilterExpr::Const(Value::from_json(&v).unwrap()))
    }

    #[test]
    fn compiles_conjunction_with_dialect_placeholders() {
        let filter = FilterExpr::Binary(
            BinaryOp::And,
            Box::new(FilterExpr::Compare(CompareOp::Gt, field("total"), constant(json!(10)))),
            Box::new(FilterExpr::Compare(CompareOp::Ne, field("status"), constant(json!("void")))),
        );
        let sqlite = compile(&filter, &schema(), StoreDialect::Sqlite).unwrap();
        assert_eq!(
            sqlite.clause,
            "(\"total\" > ? AND (\"status\" <> ? OR \"status\" IS NULL))"
        );
        assert_eq!(sqlite.params, vec![json!(10), json!("void")]);
        let postgres = compile(&filter, &schema(), StoreDialect::Postgres).unwrap();
        assert!(postgres.clause.contains("$1") && postgres.clause.contains("$2"));
    }

    #[test]
    fn constant_on_left_flips_operator() {
        let filter = FilterExpr::Compare(CompareOp::Lt, constant(json!(5)), field("total"));
        assert_eq!(
            compile(&filter, &schema(), StoreDialect::Sqlite).unwrap().clause,
            "\"total\" > ?"
        );
    }

    #[test]
    fn unsupported_shapes_report_a_reason() {
        let not = FilterExpr::Unary(
            namel3ss_ir::UnaryOp::Not,
            Box::new(FilterExpr::Compare(CompareOp::Eq, field("a"), constant(json!(1)))),
        );
        assert_eq!(
            compile(&not, &schema(), StoreDialect::Sqlite).unwrap_err(),
            "unary operators are not compiled"
        );
        let nested = FilterExpr::Compare(
            CompareOp::Eq,
            Box::new(FilterExpr::Field(vec!["a".into(), "b".into()])),
            constant(json!(1)),
        );
        assert!(compile(&nested, &schema(), StoreDialect::Sqlite).is_err());
    }

    #[test]
    fn ordering_needs_a_number_field() {
        let on_text = FilterExpr::Compare(CompareOp::Gt, field("status"), constant(json!(5)));
        assert_eq!(
            compile(&on_text, &schema(), StoreDialect::Sqlite).unwrap_err(),
            "ordering on field 'status' which is not a number"
        );
        let equality = FilterExpr::Compare(CompareOp::Eq, field("status"), constant(json!(5)));
        assert!(compile(&equality, &schema(), StoreDialect::Sqlite).is_ok());
    }
}
