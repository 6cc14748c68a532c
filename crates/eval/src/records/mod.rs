//! Record operations: create, find, update, delete and save.
//!
//! Every operation resolves the schema, computes the tenant/TTL scope from
//! the caller identity, and hands the store an already-scoped
//! [`PredicatePlan`].

pub mod filter;
pub mod sql;

use std::collections::BTreeMap;
use std::sync::Arc;

use namel3ss_ir::{Expression, RecordSchema, Span};
use namel3ss_storage::{
    id_to_string, ChangeMarker, PredicatePlan, Record, RecordScope, EXPIRES_AT_FIELD,
    TENANT_KEY_FIELD,
};

use crate::context::ExecutionContext;
use crate::error::RuntimeError;
use crate::expr::eval_expr;
use crate::value::Value;

use self::filter::{is_known_field, record_var, FilterExpr};

pub fn schema<'p>(
    ctx: &'p ExecutionContext,
    record: &str,
    span: Span,
) -> Result<&'p RecordSchema, RuntimeError> {
    ctx.program()
        .record(record)
        .ok_or_else(|| RuntimeError::UnknownRecord {
            record: record.to_string(),
            span,
        })
}

/// Scope for queries on `schema` by the current caller.
pub fn build_record_scope(
    ctx: &mut ExecutionContext,
    schema: &RecordSchema,
    span: Span,
) -> Result<RecordScope, RuntimeError> {
    let tenant_value = match &schema.tenant_key {
        Some(key) => {
            let value = eval_expr(ctx, key)?;
            if value.is_null() {
                return Err(RuntimeError::invalid(
                    format!("tenant key for {} is missing from the identity", schema.name),
                    span,
                ));
            }
            Some(value.to_json())
        }
        None => None,
    };
    let now = schema.ttl_hours.map(|_| ctx.now());
    Ok(RecordScope { tenant_value, now })
}

/// Build the dual closure/SQL plan for `predicate` over `schema`.
pub fn build_predicate_plan(
    ctx: &mut ExecutionContext,
    schema: &RecordSchema,
    predicate: &Expression,
) -> Result<PredicatePlan, RuntimeError> {
    let filter = filter::lower(ctx, schema, predicate)?;
    if let FilterExpr::Const(Value::Bool(true)) = filter {
        return Ok(PredicatePlan::all());
    }
    let filter = Arc::new(filter);
    let closure_filter = Arc::clone(&filter);
    let dialect = ctx.runtime.store.dialect();
    if !dialect.supports_sql() {
        return Ok(PredicatePlan::closure(
            move |record| closure_filter.matches(record),
            "store does not use SQL",
        ));
    }
    match sql::compile(&filter, schema, dialect) {
        Ok(fragment) => {
            Ok(PredicatePlan::closure(move |record| closure_filter.matches(record), "")
                .with_sql(fragment))
        }
        Err(reason) if ctx.config().store.strict_sql => {
            tracing::warn!(record = %schema.name, %reason, "predicate rejected in strict SQL mode");
            Err(RuntimeError::SqlRequired {
                record: schema.name.clone(),
                reason,
            })
        }
        Err(reason) => {
            tracing::debug!(record = %schema.name, %reason, "SQL compilation fell back to closure");
            Ok(PredicatePlan::closure(
                move |record| closure_filter.matches(record),
                reason,
            ))
        }
    }
}

pub fn create(
    ctx: &mut ExecutionContext,
    record: &str,
    values: Value,
    span: Span,
) -> Result<Value, RuntimeError> {
    let schema = schema(ctx, record, span)?.clone();
    let Value::Map(fields) = values else {
        return Err(RuntimeError::InvalidPayload {
            record: schema.name.clone(),
            message: format!("values must be a map, got {}", values.type_name()),
            span,
        });
    };
    validate_fields(&schema, &fields, true, span)?;
    let scope = build_record_scope(ctx, &schema, span)?;
    let mut row: Record = fields.iter().map(|(k, v)| (k.clone(), v.to_json())).collect();
    if let Some(tenant) = scope.tenant_value {
        row.insert(TENANT_KEY_FIELD.to_string(), tenant);
    }
    if let Some(hours) = schema.ttl_hours {
        let ttl = i64::try_from(hours.saturating_mul(3600)).unwrap_or(i64::MAX);
        let expires_at = ctx.now().saturating_add(ttl);
        row.insert(EXPIRES_AT_FIELD.to_string(), serde_json::Value::from(expires_at));
    }
    let saved = ctx.runtime.store.save(&schema, row)?;
    mark_changed(ctx, &schema, &saved);
    record_value(&saved)
}

pub fn find(
    ctx: &mut ExecutionContext,
    record: &str,
    predicate: &Expression,
    span: Span,
) -> Result<Vec<Value>, RuntimeError> {
    let schema = schema(ctx, record, span)?.clone();
    let rows = scoped_rows(ctx, &schema, predicate, span)?;
    rows.iter().map(record_value).collect()
}

/// Apply `updates` to every matching row. Each update expression sees the
/// current row bound to the record variable. Returns the number of rows
/// written.
pub fn update(
    ctx: &mut ExecutionContext,
    record: &str,
    predicate: &Expression,
    updates: &[(String, Expression)],
    span: Span,
) -> Result<usize, RuntimeError> {
    let schema = schema(ctx, record, span)?.clone();
    for (field, _) in updates {
        if !is_known_field(&schema, field) || is_reserved(&schema, field) {
            return Err(RuntimeError::UnknownField {
                record: schema.name.clone(),
                field: field.clone(),
                span,
            });
        }
    }
    let rows = scoped_rows(ctx, &schema, predicate, span)?;
    let var = record_var(&schema);
    let saved = ctx.locals.remove(&var);
    let result = apply_updates(ctx, &schema, &var, rows, updates, span);
    ctx.locals.remove(&var);
    if let Some(previous) = saved {
        ctx.locals.insert(var, previous);
    }
    result
}

fn apply_updates(
    ctx: &mut ExecutionContext,
    schema: &RecordSchema,
    var: &str,
    rows: Vec<Record>,
    updates: &[(String, Expression)],
    span: Span,
) -> Result<usize, RuntimeError> {
    let mut written = 0;
    for mut row in rows {
        ctx.locals.insert(var.to_string(), record_value(&row)?);
        let mut changed = BTreeMap::new();
        for (field, expression) in updates {
            changed.insert(field.clone(), eval_expr(ctx, expression)?);
        }
        validate_fields(schema, &changed, false, span)?;
        for (field, value) in changed {
            row.insert(field, value.to_json());
        }
        match ctx.runtime.store.update(schema, row) {
            Ok(stored) => {
                mark_changed(ctx, schema, &stored);
                written += 1;
            }
            // The row vanished between read and write.
            Err(namel3ss_storage::StorageError::NotFound { .. }) => continue,
            Err(e) => return Err(e.into()),
        }
    }
    Ok(written)
}

pub fn delete(
    ctx: &mut ExecutionContext,
    record: &str,
    predicate: &Expression,
    span: Span,
) -> Result<usize, RuntimeError> {
    let schema = schema(ctx, record, span)?.clone();
    let rows = scoped_rows(ctx, &schema, predicate, span)?;
    let id_field = schema.id_field();
    let mut removed = 0;
    for row in rows {
        let Some(id) = row.get(id_field) else {
            continue;
        };
        if ctx.runtime.store.delete(&schema, id)? {
            ctx.changes.push(ChangeMarker {
                record: schema.name.clone(),
                id: id_to_string(id),
            });
            removed += 1;
        }
    }
    Ok(removed)
}

/// Persist `state.<record lowercased>` as a new row, or overwrite the
/// stored row when it already carries an id.
pub fn save(ctx: &mut ExecutionContext, record: &str, span: Span) -> Result<Value, RuntimeError> {
    let schema = schema(ctx, record, span)?.clone();
    let key = record_var(&schema);
    let value = ctx.runtime.state().get(&key).cloned().ok_or_else(|| {
        RuntimeError::InvalidPayload {
            record: schema.name.clone(),
            message: format!("state.{} is not set", key),
            span,
        }
    })?;
    let Value::Map(mut fields) = value else {
        return Err(RuntimeError::InvalidPayload {
            record: schema.name.clone(),
            message: format!("state.{} must be a map, got {}", key, value.type_name()),
            span,
        });
    };
    let id_field = schema.id_field();
    let existing_id = fields.remove(id_field).filter(|id| !id.is_null());
    validate_fields(&schema, &fields, existing_id.is_none(), span)?;
    let Some(id) = existing_id else {
        return create(ctx, record, Value::Map(fields), span);
    };
    let mut row: Record = fields.iter().map(|(k, v)| (k.clone(), v.to_json())).collect();
    row.insert(id_field.to_string(), id.to_json());
    let scope = build_record_scope(ctx, &schema, span)?;
    if let Some(tenant) = scope.tenant_value {
        row.insert(TENANT_KEY_FIELD.to_string(), tenant);
    }
    let stored = match ctx.runtime.store.update(&schema, row.clone()) {
        Ok(stored) => stored,
        Err(namel3ss_storage::StorageError::NotFound { .. }) => ctx.runtime.store.save(&schema, row)?,
        Err(e) => return Err(e.into()),
    };
    mark_changed(ctx, &schema, &stored);
    record_value(&stored)
}

fn scoped_rows(
    ctx: &mut ExecutionContext,
    schema: &RecordSchema,
    predicate: &Expression,
    span: Span,
) -> Result<Vec<Record>, RuntimeError> {
    let scope = build_record_scope(ctx, schema, span)?;
    let plan = build_predicate_plan(ctx, schema, predicate)?;
    Ok(ctx.runtime.store.find(schema, &plan, &scope)?)
}

/// Check field names and types. `require_all` also enforces required fields.
pub fn validate_fields(
    schema: &RecordSchema,
    fields: &BTreeMap<String, Value>,
    require_all: bool,
    span: Span,
) -> Result<(), RuntimeError> {
    for (name, value) in fields {
        if name == schema.id_field() {
            continue;
        }
        let Some(field) = schema.field(name) else {
            return Err(RuntimeError::UnknownField {
                record: schema.name.clone(),
                field: name.clone(),
                span,
            });
        };
        if value.is_null() && !field.required {
            continue;
        }
        if !value.matches_type(&field.type_name) {
            return Err(RuntimeError::InvalidPayload {
                record: schema.name.clone(),
                message: format!(
                    "field \"{}\" must be {}, got {}",
                    name,
                    field.type_name,
                    value.type_name()
                ),
                span,
            });
        }
    }
    if require_all {
        for field in schema.fields.iter().filter(|f| f.required) {
            if fields.get(&field.name).map_or(true, Value::is_null) {
                return Err(RuntimeError::InvalidPayload {
                    record: schema.name.clone(),
                    message: format!("missing required field \"{}\"", field.name),
                    span,
                });
            }
        }
    }
    Ok(())
}

fn is_reserved(schema: &RecordSchema, field: &str) -> bool {
    field == schema.id_field() || field == TENANT_KEY_FIELD || field == EXPIRES_AT_FIELD
}

fn mark_changed(ctx: &mut ExecutionContext, schema: &RecordSchema, row: &Record) {
    if let Some(id) = row.get(schema.id_field()) {
        ctx.changes.push(ChangeMarker {
            record: schema.name.clone(),
            id: id_to_string(id),
        });
    }
}

fn record_value(row: &Record) -> Result<Value, RuntimeError> {
    row.iter()
        .map(|(k, v)| Ok((k.clone(), Value::from_json(v)?)))
        .collect::<Result<BTreeMap<_, _>, RuntimeError>>()
        .map(Value::Map)
}
