use std::collections::BTreeMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::RwLock;

use namel3ss_ir::RecordSchema;

use crate::error::StorageError;
use crate::plan::{PredicatePlan, StoreDialect};
use crate::record::{id_to_string, Record, RecordScope, EXPIRES_AT_FIELD};
use crate::sql::fragment_matches;
use crate::traits::RecordStore;

/// In-process record store.
///
/// With [`StoreDialect::Memory`] it always filters with the plan's closure.
/// Constructed with a SQL dialect it behaves like a SQL backend: when a plan
/// carries `sql` the fragment is interpreted instead of the closure.
#[derive(Debug)]
pub struct MemoryStore {
    dialect: StoreDialect,
    tables: RwLock<BTreeMap<String, Vec<Record>>>,
    next_id: AtomicI64,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::with_dialect(StoreDialect::Memory)
    }

    pub fn with_dialect(dialect: StoreDialect) -> Self {
        MemoryStore {
            dialect,
            tables: RwLock::new(BTreeMap::new()),
            next_id: AtomicI64::new(1),
        }
    }

    /// Every stored row of `record`, unscoped. Intended for tests and
    /// inspection tooling.
    pub fn rows(&self, record: &str) -> Result<Vec<Record>, StorageError> {
        let tables = self.tables.read().map_err(|_| poisoned())?;
        Ok(tables.get(record).cloned().unwrap_or_default())
    }

    fn purge_expired(&self, schema: &RecordSchema, scope: &RecordScope) -> Result<(), StorageError> {
        let (Some(_), Some(now)) = (schema.ttl_hours, scope.now) else {
            return Ok(());
        };
        let mut tables = self.tables.write().map_err(|_| poisoned())?;
        if let Some(rows) = tables.get_mut(&schema.name) {
            let before = rows.len();
            rows.retain(|row| {
                row.get(EXPIRES_AT_FIELD)
                    .and_then(|v| v.as_i64())
                    .is_some_and(|expires_at| expires_at > now)
            });
            let purged = before - rows.len();
            if purged > 0 {
                tracing::debug!(record = %schema.name, purged, "purged expired records");
            }
        }
        Ok(())
    }
}

fn poisoned() -> StorageError {
    StorageError::Backend("memory store lock poisoned".to_string())
}

impl RecordStore for MemoryStore {
    fn dialect(&self) -> StoreDialect {
        self.dialect
    }

    fn save(&self, schema: &RecordSchema, mut record: Record) -> Result<Record, StorageError> {
        let id_field = schema.id_field();
        if matches!(record.get(id_field), None | Some(serde_json::Value::Null)) {
            let id = self.next_id.fetch_add(1, Ordering::SeqCst);
            record.insert(id_field.to_string(), serde_json::Value::from(id));
        }
        let mut tables = self.tables.write().map_err(|_| poisoned())?;
        tables
            .entry(schema.name.clone())
            .or_default()
            .push(record.clone());
        Ok(record)
    }

    fn find(
        &self,
        schema: &RecordSchema,
        plan: &PredicatePlan,
        scope: &RecordScope,
    ) -> Result<Vec<Record>, StorageError> {
        self.purge_expired(schema, scope)?;
        let rows = self.rows(&schema.name)?;
        let pushdown = plan.sql.as_ref().filter(|_| self.dialect.supports_sql());
        let mut out = Vec::new();
        for row in rows {
            if !scope.admits(schema, &row) {
                continue;
            }
            let selected = match pushdown {
                Some(fragment) => fragment_matches(fragment, &row)?,
                None => plan.matches(&row)?,
            };
            if selected {
                out.push(row);
            }
        }
        Ok(out)
    }

    fn update(&self, schema: &RecordSchema, record: Record) -> Result<Record, StorageError> {
        let id_field = schema.id_field();
        let id = record
            .get(id_field)
            .cloned()
            .ok_or_else(|| StorageError::MissingId {
                record: schema.name.clone(),
                id_field: id_field.to_string(),
            })?;
        let mut tables = self.tables.write().map_err(|_| poisoned())?;
        let slot = tables
            .get_mut(&schema.name)
            .and_then(|rows| rows.iter_mut().find(|row| row.get(id_field) == Some(&id)))
            .ok_or_else(|| StorageError::NotFound {
                record: schema.name.clone(),
                id_field: id_field.to_string(),
                id: id_to_string(&id),
            })?;
        *slot = record.clone();
        Ok(record)
    }

    fn delete(&self, schema: &RecordSchema, id: &serde_json::Value) -> Result<bool, StorageError> {
        let id_field = schema.id_field();
        let mut tables = self.tables.write().map_err(|_| poisoned())?;
        let Some(rows) = tables.get_mut(&schema.name) else {
            return Ok(false);
        };
        let before = rows.len();
        rows.retain(|row| row.get(id_field) != Some(id));
        Ok(rows.len() < before)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::SqlFragment;
    use crate::record::TENANT_KEY_FIELD;
    use namel3ss_ir::{Expression, RecordField};
    use serde_json::json;

    fn schema(tenant: bool, ttl: Option<u64>) -> RecordSchema {
        RecordSchema {
            name: "Order".to_string(),
            fields: vec![RecordField {
                name: "total".to_string(),
                type_name: "number".to_string(),
                required: true,
            }],
            tenant_key: tenant.then(|| Expression::attr("identity", &["org"])),
            ttl_hours: ttl,
        }
    }

    fn row(v: serde_json::Value) -> Record {
        serde_json::from_value(v).unwrap()
    }

    #[test]
    fn save_assigns_ids_and_update_replaces() {
        let store = MemoryStore::new();
        let s = schema(false, None);
        let a = store.save(&s, row(json!({"total": 1}))).unwrap();
        let b = store.save(&s, row(json!({"total": 2}))).unwrap();
        assert_eq!(a["_id"], json!(1));
        assert_eq!(b["_id"], json!(2));

        let mut changed = b.clone();
        changed.insert("total".into(), json!(5));
        store.update(&s, changed).unwrap();
        let rows = store.rows("Order").unwrap();
        assert_eq!(rows[1]["total"], json!(5));

        let missing = row(json!({"_id": 99, "total": 0}));
        assert!(matches!(store.update(&s, missing), Err(StorageError::NotFound { .. })));
        assert!(store.delete(&s, &json!(1)).unwrap());
        assert!(!store.delete(&s, &json!(1)).unwrap());
    }

    #[test]
    fn tenant_scope_hides_other_tenants() {
        let store = MemoryStore::new();
        let s = schema(true, None);
        store.save(&s, row(json!({"total": 1, TENANT_KEY_FIELD: "acme"}))).unwrap();
        store.save(&s, row(json!({"total": 2, TENANT_KEY_FIELD: "globex"}))).unwrap();
        let scope = RecordScope {
            tenant_value: Some(json!("acme")),
            now: None,
        };
        let found = store.find(&s, &PredicatePlan::all(), &scope).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0]["total"], json!(1));
    }

    #[test]
    fn expired_rows_are_purged() {
        let store = MemoryStore::new();
        let s = schema(false, Some(1));
        store.save(&s, row(json!({"total": 1, EXPIRES_AT_FIELD: 100}))).unwrap();
        store.save(&s, row(json!({"total": 2, EXPIRES_AT_FIELD: 500}))).unwrap();
        let scope = RecordScope {
            tenant_value: None,
            now: Some(200),
        };
        let found = store.find(&s, &PredicatePlan::all(), &scope).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(store.rows("Order").unwrap().len(), 1);
    }

    #[test]
    fn sql_dialect_pushes_fragment_down() {
        let store = MemoryStore::with_dialect(StoreDialect::Sqlite);
        let s = schema(false, None);
        store.save(&s, row(json!({"total": 1}))).unwrap();
        store.save(&s, row(json!({"total": 20}))).unwrap();
        // Closure rejects everything; the fragment is what selects here.
        let plan = PredicatePlan::closure(|_| Ok(false), "test").with_sql(SqlFragment {
            clause: "\"total\" > ?".to_string(),
            params: vec![json!(10)],
        });
        let found = store.find(&s, &plan, &RecordScope::default()).unwrap();
        assert_eq!(found.len(), 1);

        let memory = MemoryStore::new();
        memory.save(&s, row(json!({"total": 20}))).unwrap();
        assert!(memory.find(&s, &plan, &RecordScope::default()).unwrap().is_empty());
    }
}
