use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use namel3ss_ir::RecordSchema;

/// A stored row: field name to JSON value.
pub type Record = BTreeMap<String, serde_json::Value>;

/// Column stamped with the caller's tenant value on create.
pub const TENANT_KEY_FIELD: &str = "_tenant";

/// Column holding the expiry time (logical unix seconds) of TTL records.
pub const EXPIRES_AT_FIELD: &str = "_expires_at";

/// Row-level scope computed from the schema's tenant rule and the caller.
///
/// The store applies the scope before the predicate; callers never see
/// rows outside it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RecordScope {
    /// Tenant value to match against [`TENANT_KEY_FIELD`]. Only applied when
    /// the schema declares a tenant key.
    pub tenant_value: Option<serde_json::Value>,
    /// Current logical time. Only applied when the schema declares a TTL.
    pub now: Option<i64>,
}

impl RecordScope {
    /// True when `record` is visible under this scope for `schema`.
    pub fn admits(&self, schema: &RecordSchema, record: &Record) -> bool {
        if schema.tenant_key.is_some() {
            if let Some(tenant) = &self.tenant_value {
                if record.get(TENANT_KEY_FIELD) != Some(tenant) {
                    return false;
                }
            }
        }
        if schema.ttl_hours.is_some() {
            if let Some(now) = self.now {
                match record.get(EXPIRES_AT_FIELD).and_then(|v| v.as_i64()) {
                    Some(expires_at) if expires_at > now => {}
                    _ => return false,
                }
            }
        }
        true
    }
}

/// Change marker emitted for every row touched by update or delete.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeMarker {
    pub record: String,
    pub id: String,
}

/// Render an id value the way change markers and errors show it.
pub fn id_to_string(id: &serde_json::Value) -> String {
    match id {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
