use namel3ss_ir::RecordSchema;

use crate::error::StorageError;
use crate::plan::{PredicatePlan, StoreDialect};
use crate::record::{Record, RecordScope};

/// The record store contract consumed by RecordOperations.
///
/// ## Predicate plans
///
/// `find` receives a [`PredicatePlan`]. A store that speaks SQL may push
/// `plan.sql` down in place of the closure; a store that does not, or a plan
/// without `sql`, must filter with `plan.predicate`. Both paths must select
/// the same rows.
///
/// ## Scoping
///
/// `scope` is applied before the predicate. Tenant matching is only
/// enforced when the schema declares a tenant key, TTL expiry only when it
/// declares `ttl_hours`.
///
/// ## Concurrency
///
/// Implementations are shared across concurrent flow invocations and must
/// be `Send + Sync`. No method may assume exclusive access between calls:
/// a row returned by `find` may be gone by the time `update` runs.
pub trait RecordStore: Send + Sync {
    /// Query dialect, used to decide whether SQL compilation is attempted.
    fn dialect(&self) -> StoreDialect;

    /// Insert a new row. Assigns the id column when absent and returns the
    /// stored row.
    fn save(&self, schema: &RecordSchema, record: Record) -> Result<Record, StorageError>;

    /// Rows visible under `scope` that match `plan`, ordered by id.
    fn find(
        &self,
        schema: &RecordSchema,
        plan: &PredicatePlan,
        scope: &RecordScope,
    ) -> Result<Vec<Record>, StorageError>;

    /// Replace the row with the same id. Returns
    /// `Err(StorageError::NotFound)` when no such row exists.
    fn update(&self, schema: &RecordSchema, record: Record) -> Result<Record, StorageError>;

    /// Delete by id. Returns whether a row was removed.
    fn delete(&self, schema: &RecordSchema, id: &serde_json::Value) -> Result<bool, StorageError>;
}
