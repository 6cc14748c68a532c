//! namel3ss-storage: the record store contract and a reference in-memory
//! implementation.
//!
//! The engine only defines what a store must satisfy: scoped `find` over a
//! dual closure/SQL [`PredicatePlan`], plus `save`, `update` and `delete`.

mod error;
mod memory;
mod plan;
mod record;
pub mod sql;
mod traits;

pub use error::StorageError;
pub use memory::MemoryStore;
pub use plan::{PredicatePlan, RecordPredicate, SqlFragment, StoreDialect};
pub use record::{
    id_to_string, ChangeMarker, Record, RecordScope, EXPIRES_AT_FIELD, TENANT_KEY_FIELD,
};
pub use traits::RecordStore;
