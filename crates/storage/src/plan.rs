use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::StorageError;
use crate::record::Record;

/// Which query dialect a store speaks. Drives whether RecordOperations
/// attempts SQL compilation and which placeholder style it uses.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreDialect {
    #[default]
    Memory,
    Sqlite,
    Postgres,
}

impl StoreDialect {
    pub fn supports_sql(self) -> bool {
        matches!(self, StoreDialect::Sqlite | StoreDialect::Postgres)
    }

    /// Placeholder for the 1-based parameter `index`.
    pub fn placeholder(self, index: usize) -> String {
        match self {
            StoreDialect::Postgres => format!("${}", index),
            StoreDialect::Sqlite | StoreDialect::Memory => "?".to_string(),
        }
    }
}

/// A compiled WHERE-clause fragment with positional parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SqlFragment {
    pub clause: String,
    pub params: Vec<serde_json::Value>,
}

/// Row predicate. Errors (e.g. a non-boolean result) are fatal to the query.
pub type RecordPredicate = Arc<dyn Fn(&Record) -> Result<bool, StorageError> + Send + Sync>;

/// Dual-representation filter handed to [`crate::RecordStore::find`].
///
/// `predicate` is always the ground truth. `sql`, when present, is an
/// equivalent fragment a SQL-backed store may push down instead of
/// evaluating the closure row by row. `sql_reason` records why SQL was or
/// was not produced.
#[derive(Clone)]
pub struct PredicatePlan {
    pub predicate: RecordPredicate,
    pub sql: Option<SqlFragment>,
    pub sql_reason: String,
}

impl PredicatePlan {
    /// A closure-only plan.
    pub fn closure<F>(predicate: F, reason: impl Into<String>) -> Self
    where
        F: Fn(&Record) -> Result<bool, StorageError> + Send + Sync + 'static,
    {
        PredicatePlan {
            predicate: Arc::new(predicate),
            sql: None,
            sql_reason: reason.into(),
        }
    }

    /// Matches every row.
    pub fn all() -> Self {
        PredicatePlan::closure(|_| Ok(true), "no predicate")
    }

    pub fn with_sql(mut self, sql: SqlFragment) -> Self {
        self.sql = Some(sql);
        self.sql_reason = "compiled".to_string();
        self
    }

    pub fn matches(&self, record: &Record) -> Result<bool, StorageError> {
        (self.predicate)(record)
    }
}

impl fmt::Debug for PredicatePlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PredicatePlan")
            .field("sql", &self.sql)
            .field("sql_reason", &self.sql_reason)
            .finish_non_exhaustive()
    }
}
