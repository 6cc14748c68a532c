/// All errors that can be returned by a RecordStore implementation.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// An update targeted an id that no longer exists.
    #[error("record '{record}' with {id_field}={id} was not found")]
    NotFound {
        record: String,
        id_field: String,
        id: String,
    },

    /// An update was issued without the record's identifier.
    #[error("record '{record}' update requires {id_field}")]
    MissingId { record: String, id_field: String },

    /// The predicate closure failed on a row (e.g. non-boolean result).
    #[error("predicate error: {0}")]
    Predicate(String),

    /// A compiled SQL fragment could not be interpreted.
    #[error("invalid sql fragment '{clause}': {message}")]
    InvalidSql { clause: String, message: String },

    /// A backend-specific storage error (connection, lock, serialization).
    #[error("storage backend error: {0}")]
    Backend(String),
}
