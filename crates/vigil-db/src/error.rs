//! Error types for the record store.

/// Errors that can occur while reading or writing classified records.
#[derive(Debug, thiserror::Error)]
pub enum RecordError {
    /// A database operation failed.
    #[error("record database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// A stored row could not be decoded.
    #[error("corrupt record {id}: {reason}")]
    Corrupt {
        /// Identifier of the offending row.
        id: i64,
        /// What could not be decoded.
        reason: String,
    },

    /// Input rejected before reaching the database.
    #[error("invalid record request: {0}")]
    Invalid(String),
}
