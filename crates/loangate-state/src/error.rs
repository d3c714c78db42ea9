//! Error types for loangate-state

use thiserror::Error;

/// Errors raised while connecting to or preparing the SurrealDB backend.
#[derive(Error, Debug)]
pub enum StateError {
    /// Database connection error
    #[error("Database connection failed: {0}")]
    Connection(String),

    /// Database query error
    #[error("Database query failed: {0}")]
    Query(String),

    /// Serialization error
    #[error("Serialization failed: {0}")]
    Serialization(String),

    /// Schema setup error
    #[error("Schema setup failed: {0}")]
    SchemaSetup(String),
}

impl From<surrealdb::Error> for StateError {
    fn from(err: surrealdb::Error) -> Self {
        StateError::Query(err.to_string())
    }
}

impl From<serde_json::Error> for StateError {
    fn from(err: serde_json::Error) -> Self {
        StateError::Serialization(err.to_string())
    }
}

/// Errors returned by the storage traits.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StorageError {
    #[error("loan record not found: {record_id}")]
    RecordNotFound { record_id: String },

    #[error("automation not found: {automation_id}")]
    AutomationNotFound { automation_id: String },

    #[error("queue entry not found: {entry_id}")]
    QueueEntryNotFound { entry_id: String },

    #[error("queue entry {entry_id} is {status}, expected {expected}")]
    InvalidQueueState {
        entry_id: String,
        status: String,
        expected: String,
    },

    #[error("duplicate {kind}: {key}")]
    Duplicate { kind: String, key: String },

    #[error("storage backend unavailable: {0}")]
    Unavailable(String),

    #[error("storage operation timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("storage backend error: {0}")]
    Backend(String),
}

impl StorageError {
    /// Whether retrying the same call may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Unavailable(_) | Self::Timeout { .. })
    }
}

impl From<StateError> for StorageError {
    fn from(err: StateError) -> Self {
        StorageError::Backend(err.to_string())
    }
}
