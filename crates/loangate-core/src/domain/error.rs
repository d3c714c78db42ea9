//! Error taxonomy for the transition engine.

use chrono::{DateTime, Utc};

use loangate_state::StorageError;

/// Errors produced while loading or validating a rule catalogue.
#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error("failed to read catalogue {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid catalogue: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("duplicate rule for {key}")]
    DuplicateRule { key: String },

    #[error("rule #{index} has an empty field or target value")]
    EmptyKey { index: usize },

    #[error("rule {key} requires an action_label for its {action} action")]
    MissingActionLabel { key: String, action: String },
}

/// Infrastructure failure while running an asynchronous check.
///
/// Distinct from a failed predicate: these trigger the fail-open policy.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CheckExecutionError {
    #[error("check timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("check read failed: {0}")]
    Storage(#[from] StorageError),
}

/// Illegal event for the current `TransitionState`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StateMachineError {
    #[error("event {event} is not valid in state {state}")]
    IllegalEvent { state: String, event: String },

    #[error("cannot cancel: the field write has already been committed")]
    CancelAfterCommit,
}

/// System failures surfaced by the coordinator.
///
/// A rule blocking a change is never one of these; see `TransitionResult`.
#[derive(Debug, thiserror::Error)]
pub enum CoordinatorError {
    #[error("a transition of {field} on {record_id} is already in flight ({state})")]
    TransitionInFlight {
        record_id: String,
        field: String,
        state: String,
    },

    #[error("bypass requested without an acting user")]
    UnattributedBypass,

    #[error("failed to read record {record_id}: {source}")]
    SnapshotRead {
        record_id: String,
        #[source]
        source: StorageError,
    },

    #[error("failed to write {field} on {record_id}: {source}")]
    PersistenceWrite {
        record_id: String,
        field: String,
        #[source]
        source: StorageError,
    },

    #[error("no decision pending for {field} on {record_id}")]
    NoPendingDecision { record_id: String, field: String },

    #[error("decision for {field} on {record_id} expired at {expired_at}")]
    DecisionExpired {
        record_id: String,
        field: String,
        expired_at: DateTime<Utc>,
    },

    #[error("cancel of {field} on {record_id} is not supported after the write committed")]
    CancelNotSupported { record_id: String, field: String },

    #[error("state machine error: {0}")]
    StateMachine(#[from] StateMachineError),
}

impl CoordinatorError {
    /// Retrying the same call later may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::TransitionInFlight { .. } => true,
            Self::SnapshotRead { source, .. } | Self::PersistenceWrite { source, .. } => {
                source.is_transient()
            }
            _ => false,
        }
    }
}

/// Result type for coordinator operations.
pub type Result<T> = std::result::Result<T, CoordinatorError>;
