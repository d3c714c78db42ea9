//! loangate-state: persistence for the loan transition engine
//!
//! This crate owns every read and write the transition engine performs:
//! loan record snapshots, attributable field writes, related-document
//! reads, automation definitions, and the automation queue.
//!
//! ## Key Components
//!
//! - `storage_traits`: backend-agnostic async traits and their value types
//! - `fakes`: in-memory implementations with failure injection for tests
//! - `SurrealLoanStore`: SurrealDB implementation of every trait

mod error;
pub mod fakes;
mod handle;
pub mod migrations;
mod schema;
pub mod storage_traits;
mod surreal_store;

pub use error::{StateError, StorageError};
pub use handle::{connect_cloud, connect_from_env, connect_url, CloudConfig};
pub use storage_traits::{
    AutomationDefinition, AutomationQueue, AutomationQueueEntry, AutomationStore, Enqueued,
    FieldChange, FieldWrite, NewQueueEntry, QueueEntryId, QueueStatus, RecipientType, RecordId,
    RecordSnapshot, RecordStore, RelatedDocument, RelatedDocumentReader, StorageResult,
    TriggerType,
};
pub use surreal_store::SurrealLoanStore;

/// Result type for connection and schema operations
pub type Result<T> = std::result::Result<T, StateError>;
