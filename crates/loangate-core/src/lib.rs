//! loangate Core Library
//!
//! Validates proposed field changes on loan records against a rule
//! catalogue, applies permitted changes, and queues the automations a
//! committed change triggers once the user confirms.
//!
//! ## Flow
//!
//! `ConfirmationCoordinator::propose` looks up the rule for
//! `(field, target_value)`, evaluates it (sync predicate, then any async
//! check), writes the field, and matches active automations. When
//! automations match, `resolve_decision` decides whether they are queued.

pub mod automation;
pub mod config;
pub mod coordinator;
pub mod domain;
pub mod metrics;
pub mod obs;
pub mod rules;
pub mod telemetry;
pub mod validation;

pub use automation::{match_automations, AutomationDispatcher, AutomationMatcher};
pub use config::EngineConfig;
pub use coordinator::{
    CancelOutcome, ConfirmationCoordinator, CoordinatorStores, TransitionEvent, TransitionState,
};
pub use domain::{
    ActionKind, AsyncCheck, CatalogError, CheckExecutionError, CoordinatorError, Decision,
    DispatchReport, DispatchResult, EngineWarning, FieldTransition, Predicate, QueueInsertFailure,
    Result, RuleKey, StageRule, StateMachineError, StatusChangeRule, TransitionRequest,
    TransitionResult, TransitionRule, ValidationOutcome,
};
pub use metrics::METRICS;
pub use rules::{RuleCatalog, RuleRegistry};
pub use telemetry::init_tracing;
pub use validation::{AsyncValidator, CheckOutcome};

pub use loangate_state::{
    AutomationDefinition, AutomationQueueEntry, Enqueued, FieldChange, QueueEntryId, QueueStatus,
    RecipientType, RecordId, RecordSnapshot, RelatedDocument, StorageError, TriggerType,
};

/// loangate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
