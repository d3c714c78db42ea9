//! Core domain types for the transition engine.

pub mod error;
pub mod outcome;
pub mod rule;
pub mod transition;

pub use error::{CatalogError, CheckExecutionError, CoordinatorError, Result, StateMachineError};
pub use outcome::{
    Decision, DispatchReport, DispatchResult, EngineWarning, QueueInsertFailure,
    TransitionResult, ValidationOutcome,
};
pub use rule::{ActionKind, AsyncCheck, Predicate, StageRule, StatusChangeRule, TransitionRule};
pub use transition::{FieldTransition, RuleKey, TransitionRequest};
