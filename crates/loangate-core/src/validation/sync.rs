//! Synchronous validation against a record snapshot.

use loangate_state::RecordSnapshot;

use crate::domain::{TransitionRule, ValidationOutcome};

/// Evaluate a rule's predicate. No I/O; a failing predicate is an outcome,
/// not an error. `None` (no rule for the transition) always passes.
///
/// The rule's asynchronous check, if any, is not run here.
pub fn evaluate(rule: Option<&TransitionRule>, snapshot: &RecordSnapshot) -> ValidationOutcome {
    let Some(rule) = rule else {
        return ValidationOutcome::pass(None);
    };
    match rule.predicate().explain_failure(snapshot) {
        None => ValidationOutcome::pass(Some(rule.clone())),
        Some(detail) => {
            let reason = if detail.is_empty() {
                rule.message().to_string()
            } else {
                format!("{} ({detail})", rule.message())
            };
            ValidationOutcome::blocked(rule.clone(), reason)
        }
    }
}
