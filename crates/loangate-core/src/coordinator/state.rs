//! The confirmation protocol as an explicit finite-state machine.
//!
//! ```text
//! Idle -> Validating -> Blocked
//!                    -> Cancelled
//!                    -> Applying -> Failed
//!                                -> Done
//!                                -> Dispatching -> AwaitingDecision -> Resolving -> Done
//!                                                                   -> Done (expired)
//! ```
//!
//! `TransitionState::on` is pure; the coordinator performs the I/O and feeds
//! the results back in as events. States serialize with a `state` tag.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{Decision, FieldTransition, StateMachineError};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum TransitionState {
    #[default]
    Idle,
    Validating {
        transition: FieldTransition,
    },
    Blocked {
        transition: FieldTransition,
        rule_key: String,
        reason: String,
    },
    Cancelled {
        transition: FieldTransition,
    },
    Applying {
        transition: FieldTransition,
        bypassed_rule: Option<String>,
    },
    Failed {
        transition: FieldTransition,
        error: String,
    },
    Dispatching {
        transition: FieldTransition,
        change_id: String,
        automation_ids: Vec<String>,
    },
    AwaitingDecision {
        transition: FieldTransition,
        change_id: String,
        automation_ids: Vec<String>,
        expires_at: DateTime<Utc>,
    },
    /// A decision arrived and its dispatch is running. No longer subject to expiry.
    Resolving {
        transition: FieldTransition,
        change_id: String,
        automation_ids: Vec<String>,
        decision: Decision,
    },
    Done {
        transition: FieldTransition,
        change_id: String,
        decision: Option<Decision>,
        queued: usize,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum TransitionEvent {
    Propose {
        transition: FieldTransition,
    },
    RuleFailed {
        rule_key: String,
        reason: String,
    },
    RulePassed,
    Bypassed {
        rule_key: String,
    },
    Cancel,
    WriteFailed {
        error: String,
    },
    /// The write committed; `automation_ids` are the matched automations.
    Committed {
        change_id: String,
        automation_ids: Vec<String>,
    },
    DecisionRequested {
        expires_at: DateTime<Utc>,
    },
    Decide {
        decision: Decision,
    },
    Resolved {
        queued: usize,
    },
    /// No decision arrived before `expires_at`; settled as apply-only.
    Expired,
}

impl TransitionEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Propose { .. } => "propose",
            Self::RuleFailed { .. } => "rule_failed",
            Self::RulePassed => "rule_passed",
            Self::Bypassed { .. } => "bypassed",
            Self::Cancel => "cancel",
            Self::WriteFailed { .. } => "write_failed",
            Self::Committed { .. } => "committed",
            Self::DecisionRequested { .. } => "decision_requested",
            Self::Decide { .. } => "decide",
            Self::Resolved { .. } => "resolved",
            Self::Expired => "expired",
        }
    }
}

impl TransitionState {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Validating { .. } => "validating",
            Self::Blocked { .. } => "blocked",
            Self::Cancelled { .. } => "cancelled",
            Self::Applying { .. } => "applying",
            Self::Failed { .. } => "failed",
            Self::Dispatching { .. } => "dispatching",
            Self::AwaitingDecision { .. } => "awaiting_decision",
            Self::Resolving { .. } => "resolving",
            Self::Done { .. } => "done",
        }
    }

    /// Terminal states release the `(record, field)` slot.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Blocked { .. } | Self::Cancelled { .. } | Self::Failed { .. } | Self::Done { .. }
        )
    }

    /// Whether the field write has committed in this attempt.
    pub fn is_committed(&self) -> bool {
        matches!(
            self,
            Self::Dispatching { .. }
                | Self::AwaitingDecision { .. }
                | Self::Resolving { .. }
                | Self::Done { .. }
        )
    }

    pub fn transition(&self) -> Option<&FieldTransition> {
        match self {
            Self::Idle => None,
            Self::Validating { transition }
            | Self::Blocked { transition, .. }
            | Self::Cancelled { transition }
            | Self::Applying { transition, .. }
            | Self::Failed { transition, .. }
            | Self::Dispatching { transition, .. }
            | Self::AwaitingDecision { transition, .. }
            | Self::Resolving { transition, .. }
            | Self::Done { transition, .. } => Some(transition),
        }
    }

    /// Apply an event, returning the next state.
    pub fn on(self, event: TransitionEvent) -> Result<TransitionState, StateMachineError> {
        use TransitionEvent as E;
        use TransitionState as S;

        match (self, event) {
            (S::Idle, E::Propose { transition }) => Ok(S::Validating { transition }),

            (S::Validating { transition }, E::RuleFailed { rule_key, reason }) => Ok(S::Blocked {
                transition,
                rule_key,
                reason,
            }),
            (S::Validating { transition }, E::RulePassed) => Ok(S::Applying {
                transition,
                bypassed_rule: None,
            }),
            (S::Validating { transition }, E::Bypassed { rule_key }) => Ok(S::Applying {
                transition,
                bypassed_rule: Some(rule_key),
            }),
            (S::Validating { transition }, E::Cancel) => Ok(S::Cancelled { transition }),

            (S::Applying { transition, .. }, E::WriteFailed { error }) => {
                Ok(S::Failed { transition, error })
            }
            (
                S::Applying { transition, .. },
                E::Committed {
                    change_id,
                    automation_ids,
                },
            ) => {
                if automation_ids.is_empty() {
                    Ok(S::Done {
                        transition,
                        change_id,
                        decision: None,
                        queued: 0,
                    })
                } else {
                    Ok(S::Dispatching {
                        transition,
                        change_id,
                        automation_ids,
                    })
                }
            }

            (
                S::Dispatching {
                    transition,
                    change_id,
                    automation_ids,
                },
                E::DecisionRequested { expires_at },
            ) => Ok(S::AwaitingDecision {
                transition,
                change_id,
                automation_ids,
                expires_at,
            }),

            (
                S::AwaitingDecision {
                    transition,
                    change_id,
                    automation_ids,
                    ..
                },
                E::Decide { decision },
            ) => Ok(S::Resolving {
                transition,
                change_id,
                automation_ids,
                decision,
            }),
            (
                S::Resolving {
                    transition,
                    change_id,
                    decision,
                    ..
                },
                E::Resolved { queued },
            ) => Ok(S::Done {
                transition,
                change_id,
                decision: Some(decision),
                queued,
            }),
            (
                S::AwaitingDecision {
                    transition,
                    change_id,
                    ..
                },
                E::Expired,
            ) => Ok(S::Done {
                transition,
                change_id,
                decision: Some(Decision::ApplyOnly),
                queued: 0,
            }),

            (state, E::Cancel) if state.is_committed() => Err(StateMachineError::CancelAfterCommit),

            (state, event) => Err(StateMachineError::IllegalEvent {
                state: state.name().to_string(),
                event: event.name().to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t() -> FieldTransition {
        FieldTransition::new("status", "Approved").with_from(Some("Submitted".into()))
    }

    fn validating() -> TransitionState {
        TransitionState::Idle
            .on(TransitionEvent::Propose { transition: t() })
            .unwrap()
    }

    #[test]
    fn blocked_path() {
        let s = validating()
            .on(TransitionEvent::RuleFailed {
                rule_key: "status=Approved".into(),
                reason: "appraisal".into(),
            })
            .unwrap();
        assert_eq!(s.name(), "blocked");
        assert!(s.is_terminal());
        assert!(!s.is_committed());
    }

    #[test]
    fn apply_without_automations_goes_straight_to_done() {
        let s = validating()
            .on(TransitionEvent::RulePassed)
            .unwrap()
            .on(TransitionEvent::Committed {
                change_id: "c1".into(),
                automation_ids: vec![],
            })
            .unwrap();
        assert!(matches!(s, TransitionState::Done { decision: None, queued: 0, .. }));
    }

    #[test]
    fn decision_path() {
        let expires_at = Utc::now();
        let s = validating()
            .on(TransitionEvent::Bypassed {
                rule_key: "status=Approved".into(),
            })
            .unwrap();
        assert!(matches!(
            &s,
            TransitionState::Applying { bypassed_rule: Some(k), .. } if k == "status=Approved"
        ));

        let s = s
            .on(TransitionEvent::Committed {
                change_id: "c1".into(),
                automation_ids: vec!["a1".into(), "a2".into()],
            })
            .unwrap();
        assert_eq!(s.name(), "dispatching");

        let s = s
            .on(TransitionEvent::DecisionRequested { expires_at })
            .unwrap();
        assert_eq!(s.name(), "awaiting_decision");
        assert!(!s.is_terminal());

        let s = s
            .on(TransitionEvent::Decide {
                decision: Decision::SendAndApply,
            })
            .unwrap();
        assert_eq!(s.name(), "resolving");
        assert!(s.is_committed());
        assert!(!s.is_terminal());

        let s = s.on(TransitionEvent::Resolved { queued: 2 }).unwrap();
        assert!(matches!(
            s,
            TransitionState::Done { decision: Some(Decision::SendAndApply), queued: 2, .. }
        ));
    }

    #[test]
    fn cancel_only_before_commit() {
        let cancelled = validating().on(TransitionEvent::Cancel).unwrap();
        assert_eq!(cancelled.name(), "cancelled");

        let awaiting = validating()
            .on(TransitionEvent::RulePassed)
            .unwrap()
            .on(TransitionEvent::Committed {
                change_id: "c1".into(),
                automation_ids: vec!["a1".into()],
            })
            .unwrap()
            .on(TransitionEvent::DecisionRequested {
                expires_at: Utc::now(),
            })
            .unwrap();
        assert_eq!(
            awaiting.on(TransitionEvent::Cancel),
            Err(StateMachineError::CancelAfterCommit)
        );
    }

    #[test]
    fn illegal_events_are_errors() {
        let err = TransitionState::Idle
            .on(TransitionEvent::RulePassed)
            .unwrap_err();
        assert_eq!(
            err,
            StateMachineError::IllegalEvent {
                state: "idle".into(),
                event: "rule_passed".into()
            }
        );
        assert!(validating()
            .on(TransitionEvent::Resolved { queued: 0 })
            .is_err());
    }

    #[test]
    fn expiry_settles_apply_only_and_not_once_resolving() {
        let awaiting = validating()
            .on(TransitionEvent::RulePassed)
            .unwrap()
            .on(TransitionEvent::Committed {
                change_id: "c1".into(),
                automation_ids: vec!["a1".into()],
            })
            .unwrap()
            .on(TransitionEvent::DecisionRequested {
                expires_at: Utc::now(),
            })
            .unwrap();

        let settled = awaiting.clone().on(TransitionEvent::Expired).unwrap();
        assert!(matches!(
            settled,
            TransitionState::Done { decision: Some(Decision::ApplyOnly), queued: 0, .. }
        ));

        let resolving = awaiting
            .on(TransitionEvent::Decide {
                decision: Decision::SendAndApply,
            })
            .unwrap();
        assert!(resolving.on(TransitionEvent::Expired).is_err());
    }

    #[test]
    fn state_serializes_with_tag() {
        let s = validating();
        let json = serde_json::to_value(&s).unwrap();
        assert_eq!(json["state"], "validating");
        assert_eq!(json["transition"]["to_value"], "Approved");

        let back: TransitionState = serde_json::from_value(json).unwrap();
        assert_eq!(back, s);
    }
}
