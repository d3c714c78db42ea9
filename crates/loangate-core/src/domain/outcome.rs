//! Caller-visible outcomes.
//!
//! Business blocks are values here. System failures are
//! `CoordinatorError`s and never appear in these types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use loangate_state::{AutomationDefinition, Enqueued, FieldChange};

use super::rule::{ActionKind, TransitionRule};

/// Non-fatal problem the engine worked around.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "warning", rename_all = "snake_case")]
pub enum EngineWarning {
    /// An asynchronous check could not run; the transition was permitted.
    CheckFailedOpen {
        rule_key: String,
        check: String,
        error: String,
    },
    /// A bypass flag was supplied for a rule that does not allow it.
    BypassIgnored { rule_key: String },
    /// The active automation set could not be read after the write committed.
    AutomationLookupFailed { error: String },
}

/// Result of evaluating a rule. Produced and consumed within one run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationOutcome {
    pub is_valid: bool,
    pub rule: Option<TransitionRule>,
    pub reason: Option<String>,
    #[serde(default)]
    pub warnings: Vec<EngineWarning>,
}

impl ValidationOutcome {
    /// Valid; `rule` is the rule that was satisfied, if one exists.
    pub fn pass(rule: Option<TransitionRule>) -> Self {
        Self {
            is_valid: true,
            rule,
            reason: None,
            warnings: Vec::new(),
        }
    }

    pub fn blocked(rule: TransitionRule, reason: impl Into<String>) -> Self {
        Self {
            is_valid: false,
            rule: Some(rule),
            reason: Some(reason.into()),
            warnings: Vec::new(),
        }
    }

    pub fn with_warning(mut self, warning: EngineWarning) -> Self {
        self.warnings.push(warning);
        self
    }
}

/// Outcome of `ConfirmationCoordinator::propose`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum TransitionResult {
    /// The write committed and no automation matched.
    Applied {
        change: FieldChange,
        field_label: String,
        warnings: Vec<EngineWarning>,
    },
    /// A rule blocked the change. The field is untouched.
    Blocked {
        rule: TransitionRule,
        field_label: String,
        attempted_value: String,
        reason: String,
        warnings: Vec<EngineWarning>,
    },
    /// The write committed and automations matched; call `resolve_decision`.
    AppliedPendingDecision {
        change: FieldChange,
        automations: Vec<AutomationDefinition>,
        field_label: String,
        attempted_value: String,
        expires_at: DateTime<Utc>,
        warnings: Vec<EngineWarning>,
    },
    /// A cancel arrived before the write. Nothing was changed.
    Cancelled {
        field_label: String,
        attempted_value: String,
    },
}

impl TransitionResult {
    /// Whether the field write committed.
    pub fn is_applied(&self) -> bool {
        matches!(
            self,
            Self::Applied { .. } | Self::AppliedPendingDecision { .. }
        )
    }

    pub fn is_blocked(&self) -> bool {
        matches!(self, Self::Blocked { .. })
    }

    /// Remediation for a block: the action kind and its label.
    pub fn required_action(&self) -> Option<(ActionKind, Option<&str>)> {
        match self {
            Self::Blocked { rule, .. } => Some((rule.action_kind(), rule.action_label())),
            _ => None,
        }
    }

    pub fn warnings(&self) -> &[EngineWarning] {
        match self {
            Self::Applied { warnings, .. }
            | Self::Blocked { warnings, .. }
            | Self::AppliedPendingDecision { warnings, .. } => warnings,
            Self::Cancelled { .. } => &[],
        }
    }
}

/// Resolution offered once a committed transition matched automations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    /// Queue one entry per matched automation.
    SendAndApply,
    /// Keep the committed change, queue nothing.
    ApplyOnly,
}

impl std::fmt::Display for Decision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::SendAndApply => f.write_str("send_and_apply"),
            Self::ApplyOnly => f.write_str("apply_only"),
        }
    }
}

/// One automation whose queue insert failed. Safe to retry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueInsertFailure {
    pub automation_id: String,
    pub error: String,
    pub transient: bool,
}

/// Outcome of dispatching one committed transition's automations.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DispatchReport {
    /// Entries created now or found already queued, in automation order.
    pub entries: Vec<Enqueued>,
    pub failures: Vec<QueueInsertFailure>,
}

impl DispatchReport {
    pub fn created(&self) -> usize {
        self.entries.iter().filter(|e| e.inserted).count()
    }

    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Outcome of `ConfirmationCoordinator::resolve_decision`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchResult {
    pub decision: Decision,
    pub change: FieldChange,
    pub report: DispatchReport,
}
