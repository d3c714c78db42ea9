//! Field transitions and the keys rules are registered under.

use serde::{Deserialize, Serialize};

use loangate_state::RecordId;

/// Exact-match key of a rule: `(field, target_value)`, both case-sensitive.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RuleKey {
    pub field: String,
    pub target_value: String,
}

impl RuleKey {
    pub fn new(field: impl Into<String>, target_value: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            target_value: target_value.into(),
        }
    }
}

impl std::fmt::Display for RuleKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}={}", self.field, self.target_value)
    }
}

/// One proposed change of one field. Lives for a single attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldTransition {
    pub field: String,
    pub from_value: Option<String>,
    pub to_value: String,
}

impl FieldTransition {
    pub fn new(field: impl Into<String>, to_value: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            from_value: None,
            to_value: to_value.into(),
        }
    }

    pub fn with_from(mut self, from_value: Option<String>) -> Self {
        self.from_value = from_value;
        self
    }

    pub fn key(&self) -> RuleKey {
        RuleKey::new(self.field.clone(), self.to_value.clone())
    }
}

/// What a caller hands to `ConfirmationCoordinator::propose`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionRequest {
    pub record_id: RecordId,
    pub field: String,
    pub value: String,
    /// Acting user; every committed write and bypass is attributed to them.
    pub actor: String,
    /// Explicit override of a bypassable rule.
    #[serde(default)]
    pub bypass: bool,
}

impl TransitionRequest {
    pub fn new(
        record_id: RecordId,
        field: impl Into<String>,
        value: impl Into<String>,
        actor: impl Into<String>,
    ) -> Self {
        Self {
            record_id,
            field: field.into(),
            value: value.into(),
            actor: actor.into(),
            bypass: false,
        }
    }

    pub fn with_bypass(mut self) -> Self {
        self.bypass = true;
        self
    }
}
