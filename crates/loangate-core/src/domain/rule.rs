//! Transition rules.
//!
//! A rule gates exactly one `(field, target_value)` pair. The two rule
//! shapes are an explicit tagged variant: status-change rules may carry a
//! remediation action and be bypassable, stage rules never are.
//!
//! Predicates are plain data so the catalogue can be loaded from TOML and
//! compared in tests. Any rule may additionally require an asynchronous
//! check that reads state outside the caller's snapshot.

use serde::{Deserialize, Serialize};

use loangate_state::RecordSnapshot;

use super::transition::RuleKey;

// ---------------------------------------------------------------------------
// Predicates
// ---------------------------------------------------------------------------

/// Condition evaluated against a `RecordSnapshot`. Pure, no I/O.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Predicate {
    #[default]
    Always,
    /// A document of this kind is on file for the record.
    DocumentOnFile { document: String },
    /// A signed contract is on file.
    ContractOnFile,
    /// The field has a non-empty value.
    FieldPresent { field: String },
    /// The field currently holds exactly this value.
    FieldEquals { field: String, value: String },
    /// The snapshot's cached completeness flag for the relation is set.
    RelatedComplete { relation: String },
    AllOf { predicates: Vec<Predicate> },
    AnyOf { predicates: Vec<Predicate> },
}

impl Predicate {
    pub fn holds(&self, snapshot: &RecordSnapshot) -> bool {
        match self {
            Self::Always => true,
            Self::DocumentOnFile { document } => snapshot.has_document(document),
            Self::ContractOnFile => snapshot.has_contract,
            Self::FieldPresent { field } => snapshot.field(field).is_some_and(|v| !v.is_empty()),
            Self::FieldEquals { field, value } => snapshot.field(field) == Some(value.as_str()),
            Self::RelatedComplete { relation } => snapshot
                .related_complete
                .get(relation)
                .copied()
                .unwrap_or(false),
            Self::AllOf { predicates } => predicates.iter().all(|p| p.holds(snapshot)),
            Self::AnyOf { predicates } => predicates.iter().any(|p| p.holds(snapshot)),
        }
    }

    /// Human-readable reason the predicate fails, or `None` if it holds.
    pub fn explain_failure(&self, snapshot: &RecordSnapshot) -> Option<String> {
        if self.holds(snapshot) {
            return None;
        }
        let reason = match self {
            Self::Always => return None,
            Self::DocumentOnFile { document } => format!("{document} is not on file"),
            Self::ContractOnFile => "no signed contract on file".to_string(),
            Self::FieldPresent { field } => format!("{field} is not set"),
            Self::FieldEquals { field, value } => match snapshot.field(field) {
                Some(actual) => format!("{field} is '{actual}', expected '{value}'"),
                None => format!("{field} is not set, expected '{value}'"),
            },
            Self::RelatedComplete { relation } => format!("{relation} documents are incomplete"),
            Self::AllOf { predicates } => predicates
                .iter()
                .filter_map(|p| p.explain_failure(snapshot))
                .collect::<Vec<_>>()
                .join("; "),
            Self::AnyOf { predicates } => format!(
                "none of the alternatives hold ({})",
                predicates
                    .iter()
                    .filter_map(|p| p.explain_failure(snapshot))
                    .collect::<Vec<_>>()
                    .join(" | ")
            ),
        };
        Some(reason)
    }
}

/// A check that needs a fresh read from the persistence collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AsyncCheck {
    /// Every required document slot of the related entity has something on file.
    RelatedDocumentsComplete { relation: String },
    /// Re-read whether a document is on file instead of trusting the snapshot.
    DocumentOnFile { document: String },
}

impl std::fmt::Display for AsyncCheck {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::RelatedDocumentsComplete { relation } => {
                write!(f, "related_documents_complete({relation})")
            }
            Self::DocumentOnFile { document } => write!(f, "document_on_file({document})"),
        }
    }
}

// ---------------------------------------------------------------------------
// Rules
// ---------------------------------------------------------------------------

/// Remediation the caller is expected to perform after a block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    #[default]
    None,
    UploadFile,
    ManualReview,
}

impl ActionKind {
    /// Actions that need a label to show the user.
    pub fn requires_label(self) -> bool {
        !matches!(self, Self::None)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::UploadFile => "upload_file",
            Self::ManualReview => "manual_review",
        }
    }
}

impl std::fmt::Display for ActionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusChangeRule {
    pub field: String,
    pub target_value: String,
    pub message: String,
    #[serde(default)]
    pub action_kind: ActionKind,
    #[serde(default)]
    pub action_label: Option<String>,
    #[serde(default)]
    pub bypassable: bool,
    #[serde(default)]
    pub predicate: Predicate,
    #[serde(default)]
    pub async_check: Option<AsyncCheck>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageRule {
    pub field: String,
    pub target_value: String,
    pub message: String,
    #[serde(default)]
    pub predicate: Predicate,
    #[serde(default)]
    pub async_check: Option<AsyncCheck>,
}

/// A precondition on one `(field, target_value)` transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TransitionRule {
    StatusChange(StatusChangeRule),
    Stage(StageRule),
}

impl TransitionRule {
    pub fn field(&self) -> &str {
        match self {
            Self::StatusChange(r) => &r.field,
            Self::Stage(r) => &r.field,
        }
    }

    pub fn target_value(&self) -> &str {
        match self {
            Self::StatusChange(r) => &r.target_value,
            Self::Stage(r) => &r.target_value,
        }
    }

    pub fn key(&self) -> RuleKey {
        RuleKey::new(self.field(), self.target_value())
    }

    pub fn message(&self) -> &str {
        match self {
            Self::StatusChange(r) => &r.message,
            Self::Stage(r) => &r.message,
        }
    }

    pub fn predicate(&self) -> &Predicate {
        match self {
            Self::StatusChange(r) => &r.predicate,
            Self::Stage(r) => &r.predicate,
        }
    }

    pub fn async_check(&self) -> Option<&AsyncCheck> {
        match self {
            Self::StatusChange(r) => r.async_check.as_ref(),
            Self::Stage(r) => r.async_check.as_ref(),
        }
    }

    pub fn action_kind(&self) -> ActionKind {
        match self {
            Self::StatusChange(r) => r.action_kind,
            Self::Stage(_) => ActionKind::None,
        }
    }

    pub fn action_label(&self) -> Option<&str> {
        match self {
            Self::StatusChange(r) => r.action_label.as_deref(),
            Self::Stage(_) => None,
        }
    }

    /// Stage rules are never bypassable.
    pub fn is_bypassable(&self) -> bool {
        match self {
            Self::StatusChange(r) => r.bypassable,
            Self::Stage(_) => false,
        }
    }
}
