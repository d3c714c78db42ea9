//! Storage trait definitions for loangate
//!
//! These traits define the collaborator the transition engine talks to:
//! - `RecordStore`: loan record snapshots and attributable field writes
//! - `RelatedDocumentReader`: fresh reads used by asynchronous rule checks
//! - `AutomationStore`: notification definitions fired on field changes
//! - `AutomationQueue`: one `Pending` row per scheduled notification
//!
//! All traits are async and backend-agnostic. In-memory fakes are provided
//! for testing via the `fakes` module.

use std::collections::{BTreeMap, BTreeSet};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::StorageError;

/// Result type for storage operations
pub type StorageResult<T> = std::result::Result<T, StorageError>;

// ---------------------------------------------------------------------------
// RecordStore: loan records and field writes
// ---------------------------------------------------------------------------

/// Identifier of a loan record.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RecordId(pub String);

impl RecordId {
    pub fn new(id: impl Into<String>) -> Self {
        RecordId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for RecordId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Read-only projection of a loan record as seen by rule predicates.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RecordSnapshot {
    pub record_id: RecordId,
    /// Current pipeline field values (`status`, `stage`, `condo_status`, ...).
    #[serde(default)]
    pub fields: BTreeMap<String, String>,
    /// Kinds of documents currently on file (`appraisal`, `title_commitment`, ...).
    #[serde(default)]
    pub documents: BTreeSet<String>,
    /// Whether a signed contract is on file.
    #[serde(default)]
    pub has_contract: bool,
    /// Cached completeness of related entities, keyed by relation name.
    #[serde(default)]
    pub related_complete: BTreeMap<String, bool>,
}

impl RecordSnapshot {
    pub fn new(record_id: RecordId) -> Self {
        Self {
            record_id,
            ..Self::default()
        }
    }

    pub fn with_field(mut self, field: impl Into<String>, value: impl Into<String>) -> Self {
        self.fields.insert(field.into(), value.into());
        self
    }

    pub fn with_document(mut self, kind: impl Into<String>) -> Self {
        self.documents.insert(kind.into());
        self
    }

    pub fn with_contract(mut self, on_file: bool) -> Self {
        self.has_contract = on_file;
        self
    }

    pub fn with_related(mut self, relation: impl Into<String>, complete: bool) -> Self {
        self.related_complete.insert(relation.into(), complete);
        self
    }

    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields.get(name).map(String::as_str)
    }

    pub fn has_document(&self, kind: &str) -> bool {
        self.documents.contains(kind)
    }
}

/// A field write issued by the coordinator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldWrite {
    pub field: String,
    pub value: String,
    /// Who requested the change.
    pub actor: String,
    /// Rule key (`field=value`) whose predicate was overridden, if any.
    pub bypassed_rule: Option<String>,
}

/// Audit row appended for every committed field write.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldChange {
    pub change_id: String,
    pub record_id: RecordId,
    pub field: String,
    pub old_value: Option<String>,
    pub new_value: String,
    pub actor: String,
    pub bypassed_rule: Option<String>,
    pub changed_at: DateTime<Utc>,
}

/// Loan record persistence.
///
/// Guarantees:
/// - `write_field` either commits the new value and appends exactly one
///   `FieldChange`, or fails leaving the record untouched.
/// - `field_history` returns changes oldest first.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Create or replace a record.
    async fn save_record(&self, snapshot: RecordSnapshot) -> StorageResult<()>;

    /// Read the current snapshot. `StorageError::RecordNotFound` if absent.
    async fn snapshot(&self, record_id: &RecordId) -> StorageResult<RecordSnapshot>;

    /// Commit a single field change and return its audit row.
    async fn write_field(&self, record_id: &RecordId, write: FieldWrite)
        -> StorageResult<FieldChange>;

    /// All committed changes for a record, oldest first.
    async fn field_history(&self, record_id: &RecordId) -> StorageResult<Vec<FieldChange>>;
}

// ---------------------------------------------------------------------------
// RelatedDocumentReader: reads behind asynchronous checks
// ---------------------------------------------------------------------------

/// A document slot belonging to an entity related to a loan record
/// (e.g. the condo association behind a condo loan).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelatedDocument {
    pub record_id: RecordId,
    pub relation: String,
    pub kind: String,
    pub required: bool,
    pub present: bool,
}

impl RelatedDocument {
    pub fn new(record_id: RecordId, relation: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            record_id,
            relation: relation.into(),
            kind: kind.into(),
            required: true,
            present: false,
        }
    }

    pub fn required(mut self, required: bool) -> Self {
        self.required = required;
        self
    }

    pub fn present(mut self, present: bool) -> Self {
        self.present = present;
        self
    }

    /// A required slot that has nothing on file.
    pub fn is_missing(&self) -> bool {
        self.required && !self.present
    }
}

/// Reads that are not part of the caller-supplied snapshot.
#[async_trait]
pub trait RelatedDocumentReader: Send + Sync {
    /// Create or replace a related document slot, keyed by (record, relation, kind).
    async fn save_related_document(&self, document: RelatedDocument) -> StorageResult<()>;

    /// All document slots of the given relation for a record.
    async fn related_documents(
        &self,
        record_id: &RecordId,
        relation: &str,
    ) -> StorageResult<Vec<RelatedDocument>>;

    /// Fresh check that a document kind is on file for the record itself.
    async fn document_on_file(&self, record_id: &RecordId, document: &str) -> StorageResult<bool>;
}

// ---------------------------------------------------------------------------
// AutomationStore: notification definitions
// ---------------------------------------------------------------------------

/// Who receives the notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecipientType {
    Borrower,
    CoBorrower,
    LoanOfficer,
    Processor,
    Realtor,
    TitleCompany,
}

impl RecipientType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Borrower => "borrower",
            Self::CoBorrower => "co_borrower",
            Self::LoanOfficer => "loan_officer",
            Self::Processor => "processor",
            Self::Realtor => "realtor",
            Self::TitleCompany => "title_company",
        }
    }
}

impl std::fmt::Display for RecipientType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for RecipientType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "borrower" => Ok(Self::Borrower),
            "co_borrower" => Ok(Self::CoBorrower),
            "loan_officer" => Ok(Self::LoanOfficer),
            "processor" => Ok(Self::Processor),
            "realtor" => Ok(Self::Realtor),
            "title_company" => Ok(Self::TitleCompany),
            other => Err(format!("unknown recipient type: {other}")),
        }
    }
}

/// What kind of event fires an automation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerType {
    /// Fires when `trigger_field` is set to `trigger_target_value`.
    OnFieldChange,
    OnRecordCreated,
    Scheduled,
}

/// A notification definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AutomationDefinition {
    pub id: String,
    pub name: String,
    pub recipient_type: RecipientType,
    pub template_id: Option<String>,
    pub trigger_type: TriggerType,
    pub trigger_field: String,
    pub trigger_target_value: String,
    pub active: bool,
}

impl AutomationDefinition {
    /// An active on-field-change automation with no template.
    pub fn on_field_change(
        id: impl Into<String>,
        name: impl Into<String>,
        recipient_type: RecipientType,
        trigger_field: impl Into<String>,
        trigger_target_value: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            recipient_type,
            template_id: None,
            trigger_type: TriggerType::OnFieldChange,
            trigger_field: trigger_field.into(),
            trigger_target_value: trigger_target_value.into(),
            active: true,
        }
    }

    pub fn with_template(mut self, template_id: impl Into<String>) -> Self {
        self.template_id = Some(template_id.into());
        self
    }

    pub fn inactive(mut self) -> Self {
        self.active = false;
        self
    }
}

/// Automation definition storage.
///
/// `active_field_change_automations` returns only `active` definitions with
/// `TriggerType::OnFieldChange`, in the order they were first saved.
#[async_trait]
pub trait AutomationStore: Send + Sync {
    /// Create or replace a definition by id. Replacing keeps its original position.
    async fn save_automation(&self, definition: AutomationDefinition) -> StorageResult<()>;

    /// Every stored definition, in insertion order.
    async fn list_automations(&self) -> StorageResult<Vec<AutomationDefinition>>;

    /// The active set the automation matcher scans.
    async fn active_field_change_automations(&self) -> StorageResult<Vec<AutomationDefinition>>;
}

// ---------------------------------------------------------------------------
// AutomationQueue: scheduled notifications
// ---------------------------------------------------------------------------

/// Identifier of a queue entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct QueueEntryId(pub String);

impl QueueEntryId {
    pub fn new() -> Self {
        QueueEntryId(uuid::Uuid::new_v4().to_string())
    }
}

impl Default for QueueEntryId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for QueueEntryId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Delivery status of a queue entry. Only the notifier moves it past `Pending`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueStatus {
    Pending,
    Sent,
    Failed,
}

impl QueueStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Sent => "sent",
            Self::Failed => "failed",
        }
    }
}

impl std::fmt::Display for QueueStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for QueueStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "sent" => Ok(Self::Sent),
            "failed" => Ok(Self::Failed),
            other => Err(format!("unknown queue status: {other}")),
        }
    }
}

/// Request to schedule one automation for one committed transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewQueueEntry {
    pub automation_id: String,
    /// `FieldChange::change_id` of the transition that triggered it.
    pub change_id: String,
    pub record_id: RecordId,
    pub field: String,
    pub old_value: Option<String>,
    pub new_value: String,
    pub triggered_by: String,
}

impl NewQueueEntry {
    /// SHA-256 hex of `(record_id, change_id, automation_id, new_value)`.
    ///
    /// Two requests with the same key describe the same scheduled
    /// notification and must produce a single row. A later transition to
    /// the same value has a new `change_id` and schedules again.
    pub fn dedupe_key(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.record_id.as_str().as_bytes());
        hasher.update([0u8]);
        hasher.update(self.change_id.as_bytes());
        hasher.update([0u8]);
        hasher.update(self.automation_id.as_bytes());
        hasher.update([0u8]);
        hasher.update(self.new_value.as_bytes());
        hex::encode(hasher.finalize())
    }

    /// Materialize a fresh `Pending` entry.
    pub fn into_entry(self, now: DateTime<Utc>) -> AutomationQueueEntry {
        let dedupe_key = self.dedupe_key();
        AutomationQueueEntry {
            id: QueueEntryId::new(),
            automation_id: self.automation_id,
            change_id: self.change_id,
            record_id: self.record_id,
            field: self.field,
            old_value: self.old_value,
            new_value: self.new_value,
            status: QueueStatus::Pending,
            triggered_by: self.triggered_by,
            triggered_at: now,
            sent_at: None,
            error: None,
            dedupe_key,
        }
    }
}

/// A persisted scheduled notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AutomationQueueEntry {
    pub id: QueueEntryId,
    pub automation_id: String,
    pub change_id: String,
    pub record_id: RecordId,
    pub field: String,
    pub old_value: Option<String>,
    pub new_value: String,
    pub status: QueueStatus,
    pub triggered_by: String,
    pub triggered_at: DateTime<Utc>,
    pub sent_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
    pub dedupe_key: String,
}

/// Result of an `enqueue` call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Enqueued {
    pub entry: AutomationQueueEntry,
    /// `false` when an entry with the same dedupe key already existed.
    pub inserted: bool,
}

/// Automation queue.
///
/// Guarantees:
/// - `enqueue` is idempotent on `NewQueueEntry::dedupe_key`.
/// - New entries start `Pending`; `mark_sent` / `mark_failed` only accept
///   `Pending` entries (`StorageError::InvalidQueueState` otherwise).
/// - `list_entries` returns entries oldest first.
#[async_trait]
pub trait AutomationQueue: Send + Sync {
    async fn enqueue(&self, entry: NewQueueEntry) -> StorageResult<Enqueued>;

    async fn get_entry(&self, id: &QueueEntryId) -> StorageResult<AutomationQueueEntry>;

    async fn list_entries(
        &self,
        record_id: Option<&RecordId>,
        status: Option<QueueStatus>,
    ) -> StorageResult<Vec<AutomationQueueEntry>>;

    async fn mark_sent(&self, id: &QueueEntryId) -> StorageResult<AutomationQueueEntry>;

    async fn mark_failed(&self, id: &QueueEntryId, error: &str)
        -> StorageResult<AutomationQueueEntry>;
}
