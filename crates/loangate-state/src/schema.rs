//! Row definitions for the loangate SurrealDB tables
//!
//! Tables:
//! - loan_records: current pipeline fields and document flags per loan
//! - field_changes: append-only audit of committed field writes
//! - related_documents: document slots of related entities
//! - automations: notification definitions
//! - automation_queue: scheduled notifications
//!
//! Rows are converted to/from `storage_traits` types at the boundary.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::storage_traits::{
    AutomationDefinition, AutomationQueueEntry, FieldChange, QueueEntryId, QueueStatus,
    RecipientType, RecordId, RecordSnapshot, RelatedDocument, TriggerType,
};

/// Module for serializing chrono DateTime to SurrealDB datetime format
mod surreal_datetime {
    use chrono::{DateTime, Utc};
    use serde::{self, Deserialize, Deserializer, Serializer};
    use surrealdb::sql::Datetime as SurrealDatetime;

    pub fn serialize<S>(date: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let sd = SurrealDatetime::from(*date);
        serde::Serialize::serialize(&sd, serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let sd = SurrealDatetime::deserialize(deserializer)?;
        Ok(DateTime::from(sd))
    }
}

/// Module for serializing optional chrono DateTime to SurrealDB datetime format
mod surreal_datetime_opt {
    use chrono::{DateTime, Utc};
    use serde::{self, Deserialize, Deserializer, Serializer};
    use surrealdb::sql::Datetime as SurrealDatetime;

    pub fn serialize<S>(date: &Option<DateTime<Utc>>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match date {
            Some(d) => {
                let sd = SurrealDatetime::from(*d);
                serde::Serialize::serialize(&Some(sd), serializer)
            }
            None => serde::Serialize::serialize(&None::<SurrealDatetime>, serializer),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let sd = Option::<SurrealDatetime>::deserialize(deserializer)?;
        Ok(sd.map(DateTime::from))
    }
}

// ---------------------------------------------------------------------------
// loan_records
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoanRecordRow {
    pub record_id: String,
    #[serde(default)]
    pub fields: BTreeMap<String, String>,
    #[serde(default)]
    pub documents: Vec<String>,
    #[serde(default)]
    pub has_contract: bool,
    #[serde(default)]
    pub related_complete: BTreeMap<String, bool>,
    #[serde(with = "surreal_datetime")]
    pub updated_at: DateTime<Utc>,
}

impl LoanRecordRow {
    pub fn from_snapshot(snapshot: RecordSnapshot) -> Self {
        Self {
            record_id: snapshot.record_id.0,
            fields: snapshot.fields,
            documents: snapshot.documents.into_iter().collect(),
            has_contract: snapshot.has_contract,
            related_complete: snapshot.related_complete,
            updated_at: Utc::now(),
        }
    }

    pub fn into_snapshot(self) -> RecordSnapshot {
        RecordSnapshot {
            record_id: RecordId(self.record_id),
            fields: self.fields,
            documents: self.documents.into_iter().collect(),
            has_contract: self.has_contract,
            related_complete: self.related_complete,
        }
    }
}

// ---------------------------------------------------------------------------
// field_changes
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldChangeRow {
    pub change_id: String,
    pub record_id: String,
    pub field: String,
    #[serde(default)]
    pub old_value: Option<String>,
    pub new_value: String,
    pub actor: String,
    #[serde(default)]
    pub bypassed_rule: Option<String>,
    #[serde(with = "surreal_datetime")]
    pub changed_at: DateTime<Utc>,
}

impl From<FieldChange> for FieldChangeRow {
    fn from(change: FieldChange) -> Self {
        Self {
            change_id: change.change_id,
            record_id: change.record_id.0,
            field: change.field,
            old_value: change.old_value,
            new_value: change.new_value,
            actor: change.actor,
            bypassed_rule: change.bypassed_rule,
            changed_at: change.changed_at,
        }
    }
}

impl From<FieldChangeRow> for FieldChange {
    fn from(row: FieldChangeRow) -> Self {
        Self {
            change_id: row.change_id,
            record_id: RecordId(row.record_id),
            field: row.field,
            old_value: row.old_value,
            new_value: row.new_value,
            actor: row.actor,
            bypassed_rule: row.bypassed_rule,
            changed_at: row.changed_at,
        }
    }
}

// ---------------------------------------------------------------------------
// related_documents
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelatedDocumentRow {
    pub record_id: String,
    pub relation: String,
    pub kind: String,
    pub required: bool,
    pub present: bool,
}

impl From<RelatedDocument> for RelatedDocumentRow {
    fn from(doc: RelatedDocument) -> Self {
        Self {
            record_id: doc.record_id.0,
            relation: doc.relation,
            kind: doc.kind,
            required: doc.required,
            present: doc.present,
        }
    }
}

impl From<RelatedDocumentRow> for RelatedDocument {
    fn from(row: RelatedDocumentRow) -> Self {
        Self {
            record_id: RecordId(row.record_id),
            relation: row.relation,
            kind: row.kind,
            required: row.required,
            present: row.present,
        }
    }
}

// ---------------------------------------------------------------------------
// automations
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AutomationRow {
    pub automation_id: String,
    pub name: String,
    pub recipient_type: RecipientType,
    pub template_id: Option<String>,
    pub trigger_type: TriggerType,
    pub trigger_field: String,
    pub trigger_target_value: String,
    pub active: bool,
    /// Insertion position; preserved when a definition is replaced.
    pub position: u64,
}

impl AutomationRow {
    pub fn new(definition: AutomationDefinition, position: u64) -> Self {
        Self {
            automation_id: definition.id,
            name: definition.name,
            recipient_type: definition.recipient_type,
            template_id: definition.template_id,
            trigger_type: definition.trigger_type,
            trigger_field: definition.trigger_field,
            trigger_target_value: definition.trigger_target_value,
            active: definition.active,
            position,
        }
    }

    pub fn into_definition(self) -> AutomationDefinition {
        AutomationDefinition {
            id: self.automation_id,
            name: self.name,
            recipient_type: self.recipient_type,
            template_id: self.template_id,
            trigger_type: self.trigger_type,
            trigger_field: self.trigger_field,
            trigger_target_value: self.trigger_target_value,
            active: self.active,
        }
    }
}

// ---------------------------------------------------------------------------
// automation_queue
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueEntryRow {
    pub entry_id: String,
    pub automation_id: String,
    pub change_id: String,
    pub record_id: String,
    pub field: String,
    pub old_value: Option<String>,
    pub new_value: String,
    pub status: QueueStatus,
    pub triggered_by: String,
    #[serde(with = "surreal_datetime")]
    pub triggered_at: DateTime<Utc>,
    #[serde(default, with = "surreal_datetime_opt")]
    pub sent_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
    pub dedupe_key: String,
}

impl From<AutomationQueueEntry> for QueueEntryRow {
    fn from(entry: AutomationQueueEntry) -> Self {
        Self {
            entry_id: entry.id.0,
            automation_id: entry.automation_id,
            change_id: entry.change_id,
            record_id: entry.record_id.0,
            field: entry.field,
            old_value: entry.old_value,
            new_value: entry.new_value,
            status: entry.status,
            triggered_by: entry.triggered_by,
            triggered_at: entry.triggered_at,
            sent_at: entry.sent_at,
            error: entry.error,
            dedupe_key: entry.dedupe_key,
        }
    }
}

impl From<QueueEntryRow> for AutomationQueueEntry {
    fn from(row: QueueEntryRow) -> Self {
        Self {
            id: QueueEntryId(row.entry_id),
            automation_id: row.automation_id,
            change_id: row.change_id,
            record_id: RecordId(row.record_id),
            field: row.field,
            old_value: row.old_value,
            new_value: row.new_value,
            status: row.status,
            triggered_by: row.triggered_by,
            triggered_at: row.triggered_at,
            sent_at: row.sent_at,
            error: row.error,
            dedupe_key: row.dedupe_key,
        }
    }
}
