//! SurrealDB-backed implementation of every loangate storage trait
//!
//! Uses the rows in `schema` for persistence, converting to/from
//! `storage_traits` types at the boundary.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::Utc;
use surrealdb::engine::any::Any;
use surrealdb::Surreal;
use tracing::{debug, info, instrument};

use crate::error::StorageError;
use crate::handle;
use crate::schema::{
    AutomationRow, FieldChangeRow, LoanRecordRow, QueueEntryRow, RelatedDocumentRow,
};
use crate::storage_traits::*;

fn backend(err: surrealdb::Error) -> StorageError {
    StorageError::Backend(err.to_string())
}

/// SurrealDB-backed loan store.
#[derive(Clone)]
pub struct SurrealLoanStore {
    db: Surreal<Any>,
}

impl SurrealLoanStore {
    /// Create an in-memory instance for testing.
    ///
    /// Connects to `mem://`, selects `loangate/main`, and runs `init_schema`.
    pub async fn in_memory() -> crate::Result<Self> {
        let db = handle::connect_url("mem://").await?;
        info!("SurrealLoanStore connected (in-memory)");
        Ok(Self { db })
    }

    /// Create from environment variables (see [`handle::connect_from_env`]).
    pub async fn from_env() -> crate::Result<Self> {
        let db = handle::connect_from_env().await?;
        Ok(Self { db })
    }

    /// Wrap an already connected and migrated database.
    pub fn from_db(db: Surreal<Any>) -> Self {
        Self { db }
    }

    // -- private helpers -----------------------------------------------------

    async fn fetch_record_row(&self, rid: &str) -> StorageResult<Option<LoanRecordRow>> {
        let mut res = self
            .db
            .query("SELECT * FROM loan_records WHERE record_id = $rid")
            .bind(("rid", rid.to_string()))
            .await
            .map_err(backend)?;
        let rows: Vec<LoanRecordRow> = res.take(0).map_err(backend)?;
        Ok(rows.into_iter().next())
    }

    async fn require_record_row(&self, rid: &str) -> StorageResult<LoanRecordRow> {
        self.fetch_record_row(rid)
            .await?
            .ok_or_else(|| StorageError::RecordNotFound {
                record_id: rid.to_string(),
            })
    }

    async fn automation_rows(&self) -> StorageResult<Vec<AutomationRow>> {
        let mut res = self
            .db
            .query("SELECT * FROM automations ORDER BY position ASC")
            .await
            .map_err(backend)?;
        res.take(0).map_err(backend)
    }

    async fn fetch_queue_row(
        &self,
        column: &'static str,
        value: &str,
    ) -> StorageResult<Option<QueueEntryRow>> {
        let sql = format!("SELECT * FROM automation_queue WHERE {column} = $value");
        let mut res = self
            .db
            .query(sql)
            .bind(("value", value.to_string()))
            .await
            .map_err(backend)?;
        let rows: Vec<QueueEntryRow> = res.take(0).map_err(backend)?;
        Ok(rows.into_iter().next())
    }

    async fn transition_queue_entry(
        &self,
        id: &QueueEntryId,
        apply: impl FnOnce(&mut QueueEntryRow) + Send,
    ) -> StorageResult<AutomationQueueEntry> {
        let mut row = self
            .fetch_queue_row("entry_id", &id.0)
            .await?
            .ok_or_else(|| StorageError::QueueEntryNotFound {
                entry_id: id.0.clone(),
            })?;
        if row.status != QueueStatus::Pending {
            return Err(StorageError::InvalidQueueState {
                entry_id: id.0.clone(),
                status: row.status.to_string(),
                expected: QueueStatus::Pending.to_string(),
            });
        }
        apply(&mut row);

        self.db
            .query("UPDATE automation_queue CONTENT $row WHERE entry_id = $eid")
            .bind(("row", row.clone()))
            .bind(("eid", id.0.clone()))
            .await
            .map_err(backend)?
            .check()
            .map_err(backend)?;
        Ok(row.into())
    }
}

#[async_trait]
impl RecordStore for SurrealLoanStore {
    #[instrument(skip(self, snapshot), fields(record_id = %snapshot.record_id))]
    async fn save_record(&self, snapshot: RecordSnapshot) -> StorageResult<()> {
        let rid = snapshot.record_id.0.clone();
        let row = LoanRecordRow::from_snapshot(snapshot);

        if self.fetch_record_row(&rid).await?.is_some() {
            self.db
                .query("UPDATE loan_records CONTENT $row WHERE record_id = $rid")
                .bind(("row", row))
                .bind(("rid", rid))
                .await
                .map_err(backend)?
                .check()
                .map_err(backend)?;
        } else {
            let _created: Option<LoanRecordRow> = self
                .db
                .create("loan_records")
                .content(row)
                .await
                .map_err(backend)?;
        }
        Ok(())
    }

    async fn snapshot(&self, record_id: &RecordId) -> StorageResult<RecordSnapshot> {
        Ok(self.require_record_row(&record_id.0).await?.into_snapshot())
    }

    #[instrument(skip(self, write), fields(record_id = %record_id, field = %write.field))]
    async fn write_field(
        &self,
        record_id: &RecordId,
        write: FieldWrite,
    ) -> StorageResult<FieldChange> {
        self.require_record_row(&record_id.0).await?;

        // `old_value` is filled in from the row as it was when the update ran.
        let change = FieldChange {
            change_id: uuid::Uuid::new_v4().to_string(),
            record_id: record_id.clone(),
            field: write.field.clone(),
            old_value: None,
            new_value: write.value.clone(),
            actor: write.actor,
            bypassed_rule: write.bypassed_rule,
            changed_at: Utc::now(),
        };
        let patch = BTreeMap::from([(write.field.clone(), write.value)]);

        debug!(change_id = %change.change_id, "committing field change");

        self.db
            .query(
                "BEGIN TRANSACTION;
                 LET $before = (UPDATE loan_records MERGE { fields: $patch, updated_at: time::now() } WHERE record_id = $rid RETURN BEFORE);
                 IF array::len($before) = 0 { THROW 'loan record vanished during write' };
                 CREATE field_changes CONTENT $change;
                 UPDATE field_changes SET old_value = $before[0].fields[$field] WHERE change_id = $cid;
                 COMMIT TRANSACTION;",
            )
            .bind(("patch", patch))
            .bind(("rid", record_id.0.clone()))
            .bind(("field", write.field))
            .bind(("cid", change.change_id.clone()))
            .bind(("change", FieldChangeRow::from(change.clone())))
            .await
            .map_err(backend)?
            .check()
            .map_err(backend)?;

        let mut res = self
            .db
            .query("SELECT * FROM field_changes WHERE change_id = $cid")
            .bind(("cid", change.change_id.clone()))
            .await
            .map_err(backend)?;
        let rows: Vec<FieldChangeRow> = res.take(0).map_err(backend)?;
        rows.into_iter()
            .next()
            .map(FieldChange::from)
            .ok_or_else(|| StorageError::Backend(format!("change {} not recorded", change.change_id)))
    }

    async fn field_history(&self, record_id: &RecordId) -> StorageResult<Vec<FieldChange>> {
        self.require_record_row(&record_id.0).await?;

        let mut res = self
            .db
            .query("SELECT * FROM field_changes WHERE record_id = $rid ORDER BY changed_at ASC")
            .bind(("rid", record_id.0.clone()))
            .await
            .map_err(backend)?;
        let rows: Vec<FieldChangeRow> = res.take(0).map_err(backend)?;
        Ok(rows.into_iter().map(FieldChange::from).collect())
    }
}

#[async_trait]
impl RelatedDocumentReader for SurrealLoanStore {
    async fn save_related_document(&self, document: RelatedDocument) -> StorageResult<()> {
        let row = RelatedDocumentRow::from(document);
        self.db
            .query(
                "BEGIN TRANSACTION;
                 DELETE related_documents WHERE record_id = $rid AND relation = $relation AND kind = $kind;
                 CREATE related_documents CONTENT $row;
                 COMMIT TRANSACTION;",
            )
            .bind(("rid", row.record_id.clone()))
            .bind(("relation", row.relation.clone()))
            .bind(("kind", row.kind.clone()))
            .bind(("row", row))
            .await
            .map_err(backend)?
            .check()
            .map_err(backend)?;
        Ok(())
    }

    async fn related_documents(
        &self,
        record_id: &RecordId,
        relation: &str,
    ) -> StorageResult<Vec<RelatedDocument>> {
        let mut res = self
            .db
            .query(
                "SELECT * FROM related_documents WHERE record_id = $rid AND relation = $relation ORDER BY kind ASC",
            )
            .bind(("rid", record_id.0.clone()))
            .bind(("relation", relation.to_string()))
            .await
            .map_err(backend)?;
        let rows: Vec<RelatedDocumentRow> = res.take(0).map_err(backend)?;
        Ok(rows.into_iter().map(RelatedDocument::from).collect())
    }

    async fn document_on_file(&self, record_id: &RecordId, document: &str) -> StorageResult<bool> {
        let row = self.require_record_row(&record_id.0).await?;
        Ok(row.documents.iter().any(|d| d == document))
    }
}

#[async_trait]
impl AutomationStore for SurrealLoanStore {
    #[instrument(skip(self, definition), fields(automation_id = %definition.id))]
    async fn save_automation(&self, definition: AutomationDefinition) -> StorageResult<()> {
        let rows = self.automation_rows().await?;

        match rows.iter().find(|r| r.automation_id == definition.id) {
            Some(existing) => {
                let row = AutomationRow::new(definition, existing.position);
                let aid = row.automation_id.clone();
                self.db
                    .query("UPDATE automations CONTENT $row WHERE automation_id = $aid")
                    .bind(("row", row))
                    .bind(("aid", aid))
                    .await
                    .map_err(backend)?
                    .check()
                    .map_err(backend)?;
            }
            None => {
                let row = AutomationRow::new(definition, rows.len() as u64);
                let _created: Option<AutomationRow> = self
                    .db
                    .create("automations")
                    .content(row)
                    .await
                    .map_err(backend)?;
            }
        }
        Ok(())
    }

    async fn list_automations(&self) -> StorageResult<Vec<AutomationDefinition>> {
        Ok(self
            .automation_rows()
            .await?
            .into_iter()
            .map(AutomationRow::into_definition)
            .collect())
    }

    async fn active_field_change_automations(&self) -> StorageResult<Vec<AutomationDefinition>> {
        let mut res = self
            .db
            .query(
                "SELECT * FROM automations WHERE active = true AND trigger_type = 'on_field_change' ORDER BY position ASC",
            )
            .await
            .map_err(backend)?;
        let rows: Vec<AutomationRow> = res.take(0).map_err(backend)?;
        Ok(rows.into_iter().map(AutomationRow::into_definition).collect())
    }
}

#[async_trait]
impl AutomationQueue for SurrealLoanStore {
    #[instrument(skip(self, entry), fields(record_id = %entry.record_id, automation_id = %entry.automation_id))]
    async fn enqueue(&self, entry: NewQueueEntry) -> StorageResult<Enqueued> {
        let key = entry.dedupe_key();
        if let Some(existing) = self.fetch_queue_row("dedupe_key", &key).await? {
            return Ok(Enqueued {
                entry: existing.into(),
                inserted: false,
            });
        }

        let row = QueueEntryRow::from(entry.into_entry(Utc::now()));
        let created: Result<Option<QueueEntryRow>, surrealdb::Error> =
            self.db.create("automation_queue").content(row).await;

        match created {
            Ok(Some(row)) => Ok(Enqueued {
                entry: row.into(),
                inserted: true,
            }),
            Ok(None) => Err(StorageError::Backend(
                "failed to create queue entry".to_string(),
            )),
            Err(err) => {
                // A concurrent insert with the same key trips the UNIQUE index.
                match self.fetch_queue_row("dedupe_key", &key).await? {
                    Some(existing) => Ok(Enqueued {
                        entry: existing.into(),
                        inserted: false,
                    }),
                    None => Err(backend(err)),
                }
            }
        }
    }

    async fn get_entry(&self, id: &QueueEntryId) -> StorageResult<AutomationQueueEntry> {
        self.fetch_queue_row("entry_id", &id.0)
            .await?
            .map(AutomationQueueEntry::from)
            .ok_or_else(|| StorageError::QueueEntryNotFound {
                entry_id: id.0.clone(),
            })
    }

    async fn list_entries(
        &self,
        record_id: Option<&RecordId>,
        status: Option<QueueStatus>,
    ) -> StorageResult<Vec<AutomationQueueEntry>> {
        let mut clauses = Vec::new();
        if record_id.is_some() {
            clauses.push("record_id = $rid");
        }
        if status.is_some() {
            clauses.push("status = $status");
        }
        let mut sql = String::from("SELECT * FROM automation_queue");
        if !clauses.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&clauses.join(" AND "));
        }
        sql.push_str(" ORDER BY triggered_at ASC");

        let mut res = self
            .db
            .query(sql)
            .bind(("rid", record_id.map(|r| r.0.clone()).unwrap_or_default()))
            .bind((
                "status",
                status.map(|s| s.as_str().to_string()).unwrap_or_default(),
            ))
            .await
            .map_err(backend)?;
        let rows: Vec<QueueEntryRow> = res.take(0).map_err(backend)?;
        Ok(rows.into_iter().map(AutomationQueueEntry::from).collect())
    }

    async fn mark_sent(&self, id: &QueueEntryId) -> StorageResult<AutomationQueueEntry> {
        self.transition_queue_entry(id, |row| {
            row.status = QueueStatus::Sent;
            row.sent_at = Some(Utc::now());
        })
        .await
    }

    async fn mark_failed(
        &self,
        id: &QueueEntryId,
        error: &str,
    ) -> StorageResult<AutomationQueueEntry> {
        let error = error.to_string();
        self.transition_queue_entry(id, move |row| {
            row.status = QueueStatus::Failed;
            row.error = Some(error);
        })
        .await
    }
}
