//! In-memory fakes for storage traits (testing only)
//!
//! Provides `MemoryRecordStore`, `MemoryRelatedDocuments`,
//! `MemoryAutomationStore`, and `MemoryAutomationQueue` that satisfy the
//! trait contracts without any external dependencies. Each fake counts its
//! calls and can be told to fail, so engine tests can exercise the
//! infrastructure-error paths.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;

use crate::error::StorageError;
use crate::storage_traits::*;

// ---------------------------------------------------------------------------
// MemoryRecordStore
// ---------------------------------------------------------------------------

/// In-memory record store backed by `HashMap<record_id, snapshot>`.
#[derive(Debug, Default)]
pub struct MemoryRecordStore {
    records: Mutex<HashMap<String, RecordSnapshot>>,
    history: Mutex<HashMap<String, Vec<FieldChange>>>,
    fail_writes: AtomicBool,
    write_calls: AtomicUsize,
}

impl MemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent `write_field` fail with `StorageError::Unavailable`.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Number of `write_field` calls, including failed ones.
    pub fn write_calls(&self) -> usize {
        self.write_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RecordStore for MemoryRecordStore {
    async fn save_record(&self, snapshot: RecordSnapshot) -> StorageResult<()> {
        let mut records = self.records.lock().unwrap();
        records.insert(snapshot.record_id.0.clone(), snapshot);
        Ok(())
    }

    async fn snapshot(&self, record_id: &RecordId) -> StorageResult<RecordSnapshot> {
        let records = self.records.lock().unwrap();
        records
            .get(&record_id.0)
            .cloned()
            .ok_or_else(|| StorageError::RecordNotFound {
                record_id: record_id.0.clone(),
            })
    }

    async fn write_field(
        &self,
        record_id: &RecordId,
        write: FieldWrite,
    ) -> StorageResult<FieldChange> {
        self.write_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StorageError::Unavailable(
                "injected write failure".to_string(),
            ));
        }

        let mut records = self.records.lock().unwrap();
        let record = records
            .get_mut(&record_id.0)
            .ok_or_else(|| StorageError::RecordNotFound {
                record_id: record_id.0.clone(),
            })?;
        let old_value = record
            .fields
            .insert(write.field.clone(), write.value.clone());

        let change = FieldChange {
            change_id: uuid::Uuid::new_v4().to_string(),
            record_id: record_id.clone(),
            field: write.field,
            old_value,
            new_value: write.value,
            actor: write.actor,
            bypassed_rule: write.bypassed_rule,
            changed_at: Utc::now(),
        };
        self.history
            .lock()
            .unwrap()
            .entry(record_id.0.clone())
            .or_default()
            .push(change.clone());
        Ok(change)
    }

    async fn field_history(&self, record_id: &RecordId) -> StorageResult<Vec<FieldChange>> {
        if !self.records.lock().unwrap().contains_key(&record_id.0) {
            return Err(StorageError::RecordNotFound {
                record_id: record_id.0.clone(),
            });
        }
        let history = self.history.lock().unwrap();
        Ok(history.get(&record_id.0).cloned().unwrap_or_default())
    }
}

// ---------------------------------------------------------------------------
// MemoryRelatedDocuments
// ---------------------------------------------------------------------------

/// In-memory related-document reader.
///
/// `fail_with` makes every read return the given error; `delay_reads`
/// sleeps before answering (pair with paused tokio time to drive timeouts).
#[derive(Debug, Default)]
pub struct MemoryRelatedDocuments {
    documents: Mutex<Vec<RelatedDocument>>,
    on_file: Mutex<HashMap<String, BTreeSet<String>>>,
    failure: Mutex<Option<StorageError>>,
    delay: Mutex<Option<Duration>>,
    reads: AtomicUsize,
}

impl MemoryRelatedDocuments {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that a document kind is on file for the record itself.
    pub fn put_document(&self, record_id: &RecordId, kind: impl Into<String>) {
        self.on_file
            .lock()
            .unwrap()
            .entry(record_id.0.clone())
            .or_default()
            .insert(kind.into());
    }

    pub fn fail_with(&self, error: Option<StorageError>) {
        *self.failure.lock().unwrap() = error;
    }

    pub fn delay_reads(&self, delay: Option<Duration>) {
        *self.delay.lock().unwrap() = delay;
    }

    /// Number of read calls (`related_documents` + `document_on_file`).
    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    async fn before_read(&self) -> StorageResult<()> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        let delay = *self.delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let failure = self.failure.lock().unwrap().clone();
        match failure {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl RelatedDocumentReader for MemoryRelatedDocuments {
    async fn save_related_document(&self, document: RelatedDocument) -> StorageResult<()> {
        let mut documents = self.documents.lock().unwrap();
        match documents.iter_mut().find(|d| {
            d.record_id == document.record_id
                && d.relation == document.relation
                && d.kind == document.kind
        }) {
            Some(existing) => *existing = document,
            None => documents.push(document),
        }
        Ok(())
    }

    async fn related_documents(
        &self,
        record_id: &RecordId,
        relation: &str,
    ) -> StorageResult<Vec<RelatedDocument>> {
        self.before_read().await?;
        let documents = self.documents.lock().unwrap();
        Ok(documents
            .iter()
            .filter(|d| &d.record_id == record_id && d.relation == relation)
            .cloned()
            .collect())
    }

    async fn document_on_file(&self, record_id: &RecordId, document: &str) -> StorageResult<bool> {
        self.before_read().await?;
        let on_file = self.on_file.lock().unwrap();
        Ok(on_file
            .get(&record_id.0)
            .is_some_and(|kinds| kinds.contains(document)))
    }
}

// ---------------------------------------------------------------------------
// MemoryAutomationStore
// ---------------------------------------------------------------------------

/// In-memory automation store backed by an insertion-ordered `Vec`.
#[derive(Debug, Default)]
pub struct MemoryAutomationStore {
    definitions: Mutex<Vec<AutomationDefinition>>,
    fail_reads: AtomicBool,
    reads: AtomicUsize,
}

impl MemoryAutomationStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a store pre-populated with the given definitions.
    pub fn with_definitions(definitions: Vec<AutomationDefinition>) -> Self {
        Self {
            definitions: Mutex::new(definitions),
            ..Self::default()
        }
    }

    pub fn set_fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    /// Number of `active_field_change_automations` calls.
    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AutomationStore for MemoryAutomationStore {
    async fn save_automation(&self, definition: AutomationDefinition) -> StorageResult<()> {
        let mut definitions = self.definitions.lock().unwrap();
        match definitions.iter_mut().find(|d| d.id == definition.id) {
            Some(existing) => *existing = definition,
            None => definitions.push(definition),
        }
        Ok(())
    }

    async fn list_automations(&self) -> StorageResult<Vec<AutomationDefinition>> {
        Ok(self.definitions.lock().unwrap().clone())
    }

    async fn active_field_change_automations(&self) -> StorageResult<Vec<AutomationDefinition>> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(StorageError::Unavailable(
                "injected automation read failure".to_string(),
            ));
        }
        let definitions = self.definitions.lock().unwrap();
        Ok(definitions
            .iter()
            .filter(|d| d.active && d.trigger_type == TriggerType::OnFieldChange)
            .cloned()
            .collect())
    }
}

// ---------------------------------------------------------------------------
// MemoryAutomationQueue
// ---------------------------------------------------------------------------

/// In-memory automation queue backed by an append-only `Vec`.
///
/// `delay_enqueue` holds every insert for a while, to widen the window in
/// which a dispatch is in progress.
#[derive(Debug, Default)]
pub struct MemoryAutomationQueue {
    entries: Mutex<Vec<AutomationQueueEntry>>,
    failing_automations: Mutex<HashSet<String>>,
    delay: Mutex<Option<Duration>>,
    enqueue_calls: AtomicUsize,
}

impl MemoryAutomationQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `enqueue` fail for one automation id while others succeed.
    pub fn fail_for(&self, automation_id: impl Into<String>) {
        self.failing_automations
            .lock()
            .unwrap()
            .insert(automation_id.into());
    }

    pub fn clear_failures(&self) {
        self.failing_automations.lock().unwrap().clear();
    }

    pub fn delay_enqueue(&self, delay: Option<Duration>) {
        *self.delay.lock().unwrap() = delay;
    }

    pub fn enqueue_calls(&self) -> usize {
        self.enqueue_calls.load(Ordering::SeqCst)
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn transition(
        &self,
        id: &QueueEntryId,
        apply: impl FnOnce(&mut AutomationQueueEntry),
    ) -> StorageResult<AutomationQueueEntry> {
        let mut entries = self.entries.lock().unwrap();
        let entry = entries
            .iter_mut()
            .find(|e| &e.id == id)
            .ok_or_else(|| StorageError::QueueEntryNotFound {
                entry_id: id.0.clone(),
            })?;
        if entry.status != QueueStatus::Pending {
            return Err(StorageError::InvalidQueueState {
                entry_id: id.0.clone(),
                status: entry.status.to_string(),
                expected: QueueStatus::Pending.to_string(),
            });
        }
        apply(entry);
        Ok(entry.clone())
    }
}

#[async_trait]
impl AutomationQueue for MemoryAutomationQueue {
    async fn enqueue(&self, entry: NewQueueEntry) -> StorageResult<Enqueued> {
        self.enqueue_calls.fetch_add(1, Ordering::SeqCst);
        let delay = *self.delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self
            .failing_automations
            .lock()
            .unwrap()
            .contains(&entry.automation_id)
        {
            return Err(StorageError::Unavailable(format!(
                "injected insert failure for automation {}",
                entry.automation_id
            )));
        }

        let key = entry.dedupe_key();
        let mut entries = self.entries.lock().unwrap();
        if let Some(existing) = entries.iter().find(|e| e.dedupe_key == key) {
            return Ok(Enqueued {
                entry: existing.clone(),
                inserted: false,
            });
        }
        let created = entry.into_entry(Utc::now());
        entries.push(created.clone());
        Ok(Enqueued {
            entry: created,
            inserted: true,
        })
    }

    async fn get_entry(&self, id: &QueueEntryId) -> StorageResult<AutomationQueueEntry> {
        let entries = self.entries.lock().unwrap();
        entries
            .iter()
            .find(|e| &e.id == id)
            .cloned()
            .ok_or_else(|| StorageError::QueueEntryNotFound {
                entry_id: id.0.clone(),
            })
    }

    async fn list_entries(
        &self,
        record_id: Option<&RecordId>,
        status: Option<QueueStatus>,
    ) -> StorageResult<Vec<AutomationQueueEntry>> {
        let entries = self.entries.lock().unwrap();
        Ok(entries
            .iter()
            .filter(|e| record_id.map(|r| &e.record_id == r).unwrap_or(true))
            .filter(|e| status.map(|s| e.status == s).unwrap_or(true))
            .cloned()
            .collect())
    }

    async fn mark_sent(&self, id: &QueueEntryId) -> StorageResult<AutomationQueueEntry> {
        self.transition(id, |e| {
            e.status = QueueStatus::Sent;
            e.sent_at = Some(Utc::now());
        })
    }

    async fn mark_failed(
        &self,
        id: &QueueEntryId,
        error: &str,
    ) -> StorageResult<AutomationQueueEntry> {
        let error = error.to_string();
        self.transition(id, move |e| {
            e.status = QueueStatus::Failed;
            e.error = Some(error);
        })
    }
}
