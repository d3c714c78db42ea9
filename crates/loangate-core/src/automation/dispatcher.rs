//! Automation dispatch: one `Pending` queue entry per matched automation.
//!
//! Inserts run concurrently and independently. A failed insert is reported
//! in the `DispatchReport` and never affects the others or the committed
//! field change. Re-dispatching is safe because the queue is idempotent on
//! `(record_id, automation_id, new_value)`.

use std::collections::HashSet;
use std::sync::Arc;

use futures::future::join_all;
use tracing::instrument;

use loangate_state::{
    AutomationDefinition, AutomationQueue, AutomationQueueEntry, FieldChange, NewQueueEntry,
    QueueEntryId, QueueStatus, RecordId, StorageResult,
};

use crate::domain::{DispatchReport, QueueInsertFailure};
use crate::metrics::METRICS;
use crate::obs;

#[derive(Clone)]
pub struct AutomationDispatcher {
    queue: Arc<dyn AutomationQueue>,
}

impl AutomationDispatcher {
    pub fn new(queue: Arc<dyn AutomationQueue>) -> Self {
        Self { queue }
    }

    /// Queue every automation for a committed change.
    #[instrument(skip_all, fields(record_id = %change.record_id, field = %change.field))]
    pub async fn dispatch(
        &self,
        change: &FieldChange,
        automations: &[AutomationDefinition],
    ) -> DispatchReport {
        let mut seen = HashSet::new();
        let requests: Vec<NewQueueEntry> = automations
            .iter()
            .filter(|a| seen.insert(a.id.as_str()))
            .map(|a| NewQueueEntry {
                automation_id: a.id.clone(),
                change_id: change.change_id.clone(),
                record_id: change.record_id.clone(),
                field: change.field.clone(),
                old_value: change.old_value.clone(),
                new_value: change.new_value.clone(),
                triggered_by: change.actor.clone(),
            })
            .collect();

        let ids: Vec<String> = requests.iter().map(|r| r.automation_id.clone()).collect();
        let results = join_all(requests.into_iter().map(|r| self.queue.enqueue(r))).await;

        let mut report = DispatchReport::default();
        for (automation_id, result) in ids.into_iter().zip(results) {
            match result {
                Ok(enqueued) => {
                    if enqueued.inserted {
                        METRICS.inc_queue_created();
                    }
                    obs::emit_queue_entry_created(&enqueued.entry, enqueued.inserted);
                    report.entries.push(enqueued);
                }
                Err(err) => {
                    METRICS.inc_queue_failures();
                    obs::emit_queue_insert_failed(&change.record_id, &automation_id, &err);
                    report.failures.push(QueueInsertFailure {
                        automation_id,
                        transient: err.is_transient(),
                        error: err.to_string(),
                    });
                }
            }
        }
        report
    }

    pub async fn entry(&self, id: &QueueEntryId) -> StorageResult<AutomationQueueEntry> {
        self.queue.get_entry(id).await
    }

    /// Current delivery status of one entry.
    pub async fn status(&self, id: &QueueEntryId) -> StorageResult<QueueStatus> {
        Ok(self.queue.get_entry(id).await?.status)
    }

    /// Entries for a record still waiting on the notifier, oldest first.
    pub async fn pending_for(&self, record_id: &RecordId) -> StorageResult<Vec<AutomationQueueEntry>> {
        self.queue
            .list_entries(Some(record_id), Some(QueueStatus::Pending))
            .await
    }
}
