//! Asynchronous validation: checks that read outside the snapshot.
//!
//! A failed check blocks (fail-closed). An infrastructure failure while
//! running the check, including hitting the timeout, permits the transition
//! and records a warning (fail-open).

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, instrument};

use loangate_state::{RecordId, RecordSnapshot, RelatedDocumentReader, StorageResult};

use super::sync;
use crate::domain::{
    AsyncCheck, CheckExecutionError, EngineWarning, TransitionRule, ValidationOutcome,
};
use crate::metrics::METRICS;
use crate::obs;

/// Result of running one asynchronous check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckOutcome {
    Passed,
    Failed { reason: String },
    /// The check could not run; treat as passed and warn.
    FailedOpen { error: CheckExecutionError },
}

/// Runs `AsyncCheck`s against a `RelatedDocumentReader` under a timeout.
#[derive(Clone)]
pub struct AsyncValidator {
    reader: Arc<dyn RelatedDocumentReader>,
    timeout: Duration,
}

impl AsyncValidator {
    pub fn new(reader: Arc<dyn RelatedDocumentReader>, timeout: Duration) -> Self {
        Self { reader, timeout }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Run one check with the configured timeout.
    #[instrument(skip(self), fields(record_id = %record_id, check = %check))]
    pub async fn run_check(&self, check: &AsyncCheck, record_id: &RecordId) -> CheckOutcome {
        let timeout_ms = u64::try_from(self.timeout.as_millis()).unwrap_or(u64::MAX);
        match tokio::time::timeout(self.timeout, self.read(check, record_id)).await {
            Err(_) => CheckOutcome::FailedOpen {
                error: CheckExecutionError::Timeout { timeout_ms },
            },
            Ok(Err(err)) => CheckOutcome::FailedOpen {
                error: CheckExecutionError::Storage(err),
            },
            Ok(Ok(None)) => CheckOutcome::Passed,
            Ok(Ok(Some(reason))) => {
                debug!(reason = %reason, "async check failed");
                CheckOutcome::Failed { reason }
            }
        }
    }

    /// `Ok(None)` when the check holds, `Ok(Some(reason))` when it does not.
    async fn read(&self, check: &AsyncCheck, record_id: &RecordId) -> StorageResult<Option<String>> {
        match check {
            AsyncCheck::RelatedDocumentsComplete { relation } => {
                let documents = self.reader.related_documents(record_id, relation).await?;
                let missing: Vec<&str> = documents
                    .iter()
                    .filter(|d| d.is_missing())
                    .map(|d| d.kind.as_str())
                    .collect();
                if missing.is_empty() {
                    Ok(None)
                } else {
                    Ok(Some(format!(
                        "missing {relation} documents: {}",
                        missing.join(", ")
                    )))
                }
            }
            AsyncCheck::DocumentOnFile { document } => {
                if self.reader.document_on_file(record_id, document).await? {
                    Ok(None)
                } else {
                    Ok(Some(format!("{document} is not on file")))
                }
            }
        }
    }

    /// Full validation: the synchronous predicate, then the rule's async
    /// check if it has one. Both must hold.
    pub async fn validate(
        &self,
        rule: Option<&TransitionRule>,
        snapshot: &RecordSnapshot,
    ) -> ValidationOutcome {
        let outcome = sync::evaluate(rule, snapshot);
        let Some(rule) = rule else {
            return outcome;
        };
        let Some(check) = rule.async_check() else {
            return outcome;
        };
        if !outcome.is_valid {
            return outcome;
        }

        match self.run_check(check, &snapshot.record_id).await {
            CheckOutcome::Passed => outcome,
            CheckOutcome::Failed { reason } => ValidationOutcome::blocked(
                rule.clone(),
                format!("{} ({reason})", rule.message()),
            ),
            CheckOutcome::FailedOpen { error } => {
                let rule_key = rule.key().to_string();
                METRICS.inc_checks_failed_open();
                obs::emit_check_failed_open(&snapshot.record_id, &rule_key, check, &error);
                outcome.with_warning(EngineWarning::CheckFailedOpen {
                    rule_key,
                    check: check.to_string(),
                    error: error.to_string(),
                })
            }
        }
    }
}
