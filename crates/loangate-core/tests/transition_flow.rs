//! End-to-end coordinator behaviour against the in-memory stores.

use std::sync::Arc;

use loangate_core::{
    ActionKind, ConfirmationCoordinator, CoordinatorError, CoordinatorStores, Decision,
    EngineConfig, EngineWarning, RuleCatalog, TransitionRequest, TransitionResult,
    TransitionState,
};
use loangate_state::fakes::{
    MemoryAutomationQueue, MemoryAutomationStore, MemoryRecordStore, MemoryRelatedDocuments,
};
use loangate_state::{
    AutomationDefinition, AutomationQueue, QueueStatus, RecipientType, RecordId, RecordSnapshot,
    RecordStore, RelatedDocument, RelatedDocumentReader, StorageError,
};

struct Harness {
    records: Arc<MemoryRecordStore>,
    documents: Arc<MemoryRelatedDocuments>,
    automations: Arc<MemoryAutomationStore>,
    queue: Arc<MemoryAutomationQueue>,
    coordinator: ConfirmationCoordinator,
}

impl Harness {
    fn new(definitions: Vec<AutomationDefinition>) -> Self {
        Self::with_config(definitions, EngineConfig::default())
    }

    fn with_config(definitions: Vec<AutomationDefinition>, config: EngineConfig) -> Self {
        let records = Arc::new(MemoryRecordStore::new());
        let documents = Arc::new(MemoryRelatedDocuments::new());
        let automations = Arc::new(MemoryAutomationStore::with_definitions(definitions));
        let queue = Arc::new(MemoryAutomationQueue::new());
        let stores = CoordinatorStores {
            records: records.clone(),
            documents: documents.clone(),
            automations: automations.clone(),
            queue: queue.clone(),
        };
        let registry = RuleCatalog::standard().into_registry().unwrap();
        Self {
            records,
            documents,
            automations,
            queue,
            coordinator: ConfirmationCoordinator::new(registry, stores, &config),
        }
    }

    async fn seed(&self, snapshot: RecordSnapshot) {
        self.records.save_record(snapshot).await.unwrap();
    }

    async fn field(&self, field: &str) -> Option<String> {
        self.records
            .snapshot(&loan_id())
            .await
            .unwrap()
            .field(field)
            .map(String::from)
    }
}

fn loan_id() -> RecordId {
    RecordId::new("loan-1")
}

fn submitted() -> RecordSnapshot {
    RecordSnapshot::new(loan_id()).with_field("status", "Submitted")
}

fn approved_notices() -> Vec<AutomationDefinition> {
    vec![
        AutomationDefinition::on_field_change(
            "notify-borrower",
            "Borrower approval notice",
            RecipientType::Borrower,
            "status",
            "Approved",
        ),
        AutomationDefinition::on_field_change(
            "notify-agent",
            "Agent approval notice",
            RecipientType::Realtor,
            "status",
            "Approved",
        ),
    ]
}

fn propose(field: &str, value: &str) -> TransitionRequest {
    TransitionRequest::new(loan_id(), field, value, "alice")
}

// ---------------------------------------------------------------------------
// Blocking
// ---------------------------------------------------------------------------

#[tokio::test]
async fn blocked_transition_leaves_field_untouched() {
    let h = Harness::new(approved_notices());
    h.seed(submitted()).await;

    let result = h
        .coordinator
        .propose(propose("status", "Approved"))
        .await
        .unwrap();

    let TransitionResult::Blocked {
        rule,
        field_label,
        attempted_value,
        reason,
        ..
    } = &result
    else {
        panic!("expected blocked, got {result:?}");
    };
    assert_eq!(rule.key().to_string(), "status=Approved");
    assert_eq!(field_label, "Loan Status");
    assert_eq!(attempted_value, "Approved");
    assert!(reason.contains("appraisal"));
    assert_eq!(
        result.required_action(),
        Some((ActionKind::UploadFile, Some("Upload appraisal")))
    );

    assert_eq!(h.field("status").await.as_deref(), Some("Submitted"));
    assert_eq!(h.records.write_calls(), 0);
    assert_eq!(h.automations.reads(), 0);
    assert!(h.queue.is_empty());
    assert_eq!(
        h.coordinator.state_of(&loan_id(), "status"),
        TransitionState::Idle
    );
}

#[tokio::test]
async fn unruled_transition_is_applied() {
    let h = Harness::new(vec![]);
    h.seed(submitted()).await;

    let result = h
        .coordinator
        .propose(propose("status", "Withdrawn"))
        .await
        .unwrap();
    let TransitionResult::Applied {
        change, warnings, ..
    } = result
    else {
        panic!("expected applied");
    };
    assert_eq!(change.old_value.as_deref(), Some("Submitted"));
    assert_eq!(change.new_value, "Withdrawn");
    assert_eq!(change.actor, "alice");
    assert!(warnings.is_empty());

    let history = h.records.field_history(&loan_id()).await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].change_id, change.change_id);
}

#[tokio::test]
async fn stage_rule_checks_other_fields() {
    let h = Harness::new(vec![]);
    h.seed(submitted()).await;

    let blocked = h
        .coordinator
        .propose(propose("stage", "Underwriting"))
        .await
        .unwrap();
    assert!(blocked.is_blocked());
    assert_eq!(blocked.required_action(), Some((ActionKind::None, None)));

    h.seed(submitted().with_field("loan_amount", "450000")).await;
    let applied = h
        .coordinator
        .propose(propose("stage", "Underwriting"))
        .await
        .unwrap();
    assert!(applied.is_applied());
    assert_eq!(h.field("stage").await.as_deref(), Some("Underwriting"));
}

// ---------------------------------------------------------------------------
// Automations and decisions
// ---------------------------------------------------------------------------

#[tokio::test]
async fn send_and_apply_queues_one_entry_per_automation() {
    let h = Harness::new(approved_notices());
    h.seed(submitted().with_document("appraisal")).await;

    let result = h
        .coordinator
        .propose(propose("status", "Approved"))
        .await
        .unwrap();
    let TransitionResult::AppliedPendingDecision {
        change,
        automations,
        ..
    } = result
    else {
        panic!("expected a pending decision");
    };
    assert_eq!(automations.len(), 2);
    // The field is committed before the decision.
    assert_eq!(h.field("status").await.as_deref(), Some("Approved"));
    assert!(h.queue.is_empty());
    assert_eq!(
        h.coordinator.state_of(&loan_id(), "status").name(),
        "awaiting_decision"
    );

    let dispatched = h
        .coordinator
        .resolve_decision(&loan_id(), "status", Decision::SendAndApply)
        .await
        .unwrap();
    assert_eq!(dispatched.change.change_id, change.change_id);
    assert_eq!(dispatched.report.created(), 2);
    assert!(dispatched.report.is_complete());

    let entries = h
        .queue
        .list_entries(Some(&loan_id()), Some(QueueStatus::Pending))
        .await
        .unwrap();
    assert_eq!(entries.len(), 2);
    for entry in &entries {
        assert_eq!(entry.new_value, "Approved");
        assert_eq!(entry.old_value.as_deref(), Some("Submitted"));
        assert_eq!(entry.triggered_by, "alice");
        assert!(entry.triggered_at >= change.changed_at);
    }
    assert_eq!(
        h.coordinator.state_of(&loan_id(), "status"),
        TransitionState::Idle
    );
}

#[tokio::test]
async fn apply_only_keeps_change_and_queues_nothing() {
    let h = Harness::new(approved_notices());
    h.seed(submitted().with_document("appraisal")).await;

    h.coordinator
        .propose(propose("status", "Approved"))
        .await
        .unwrap();
    let result = h
        .coordinator
        .resolve_decision(&loan_id(), "status", Decision::ApplyOnly)
        .await
        .unwrap();

    assert_eq!(result.decision, Decision::ApplyOnly);
    assert_eq!(result.report.created(), 0);
    assert!(h.queue.is_empty());
    assert_eq!(h.field("status").await.as_deref(), Some("Approved"));
}

#[tokio::test]
async fn resolving_twice_is_rejected() {
    let h = Harness::new(approved_notices());
    h.seed(submitted().with_document("appraisal")).await;
    h.coordinator
        .propose(propose("status", "Approved"))
        .await
        .unwrap();
    h.coordinator
        .resolve_decision(&loan_id(), "status", Decision::SendAndApply)
        .await
        .unwrap();

    let err = h
        .coordinator
        .resolve_decision(&loan_id(), "status", Decision::SendAndApply)
        .await
        .unwrap_err();
    assert!(matches!(err, CoordinatorError::NoPendingDecision { .. }));
    assert_eq!(h.queue.len(), 2);
}

#[tokio::test]
async fn redispatching_one_change_does_not_duplicate_queue_entries() {
    let h = Harness::new(approved_notices());
    h.seed(submitted().with_document("appraisal")).await;

    let TransitionResult::AppliedPendingDecision {
        change,
        automations,
        ..
    } = h
        .coordinator
        .propose(propose("status", "Approved"))
        .await
        .unwrap()
    else {
        panic!("expected a pending decision");
    };
    let first = h
        .coordinator
        .resolve_decision(&loan_id(), "status", Decision::SendAndApply)
        .await
        .unwrap();
    assert_eq!(first.report.created(), 2);

    let retried = h.coordinator.dispatcher().dispatch(&change, &automations).await;
    assert_eq!(retried.created(), 0);
    assert_eq!(retried.entries.len(), 2);
    assert_eq!(h.queue.len(), 2);
}

#[tokio::test]
async fn reapproval_after_revert_queues_again() {
    let h = Harness::new(approved_notices());
    h.seed(submitted().with_document("appraisal")).await;

    h.coordinator
        .propose(propose("status", "Approved"))
        .await
        .unwrap();
    let first = h
        .coordinator
        .resolve_decision(&loan_id(), "status", Decision::SendAndApply)
        .await
        .unwrap();
    for enqueued in &first.report.entries {
        h.queue.mark_sent(&enqueued.entry.id).await.unwrap();
    }

    let reverted = h
        .coordinator
        .propose(propose("status", "Submitted"))
        .await
        .unwrap();
    assert!(reverted.is_applied());

    h.coordinator
        .propose(TransitionRequest::new(loan_id(), "status", "Approved", "bob"))
        .await
        .unwrap();
    let second = h
        .coordinator
        .resolve_decision(&loan_id(), "status", Decision::SendAndApply)
        .await
        .unwrap();
    assert_eq!(second.report.created(), 2);
    assert_ne!(second.change.change_id, first.change.change_id);

    let pending = h
        .queue
        .list_entries(Some(&loan_id()), Some(QueueStatus::Pending))
        .await
        .unwrap();
    assert_eq!(pending.len(), 2);
    for entry in &pending {
        assert_eq!(entry.triggered_by, "bob");
        assert_eq!(entry.change_id, second.change.change_id);
        assert_eq!(entry.old_value.as_deref(), Some("Submitted"));
    }
    assert_eq!(h.queue.len(), 4);
    assert_eq!(h.records.write_calls(), 3);
}

#[tokio::test]
async fn failed_queue_insert_is_reported_not_fatal() {
    let h = Harness::new(approved_notices());
    h.seed(submitted().with_document("appraisal")).await;
    h.queue.fail_for("notify-agent");

    h.coordinator
        .propose(propose("status", "Approved"))
        .await
        .unwrap();
    let result = h
        .coordinator
        .resolve_decision(&loan_id(), "status", Decision::SendAndApply)
        .await
        .unwrap();

    assert_eq!(result.report.created(), 1);
    assert_eq!(result.report.failures.len(), 1);
    assert_eq!(result.report.failures[0].automation_id, "notify-agent");
    assert_eq!(h.field("status").await.as_deref(), Some("Approved"));
}

#[tokio::test]
async fn inactive_and_unrelated_automations_never_fire() {
    let h = Harness::new(vec![
        AutomationDefinition::on_field_change(
            "paused",
            "Paused notice",
            RecipientType::Borrower,
            "status",
            "Withdrawn",
        )
        .inactive(),
        AutomationDefinition::on_field_change(
            "other-value",
            "Approval notice",
            RecipientType::Borrower,
            "status",
            "Approved",
        ),
    ]);
    h.seed(submitted()).await;

    let result = h
        .coordinator
        .propose(propose("status", "Withdrawn"))
        .await
        .unwrap();
    assert!(matches!(result, TransitionResult::Applied { .. }));
    assert_eq!(
        h.coordinator.state_of(&loan_id(), "status"),
        TransitionState::Idle
    );
}

#[tokio::test]
async fn decision_expiry_settles_as_apply_only() {
    let h = Harness::with_config(
        approved_notices(),
        EngineConfig::default().with_decision_ttl_secs(0),
    );
    h.seed(submitted().with_document("appraisal")).await;

    h.coordinator
        .propose(propose("status", "Approved"))
        .await
        .unwrap();
    assert!(matches!(
        h.coordinator.state_of(&loan_id(), "status"),
        TransitionState::Done {
            decision: Some(Decision::ApplyOnly),
            queued: 0,
            ..
        }
    ));

    let err = h
        .coordinator
        .resolve_decision(&loan_id(), "status", Decision::SendAndApply)
        .await
        .unwrap_err();
    assert!(matches!(err, CoordinatorError::DecisionExpired { .. }));
    assert_eq!(
        h.coordinator.state_of(&loan_id(), "status"),
        TransitionState::Idle
    );
    assert!(h.queue.is_empty());
    assert_eq!(h.field("status").await.as_deref(), Some("Approved"));

    // The pair is free again.
    let next = h
        .coordinator
        .propose(propose("status", "Withdrawn"))
        .await
        .unwrap();
    assert!(next.is_applied());
}

// ---------------------------------------------------------------------------
// Bypass
// ---------------------------------------------------------------------------

#[tokio::test]
async fn bypass_on_bypassable_rule_is_attributed() {
    let h = Harness::new(vec![]);
    h.seed(submitted()).await;

    let result = h
        .coordinator
        .propose(propose("status", "Clear to Close").with_bypass())
        .await
        .unwrap();
    let TransitionResult::Applied { change, .. } = result else {
        panic!("expected applied");
    };
    assert_eq!(change.bypassed_rule.as_deref(), Some("status=Clear to Close"));
    assert_eq!(change.actor, "alice");

    let history = h.records.field_history(&loan_id()).await.unwrap();
    assert_eq!(
        history[0].bypassed_rule.as_deref(),
        Some("status=Clear to Close")
    );
}

#[tokio::test]
async fn bypass_without_actor_is_rejected() {
    let h = Harness::new(vec![]);
    h.seed(submitted()).await;

    let request = TransitionRequest::new(loan_id(), "status", "Clear to Close", "  ").with_bypass();
    let err = h.coordinator.propose(request).await.unwrap_err();
    assert!(matches!(err, CoordinatorError::UnattributedBypass));
    assert_eq!(h.records.write_calls(), 0);
}

#[tokio::test]
async fn bypass_on_strict_rule_is_ignored() {
    let h = Harness::new(vec![]);
    h.seed(submitted()).await;

    let result = h
        .coordinator
        .propose(propose("status", "Approved").with_bypass())
        .await
        .unwrap();
    assert!(result.is_blocked());
    assert!(result.warnings().contains(&EngineWarning::BypassIgnored {
        rule_key: "status=Approved".into()
    }));
    assert_eq!(h.records.write_calls(), 0);
}

// ---------------------------------------------------------------------------
// Failures
// ---------------------------------------------------------------------------

#[tokio::test]
async fn write_failure_surfaces_and_skips_matching() {
    let h = Harness::new(approved_notices());
    h.seed(submitted().with_document("appraisal")).await;
    h.records.set_fail_writes(true);

    let err = h
        .coordinator
        .propose(propose("status", "Approved"))
        .await
        .unwrap_err();
    assert!(matches!(err, CoordinatorError::PersistenceWrite { .. }));
    assert!(err.is_retryable());
    assert_eq!(h.automations.reads(), 0);
    assert!(h.queue.is_empty());
    assert_eq!(
        h.coordinator.state_of(&loan_id(), "status"),
        TransitionState::Idle
    );
}

#[tokio::test]
async fn missing_record_is_a_snapshot_error() {
    let h = Harness::new(vec![]);
    let err = h
        .coordinator
        .propose(propose("status", "Approved"))
        .await
        .unwrap_err();
    assert!(matches!(err, CoordinatorError::SnapshotRead { .. }));
}

#[tokio::test]
async fn automation_lookup_failure_keeps_the_change() {
    let h = Harness::new(approved_notices());
    h.seed(submitted().with_document("appraisal")).await;
    h.automations.set_fail_reads(true);

    let result = h
        .coordinator
        .propose(propose("status", "Approved"))
        .await
        .unwrap();
    assert!(result.is_applied());
    assert!(matches!(
        result.warnings(),
        [EngineWarning::AutomationLookupFailed { .. }]
    ));
    assert_eq!(h.field("status").await.as_deref(), Some("Approved"));
}

// ---------------------------------------------------------------------------
// Async checks
// ---------------------------------------------------------------------------

#[tokio::test]
async fn missing_condo_documents_block() {
    let h = Harness::new(vec![]);
    h.seed(submitted()).await;
    h.documents
        .save_related_document(
            RelatedDocument::new(loan_id(), "condo", "bylaws")
                .required(true)
                .present(false),
        )
        .await
        .unwrap();

    let result = h
        .coordinator
        .propose(propose("condo_status", "Received"))
        .await
        .unwrap();
    let TransitionResult::Blocked {
        field_label,
        reason,
        ..
    } = &result
    else {
        panic!("expected blocked");
    };
    assert_eq!(field_label, "Condo Status");
    assert!(reason.contains("bylaws"));
    assert_eq!(h.records.write_calls(), 0);
}

#[tokio::test]
async fn complete_condo_documents_pass() {
    let h = Harness::new(vec![]);
    h.seed(submitted()).await;
    h.documents
        .save_related_document(
            RelatedDocument::new(loan_id(), "condo", "bylaws")
                .required(true)
                .present(true),
        )
        .await
        .unwrap();

    let result = h
        .coordinator
        .propose(propose("condo_status", "Received"))
        .await
        .unwrap();
    assert!(result.is_applied());
}

#[tokio::test]
async fn unavailable_check_fails_open_with_warning() {
    let h = Harness::new(vec![]);
    h.seed(submitted()).await;
    h.documents
        .fail_with(Some(StorageError::Unavailable("documents offline".into())));

    let result = h
        .coordinator
        .propose(propose("condo_status", "Received"))
        .await
        .unwrap();
    assert!(result.is_applied());
    assert!(matches!(
        result.warnings(),
        [EngineWarning::CheckFailedOpen { rule_key, .. }] if rule_key == "condo_status=Received"
    ));
}

// ---------------------------------------------------------------------------
// Shared backend
// ---------------------------------------------------------------------------

#[tokio::test]
async fn full_flow_on_surreal_backend() {
    use loangate_state::{AutomationStore, SurrealLoanStore};

    let store = Arc::new(SurrealLoanStore::in_memory().await.unwrap());
    store
        .save_record(submitted().with_document("appraisal"))
        .await
        .unwrap();
    for definition in approved_notices() {
        store.save_automation(definition).await.unwrap();
    }

    let coordinator = ConfirmationCoordinator::new(
        RuleCatalog::standard().into_registry().unwrap(),
        CoordinatorStores::shared(store.clone()),
        &EngineConfig::default(),
    );

    let result = coordinator
        .propose(propose("status", "Approved"))
        .await
        .unwrap();
    assert!(matches!(
        result,
        TransitionResult::AppliedPendingDecision { .. }
    ));
    let dispatched = coordinator
        .resolve_decision(&loan_id(), "status", Decision::SendAndApply)
        .await
        .unwrap();
    assert_eq!(dispatched.report.created(), 2);

    let pending = coordinator.dispatcher().pending_for(&loan_id()).await.unwrap();
    assert_eq!(pending.len(), 2);
    assert!(pending.iter().all(|e| e.triggered_by == "alice"));

    let snapshot = store.snapshot(&loan_id()).await.unwrap();
    assert_eq!(snapshot.field("status"), Some("Approved"));
}
