//! One attempt per (record, field): rejection, cancellation, and timeouts.

use std::sync::Arc;
use std::time::Duration;

use loangate_core::{
    CancelOutcome, ConfirmationCoordinator, CoordinatorError, CoordinatorStores, Decision,
    EngineConfig, EngineWarning, RuleCatalog, TransitionRequest, TransitionResult,
};
use loangate_state::fakes::{
    MemoryAutomationQueue, MemoryAutomationStore, MemoryRecordStore, MemoryRelatedDocuments,
};
use loangate_state::{
    AutomationDefinition, RecipientType, RecordId, RecordSnapshot, RecordStore,
};

struct Harness {
    records: Arc<MemoryRecordStore>,
    documents: Arc<MemoryRelatedDocuments>,
    queue: Arc<MemoryAutomationQueue>,
    coordinator: Arc<ConfirmationCoordinator>,
}

async fn harness(config: EngineConfig) -> Harness {
    let records = Arc::new(MemoryRecordStore::new());
    records
        .save_record(
            RecordSnapshot::new(loan_id())
                .with_field("status", "Submitted")
                .with_document("appraisal"),
        )
        .await
        .unwrap();
    let documents = Arc::new(MemoryRelatedDocuments::new());
    let automations = Arc::new(MemoryAutomationStore::with_definitions(vec![
        AutomationDefinition::on_field_change(
            "notify-borrower",
            "Borrower approval notice",
            RecipientType::Borrower,
            "status",
            "Approved",
        ),
    ]));
    let queue = Arc::new(MemoryAutomationQueue::new());
    let stores = CoordinatorStores {
        records: records.clone(),
        documents: documents.clone(),
        automations,
        queue: queue.clone(),
    };
    let coordinator = ConfirmationCoordinator::new(
        RuleCatalog::standard().into_registry().unwrap(),
        stores,
        &config,
    );
    Harness {
        records,
        documents,
        queue,
        coordinator: Arc::new(coordinator),
    }
}

fn loan_id() -> RecordId {
    RecordId::new("loan-1")
}

fn condo_received(actor: &str) -> TransitionRequest {
    TransitionRequest::new(loan_id(), "condo_status", "Received", actor)
}

/// Spawn a condo proposal and wait until it is parked in its async check.
async fn spawn_slow_proposal(
    h: &Harness,
) -> tokio::task::JoinHandle<loangate_core::Result<TransitionResult>> {
    h.documents.delay_reads(Some(Duration::from_millis(200)));
    let coordinator = h.coordinator.clone();
    let handle = tokio::spawn(async move { coordinator.propose(condo_received("alice")).await });
    while h.coordinator.state_of(&loan_id(), "condo_status").name() != "validating" {
        tokio::task::yield_now().await;
    }
    handle
}

#[tokio::test(start_paused = true)]
async fn concurrent_proposal_is_rejected() {
    let h = harness(EngineConfig::default()).await;
    let first = spawn_slow_proposal(&h).await;

    let err = h
        .coordinator
        .propose(condo_received("bob"))
        .await
        .unwrap_err();
    assert!(matches!(
        &err,
        CoordinatorError::TransitionInFlight { state, .. } if state == "validating"
    ));
    assert!(err.is_retryable());

    let result = first.await.unwrap().unwrap();
    assert!(result.is_applied());
    assert_eq!(h.records.write_calls(), 1);

    let history = h.records.field_history(&loan_id()).await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].actor, "alice");
}

#[tokio::test(start_paused = true)]
async fn other_fields_are_independent() {
    let h = harness(EngineConfig::default()).await;
    let first = spawn_slow_proposal(&h).await;

    let other = h
        .coordinator
        .propose(TransitionRequest::new(loan_id(), "status", "Withdrawn", "bob"))
        .await
        .unwrap();
    assert!(other.is_applied());

    assert!(first.await.unwrap().unwrap().is_applied());
    assert_eq!(h.records.write_calls(), 2);
}

#[tokio::test(start_paused = true)]
async fn cancel_before_write_prevents_it() {
    let h = harness(EngineConfig::default()).await;
    let first = spawn_slow_proposal(&h).await;

    assert_eq!(
        h.coordinator.cancel(&loan_id(), "condo_status").unwrap(),
        CancelOutcome::Requested
    );

    let result = first.await.unwrap().unwrap();
    assert!(matches!(
        result,
        TransitionResult::Cancelled { ref attempted_value, .. } if attempted_value == "Received"
    ));
    assert_eq!(h.records.write_calls(), 0);
    assert_eq!(h.coordinator.state_of(&loan_id(), "condo_status").name(), "idle");
}

#[tokio::test]
async fn cancel_after_commit_is_not_supported() {
    let h = harness(EngineConfig::default()).await;
    let result = h
        .coordinator
        .propose(TransitionRequest::new(loan_id(), "status", "Approved", "alice"))
        .await
        .unwrap();
    assert!(matches!(result, TransitionResult::AppliedPendingDecision { .. }));

    let err = h.coordinator.cancel(&loan_id(), "status").unwrap_err();
    assert!(matches!(err, CoordinatorError::CancelNotSupported { .. }));

    // The decision is still open.
    h.coordinator
        .resolve_decision(&loan_id(), "status", Decision::ApplyOnly)
        .await
        .unwrap();
    assert_eq!(
        h.coordinator.cancel(&loan_id(), "status").unwrap(),
        CancelOutcome::NothingInFlight
    );
}

#[tokio::test]
async fn pending_decision_holds_the_pair() {
    let h = harness(EngineConfig::default()).await;
    h.coordinator
        .propose(TransitionRequest::new(loan_id(), "status", "Approved", "alice"))
        .await
        .unwrap();

    let err = h
        .coordinator
        .propose(TransitionRequest::new(loan_id(), "status", "Withdrawn", "bob"))
        .await
        .unwrap_err();
    assert!(matches!(
        &err,
        CoordinatorError::TransitionInFlight { state, .. } if state == "awaiting_decision"
    ));

    h.coordinator
        .resolve_decision(&loan_id(), "status", Decision::SendAndApply)
        .await
        .unwrap();
    let next = h
        .coordinator
        .propose(TransitionRequest::new(loan_id(), "status", "Withdrawn", "bob"))
        .await
        .unwrap();
    assert!(next.is_applied());
}

// Decision expiry runs on the wall clock, so this one waits for real.
#[tokio::test]
async fn decision_expiring_mid_dispatch_keeps_the_pair_claimed() {
    let h = harness(EngineConfig::default().with_decision_ttl_secs(1)).await;
    h.queue.delay_enqueue(Some(Duration::from_millis(1500)));

    let proposed = h
        .coordinator
        .propose(TransitionRequest::new(loan_id(), "status", "Approved", "alice"))
        .await
        .unwrap();
    assert!(matches!(proposed, TransitionResult::AppliedPendingDecision { .. }));

    let coordinator = h.coordinator.clone();
    let resolving = tokio::spawn(async move {
        coordinator
            .resolve_decision(&loan_id(), "status", Decision::SendAndApply)
            .await
    });
    while h.coordinator.state_of(&loan_id(), "status").name() != "resolving" {
        tokio::task::yield_now().await;
    }

    // Past expires_at, with the enqueue still sleeping.
    tokio::time::sleep(Duration::from_millis(1100)).await;
    let err = h
        .coordinator
        .propose(TransitionRequest::new(loan_id(), "status", "Withdrawn", "bob"))
        .await
        .unwrap_err();
    assert!(matches!(
        &err,
        CoordinatorError::TransitionInFlight { state, .. } if state == "resolving"
    ));
    assert!(matches!(
        h.coordinator.cancel(&loan_id(), "status"),
        Err(CoordinatorError::CancelNotSupported { .. })
    ));

    let resolved = resolving.await.unwrap().unwrap();
    assert_eq!(resolved.report.created(), 1);
    assert_eq!(h.queue.len(), 1);
    assert_eq!(h.coordinator.state_of(&loan_id(), "status").name(), "idle");

    let next = h
        .coordinator
        .propose(TransitionRequest::new(loan_id(), "status", "Withdrawn", "bob"))
        .await
        .unwrap();
    assert!(next.is_applied());
}

#[tokio::test(start_paused = true)]
async fn slow_check_times_out_and_fails_open() {
    let h = harness(EngineConfig::default().with_check_timeout_ms(50)).await;
    h.documents.delay_reads(Some(Duration::from_secs(10)));

    let result = h
        .coordinator
        .propose(condo_received("alice"))
        .await
        .unwrap();
    assert!(result.is_applied());
    assert!(matches!(
        result.warnings(),
        [EngineWarning::CheckFailedOpen { error, .. }] if error.contains("50")
    ));
}
