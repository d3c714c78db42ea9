//! Confirmation coordinator: drives `TransitionState` with real I/O.
//!
//! Each `(record_id, field)` pair has at most one attempt in flight. The
//! slot is claimed before anything is read and released when the attempt
//! reaches a terminal state. An attempt waiting for a send/skip decision
//! keeps its slot until it is resolved or its decision expires. Once a
//! decision is being dispatched the slot is `Resolving` and no longer
//! expires.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, Instrument};

use loangate_state::{
    AutomationDefinition, AutomationQueue, AutomationStore, FieldChange, FieldWrite, RecordId,
    RecordStore, RelatedDocumentReader,
};

use super::state::{TransitionEvent, TransitionState};
use crate::automation::{AutomationDispatcher, AutomationMatcher};
use crate::config::EngineConfig;
use crate::domain::{
    CoordinatorError, Decision, DispatchReport, DispatchResult, EngineWarning, FieldTransition,
    Result, StateMachineError, TransitionRequest, TransitionResult, ValidationOutcome,
};
use crate::metrics::METRICS;
use crate::obs;
use crate::rules::RuleRegistry;
use crate::validation::AsyncValidator;

/// The persistence collaborators the coordinator talks to.
#[derive(Clone)]
pub struct CoordinatorStores {
    pub records: Arc<dyn RecordStore>,
    pub documents: Arc<dyn RelatedDocumentReader>,
    pub automations: Arc<dyn AutomationStore>,
    pub queue: Arc<dyn AutomationQueue>,
}

impl CoordinatorStores {
    /// Use one backend for every collaborator.
    pub fn shared<S>(store: Arc<S>) -> Self
    where
        S: RecordStore + RelatedDocumentReader + AutomationStore + AutomationQueue + 'static,
    {
        Self {
            records: store.clone(),
            documents: store.clone(),
            automations: store.clone(),
            queue: store,
        }
    }
}

/// Answer to a `cancel` call that did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CancelOutcome {
    /// Nothing is in flight for the pair; there is nothing to undo.
    NothingInFlight,
    /// The in-flight attempt will stop before writing.
    Requested,
}

type SlotKey = (RecordId, String);

#[derive(Default)]
struct Slot {
    state: TransitionState,
    cancel_requested: bool,
    pending: Option<PendingDecision>,
}

impl Slot {
    fn expired_at(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match &self.state {
            TransitionState::AwaitingDecision { expires_at, .. } if now >= *expires_at => {
                Some(*expires_at)
            }
            _ => None,
        }
    }

    /// Settle an expired decision as apply-only.
    fn settle_expired(self) -> std::result::Result<TransitionState, StateMachineError> {
        self.state.on(TransitionEvent::Expired)
    }
}

struct PendingDecision {
    change: FieldChange,
    automations: Vec<AutomationDefinition>,
}

type Slots = Mutex<HashMap<SlotKey, Slot>>;

fn lock(slots: &Slots) -> MutexGuard<'_, HashMap<SlotKey, Slot>> {
    slots.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Owns one claimed slot; removes it on drop unless `hold` was called.
struct SlotGuard<'a> {
    slots: &'a Slots,
    key: SlotKey,
    held: bool,
}

impl<'a> SlotGuard<'a> {
    fn new(slots: &'a Slots, key: SlotKey) -> Self {
        Self {
            slots,
            key,
            held: false,
        }
    }

    fn advance(&self, event: TransitionEvent) -> std::result::Result<(), StateMachineError> {
        let mut slots = lock(self.slots);
        let slot = slots.entry(self.key.clone()).or_default();
        let next = slot.state.clone().on(event)?;
        debug!(from = slot.state.name(), to = next.name(), "state transition");
        slot.state = next;
        Ok(())
    }

    fn cancel_requested(&self) -> bool {
        lock(self.slots)
            .get(&self.key)
            .is_some_and(|slot| slot.cancel_requested)
    }

    /// Keep the slot past this call, parked with its pending decision.
    fn hold(mut self, pending: PendingDecision) {
        if let Some(slot) = lock(self.slots).get_mut(&self.key) {
            slot.pending = Some(pending);
        }
        self.held = true;
    }
}

impl Drop for SlotGuard<'_> {
    fn drop(&mut self) {
        if !self.held {
            lock(self.slots).remove(&self.key);
        }
    }
}

/// Orchestrates validate, apply, match, decide, and dispatch.
pub struct ConfirmationCoordinator {
    registry: Arc<RuleRegistry>,
    records: Arc<dyn RecordStore>,
    validator: AsyncValidator,
    matcher: AutomationMatcher,
    dispatcher: AutomationDispatcher,
    decision_ttl: chrono::Duration,
    slots: Slots,
}

impl ConfirmationCoordinator {
    pub fn new(registry: RuleRegistry, stores: CoordinatorStores, config: &EngineConfig) -> Self {
        Self {
            registry: Arc::new(registry),
            records: stores.records,
            validator: AsyncValidator::new(stores.documents, config.check_timeout()),
            matcher: AutomationMatcher::new(stores.automations),
            dispatcher: AutomationDispatcher::new(stores.queue),
            decision_ttl: config.decision_ttl(),
            slots: Mutex::new(HashMap::new()),
        }
    }

    pub fn registry(&self) -> &RuleRegistry {
        &self.registry
    }

    pub fn dispatcher(&self) -> &AutomationDispatcher {
        &self.dispatcher
    }

    /// Current state of the pair; `Idle` when nothing is in flight.
    ///
    /// An expired decision reads as its apply-only settlement; the slot
    /// itself is released by the next call on the pair.
    pub fn state_of(&self, record_id: &RecordId, field: &str) -> TransitionState {
        let slots = lock(&self.slots);
        let Some(slot) = slots.get(&(record_id.clone(), field.to_string())) else {
            return TransitionState::Idle;
        };
        match slot.expired_at(Utc::now()) {
            Some(_) => slot
                .state
                .clone()
                .on(TransitionEvent::Expired)
                .unwrap_or_else(|_| slot.state.clone()),
            None => slot.state.clone(),
        }
    }

    /// Claim the pair, settling an expired decision first.
    fn claim(&self, record_id: &RecordId, field: &str) -> Result<SlotGuard<'_>> {
        let key = (record_id.clone(), field.to_string());
        let mut slots = lock(&self.slots);
        if let Some(slot) = slots.get(&key) {
            match slot.expired_at(Utc::now()) {
                Some(expired_at) => {
                    if let Some(slot) = slots.remove(&key) {
                        let settled = slot.settle_expired()?;
                        debug!(to = settled.name(), "expired decision settled");
                    }
                    obs::emit_decision_expired(record_id, field, expired_at);
                }
                None => {
                    return Err(CoordinatorError::TransitionInFlight {
                        record_id: record_id.to_string(),
                        field: field.to_string(),
                        state: slot.state.name().to_string(),
                    })
                }
            }
        }
        slots.insert(key.clone(), Slot::default());
        drop(slots);
        Ok(SlotGuard::new(&self.slots, key))
    }

    /// Propose setting `request.field` to `request.value`.
    ///
    /// Returns `Blocked` (field untouched), `Applied`, or
    /// `AppliedPendingDecision` when automations matched; in the last case
    /// the pair stays claimed until `resolve_decision`.
    pub async fn propose(&self, request: TransitionRequest) -> Result<TransitionResult> {
        let span = obs::transition_span(&request.record_id, &request.field);
        self.run_proposal(request).instrument(span).await
    }

    async fn run_proposal(&self, request: TransitionRequest) -> Result<TransitionResult> {
        let TransitionRequest {
            record_id,
            field,
            value,
            actor,
            bypass,
        } = request;
        METRICS.inc_proposed();
        obs::emit_transition_proposed(&record_id, &field, &value, &actor, bypass);

        if bypass && actor.trim().is_empty() {
            return Err(CoordinatorError::UnattributedBypass);
        }

        let guard = self.claim(&record_id, &field)?;
        let field_label = self.registry.field_label(&field);

        let snapshot = self.records.snapshot(&record_id).await.map_err(|source| {
            CoordinatorError::SnapshotRead {
                record_id: record_id.to_string(),
                source,
            }
        })?;
        let transition =
            FieldTransition::new(&field, &value).with_from(snapshot.field(&field).map(String::from));
        guard.advance(TransitionEvent::Propose {
            transition: transition.clone(),
        })?;

        let rule = self.registry.rule_for(&transition);
        let mut warnings = Vec::new();
        let mut bypassed_rule = None;

        match rule {
            Some(rule) if bypass && rule.is_bypassable() => {
                let rule_key = rule.key().to_string();
                METRICS.inc_bypassed();
                obs::emit_bypass_used(&record_id, &rule_key, &actor);
                bypassed_rule = Some(rule_key);
            }
            _ => {
                if let Some(rule) = rule.filter(|_| bypass) {
                    let rule_key = rule.key().to_string();
                    obs::emit_bypass_ignored(&record_id, &rule_key);
                    warnings.push(EngineWarning::BypassIgnored { rule_key });
                }

                let ValidationOutcome {
                    is_valid,
                    rule: violated,
                    reason,
                    warnings: check_warnings,
                } = self.validator.validate(rule, &snapshot).await;
                warnings.extend(check_warnings);

                if let (false, Some(rule)) = (is_valid, violated) {
                    let reason = reason.unwrap_or_else(|| rule.message().to_string());
                    let rule_key = rule.key().to_string();
                    guard.advance(TransitionEvent::RuleFailed {
                        rule_key: rule_key.clone(),
                        reason: reason.clone(),
                    })?;
                    METRICS.inc_blocked();
                    obs::emit_transition_blocked(&record_id, &rule_key, &reason);
                    return Ok(TransitionResult::Blocked {
                        rule,
                        field_label,
                        attempted_value: value,
                        reason,
                        warnings,
                    });
                }
            }
        }

        if guard.cancel_requested() {
            guard.advance(TransitionEvent::Cancel)?;
            return Ok(TransitionResult::Cancelled {
                field_label,
                attempted_value: value,
            });
        }

        guard.advance(match &bypassed_rule {
            Some(rule_key) => TransitionEvent::Bypassed {
                rule_key: rule_key.clone(),
            },
            None => TransitionEvent::RulePassed,
        })?;

        let write = FieldWrite {
            field: field.clone(),
            value: value.clone(),
            actor,
            bypassed_rule,
        };
        let change = match self.records.write_field(&record_id, write).await {
            Ok(change) => change,
            Err(source) => {
                obs::emit_transition_write_failed(&record_id, &field, &source);
                guard.advance(TransitionEvent::WriteFailed {
                    error: source.to_string(),
                })?;
                return Err(CoordinatorError::PersistenceWrite {
                    record_id: record_id.to_string(),
                    field,
                    source,
                });
            }
        };
        METRICS.inc_applied();
        obs::emit_transition_applied(&change);

        let automations = match self.matcher.matches(&field, &value).await {
            Ok(automations) => automations,
            Err(err) => {
                obs::emit_automation_lookup_failed(&record_id, &err);
                warnings.push(EngineWarning::AutomationLookupFailed {
                    error: err.to_string(),
                });
                Vec::new()
            }
        };
        obs::emit_automations_matched(&record_id, &field, &value, automations.len());

        guard.advance(TransitionEvent::Committed {
            change_id: change.change_id.clone(),
            automation_ids: automations.iter().map(|a| a.id.clone()).collect(),
        })?;

        if automations.is_empty() {
            return Ok(TransitionResult::Applied {
                change,
                field_label,
                warnings,
            });
        }

        let expires_at = Utc::now()
            .checked_add_signed(self.decision_ttl)
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        guard.advance(TransitionEvent::DecisionRequested { expires_at })?;
        guard.hold(PendingDecision {
            change: change.clone(),
            automations: automations.clone(),
        });

        Ok(TransitionResult::AppliedPendingDecision {
            change,
            automations,
            field_label,
            attempted_value: value,
            expires_at,
            warnings,
        })
    }

    /// Resolve a pending decision. The field change is already committed;
    /// `SendAndApply` queues the matched automations, `ApplyOnly` does not.
    pub async fn resolve_decision(
        &self,
        record_id: &RecordId,
        field: &str,
        decision: Decision,
    ) -> Result<DispatchResult> {
        let span = obs::transition_span(record_id, field);
        self.run_resolution(record_id, field, decision)
            .instrument(span)
            .await
    }

    async fn run_resolution(
        &self,
        record_id: &RecordId,
        field: &str,
        decision: Decision,
    ) -> Result<DispatchResult> {
        let key = (record_id.clone(), field.to_string());
        let no_pending = || CoordinatorError::NoPendingDecision {
            record_id: record_id.to_string(),
            field: field.to_string(),
        };

        let pending = {
            let mut slots = lock(&self.slots);
            let slot = slots.get_mut(&key).ok_or_else(no_pending)?;
            let TransitionState::AwaitingDecision { expires_at, .. } = slot.state else {
                return Err(no_pending());
            };
            if Utc::now() >= expires_at {
                if let Some(slot) = slots.remove(&key) {
                    let settled = slot.settle_expired()?;
                    debug!(to = settled.name(), "expired decision settled");
                }
                obs::emit_decision_expired(record_id, field, expires_at);
                return Err(CoordinatorError::DecisionExpired {
                    record_id: record_id.to_string(),
                    field: field.to_string(),
                    expired_at: expires_at,
                });
            }
            // Leaving `AwaitingDecision` under the lock keeps the pair out of
            // reach of expiry while the dispatch below is awaited.
            let resolving = slot.state.clone().on(TransitionEvent::Decide { decision })?;
            let pending = slot.pending.take().ok_or_else(no_pending)?;
            slot.state = resolving;
            pending
        };
        let guard = SlotGuard::new(&self.slots, key);

        let report = match decision {
            Decision::SendAndApply => {
                self.dispatcher
                    .dispatch(&pending.change, &pending.automations)
                    .await
            }
            Decision::ApplyOnly => DispatchReport::default(),
        };

        guard.advance(TransitionEvent::Resolved {
            queued: report.entries.len(),
        })?;
        obs::emit_decision_resolved(record_id, field, decision, report.entries.len());

        Ok(DispatchResult {
            decision,
            change: pending.change,
            report,
        })
    }

    /// Cancel the attempt on the pair.
    ///
    /// Only meaningful before the field write: once the write has started or
    /// committed this reports `CancelNotSupported`.
    pub fn cancel(&self, record_id: &RecordId, field: &str) -> Result<CancelOutcome> {
        let mut slots = lock(&self.slots);
        let Some(slot) = slots.get_mut(&(record_id.clone(), field.to_string())) else {
            return Ok(CancelOutcome::NothingInFlight);
        };
        if slot.state.is_committed() || matches!(slot.state, TransitionState::Applying { .. }) {
            return Err(CoordinatorError::CancelNotSupported {
                record_id: record_id.to_string(),
                field: field.to_string(),
            });
        }
        slot.cancel_requested = true;
        Ok(CancelOutcome::Requested)
    }
}
