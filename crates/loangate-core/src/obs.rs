//! Structured observability hooks for transition lifecycle events.
//!
//! This module provides:
//! - Transition-scoped tracing spans via [`transition_span`]
//! - Emission functions for lifecycle events: proposal, block, bypass,
//!   commit, automation matching, queueing, and decisions
//!
//! Events are emitted at `info!` level, failures at `warn!`.
//! For JSON output, pass `json = true` to [`crate::telemetry::init_tracing`].

use chrono::{DateTime, Utc};
use tracing::{info, info_span, warn, Span};

use loangate_state::{AutomationQueueEntry, FieldChange, RecordId};

use crate::domain::{AsyncCheck, Decision};

/// Transition-scoped span for one coordinator call.
///
/// Attach it with `tracing::Instrument` so every event emitted while the
/// call runs carries `record_id` and `field`, across await points.
pub fn transition_span(record_id: &RecordId, field: &str) -> Span {
    info_span!("loangate.transition", record_id = %record_id, field = %field)
}

pub fn emit_transition_proposed(
    record_id: &RecordId,
    field: &str,
    value: &str,
    actor: &str,
    bypass: bool,
) {
    info!(
        event = "transition.proposed",
        record_id = %record_id,
        field = %field,
        value = %value,
        actor = %actor,
        bypass = bypass,
    );
}

pub fn emit_transition_blocked(record_id: &RecordId, rule_key: &str, reason: &str) {
    info!(
        event = "transition.blocked",
        record_id = %record_id,
        rule = %rule_key,
        reason = %reason,
    );
}

/// Emit event: field write committed.
pub fn emit_transition_applied(change: &FieldChange) {
    info!(
        event = "transition.applied",
        record_id = %change.record_id,
        field = %change.field,
        old_value = ?change.old_value,
        new_value = %change.new_value,
        actor = %change.actor,
        change_id = %change.change_id,
    );
}

/// Emit event: field write failed. The matcher is not consulted after this.
pub fn emit_transition_write_failed(
    record_id: &RecordId,
    field: &str,
    error: &dyn std::fmt::Display,
) {
    warn!(event = "transition.write_failed", record_id = %record_id, field = %field, error = %error);
}

/// Emit event: a bypassable rule was overridden by `actor`.
pub fn emit_bypass_used(record_id: &RecordId, rule_key: &str, actor: &str) {
    warn!(event = "bypass.used", record_id = %record_id, rule = %rule_key, actor = %actor);
}

pub fn emit_bypass_ignored(record_id: &RecordId, rule_key: &str) {
    warn!(event = "bypass.ignored", record_id = %record_id, rule = %rule_key);
}

/// Emit event: an async check could not run and the transition was permitted.
pub fn emit_check_failed_open(
    record_id: &RecordId,
    rule_key: &str,
    check: &AsyncCheck,
    error: &dyn std::fmt::Display,
) {
    warn!(
        event = "check.failed_open",
        record_id = %record_id,
        rule = %rule_key,
        check = %check,
        error = %error,
    );
}

pub fn emit_automations_matched(record_id: &RecordId, field: &str, value: &str, count: usize) {
    info!(
        event = "automation.matched",
        record_id = %record_id,
        field = %field,
        value = %value,
        count = count,
    );
}

pub fn emit_automation_lookup_failed(record_id: &RecordId, error: &dyn std::fmt::Display) {
    warn!(event = "automation.lookup_failed", record_id = %record_id, error = %error);
}

pub fn emit_queue_entry_created(entry: &AutomationQueueEntry, inserted: bool) {
    info!(
        event = "queue.entry_created",
        record_id = %entry.record_id,
        automation_id = %entry.automation_id,
        entry_id = %entry.id,
        inserted = inserted,
    );
}

pub fn emit_queue_insert_failed(
    record_id: &RecordId,
    automation_id: &str,
    error: &dyn std::fmt::Display,
) {
    warn!(
        event = "queue.insert_failed",
        record_id = %record_id,
        automation_id = %automation_id,
        error = %error,
    );
}

pub fn emit_decision_resolved(record_id: &RecordId, field: &str, decision: Decision, queued: usize) {
    info!(
        event = "decision.resolved",
        record_id = %record_id,
        field = %field,
        decision = %decision,
        queued = queued,
    );
}

/// Emit event: an unanswered decision expired and was settled as apply-only.
pub fn emit_decision_expired(record_id: &RecordId, field: &str, expired_at: DateTime<Utc>) {
    warn!(
        event = "decision.expired",
        record_id = %record_id,
        field = %field,
        expired_at = %expired_at,
    );
}
