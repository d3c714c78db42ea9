//! Global atomic counters for transition engine observability.
//!
//! Counters are incremented silently at the call site. Call
//! [`Metrics::flush`] to emit current values as a single
//! `tracing::info!` event (e.g. before a CLI invocation exits).

use std::sync::atomic::{AtomicU64, Ordering};

/// Global metrics singleton.
pub static METRICS: Metrics = Metrics::new();

/// Process-wide transition counters, updated with relaxed atomics.
pub struct Metrics {
    transitions_proposed: AtomicU64,
    transitions_applied: AtomicU64,
    transitions_blocked: AtomicU64,
    bypasses_used: AtomicU64,
    checks_failed_open: AtomicU64,
    queue_entries_created: AtomicU64,
    queue_insert_failures: AtomicU64,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

macro_rules! counter {
    ($inc:ident, $get:ident, $field:ident) => {
        pub fn $inc(&self) {
            self.$field.fetch_add(1, Ordering::Relaxed);
            tracing::trace!(metric = stringify!($field), "counter incremented");
        }

        pub fn $get(&self) -> u64 {
            self.$field.load(Ordering::Relaxed)
        }
    };
}

impl Metrics {
    pub const fn new() -> Self {
        Self {
            transitions_proposed: AtomicU64::new(0),
            transitions_applied: AtomicU64::new(0),
            transitions_blocked: AtomicU64::new(0),
            bypasses_used: AtomicU64::new(0),
            checks_failed_open: AtomicU64::new(0),
            queue_entries_created: AtomicU64::new(0),
            queue_insert_failures: AtomicU64::new(0),
        }
    }

    counter!(inc_proposed, transitions_proposed, transitions_proposed);
    counter!(inc_applied, transitions_applied, transitions_applied);
    counter!(inc_blocked, transitions_blocked, transitions_blocked);
    counter!(inc_bypassed, bypasses_used, bypasses_used);
    counter!(inc_checks_failed_open, checks_failed_open, checks_failed_open);
    counter!(inc_queue_created, queue_entries_created, queue_entries_created);
    counter!(inc_queue_failures, queue_insert_failures, queue_insert_failures);

    /// Emit all current counter values as a single `info!` event.
    pub fn flush(&self) {
        tracing::info!(
            metric = "flush",
            transitions_proposed = self.transitions_proposed(),
            transitions_applied = self.transitions_applied(),
            transitions_blocked = self.transitions_blocked(),
            bypasses_used = self.bypasses_used(),
            checks_failed_open = self.checks_failed_open(),
            queue_entries_created = self.queue_entries_created(),
            queue_insert_failures = self.queue_insert_failures(),
        );
    }

    /// Reset all counters to zero (useful in tests).
    pub fn reset(&self) {
        for counter in [
            &self.transitions_proposed,
            &self.transitions_applied,
            &self.transitions_blocked,
            &self.bypasses_used,
            &self.checks_failed_open,
            &self.queue_entries_created,
            &self.queue_insert_failures,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }
}
