//! Process-wide execution counters.
//!
//! Counters are bumped silently at the call site. [`Metrics::flush`] emits
//! the current values as one `tracing::info!` event. Programs never see them.

use std::sync::atomic::{AtomicU64, Ordering};

/// Global metrics singleton.
pub static METRICS: Metrics = Metrics::new();

pub struct Metrics {
    executions_started: AtomicU64,
    executions_succeeded: AtomicU64,
    executions_rejected: AtomicU64,
    timeouts: AtomicU64,
    contract_violations: AtomicU64,
    serialization_fallbacks: AtomicU64,
    capability_calls: AtomicU64,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub const fn new() -> Self {
        Self {
            executions_started: AtomicU64::new(0),
            executions_succeeded: AtomicU64::new(0),
            executions_rejected: AtomicU64::new(0),
            timeouts: AtomicU64::new(0),
            contract_violations: AtomicU64::new(0),
            serialization_fallbacks: AtomicU64::new(0),
            capability_calls: AtomicU64::new(0),
        }
    }

    pub fn inc_started(&self) {
        self.executions_started.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "executions_started", "counter incremented");
    }

    pub fn inc_succeeded(&self) {
        self.executions_succeeded.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "executions_succeeded", "counter incremented");
    }

    /// A program rejected at any stage, including the contract check.
    pub fn inc_rejected(&self) {
        self.executions_rejected.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "executions_rejected", "counter incremented");
    }

    pub fn inc_timeouts(&self) {
        self.timeouts.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "timeouts", "counter incremented");
    }

    pub fn inc_contract_violations(&self) {
        self.contract_violations.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "contract_violations", "counter incremented");
    }

    pub fn inc_serialization_fallbacks(&self) {
        self.serialization_fallbacks.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "serialization_fallbacks", "counter incremented");
    }

    pub fn inc_capability_calls(&self) {
        self.capability_calls.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "capability_calls", "counter incremented");
    }

    /// Emit all current counter values as a single `info!` event.
    pub fn flush(&self) {
        tracing::info!(
            metric = "flush",
            executions_started = self.executions_started(),
            executions_succeeded = self.executions_succeeded(),
            executions_rejected = self.executions_rejected(),
            timeouts = self.timeouts(),
            contract_violations = self.contract_violations(),
            serialization_fallbacks = self.serialization_fallbacks(),
            capability_calls = self.capability_calls(),
        );
    }

    pub fn executions_started(&self) -> u64 {
        self.executions_started.load(Ordering::Relaxed)
    }

    pub fn executions_succeeded(&self) -> u64 {
        self.executions_succeeded.load(Ordering::Relaxed)
    }

    pub fn executions_rejected(&self) -> u64 {
        self.executions_rejected.load(Ordering::Relaxed)
    }

    pub fn timeouts(&self) -> u64 {
        self.timeouts.load(Ordering::Relaxed)
    }

    pub fn contract_violations(&self) -> u64 {
        self.contract_violations.load(Ordering::Relaxed)
    }

    pub fn serialization_fallbacks(&self) -> u64 {
        self.serialization_fallbacks.load(Ordering::Relaxed)
    }

    pub fn capability_calls(&self) -> u64 {
        self.capability_calls.load(Ordering::Relaxed)
    }

    /// Reset all counters to zero (useful in tests).
    pub fn reset(&self) {
        for counter in [
            &self.executions_started,
            &self.executions_succeeded,
            &self.executions_rejected,
            &self.timeouts,
            &self.contract_violations,
            &self.serialization_fallbacks,
            &self.capability_calls,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_increment() {
        let m = Metrics::new();
        assert_eq!(m.executions_started(), 0);
        m.inc_started();
        m.inc_started();
        assert_eq!(m.executions_started(), 2);

        m.inc_timeouts();
        m.inc_rejected();
        assert_eq!(m.timeouts(), 1);
        assert_eq!(m.executions_rejected(), 1);

        m.inc_capability_calls();
        m.inc_capability_calls();
        m.inc_capability_calls();
        assert_eq!(m.capability_calls(), 3);
    }

    #[test]
    fn reset_zeroes_all() {
        let m = Metrics::new();
        m.inc_started();
        m.inc_succeeded();
        m.inc_contract_violations();
        m.inc_serialization_fallbacks();
        m.reset();
        assert_eq!(m.executions_started(), 0);
        assert_eq!(m.executions_succeeded(), 0);
        assert_eq!(m.contract_violations(), 0);
        assert_eq!(m.serialization_fallbacks(), 0);
    }
}
