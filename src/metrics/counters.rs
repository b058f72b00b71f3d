use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Process-wide operational counters, cheap to clone and share across the
/// tick loop and (if wired) an HTTP status endpoint. Shape follows the
/// teacher's scheduler `Counters`: one atomic per thing worth alerting on,
/// no histograms or label cardinality.
#[derive(Clone, Default)]
pub struct Counters {
    /// Ticks completed.
    pub ticks: Arc<AtomicU64>,
    /// Tokens dispatched into `run_single_token` across all ticks.
    pub tokens_dispatched: Arc<AtomicU64>,
    /// Lease acquisition attempts that lost the race.
    pub lease_contended: Arc<AtomicU64>,

    /// Cycles that resulted in a submitted transaction.
    pub submits_ok: Arc<AtomicU64>,
    /// Submits that exhausted their retry budget.
    pub submits_failed: Arc<AtomicU64>,
    /// Submits skipped because shadow mode withheld the transaction.
    pub submits_shadow_skipped: Arc<AtomicU64>,

    /// Cycles blocked by guardrails or the brain itself.
    pub blocked_total: Arc<AtomicU64>,
    /// Tokens auto-paused after exceeding the consecutive-blocked threshold.
    pub auto_paused: Arc<AtomicU64>,
    /// Tokens permanently disabled after an invalid-token-id error.
    pub auto_disabled: Arc<AtomicU64>,

    /// Uncaught per-token cycle errors, by classification.
    pub errors_infra: Arc<AtomicU64>,
    pub errors_business_rejected: Arc<AtomicU64>,

    /// Consecutive tick-wide failures that tripped the 60s global backoff.
    pub tick_backoffs: Arc<AtomicU64>,
}

impl Counters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inc(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> CountersSnapshot {
        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);
        CountersSnapshot {
            ticks: load(&self.ticks),
            tokens_dispatched: load(&self.tokens_dispatched),
            lease_contended: load(&self.lease_contended),
            submits_ok: load(&self.submits_ok),
            submits_failed: load(&self.submits_failed),
            submits_shadow_skipped: load(&self.submits_shadow_skipped),
            blocked_total: load(&self.blocked_total),
            auto_paused: load(&self.auto_paused),
            auto_disabled: load(&self.auto_disabled),
            errors_infra: load(&self.errors_infra),
            errors_business_rejected: load(&self.errors_business_rejected),
            tick_backoffs: load(&self.tick_backoffs),
        }
    }
}

/// Plain-data copy of [`Counters`], for logging or serving over a status
/// endpoint without exposing the atomics themselves.
#[derive(Clone, Debug, Default, serde::Serialize)]
pub struct CountersSnapshot {
    pub ticks: u64,
    pub tokens_dispatched: u64,
    pub lease_contended: u64,
    pub submits_ok: u64,
    pub submits_failed: u64,
    pub submits_shadow_skipped: u64,
    pub blocked_total: u64,
    pub auto_paused: u64,
    pub auto_disabled: u64,
    pub errors_infra: u64,
    pub errors_business_rejected: u64,
    pub tick_backoffs: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_reflects_increments() {
        let counters = Counters::new();
        Counters::inc(&counters.submits_ok);
        Counters::inc(&counters.submits_ok);
        Counters::inc(&counters.blocked_total);

        let snap = counters.snapshot();
        assert_eq!(snap.submits_ok, 2);
        assert_eq!(snap.blocked_total, 1);
        assert_eq!(snap.submits_failed, 0);
    }
}
