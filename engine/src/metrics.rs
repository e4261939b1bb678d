//! Metrics collection for engine monitoring.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::Serialize;

/// Engine metrics.
pub struct Metrics {
    /// Orders submitted for admission.
    pub orders_submitted: AtomicU64,
    /// Orders newly accepted.
    pub orders_accepted: AtomicU64,
    /// Submissions rejected for a bad number.
    pub orders_invalid: AtomicU64,
    /// Submissions of a number owned by another user.
    pub orders_conflicted: AtomicU64,
    /// Withdrawal requests.
    pub withdrawals_total: AtomicU64,
    /// Withdrawals recorded.
    pub withdrawals_success: AtomicU64,
    /// Withdrawals refused for insufficient funds.
    pub withdrawals_insufficient: AtomicU64,
    /// Withdrawals refused for a bad number, bad sum or reused number.
    pub withdrawals_rejected: AtomicU64,
    /// Completed poll cycles.
    pub poll_cycles: AtomicU64,
    /// Calls made to the accrual authority.
    pub accrual_calls: AtomicU64,
    /// Calls that failed or could not be applied.
    pub accrual_failures: AtomicU64,
    /// Rate-limit replies received.
    pub accrual_rate_limited: AtomicU64,
    /// Orders settled as processed.
    pub orders_processed: AtomicU64,
    /// Orders settled as invalid.
    pub orders_rejected: AtomicU64,
}

impl Metrics {
    /// Create new metrics instance.
    pub fn new() -> Self {
        Self {
            orders_submitted: AtomicU64::new(0),
            orders_accepted: AtomicU64::new(0),
            orders_invalid: AtomicU64::new(0),
            orders_conflicted: AtomicU64::new(0),
            withdrawals_total: AtomicU64::new(0),
            withdrawals_success: AtomicU64::new(0),
            withdrawals_insufficient: AtomicU64::new(0),
            withdrawals_rejected: AtomicU64::new(0),
            poll_cycles: AtomicU64::new(0),
            accrual_calls: AtomicU64::new(0),
            accrual_failures: AtomicU64::new(0),
            accrual_rate_limited: AtomicU64::new(0),
            orders_processed: AtomicU64::new(0),
            orders_rejected: AtomicU64::new(0),
        }
    }

    /// Record an order submission.
    pub fn order_submitted(&self) {
        self.orders_submitted.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a newly accepted order.
    pub fn order_accepted(&self) {
        self.orders_accepted.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a submission with a bad number.
    pub fn order_invalid(&self) {
        self.orders_invalid.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a submission of another user's order.
    pub fn order_conflicted(&self) {
        self.orders_conflicted.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a withdrawal request.
    pub fn withdrawal_requested(&self) {
        self.withdrawals_total.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a successful withdrawal.
    pub fn withdrawal_success(&self) {
        self.withdrawals_success.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a withdrawal refused for insufficient funds.
    pub fn withdrawal_insufficient(&self) {
        self.withdrawals_insufficient.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a rejected withdrawal.
    pub fn withdrawal_rejected(&self) {
        self.withdrawals_rejected.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a completed poll cycle.
    pub fn poll_cycle(&self) {
        self.poll_cycles.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a call to the accrual authority.
    pub fn accrual_call(&self) {
        self.accrual_calls.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a failed reconciliation.
    pub fn accrual_failure(&self) {
        self.accrual_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a rate-limit reply.
    pub fn accrual_rate_limited(&self) {
        self.accrual_rate_limited.fetch_add(1, Ordering::Relaxed);
    }

    /// Record an order settled as processed.
    pub fn order_processed(&self) {
        self.orders_processed.fetch_add(1, Ordering::Relaxed);
    }

    /// Record an order settled as invalid.
    pub fn order_rejected(&self) {
        self.orders_rejected.fetch_add(1, Ordering::Relaxed);
    }

    /// Get current metrics snapshot.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            orders_submitted: self.orders_submitted.load(Ordering::Relaxed),
            orders_accepted: self.orders_accepted.load(Ordering::Relaxed),
            orders_invalid: self.orders_invalid.load(Ordering::Relaxed),
            orders_conflicted: self.orders_conflicted.load(Ordering::Relaxed),
            withdrawals_total: self.withdrawals_total.load(Ordering::Relaxed),
            withdrawals_success: self.withdrawals_success.load(Ordering::Relaxed),
            withdrawals_insufficient: self.withdrawals_insufficient.load(Ordering::Relaxed),
            withdrawals_rejected: self.withdrawals_rejected.load(Ordering::Relaxed),
            poll_cycles: self.poll_cycles.load(Ordering::Relaxed),
            accrual_calls: self.accrual_calls.load(Ordering::Relaxed),
            accrual_failures: self.accrual_failures.load(Ordering::Relaxed),
            accrual_rate_limited: self.accrual_rate_limited.load(Ordering::Relaxed),
            orders_processed: self.orders_processed.load(Ordering::Relaxed),
            orders_rejected: self.orders_rejected.load(Ordering::Relaxed),
        }
    }

    /// Export metrics in Prometheus format.
    pub fn to_prometheus(&self) -> String {
        let s = self.snapshot();
        let counters = [
            ("orders_submitted", "Orders submitted for admission", s.orders_submitted),
            ("orders_accepted", "Orders newly accepted", s.orders_accepted),
            ("orders_invalid", "Submissions with an invalid number", s.orders_invalid),
            ("orders_conflicted", "Submissions of an order owned by another user", s.orders_conflicted),
            ("withdrawals_total", "Withdrawal requests", s.withdrawals_total),
            ("withdrawals_success", "Withdrawals recorded", s.withdrawals_success),
            ("withdrawals_insufficient", "Withdrawals refused for insufficient funds", s.withdrawals_insufficient),
            ("withdrawals_rejected", "Withdrawals rejected as invalid or duplicate", s.withdrawals_rejected),
            ("poll_cycles", "Completed accrual poll cycles", s.poll_cycles),
            ("accrual_calls", "Calls to the accrual authority", s.accrual_calls),
            ("accrual_failures", "Reconciliations that failed and will be retried", s.accrual_failures),
            ("accrual_rate_limited", "Rate-limit replies from the accrual authority", s.accrual_rate_limited),
            ("orders_processed", "Orders settled as processed", s.orders_processed),
            ("orders_rejected", "Orders settled as invalid", s.orders_rejected),
        ];

        let mut out = String::new();
        for (name, help, value) in counters {
            out.push_str(&format!(
                "# HELP loyalty_{name} {help}\n# TYPE loyalty_{name} counter\nloyalty_{name} {value}\n\n"
            ));
        }
        out
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot of metrics at a point in time.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub orders_submitted: u64,
    pub orders_accepted: u64,
    pub orders_invalid: u64,
    pub orders_conflicted: u64,
    pub withdrawals_total: u64,
    pub withdrawals_success: u64,
    pub withdrawals_insufficient: u64,
    pub withdrawals_rejected: u64,
    pub poll_cycles: u64,
    pub accrual_calls: u64,
    pub accrual_failures: u64,
    pub accrual_rate_limited: u64,
    pub orders_processed: u64,
    pub orders_rejected: u64,
}

/// Shared metrics instance.
pub type SharedMetrics = Arc<Metrics>;
