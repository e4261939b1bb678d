//! Simulation metrics.

use std::collections::VecDeque;

/// Simulation metrics.
#[derive(Debug, Clone)]
pub struct SimulationMetrics {
    /// Total user requests issued.
    pub total_operations: u64,
    /// Requests that changed the ledger.
    pub successful_operations: u64,
    /// Requests the engine refused.
    pub rejected_operations: u64,
    /// Scenario assertions that held.
    pub assertions_passed: u64,
    /// Wall time of a continuous run.
    pub elapsed_secs: u64,
    /// Latency samples (ms).
    latency_samples: VecDeque<u64>,
    /// Maximum samples to keep.
    max_samples: usize,
}

impl SimulationMetrics {
    /// Create new metrics.
    pub fn new() -> Self {
        Self {
            total_operations: 0,
            successful_operations: 0,
            rejected_operations: 0,
            assertions_passed: 0,
            elapsed_secs: 0,
            latency_samples: VecDeque::with_capacity(10000),
            max_samples: 10000,
        }
    }

    fn sample(&mut self, latency_ms: u64) {
        if self.latency_samples.len() >= self.max_samples {
            self.latency_samples.pop_front();
        }
        self.latency_samples.push_back(latency_ms);
    }

    /// Record a request that changed the ledger.
    pub fn record_success(&mut self, latency_ms: u64) {
        self.total_operations += 1;
        self.successful_operations += 1;
        self.sample(latency_ms);
    }

    /// Record a refused request.
    pub fn record_rejection(&mut self, latency_ms: u64) {
        self.total_operations += 1;
        self.rejected_operations += 1;
        self.sample(latency_ms);
    }

    /// Record a passed assertion.
    pub fn record_assertion(&mut self) {
        self.assertions_passed += 1;
    }

    /// Get average latency in ms.
    pub fn average_latency_ms(&self) -> u64 {
        if self.latency_samples.is_empty() {
            return 0;
        }

        let sum: u64 = self.latency_samples.iter().sum();
        sum / self.latency_samples.len() as u64
    }

    /// Get p50 latency.
    pub fn p50_latency_ms(&self) -> u64 {
        self.percentile_latency(50)
    }

    /// Get p99 latency.
    pub fn p99_latency_ms(&self) -> u64 {
        self.percentile_latency(99)
    }

    fn percentile_latency(&self, percentile: usize) -> u64 {
        if self.latency_samples.is_empty() {
            return 0;
        }

        let mut sorted: Vec<_> = self.latency_samples.iter().copied().collect();
        sorted.sort_unstable();

        let idx = (sorted.len() * percentile / 100).min(sorted.len() - 1);
        sorted[idx]
    }

    /// Share of requests that changed the ledger.
    pub fn success_rate(&self) -> f64 {
        if self.total_operations == 0 {
            return 0.0;
        }

        self.successful_operations as f64 / self.total_operations as f64
    }

    /// Requests per second over the continuous run.
    pub fn throughput(&self) -> f64 {
        if self.elapsed_secs == 0 {
            return 0.0;
        }

        self.total_operations as f64 / self.elapsed_secs as f64
    }
}

impl Default for SimulationMetrics {
    fn default() -> Self {
        Self::new()
    }
}
