//! Accrual provider trait and test double.

use async_trait::async_trait;

use loyalty_common::OrderNumber;

use crate::error::AccrualResult;
use crate::report::AccrualReport;

/// Source of accrual reports for orders.
#[async_trait]
pub trait AccrualProvider: Send + Sync {
    /// Get the provider name.
    fn name(&self) -> &str;

    /// Ask the authority about one order.
    async fn fetch(&self, number: &OrderNumber) -> AccrualResult<AccrualReport>;
}

#[cfg(any(test, feature = "test-utils"))]
pub use mock::MockAccrualProvider;

#[cfg(any(test, feature = "test-utils"))]
mod mock {
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;
    use dashmap::DashMap;
    use parking_lot::Mutex;
    use tokio::time::Instant;

    use loyalty_common::OrderNumber;

    use super::AccrualProvider;
    use crate::error::{AccrualError, AccrualResult};
    use crate::report::AccrualReport;

    /// Scripted accrual provider.
    ///
    /// Each number has a standing reply plus an optional queue of one-shot
    /// replies that are served first. Unknown numbers answer `NotRegistered`.
    #[derive(Default)]
    pub struct MockAccrualProvider {
        replies: DashMap<String, AccrualResult<AccrualReport>>,
        queued: DashMap<String, VecDeque<AccrualResult<AccrualReport>>>,
        delay: Mutex<Option<Duration>>,
        calls: AtomicUsize,
        call_log: Mutex<Vec<(String, Instant)>>,
    }

    impl MockAccrualProvider {
        /// Create a provider that knows no orders.
        pub fn new() -> Self {
            Self::default()
        }

        /// Set the standing reply for a number.
        pub fn set_reply(&self, number: &str, reply: AccrualResult<AccrualReport>) {
            self.replies.insert(number.to_string(), reply);
        }

        /// Queue a reply served once before the standing reply.
        pub fn push_reply(&self, number: &str, reply: AccrualResult<AccrualReport>) {
            self.queued
                .entry(number.to_string())
                .or_default()
                .push_back(reply);
        }

        /// Delay every reply by `delay`.
        pub fn set_delay(&self, delay: Option<Duration>) {
            *self.delay.lock() = delay;
        }

        /// Number of calls served so far.
        pub fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }

        /// Number of calls served for one order.
        pub fn calls_for(&self, number: &str) -> usize {
            self.call_log.lock().iter().filter(|(n, _)| n == number).count()
        }

        /// When each call arrived, in arrival order.
        pub fn call_times(&self) -> Vec<Instant> {
            self.call_log.lock().iter().map(|(_, at)| *at).collect()
        }
    }

    #[async_trait]
    impl AccrualProvider for MockAccrualProvider {
        fn name(&self) -> &str {
            "MOCK"
        }

        async fn fetch(&self, number: &OrderNumber) -> AccrualResult<AccrualReport> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.call_log
                .lock()
                .push((number.to_string(), Instant::now()));

            let delay = *self.delay.lock();
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }

            let queued = self
                .queued
                .get_mut(number.as_str())
                .and_then(|mut q| q.pop_front());
            if let Some(reply) = queued {
                return reply;
            }

            self.replies
                .get(number.as_str())
                .map(|r| r.clone())
                .unwrap_or_else(|| Err(AccrualError::NotRegistered(number.to_string())))
        }
    }
}
