//! Time utilities and timing defaults.

/// Engine timing defaults.
pub mod constants {
    use std::time::Duration;

    /// Pause between two poll cycles.
    pub fn poll_interval() -> Duration {
        Duration::from_secs(1)
    }

    /// Deadline for a single call to the accrual authority.
    pub fn accrual_call_timeout() -> Duration {
        Duration::from_secs(5)
    }

    /// Backoff applied when a rate-limit reply carries no usable `Retry-After`.
    pub fn default_retry_after() -> Duration {
        Duration::from_secs(60)
    }

    /// Time allowed for in-flight orders to finish on shutdown.
    pub fn drain_timeout() -> Duration {
        Duration::from_secs(30)
    }

    /// Number of poller workers (also the batch width of a cycle).
    pub const DEFAULT_POLLER_WORKERS: usize = 10;
}

/// Parse a `Retry-After` header value given in whole seconds.
pub fn parse_retry_after(value: &str) -> Option<std::time::Duration> {
    value
        .trim()
        .parse::<u64>()
        .ok()
        .map(std::time::Duration::from_secs)
}
