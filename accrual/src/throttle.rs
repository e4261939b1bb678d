//! Shared rate gate for calls to the accrual authority.

use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;
use tracing::{debug, info};

/// A gate every worker passes before calling the authority.
///
/// When the authority rate-limits us, [`RateGate::suspend`] closes the gate
/// for the requested interval and every worker waits it out, so no further
/// requests go out until it reopens.
#[derive(Debug, Default)]
pub struct RateGate {
    reopens_at: Mutex<Option<Instant>>,
}

impl RateGate {
    /// Create an open gate.
    pub fn new() -> Self {
        Self::default()
    }

    /// Close the gate for `interval`. Never shortens an existing suspension.
    pub fn suspend(&self, interval: Duration) {
        let until = Instant::now() + interval;
        let mut reopens_at = self.reopens_at.lock();
        match *reopens_at {
            Some(current) if current >= until => {}
            _ => {
                info!(interval_ms = interval.as_millis() as u64, "Accrual calls suspended");
                *reopens_at = Some(until);
            }
        }
    }

    /// Time left until the gate reopens, or `None` if it is open.
    pub fn remaining(&self) -> Option<Duration> {
        let mut reopens_at = self.reopens_at.lock();
        let until = (*reopens_at)?;
        let now = Instant::now();
        if until <= now {
            *reopens_at = None;
            None
        } else {
            Some(until - now)
        }
    }

    /// Check if calls are currently allowed.
    pub fn is_open(&self) -> bool {
        self.remaining().is_none()
    }

    /// Wait until the gate is open.
    ///
    /// Re-checks after each sleep because another worker may have extended
    /// the suspension meanwhile.
    pub async fn wait(&self) {
        while let Some(remaining) = self.remaining() {
            debug!(remaining_ms = remaining.as_millis() as u64, "Waiting on rate gate");
            tokio::time::sleep(remaining).await;
        }
    }
}
