//! Process-wide outbound request gate
//!
//! Every request to the registry reserves a slot here first. Slots are spaced
//! exactly one interval apart, handed out in arrival order, and never burst:
//! a gate that has been idle does not accumulate credit.

use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

/// Cap applied to any backoff pushed into the gate
const MAX_PENALTY: Duration = Duration::from_secs(600);

/// Fixed-rate gate shared by all network workers
#[derive(Debug)]
pub struct RateLimiter {
    /// Spacing between consecutive slots
    interval: Duration,
    /// Earliest instant the next caller may proceed.
    /// The tokio mutex queues waiters in FIFO order.
    next_slot: Mutex<Instant>,
}

impl RateLimiter {
    /// Create a gate allowing `requests_per_second` requests per second
    pub fn new(requests_per_second: u32) -> Self {
        let rps = requests_per_second.max(1);
        Self::with_interval(Duration::from_secs(1) / rps)
    }

    /// Create a gate with an explicit spacing between requests
    pub fn with_interval(interval: Duration) -> Self {
        Self {
            interval,
            next_slot: Mutex::new(Instant::now()),
        }
    }

    /// Spacing between consecutive requests
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Wait until the caller may issue one request
    pub async fn acquire(&self) {
        let slot = {
            let mut next = self.next_slot.lock().await;
            let slot = (*next).max(Instant::now());
            *next = slot + self.interval;
            slot
        };
        tokio::time::sleep_until(slot).await;
    }

    /// Hold back every caller for `backoff` after the registry signalled overload
    pub async fn penalize(&self, backoff: Duration) {
        let until = Instant::now() + backoff.min(MAX_PENALTY);
        let mut next = self.next_slot.lock().await;
        if *next < until {
            tracing::warn!("Registry asked us to slow down, pausing requests for {:?}", backoff.min(MAX_PENALTY));
            *next = until;
        }
    }
}

/// Backoff after the `consecutive`-th overload response: 30s, 60s, 120s, 240s
pub fn overload_backoff(consecutive: u32, retry_after: Option<Duration>) -> Duration {
    retry_after
        .unwrap_or_else(|| Duration::from_secs(30 * 2u64.pow(consecutive.clamp(1, 4) - 1)))
        .min(MAX_PENALTY)
}
