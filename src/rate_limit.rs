use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use tracing::trace;

use crate::util::lock_unpoisoned;

/// Sliding-window admission throttle: at most `max_requests` admissions per
/// trailing `window`. Concurrent callers are admitted in FIFO order; the
/// async gate mutex hands the lock to waiters in queue order, so whoever
/// started waiting first records its admission first.
#[derive(Debug)]
pub(crate) struct RateLimiter {
    max_requests: usize,
    window: Duration,
    gate: tokio::sync::Mutex<()>,
    admitted: Mutex<VecDeque<Instant>>,
}

impl RateLimiter {
    pub(crate) fn new(max_requests: usize, window: Duration) -> Self {
        Self {
            max_requests: max_requests.max(1),
            window: window.max(Duration::from_millis(1)),
            gate: tokio::sync::Mutex::new(()),
            admitted: Mutex::new(VecDeque::new()),
        }
    }

    /// Suspends until the window has room, then records the admission.
    pub(crate) async fn acquire(&self) {
        let _gate = self.gate.lock().await;
        loop {
            let wait = {
                let mut admitted = lock_unpoisoned(&self.admitted);
                let now = Instant::now();
                while let Some(oldest) = admitted.front()
                    && now.duration_since(*oldest) >= self.window
                {
                    admitted.pop_front();
                }
                if admitted.len() < self.max_requests {
                    admitted.push_back(now);
                    return;
                }
                match admitted.front() {
                    Some(oldest) => self.window.saturating_sub(now.duration_since(*oldest)),
                    None => Duration::ZERO,
                }
            };
            trace!(wait_ms = wait.as_millis() as u64, "rate limit window full");
            tokio::time::sleep(wait).await;
        }
    }

    /// Non-blocking variant used by tests and introspection.
    #[cfg(test)]
    fn would_admit(&self) -> bool {
        let mut admitted = lock_unpoisoned(&self.admitted);
        let now = Instant::now();
        while let Some(oldest) = admitted.front()
            && now.duration_since(*oldest) >= self.window
        {
            admitted.pop_front();
        }
        admitted.len() < self.max_requests
    }
}
