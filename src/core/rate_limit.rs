//! Minimum-interval rate limiter shared by every worker of a run. Keeps the
//! engine inside the target environment's request budget; concurrency-mode
//! members still pass through it one at a time before release.

use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

#[derive(Clone)]
pub struct RateLimiter {
    interval: Duration,
    next_slot: Arc<Mutex<Instant>>,
}

impl RateLimiter {
    /// `rate` is requests per second; 0 disables limiting.
    pub fn per_second(rate: u32) -> Self {
        let interval = if rate == 0 {
            Duration::ZERO
        } else {
            Duration::from_secs_f64(1.0 / f64::from(rate))
        };
        Self {
            interval,
            next_slot: Arc::new(Mutex::new(Instant::now())),
        }
    }

    pub fn unlimited() -> Self {
        Self::per_second(0)
    }

    /// Wait until a request slot is available, then claim it.
    pub async fn acquire(&self) {
        if self.interval.is_zero() {
            return;
        }

        let wait_until = {
            let mut slot = self.next_slot.lock().await;
            let now = Instant::now();
            let at = if *slot > now { *slot } else { now };
            *slot = at + self.interval;
            at
        };

        let now = Instant::now();
        if wait_until > now {
            tokio::time::sleep(wait_until - now).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unlimited_never_sleeps() {
        let limiter = RateLimiter::unlimited();
        let start = Instant::now();
        for _ in 0..100 {
            limiter.acquire().await;
        }
        assert!(start.elapsed() < Duration::from_millis(50));
    }

    #[tokio::test]
    async fn limited_spaces_requests() {
        let limiter = RateLimiter::per_second(100);
        let start = Instant::now();
        for _ in 0..5 {
            limiter.acquire().await;
        }
        // 5 slots at 10ms spacing: the last one lands at >= 40ms.
        assert!(start.elapsed() >= Duration::from_millis(35));
    }
}
