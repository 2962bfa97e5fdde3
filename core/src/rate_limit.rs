//! Token-bucket throttle for model calls.
//!
//! N queries per minute; an exhausted bucket blocks the caller until a token
//! is available. The core issues one model call at a time, so fairness under
//! contention is a non-issue, but the bucket is still safe to share.

use std::sync::Mutex;
use std::time::Duration;

use tokio::time::Instant;

pub struct RateLimiter {
    capacity: f64,
    refill_per_sec: f64,
    state: Mutex<BucketState>,
}

struct BucketState {
    tokens: f64,
    last_refill: Instant,
}

impl RateLimiter {
    /// `queries_per_minute` of zero disables throttling.
    pub fn new(queries_per_minute: u32) -> Self {
        let capacity = f64::from(queries_per_minute.max(1));
        RateLimiter {
            capacity,
            refill_per_sec: if queries_per_minute == 0 {
                f64::INFINITY
            } else {
                capacity / 60.0
            },
            state: Mutex::new(BucketState {
                tokens: capacity,
                last_refill: Instant::now(),
            }),
        }
    }

    /// Take one token, sleeping until one is available.
    pub async fn acquire(&self) {
        loop {
            let wait = {
                let mut state = match self.state.lock() {
                    Ok(guard) => guard,
                    Err(poisoned) => poisoned.into_inner(),
                };
                let now = Instant::now();
                let elapsed = now.saturating_duration_since(state.last_refill).as_secs_f64();
                state.tokens = (state.tokens + elapsed * self.refill_per_sec).min(self.capacity);
                state.last_refill = now;
                if state.tokens >= 1.0 {
                    state.tokens -= 1.0;
                    None
                } else {
                    let deficit = 1.0 - state.tokens;
                    Some(Duration::from_secs_f64(deficit / self.refill_per_sec))
                }
            };
            match wait {
                None => return,
                Some(d) => tokio::time::sleep(d).await,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn burst_up_to_capacity_is_immediate() {
        let limiter = RateLimiter::new(30);
        let start = Instant::now();
        for _ in 0..30 {
            limiter.acquire().await;
        }
        assert!(start.elapsed() < Duration::from_millis(100));
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_bucket_blocks_until_refill() {
        let limiter = RateLimiter::new(60); // one token per second
        for _ in 0..60 {
            limiter.acquire().await;
        }
        let start = tokio::time::Instant::now();
        limiter.acquire().await;
        // With the clock paused, tokio auto-advances through the sleep; the
        // 61st acquisition must have waited about a second of virtual time.
        assert!(start.elapsed() >= Duration::from_millis(900));
    }
}
