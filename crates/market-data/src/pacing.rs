//! Pacing primitives: per-provider token bucket, daily usage counter and
//! the retry backoff schedule. Pure enough to test with a paused clock.

use chrono::{NaiveDate, Utc};
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

/// Token bucket refilled at `calls_per_minute / 60` tokens per second.
/// `acquire` waits until a token is available; waits carry ±10% jitter so
/// concurrent workers don't thunder in lockstep.
#[derive(Clone)]
pub struct TokenBucket {
    state: Arc<Mutex<BucketState>>,
    rate_per_sec: f64,
    burst: f64,
}

struct BucketState {
    tokens: f64,
    last_refill: Instant,
}

impl TokenBucket {
    pub fn new(calls_per_minute: u32) -> Self {
        let burst = calls_per_minute.max(1) as f64;
        Self {
            state: Arc::new(Mutex::new(BucketState {
                tokens: burst,
                last_refill: Instant::now(),
            })),
            rate_per_sec: calls_per_minute.max(1) as f64 / 60.0,
            burst,
        }
    }

    pub async fn acquire(&self) {
        loop {
            let wait = {
                let mut state = self.state.lock().await;
                let now = Instant::now();
                let elapsed = now.duration_since(state.last_refill).as_secs_f64();
                state.tokens = (state.tokens + elapsed * self.rate_per_sec).min(self.burst);
                state.last_refill = now;

                if state.tokens >= 1.0 {
                    state.tokens -= 1.0;
                    return;
                }
                (1.0 - state.tokens) / self.rate_per_sec
            };

            let jittered = jitter(Duration::from_secs_f64(wait));
            tracing::debug!("rate limit: waiting {:.2}s for a call slot", jittered.as_secs_f64());
            tokio::time::sleep(jittered).await;
        }
    }
}

/// Daily call counter. At 90% of the daily cap the provider is skipped and
/// failover takes over until the UTC date rolls.
pub struct DailyUsage {
    cap: u32,
    state: std::sync::Mutex<(NaiveDate, u32)>,
}

impl DailyUsage {
    pub fn new(cap: u32) -> Self {
        Self {
            cap: cap.max(1),
            state: std::sync::Mutex::new((Utc::now().date_naive(), 0)),
        }
    }

    pub fn record_call(&self) {
        let mut state = self.state.lock().unwrap();
        self.roll(&mut state);
        state.1 += 1;
    }

    pub fn calls_today(&self) -> u32 {
        let mut state = self.state.lock().unwrap();
        self.roll(&mut state);
        state.1
    }

    pub fn near_cap(&self) -> bool {
        self.calls_today() as f64 >= self.cap as f64 * 0.9
    }

    fn roll(&self, state: &mut (NaiveDate, u32)) {
        let today = Utc::now().date_naive();
        if state.0 != today {
            *state = (today, 0);
        }
    }
}

/// Exponential backoff for transient failures: `0.8 * 2^attempt` seconds
/// capped at 8s, with ±10% jitter applied by the caller's sleep.
pub fn backoff_delay(attempt: u32) -> Duration {
    let secs = (0.8 * 2f64.powi(attempt as i32)).min(8.0);
    Duration::from_secs_f64(secs)
}

/// Apply ±10% jitter to a delay.
pub fn jitter(base: Duration) -> Duration {
    let factor: f64 = rand::thread_rng().gen_range(0.9..=1.1);
    Duration::from_secs_f64(base.as_secs_f64() * factor)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_schedule_is_capped() {
        assert_eq!(backoff_delay(0), Duration::from_secs_f64(0.8));
        assert_eq!(backoff_delay(1), Duration::from_secs_f64(1.6));
        assert_eq!(backoff_delay(2), Duration::from_secs_f64(3.2));
        assert_eq!(backoff_delay(3), Duration::from_secs_f64(6.4));
        assert_eq!(backoff_delay(4), Duration::from_secs(8));
        assert_eq!(backoff_delay(10), Duration::from_secs(8));
    }

    #[test]
    fn jitter_stays_within_ten_percent() {
        let base = Duration::from_secs(10);
        for _ in 0..100 {
            let j = jitter(base).as_secs_f64();
            assert!((9.0..=11.0).contains(&j), "jitter out of range: {}", j);
        }
    }

    #[test]
    fn daily_usage_trips_at_ninety_percent() {
        let usage = DailyUsage::new(10);
        for _ in 0..8 {
            usage.record_call();
        }
        assert!(!usage.near_cap());
        usage.record_call();
        assert!(usage.near_cap());
    }

    #[tokio::test(start_paused = true)]
    async fn token_bucket_allows_burst_then_throttles() {
        let bucket = TokenBucket::new(60); // 1 token/sec, burst 60

        // The initial burst drains without waiting.
        let start = Instant::now();
        for _ in 0..60 {
            bucket.acquire().await;
        }
        assert_eq!(start.elapsed(), Duration::ZERO);

        // The 61st call must wait for a refill (~1s, jittered).
        bucket.acquire().await;
        let waited = start.elapsed().as_secs_f64();
        assert!((0.8..=1.3).contains(&waited), "waited {:.2}s", waited);
    }

    #[tokio::test(start_paused = true)]
    async fn strict_bucket_spaces_calls() {
        let bucket = TokenBucket::new(5); // 5/min

        for _ in 0..5 {
            bucket.acquire().await;
        }
        let start = Instant::now();
        bucket.acquire().await;
        // One token refills every 12s.
        let waited = start.elapsed().as_secs_f64();
        assert!((10.0..=14.0).contains(&waited), "waited {:.2}s", waited);
    }
}
