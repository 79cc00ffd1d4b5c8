//! Token bucket limiting outbound calls to a provider quota

use parking_lot::Mutex;
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;
use tracing::debug;

/// Tolerance for float drift when a refill lands exactly on one token
const EPSILON: f64 = 1e-9;

#[derive(Debug, Error, PartialEq)]
pub enum LimiterError {
    #[error("rate limit capacity must be at least 1")]
    ZeroCapacity,

    #[error("refill rate must be positive, got {0}")]
    InvalidRefillRate(f64),

    #[error("deadline reached while waiting {wait:?} for a rate limit token")]
    DeadlineExceeded { wait: Duration },
}

/// Capacity and refill rate of a bucket
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RateLimit {
    pub capacity: u32,
    pub refill_per_second: f64,
}

impl RateLimit {
    pub fn new(capacity: u32, refill_per_second: f64) -> Result<Self, LimiterError> {
        if capacity == 0 {
            return Err(LimiterError::ZeroCapacity);
        }
        if !(refill_per_second.is_finite() && refill_per_second > 0.0) {
            return Err(LimiterError::InvalidRefillRate(refill_per_second));
        }
        Ok(Self {
            capacity,
            refill_per_second,
        })
    }

    /// `rpm` requests per minute with a burst of `burst` (defaults to `rpm`).
    pub fn per_minute(rpm: u32, burst: Option<u32>) -> Result<Self, LimiterError> {
        Self::new(burst.unwrap_or(rpm), f64::from(rpm) / 60.0)
    }
}

#[derive(Debug)]
struct BucketState {
    tokens: f64,
    last_refill: Instant,
}

/// Lazily refilled token bucket.
///
/// Refill, check and consume happen under one lock, so concurrent callers
/// never take the same token. Tokens stay within `[0, capacity]`.
#[derive(Debug)]
pub struct TokenBucket {
    limit: RateLimit,
    state: Mutex<BucketState>,
}

impl TokenBucket {
    /// A bucket that starts full.
    pub fn new(limit: RateLimit) -> Self {
        Self::starting_at(limit, Instant::now())
    }

    pub fn starting_at(limit: RateLimit, now: Instant) -> Self {
        Self {
            limit,
            state: Mutex::new(BucketState {
                tokens: f64::from(limit.capacity),
                last_refill: now,
            }),
        }
    }

    pub fn limit(&self) -> RateLimit {
        self.limit
    }

    /// Take a token now, or return how long until one is available.
    ///
    /// A zero duration means the token was consumed. A non-zero duration
    /// consumes nothing; the caller waits and asks again.
    pub fn acquire(&self) -> Duration {
        self.acquire_at(Instant::now())
    }

    pub fn acquire_at(&self, now: Instant) -> Duration {
        let mut state = self.state.lock();
        self.refill(&mut state, now);

        if state.tokens + EPSILON >= 1.0 {
            state.tokens = (state.tokens - 1.0).max(0.0);
            Duration::ZERO
        } else {
            let missing = 1.0 - state.tokens;
            Duration::from_secs_f64(missing / self.limit.refill_per_second)
        }
    }

    /// Tokens available at `now`, without consuming any.
    pub fn available_at(&self, now: Instant) -> f64 {
        let mut state = self.state.lock();
        self.refill(&mut state, now);
        state.tokens
    }

    fn refill(&self, state: &mut BucketState, now: Instant) {
        let elapsed = now.saturating_duration_since(state.last_refill).as_secs_f64();
        if elapsed > 0.0 {
            let capacity = f64::from(self.limit.capacity);
            state.tokens = (state.tokens + elapsed * self.limit.refill_per_second).min(capacity);
            state.last_refill = now;
        }
    }

    /// Suspend until a token is taken, returning the total time waited.
    ///
    /// Fails without sleeping when the next wait would run past `deadline`.
    pub async fn until_ready(&self, deadline: Option<Instant>) -> Result<Duration, LimiterError> {
        let started = Instant::now();

        loop {
            let wait = self.acquire();
            if wait.is_zero() {
                return Ok(started.elapsed());
            }

            if let Some(deadline) = deadline {
                if Instant::now() + wait > deadline {
                    return Err(LimiterError::DeadlineExceeded { wait });
                }
            }

            debug!(wait_ms = wait.as_millis() as u64, "Rate limit reached, waiting for token");
            tokio::time::sleep(wait).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rate_limit_validation() {
        assert_eq!(RateLimit::new(0, 1.0), Err(LimiterError::ZeroCapacity));
        assert!(matches!(
            RateLimit::new(5, 0.0),
            Err(LimiterError::InvalidRefillRate(_))
        ));
        let rpm = RateLimit::per_minute(50, None).unwrap();
        assert_eq!(rpm.capacity, 50);
        assert!((rpm.refill_per_second - 50.0 / 60.0).abs() < 1e-12);
    }

    #[test]
    fn test_full_bucket_then_wait() {
        let now = Instant::now();
        let limit = RateLimit::new(5, 2.0).unwrap();
        let bucket = TokenBucket::starting_at(limit, now);

        for _ in 0..5 {
            assert_eq!(bucket.acquire_at(now), Duration::ZERO);
        }

        let wait = bucket.acquire_at(now);
        assert!(wait > Duration::ZERO);
        assert!((wait.as_secs_f64() - 0.5).abs() < 1e-6, "wait was {wait:?}");
    }

    #[test]
    fn test_refill_is_lazy_and_capped() {
        let now = Instant::now();
        let bucket = TokenBucket::starting_at(RateLimit::new(3, 1.0).unwrap(), now);
        for _ in 0..3 {
            bucket.acquire_at(now);
        }
        assert!(bucket.available_at(now) < EPSILON);

        let later = now + Duration::from_millis(1500);
        assert!((bucket.available_at(later) - 1.5).abs() < 1e-9);

        let much_later = now + Duration::from_secs(600);
        assert_eq!(bucket.available_at(much_later), 3.0);
    }

    #[test]
    fn test_partial_token_shortens_wait() {
        let now = Instant::now();
        let bucket = TokenBucket::starting_at(RateLimit::new(1, 1.0).unwrap(), now);
        assert!(bucket.acquire_at(now).is_zero());

        let wait = bucket.acquire_at(now + Duration::from_millis(250));
        assert!((wait.as_secs_f64() - 0.75).abs() < 1e-6);
    }

    #[test]
    fn test_concurrent_acquirers_share_tokens() {
        use std::sync::Arc;
        use std::sync::atomic::{AtomicUsize, Ordering};

        let now = Instant::now();
        let bucket = Arc::new(TokenBucket::starting_at(RateLimit::new(100, 0.001).unwrap(), now));
        let granted = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let bucket = Arc::clone(&bucket);
                let granted = Arc::clone(&granted);
                std::thread::spawn(move || {
                    for _ in 0..50 {
                        if bucket.acquire_at(now).is_zero() {
                            granted.fetch_add(1, Ordering::SeqCst);
                        }
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        assert_eq!(granted.load(Ordering::SeqCst), 100);
    }

    #[tokio::test(start_paused = true)]
    async fn test_until_ready_sleeps_for_refill() {
        let bucket = TokenBucket::new(RateLimit::new(1, 1.0 / 60.0).unwrap());

        let first = bucket.until_ready(None).await.unwrap();
        assert_eq!(first, Duration::ZERO);

        let start = Instant::now();
        bucket.until_ready(None).await.unwrap();
        let waited = start.elapsed();
        assert!(waited >= Duration::from_secs(59), "waited {waited:?}");
        assert!(waited <= Duration::from_secs(61), "waited {waited:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn test_until_ready_respects_deadline() {
        let bucket = TokenBucket::new(RateLimit::new(1, 1.0 / 60.0).unwrap());
        bucket.until_ready(None).await.unwrap();

        let deadline = Instant::now() + Duration::from_secs(10);
        let err = bucket.until_ready(Some(deadline)).await.unwrap_err();
        assert!(matches!(err, LimiterError::DeadlineExceeded { .. }));
        // Gave up without sleeping.
        assert!(Instant::now() < deadline);
    }
}
