use governor::clock::DefaultClock;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter as GovernorLimiter};
use std::num::NonZeroU32;
use std::time::Duration;

type DirectLimiter = GovernorLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// Paces sequential calls to an upstream: at most one permit per interval.
///
/// Owned by whichever stage makes the calls, instead of `sleep`s scattered
/// through the loop bodies. A zero interval never blocks.
pub struct RateLimiter {
    inner: Option<DirectLimiter>,
    interval: Duration,
}

impl RateLimiter {
    pub fn per_interval(interval: Duration) -> Self {
        let inner = Quota::with_period(interval)
            .map(|quota| GovernorLimiter::direct(quota.allow_burst(NonZeroU32::MIN)));
        Self { inner, interval }
    }

    pub fn from_millis(ms: u64) -> Self {
        Self::per_interval(Duration::from_millis(ms))
    }

    pub fn unlimited() -> Self {
        Self::per_interval(Duration::ZERO)
    }

    /// Take a permit if one is available right now
    pub fn try_acquire(&self) -> bool {
        match &self.inner {
            Some(limiter) => limiter.check().is_ok(),
            None => true,
        }
    }

    /// Wait until a permit is available, then take it
    pub async fn wait(&self) {
        if let Some(limiter) = &self.inner {
            limiter.until_ready().await;
        }
    }
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter")
            .field("interval", &self.interval)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[test]
    fn test_single_permit_per_interval() {
        let limiter = RateLimiter::per_interval(Duration::from_secs(60));
        assert!(limiter.try_acquire());
        assert!(!limiter.try_acquire());
    }

    #[test]
    fn test_zero_interval_is_unlimited() {
        let limiter = RateLimiter::unlimited();
        for _ in 0..100 {
            assert!(limiter.try_acquire());
        }
    }

    #[tokio::test]
    async fn test_wait_spaces_permits() {
        let limiter = RateLimiter::from_millis(50);
        let start = Instant::now();
        limiter.wait().await;
        limiter.wait().await;
        limiter.wait().await;
        // first permit is immediate, the next two wait one interval each
        assert!(start.elapsed() >= Duration::from_millis(90));
    }
}
