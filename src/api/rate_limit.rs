use governor::{Quota, RateLimiter};
use std::num::NonZeroU32;
use std::sync::Arc;

// Type alias for the rate limiter to simplify signatures
type DirectRateLimiter = RateLimiter<
    governor::state::direct::NotKeyed,
    governor::state::InMemoryState,
    governor::clock::DefaultClock,
>;

/// Token bucket shared by every request the client sends.
///
/// Refills continuously at `per_second` tokens/sec up to `burst`, measured on
/// a monotonic clock. Clones share the same bucket.
#[derive(Clone)]
pub struct TokenBucket {
    limiter: Arc<DirectRateLimiter>,
}

impl TokenBucket {
    /// Create a bucket that starts full.
    ///
    /// Zero values are bumped to 1.
    pub fn new(per_second: u32, burst: u32) -> Self {
        let rate = NonZeroU32::new(per_second).unwrap_or(NonZeroU32::MIN);
        let burst = NonZeroU32::new(burst).unwrap_or(NonZeroU32::MIN);
        let quota = Quota::per_second(rate).allow_burst(burst);

        Self {
            limiter: Arc::new(RateLimiter::direct(quota)),
        }
    }

    /// Wait until a token is available and take it. Yields to the runtime while waiting.
    pub async fn acquire(&self) {
        self.limiter.until_ready().await;
    }

    /// Take a token if one is available right now.
    pub fn try_acquire(&self) -> bool {
        self.limiter.check().is_ok()
    }
}

impl Default for TokenBucket {
    fn default() -> Self {
        Self::new(2, 10)
    }
}
