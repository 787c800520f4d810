use std::num::NonZeroU32;

use governor::Quota;
use governor::RateLimiter;
use governor::clock::DefaultClock;
use governor::state::InMemoryState;
use governor::state::NotKeyed;

type DirectLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// The single token bucket shared by every ML read and CA write: capacity 9
/// with a 9/s refill, guarded underneath by a secondary 540/min
/// ceiling so a burst that drains the fast bucket can't sustain indefinitely.
/// FIFO-fair: callers acquire a token before dispatching, in arrival order.
pub struct MlCaRateLimiter {
    burst: DirectLimiter,
    sustained: DirectLimiter,
}

impl MlCaRateLimiter {
    #[must_use]
    pub fn new() -> Self {
        Self {
            burst: RateLimiter::direct(Quota::per_second(NonZeroU32::new(9).unwrap_or(NonZeroU32::MIN))),
            sustained: RateLimiter::direct(Quota::per_minute(NonZeroU32::new(540).unwrap_or(NonZeroU32::MIN))),
        }
    }

    /// Suspends the caller until both the burst and sustained buckets have a
    /// token available. This is the only suspension point HTTP dispatch goes
    /// through before the actual request.
    pub async fn acquire(&self) {
        self.burst.until_ready().await;
        self.sustained.until_ready().await;
    }
}

impl Default for MlCaRateLimiter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn acquire_does_not_block_under_capacity() {
        let limiter = MlCaRateLimiter::new();
        for _ in 0..9 {
            limiter.acquire().await;
        }
    }
}
