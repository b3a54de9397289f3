//! Request pacing for the fare-grid service.
//!
//! The concurrency ceiling bounds how many calls are in flight; this bounds
//! how fast new ones start.

use governor::{Quota, RateLimiter as GovLimiter};
use std::num::NonZeroU32;
use std::sync::Arc;

type DirectLimiter = GovLimiter<
    governor::state::NotKeyed,
    governor::state::InMemoryState,
    governor::clock::DefaultClock,
>;

/// Shared token bucket across every clone of the client.
#[derive(Debug, Clone)]
pub struct RateLimiter {
    limiter: Arc<DirectLimiter>,
}

impl RateLimiter {
    /// `None` when `requests_per_sec` is 0 (pacing disabled).
    pub fn per_second(requests_per_sec: u32) -> Option<Self> {
        let quota = Quota::per_second(NonZeroU32::new(requests_per_sec)?);
        Some(Self {
            limiter: Arc::new(GovLimiter::direct(quota)),
        })
    }

    /// Wait until a request slot is available.
    pub async fn wait(&self) {
        self.limiter.until_ready().await;
    }

    /// Try to take a slot without waiting. Returns true if acquired.
    pub fn try_acquire(&self) -> bool {
        self.limiter.check().is_ok()
    }
}
