//! Airtime pacing for chunk transmissions using the governor crate

use governor::{
    clock::DefaultClock,
    state::{InMemoryState, NotKeyed},
    Quota, RateLimiter,
};
use std::sync::Arc;
use std::time::Duration;

/// Spaces out transmissions across all relay workers
#[derive(Clone)]
pub struct AirtimePacer {
    limiter: Option<Arc<RateLimiter<NotKeyed, InMemoryState, DefaultClock>>>,
    interval: Duration,
}

impl AirtimePacer {
    /// One transmission per `interval`. A zero interval disables pacing.
    pub fn new(interval: Duration) -> Self {
        let limiter = Quota::with_period(interval).map(|quota| Arc::new(RateLimiter::direct(quota)));

        Self { limiter, interval }
    }

    pub fn unpaced() -> Self {
        Self::new(Duration::ZERO)
    }

    /// Wait for the next transmit slot
    pub async fn wait_for_slot(&self) {
        if let Some(limiter) = &self.limiter {
            limiter.until_ready().await;
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.limiter.is_some()
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }
}

impl Default for AirtimePacer {
    fn default() -> Self {
        Self::unpaced()
    }
}
