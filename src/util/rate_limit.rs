//! Rate limiting utilities
//!
//! Two separate guards live on every session:
//! - [`ResponsePacer`] holds every outbound decision back by `min_interval`
//!   and keeps consecutive decisions at least that far apart.
//! - [`FrameRateLimiter`] drops inbound frames that arrive faster than the
//!   configured ceiling.

use governor::{
    clock::DefaultClock,
    state::{InMemoryState, NotKeyed},
    Quota, RateLimiter,
};
use std::num::NonZeroU32;
use std::time::Duration;
use tokio::time::Instant;

/// Rate limiter type alias
pub type Limiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// Minimum gap between two responses on one session (20 responses/sec)
pub const DEFAULT_MIN_RESPONSE_INTERVAL: Duration = Duration::from_millis(50);

/// Max inbound frames per second per session before frames are dropped
pub const DEFAULT_INBOUND_FRAME_LIMIT: u32 = 60;

/// Create a rate limiter with the specified requests per second
pub fn create_limiter(requests_per_second: u32) -> Limiter {
    let quota = Quota::per_second(NonZeroU32::new(requests_per_second).unwrap_or(NonZeroU32::MIN));
    RateLimiter::direct(quota)
}

/// Per-session response pacing.
///
/// Every response waits at least `min_interval` from the moment it is paced,
/// and never goes out sooner than `min_interval` after the previous send.
/// Waiting suspends the task on the timer wheel and never blocks a worker
/// thread.
#[derive(Debug, Clone)]
pub struct ResponsePacer {
    min_interval: Duration,
    last_sent: Option<Instant>,
}

impl ResponsePacer {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            last_sent: None,
        }
    }

    /// Earliest instant a response paced at `now` may be sent
    pub fn next_deadline(&self, now: Instant) -> Instant {
        let earliest = now + self.min_interval;
        match self.last_sent {
            Some(sent) => earliest.max(sent + self.min_interval),
            None => earliest,
        }
    }

    /// Suspend until the next response is allowed
    pub async fn pace(&self) {
        tokio::time::sleep_until(self.next_deadline(Instant::now())).await;
    }

    /// Record that a response just left the session
    pub fn mark_sent(&mut self) {
        self.last_sent = Some(Instant::now());
    }
}

impl Default for ResponsePacer {
    fn default() -> Self {
        Self::new(DEFAULT_MIN_RESPONSE_INTERVAL)
    }
}

/// Inbound flood guard for one session
pub struct FrameRateLimiter {
    limiter: Limiter,
}

impl FrameRateLimiter {
    pub fn new(frames_per_second: u32) -> Self {
        Self {
            limiter: create_limiter(frames_per_second),
        }
    }

    /// Check if an inbound frame is allowed (returns true if allowed)
    pub fn check_frame(&self) -> bool {
        self.limiter.check().is_ok()
    }
}

impl Default for FrameRateLimiter {
    fn default() -> Self {
        Self::new(DEFAULT_INBOUND_FRAME_LIMIT)
    }
}
