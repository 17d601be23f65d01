use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use std::num::NonZeroU32;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::error::RateLimitError;

/// Default spacing between identify operations
pub const DEFAULT_IDENTIFY_PERIOD: Duration = Duration::from_secs(5);

/// Process-wide admission for the identify operation
///
/// Separate from the per-bucket REST limits: the server caps how often a
/// client may start a fresh session, across all shards in the process.
pub struct IdentifyLimiter {
    limiter: DefaultDirectRateLimiter,
}

impl IdentifyLimiter {
    /// Allow `burst` identifies, replenishing one every `period`.
    ///
    /// Returns `None` for a zero period.
    pub fn new(period: Duration, burst: NonZeroU32) -> Option<Self> {
        let quota = Quota::with_period(period)?.allow_burst(burst);
        Some(IdentifyLimiter {
            limiter: RateLimiter::direct(quota),
        })
    }

    /// Wait for an identify slot or cancellation.
    pub async fn acquire(&self, cancel: &CancellationToken) -> Result<(), RateLimitError> {
        tokio::select! {
            _ = cancel.cancelled() => Err(RateLimitError::Cancelled),
            _ = self.limiter.until_ready() => Ok(()),
        }
    }

    /// Take a slot if one is free right now
    pub fn try_acquire(&self) -> bool {
        self.limiter.check().is_ok()
    }
}

impl Default for IdentifyLimiter {
    fn default() -> Self {
        IdentifyLimiter {
            limiter: RateLimiter::direct(
                Quota::with_period(DEFAULT_IDENTIFY_PERIOD)
                    .unwrap_or_else(|| Quota::per_minute(NonZeroU32::MIN)),
            ),
        }
    }
}
