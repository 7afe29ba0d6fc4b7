//! compute-unit rate limiter shared by every chain call of a scan
//!
//! A token bucket (GCRA via governor) holding `capacity` units and refilling
//! `refill_per_second` units per second. Waiters are served one at a time in
//! arrival order, so a large request is not starved by a stream of small ones.

use crate::error::LimiterError;
use governor::{DefaultDirectRateLimiter, InsufficientCapacity, Quota};
use serde::{Deserialize, Serialize};
use std::num::NonZeroU32;
use tokio::sync::Mutex;
use tracing::warn;

/// compute units per second allowed by the default provider plan
pub const DEFAULT_COMPUTE_UNITS_PER_SECOND: u32 = 330;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RateLimiterConfig {
    pub capacity: u32,
    pub refill_per_second: u32,
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_COMPUTE_UNITS_PER_SECOND,
            refill_per_second: DEFAULT_COMPUTE_UNITS_PER_SECOND,
        }
    }
}

pub struct RateLimiter {
    bucket: DefaultDirectRateLimiter,
    queue: Mutex<()>,
    capacity: NonZeroU32,
}

impl RateLimiter {
    pub fn new(config: RateLimiterConfig) -> Result<Self, LimiterError> {
        let capacity = NonZeroU32::new(config.capacity)
            .ok_or_else(|| LimiterError::InvalidConfig("capacity must be positive".into()))?;
        let refill = NonZeroU32::new(config.refill_per_second)
            .ok_or_else(|| LimiterError::InvalidConfig("refill rate must be positive".into()))?;

        let quota = Quota::per_second(refill).allow_burst(capacity);
        Ok(Self {
            bucket: governor::RateLimiter::direct(quota),
            queue: Mutex::new(()),
            capacity,
        })
    }

    pub fn capacity(&self) -> u32 {
        self.capacity.get()
    }

    /// wait until `compute_units` can be taken from the bucket
    ///
    /// Returns `Ok(false)` when the request can never fit (more units than the
    /// bucket holds); the caller decides whether to retry. Zero units is an error.
    pub async fn acquire(&self, compute_units: u32) -> Result<bool, LimiterError> {
        let units = NonZeroU32::new(compute_units).ok_or(LimiterError::MissingComputeUnits)?;

        let _turn = self.queue.lock().await;
        match self.bucket.until_n_ready(units).await {
            Ok(_) => Ok(true),
            Err(InsufficientCapacity(max)) => {
                warn!("request for {} compute units exceeds bucket capacity {}", compute_units, max);
                Ok(false)
            }
        }
    }
}
