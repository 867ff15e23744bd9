//! Self-throttling against the remote request quota.
//!
//! Every sector response reports a request limit and the window (seconds)
//! it resets over. Spacing requests `reset / limit` apart keeps us inside
//! the quota; time already spent on the request counts towards that gap.

use std::sync::Mutex;
use std::time::Duration;

use tokio::time::Instant;

use crate::error::SyncError;

const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_warn};

pub const RATE_LIMIT_ABORT_THRESHOLD: Duration = Duration::from_secs(60);

pub const LIMIT_HEADER: &str = "x-rate-limit-limit";
pub const RESET_HEADER: &str = "x-rate-limit-reset";
pub const REMAINING_HEADER: &str = "x-rate-limit-remaining";

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RateQuota {
    pub limit: u32,
    pub reset: Duration,
    pub remaining: Option<u32>,
}

impl RateQuota {
    pub fn new(limit: u32, reset: Duration) -> Self {
        Self {
            limit,
            reset,
            remaining: None,
        }
    }

    /// Parse raw header values; `None` unless both limit and reset parse.
    pub fn from_headers(
        limit: Option<&str>,
        reset: Option<&str>,
        remaining: Option<&str>,
    ) -> Option<Self> {
        let limit = limit?.trim().parse::<u32>().ok()?;
        let reset = reset?.trim().parse::<f64>().ok()?;
        // Negative, NaN and out-of-range windows all count as missing.
        let reset = Duration::try_from_secs_f64(reset).ok()?;
        Some(Self {
            limit,
            reset,
            remaining: remaining.and_then(|r| r.trim().parse().ok()),
        })
    }

    /// `reset / limit - elapsed`, never negative.
    pub fn wait_time(&self, elapsed: Duration) -> Duration {
        if self.limit == 0 {
            return self.reset;
        }
        (self.reset / self.limit).saturating_sub(elapsed)
    }
}

/// Delay to apply before the next request, or the error that ends the pass.
pub fn next_request_delay(
    quota: Option<RateQuota>,
    elapsed: Duration,
    threshold: Duration,
    resource: &str,
) -> Result<Duration, SyncError> {
    let Some(quota) = quota else {
        return Err(SyncError::MissingRateLimit {
            resource: resource.to_string(),
        });
    };
    let wait = quota.wait_time(elapsed);
    if wait > threshold {
        return Err(SyncError::RateLimitExceeded { wait });
    }
    Ok(wait)
}

/// Shared gate spacing out requests to one remote endpoint.
#[derive(Debug)]
pub struct Throttle {
    threshold: Duration,
    next_allowed: Mutex<Option<Instant>>,
}

impl Throttle {
    pub fn new(threshold: Duration) -> Self {
        Self {
            threshold,
            next_allowed: Mutex::new(None),
        }
    }

    /// Sleep until the quota allows another request.
    pub async fn wait_turn(&self) {
        let deadline = match self.next_allowed.lock() {
            Ok(guard) => *guard,
            Err(poisoned) => *poisoned.into_inner(),
        };
        if let Some(deadline) = deadline {
            if deadline > Instant::now() {
                log_debug!(
                    "Throttling remote requests for {:.1}s",
                    (deadline - Instant::now()).as_secs_f64()
                );
                tokio::time::sleep_until(deadline).await;
            }
        }
    }

    /// Account for a finished request.
    pub fn record(
        &self,
        quota: Option<RateQuota>,
        elapsed: Duration,
        resource: &str,
    ) -> Result<Duration, SyncError> {
        let delay = next_request_delay(quota, elapsed, self.threshold, resource).map_err(|err| {
            log_warn!("{err}");
            err
        })?;
        if let Some(remaining) = quota.and_then(|quota| quota.remaining) {
            log_debug!(
                "{remaining} requests left in the quota window, next in {:.1}s",
                delay.as_secs_f64()
            );
        }
        let deadline = Instant::now() + delay;
        let mut guard = match self.next_allowed.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if (*guard).map_or(true, |current| current < deadline) {
            *guard = Some(deadline);
        }
        Ok(delay)
    }
}
