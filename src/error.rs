//! Failure modes of a sync pass.
//!
//! Only rate-limit failures stop a pass; everything else degrades to a
//! partial result plus a log line.

use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    /// Request rejected, unreachable, or answered with a non-2xx status.
    #[error("network failure for {resource}: {reason}")]
    NetworkFailure { resource: String, reason: String },

    /// The quota would force a wait longer than the abort threshold.
    #[error("remote rate limit exceeded: next request allowed in {}s", .wait.as_secs_f64())]
    RateLimitExceeded { wait: Duration },

    /// The remote did not say what its quota is.
    #[error("response for {resource} carried no rate-limit headers")]
    MissingRateLimit { resource: String },

    /// Body was not the expected JSON shape.
    #[error("malformed response from {resource}: {reason}")]
    MalformedResponse { resource: String, reason: String },

    #[error("storage failure: {0:#}")]
    StorageFailure(#[from] anyhow::Error),
}

impl SyncError {
    pub fn network(resource: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        SyncError::NetworkFailure {
            resource: resource.into(),
            reason: reason.to_string(),
        }
    }

    /// Whether the remaining requests of the current pass must be dropped.
    pub fn aborts_pass(&self) -> bool {
        matches!(
            self,
            SyncError::RateLimitExceeded { .. } | SyncError::MissingRateLimit { .. }
        )
    }
}
