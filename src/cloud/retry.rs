// Copyright (c) 2025 - Cowboy AI, Inc.
//! Bounded retry for transient remote failures
//!
//! Polling loops never come through here. This only re-issues a call that
//! failed with a transient error, with a backoff that grows by a constant
//! factor. Cancellation is checked before every attempt and is never retried.

use std::future::Future;
use std::time::Duration;

use tracing::warn;

use crate::cancel::Cancellation;
use crate::errors::{CloudError, DeployError, DeployResult};

/// Upper bound of a single backoff sleep
pub const MAX_BACKOFF: Duration = Duration::from_secs(60);

/// Retry policy for a single remote call
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts including the first one
    pub max_attempts: u32,
    /// Sleep after the first failure
    pub initial_backoff: Duration,
    /// Multiplier applied to the backoff after each failure
    pub factor: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_backoff: Duration::from_secs(1),
            factor: 2.0,
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            initial_backoff: Duration::ZERO,
            factor: 1.0,
        }
    }

    /// Backoff to sleep after the given failed attempt (1-based), capped at
    /// [`MAX_BACKOFF`]
    pub fn backoff_after(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt.saturating_sub(1)).unwrap_or(i32::MAX);
        let secs = self.initial_backoff.as_secs_f64() * self.factor.powi(exponent);
        Duration::try_from_secs_f64(secs).map_or(MAX_BACKOFF, |backoff| backoff.min(MAX_BACKOFF))
    }
}

/// Run `call` until it succeeds, fails permanently, or the attempts run out
pub async fn retry<F, Fut, T>(
    policy: &RetryPolicy,
    cancel: &Cancellation,
    label: &str,
    mut call: F,
) -> DeployResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, CloudError>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;
    loop {
        cancel.check()?;
        match cancel.guard(async { call().await.map_err(DeployError::from) }).await {
            Err(DeployError::Cloud(err)) if err.is_transient() && attempt < max_attempts => {
                let backoff = policy.backoff_after(attempt);
                warn!(
                    "{} failed with {} (attempt {}/{}), retrying in {:?}",
                    label, err.code, attempt, max_attempts, backoff
                );
                cancel.sleep(backoff).await?;
                attempt += 1;
            }
            other => return other,
        }
    }
}
