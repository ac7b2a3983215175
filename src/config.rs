// Copyright (c) 2025 - Cowboy AI, Inc.
//! Runtime configuration for deployment operations
//!
//! Loaded once from the environment at process start. Config-file loading and
//! merging belong to the caller; this only covers the knobs the engine itself
//! consumes.

use std::time::Duration;

use crate::cloud::RetryPolicy;
use crate::errors::{DeployError, DeployResult};

/// Alias every binding targets unless told otherwise
pub const DEFAULT_ALIAS: &str = "ACTIVE";

/// Environment variable holding the inter-call sleep in (fractional) seconds
pub const REQUESTS_SLEEP_ENV: &str = "AWS_REQUESTS_SLEEP";

/// Largest template body the stack API accepts inline
pub const INLINE_TEMPLATE_LIMIT: usize = 51_200;

/// Configuration shared by the reconciler, stack lifecycle and start/stop
#[derive(Debug, Clone)]
pub struct DeployConfig {
    /// Region every service client is bound to
    pub region: String,
    /// Function alias bindings are attached to
    pub alias_name: String,
    /// Sleep before every remote call, to stay under API rate limits
    pub requests_sleep: Duration,
    /// Retry policy for transient failures
    pub retry: RetryPolicy,
    /// Interval between stack event polls
    pub stack_poll_interval: Duration,
    /// Interval between change-set status polls
    pub change_set_poll_interval: Duration,
    /// Interval between capacity wait polls
    pub wait_poll_interval: Duration,
    /// Number of polls before a capacity wait gives up
    pub wait_max_attempts: u32,
    /// Template size above which the body is uploaded instead of inlined
    pub inline_template_limit: usize,
}

impl Default for DeployConfig {
    fn default() -> Self {
        Self {
            region: "eu-west-1".to_string(),
            alias_name: DEFAULT_ALIAS.to_string(),
            requests_sleep: Duration::ZERO,
            retry: RetryPolicy::default(),
            stack_poll_interval: Duration::from_secs(5),
            change_set_poll_interval: Duration::from_secs(2),
            wait_poll_interval: Duration::from_secs(5),
            wait_max_attempts: 120,
            inline_template_limit: INLINE_TEMPLATE_LIMIT,
        }
    }
}

impl DeployConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> DeployResult<Self> {
        let region = std::env::var("AWS_REGION")
            .or_else(|_| std::env::var("AWS_DEFAULT_REGION"))
            .unwrap_or_else(|_| "eu-west-1".to_string());

        let requests_sleep = match std::env::var(REQUESTS_SLEEP_ENV) {
            Ok(raw) => parse_sleep(&raw)?,
            Err(_) => Duration::ZERO,
        };

        Ok(Self {
            region,
            requests_sleep,
            ..Self::default()
        })
    }

    /// Configuration with every interval set to zero, for tests and dry runs
    pub fn immediate() -> Self {
        Self {
            retry: RetryPolicy {
                initial_backoff: Duration::ZERO,
                ..RetryPolicy::default()
            },
            stack_poll_interval: Duration::ZERO,
            change_set_poll_interval: Duration::ZERO,
            wait_poll_interval: Duration::ZERO,
            ..Self::default()
        }
    }

    /// Override the region
    pub fn with_region(mut self, region: impl Into<String>) -> Self {
        self.region = region.into();
        self
    }

    /// Override the alias name
    pub fn with_alias(mut self, alias: impl Into<String>) -> Self {
        self.alias_name = alias.into();
        self
    }
}

fn parse_sleep(raw: &str) -> DeployResult<Duration> {
    let seconds: f64 = raw.trim().parse().map_err(|_| {
        DeployError::Configuration(format!("{REQUESTS_SLEEP_ENV} is not a number: {raw}"))
    })?;
    if !seconds.is_finite() || seconds < 0.0 {
        return Err(DeployError::Configuration(format!(
            "{REQUESTS_SLEEP_ENV} must be a non-negative number: {raw}"
        )));
    }
    Ok(Duration::from_secs_f64(seconds))
}
