// Copyright (c) 2025 - Cowboy AI, Inc.
//! Cancellation
//!
//! OS signals are converted into a single token cancellation. Every blocking
//! loop and every remote call checks the token and returns
//! [`DeployError::Cancelled`], so callers unwind through ordinary `?`
//! propagation and get a chance to issue compensating calls on the way out.

use std::future::Future;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::errors::{DeployError, DeployResult};

/// Cancellation handle passed into every component
#[derive(Debug, Clone, Default)]
pub struct Cancellation {
    token: CancellationToken,
}

impl Cancellation {
    /// Create a fresh, uncancelled handle
    pub fn new() -> Self {
        Self::default()
    }

    /// Wrap an existing token
    pub fn from_token(token: CancellationToken) -> Self {
        Self { token }
    }

    /// Derive a handle that is cancelled together with this one
    pub fn child(&self) -> Self {
        Self {
            token: self.token.child_token(),
        }
    }

    /// Request cancellation
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// Whether cancellation was requested
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Fail with `Cancelled` if cancellation was requested
    pub fn check(&self) -> DeployResult<()> {
        if self.token.is_cancelled() {
            Err(DeployError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Sleep, waking early with `Cancelled`
    pub async fn sleep(&self, duration: Duration) -> DeployResult<()> {
        self.check()?;
        if duration.is_zero() {
            tokio::task::yield_now().await;
            return self.check();
        }
        tokio::select! {
            biased;
            _ = self.token.cancelled() => Err(DeployError::Cancelled),
            _ = tokio::time::sleep(duration) => Ok(()),
        }
    }

    /// Run a future to completion unless cancellation arrives first
    pub async fn guard<F, T>(&self, future: F) -> DeployResult<T>
    where
        F: Future<Output = DeployResult<T>>,
    {
        self.check()?;
        tokio::select! {
            biased;
            _ = self.token.cancelled() => Err(DeployError::Cancelled),
            result = future => result,
        }
    }

    /// Cancel this handle when the process receives SIGINT or SIGTERM
    pub fn listen_for_signals(&self) -> JoinHandle<()> {
        let token = self.token.clone();
        tokio::spawn(async move {
            let signal = wait_for_signal().await;
            info!("Received {} - cancelling in-flight operations", signal);
            token.cancel();
        })
    }
}

#[cfg(unix)]
async fn wait_for_signal() -> &'static str {
    use tokio::signal::unix::{signal, SignalKind};

    match signal(SignalKind::terminate()) {
        Ok(mut term) => tokio::select! {
            _ = tokio::signal::ctrl_c() => "SIGINT",
            _ = term.recv() => "SIGTERM",
        },
        Err(_) => {
            let _ = tokio::signal::ctrl_c().await;
            "SIGINT"
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() -> &'static str {
    let _ = tokio::signal::ctrl_c().await;
    "ctrl-c"
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_check_after_cancel() {
        let cancel = Cancellation::new();
        assert!(cancel.check().is_ok());
        cancel.cancel();
        assert!(matches!(cancel.check(), Err(DeployError::Cancelled)));
    }

    #[tokio::test]
    async fn test_guard_prefers_cancellation() {
        let cancel = Cancellation::new();
        cancel.cancel();
        let result = cancel.guard(async { Ok::<_, DeployError>(1) }).await;
        assert!(matches!(result, Err(DeployError::Cancelled)));
    }

    #[tokio::test]
    async fn test_sleep_wakes_on_cancel() {
        let cancel = Cancellation::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            trigger.cancel();
        });
        let result = cancel.sleep(Duration::from_secs(60)).await;
        assert!(matches!(result, Err(DeployError::Cancelled)));
    }

    #[tokio::test]
    async fn test_child_follows_parent() {
        let parent = Cancellation::new();
        let child = parent.child();
        parent.cancel();
        assert!(child.is_cancelled());
    }
}
