// Copyright (c) 2025 - Cowboy AI, Inc.
//! Tracing setup
//!
//! The subscriber is installed once, before any component is built. The level
//! never changes afterwards; components receive a [`tracing::Span`] at
//! construction instead of toggling a global switch.

use tracing::Level;
use tracing_subscriber::EnvFilter;

use crate::errors::{DeployError, DeployResult};

/// Output verbosity chosen by the caller at process start
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Verbosity {
    /// Warnings and errors only
    Quiet,
    /// Progress messages
    #[default]
    Normal,
    /// Remote call detail
    Verbose,
    /// Everything
    Trace,
}

impl Verbosity {
    /// Map a `-v` flag count to a verbosity
    pub fn from_occurrences(count: u8) -> Self {
        match count {
            0 => Verbosity::Normal,
            1 => Verbosity::Verbose,
            _ => Verbosity::Trace,
        }
    }

    /// Tracing level for this verbosity
    pub fn level(self) -> Level {
        match self {
            Verbosity::Quiet => Level::WARN,
            Verbosity::Normal => Level::INFO,
            Verbosity::Verbose => Level::DEBUG,
            Verbosity::Trace => Level::TRACE,
        }
    }
}

/// Install the global subscriber. Fails if one is already installed.
pub fn init_tracing(verbosity: Verbosity) -> DeployResult<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(verbosity.level().into()))
        .with_target(false)
        .try_init()
        .map_err(|e| DeployError::Logging(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_verbosity_from_occurrences() {
        assert_eq!(Verbosity::from_occurrences(0), Verbosity::Normal);
        assert_eq!(Verbosity::from_occurrences(1), Verbosity::Verbose);
        assert_eq!(Verbosity::from_occurrences(4), Verbosity::Trace);
    }

    #[test]
    fn test_second_init_is_rejected() {
        // the first call may lose to another test in the same binary
        let _ = init_tracing(Verbosity::Quiet);
        assert!(init_tracing(Verbosity::Trace).is_err());
    }
}
