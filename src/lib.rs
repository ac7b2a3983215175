// Copyright (c) 2025 - Cowboy AI, Inc.
//! Deployment engine for serverless functions and resource stacks
//!
//! - [`Reconciler`]: wires and unwires a function's declared event sources
//!   (bucket notifications, topic subscriptions, schedule/pattern rules, log
//!   subscription filters, stream mappings, edge associations) together with
//!   the invoke permissions they need.
//! - [`StackLifecycle`]: creates, updates, deletes and previews resource
//!   stacks, following the stack's event stream to a terminal status.
//! - [`StartStopController`]: stops a stack's capacity and restores it to the
//!   declared values.
//!
//! All remote calls go through a [`CloudClient`], which hands out one
//! [`cloud::ServiceHandle`] per provider service.

pub mod arn;
pub mod cancel;
pub mod cloud;
pub mod config;
pub mod errors;
pub mod event_source;
pub mod logging;
pub mod stack;
pub mod start_stop;
pub mod state_machine;
pub mod wire;

// Re-export commonly used types
pub use cancel::Cancellation;
pub use cloud::{CloudClient, ServiceClient, ServiceConnector, ServiceHandle};
pub use config::DeployConfig;
pub use errors::{CloudError, DeployError, DeployResult};
pub use event_source::{parse_event_sources, EventSourceConfig, EventSourceKind, FunctionRef};
pub use logging::{init_tracing, Verbosity};
pub use stack::{StackDescriptor, StackLifecycle, StackOutcome};
pub use start_stop::{CapacitySnapshot, ScalingStrategy, StartStopController};
pub use wire::{ReconcileReport, Reconciler};
