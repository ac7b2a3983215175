// Copyright (c) 2025 - Cowboy AI, Inc.
//! Reconciler
//!
//! Converges a function's declared event sources against the live provider
//! state. One call resolves the function, builds one adapter per declared
//! entry, then drives every entry in order:
//!
//! ```text
//! NOT_STARTED ──resolve──> FUNCTION_RESOLVED ──┬─ dispatch ─> DISPATCHED ─┬─> CONVERGED ─┐
//!                                              │                          └─> FAILED ────┤
//!                                              │   <──────── next entry ─────────────────┘
//!                                              └─ finish ─> DONE
//! ```
//!
//! A missing function or a malformed entry stops the call. Any other failure
//! is recorded against its entry and the remaining entries still run.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use cim_deploy::cloud::{memory::InMemoryCloud, CloudClient};
//! use cim_deploy::event_source::parse_event_sources;
//! use cim_deploy::{DeployConfig, Reconciler};
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = DeployConfig::default();
//!     let client = CloudClient::new(Arc::new(InMemoryCloud::new()), &config);
//!     let reconciler = Reconciler::new(client, config);
//!
//!     let sources = parse_event_sources(&json!([{"schedule": "rate(5 minutes)"}]))?;
//!     let report = reconciler.wire("billing-worker", &sources).await?;
//!     std::process::exit(report.exit_code());
//! }
//! ```

use std::fmt;

use serde::Serialize;
use serde_json::json;
use tracing::{debug, info, info_span, warn, Instrument, Span};

use crate::cloud::{required_str, services, CloudClient};
use crate::config::DeployConfig;
use crate::errors::{DeployError, DeployResult};
use crate::event_source::{
    absent_if_not_found, Ensure, EventSource, EventSourceAdapter, EventSourceConfig,
    EventSourceKind, FunctionRef, PermissionGuard, PermissionStatement, SourceStatus,
};
use crate::state_machine::{ReconcileInput, ReconcilePhase, StateMachineWithHistory};

/// What happened to one declared entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum EntryAction {
    Added,
    Updated,
    Removed,
    Enabled,
    Disabled,
    /// Nothing to remove
    Unchanged,
    /// The entry failed; see [`EntryOutcome::error`]
    Failed,
}

impl fmt::Display for EntryAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EntryAction::Added => "added",
            EntryAction::Updated => "updated",
            EntryAction::Removed => "removed",
            EntryAction::Enabled => "enabled",
            EntryAction::Disabled => "disabled",
            EntryAction::Unchanged => "unchanged",
            EntryAction::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Outcome of one declared entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EntryOutcome {
    pub source: String,
    pub kind: EventSourceKind,
    pub action: EntryAction,
    pub error: Option<String>,
}

impl EntryOutcome {
    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

/// Outcomes of one wire/unwire call, in declaration order
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    pub function: String,
    pub outcomes: Vec<EntryOutcome>,
}

impl ReconcileReport {
    /// 0 when every entry converged, 1 otherwise
    pub fn exit_code(&self) -> i32 {
        if self.outcomes.iter().all(EntryOutcome::is_ok) {
            0
        } else {
            1
        }
    }

    pub fn failed(&self) -> impl Iterator<Item = &EntryOutcome> {
        self.outcomes.iter().filter(|o| !o.is_ok())
    }
}

/// Read-only view of a function's wiring
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WiringStatus {
    pub function: String,
    pub qualified_arn: String,
    /// One entry per declared source; `None` when the binding is absent
    pub sources: Vec<(String, Option<SourceStatus>)>,
    pub permissions: Vec<PermissionStatement>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Pass {
    Wire,
    Unwire,
    Enable,
    Disable,
}

/// Wires and unwires declared event sources
#[derive(Debug, Clone)]
pub struct Reconciler {
    client: CloudClient,
    config: DeployConfig,
    span: Span,
}

impl Reconciler {
    pub fn new(client: CloudClient, config: DeployConfig) -> Self {
        Self {
            client,
            config,
            span: info_span!("reconcile"),
        }
    }

    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    /// Resolve `name` and its configured alias
    pub async fn resolve_function(&self, name: &str) -> DeployResult<FunctionRef> {
        let lambda = self.client.get_client(services::LAMBDA)?;
        let function = absent_if_not_found(
            lambda.call("get_function", json!({"FunctionName": name})).await,
        )?
        .ok_or_else(|| DeployError::FunctionNotFound(name.to_string()))?;
        let arn = required_str(&function["Configuration"], "get_function", "FunctionArn")?.to_string();

        let alias = &self.config.alias_name;
        let alias_response = absent_if_not_found(
            lambda
                .call("get_alias", json!({"FunctionName": name, "Name": alias}))
                .await,
        )?
        .ok_or_else(|| DeployError::FunctionNotFound(format!("{name}:{alias}")))?;
        let qualified = required_str(&alias_response, "get_alias", "AliasArn")?.to_string();

        debug!("Resolved {} to {}", name, qualified);
        FunctionRef::new(name, alias.clone(), arn, qualified)
    }

    /// Make every declared binding exist; entries marked `absent` are removed
    pub async fn wire(&self, function: &str, sources: &[EventSourceConfig]) -> DeployResult<ReconcileReport> {
        self.run(function, sources, Pass::Wire).await
    }

    /// Remove every declared binding
    pub async fn unwire(&self, function: &str, sources: &[EventSourceConfig]) -> DeployResult<ReconcileReport> {
        self.run(function, sources, Pass::Unwire).await
    }

    /// Enable every declared binding
    pub async fn enable(&self, function: &str, sources: &[EventSourceConfig]) -> DeployResult<ReconcileReport> {
        self.run(function, sources, Pass::Enable).await
    }

    /// Disable every declared binding
    pub async fn disable(&self, function: &str, sources: &[EventSourceConfig]) -> DeployResult<ReconcileReport> {
        self.run(function, sources, Pass::Disable).await
    }

    /// Live state of every declared binding plus the function's permissions
    pub async fn status(&self, function: &str, sources: &[EventSourceConfig]) -> DeployResult<WiringStatus> {
        async {
            let function = self.resolve_function(function).await?;
            let adapters = self.adapters(sources)?;
            let mut statuses = Vec::with_capacity(adapters.len());
            for (config, adapter) in sources.iter().zip(&adapters) {
                statuses.push((config.label(), adapter.status(&function).await?));
            }
            let lambda = self.client.get_client(services::LAMBDA)?;
            let permissions = PermissionGuard::statements(&lambda, &function).await?;
            Ok(WiringStatus {
                function: function.name,
                qualified_arn: function.qualified_arn,
                sources: statuses,
                permissions,
            })
        }
        .instrument(self.span.clone())
        .await
    }

    /// Unwire `sources`, delete the function and optionally its log group.
    ///
    /// The function is kept when any source failed to unwire.
    pub async fn delete_function(
        &self,
        function: &str,
        sources: &[EventSourceConfig],
        delete_logs: bool,
    ) -> DeployResult<ReconcileReport> {
        let report = self.unwire(function, sources).await?;
        if report.exit_code() != 0 {
            warn!("Keeping {}: {} sources failed to unwire", function, report.failed().count());
            return Ok(report);
        }
        async {
            info!("Deleting function {}", function);
            self.client
                .get_client(services::LAMBDA)?
                .call("delete_function", json!({"FunctionName": function}))
                .await?;
            if delete_logs {
                let group = format!("/aws/lambda/{function}");
                let deleted = absent_if_not_found(
                    self.client
                        .get_client(services::LOGS)?
                        .call("delete_log_group", json!({"logGroupName": group}))
                        .await,
                )?;
                if deleted.is_some() {
                    info!("Deleted log group {}", group);
                }
            }
            Ok(report)
        }
        .instrument(self.span.clone())
        .await
    }

    fn adapters(&self, sources: &[EventSourceConfig]) -> DeployResult<Vec<EventSource>> {
        sources
            .iter()
            .map(|config| EventSource::from_config(&self.client, config))
            .collect()
    }

    async fn run(&self, function: &str, sources: &[EventSourceConfig], pass: Pass) -> DeployResult<ReconcileReport> {
        async {
            let mut phase = StateMachineWithHistory::new(ReconcilePhase::NotStarted);
            let target = self.resolve_function(function).await?;
            advance(&mut phase, ReconcileInput::Resolve)?;
            let adapters = self.adapters(sources)?;

            let mut outcomes = Vec::with_capacity(adapters.len());
            for (config, adapter) in sources.iter().zip(&adapters) {
                advance(&mut phase, ReconcileInput::Dispatch)?;
                let outcome = match converge(adapter, config, &target, pass).await {
                    Ok(action) => {
                        debug!("{} {} ({})", adapter.kind(), adapter.source(), action);
                        EntryOutcome {
                            source: adapter.source(),
                            kind: adapter.kind(),
                            action,
                            error: None,
                        }
                    }
                    Err(e) if e.is_fatal() => return Err(e),
                    Err(e) => {
                        warn!("{} {} failed: {}", adapter.kind(), adapter.source(), e);
                        EntryOutcome {
                            source: adapter.source(),
                            kind: adapter.kind(),
                            action: EntryAction::Failed,
                            error: Some(e.to_string()),
                        }
                    }
                };
                advance(&mut phase, ReconcileInput::Settle { ok: outcome.is_ok() })?;
                outcomes.push(outcome);
            }
            advance(&mut phase, ReconcileInput::Finish)?;

            let report = ReconcileReport {
                function: target.name,
                outcomes,
            };
            info!(
                "{:?} of {}: {} entries, {} failed",
                pass,
                report.function,
                report.outcomes.len(),
                report.failed().count()
            );
            Ok(report)
        }
        .instrument(self.span.clone())
        .await
    }
}

fn advance(phase: &mut StateMachineWithHistory<ReconcilePhase>, input: ReconcileInput) -> DeployResult<()> {
    phase.apply(input)?;
    debug!("Phase {}", phase.current());
    Ok(())
}

async fn converge(
    adapter: &EventSource,
    config: &EventSourceConfig,
    function: &FunctionRef,
    pass: Pass,
) -> DeployResult<EntryAction> {
    let remove = pass == Pass::Unwire || (pass == Pass::Wire && config.ensure == Ensure::Absent);
    if remove {
        return if adapter.exists(function).await?.exists {
            adapter.remove(function).await?;
            Ok(EntryAction::Removed)
        } else {
            Ok(EntryAction::Unchanged)
        };
    }
    match pass {
        Pass::Enable => {
            adapter.enable(function).await?;
            Ok(EntryAction::Enabled)
        }
        Pass::Disable => {
            adapter.disable(function).await?;
            Ok(EntryAction::Disabled)
        }
        _ => {
            if adapter.exists(function).await?.exists {
                adapter.update(function).await?;
                Ok(EntryAction::Updated)
            } else {
                adapter.add(function).await?;
                Ok(EntryAction::Added)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outcome(error: Option<&str>) -> EntryOutcome {
        EntryOutcome {
            source: "arn:aws:s3:::b".into(),
            kind: EventSourceKind::Object,
            action: if error.is_some() { EntryAction::Failed } else { EntryAction::Added },
            error: error.map(str::to_string),
        }
    }

    #[test]
    fn test_exit_code_reflects_any_failure() {
        let mut report = ReconcileReport {
            function: "f".into(),
            outcomes: vec![outcome(None), outcome(None)],
        };
        assert_eq!(report.exit_code(), 0);
        report.outcomes.push(outcome(Some("boom")));
        assert_eq!(report.exit_code(), 1);
        assert_eq!(report.failed().count(), 1);
    }

    #[test]
    fn test_rejected_phase_aborts() {
        let mut phase = StateMachineWithHistory::new(ReconcilePhase::NotStarted);
        let err = advance(&mut phase, ReconcileInput::Dispatch).unwrap_err();
        assert!(matches!(err, DeployError::Transition(_)));
        assert!(err.is_fatal());
        advance(&mut phase, ReconcileInput::Resolve).unwrap();
        assert_eq!(*phase.current(), ReconcilePhase::FunctionResolved);
    }

    #[test]
    fn test_empty_report_succeeds() {
        let report = ReconcileReport {
            function: "f".into(),
            outcomes: Vec::new(),
        };
        assert_eq!(report.exit_code(), 0);
    }
}
