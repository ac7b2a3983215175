// Copyright (c) 2025 - Cowboy AI, Inc.
//! Stack event stream polling
//!
//! Each tick re-reads the stack's event list (newest first), drops events
//! already seen or older than the cutoff, and processes the rest oldest first.
//! Events of the stack's own logical id drive the [`StackPhase`] machine; the
//! loop ends once that machine is terminal.

use std::collections::HashSet;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, error, warn};

use super::reporter::EventReporter;
use super::status::{StackOperation, StackStatus, StatusClass};
use crate::cancel::Cancellation;
use crate::cloud::{from_response, ServiceHandle};
use crate::errors::DeployResult;
use crate::state_machine::{StackInput, StackPhase, StateMachine, StateMachineWithHistory};

/// One lifecycle event from the stack's event stream
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct StackEvent {
    pub event_id: String,
    pub logical_resource_id: String,
    #[serde(rename = "ResourceStatus")]
    pub status: StackStatus,
    #[serde(rename = "ResourceStatusReason", default)]
    pub reason: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// One entry of a change set
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ResourceChange {
    pub action: String,
    pub logical_resource_id: String,
    #[serde(default)]
    pub physical_resource_id: Option<String>,
    #[serde(default)]
    pub resource_type: String,
    #[serde(default)]
    pub replacement: Option<String>,
}

/// Result of a finished stack operation
#[derive(Debug, Clone, PartialEq)]
pub struct StackOutcome {
    /// Last status of the stack itself; `None` when nothing was submitted
    pub status: Option<StackStatus>,
    /// Every event processed, oldest first
    pub events: Vec<StackEvent>,
    /// Phases the operation went through
    pub phases: Vec<StackPhase>,
    /// 0 on success, 1 otherwise
    pub exit_code: i32,
}

impl StackOutcome {
    /// An operation that had nothing to do
    pub fn unchanged() -> Self {
        Self {
            status: None,
            events: Vec::new(),
            phases: Vec::new(),
            exit_code: 0,
        }
    }

    pub fn is_success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Newest events first, as the provider returns them
pub(crate) async fn fetch_events(cfn: &ServiceHandle, stack: &str) -> DeployResult<Vec<StackEvent>> {
    let response = cfn
        .call("describe_stack_events", json!({"StackName": stack}))
        .await?;
    let events = response.get("StackEvents").cloned().unwrap_or(Value::Array(Vec::new()));
    from_response("describe_stack_events", events)
}

/// Polls one stack's event stream until the stack reaches a terminal status
pub(crate) struct EventPoller<'a> {
    pub cfn: &'a ServiceHandle,
    pub cancel: &'a Cancellation,
    pub reporter: &'a dyn EventReporter,
    pub interval: Duration,
    pub stack_name: &'a str,
    /// Stack id; stays addressable after deletion
    pub stack_id: &'a str,
}

/// Events that predate the operation
#[derive(Debug, Default)]
pub(crate) struct Cutoff {
    pub seen: HashSet<String>,
    pub after: Option<DateTime<Utc>>,
}

impl Cutoff {
    /// Everything currently in the stream is history
    pub fn from_history(events: &[StackEvent]) -> Self {
        Self {
            seen: events.iter().map(|e| e.event_id.clone()).collect(),
            after: events.iter().map(|e| e.timestamp).max(),
        }
    }

    fn admits(&self, event: &StackEvent) -> bool {
        !self.seen.contains(&event.event_id) && self.after.map_or(true, |t| event.timestamp > t)
    }
}

impl EventPoller<'_> {
    pub async fn run(&self, operation: StackOperation, mut cutoff: Cutoff) -> DeployResult<StackOutcome> {
        let mut phase = StateMachineWithHistory::new(StackPhase::None);
        phase.apply(StackInput::Submit(operation))?;
        let mut log = Vec::new();
        let mut last_status = None;

        self.reporter.header();
        loop {
            let events = fetch_events(self.cfn, self.stack_id).await?;
            for event in events.into_iter().rev() {
                if !cutoff.admits(&event) {
                    continue;
                }
                cutoff.seen.insert(event.event_id.clone());

                let class = event.status.classify();
                match class {
                    StatusClass::Failure => error!(
                        "{} {} {}",
                        event.logical_resource_id,
                        event.status,
                        event.reason.as_deref().unwrap_or("")
                    ),
                    StatusClass::Warning => warn!("{} {}", event.logical_resource_id, event.status),
                    _ => debug!("{} {}", event.logical_resource_id, event.status),
                }
                self.reporter.event(&event, class);

                if event.logical_resource_id == self.stack_name && !phase.current().is_terminal() {
                    last_status = Some(event.status.clone());
                    phase.apply(StackInput::Observe(event.status.clone()))?;
                }
                log.push(event);
            }

            if phase.current().is_terminal() {
                break;
            }
            self.cancel.sleep(self.interval).await?;
        }

        let exit_code = phase.current().exit_code();
        if exit_code != 0 {
            self.reporter.failed(&log);
        }
        Ok(StackOutcome {
            status: last_status,
            events: log,
            phases: phase.path(),
            exit_code,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(id: &str, seconds: i64) -> StackEvent {
        StackEvent {
            event_id: id.to_string(),
            logical_resource_id: "s".to_string(),
            status: StackStatus::UpdateInProgress,
            reason: None,
            timestamp: DateTime::<Utc>::from_timestamp(seconds, 0).unwrap(),
        }
    }

    #[test]
    fn test_cutoff_rejects_history_and_older_events() {
        let cutoff = Cutoff::from_history(&[event("a", 10), event("b", 20)]);
        assert!(!cutoff.admits(&event("a", 30)));
        assert!(!cutoff.admits(&event("c", 15)));
        assert!(cutoff.admits(&event("d", 21)));
    }

    #[test]
    fn test_event_deserializes_provider_shape() {
        let raw = json!({
            "EventId": "e1",
            "StackName": "s",
            "LogicalResourceId": "s",
            "ResourceStatus": "UPDATE_COMPLETE",
            "Timestamp": "2026-01-19T12:00:01+00:00",
        });
        let event: StackEvent = serde_json::from_value(raw).unwrap();
        assert_eq!(event.status, StackStatus::UpdateComplete);
        assert_eq!(event.reason, None);
    }
}
