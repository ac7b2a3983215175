// Copyright (c) 2025 - Cowboy AI, Inc.
//! Change-set previews
//!
//! A preview creates a named change set, polls the change set's own status
//! until `CREATE_COMPLETE` or `FAILED`, reports the resource changes and
//! cleans up. Previewing a stack that does not exist yet leaves a
//! `REVIEW_IN_PROGRESS` stack behind, which is deleted again.

use serde_json::{json, Value};
use tracing::{debug, info, warn, Instrument};
use uuid::Uuid;

use super::events::ResourceChange;
use super::{describe_stack, StackDescriptor, StackLifecycle};
use crate::cloud::{from_response, ServiceHandle};
use crate::errors::{DeployError, DeployResult};

/// Whether the preview is for a new or an existing stack
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeSetType {
    Create,
    Update,
}

impl ChangeSetType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeSetType::Create => "CREATE",
            ChangeSetType::Update => "UPDATE",
        }
    }
}

/// Result of a preview
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Preview {
    pub change_set_name: String,
    pub change_set_type: ChangeSetType,
    pub changes: Vec<ResourceChange>,
    /// Why the change set failed, e.g. because nothing changes
    pub failure_reason: Option<String>,
}

enum Settled {
    Complete(Vec<ResourceChange>),
    Failed(Option<String>),
}

fn change_set_name() -> String {
    format!("preview-{}", Uuid::now_v7().simple())
}

impl StackLifecycle {
    /// Show what deploying `descriptor` would change without applying it
    pub async fn preview(&self, descriptor: &StackDescriptor) -> DeployResult<Preview> {
        async {
            let cfn = self.cfn()?;
            let kind = match describe_stack(&cfn, &descriptor.name).await? {
                Some(_) => ChangeSetType::Update,
                None => ChangeSetType::Create,
            };
            let name = change_set_name();

            let mut request = self.common_fields(descriptor).await?;
            request.insert("ChangeSetName".to_string(), json!(name));
            request.insert("ChangeSetType".to_string(), json!(kind.as_str()));

            info!("Creating {} change set {} for {}", kind.as_str(), name, descriptor.name);
            cfn.call("create_change_set", Value::Object(request)).await?;

            let settled = self.await_change_set(&cfn, &descriptor.name, &name).await;
            self.clean_up(&cfn, &descriptor.name, &name, kind).await;

            let preview = match settled? {
                Settled::Complete(changes) => {
                    self.reporter.changes(&changes);
                    Preview {
                        change_set_name: name,
                        change_set_type: kind,
                        changes,
                        failure_reason: None,
                    }
                }
                Settled::Failed(reason) => {
                    if let Some(reason) = &reason {
                        self.reporter.note(reason);
                    }
                    Preview {
                        change_set_name: name,
                        change_set_type: kind,
                        changes: Vec::new(),
                        failure_reason: reason,
                    }
                }
            };
            Ok(preview)
        }
        .instrument(self.span.clone())
        .await
    }

    async fn await_change_set(&self, cfn: &ServiceHandle, stack: &str, name: &str) -> DeployResult<Settled> {
        let cancel = self.client.cancellation();
        for _ in 0..self.config.wait_max_attempts {
            let response = cfn
                .call("describe_change_set", json!({"StackName": stack, "ChangeSetName": name}))
                .await?;
            match response["Status"].as_str().unwrap_or_default() {
                "CREATE_COMPLETE" => {
                    let changes = response["Changes"]
                        .as_array()
                        .map(|c| {
                            c.iter()
                                .filter_map(|change| change.get("ResourceChange").cloned())
                                .map(|change| from_response("describe_change_set", change))
                                .collect::<DeployResult<Vec<ResourceChange>>>()
                        })
                        .transpose()?
                        .unwrap_or_default();
                    return Ok(Settled::Complete(changes));
                }
                "FAILED" => {
                    let reason = response["StatusReason"].as_str().map(str::to_string);
                    warn!("Change set {} failed: {}", name, reason.as_deref().unwrap_or("-"));
                    return Ok(Settled::Failed(reason));
                }
                status => debug!("Change set {} is {}", name, status),
            }
            cancel.sleep(self.config.change_set_poll_interval).await?;
        }
        Err(DeployError::Timeout(format!("change set {name} of {stack}")))
    }

    /// Drop the change set, and the review stack a CREATE preview made
    async fn clean_up(&self, cfn: &ServiceHandle, stack: &str, name: &str, kind: ChangeSetType) {
        let result = match kind {
            ChangeSetType::Create => {
                debug!("Deleting review stack {}", stack);
                cfn.call_detached("delete_stack", json!({"StackName": stack})).await
            }
            ChangeSetType::Update => {
                cfn.call_detached("delete_change_set", json!({"StackName": stack, "ChangeSetName": name}))
                    .await
            }
        };
        if let Err(e) = result {
            warn!("Cleaning up change set {} of {} failed: {}", name, stack, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_change_set_names_are_unique_and_valid() {
        let a = change_set_name();
        let b = change_set_name();
        assert_ne!(a, b);
        assert!(a.starts_with("preview-"));
        assert!(a.chars().all(|c| c.is_ascii_alphanumeric() || c == '-'));
    }
}
