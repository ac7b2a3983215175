// Copyright (c) 2025 - Cowboy AI, Inc.
//! Stack Lifecycle
//!
//! Drives create, update and delete of a resource stack. Every operation
//! submits one request and then follows the stack's event stream until the
//! stack itself reaches a terminal status.
//!
//! ```text
//! deploy ─┬─ absent ──> create_stack ─┐
//!         └─ present ─> update_stack ─┼──> EventPoller ──> StackOutcome
//! delete ───────────────> delete_stack ┘        │
//!                                               └─ EventReporter (console / recording)
//! ```
//!
//! Cancelling while an update is being polled sends `cancel_update_stack`
//! before the cancellation is returned to the caller.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use cim_deploy::cloud::{memory::InMemoryCloud, CloudClient};
//! use cim_deploy::stack::{ConsoleReporter, StackDescriptor, StackLifecycle};
//! use cim_deploy::DeployConfig;
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = DeployConfig::default();
//!     let client = CloudClient::new(Arc::new(InMemoryCloud::new()), &config);
//!     let stacks = StackLifecycle::new(client, config, Arc::new(ConsoleReporter));
//!
//!     let descriptor = StackDescriptor::new("orders", json!({"Resources": {}}))
//!         .with_parameter("Environment", "prod");
//!     let outcome = stacks.deploy(&descriptor).await?;
//!     std::process::exit(outcome.exit_code);
//! }
//! ```

pub mod change_set;
pub mod events;
pub mod reporter;
pub mod status;
pub mod template;

pub use change_set::{ChangeSetType, Preview};
pub use events::{ResourceChange, StackEvent, StackOutcome};
pub use reporter::{ConsoleReporter, EventReporter, Recorded, RecordingReporter};
pub use status::{StackOperation, StackStatus, StatusClass};
pub use template::{resolve, Parameters};

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tracing::{debug, info, info_span, warn, Instrument, Span};

use crate::cloud::{required_str, services, CloudClient, ServiceHandle};
use crate::config::DeployConfig;
use crate::errors::{DeployError, DeployResult};
use crate::event_source::absent_if_not_found;
use events::{fetch_events, Cutoff, EventPoller};

/// Capability every stack needs to create its roles
pub const DEFAULT_CAPABILITY: &str = "CAPABILITY_IAM";

/// Object key prefix for uploaded templates
pub const TEMPLATE_KEY_PREFIX: &str = "kumo";

/// Note printed when an update changes nothing
pub const NO_UPDATES: &str = "No updates are to be performed.";

fn default_capabilities() -> Vec<String> {
    vec![DEFAULT_CAPABILITY.to_string()]
}

/// A stack operation request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StackDescriptor {
    pub name: String,
    /// Ordered (key, value) parameter list
    #[serde(default)]
    pub parameters: Vec<(String, String)>,
    /// Template document; a string is submitted verbatim
    pub template: Value,
    #[serde(default)]
    pub role_arn: Option<String>,
    #[serde(default)]
    pub notification_arns: Vec<String>,
    #[serde(default = "default_capabilities")]
    pub capabilities: Vec<String>,
    /// Policy in force outside updates; [`default_stack_policy`] when unset
    #[serde(default)]
    pub stack_policy: Option<Value>,
    /// Policy in force during one update
    #[serde(default)]
    pub stack_policy_during_update: Option<Value>,
    /// Allow every update action for this update
    #[serde(default)]
    pub override_stack_policy: bool,
    /// Bucket for templates too large to submit inline
    #[serde(default)]
    pub artifact_bucket: Option<String>,
}

impl StackDescriptor {
    pub fn new(name: impl Into<String>, template: Value) -> Self {
        Self {
            name: name.into(),
            parameters: Vec::new(),
            template,
            role_arn: None,
            notification_arns: Vec::new(),
            capabilities: default_capabilities(),
            stack_policy: None,
            stack_policy_during_update: None,
            override_stack_policy: false,
            artifact_bucket: None,
        }
    }

    pub fn with_parameter(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.parameters.push((key.into(), value.into()));
        self
    }

    pub fn with_role_arn(mut self, arn: impl Into<String>) -> Self {
        self.role_arn = Some(arn.into());
        self
    }

    pub fn with_notification_arn(mut self, arn: impl Into<String>) -> Self {
        self.notification_arns.push(arn.into());
        self
    }

    pub fn with_artifact_bucket(mut self, bucket: impl Into<String>) -> Self {
        self.artifact_bucket = Some(bucket.into());
        self
    }

    pub fn with_stack_policy(mut self, policy: Value) -> Self {
        self.stack_policy = Some(policy);
        self
    }

    pub fn overriding_stack_policy(mut self) -> Self {
        self.override_stack_policy = true;
        self
    }

    fn template_body(&self) -> DeployResult<String> {
        match &self.template {
            Value::String(raw) => Ok(raw.clone()),
            other => Ok(serde_json::to_string(other)?),
        }
    }
}

fn policy_statement(effect: &str, action: Value) -> Value {
    json!({
        "Effect": effect,
        "Action": action,
        "Principal": "*",
        "Resource": "*",
    })
}

/// Allow in-place modification, forbid replacement and deletion
pub fn default_stack_policy() -> Value {
    json!({"Statement": [
        policy_statement("Allow", json!("Update:Modify")),
        policy_statement("Deny", json!(["Update:Replace", "Update:Delete"])),
    ]})
}

/// Allow every update action
pub fn override_stack_policy() -> Value {
    json!({"Statement": [policy_statement("Allow", json!("Update:*"))]})
}

/// One resource of a live stack
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct StackResource {
    pub logical_resource_id: String,
    #[serde(default)]
    pub physical_resource_id: Option<String>,
    pub resource_type: String,
    #[serde(default, rename = "ResourceStatus")]
    pub status: Option<StackStatus>,
}

/// A parameter whose live value differs from the declared one
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ParameterChange {
    pub key: String,
    pub live: Option<String>,
    pub declared: Option<String>,
}

/// Stack summary from `describe_stacks`
#[derive(Debug, Clone)]
pub(crate) struct LiveStack {
    pub id: String,
    pub status: StackStatus,
    pub parameters: Parameters,
    pub raw: Value,
}

/// Look up a live stack; `None` when it does not exist
pub(crate) async fn describe_stack(cfn: &ServiceHandle, name: &str) -> DeployResult<Option<LiveStack>> {
    let response =
        absent_if_not_found(cfn.call("describe_stacks", json!({"StackName": name})).await)?;
    let Some(stack) = response.and_then(|r| r["Stacks"].get(0).cloned()) else {
        return Ok(None);
    };
    let status = StackStatus::parse(stack["StackStatus"].as_str().unwrap_or_default());
    if status == StackStatus::DeleteComplete {
        return Ok(None);
    }
    Ok(Some(LiveStack {
        id: required_str(&stack, "describe_stacks", "StackId")?.to_string(),
        status,
        parameters: template::parameters_from(&stack["Parameters"]),
        raw: stack,
    }))
}

/// Every resource of a stack
pub(crate) async fn list_resources(cfn: &ServiceHandle, name: &str) -> DeployResult<Vec<StackResource>> {
    cfn.paginate(
        "list_stack_resources",
        json!({"StackName": name}),
        "StackResourceSummaries",
    )
    .await?
    .into_iter()
    .map(|r| crate::cloud::from_response("list_stack_resources", r))
    .collect()
}

/// Create, update, delete and preview stacks
#[derive(Clone)]
pub struct StackLifecycle {
    client: CloudClient,
    config: DeployConfig,
    reporter: Arc<dyn EventReporter>,
    span: Span,
}

impl StackLifecycle {
    pub fn new(client: CloudClient, config: DeployConfig, reporter: Arc<dyn EventReporter>) -> Self {
        Self {
            client,
            config,
            reporter,
            span: info_span!("stack"),
        }
    }

    /// Log under `span` instead of the default `stack` span
    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    fn cfn(&self) -> DeployResult<ServiceHandle> {
        self.client.get_client(services::CLOUDFORMATION)
    }

    fn poller<'a>(&'a self, cfn: &'a ServiceHandle, name: &'a str, id: &'a str) -> EventPoller<'a> {
        EventPoller {
            cfn,
            cancel: self.client.cancellation(),
            reporter: self.reporter.as_ref(),
            interval: self.config.stack_poll_interval,
            stack_name: name,
            stack_id: id,
        }
    }

    /// Whether a live stack named `name` exists
    pub async fn exists(&self, name: &str) -> DeployResult<bool> {
        let cfn = self.cfn()?;
        Ok(describe_stack(&cfn, name).instrument(self.span.clone()).await?.is_some())
    }

    /// Create when absent, update otherwise
    pub async fn deploy(&self, descriptor: &StackDescriptor) -> DeployResult<StackOutcome> {
        if self.exists(&descriptor.name).await? {
            self.update(descriptor).await
        } else {
            self.create(descriptor).await
        }
    }

    /// Submit a new stack and follow it to a terminal status
    pub async fn create(&self, descriptor: &StackDescriptor) -> DeployResult<StackOutcome> {
        async {
            let cfn = self.cfn()?;
            let request = self.request(descriptor, StackOperation::Create).await?;
            info!("Creating stack {}", descriptor.name);
            let response = cfn.call("create_stack", request).await?;
            let id = required_str(&response, "create_stack", "StackId")?.to_string();

            let outcome = self
                .poller(&cfn, &descriptor.name, &id)
                .run(StackOperation::Create, Cutoff::default())
                .await?;
            self.log_outcome(&descriptor.name, &outcome);
            Ok(outcome)
        }
        .instrument(self.span.clone())
        .await
    }

    /// Update a live stack and follow it to a terminal status.
    ///
    /// "No updates are to be performed" is a success without events.
    /// The update request itself always completes; cancellation observed
    /// after it was accepted sends `cancel_update_stack` first.
    pub async fn update(&self, descriptor: &StackDescriptor) -> DeployResult<StackOutcome> {
        async {
            let cfn = self.cfn()?;
            let cancel = self.client.cancellation();
            let live = describe_stack(&cfn, &descriptor.name)
                .await?
                .ok_or_else(|| DeployError::StackNotFound(descriptor.name.clone()))?;
            let cutoff = Cutoff::from_history(&fetch_events(&cfn, &live.id).await?);
            let request = self.request(descriptor, StackOperation::Update).await?;
            cancel.check()?;

            info!("Updating stack {}", descriptor.name);
            match cfn.call_detached("update_stack", request).await {
                Ok(_) => {}
                Err(DeployError::Cloud(e)) if e.is_no_updates() => {
                    info!("Stack {} is up to date", descriptor.name);
                    self.reporter.note(NO_UPDATES);
                    return Ok(StackOutcome::unchanged());
                }
                Err(e) => return Err(e),
            }
            if cancel.is_cancelled() {
                return Err(self.cancel_update(&cfn, &descriptor.name, &live.id).await);
            }

            let result = self
                .poller(&cfn, &descriptor.name, &live.id)
                .run(StackOperation::Update, cutoff)
                .await;
            match result {
                Err(DeployError::Cancelled) => {
                    Err(self.cancel_update(&cfn, &descriptor.name, &live.id).await)
                }
                other => {
                    if let Ok(outcome) = &other {
                        self.log_outcome(&descriptor.name, outcome);
                    }
                    other
                }
            }
        }
        .instrument(self.span.clone())
        .await
    }

    /// Roll back an accepted update; yields the error to return
    async fn cancel_update(&self, cfn: &ServiceHandle, name: &str, id: &str) -> DeployError {
        warn!("Update of {} cancelled, rolling back", name);
        if let Err(e) = cfn
            .call_detached("cancel_update_stack", json!({"StackName": id}))
            .await
        {
            warn!("cancel_update_stack for {} failed: {}", name, e);
        }
        DeployError::Cancelled
    }

    /// Delete a live stack and follow it to a terminal status
    pub async fn delete(&self, name: &str) -> DeployResult<StackOutcome> {
        async {
            let cfn = self.cfn()?;
            let live = describe_stack(&cfn, name)
                .await?
                .ok_or_else(|| DeployError::StackNotFound(name.to_string()))?;
            let cutoff = Cutoff::from_history(&fetch_events(&cfn, &live.id).await?);

            info!("Deleting stack {}", name);
            cfn.call("delete_stack", json!({"StackName": live.id})).await?;
            let outcome = self
                .poller(&cfn, name, &live.id)
                .run(StackOperation::Delete, cutoff)
                .await?;
            self.log_outcome(name, &outcome);
            Ok(outcome)
        }
        .instrument(self.span.clone())
        .await
    }

    /// Outputs of a live stack by key
    pub async fn outputs(&self, name: &str) -> DeployResult<BTreeMap<String, String>> {
        let cfn = self.cfn()?;
        let live = describe_stack(&cfn, name)
            .await?
            .ok_or_else(|| DeployError::StackNotFound(name.to_string()))?;
        Ok(live.raw["Outputs"]
            .as_array()
            .map(|outputs| {
                outputs
                    .iter()
                    .filter_map(|o| {
                        Some((
                            o["OutputKey"].as_str()?.to_string(),
                            o["OutputValue"].as_str()?.to_string(),
                        ))
                    })
                    .collect()
            })
            .unwrap_or_default())
    }

    /// Resources of a live stack
    pub async fn resources(&self, name: &str) -> DeployResult<Vec<StackResource>> {
        let cfn = self.cfn()?;
        list_resources(&cfn, name).await
    }

    /// Parameters whose live value differs from the descriptor.
    ///
    /// A live value starting with `***` is a masked NoEcho value and never
    /// counts as a difference.
    pub async fn parameter_diff(&self, descriptor: &StackDescriptor) -> DeployResult<Vec<ParameterChange>> {
        let cfn = self.cfn()?;
        let live = describe_stack(&cfn, &descriptor.name)
            .await?
            .map(|s| s.parameters)
            .unwrap_or_default();
        Ok(diff_parameters(&live, &descriptor.parameters))
    }

    fn log_outcome(&self, name: &str, outcome: &StackOutcome) {
        match &outcome.status {
            Some(status) if outcome.is_success() => info!("Stack {} finished with {}", name, status),
            Some(status) => warn!("Stack {} finished with {}", name, status),
            None => debug!("Stack {} produced no status", name),
        }
    }

    /// Template reference: inline body, or an uploaded object when too large
    async fn template_fields(&self, descriptor: &StackDescriptor) -> DeployResult<Map<String, Value>> {
        let body = descriptor.template_body()?;
        let mut fields = Map::new();
        if body.len() <= self.config.inline_template_limit {
            fields.insert("TemplateBody".to_string(), Value::String(body));
            return Ok(fields);
        }

        let bucket = descriptor.artifact_bucket.as_deref().ok_or_else(|| {
            DeployError::Configuration(format!(
                "template of {} is {} bytes, above the {} byte inline limit, and no artifact bucket is set",
                descriptor.name,
                body.len(),
                self.config.inline_template_limit
            ))
        })?;
        let region = self.client.region();
        let key = format!("{}/{}/{}-cloudformation.json", TEMPLATE_KEY_PREFIX, region, descriptor.name);
        debug!("Uploading template to s3://{}/{}", bucket, key);
        self.client
            .get_client(services::S3)?
            .call("put_object", json!({"Bucket": bucket, "Key": key, "Body": body}))
            .await?;
        fields.insert(
            "TemplateURL".to_string(),
            Value::String(format!("https://s3-{region}.amazonaws.com/{bucket}/{key}")),
        );
        Ok(fields)
    }

    /// Fields shared by stack requests and change sets
    async fn common_fields(&self, descriptor: &StackDescriptor) -> DeployResult<Map<String, Value>> {
        let mut fields = self.template_fields(descriptor).await?;
        fields.insert("StackName".to_string(), json!(descriptor.name));
        let parameters: Vec<Value> = descriptor
            .parameters
            .iter()
            .map(|(k, v)| json!({"ParameterKey": k, "ParameterValue": v, "UsePreviousValue": false}))
            .collect();
        fields.insert("Parameters".to_string(), Value::Array(parameters));
        fields.insert("Capabilities".to_string(), json!(descriptor.capabilities));
        if let Some(role) = &descriptor.role_arn {
            fields.insert("RoleARN".to_string(), json!(role));
        }
        if !descriptor.notification_arns.is_empty() {
            fields.insert("NotificationARNs".to_string(), json!(descriptor.notification_arns));
        }
        Ok(fields)
    }

    async fn request(&self, descriptor: &StackDescriptor, operation: StackOperation) -> DeployResult<Value> {
        let mut fields = self.common_fields(descriptor).await?;
        let policy = descriptor.stack_policy.clone().unwrap_or_else(default_stack_policy);
        fields.insert("StackPolicyBody".to_string(), Value::String(policy.to_string()));

        if operation == StackOperation::Update {
            let during = match (&descriptor.stack_policy_during_update, descriptor.override_stack_policy) {
                (Some(policy), _) => Some(policy.clone()),
                (None, true) => Some(override_stack_policy()),
                (None, false) => None,
            };
            if let Some(during) = during {
                fields.insert(
                    "StackPolicyDuringUpdateBody".to_string(),
                    Value::String(during.to_string()),
                );
            }
        }
        Ok(Value::Object(fields))
    }
}

/// Compare live parameters to declared ones, ignoring masked values
pub fn diff_parameters(live: &Parameters, declared: &[(String, String)]) -> Vec<ParameterChange> {
    let mut changes = Vec::new();
    for (key, value) in declared {
        match live.get(key) {
            Some(old) if old.starts_with("***") || old == value => {}
            old => changes.push(ParameterChange {
                key: key.clone(),
                live: old.cloned(),
                declared: Some(value.clone()),
            }),
        }
    }
    let mut removed: Vec<&String> = live
        .keys()
        .filter(|k| !declared.iter().any(|(d, _)| d == *k))
        .collect();
    removed.sort();
    for key in removed {
        changes.push(ParameterChange {
            key: key.clone(),
            live: live.get(key).cloned(),
            declared: None,
        });
    }
    changes
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_default_policy_denies_replacement() {
        let policy = default_stack_policy();
        let statements = policy["Statement"].as_array().unwrap();
        assert_eq!(statements[0]["Action"], "Update:Modify");
        assert_eq!(statements[1]["Effect"], "Deny");
        assert_eq!(statements[1]["Action"], json!(["Update:Replace", "Update:Delete"]));
    }

    #[test]
    fn test_masked_parameters_are_not_changes() {
        let live: Parameters = [
            ("Password".to_string(), "****".to_string()),
            ("Size".to_string(), "2".to_string()),
            ("Legacy".to_string(), "x".to_string()),
        ]
        .into_iter()
        .collect();
        let declared = vec![
            ("Password".to_string(), "hunter2".to_string()),
            ("Size".to_string(), "3".to_string()),
        ];

        assert_eq!(
            diff_parameters(&live, &declared),
            vec![
                ParameterChange {
                    key: "Size".into(),
                    live: Some("2".into()),
                    declared: Some("3".into()),
                },
                ParameterChange {
                    key: "Legacy".into(),
                    live: Some("x".into()),
                    declared: None,
                },
            ]
        );
    }

    #[test]
    fn test_descriptor_deserializes_with_defaults() {
        let descriptor: StackDescriptor =
            serde_json::from_value(json!({"name": "s", "template": {"Resources": {}}})).unwrap();
        assert_eq!(descriptor.capabilities, vec!["CAPABILITY_IAM".to_string()]);
        assert!(!descriptor.override_stack_policy);
        assert_eq!(descriptor.template_body().unwrap(), r#"{"Resources":{}}"#);
    }
}
