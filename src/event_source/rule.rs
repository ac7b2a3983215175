// Copyright (c) 2025 - Cowboy AI, Inc.
//! Schedule / pattern rule trigger
//!
//! The rule is looked up by a deterministic name: the declared `name`, or the
//! function name plus a digest of the expression. Removing only deletes our
//! targets; the rule itself goes away once it has no targets left.

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::{debug, info};

use super::permission::{deterministic_id, PermissionGuard};
use super::{
    absent_if_not_found, BindingState, EventSourceAdapter, EventSourceConfig, EventSourceKind,
    FunctionRef, SourceStatus,
};
use crate::cloud::{required_str, services, CloudClient, ServiceHandle};
use crate::errors::DeployResult;

const PRINCIPAL: &str = "events.amazonaws.com";
const MAX_NAME_LEN: usize = 64;

/// Rule-target binding
#[derive(Debug)]
pub struct RuleEventSource {
    events: ServiceHandle,
    lambda: ServiceHandle,
    name: Option<String>,
    schedule: Option<String>,
    pattern: Option<String>,
    description: Option<String>,
    enabled: bool,
}

/// Live rule as described by the provider
struct LiveRule {
    arn: String,
    state: String,
    schedule: Option<String>,
    pattern: Option<String>,
}

impl RuleEventSource {
    pub fn new(client: &CloudClient, config: &EventSourceConfig) -> DeployResult<Self> {
        Ok(Self {
            events: client.get_client(services::EVENTS)?,
            lambda: client.get_client(services::LAMBDA)?,
            name: config.name.clone(),
            schedule: config.schedule.clone(),
            pattern: config.pattern.as_ref().map(Value::to_string),
            description: config.description.clone(),
            enabled: config.enabled,
        })
    }

    /// Rule name for `function`
    pub fn rule_name(&self, function: &FunctionRef) -> String {
        if let Some(name) = &self.name {
            return name.clone();
        }
        let expression = self
            .schedule
            .as_deref()
            .or(self.pattern.as_deref())
            .unwrap_or_default();
        let digest = deterministic_id(&[expression]).simple().to_string();
        let mut name = format!("{}-{}", function.name, &digest[..8]);
        if name.len() > MAX_NAME_LEN {
            name = name[name.len() - MAX_NAME_LEN..].to_string();
        }
        name
    }

    fn target_id(function: &FunctionRef) -> String {
        deterministic_id(&[&function.qualified_arn]).simple().to_string()
    }

    fn state(&self) -> &'static str {
        if self.enabled {
            "ENABLED"
        } else {
            "DISABLED"
        }
    }

    async fn describe(&self, name: &str) -> DeployResult<Option<LiveRule>> {
        let response =
            absent_if_not_found(self.events.call("describe_rule", json!({"Name": name})).await)?;
        Ok(response.map(|r| LiveRule {
            arn: r["Arn"].as_str().unwrap_or_default().to_string(),
            state: r["State"].as_str().unwrap_or_default().to_string(),
            schedule: r["ScheduleExpression"].as_str().map(str::to_string),
            pattern: r["EventPattern"].as_str().map(str::to_string),
        }))
    }

    async fn targets(&self, name: &str) -> DeployResult<Vec<Value>> {
        Ok(absent_if_not_found(
            self.events
                .paginate("list_targets_by_rule", json!({"Rule": name}), "Targets")
                .await,
        )?
        .unwrap_or_default())
    }

    fn permission(&self, rule_arn: &str) -> PermissionGuard {
        PermissionGuard::new(self.lambda.clone(), PRINCIPAL, rule_arn)
    }
}

#[async_trait]
impl EventSourceAdapter for RuleEventSource {
    fn kind(&self) -> EventSourceKind {
        EventSourceKind::Rule
    }

    fn source(&self) -> String {
        self.name
            .clone()
            .or_else(|| self.schedule.clone())
            .or_else(|| self.pattern.clone())
            .unwrap_or_default()
    }

    async fn exists(&self, function: &FunctionRef) -> DeployResult<BindingState> {
        let name = self.rule_name(function);
        let Some(rule) = self.describe(&name).await? else {
            return Ok(BindingState::absent());
        };
        let targeted = self
            .targets(&name)
            .await?
            .iter()
            .any(|t| t["Arn"] == function.qualified_arn.as_str());
        if !targeted {
            return Ok(BindingState::absent());
        }
        let matches = rule.schedule == self.schedule
            && rule.pattern == self.pattern
            && rule.state == self.state();
        Ok(BindingState::found(name, matches))
    }

    async fn add(&self, function: &FunctionRef) -> DeployResult<()> {
        let name = self.rule_name(function);
        let mut request = json!({"Name": name, "State": self.state()});
        if let Some(schedule) = &self.schedule {
            request["ScheduleExpression"] = json!(schedule);
        }
        if let Some(pattern) = &self.pattern {
            request["EventPattern"] = json!(pattern);
        }
        if let Some(description) = &self.description {
            request["Description"] = json!(description);
        }
        let response = self.events.call("put_rule", request).await?;
        let rule_arn = required_str(&response, "put_rule", "RuleArn")?.to_string();

        let permission = self.permission(&rule_arn);
        let granted = permission.grant(function).await?;
        let targeted = self
            .events
            .call(
                "put_targets",
                json!({
                    "Rule": name,
                    "Targets": [{"Id": Self::target_id(function), "Arn": function.qualified_arn}],
                }),
            )
            .await;
        if let Err(e) = targeted {
            permission.undo(function, granted).await;
            return Err(e);
        }
        info!("Wired rule {} to {}", name, function.qualified_arn);
        Ok(())
    }

    async fn remove(&self, function: &FunctionRef) -> DeployResult<()> {
        let name = self.rule_name(function);
        let Some(rule) = self.describe(&name).await? else {
            return Ok(());
        };
        let targets = self.targets(&name).await?;
        let ours: Vec<&str> = targets
            .iter()
            .filter(|t| t["Arn"] == function.qualified_arn.as_str())
            .filter_map(|t| t["Id"].as_str())
            .collect();
        if !ours.is_empty() {
            self.events
                .call("remove_targets", json!({"Rule": name, "Ids": ours}))
                .await?;
        }
        self.permission(&rule.arn).revoke(function).await?;

        if ours.len() == targets.len() {
            absent_if_not_found(self.events.call("delete_rule", json!({"Name": name})).await)?;
            info!("Deleted rule {}", name);
        } else {
            debug!("Rule {} still has {} other target(s)", name, targets.len() - ours.len());
        }
        Ok(())
    }

    async fn status(&self, function: &FunctionRef) -> DeployResult<Option<SourceStatus>> {
        let name = self.rule_name(function);
        let Some(rule) = self.describe(&name).await? else {
            return Ok(None);
        };
        Ok(Some(SourceStatus {
            kind: self.kind(),
            source: rule.arn,
            handle: Some(name),
            enabled: rule.state == "ENABLED",
        }))
    }

    async fn enable(&self, function: &FunctionRef) -> DeployResult<()> {
        let name = self.rule_name(function);
        if self.describe(&name).await?.is_none() {
            return self.add(function).await;
        }
        self.events.call("enable_rule", json!({"Name": name})).await?;
        info!("Enabled rule {}", name);
        Ok(())
    }

    async fn disable(&self, function: &FunctionRef) -> DeployResult<()> {
        let name = self.rule_name(function);
        if self.describe(&name).await?.is_none() {
            return Ok(());
        }
        self.events.call("disable_rule", json!({"Name": name})).await?;
        info!("Disabled rule {}", name);
        Ok(())
    }
}
