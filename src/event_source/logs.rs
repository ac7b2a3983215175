// Copyright (c) 2025 - Cowboy AI, Inc.
//! Log subscription filter trigger
//!
//! Every log group whose name starts with the declared prefix gets a
//! subscription filter named `filter_name` pointing at the function. One
//! permission statement covers all of them through a wildcard source ARN.

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::info;

use super::permission::PermissionGuard;
use super::{
    absent_if_not_found, BindingState, EventSourceAdapter, EventSourceConfig, EventSourceKind,
    FunctionRef, SourceStatus,
};
use crate::cloud::{services, CloudClient, ServiceHandle};
use crate::errors::{DeployError, DeployResult};

/// Continuation key of the logs API
const NEXT_TOKEN: &str = "nextToken";

/// Log subscription binding
#[derive(Debug)]
pub struct LogSubscriptionSource {
    logs: ServiceHandle,
    lambda: ServiceHandle,
    prefix: String,
    filter_name: String,
    filter_pattern: String,
}

impl LogSubscriptionSource {
    pub fn new(client: &CloudClient, config: &EventSourceConfig) -> DeployResult<Self> {
        Ok(Self {
            logs: client.get_client(services::LOGS)?,
            lambda: client.get_client(services::LAMBDA)?,
            prefix: config.log_group_name_prefix.clone().unwrap_or_default(),
            filter_name: config.filter_name.clone().unwrap_or_default(),
            filter_pattern: config.filter_pattern.clone().unwrap_or_default(),
        })
    }

    fn permission(&self, function: &FunctionRef) -> PermissionGuard {
        let principal = format!("logs.{}.amazonaws.com", function.region);
        let source = format!(
            "arn:aws:logs:{}:{}:log-group:{}*",
            function.region, function.account, self.prefix
        );
        PermissionGuard::new(self.lambda.clone(), principal, source)
    }

    async fn groups(&self) -> DeployResult<Vec<String>> {
        let groups = self
            .logs
            .paginate_by(
                "describe_log_groups",
                json!({"logGroupNamePrefix": self.prefix}),
                "logGroups",
                NEXT_TOKEN,
            )
            .await?;
        Ok(groups
            .iter()
            .filter_map(|g| g["logGroupName"].as_str().map(str::to_string))
            .collect())
    }

    /// Our filter on `group`, if present
    async fn filter(&self, group: &str, function: &FunctionRef) -> DeployResult<Option<Value>> {
        let filters = absent_if_not_found(
            self.logs
                .paginate_by(
                    "describe_subscription_filters",
                    json!({"logGroupName": group}),
                    "subscriptionFilters",
                    NEXT_TOKEN,
                )
                .await,
        )?;
        Ok(filters.and_then(|filters| {
            filters.into_iter().find(|f| {
                f["filterName"] == self.filter_name.as_str()
                    && f["destinationArn"] == function.qualified_arn.as_str()
            })
        }))
    }

    async fn subscribe(&self, groups: &[String], function: &FunctionRef) -> DeployResult<()> {
        for group in groups {
            self.logs
                .call(
                    "put_subscription_filter",
                    json!({
                        "logGroupName": group,
                        "filterName": self.filter_name,
                        "filterPattern": self.filter_pattern,
                        "destinationArn": function.qualified_arn,
                    }),
                )
                .await?;
            info!("Subscribed {} to log group {}", function.qualified_arn, group);
        }
        Ok(())
    }
}

#[async_trait]
impl EventSourceAdapter for LogSubscriptionSource {
    fn kind(&self) -> EventSourceKind {
        EventSourceKind::LogSubscription
    }

    fn source(&self) -> String {
        format!("{}*", self.prefix)
    }

    async fn exists(&self, function: &FunctionRef) -> DeployResult<BindingState> {
        for group in self.groups().await? {
            if let Some(filter) = self.filter(&group, function).await? {
                let matches = filter["filterPattern"] == self.filter_pattern.as_str();
                return Ok(BindingState::found(&self.filter_name, matches));
            }
        }
        Ok(BindingState::absent())
    }

    async fn add(&self, function: &FunctionRef) -> DeployResult<()> {
        let groups = self.groups().await?;
        if groups.is_empty() {
            return Err(DeployError::SourceNotFound(format!(
                "no log group matches {}*",
                self.prefix
            )));
        }
        let permission = self.permission(function);
        let granted = permission.grant(function).await?;
        if let Err(e) = self.subscribe(&groups, function).await {
            permission.undo(function, granted).await;
            return Err(e);
        }
        Ok(())
    }

    async fn remove(&self, function: &FunctionRef) -> DeployResult<()> {
        for group in self.groups().await? {
            if self.filter(&group, function).await?.is_none() {
                continue;
            }
            absent_if_not_found(
                self.logs
                    .call(
                        "delete_subscription_filter",
                        json!({"logGroupName": group, "filterName": self.filter_name}),
                    )
                    .await,
            )?;
            info!("Removed subscription filter {} from {}", self.filter_name, group);
        }
        self.permission(function).revoke(function).await?;
        Ok(())
    }

    async fn status(&self, function: &FunctionRef) -> DeployResult<Option<SourceStatus>> {
        let state = self.exists(function).await?;
        Ok(state.exists.then(|| SourceStatus {
            kind: self.kind(),
            source: self.source(),
            handle: state.handle,
            enabled: true,
        }))
    }
}
