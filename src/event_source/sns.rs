// Copyright (c) 2025 - Cowboy AI, Inc.
//! Topic subscription trigger

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::info;

use super::permission::PermissionGuard;
use super::{
    absent_if_not_found, BindingState, EventSourceAdapter, EventSourceConfig, EventSourceKind,
    FunctionRef, SourceStatus,
};
use crate::cloud::{services, CloudClient, ServiceHandle};
use crate::errors::DeployResult;

const PRINCIPAL: &str = "sns.amazonaws.com";
const PROTOCOL: &str = "lambda";

/// Topic subscription binding
#[derive(Debug)]
pub struct TopicEventSource {
    sns: ServiceHandle,
    lambda: ServiceHandle,
    topic_arn: String,
}

impl TopicEventSource {
    pub fn new(client: &CloudClient, config: &EventSourceConfig) -> DeployResult<Self> {
        Ok(Self {
            sns: client.get_client(services::SNS)?,
            lambda: client.get_client(services::LAMBDA)?,
            topic_arn: config.arn.clone().unwrap_or_default(),
        })
    }

    fn permission(&self) -> PermissionGuard {
        PermissionGuard::new(self.lambda.clone(), PRINCIPAL, &self.topic_arn)
    }

    async fn subscriptions(&self, function: &FunctionRef) -> DeployResult<Vec<Value>> {
        let all = absent_if_not_found(
            self.sns
                .paginate(
                    "list_subscriptions_by_topic",
                    json!({"TopicArn": self.topic_arn}),
                    "Subscriptions",
                )
                .await,
        )?
        .unwrap_or_default();
        Ok(all
            .into_iter()
            .filter(|s| s["Protocol"] == PROTOCOL && s["Endpoint"] == function.qualified_arn.as_str())
            .collect())
    }
}

#[async_trait]
impl EventSourceAdapter for TopicEventSource {
    fn kind(&self) -> EventSourceKind {
        EventSourceKind::Topic
    }

    fn source(&self) -> String {
        self.topic_arn.clone()
    }

    async fn exists(&self, function: &FunctionRef) -> DeployResult<BindingState> {
        Ok(match self.subscriptions(function).await?.first() {
            Some(sub) => BindingState::found(sub["SubscriptionArn"].as_str().unwrap_or_default(), true),
            None => BindingState::absent(),
        })
    }

    async fn add(&self, function: &FunctionRef) -> DeployResult<()> {
        let permission = self.permission();
        let granted = permission.grant(function).await?;
        // subscribing an existing endpoint returns the existing subscription
        let subscribed = self
            .sns
            .call(
                "subscribe",
                json!({
                    "TopicArn": self.topic_arn,
                    "Protocol": PROTOCOL,
                    "Endpoint": function.qualified_arn,
                }),
            )
            .await;
        if let Err(e) = subscribed {
            permission.undo(function, granted).await;
            return Err(e);
        }
        info!("Subscribed {} to {}", function.qualified_arn, self.topic_arn);
        Ok(())
    }

    async fn remove(&self, function: &FunctionRef) -> DeployResult<()> {
        for sub in self.subscriptions(function).await? {
            let arn = sub["SubscriptionArn"].as_str().unwrap_or_default();
            absent_if_not_found(
                self.sns
                    .call("unsubscribe", json!({"SubscriptionArn": arn}))
                    .await,
            )?;
            info!("Unsubscribed {} from {}", function.qualified_arn, self.topic_arn);
        }
        self.permission().revoke(function).await?;
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
