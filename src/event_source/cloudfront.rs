// Copyright (c) 2025 - Cowboy AI, Inc.
//! Edge distribution trigger
//!
//! Associates the function with one event type of a cache behavior. Writes
//! go through the distribution's ETag; each event type holds at most one
//! function. Edge replication invokes the function directly, so no invoke
//! permission is managed here.

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::info;

use super::{
    absent_if_not_found, BindingState, EventSourceAdapter, EventSourceConfig, EventSourceKind,
    FunctionRef, SourceStatus,
};
use crate::arn::Arn;
use crate::cloud::{services, CloudClient, ServiceHandle};
use crate::errors::{DeployError, DeployResult};

const DEFAULT_EVENT_TYPE: &str = "viewer-request";

/// Edge association binding
#[derive(Debug)]
pub struct EdgeEventSource {
    cloudfront: ServiceHandle,
    distribution_arn: String,
    distribution_id: String,
    event_type: String,
    path_pattern: Option<String>,
}

impl EdgeEventSource {
    pub fn new(client: &CloudClient, config: &EventSourceConfig) -> DeployResult<Self> {
        let distribution_arn = config.arn.clone().unwrap_or_default();
        let distribution_id = Arn::parse(&distribution_arn)?.resource_name().to_string();
        Ok(Self {
            cloudfront: client.get_client(services::CLOUDFRONT)?,
            distribution_arn,
            distribution_id,
            event_type: config
                .cloudfront_event
                .clone()
                .unwrap_or_else(|| DEFAULT_EVENT_TYPE.to_string()),
            path_pattern: config.path_pattern.clone(),
        })
    }

    /// Current config and its ETag
    async fn config(&self) -> DeployResult<Option<(Value, String)>> {
        let response = absent_if_not_found(
            self.cloudfront
                .call("get_distribution_config", json!({"Id": self.distribution_id}))
                .await,
        )?;
        Ok(response.map(|r| {
            (
                r["DistributionConfig"].clone(),
                r["ETag"].as_str().unwrap_or_default().to_string(),
            )
        }))
    }

    fn behavior<'a>(&self, config: &'a mut Value) -> Option<&'a mut Value> {
        match &self.path_pattern {
            None => config.get_mut("DefaultCacheBehavior"),
            Some(path) => config
                .get_mut("CacheBehaviors")?
                .get_mut("Items")?
                .as_array_mut()?
                .iter_mut()
                .find(|b| b["PathPattern"] == path.as_str()),
        }
    }

    fn associations(behavior: &Value) -> Vec<Value> {
        behavior["LambdaFunctionAssociations"]["Items"]
            .as_array()
            .cloned()
            .unwrap_or_default()
    }

    fn set_associations(behavior: &mut Value, items: Vec<Value>) {
        behavior["LambdaFunctionAssociations"] = json!({"Quantity": items.len(), "Items": items});
    }

    async fn write(&self, config: Value, etag: &str) -> DeployResult<()> {
        self.cloudfront
            .call(
                "update_distribution",
                json!({"Id": self.distribution_id, "IfMatch": etag, "DistributionConfig": config}),
            )
            .await?;
        Ok(())
    }

    fn find(&self, config: &mut Value, function: &FunctionRef) -> Option<Value> {
        let behavior = self.behavior(config)?;
        Self::associations(behavior)
            .into_iter()
            .find(|a| a["LambdaFunctionARN"] == function.qualified_arn.as_str())
    }
}

#[async_trait]
impl EventSourceAdapter for EdgeEventSource {
    fn kind(&self) -> EventSourceKind {
        EventSourceKind::Edge
    }

    fn source(&self) -> String {
        self.distribution_arn.clone()
    }

    async fn exists(&self, function: &FunctionRef) -> DeployResult<BindingState> {
        let Some((mut config, _)) = self.config().await? else {
            return Ok(BindingState::absent());
        };
        Ok(match self.find(&mut config, function) {
            Some(association) => {
                let event_type = association["EventType"].as_str().unwrap_or_default();
                BindingState::found(event_type, event_type == self.event_type)
            }
            None => BindingState::absent(),
        })
    }

    async fn add(&self, function: &FunctionRef) -> DeployResult<()> {
        let (mut config, etag) = self.config().await?.ok_or_else(|| {
            DeployError::SourceNotFound(format!("distribution {}", self.distribution_id))
        })?;
        let behavior = self.behavior(&mut config).ok_or_else(|| {
            DeployError::SourceNotFound(format!(
                "cache behavior {} of distribution {}",
                self.path_pattern.as_deref().unwrap_or("default"),
                self.distribution_id
            ))
        })?;
        let mut items: Vec<Value> = Self::associations(behavior)
            .into_iter()
            .filter(|a| {
                a["LambdaFunctionARN"] != function.qualified_arn.as_str()
                    && a["EventType"] != self.event_type.as_str()
            })
            .collect();
        items.push(json!({
            "LambdaFunctionARN": function.qualified_arn,
            "EventType": self.event_type,
        }));
        Self::set_associations(behavior, items);
        self.write(config, &etag).await?;
        info!(
            "Associated {} with {} on {}",
            function.qualified_arn, self.event_type, self.distribution_id
        );
        Ok(())
    }

    async fn remove(&self, function: &FunctionRef) -> DeployResult<()> {
        let Some((mut config, etag)) = self.config().await? else {
            return Ok(());
        };
        let Some(behavior) = self.behavior(&mut config) else {
            return Ok(());
        };
        let before = Self::associations(behavior);
        let items: Vec<Value> = before
            .iter()
            .filter(|a| a["LambdaFunctionARN"] != function.qualified_arn.as_str())
            .cloned()
            .collect();
        if items.len() == before.len() {
            return Ok(());
        }
        Self::set_associations(behavior, items);
        self.write(config, &etag).await?;
        info!("Removed {} from {}", function.qualified_arn, self.distribution_id);
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
