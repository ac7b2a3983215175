// Copyright (c) 2025 - Cowboy AI, Inc.
//! Change-stream trigger (kinesis / dynamodb)
//!
//! Bound through an event source mapping. The function's execution role reads
//! the stream, so no invoke permission is involved. The mapping carries its
//! own enabled flag.

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::info;

use super::{
    absent_if_not_found, BindingState, EventSourceAdapter, EventSourceConfig, EventSourceKind,
    FunctionRef, SourceStatus,
};
use crate::cloud::{services, CloudClient, ServiceHandle};
use crate::errors::DeployResult;

const DEFAULT_BATCH_SIZE: u32 = 100;
const DEFAULT_STARTING_POSITION: &str = "LATEST";

/// Event source mapping binding
#[derive(Debug)]
pub struct StreamEventSource {
    lambda: ServiceHandle,
    stream_arn: String,
    batch_size: u32,
    starting_position: String,
    enabled: bool,
}

impl StreamEventSource {
    pub fn new(client: &CloudClient, config: &EventSourceConfig) -> DeployResult<Self> {
        Ok(Self {
            lambda: client.get_client(services::LAMBDA)?,
            stream_arn: config.arn.clone().unwrap_or_default(),
            batch_size: config.batch_size.unwrap_or(DEFAULT_BATCH_SIZE),
            starting_position: config
                .starting_position
                .clone()
                .unwrap_or_else(|| DEFAULT_STARTING_POSITION.to_string()),
            enabled: config.enabled,
        })
    }

    async fn mappings(&self, function: &FunctionRef) -> DeployResult<Vec<Value>> {
        Ok(absent_if_not_found(
            self.lambda
                .paginate(
                    "list_event_source_mappings",
                    json!({
                        "EventSourceArn": self.stream_arn,
                        "FunctionName": function.qualified_arn,
                    }),
                    "EventSourceMappings",
                )
                .await,
        )?
        .unwrap_or_default())
    }

    async fn set_enabled(&self, uuid: &str, enabled: bool) -> DeployResult<()> {
        self.lambda
            .call(
                "update_event_source_mapping",
                json!({"UUID": uuid, "Enabled": enabled}),
            )
            .await?;
        Ok(())
    }

    fn matches_declared(&self, mapping: &Value) -> bool {
        let state = if self.enabled { "Enabled" } else { "Disabled" };
        mapping["BatchSize"].as_u64() == Some(u64::from(self.batch_size)) && mapping["State"] == state
    }
}

#[async_trait]
impl EventSourceAdapter for StreamEventSource {
    fn kind(&self) -> EventSourceKind {
        EventSourceKind::Stream
    }

    fn source(&self) -> String {
        self.stream_arn.clone()
    }

    async fn exists(&self, function: &FunctionRef) -> DeployResult<BindingState> {
        Ok(match self.mappings(function).await?.first() {
            Some(m) => BindingState::found(m["UUID"].as_str().unwrap_or_default(), self.matches_declared(m)),
            None => BindingState::absent(),
        })
    }

    async fn add(&self, function: &FunctionRef) -> DeployResult<()> {
        if let Some(existing) = self.mappings(function).await?.first() {
            let uuid = existing["UUID"].as_str().unwrap_or_default();
            self.lambda
                .call(
                    "update_event_source_mapping",
                    json!({"UUID": uuid, "BatchSize": self.batch_size, "Enabled": self.enabled}),
                )
                .await?;
            info!("Updated stream mapping {} for {}", uuid, function.qualified_arn);
            return Ok(());
        }
        self.lambda
            .call(
                "create_event_source_mapping",
                json!({
                    "FunctionName": function.qualified_arn,
                    "EventSourceArn": self.stream_arn,
                    "BatchSize": self.batch_size,
                    "StartingPosition": self.starting_position,
                    "Enabled": self.enabled,
                }),
            )
            .await?;
        info!("Mapped {} to {}", self.stream_arn, function.qualified_arn);
        Ok(())
    }

    async fn remove(&self, function: &FunctionRef) -> DeployResult<()> {
        for mapping in self.mappings(function).await? {
            let uuid = mapping["UUID"].as_str().unwrap_or_default();
            absent_if_not_found(
                self.lambda
                    .call("delete_event_source_mapping", json!({"UUID": uuid}))
                    .await,
            )?;
            info!("Deleted stream mapping {}", uuid);
        }
        Ok(())
    }

    async fn status(&self, function: &FunctionRef) -> DeployResult<Option<SourceStatus>> {
        Ok(self.mappings(function).await?.first().map(|m| SourceStatus {
            kind: self.kind(),
            source: self.source(),
            handle: m["UUID"].as_str().map(str::to_string),
            enabled: m["State"] == "Enabled",
        }))
    }

    async fn enable(&self, function: &FunctionRef) -> DeployResult<()> {
        match self.mappings(function).await?.first() {
            Some(m) => self.set_enabled(m["UUID"].as_str().unwrap_or_default(), true).await,
            None => self.add(function).await,
        }
    }

    async fn disable(&self, function: &FunctionRef) -> DeployResult<()> {
        if let Some(m) = self.mappings(function).await?.first() {
            self.set_enabled(m["UUID"].as_str().unwrap_or_default(), false).await?;
        }
        Ok(())
    }
}
