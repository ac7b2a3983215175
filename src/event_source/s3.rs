// Copyright (c) 2025 - Cowboy AI, Inc.
//! Bucket notification trigger
//!
//! A bucket holds one notification configuration document. Adding rewrites the
//! whole document: stale entries for the same function are dropped and the
//! fresh entry is appended. Entries for other functions are never touched.

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::{debug, info};

use super::permission::{deterministic_id, PermissionGuard};
use super::{
    absent_if_not_found, BindingState, EventSourceAdapter, EventSourceConfig, EventSourceKind,
    FunctionRef, SourceStatus,
};
use crate::arn::{bucket_arn, bucket_from_arn};
use crate::cloud::{services, CloudClient, ServiceHandle};
use crate::errors::DeployResult;

const PRINCIPAL: &str = "s3.amazonaws.com";
const CONFIGURATIONS: &str = "LambdaFunctionConfigurations";
const DEFAULT_EVENTS: &[&str] = &["s3:ObjectCreated:*"];

/// Bucket notification binding
#[derive(Debug)]
pub struct ObjectEventSource {
    s3: ServiceHandle,
    lambda: ServiceHandle,
    bucket: String,
    events: Vec<String>,
    prefix: Option<String>,
    suffix: Option<String>,
}

impl ObjectEventSource {
    pub fn new(client: &CloudClient, config: &EventSourceConfig) -> DeployResult<Self> {
        let arn = config.arn.as_deref().unwrap_or_default();
        let events = if config.events.is_empty() {
            DEFAULT_EVENTS.iter().map(|e| e.to_string()).collect()
        } else {
            config.events.clone()
        };
        Ok(Self {
            s3: client.get_client(services::S3)?,
            lambda: client.get_client(services::LAMBDA)?,
            bucket: bucket_from_arn(arn)?,
            events,
            prefix: config.prefix.clone(),
            suffix: config.suffix.clone(),
        })
    }

    fn permission(&self) -> PermissionGuard {
        PermissionGuard::new(self.lambda.clone(), PRINCIPAL, bucket_arn(&self.bucket))
    }

    fn filter_rules(&self) -> Vec<Value> {
        let mut rules = Vec::new();
        if let Some(prefix) = &self.prefix {
            rules.push(json!({"Name": "Prefix", "Value": prefix}));
        }
        if let Some(suffix) = &self.suffix {
            rules.push(json!({"Name": "Suffix", "Value": suffix}));
        }
        rules
    }

    fn entry(&self, function: &FunctionRef) -> Value {
        let id = deterministic_id(&[&self.bucket, &function.qualified_arn]);
        let mut entry = json!({
            "Id": id.to_string(),
            "LambdaFunctionArn": function.qualified_arn,
            "Events": self.events,
        });
        let rules = self.filter_rules();
        if !rules.is_empty() {
            entry["Filter"] = json!({"Key": {"FilterRules": rules}});
        }
        entry
    }

    fn matches_declared(&self, entry: &Value) -> bool {
        let events: Vec<&str> = entry["Events"]
            .as_array()
            .map(|e| e.iter().filter_map(Value::as_str).collect())
            .unwrap_or_default();
        let rules = entry["Filter"]["Key"]["FilterRules"]
            .as_array()
            .cloned()
            .unwrap_or_default();
        events == self.events.iter().map(String::as_str).collect::<Vec<_>>()
            && rules == self.filter_rules()
    }

    async fn configuration(&self) -> DeployResult<Option<Value>> {
        let response = absent_if_not_found(
            self.s3
                .call(
                    "get_bucket_notification_configuration",
                    json!({"Bucket": self.bucket}),
                )
                .await,
        )?;
        Ok(response.map(|mut config| {
            if let Some(map) = config.as_object_mut() {
                map.remove("ResponseMetadata");
            }
            config
        }))
    }

    async fn write(&self, configuration: Value) -> DeployResult<()> {
        self.s3
            .call(
                "put_bucket_notification_configuration",
                json!({"Bucket": self.bucket, "NotificationConfiguration": configuration}),
            )
            .await?;
        Ok(())
    }

    fn find<'a>(configuration: &'a Value, function: &FunctionRef) -> Option<&'a Value> {
        configuration[CONFIGURATIONS]
            .as_array()?
            .iter()
            .find(|e| e["LambdaFunctionArn"] == function.qualified_arn.as_str())
    }

    /// Rewrite the notification document with a fresh entry for `function`
    async fn attach(&self, function: &FunctionRef) -> DeployResult<()> {
        let mut configuration = self.configuration().await?.unwrap_or_else(|| json!({}));
        if !configuration.is_object() {
            configuration = json!({});
        }
        let stale = strip_function(&mut configuration, &function.qualified_arn);
        if stale > 0 {
            debug!("Replacing {} notification(s) on {}", stale, self.bucket);
        }
        let entry = self.entry(function);
        match configuration[CONFIGURATIONS].as_array_mut() {
            Some(entries) => entries.push(entry),
            None => configuration[CONFIGURATIONS] = json!([entry]),
        }
        self.write(configuration).await?;
        info!("Wired bucket {} to {}", self.bucket, function.qualified_arn);
        Ok(())
    }
}

/// Drop every entry targeting `function_arn`; returns how many were dropped
fn strip_function(configuration: &mut Value, function_arn: &str) -> usize {
    let Some(entries) = configuration
        .get_mut(CONFIGURATIONS)
        .and_then(Value::as_array_mut)
    else {
        return 0;
    };
    let before = entries.len();
    entries.retain(|e| e["LambdaFunctionArn"] != function_arn);
    before - entries.len()
}

#[async_trait]
impl EventSourceAdapter for ObjectEventSource {
    fn kind(&self) -> EventSourceKind {
        EventSourceKind::Object
    }

    fn source(&self) -> String {
        bucket_arn(&self.bucket)
    }

    async fn exists(&self, function: &FunctionRef) -> DeployResult<BindingState> {
        let Some(configuration) = self.configuration().await? else {
            return Ok(BindingState::absent());
        };
        Ok(match Self::find(&configuration, function) {
            Some(entry) => BindingState::found(
                entry["Id"].as_str().unwrap_or_default(),
                self.matches_declared(entry),
            ),
            None => BindingState::absent(),
        })
    }

    async fn add(&self, function: &FunctionRef) -> DeployResult<()> {
        let permission = self.permission();
        let granted = permission.grant(function).await?;
        if let Err(e) = self.attach(function).await {
            permission.undo(function, granted).await;
            return Err(e);
        }
        Ok(())
    }

    async fn remove(&self, function: &FunctionRef) -> DeployResult<()> {
        if let Some(mut configuration) = self.configuration().await? {
            if strip_function(&mut configuration, &function.qualified_arn) > 0 {
                self.write(configuration).await?;
                info!("Removed bucket {} notification for {}", self.bucket, function.qualified_arn);
            }
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_function_leaves_other_entries() {
        let mut configuration = json!({
            "LambdaFunctionConfigurations": [
                {"Id": "a", "LambdaFunctionArn": "arn:f:ACTIVE"},
                {"Id": "b", "LambdaFunctionArn": "arn:g:ACTIVE"},
                {"Id": "c", "LambdaFunctionArn": "arn:f:ACTIVE"},
            ],
            "TopicConfigurations": [{"Id": "t"}],
        });
        assert_eq!(strip_function(&mut configuration, "arn:f:ACTIVE"), 2);
        assert_eq!(
            configuration["LambdaFunctionConfigurations"],
            json!([{"Id": "b", "LambdaFunctionArn": "arn:g:ACTIVE"}])
        );
        assert_eq!(configuration["TopicConfigurations"], json!([{"Id": "t"}]));
    }

    #[test]
    fn test_strip_function_without_entries() {
        let mut configuration = json!({});
        assert_eq!(strip_function(&mut configuration, "arn:f:ACTIVE"), 0);
    }
}
