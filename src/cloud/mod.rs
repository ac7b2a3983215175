// Copyright (c) 2025 - Cowboy AI, Inc.
//! Cloud Client Abstraction
//!
//! The low-level RPC client is an external collaborator. This module only
//! fixes its shape: one [`ServiceClient`] per named service, exposing every
//! remote operation under the provider's own name with JSON parameters and
//! JSON responses.
//!
//! ```text
//! CloudClient ──get_client("lambda")──> ServiceHandle ──call("add_permission", {...})
//!      │                                     │
//!      │ cache (service, region)             ├─ throttle sleep
//!      ▼                                     ├─ bounded retry (transient only)
//! ServiceConnector::connect                  └─ cancellation guard
//! ```
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use cim_deploy::cloud::{CloudClient, memory::InMemoryCloud};
//! use cim_deploy::DeployConfig;
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let cloud = InMemoryCloud::new();
//!     let client = CloudClient::new(Arc::new(cloud), &DeployConfig::default());
//!
//!     let lambda = client.get_client("lambda")?;
//!     let function = lambda.call("get_function", json!({"FunctionName": "f"})).await?;
//!     println!("{function}");
//!     Ok(())
//! }
//! ```

pub mod memory;
pub mod retry;

#[cfg(feature = "http")]
pub mod http;

pub use retry::{retry, RetryPolicy};

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::debug;

use crate::cancel::Cancellation;
use crate::config::DeployConfig;
use crate::errors::{CloudError, DeployError, DeployResult};

/// Provider service names
pub mod services {
    pub const LAMBDA: &str = "lambda";
    pub const S3: &str = "s3";
    pub const EVENTS: &str = "events";
    pub const SNS: &str = "sns";
    pub const LOGS: &str = "logs";
    pub const CLOUDFRONT: &str = "cloudfront";
    pub const CLOUDFORMATION: &str = "cloudformation";
    pub const AUTOSCALING: &str = "autoscaling";
    pub const ECS: &str = "ecs";
    pub const EC2: &str = "ec2";
    pub const RDS: &str = "rds";
}

/// RPC capability for one remote service
#[async_trait]
pub trait ServiceClient: Send + Sync {
    /// Issue `operation` with JSON parameters and return the JSON response
    async fn call(&self, operation: &str, params: Value) -> Result<Value, CloudError>;
}

/// Builds service clients; owns credentials and endpoint resolution
pub trait ServiceConnector: Send + Sync {
    /// Connect to `service` in `region`
    fn connect(&self, service: &str, region: &str) -> DeployResult<Arc<dyn ServiceClient>>;
}

type ClientCache = HashMap<(String, String), Arc<dyn ServiceClient>>;

/// Per-call behaviour shared by every handle of one client
#[derive(Debug, Clone)]
struct CallSettings {
    requests_sleep: Duration,
    retry: RetryPolicy,
}

/// Entry point for all remote calls
#[derive(Clone)]
pub struct CloudClient {
    connector: Arc<dyn ServiceConnector>,
    cache: Arc<Mutex<ClientCache>>,
    region: String,
    settings: CallSettings,
    cancel: Cancellation,
}

impl fmt::Debug for CloudClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CloudClient")
            .field("region", &self.region)
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl CloudClient {
    /// Create a client bound to the configured region
    pub fn new(connector: Arc<dyn ServiceConnector>, config: &DeployConfig) -> Self {
        Self {
            connector,
            cache: Arc::new(Mutex::new(HashMap::new())),
            region: config.region.clone(),
            settings: CallSettings {
                requests_sleep: config.requests_sleep,
                retry: config.retry.clone(),
            },
            cancel: Cancellation::new(),
        }
    }

    /// Attach the cancellation every call is guarded by
    pub fn with_cancellation(mut self, cancel: Cancellation) -> Self {
        self.cancel = cancel;
        self
    }

    /// Region this client is bound to
    pub fn region(&self) -> &str {
        &self.region
    }

    /// Cancellation guarding this client's calls
    pub fn cancellation(&self) -> &Cancellation {
        &self.cancel
    }

    /// Get the (cached) capability for a named service
    pub fn get_client(&self, service: &str) -> DeployResult<ServiceHandle> {
        let key = (service.to_string(), self.region.clone());
        let mut cache = self
            .cache
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        let client = match cache.get(&key) {
            Some(client) => client.clone(),
            None => {
                let client = self.connector.connect(service, &self.region)?;
                debug!("Connected {} client in {}", service, self.region);
                cache.insert(key, client.clone());
                client
            }
        };

        Ok(ServiceHandle {
            service: service.to_string(),
            client,
            settings: self.settings.clone(),
            cancel: self.cancel.clone(),
        })
    }
}

/// A service capability with throttling, retry and cancellation applied
#[derive(Clone)]
pub struct ServiceHandle {
    service: String,
    client: Arc<dyn ServiceClient>,
    settings: CallSettings,
    cancel: Cancellation,
}

impl fmt::Debug for ServiceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceHandle")
            .field("service", &self.service)
            .finish_non_exhaustive()
    }
}

impl ServiceHandle {
    /// Name of the service behind this handle
    pub fn service(&self) -> &str {
        &self.service
    }

    /// Issue a call; transient failures are retried, cancellation aborts
    pub async fn call(&self, operation: &str, params: Value) -> DeployResult<Value> {
        if !self.settings.requests_sleep.is_zero() {
            self.cancel.sleep(self.settings.requests_sleep).await?;
        }
        let label = format!("{}.{}", self.service, operation);
        debug!("Calling {}", label);
        retry(&self.settings.retry, &self.cancel, &label, || {
            self.client.call(operation, params.clone())
        })
        .await
    }

    /// Issue a call and deserialize the response
    pub async fn call_as<T: DeserializeOwned>(
        &self,
        operation: &str,
        params: Value,
    ) -> DeployResult<T> {
        let response = self.call(operation, params).await?;
        from_response(operation, response)
    }

    /// Issue a call that ignores cancellation (compensating actions)
    pub async fn call_detached(&self, operation: &str, params: Value) -> DeployResult<Value> {
        debug!("Calling {}.{} (detached)", self.service, operation);
        retry(
            &self.settings.retry,
            &Cancellation::new(),
            &format!("{}.{}", self.service, operation),
            || self.client.call(operation, params.clone()),
        )
        .await
    }

    /// Call a list operation and follow `NextToken` until exhausted
    pub async fn paginate(
        &self,
        operation: &str,
        params: Value,
        items_key: &str,
    ) -> DeployResult<Vec<Value>> {
        self.paginate_by(operation, params, items_key, "NextToken").await
    }

    /// Call a list operation and follow the continuation token stored under
    /// `token_key` (the logs API uses `nextToken`)
    pub async fn paginate_by(
        &self,
        operation: &str,
        params: Value,
        items_key: &str,
        token_key: &str,
    ) -> DeployResult<Vec<Value>> {
        let mut items = Vec::new();
        let mut next_token: Option<String> = None;
        loop {
            let mut request = params.clone();
            if let (Some(token), Some(map)) = (&next_token, request.as_object_mut()) {
                map.insert(token_key.to_string(), Value::String(token.clone()));
            }
            let response = self.call(operation, request).await?;
            if let Some(page) = response.get(items_key).and_then(Value::as_array) {
                items.extend(page.iter().cloned());
            }
            next_token = response
                .get(token_key)
                .and_then(Value::as_str)
                .filter(|t| !t.is_empty())
                .map(str::to_string);
            if next_token.is_none() {
                return Ok(items);
            }
        }
    }
}

/// Deserialize a response, reporting shape mismatches against the operation
pub fn from_response<T: DeserializeOwned>(operation: &str, response: Value) -> DeployResult<T> {
    serde_json::from_value(response).map_err(|e| DeployError::malformed(operation, e.to_string()))
}

/// Read a required string field from a response
pub fn required_str<'a>(response: &'a Value, operation: &str, key: &str) -> DeployResult<&'a str> {
    response
        .get(key)
        .and_then(Value::as_str)
        .ok_or_else(|| DeployError::malformed(operation, format!("missing '{key}'")))
}
