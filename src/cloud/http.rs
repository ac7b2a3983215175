// Copyright (c) 2025 - Cowboy AI, Inc.

//! JSON Gateway Transport
//!
//! A [`ServiceConnector`] for a JSON gateway in front of the provider. Every
//! call is one request:
//!
//! ```text
//! POST {endpoint}/{service}/{operation}
//! X-Region: {region}
//! Authorization: Bearer {token}        (optional)
//!
//! {params}
//! ```
//!
//! A 2xx answer is the JSON response. Anything else is turned into a
//! [`CloudError`] from the body's `code`/`message` (or `__type`/`Message`)
//! fields and the HTTP status.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use cim_deploy::cloud::{http::{HttpConfig, HttpConnector}, CloudClient};
//! use cim_deploy::DeployConfig;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let connector = HttpConnector::new(HttpConfig {
//!     endpoint: "http://localhost:4566".to_string(),
//!     ..HttpConfig::default()
//! })?;
//! let client = CloudClient::new(Arc::new(connector), &DeployConfig::from_env()?);
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use super::{ServiceClient, ServiceConnector};
use crate::errors::{CloudError, DeployError, DeployResult};

/// Gateway connection settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    /// Gateway base URL, without trailing slash
    pub endpoint: String,

    /// Bearer token, if the gateway wants one
    #[serde(default)]
    pub api_token: Option<String>,

    /// Request timeout in seconds
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
}

fn default_timeout() -> u64 {
    30
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://localhost:4566".to_string(),
            api_token: None,
            timeout_secs: default_timeout(),
        }
    }
}

/// Connects services through the gateway
#[derive(Debug, Clone)]
pub struct HttpConnector {
    endpoint: String,
    http: Client,
}

impl HttpConnector {
    pub fn new(config: HttpConfig) -> DeployResult<Self> {
        let mut headers = reqwest::header::HeaderMap::new();
        if let Some(token) = &config.api_token {
            headers.insert(
                "Authorization",
                format!("Bearer {token}")
                    .parse()
                    .map_err(|e| DeployError::Configuration(format!("Invalid API token: {e}")))?,
            );
        }
        let http = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .default_headers(headers)
            .build()
            .map_err(|e| DeployError::Configuration(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            http,
        })
    }
}

impl ServiceConnector for HttpConnector {
    fn connect(&self, service: &str, region: &str) -> DeployResult<Arc<dyn ServiceClient>> {
        Ok(Arc::new(HttpService {
            base_url: format!("{}/{}", self.endpoint, service),
            service: service.to_string(),
            region: region.to_string(),
            http: self.http.clone(),
        }))
    }
}

struct HttpService {
    base_url: String,
    service: String,
    region: String,
    http: Client,
}

#[async_trait]
impl ServiceClient for HttpService {
    async fn call(&self, operation: &str, params: Value) -> Result<Value, CloudError> {
        let url = format!("{}/{}", self.base_url, operation);
        debug!("POST {}", url);
        let response = self
            .http
            .post(&url)
            .header("X-Region", &self.region)
            .json(&params)
            .send()
            .await
            .map_err(|e| {
                let code = if e.is_timeout() { "RequestTimeout" } else { "ServiceUnavailable" };
                CloudError::new(&self.service, operation, code, e.to_string())
            })?;

        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        let parsed: Value = if body.trim().is_empty() {
            Value::Object(Default::default())
        } else {
            serde_json::from_str(&body).unwrap_or(Value::String(body))
        };

        if status.is_success() {
            return Ok(parsed);
        }
        Err(error_from_body(&self.service, operation, status.as_u16(), &parsed))
    }
}

/// Build a [`CloudError`] from a failed gateway response
fn error_from_body(service: &str, operation: &str, status: u16, body: &Value) -> CloudError {
    let code = body["code"]
        .as_str()
        .or_else(|| body["__type"].as_str())
        .map(|c| c.rsplit('#').next().unwrap_or(c).to_string())
        .unwrap_or_else(|| format!("Http{status}"));
    let message = body["message"]
        .as_str()
        .or_else(|| body["Message"].as_str())
        .map(str::to_string)
        .unwrap_or_else(|| body.to_string());
    CloudError::new(service, operation, code, message).with_status(status)
}
