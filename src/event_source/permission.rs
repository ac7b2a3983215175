// Copyright (c) 2025 - Cowboy AI, Inc.
//! Invoke Permission Guard
//!
//! Grants and revokes the statement that lets one trigger invoke a function.
//! The statement id is a name-based UUID of (principal, source ARN), so a
//! repeated grant finds the statement it created last time. Statements created
//! by other tools are recognized by content: structurally through the
//! `ArnLike` condition, and as a fallback by substring on the statement text.

use serde::Serialize;
use serde_json::{json, Value};
use tracing::{debug, warn};
use uuid::Uuid;

use super::{absent_if_not_found, FunctionRef};
use crate::cloud::ServiceHandle;
use crate::errors::{DeployError, DeployResult};

const INVOKE_ACTION: &str = "lambda:InvokeFunction";

/// Name-based UUID over the given parts
pub fn deterministic_id(parts: &[&str]) -> Uuid {
    Uuid::new_v5(&Uuid::NAMESPACE_URL, parts.join("|").as_bytes())
}

/// One statement of a function's invoke policy
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PermissionStatement {
    pub sid: String,
    pub principal: String,
    pub source_arn: Option<String>,
    /// Raw statement text
    pub text: String,
}

impl PermissionStatement {
    /// Read a statement out of a policy document entry
    pub fn from_policy(statement: &Value) -> Self {
        let principal = match &statement["Principal"] {
            Value::String(p) => p.clone(),
            other => other["Service"].as_str().unwrap_or_default().to_string(),
        };
        let source_arn = statement["Condition"]["ArnLike"]["AWS:SourceArn"]
            .as_str()
            .map(str::to_string);
        Self {
            sid: statement["Sid"].as_str().unwrap_or_default().to_string(),
            principal,
            source_arn,
            text: statement.to_string(),
        }
    }
}

/// Grants/revokes one (principal, source) invoke statement
#[derive(Debug, Clone)]
pub struct PermissionGuard {
    lambda: ServiceHandle,
    principal: String,
    source_arn: String,
}

impl PermissionGuard {
    pub fn new(lambda: ServiceHandle, principal: impl Into<String>, source_arn: impl Into<String>) -> Self {
        Self {
            lambda,
            principal: principal.into(),
            source_arn: source_arn.into(),
        }
    }

    /// Statement id this guard creates
    pub fn statement_id(&self) -> String {
        deterministic_id(&[&self.principal, &self.source_arn]).to_string()
    }

    /// Source ARN the statement is conditioned on
    pub fn source_arn(&self) -> &str {
        &self.source_arn
    }

    /// Current statements on the function's alias policy
    pub async fn statements(
        lambda: &ServiceHandle,
        function: &FunctionRef,
    ) -> DeployResult<Vec<PermissionStatement>> {
        let response = absent_if_not_found(
            lambda
                .call(
                    "get_policy",
                    json!({"FunctionName": function.name, "Qualifier": function.alias}),
                )
                .await,
        )?;
        let Some(response) = response else {
            return Ok(Vec::new());
        };
        let raw = response["Policy"]
            .as_str()
            .ok_or_else(|| DeployError::malformed("get_policy", "missing 'Policy'"))?;
        let document: Value = serde_json::from_str(raw)?;
        Ok(document["Statement"]
            .as_array()
            .map(|s| s.iter().map(PermissionStatement::from_policy).collect())
            .unwrap_or_default())
    }

    fn matches(&self, statement: &PermissionStatement) -> bool {
        if statement.sid == self.statement_id() {
            return true;
        }
        match &statement.source_arn {
            Some(source) => statement.principal == self.principal && source == &self.source_arn,
            None => {
                statement.text.contains(&self.source_arn) && statement.text.contains(&self.principal)
            }
        }
    }

    /// The statement granting this (principal, source), if present
    pub async fn find(&self, function: &FunctionRef) -> DeployResult<Option<PermissionStatement>> {
        Ok(Self::statements(&self.lambda, function)
            .await?
            .into_iter()
            .find(|s| self.matches(s)))
    }

    /// Ensure the statement exists; returns whether this call added it
    pub async fn grant(&self, function: &FunctionRef) -> DeployResult<bool> {
        if let Some(existing) = self.find(function).await? {
            debug!(
                "Permission for {} from {} already granted ({})",
                self.principal, self.source_arn, existing.sid
            );
            return Ok(false);
        }

        let result = self
            .lambda
            .call(
                "add_permission",
                json!({
                    "FunctionName": function.name,
                    "StatementId": self.statement_id(),
                    "Action": INVOKE_ACTION,
                    "Principal": self.principal,
                    "SourceArn": self.source_arn,
                    "Qualifier": function.alias,
                }),
            )
            .await;

        match result {
            Ok(_) => {
                debug!("Granted {} invoke from {}", self.principal, self.source_arn);
                Ok(true)
            }
            Err(DeployError::Cloud(e)) if e.is_conflict() => {
                debug!("Permission {} already exists: {}", self.statement_id(), e.message);
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    /// Remove the statement; returns whether one was removed
    pub async fn revoke(&self, function: &FunctionRef) -> DeployResult<bool> {
        let Some(statement) = self.find(function).await? else {
            return Ok(false);
        };
        let removed = absent_if_not_found(
            self.lambda
                .call(
                    "remove_permission",
                    json!({
                        "FunctionName": function.name,
                        "StatementId": statement.sid,
                        "Qualifier": function.alias,
                    }),
                )
                .await,
        )?;
        Ok(removed.is_some())
    }

    /// Withdraw a statement `grant` just added for a binding that failed to attach
    pub async fn undo(&self, function: &FunctionRef, granted: bool) {
        if !granted {
            return;
        }
        if let Err(e) = self.revoke(function).await {
            warn!("Could not withdraw permission from {}: {}", self.source_arn, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::cloud::memory::InMemoryCloud;
    use crate::cloud::CloudClient;
    use crate::config::DeployConfig;

    fn function() -> FunctionRef {
        FunctionRef::new(
            "f",
            "ACTIVE",
            "arn:aws:lambda:eu-west-1:123456789012:function:f",
            "arn:aws:lambda:eu-west-1:123456789012:function:f:ACTIVE",
        )
        .unwrap()
    }

    fn guard(cloud: &InMemoryCloud) -> PermissionGuard {
        let client = CloudClient::new(Arc::new(cloud.clone()), &DeployConfig::immediate());
        PermissionGuard::new(
            client.get_client("lambda").unwrap(),
            "s3.amazonaws.com",
            "arn:aws:s3:::b",
        )
    }

    #[test]
    fn test_statement_id_is_deterministic() {
        let a = deterministic_id(&["s3.amazonaws.com", "arn:aws:s3:::b"]);
        let b = deterministic_id(&["s3.amazonaws.com", "arn:aws:s3:::b"]);
        let c = deterministic_id(&["s3.amazonaws.com", "arn:aws:s3:::other"]);
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[tokio::test]
    async fn test_grant_twice_keeps_one_statement() {
        let cloud = InMemoryCloud::new();
        cloud.add_function("f");
        let guard = guard(&cloud);

        guard.grant(&function()).await.unwrap();
        guard.grant(&function()).await.unwrap();

        assert_eq!(cloud.policy_statements("f", "ACTIVE").len(), 1);
        assert_eq!(cloud.calls_to("lambda", "add_permission"), 1);
    }

    #[tokio::test]
    async fn test_foreign_statement_is_recognized_by_content() {
        let cloud = InMemoryCloud::new();
        cloud.add_function("f");
        let client = CloudClient::new(Arc::new(cloud.clone()), &DeployConfig::immediate());
        client
            .get_client("lambda")
            .unwrap()
            .call(
                "add_permission",
                json!({
                    "FunctionName": "f",
                    "StatementId": "hand-made",
                    "Action": INVOKE_ACTION,
                    "Principal": "s3.amazonaws.com",
                    "SourceArn": "arn:aws:s3:::b",
                    "Qualifier": "ACTIVE",
                }),
            )
            .await
            .unwrap();

        let guard = guard(&cloud);
        guard.grant(&function()).await.unwrap();
        assert_eq!(cloud.policy_statements("f", "ACTIVE").len(), 1);

        assert!(guard.revoke(&function()).await.unwrap());
        assert!(cloud.policy_statements("f", "ACTIVE").is_empty());
    }

    #[tokio::test]
    async fn test_revoke_without_policy_is_noop() {
        let cloud = InMemoryCloud::new();
        cloud.add_function("f");
        assert!(!guard(&cloud).revoke(&function()).await.unwrap());
    }
}
