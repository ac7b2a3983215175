// Copyright (c) 2025 - Cowboy AI, Inc.
//! Resource name (ARN) parsing
//!
//! `arn:partition:service:region:account:resource`

use std::fmt;

use crate::errors::{DeployError, DeployResult};

/// A parsed resource name
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Arn {
    pub partition: String,
    pub service: String,
    pub region: String,
    pub account: String,
    pub resource: String,
}

impl Arn {
    /// Parse an ARN, keeping everything after the fifth colon as the resource
    pub fn parse(raw: &str) -> DeployResult<Self> {
        let mut parts = raw.splitn(6, ':');
        let prefix = parts.next().unwrap_or_default();
        if prefix != "arn" {
            return Err(DeployError::Configuration(format!("not an ARN: {raw}")));
        }
        let fields: Vec<&str> = parts.collect();
        if fields.len() != 5 || fields[1].is_empty() {
            return Err(DeployError::Configuration(format!("malformed ARN: {raw}")));
        }
        Ok(Self {
            partition: fields[0].to_string(),
            service: fields[1].to_string(),
            region: fields[2].to_string(),
            account: fields[3].to_string(),
            resource: fields[4].to_string(),
        })
    }

    /// Resource part after its type prefix (`rule/name` → `name`)
    pub fn resource_name(&self) -> &str {
        self.resource
            .rsplit_once(|c| c == '/' || c == ':')
            .map(|(_, name)| name)
            .unwrap_or(&self.resource)
    }
}

impl fmt::Display for Arn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "arn:{}:{}:{}:{}:{}",
            self.partition, self.service, self.region, self.account, self.resource
        )
    }
}

/// Bucket name of an object-store ARN (`arn:aws:s3:::bucket`)
pub fn bucket_from_arn(raw: &str) -> DeployResult<String> {
    let arn = Arn::parse(raw)?;
    if arn.service != "s3" {
        return Err(DeployError::Configuration(format!("not a bucket ARN: {raw}")));
    }
    Ok(arn.resource.split('/').next().unwrap_or_default().to_string())
}

/// Object-store ARN for a bucket
pub fn bucket_arn(bucket: &str) -> String {
    format!("arn:aws:s3:::{bucket}")
}

/// Rule name of a schedule-rule ARN (`arn:aws:events:r:a:rule/name`)
pub fn rule_name_from_arn(raw: &str) -> DeployResult<String> {
    Ok(Arn::parse(raw)?.resource_name().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test]
    fn test_parse_function_arn() {
        let arn = Arn::parse("arn:aws:lambda:eu-west-1:123456789012:function:f:ACTIVE").unwrap();
        assert_eq!(arn.service, "lambda");
        assert_eq!(arn.region, "eu-west-1");
        assert_eq!(arn.account, "123456789012");
        assert_eq!(arn.resource, "function:f:ACTIVE");
        assert_eq!(
            arn.to_string(),
            "arn:aws:lambda:eu-west-1:123456789012:function:f:ACTIVE"
        );
    }

    #[test_case("arn:aws:s3:::my-bucket", "my-bucket")]
    #[test_case("arn:aws:s3:::my-bucket/some/key", "my-bucket")]
    fn test_bucket_from_arn(raw: &str, bucket: &str) {
        assert_eq!(bucket_from_arn(raw).unwrap(), bucket);
    }

    #[test]
    fn test_rule_name_from_arn() {
        let name = rule_name_from_arn("arn:aws:events:eu-west-1:123:rule/nightly").unwrap();
        assert_eq!(name, "nightly");
    }

    #[test_case("" ; "empty")]
    #[test_case("arn:aws:s3" ; "too short")]
    #[test_case("urn:aws:s3:::b" ; "wrong prefix")]
    fn test_rejects_malformed(raw: &str) {
        assert!(Arn::parse(raw).is_err());
    }
}
