// Copyright (c) 2025 - Cowboy AI, Inc.
//! Template value resolution
//!
//! Templates express values indirectly as `{"Ref": "ParamName"}`. [`resolve`]
//! replaces every such reference with the stack's live parameter value and
//! leaves everything else untouched.

use std::collections::HashMap;

use serde_json::{json, Value};

use crate::cloud::ServiceHandle;
use crate::errors::DeployResult;

/// Live parameter values keyed by parameter name
pub type Parameters = HashMap<String, String>;

/// Build the parameter map from a `describe_stacks` parameter list
pub fn parameters_from(list: &Value) -> Parameters {
    list.as_array()
        .map(|entries| {
            entries
                .iter()
                .filter_map(|p| {
                    Some((
                        p["ParameterKey"].as_str()?.to_string(),
                        p["ParameterValue"].as_str()?.to_string(),
                    ))
                })
                .collect()
        })
        .unwrap_or_default()
}

/// Replace `Ref` objects with parameter values, recursively.
///
/// A `Ref` to an unknown parameter (a resource or pseudo parameter) is kept.
pub fn resolve(value: &Value, params: &Parameters) -> Value {
    match value {
        Value::Object(map) => {
            if map.len() == 1 {
                if let Some(Value::String(name)) = map.get("Ref") {
                    if let Some(resolved) = params.get(name) {
                        return Value::String(resolved.clone());
                    }
                }
            }
            Value::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), resolve(v, params)))
                    .collect(),
            )
        }
        Value::Array(items) => Value::Array(items.iter().map(|v| resolve(v, params)).collect()),
        other => other.clone(),
    }
}

/// Resolve and read an integer, accepting numbers and numeric strings
pub fn resolve_i64(value: &Value, params: &Parameters) -> Option<i64> {
    match resolve(value, params) {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Resolve and read a string
pub fn resolve_string(value: &Value, params: &Parameters) -> Option<String> {
    match resolve(value, params) {
        Value::String(s) => Some(s),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Properties of a template resource, if it has the expected type
pub fn resource_properties<'a>(template: &'a Value, logical_id: &str, kind: &str) -> Option<&'a Value> {
    let resource = template.get("Resources")?.get(logical_id)?;
    if resource.get("Type")?.as_str()? != kind {
        return None;
    }
    resource.get("Properties")
}

/// Processed template of a live stack
pub(crate) async fn fetch(cfn: &ServiceHandle, stack: &str) -> DeployResult<Value> {
    let response = cfn
        .call("get_template", json!({"StackName": stack, "TemplateStage": "Processed"}))
        .await?;
    Ok(match &response["TemplateBody"] {
        Value::String(raw) => serde_json::from_str(raw)?,
        other => other.clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn params() -> Parameters {
        parameters_from(&json!([
            {"ParameterKey": "MinSize", "ParameterValue": "2"},
            {"ParameterKey": "Cluster", "ParameterValue": "main"},
        ]))
    }

    #[test]
    fn test_resolves_nested_refs() {
        let value = json!({"MinSize": {"Ref": "MinSize"}, "Tags": [{"Value": {"Ref": "Cluster"}}]});
        assert_eq!(
            resolve(&value, &params()),
            json!({"MinSize": "2", "Tags": [{"Value": "main"}]})
        );
    }

    #[test]
    fn test_unknown_ref_is_kept() {
        let value = json!({"Ref": "AWS::Region"});
        assert_eq!(resolve(&value, &params()), value);
    }

    #[test]
    fn test_resolve_i64_accepts_literals_and_refs() {
        assert_eq!(resolve_i64(&json!(5), &params()), Some(5));
        assert_eq!(resolve_i64(&json!("7"), &params()), Some(7));
        assert_eq!(resolve_i64(&json!({"Ref": "MinSize"}), &params()), Some(2));
        assert_eq!(resolve_i64(&json!({"Ref": "Missing"}), &params()), None);
    }

    #[test]
    fn test_resource_properties_checks_type() {
        let template = json!({"Resources": {"Asg": {
            "Type": "AWS::AutoScaling::AutoScalingGroup",
            "Properties": {"MinSize": 1}
        }}});
        assert!(resource_properties(&template, "Asg", "AWS::AutoScaling::AutoScalingGroup").is_some());
        assert!(resource_properties(&template, "Asg", "AWS::ECS::Service").is_none());
    }
}
