// Copyright (c) 2025 - Cowboy AI, Inc.
//! Property-Based Tests for Template Resolution and Derived Identifiers

use std::collections::HashMap;

use cim_deploy::event_source::permission::deterministic_id;
use cim_deploy::stack::{diff_parameters, resolve, Parameters};
use proptest::prelude::*;
use serde_json::{json, Value};

// ============================================================================
// Strategies
// ============================================================================

fn parameters() -> impl Strategy<Value = Parameters> {
    prop::collection::hash_map("[A-Z][A-Za-z0-9]{0,10}", "[a-z0-9-]{0,12}", 0..8)
}

/// JSON values without any `Ref` object
fn plain_value() -> impl Strategy<Value = Value> {
    let leaf = prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::Bool),
        any::<i32>().prop_map(|n| json!(n)),
        "[a-z ]{0,10}".prop_map(Value::String),
    ];
    leaf.prop_recursive(3, 24, 4, |inner| {
        prop_oneof![
            prop::collection::vec(inner.clone(), 0..4).prop_map(Value::Array),
            prop::collection::hash_map("[a-z]{1,6}", inner, 0..4)
                .prop_map(|m| Value::Object(m.into_iter().collect())),
        ]
    })
}

// ============================================================================
// Properties
// ============================================================================

proptest! {
    /// Property: values without references are returned unchanged
    #[test]
    fn prop_resolve_without_refs_is_identity(value in plain_value(), params in parameters()) {
        prop_assert_eq!(resolve(&value, &params), value);
    }

    /// Property: every reference to a known parameter becomes its value, at any depth
    #[test]
    fn prop_known_refs_resolve_to_values(params in parameters()) {
        for (name, expected) in &params {
            let nested = json!({"Properties": {"Items": [{"Ref": name}]}});
            let resolved = resolve(&nested, &params);
            prop_assert_eq!(&resolved["Properties"]["Items"][0], &json!(expected));
        }
    }

    /// Property: references to unknown names are kept
    #[test]
    fn prop_unknown_refs_are_kept(params in parameters()) {
        let value = json!({"Ref": "AWS::Region"});
        prop_assert_eq!(resolve(&value, &params), value);
    }

    /// Property: identifiers derived from the same parts are stable, different parts differ
    #[test]
    fn prop_deterministic_ids(a in "[a-z:/-]{1,40}", b in "[a-z:/-]{1,40}") {
        prop_assert_eq!(deterministic_id(&[&a, &b]), deterministic_id(&[&a, &b]));
        if a != b {
            prop_assert_ne!(deterministic_id(&[&a]), deterministic_id(&[&b]));
        }
    }

    /// Property: declaring the live values reports no change
    #[test]
    fn prop_declaring_live_values_is_no_change(params in parameters()) {
        let declared: Vec<(String, String)> =
            params.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
        prop_assert!(diff_parameters(&params, &declared).is_empty());
    }

    /// Property: masked live values are never reported as changed
    #[test]
    fn prop_masked_values_never_differ(key in "[A-Z][a-z]{1,8}", declared in "[a-z0-9]{1,12}") {
        let live: Parameters = HashMap::from([(key.clone(), "****".to_string())]);
        prop_assert!(diff_parameters(&live, &[(key, declared)]).is_empty());
    }
}
