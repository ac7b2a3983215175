// Copyright (c) 2025 - Cowboy AI, Inc.
//! Integration tests for the stack lifecycle
//!
//! The in-memory provider releases one stack event per poll, so every test
//! exercises the polling loop across several ticks:
//! 1. Submit → poll → terminal status → exit code
//! 2. History before the operation is never reported
//! 3. Failures print the full event log once

mod fixtures;

use std::sync::Arc;

use pretty_assertions::assert_eq;
use serde_json::json;

use cim_deploy::stack::{
    ChangeSetType, EventReporter, ResourceChange, StackEvent, StackStatus, StatusClass,
};
use cim_deploy::state_machine::StackPhase;
use cim_deploy::{Cancellation, CloudClient, DeployConfig, DeployError, StackDescriptor};
use fixtures::*;

const NO_UPDATES: &str = "No updates are to be performed.";

/// Requests cancellation as soon as the first event arrives
struct CancelOnFirstEvent {
    cancel: Cancellation,
}

impl EventReporter for CancelOnFirstEvent {
    fn event(&self, _event: &StackEvent, _class: StatusClass) {
        self.cancel.cancel();
    }

    fn failed(&self, _log: &[StackEvent]) {}

    fn changes(&self, _changes: &[ResourceChange]) {}

    fn note(&self, _text: &str) {}
}

#[tokio::test]
async fn test_create_succeeds_without_failure_lines() {
    let world = empty_world();
    let (lifecycle, reporter) = world.recorded_lifecycle();

    let outcome = lifecycle
        .create(&StackDescriptor::new(STACK, bucket_template("billing-artifacts")))
        .await
        .unwrap();

    assert_eq!(outcome.exit_code, 0);
    assert_eq!(outcome.status, Some(StackStatus::CreateComplete));
    assert_eq!(
        outcome.phases.last(),
        Some(&StackPhase::Succeeded(StackStatus::CreateComplete))
    );
    assert!(reporter.lines_of(StatusClass::Failure).is_empty());
    assert!(reporter.lines_of(StatusClass::Warning).is_empty());
    assert!(reporter.recorded().failures.is_empty());
    assert_eq!(world.cloud.stack_status(STACK).as_deref(), Some("CREATE_COMPLETE"));
}

#[tokio::test]
async fn test_events_are_reported_once() {
    let world = empty_world();
    let (lifecycle, reporter) = world.recorded_lifecycle();

    lifecycle
        .create(&StackDescriptor::new(STACK, bucket_template("billing-artifacts")))
        .await
        .unwrap();

    let recorded = reporter.recorded();
    let statuses: Vec<&str> = recorded.events.iter().map(|(e, _)| e.status.as_str()).collect();
    assert_eq!(statuses, vec!["CREATE_IN_PROGRESS", "CREATE_COMPLETE"]);
    // at least one poll saw an already-reported event again
    assert!(world.cloud.calls_to("cloudformation", "describe_stack_events") >= 2);
}

#[tokio::test]
async fn test_update_skips_prior_history() {
    let world = empty_world();
    world.cloud.put_stack(STACK, bucket_template("old"), &[], "CREATE_COMPLETE");
    let (lifecycle, reporter) = world.recorded_lifecycle();

    let outcome = lifecycle
        .update(&StackDescriptor::new(STACK, bucket_template("new")))
        .await
        .unwrap();

    assert_eq!(outcome.exit_code, 0);
    assert_eq!(outcome.status, Some(StackStatus::UpdateComplete));
    let statuses: Vec<StackStatus> = reporter
        .recorded()
        .events
        .into_iter()
        .map(|(e, _)| e.status)
        .collect();
    assert_eq!(
        statuses,
        vec![StackStatus::UpdateInProgress, StackStatus::UpdateComplete]
    );
}

#[tokio::test]
async fn test_update_rollback_exits_non_zero_with_full_log() {
    let world = empty_world();
    world.cloud.put_stack(STACK, bucket_template("old"), &[], "CREATE_COMPLETE");
    world.cloud.script_stack_events(
        STACK,
        &[
            (STACK, "UPDATE_IN_PROGRESS"),
            ("Artifacts", "UPDATE_IN_PROGRESS"),
            ("Artifacts", "UPDATE_FAILED"),
            (STACK, "UPDATE_ROLLBACK_IN_PROGRESS"),
            ("Artifacts", "UPDATE_COMPLETE"),
            (STACK, "UPDATE_ROLLBACK_COMPLETE"),
        ],
    );
    let (lifecycle, reporter) = world.recorded_lifecycle();

    let outcome = lifecycle
        .update(&StackDescriptor::new(STACK, bucket_template("new")))
        .await
        .unwrap();

    assert_eq!(outcome.exit_code, 1);
    assert_eq!(outcome.status, Some(StackStatus::UpdateRollbackComplete));
    assert!(outcome.phases.contains(&StackPhase::RollingBack));

    let failures = reporter.lines_of(StatusClass::Failure);
    assert_eq!(failures.len(), 2);
    assert_eq!(failures[0].logical_resource_id, "Artifacts");
    assert_eq!(
        failures[0].reason.as_deref(),
        Some("Resource handler returned failure")
    );
    assert_eq!(reporter.lines_of(StatusClass::Warning).len(), 1);

    let recorded = reporter.recorded();
    assert_eq!(recorded.failures.len(), 1);
    assert_eq!(recorded.failures[0].len(), 6);
}

#[tokio::test]
async fn test_update_without_changes_is_success() {
    let world = empty_world();
    world.cloud.put_stack(STACK, bucket_template("same"), &[("Env", "prod")], "CREATE_COMPLETE");
    let (lifecycle, reporter) = world.recorded_lifecycle();

    let outcome = lifecycle
        .update(&StackDescriptor::new(STACK, bucket_template("same")).with_parameter("Env", "prod"))
        .await
        .unwrap();

    assert_eq!(outcome.exit_code, 0);
    assert!(outcome.events.is_empty());
    assert_eq!(reporter.recorded().notes, vec![NO_UPDATES.to_string()]);
}

#[tokio::test]
async fn test_update_missing_stack() {
    let world = empty_world();
    let (lifecycle, _) = world.recorded_lifecycle();

    let err = lifecycle
        .update(&StackDescriptor::new(STACK, bucket_template("x")))
        .await
        .unwrap_err();

    assert!(matches!(err, DeployError::StackNotFound(name) if name == STACK));
    assert_eq!(world.cloud.calls_to("cloudformation", "update_stack"), 0);
}

#[tokio::test]
async fn test_deploy_picks_create_or_update() {
    let world = empty_world();
    let (lifecycle, _) = world.recorded_lifecycle();

    lifecycle
        .deploy(&StackDescriptor::new(STACK, bucket_template("v1")))
        .await
        .unwrap();
    lifecycle
        .deploy(&StackDescriptor::new(STACK, bucket_template("v2")))
        .await
        .unwrap();

    assert_eq!(world.cloud.calls_to("cloudformation", "create_stack"), 1);
    assert_eq!(world.cloud.calls_to("cloudformation", "update_stack"), 1);
    assert_eq!(world.cloud.stack_status(STACK).as_deref(), Some("UPDATE_COMPLETE"));
}

#[tokio::test]
async fn test_requests_carry_default_policy_and_capabilities() {
    let world = empty_world();
    let (lifecycle, _) = world.recorded_lifecycle();

    lifecycle
        .create(
            &StackDescriptor::new(STACK, bucket_template("v1"))
                .with_parameter("Env", "prod")
                .with_role_arn("arn:aws:iam::123456789012:role/deployer"),
        )
        .await
        .unwrap();

    let request = world
        .cloud
        .calls()
        .into_iter()
        .find(|c| c.operation == "create_stack")
        .unwrap()
        .params;
    assert_eq!(request["Capabilities"], json!(["CAPABILITY_IAM"]));
    assert_eq!(request["RoleARN"], "arn:aws:iam::123456789012:role/deployer");
    assert_eq!(
        request["Parameters"],
        json!([{"ParameterKey": "Env", "ParameterValue": "prod", "UsePreviousValue": false}])
    );
    let policy: serde_json::Value =
        serde_json::from_str(request["StackPolicyBody"].as_str().unwrap()).unwrap();
    assert_eq!(policy["Statement"][1]["Effect"], "Deny");
    assert!(request.get("StackPolicyDuringUpdateBody").is_none());
}

#[tokio::test]
async fn test_update_can_override_policy() {
    let world = empty_world();
    world.cloud.put_stack(STACK, bucket_template("old"), &[], "CREATE_COMPLETE");
    let (lifecycle, _) = world.recorded_lifecycle();

    lifecycle
        .update(&StackDescriptor::new(STACK, bucket_template("new")).overriding_stack_policy())
        .await
        .unwrap();

    let request = world
        .cloud
        .calls()
        .into_iter()
        .find(|c| c.operation == "update_stack")
        .unwrap()
        .params;
    let during: serde_json::Value =
        serde_json::from_str(request["StackPolicyDuringUpdateBody"].as_str().unwrap()).unwrap();
    assert_eq!(during["Statement"][0]["Action"], "Update:*");
}

#[tokio::test]
async fn test_oversized_template_is_uploaded() {
    let world = world_with(DeployConfig {
        inline_template_limit: 64,
        ..DeployConfig::immediate()
    });
    world.cloud.add_bucket("deploy-artifacts");
    let (lifecycle, _) = world.recorded_lifecycle();

    let outcome = lifecycle
        .create(
            &StackDescriptor::new(STACK, bucket_template("a-bucket-name-long-enough-to-matter"))
                .with_artifact_bucket("deploy-artifacts"),
        )
        .await
        .unwrap();

    assert_eq!(outcome.exit_code, 0);
    let key = "kumo/eu-west-1/billing-infra-cloudformation.json";
    assert!(world.cloud.object("deploy-artifacts", key).is_some());
    let request = world
        .cloud
        .calls()
        .into_iter()
        .find(|c| c.operation == "create_stack")
        .unwrap()
        .params;
    assert_eq!(
        request["TemplateURL"],
        format!("https://s3-eu-west-1.amazonaws.com/deploy-artifacts/{key}")
    );
    assert!(request.get("TemplateBody").is_none());
}

#[tokio::test]
async fn test_oversized_template_without_bucket_is_rejected() {
    let world = world_with(DeployConfig {
        inline_template_limit: 64,
        ..DeployConfig::immediate()
    });
    let (lifecycle, _) = world.recorded_lifecycle();

    let err = lifecycle
        .create(&StackDescriptor::new(STACK, bucket_template("a-bucket-name-long-enough-to-matter")))
        .await
        .unwrap_err();

    assert!(matches!(err, DeployError::Configuration(_)));
    assert_eq!(world.cloud.calls_to("cloudformation", "create_stack"), 0);
}

#[tokio::test]
async fn test_delete_follows_stack_by_id() {
    let world = empty_world();
    world.cloud.put_stack(STACK, bucket_template("old"), &[], "UPDATE_COMPLETE");
    let (lifecycle, reporter) = world.recorded_lifecycle();

    let outcome = lifecycle.delete(STACK).await.unwrap();

    assert_eq!(outcome.exit_code, 0);
    assert_eq!(outcome.status, Some(StackStatus::DeleteComplete));
    assert_eq!(world.cloud.stack_status(STACK), None);
    assert!(!lifecycle.exists(STACK).await.unwrap());
    assert_eq!(reporter.recorded().events.len(), 2);
}

#[tokio::test]
async fn test_delete_missing_stack() {
    let world = empty_world();
    let (lifecycle, _) = world.recorded_lifecycle();

    let err = lifecycle.delete(STACK).await.unwrap_err();

    assert!(matches!(err, DeployError::StackNotFound(_)));
    assert_eq!(world.cloud.calls_to("cloudformation", "delete_stack"), 0);
}

#[tokio::test]
async fn test_cancelled_update_is_rolled_back() {
    let world = empty_world();
    world.cloud.put_stack(STACK, bucket_template("old"), &[], "CREATE_COMPLETE");
    let cancel = Cancellation::new();
    let client = CloudClient::new(Arc::new(world.cloud.clone()), &world.config)
        .with_cancellation(cancel.clone());
    let lifecycle = cim_deploy::StackLifecycle::new(
        client,
        world.config.clone(),
        Arc::new(CancelOnFirstEvent { cancel }),
    );

    let err = lifecycle
        .update(&StackDescriptor::new(STACK, bucket_template("new")))
        .await
        .unwrap_err();

    assert!(err.is_cancelled());
    let compensations: Vec<_> = world
        .cloud
        .calls()
        .into_iter()
        .filter(|c| c.operation == "cancel_update_stack")
        .collect();
    assert_eq!(compensations.len(), 1);
    assert!(compensations[0].params["StackName"]
        .as_str()
        .unwrap()
        .starts_with("arn:aws:cloudformation:eu-west-1:123456789012:stack/billing-infra/"));
}

#[tokio::test]
async fn test_cancel_during_update_request_is_rolled_back() {
    let world = empty_world();
    world.cloud.put_stack(STACK, bucket_template("old"), &[], "CREATE_COMPLETE");
    let cancel = Cancellation::new();
    world
        .cloud
        .cancel_after("cloudformation", "update_stack", cancel.clone());
    let client = CloudClient::new(Arc::new(world.cloud.clone()), &world.config)
        .with_cancellation(cancel);
    let lifecycle = cim_deploy::StackLifecycle::new(
        client,
        world.config.clone(),
        Arc::new(cim_deploy::stack::RecordingReporter::new()),
    );

    let err = lifecycle
        .update(&StackDescriptor::new(STACK, bucket_template("new")))
        .await
        .unwrap_err();

    assert!(err.is_cancelled());
    assert_eq!(world.cloud.calls_to("cloudformation", "update_stack"), 1);
    assert_eq!(world.cloud.calls_to("cloudformation", "cancel_update_stack"), 1);
    // the cutoff read only; nothing was polled after the request
    assert_eq!(world.cloud.calls_to("cloudformation", "describe_stack_events"), 1);
}

#[tokio::test]
async fn test_preview_of_new_stack_removes_review_stack() {
    let world = empty_world();
    let (lifecycle, reporter) = world.recorded_lifecycle();

    let preview = lifecycle
        .preview(&StackDescriptor::new(STACK, bucket_template("v1")))
        .await
        .unwrap();

    assert_eq!(preview.change_set_type, ChangeSetType::Create);
    assert!(preview.change_set_name.starts_with("preview-"));
    assert_eq!(preview.changes.len(), 1);
    assert_eq!(preview.changes[0].action, "Add");
    assert_eq!(preview.changes[0].logical_resource_id, "Artifacts");
    assert_eq!(preview.changes[0].resource_type, "AWS::S3::Bucket");
    assert_eq!(reporter.recorded().changes, preview.changes);
    assert_eq!(world.cloud.stack_status(STACK), None);
    assert_eq!(world.cloud.calls_to("cloudformation", "create_stack"), 0);
}

#[tokio::test]
async fn test_preview_of_live_stack_deletes_change_set() {
    let world = empty_world();
    world.cloud.put_stack(STACK, bucket_template("v1"), &[], "CREATE_COMPLETE");
    let (lifecycle, _) = world.recorded_lifecycle();

    let preview = lifecycle
        .preview(&StackDescriptor::new(STACK, bucket_template("v2")))
        .await
        .unwrap();

    assert_eq!(preview.change_set_type, ChangeSetType::Update);
    assert_eq!(preview.changes[0].action, "Modify");
    assert_eq!(world.cloud.calls_to("cloudformation", "delete_change_set"), 1);
    assert_eq!(world.cloud.stack_status(STACK).as_deref(), Some("CREATE_COMPLETE"));
}

#[tokio::test]
async fn test_preview_without_changes_reports_reason() {
    let world = empty_world();
    world.cloud.put_stack(STACK, bucket_template("v1"), &[], "CREATE_COMPLETE");
    let (lifecycle, reporter) = world.recorded_lifecycle();

    let preview = lifecycle
        .preview(&StackDescriptor::new(STACK, bucket_template("v1")))
        .await
        .unwrap();

    assert!(preview.changes.is_empty());
    let reason = preview.failure_reason.unwrap();
    assert!(reason.contains("didn't contain changes"));
    assert_eq!(reporter.recorded().notes, vec![reason]);
}

#[tokio::test]
async fn test_outputs_and_resources() {
    let world = empty_world();
    world.cloud.put_stack(STACK, bucket_template("v1"), &[], "CREATE_COMPLETE");
    world.cloud.add_stack_output(STACK, "BucketName", "billing-artifacts");
    world.cloud.add_stack_resource(STACK, "Artifacts", "billing-artifacts", "AWS::S3::Bucket");
    let (lifecycle, _) = world.recorded_lifecycle();

    let outputs = lifecycle.outputs(STACK).await.unwrap();
    assert_eq!(outputs.get("BucketName").map(String::as_str), Some("billing-artifacts"));

    let resources = lifecycle.resources(STACK).await.unwrap();
    assert_eq!(resources.len(), 1);
    assert_eq!(resources[0].physical_resource_id.as_deref(), Some("billing-artifacts"));
    assert_eq!(resources[0].status, Some(StackStatus::CreateComplete));
}

#[tokio::test]
async fn test_parameter_diff_ignores_masked_values() {
    let world = empty_world();
    world.cloud.put_stack(
        STACK,
        bucket_template("v1"),
        &[("Env", "prod"), ("DbPassword", "****"), ("Legacy", "yes")],
        "CREATE_COMPLETE",
    );
    let (lifecycle, _) = world.recorded_lifecycle();

    let diff = lifecycle
        .parameter_diff(
            &StackDescriptor::new(STACK, bucket_template("v1"))
                .with_parameter("Env", "staging")
                .with_parameter("DbPassword", "hunter2"),
        )
        .await
        .unwrap();

    let keys: Vec<&str> = diff.iter().map(|c| c.key.as_str()).collect();
    assert_eq!(keys, vec!["Env", "Legacy"]);
    assert_eq!(diff[0].live.as_deref(), Some("prod"));
    assert_eq!(diff[0].declared.as_deref(), Some("staging"));
    assert_eq!(diff[1].declared, None);
}
