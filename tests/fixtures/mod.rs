// Copyright (c) 2025 - Cowboy AI, Inc.
//! Test Fixtures for cim-deploy
//!
//! Deterministic provider worlds for the integration tests. Every world runs
//! against [`InMemoryCloud`] with [`DeployConfig::immediate`], so polling
//! loops never sleep.
//!
//! # Design Principles
//! - Names and ARNs are fixed constants
//! - Fixtures are the only place that seeds provider state
//! - Tests assert on provider state, not on call order, unless the order is
//!   the behavior under test

#![allow(dead_code)]

use std::sync::Arc;

use serde_json::{json, Value};

use cim_deploy::cloud::memory::InMemoryCloud;
use cim_deploy::stack::{EventReporter, RecordingReporter};
use cim_deploy::{
    CloudClient, DeployConfig, EventSourceConfig, EventSourceKind, Reconciler, StackLifecycle,
    StartStopController,
};

pub const FUNCTION: &str = "billing-worker";
pub const QUALIFIED_ARN: &str = "arn:aws:lambda:eu-west-1:123456789012:function:billing-worker:ACTIVE";

pub const BUCKET: &str = "invoices";
pub const BUCKET_ARN: &str = "arn:aws:s3:::invoices";
pub const TOPIC_ARN: &str = "arn:aws:sns:eu-west-1:123456789012:billing-events";
pub const STREAM_ARN: &str = "arn:aws:kinesis:eu-west-1:123456789012:stream/payments";
pub const DISTRIBUTION_ID: &str = "E2QWRUHAPOMQZL";
pub const DISTRIBUTION_ARN: &str = "arn:aws:cloudfront::123456789012:distribution/E2QWRUHAPOMQZL";
pub const RULE_NAME: &str = "billing-nightly";
pub const LOG_PREFIX: &str = "/aws/lambda/payments-";
pub const LOG_GROUP: &str = "/aws/lambda/payments-api";

pub const STACK: &str = "billing-infra";

/// A seeded provider and a client bound to it
pub struct World {
    pub cloud: InMemoryCloud,
    pub client: CloudClient,
    pub config: DeployConfig,
}

impl World {
    pub fn reconciler(&self) -> Reconciler {
        Reconciler::new(self.client.clone(), self.config.clone())
    }

    pub fn lifecycle(&self, reporter: Arc<dyn EventReporter>) -> StackLifecycle {
        StackLifecycle::new(self.client.clone(), self.config.clone(), reporter)
    }

    /// Lifecycle plus the reporter it writes to
    pub fn recorded_lifecycle(&self) -> (StackLifecycle, Arc<RecordingReporter>) {
        let reporter = Arc::new(RecordingReporter::new());
        (self.lifecycle(reporter.clone()), reporter)
    }

    pub fn controller(&self) -> StartStopController {
        StartStopController::new(self.client.clone(), self.config.clone())
    }
}

/// Empty world
pub fn empty_world() -> World {
    world_with(DeployConfig::immediate())
}

/// Empty world with a custom configuration
pub fn world_with(config: DeployConfig) -> World {
    let cloud = InMemoryCloud::new();
    let client = CloudClient::new(Arc::new(cloud.clone()), &config);
    World { cloud, client, config }
}

/// World holding the function and one trigger resource of every kind
pub fn world() -> World {
    let world = empty_world();
    world.cloud.add_function(FUNCTION);
    world.cloud.add_bucket(BUCKET);
    world.cloud.add_topic(TOPIC_ARN);
    world.cloud.add_log_group(LOG_GROUP);
    world.cloud.add_log_group("/aws/lambda/unrelated");
    world.cloud.add_distribution(DISTRIBUTION_ID);
    world
}

/// Parse one declared entry
pub fn source(declared: Value) -> EventSourceConfig {
    serde_json::from_value(declared).expect("Invalid event source in test fixture")
}

pub fn bucket_source() -> EventSourceConfig {
    source(json!({"arn": BUCKET_ARN, "events": ["s3:ObjectCreated:*"], "suffix": ".pdf"}))
}

pub fn topic_source() -> EventSourceConfig {
    source(json!({"arn": TOPIC_ARN}))
}

pub fn rule_source() -> EventSourceConfig {
    source(json!({"name": RULE_NAME, "schedule": "cron(0 2 * * ? *)"}))
}

pub fn log_source() -> EventSourceConfig {
    source(json!({
        "log_group_name_prefix": LOG_PREFIX,
        "filter_name": "errors",
        "filter_pattern": "ERROR",
    }))
}

pub fn stream_source() -> EventSourceConfig {
    source(json!({"arn": STREAM_ARN, "batch_size": 50, "starting_position": "TRIM_HORIZON"}))
}

pub fn edge_source() -> EventSourceConfig {
    source(json!({"arn": DISTRIBUTION_ARN, "cloudfront_event": "origin-request"}))
}

/// One entry of every kind
pub fn every_kind() -> Vec<EventSourceConfig> {
    vec![
        bucket_source(),
        topic_source(),
        rule_source(),
        log_source(),
        stream_source(),
        edge_source(),
    ]
}

/// Number of live bindings of `kind` that target the function's alias
pub fn binding_count(cloud: &InMemoryCloud, kind: EventSourceKind) -> usize {
    match kind {
        EventSourceKind::Object => cloud.bucket_notifications(BUCKET)["LambdaFunctionConfigurations"]
            .as_array()
            .map(|entries| {
                entries
                    .iter()
                    .filter(|e| e["LambdaFunctionArn"] == QUALIFIED_ARN)
                    .count()
            })
            .unwrap_or(0),
        EventSourceKind::Topic => cloud
            .subscriptions(TOPIC_ARN)
            .iter()
            .filter(|s| s["Endpoint"] == QUALIFIED_ARN)
            .count(),
        EventSourceKind::Rule => cloud
            .rule_targets(RULE_NAME)
            .iter()
            .filter(|arn| arn.as_str() == QUALIFIED_ARN)
            .count(),
        EventSourceKind::LogSubscription => cloud
            .subscription_filters(LOG_GROUP)
            .iter()
            .filter(|f| f["destinationArn"] == QUALIFIED_ARN)
            .count(),
        EventSourceKind::Stream => cloud
            .event_source_mappings()
            .iter()
            .filter(|m| m["EventSourceArn"] == STREAM_ARN && m["FunctionArn"] == QUALIFIED_ARN)
            .count(),
        EventSourceKind::Edge => cloud.distribution_config(DISTRIBUTION_ID)["DefaultCacheBehavior"]
            ["LambdaFunctionAssociations"]["Items"]
            .as_array()
            .map(|items| {
                items
                    .iter()
                    .filter(|a| a["LambdaFunctionARN"] == QUALIFIED_ARN)
                    .count()
            })
            .unwrap_or(0),
    }
}

/// Invoke permissions on the function's alias
pub fn permission_count(cloud: &InMemoryCloud) -> usize {
    cloud.policy_statements(FUNCTION, "ACTIVE").len()
}

// ----------------------------------------------------------------------
// stacks
// ----------------------------------------------------------------------

/// Small template with one bucket
pub fn bucket_template(bucket: &str) -> Value {
    json!({
        "AWSTemplateFormatVersion": "2010-09-09",
        "Resources": {
            "Artifacts": {"Type": "AWS::S3::Bucket", "Properties": {"BucketName": bucket}}
        }
    })
}

/// Template of a stack with one resource of every capacity-bearing kind
pub fn capacity_template() -> Value {
    json!({
        "Parameters": {
            "WorkerMin": {"Type": "Number"},
            "WorkerMax": {"Type": "Number"},
            "WebCount": {"Type": "Number"},
            "ClusterName": {"Type": "String"}
        },
        "Resources": {
            "Workers": {
                "Type": "AWS::AutoScaling::AutoScalingGroup",
                "Properties": {"MinSize": {"Ref": "WorkerMin"}, "MaxSize": {"Ref": "WorkerMax"}}
            },
            "Web": {
                "Type": "AWS::ECS::Service",
                "Properties": {"Cluster": {"Ref": "ClusterName"}, "DesiredCount": {"Ref": "WebCount"}}
            },
            "Bastion": {"Type": "AWS::EC2::Instance", "Properties": {"InstanceType": "t3.micro"}},
            "Ledger": {"Type": "AWS::RDS::DBInstance", "Properties": {"Engine": "postgres"}}
        }
    })
}

pub const WORKER_GROUP: &str = "billing-workers-asg";
pub const WORKER_INSTANCES: [&str; 2] = ["i-0a1b2c3d4e5f60001", "i-0a1b2c3d4e5f60002"];
pub const CLUSTER: &str = "billing";
pub const WEB_SERVICE: &str = "billing-web";
pub const BASTION: &str = "i-0b00000000000bast";
pub const DATABASE: &str = "billing-ledger";

/// Live stack whose resources are running at their declared capacity
pub fn capacity_world() -> World {
    let world = empty_world();
    let cloud = &world.cloud;
    cloud.put_stack(
        STACK,
        capacity_template(),
        &[("WorkerMin", "2"), ("WorkerMax", "5"), ("WebCount", "3"), ("ClusterName", CLUSTER)],
        "CREATE_COMPLETE",
    );
    cloud.add_stack_resource(STACK, "Workers", WORKER_GROUP, "AWS::AutoScaling::AutoScalingGroup");
    cloud.add_stack_resource(STACK, "Web", WEB_SERVICE, "AWS::ECS::Service");
    cloud.add_stack_resource(STACK, "Bastion", BASTION, "AWS::EC2::Instance");
    cloud.add_stack_resource(STACK, "Ledger", DATABASE, "AWS::RDS::DBInstance");

    cloud.add_scaling_group(WORKER_GROUP, 2, 5, &WORKER_INSTANCES);
    cloud.add_ecs_service(CLUSTER, WEB_SERVICE, 3);
    cloud.add_instance(BASTION, "running");
    cloud.add_database(DATABASE, "available");
    world
}
