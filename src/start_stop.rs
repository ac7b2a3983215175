// Copyright (c) 2025 - Cowboy AI, Inc.
//! Start/Stop Controller
//!
//! Suspends and restores the capacity-bearing resources of a stack:
//!
//! | Resource type                        | stop                                  | start                                   |
//! |--------------------------------------|---------------------------------------|-----------------------------------------|
//! | `AWS::AutoScaling::AutoScalingGroup` | min/max 0, or suspend + stop members  | template min/max, or start + resume     |
//! | `AWS::ECS::Service`                  | desired count 0                       | template desired count                  |
//! | `AWS::EC2::Instance`                 | stop pending/running                  | start stopping/stopped                  |
//! | `AWS::RDS::DBInstance`               | stop when `available`                 | start when `stopped`                    |
//!
//! Restored values come from the stack's processed template with every
//! `Ref` resolved against the live parameters, so a restart returns to the
//! declared capacity rather than a provider default.

use std::fmt;
use std::future::Future;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, info, info_span, warn, Instrument, Span};

use crate::cloud::{services, CloudClient, ServiceHandle};
use crate::config::DeployConfig;
use crate::errors::{DeployError, DeployResult};
use crate::stack::template::{self, resolve_i64, resolve_string, resource_properties, Parameters};
use crate::stack::{describe_stack, list_resources, StackResource};

/// How scaling groups are stopped and started
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScalingStrategy {
    /// Resize min/max to zero; members terminate
    #[default]
    Resize,
    /// Suspend scaling processes and stop the members in place
    Suspend,
}

/// Capacity-bearing resource kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CapacityKind {
    ScalingGroup,
    ContainerService,
    Instance,
    Database,
}

impl CapacityKind {
    pub const ALL: [CapacityKind; 4] = [
        CapacityKind::ScalingGroup,
        CapacityKind::ContainerService,
        CapacityKind::Instance,
        CapacityKind::Database,
    ];

    /// Stack resource type of this kind
    pub fn resource_type(&self) -> &'static str {
        match self {
            CapacityKind::ScalingGroup => "AWS::AutoScaling::AutoScalingGroup",
            CapacityKind::ContainerService => "AWS::ECS::Service",
            CapacityKind::Instance => "AWS::EC2::Instance",
            CapacityKind::Database => "AWS::RDS::DBInstance",
        }
    }

    pub fn from_resource_type(kind: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.resource_type() == kind)
    }
}

impl fmt::Display for CapacityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.resource_type())
    }
}

/// Scale of one resource before it was stopped
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapacitySnapshot {
    pub logical_id: String,
    pub physical_id: String,
    pub kind: CapacityKind,
    pub min: Option<i64>,
    pub max: Option<i64>,
    pub desired: Option<i64>,
}

impl CapacitySnapshot {
    fn new(resource: &Target, min: Option<i64>, max: Option<i64>, desired: Option<i64>) -> Self {
        Self {
            logical_id: resource.logical_id.clone(),
            physical_id: resource.physical_id.clone(),
            kind: resource.kind,
            min,
            max,
            desired,
        }
    }
}

/// A capacity-bearing stack resource
#[derive(Debug, Clone)]
struct Target {
    logical_id: String,
    physical_id: String,
    kind: CapacityKind,
}

impl Target {
    fn from_resource(resource: StackResource) -> Option<Self> {
        Some(Self {
            kind: CapacityKind::from_resource_type(&resource.resource_type)?,
            physical_id: resource.physical_resource_id?,
            logical_id: resource.logical_resource_id,
        })
    }
}

/// Declared template and live parameters of a stack
struct Declared {
    template: Value,
    parameters: Parameters,
}

impl Declared {
    fn property(&self, target: &Target, key: &str) -> Option<&Value> {
        resource_properties(&self.template, &target.logical_id, target.kind.resource_type())?.get(key)
    }

    fn int(&self, target: &Target, key: &str) -> Option<i64> {
        resolve_i64(self.property(target, key)?, &self.parameters)
    }

    fn string(&self, target: &Target, key: &str) -> Option<String> {
        resolve_string(self.property(target, key)?, &self.parameters)
    }

    /// Cluster of a container service; the provider default when undeclared
    fn cluster(&self, target: &Target) -> String {
        self.string(target, "Cluster").unwrap_or_else(|| "default".to_string())
    }
}

/// Stops and starts the capacity of a stack
#[derive(Debug, Clone)]
pub struct StartStopController {
    client: CloudClient,
    config: DeployConfig,
    span: Span,
}

impl StartStopController {
    pub fn new(client: CloudClient, config: DeployConfig) -> Self {
        Self {
            client,
            config,
            span: info_span!("start_stop"),
        }
    }

    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    /// Stop every capacity-bearing resource of `stack`.
    ///
    /// Returns the capacity each resource had before. A missing stack is a
    /// no-op with a warning.
    pub async fn stop(&self, stack: &str, strategy: ScalingStrategy) -> DeployResult<Vec<CapacitySnapshot>> {
        async {
            let Some((targets, declared)) = self.targets(stack).await? else {
                return Ok(Vec::new());
            };
            info!("Stopping {} resources of {}", targets.len(), stack);

            let mut snapshots = Vec::new();
            for kind in [
                CapacityKind::ContainerService,
                CapacityKind::ScalingGroup,
                CapacityKind::Instance,
                CapacityKind::Database,
            ] {
                for target in targets.iter().filter(|t| t.kind == kind) {
                    let snapshot = match kind {
                        CapacityKind::ContainerService => self.stop_service(target, &declared).await?,
                        CapacityKind::ScalingGroup => self.stop_group(target, strategy).await?,
                        CapacityKind::Instance => self.stop_instance(target).await?,
                        CapacityKind::Database => self.stop_database(target).await?,
                    };
                    snapshots.push(snapshot);
                }
            }
            Ok(snapshots)
        }
        .instrument(self.span.clone())
        .await
    }

    /// Start every capacity-bearing resource of `stack` at its declared capacity
    pub async fn start(&self, stack: &str, strategy: ScalingStrategy) -> DeployResult<()> {
        self.restore(stack, strategy, &[]).await
    }

    /// Start `stack`, preferring values captured by [`stop`](Self::stop) over
    /// the template's
    pub async fn restore(
        &self,
        stack: &str,
        strategy: ScalingStrategy,
        snapshots: &[CapacitySnapshot],
    ) -> DeployResult<()> {
        async {
            let Some((targets, declared)) = self.targets(stack).await? else {
                return Ok(());
            };
            info!("Starting {} resources of {}", targets.len(), stack);

            for kind in [
                CapacityKind::Database,
                CapacityKind::Instance,
                CapacityKind::ContainerService,
                CapacityKind::ScalingGroup,
            ] {
                for target in targets.iter().filter(|t| t.kind == kind) {
                    let snapshot = snapshots
                        .iter()
                        .find(|s| s.logical_id == target.logical_id && s.kind == kind);
                    match kind {
                        CapacityKind::Database => self.start_database(target).await?,
                        CapacityKind::Instance => self.start_instance(target).await?,
                        CapacityKind::ContainerService => {
                            self.start_service(target, &declared, snapshot).await?
                        }
                        CapacityKind::ScalingGroup => {
                            self.start_group(target, &declared, snapshot, strategy).await?
                        }
                    }
                }
            }
            Ok(())
        }
        .instrument(self.span.clone())
        .await
    }

    async fn targets(&self, stack: &str) -> DeployResult<Option<(Vec<Target>, Declared)>> {
        let cfn = self.client.get_client(services::CLOUDFORMATION)?;
        let Some(live) = describe_stack(&cfn, stack).await? else {
            warn!("Stack {} does not exist, nothing to do", stack);
            return Ok(None);
        };
        let targets: Vec<Target> = list_resources(&cfn, stack)
            .await?
            .into_iter()
            .filter_map(Target::from_resource)
            .collect();
        let template = template::fetch(&cfn, stack).await?;
        Ok(Some((
            targets,
            Declared {
                template,
                parameters: live.parameters,
            },
        )))
    }

    /// Poll `check` until it holds, bounded by `wait_max_attempts`
    async fn wait_until<F, Fut>(&self, what: &str, mut check: F) -> DeployResult<()>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = DeployResult<bool>>,
    {
        let cancel = self.client.cancellation();
        for attempt in 0..self.config.wait_max_attempts {
            if check().await? {
                return Ok(());
            }
            debug!("Waiting for {} (attempt {})", what, attempt + 1);
            cancel.sleep(self.config.wait_poll_interval).await?;
        }
        Err(DeployError::Timeout(what.to_string()))
    }

    // ------------------------------------------------------------------
    // scaling groups
    // ------------------------------------------------------------------

    fn autoscaling(&self) -> DeployResult<ServiceHandle> {
        self.client.get_client(services::AUTOSCALING)
    }

    async fn describe_group(&self, name: &str) -> DeployResult<Value> {
        let response = self
            .autoscaling()?
            .call("describe_auto_scaling_groups", json!({"AutoScalingGroupNames": [name]}))
            .await?;
        response["AutoScalingGroups"]
            .get(0)
            .cloned()
            .ok_or_else(|| DeployError::malformed("describe_auto_scaling_groups", format!("no group {name}")))
    }

    async fn group_members(&self, name: &str) -> DeployResult<Vec<String>> {
        let instances = self
            .autoscaling()?
            .paginate("describe_auto_scaling_instances", json!({}), "AutoScalingInstances")
            .await?;
        Ok(instances
            .iter()
            .filter(|i| i["AutoScalingGroupName"] == name)
            .filter_map(|i| i["InstanceId"].as_str().map(str::to_string))
            .collect())
    }

    async fn process_types(&self) -> DeployResult<Vec<String>> {
        let response = self
            .autoscaling()?
            .call("describe_scaling_process_types", json!({}))
            .await?;
        Ok(response["Processes"]
            .as_array()
            .map(|p| p.iter().filter_map(|p| p["ProcessName"].as_str().map(str::to_string)).collect())
            .unwrap_or_default())
    }

    async fn stop_group(&self, target: &Target, strategy: ScalingStrategy) -> DeployResult<CapacitySnapshot> {
        let name = &target.physical_id;
        let group = self.describe_group(name).await?;
        let snapshot = CapacitySnapshot::new(
            target,
            group["MinSize"].as_i64(),
            group["MaxSize"].as_i64(),
            group["DesiredCapacity"].as_i64(),
        );
        let autoscaling = self.autoscaling()?;

        match strategy {
            ScalingStrategy::Resize => {
                info!("Resizing {} to zero", name);
                autoscaling
                    .call(
                        "update_auto_scaling_group",
                        json!({"AutoScalingGroupName": name, "MinSize": 0, "MaxSize": 0, "DesiredCapacity": 0}),
                    )
                    .await?;
                self.wait_until(&format!("members of {name} to terminate"), move || async move {
                    Ok::<_, DeployError>(self.group_members(name).await?.is_empty())
                })
                .await?;
            }
            ScalingStrategy::Suspend => {
                let processes = self.process_types().await?;
                info!("Suspending {} processes of {}", processes.len(), name);
                autoscaling
                    .call(
                        "suspend_processes",
                        json!({"AutoScalingGroupName": name, "ScalingProcesses": processes}),
                    )
                    .await?;
                let members = self.group_members(name).await?;
                self.stop_instances(&members).await?;
            }
        }
        Ok(snapshot)
    }

    async fn start_group(
        &self,
        target: &Target,
        declared: &Declared,
        snapshot: Option<&CapacitySnapshot>,
        strategy: ScalingStrategy,
    ) -> DeployResult<()> {
        let name = &target.physical_id;
        let autoscaling = self.autoscaling()?;

        match strategy {
            ScalingStrategy::Resize => {
                let min = snapshot.and_then(|s| s.min).or_else(|| declared.int(target, "MinSize"));
                let max = snapshot.and_then(|s| s.max).or_else(|| declared.int(target, "MaxSize"));
                let (Some(min), Some(max)) = (min, max) else {
                    warn!("No declared MinSize/MaxSize for {}, leaving it stopped", target.logical_id);
                    return Ok(());
                };
                let mut request = json!({"AutoScalingGroupName": name, "MinSize": min, "MaxSize": max});
                let desired = snapshot
                    .and_then(|s| s.desired)
                    .or_else(|| declared.int(target, "DesiredCapacity"));
                if let Some(desired) = desired {
                    request["DesiredCapacity"] = json!(desired);
                }
                info!("Restoring {} to min {} max {}", name, min, max);
                autoscaling.call("update_auto_scaling_group", request).await?;
            }
            ScalingStrategy::Suspend => {
                let members = self.group_members(name).await?;
                self.start_instances(&members).await?;
                let processes = self.process_types().await?;
                info!("Resuming {} processes of {}", processes.len(), name);
                autoscaling
                    .call(
                        "resume_processes",
                        json!({"AutoScalingGroupName": name, "ScalingProcesses": processes}),
                    )
                    .await?;
            }
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // container services
    // ------------------------------------------------------------------

    async fn stop_service(&self, target: &Target, declared: &Declared) -> DeployResult<CapacitySnapshot> {
        let ecs = self.client.get_client(services::ECS)?;
        let cluster = declared.cluster(target);
        let response = ecs
            .call(
                "describe_services",
                json!({"cluster": cluster, "services": [target.physical_id]}),
            )
            .await?;
        let desired = response["services"].get(0).and_then(|s| s["desiredCount"].as_i64());

        info!("Scaling service {} in {} to zero", target.physical_id, cluster);
        ecs.call(
            "update_service",
            json!({"cluster": cluster, "service": target.physical_id, "desiredCount": 0}),
        )
        .await?;
        Ok(CapacitySnapshot::new(target, None, None, desired))
    }

    async fn start_service(
        &self,
        target: &Target,
        declared: &Declared,
        snapshot: Option<&CapacitySnapshot>,
    ) -> DeployResult<()> {
        let desired = snapshot
            .and_then(|s| s.desired)
            .or_else(|| declared.int(target, "DesiredCount"));
        let Some(desired) = desired else {
            warn!("No declared DesiredCount for {}, leaving it stopped", target.logical_id);
            return Ok(());
        };
        let cluster = declared.cluster(target);
        info!("Scaling service {} in {} to {}", target.physical_id, cluster, desired);
        self.client
            .get_client(services::ECS)?
            .call(
                "update_service",
                json!({"cluster": cluster, "service": target.physical_id, "desiredCount": desired}),
            )
            .await?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // machines
    // ------------------------------------------------------------------

    /// Ids among `ids` whose state is one of `states`
    async fn instances_in(&self, ids: &[String], states: &[&str]) -> DeployResult<Vec<String>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let statuses = self
            .client
            .get_client(services::EC2)?
            .paginate(
                "describe_instance_status",
                json!({
                    "InstanceIds": ids,
                    "IncludeAllInstances": true,
                    "Filters": [{"Name": "instance-state-name", "Values": states}],
                }),
                "InstanceStatuses",
            )
            .await?;
        Ok(statuses
            .iter()
            .filter_map(|s| s["InstanceId"].as_str().map(str::to_string))
            .collect())
    }

    async fn stop_instances(&self, ids: &[String]) -> DeployResult<()> {
        let running = self.instances_in(ids, &["pending", "running"]).await?;
        if running.is_empty() {
            return Ok(());
        }
        info!("Stopping instances {:?}", running);
        self.client
            .get_client(services::EC2)?
            .call("stop_instances", json!({"InstanceIds": running}))
            .await?;
        let running = &running;
        self.wait_until("instances to stop", move || async move {
            Ok::<_, DeployError>(self.instances_in(running, &["stopped"]).await?.len() == running.len())
        })
        .await
    }

    async fn start_instances(&self, ids: &[String]) -> DeployResult<()> {
        let stopped = self.instances_in(ids, &["stopping", "stopped"]).await?;
        if stopped.is_empty() {
            return Ok(());
        }
        info!("Starting instances {:?}", stopped);
        self.client
            .get_client(services::EC2)?
            .call("start_instances", json!({"InstanceIds": stopped}))
            .await?;
        let stopped = &stopped;
        self.wait_until("instances to run", move || async move {
            Ok::<_, DeployError>(self.instances_in(stopped, &["running"]).await?.len() == stopped.len())
        })
        .await
    }

    async fn stop_instance(&self, target: &Target) -> DeployResult<CapacitySnapshot> {
        let ids = vec![target.physical_id.clone()];
        let running = self.instances_in(&ids, &["pending", "running"]).await?.len() as i64;
        self.stop_instances(&ids).await?;
        Ok(CapacitySnapshot::new(target, None, None, Some(running)))
    }

    async fn start_instance(&self, target: &Target) -> DeployResult<()> {
        self.start_instances(&[target.physical_id.clone()]).await
    }

    // ------------------------------------------------------------------
    // databases
    // ------------------------------------------------------------------

    async fn database_status(&self, id: &str) -> DeployResult<Option<String>> {
        let response = self
            .client
            .get_client(services::RDS)?
            .call("describe_db_instances", json!({"DBInstanceIdentifier": id}))
            .await?;
        Ok(response["DBInstances"]
            .get(0)
            .and_then(|db| db["DBInstanceStatus"].as_str())
            .map(str::to_string))
    }

    async fn stop_database(&self, target: &Target) -> DeployResult<CapacitySnapshot> {
        let id = &target.physical_id;
        let available = self.database_status(id).await?.as_deref() == Some("available");
        if available {
            info!("Stopping database {}", id);
            self.client
                .get_client(services::RDS)?
                .call("stop_db_instance", json!({"DBInstanceIdentifier": id}))
                .await?;
        } else {
            debug!("Database {} is not available, skipping", id);
        }
        Ok(CapacitySnapshot::new(target, None, None, Some(available as i64)))
    }

    async fn start_database(&self, target: &Target) -> DeployResult<()> {
        let id = &target.physical_id;
        if self.database_status(id).await?.as_deref() != Some("stopped") {
            debug!("Database {} is not stopped, skipping", id);
            return Ok(());
        }
        info!("Starting database {}", id);
        self.client
            .get_client(services::RDS)?
            .call("start_db_instance", json!({"DBInstanceIdentifier": id}))
            .await?;
        self.wait_until(&format!("database {id} to become available"), move || async move {
            Ok::<_, DeployError>(self.database_status(id).await?.as_deref() == Some("available"))
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case("AWS::AutoScaling::AutoScalingGroup", Some(CapacityKind::ScalingGroup))]
    #[test_case("AWS::ECS::Service", Some(CapacityKind::ContainerService))]
    #[test_case("AWS::EC2::Instance", Some(CapacityKind::Instance))]
    #[test_case("AWS::RDS::DBInstance", Some(CapacityKind::Database))]
    #[test_case("AWS::S3::Bucket", None)]
    fn test_kind_from_resource_type(raw: &str, expected: Option<CapacityKind>) {
        assert_eq!(CapacityKind::from_resource_type(raw), expected);
    }

    #[test]
    fn test_declared_values_resolve_refs() {
        let declared = Declared {
            template: json!({"Resources": {"Web": {
                "Type": "AWS::ECS::Service",
                "Properties": {"Cluster": {"Ref": "ClusterName"}, "DesiredCount": {"Ref": "Count"}}
            }}}),
            parameters: [
                ("ClusterName".to_string(), "main".to_string()),
                ("Count".to_string(), "3".to_string()),
            ]
            .into_iter()
            .collect(),
        };
        let target = Target {
            logical_id: "Web".into(),
            physical_id: "web".into(),
            kind: CapacityKind::ContainerService,
        };
        assert_eq!(declared.cluster(&target), "main");
        assert_eq!(declared.int(&target, "DesiredCount"), Some(3));
    }
}
