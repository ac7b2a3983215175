// Copyright (c) 2025 - Cowboy AI, Inc.
//! In-process cloud
//!
//! A [`ServiceConnector`] that keeps provider state in memory and answers the
//! subset of operations this crate issues, with the provider's response
//! shapes and error codes. Every call is recorded; failures can be injected
//! per operation. Stack operations play back scripted event streams, one
//! event per `describe_stack_events` call, so polling loops see progress
//! across ticks.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, TimeZone, Utc};
use serde_json::{json, Map, Value};

use super::{ServiceClient, ServiceConnector};
use crate::cancel::Cancellation;
use crate::errors::{CloudError, DeployResult};

/// Account id used in every generated ARN
pub const ACCOUNT_ID: &str = "123456789012";

const SCALING_PROCESSES: &[&str] = &[
    "Launch",
    "Terminate",
    "HealthCheck",
    "ReplaceUnhealthy",
    "AZRebalance",
    "AlarmNotification",
    "ScheduledActions",
    "AddToLoadBalancer",
];

/// One recorded remote call
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedCall {
    pub service: String,
    pub operation: String,
    pub params: Value,
}

#[derive(Debug, Default)]
struct FunctionState {
    arn: String,
    aliases: Vec<String>,
    policies: BTreeMap<String, Vec<Value>>,
}

#[derive(Debug, Default)]
struct RuleState {
    arn: String,
    state: String,
    schedule: Option<String>,
    pattern: Option<String>,
    description: Option<String>,
    targets: Vec<(String, String)>,
}

#[derive(Debug)]
struct StackState {
    name: String,
    id: String,
    status: String,
    deleted: bool,
    parameters: Vec<Value>,
    template: Value,
    outputs: Vec<Value>,
    resources: Vec<Value>,
    events: Vec<Value>,
    pending: VecDeque<(String, String)>,
}

#[derive(Debug)]
struct ChangeSetState {
    status: String,
    reason: Option<String>,
    changes: Vec<Value>,
    polled: bool,
}

#[derive(Debug, Default)]
struct GroupState {
    min: i64,
    max: i64,
    desired: i64,
    suspended: Vec<String>,
    instances: Vec<String>,
}

#[derive(Debug, Default)]
struct World {
    region: String,
    clock: i64,
    next_id: u64,
    connections: usize,
    calls: Vec<RecordedCall>,
    failures: HashMap<(String, String), VecDeque<CloudError>>,
    cancel_after: HashMap<(String, String), Cancellation>,
    page_sizes: HashMap<(String, String), usize>,
    functions: BTreeMap<String, FunctionState>,
    buckets: BTreeMap<String, Value>,
    objects: BTreeMap<(String, String), String>,
    rules: BTreeMap<String, RuleState>,
    topics: BTreeMap<String, Vec<Value>>,
    log_groups: BTreeMap<String, Vec<Value>>,
    mappings: Vec<Value>,
    distributions: BTreeMap<String, (u64, Value)>,
    stacks: Vec<StackState>,
    scripts: BTreeMap<String, VecDeque<Vec<(String, String)>>>,
    change_sets: BTreeMap<(String, String), ChangeSetState>,
    groups: BTreeMap<String, GroupState>,
    instances: BTreeMap<String, String>,
    services: BTreeMap<(String, String), i64>,
    databases: BTreeMap<String, String>,
}

/// Shared in-memory provider state; clones see the same world
#[derive(Debug, Clone)]
pub struct InMemoryCloud {
    world: Arc<Mutex<World>>,
}

impl Default for InMemoryCloud {
    fn default() -> Self {
        Self::new()
    }
}

impl ServiceConnector for InMemoryCloud {
    fn connect(&self, service: &str, _region: &str) -> DeployResult<Arc<dyn ServiceClient>> {
        self.lock().connections += 1;
        Ok(Arc::new(MemoryService {
            service: service.to_string(),
            world: self.world.clone(),
        }))
    }
}

impl InMemoryCloud {
    /// Empty world in `eu-west-1`
    pub fn new() -> Self {
        Self {
            world: Arc::new(Mutex::new(World {
                region: "eu-west-1".to_string(),
                ..World::default()
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, World> {
        self.world.lock().unwrap_or_else(|p| p.into_inner())
    }

    // ------------------------------------------------------------------
    // Seeding
    // ------------------------------------------------------------------

    /// Create a function with an `ACTIVE` alias
    pub fn add_function(&self, name: &str) {
        let mut world = self.lock();
        let arn = format!(
            "arn:aws:lambda:{}:{}:function:{}",
            world.region, ACCOUNT_ID, name
        );
        world.functions.insert(
            name.to_string(),
            FunctionState {
                arn,
                aliases: vec!["ACTIVE".to_string()],
                policies: BTreeMap::new(),
            },
        );
    }

    /// Create an empty bucket
    pub fn add_bucket(&self, name: &str) {
        self.lock().buckets.insert(name.to_string(), json!({}));
    }

    /// Replace a bucket's notification configuration
    pub fn set_bucket_notifications(&self, name: &str, configuration: Value) {
        self.lock()
            .buckets
            .insert(name.to_string(), configuration);
    }

    /// Create a topic
    pub fn add_topic(&self, arn: &str) {
        self.lock().topics.insert(arn.to_string(), Vec::new());
    }

    /// Create a log group
    pub fn add_log_group(&self, name: &str) {
        self.lock().log_groups.insert(name.to_string(), Vec::new());
    }

    /// Create an edge distribution with an empty default cache behavior
    pub fn add_distribution(&self, id: &str) {
        self.lock().distributions.insert(
            id.to_string(),
            (
                1,
                json!({
                    "CallerReference": id,
                    "DefaultCacheBehavior": {
                        "TargetOriginId": "origin",
                        "LambdaFunctionAssociations": {"Quantity": 0, "Items": []}
                    }
                }),
            ),
        );
    }

    /// Register an existing stack
    pub fn put_stack(&self, name: &str, template: Value, parameters: &[(&str, &str)], status: &str) {
        let mut world = self.lock();
        let id = world.stack_id(name);
        let parameters = parameters
            .iter()
            .map(|(k, v)| json!({"ParameterKey": k, "ParameterValue": v}))
            .collect();
        world.stacks.push(StackState {
            name: name.to_string(),
            id,
            status: status.to_string(),
            deleted: false,
            parameters,
            template,
            outputs: Vec::new(),
            resources: Vec::new(),
            events: Vec::new(),
            pending: VecDeque::new(),
        });
        // history that predates any operation under test
        let stack = world.stacks.len() - 1;
        world.emit_event(stack, name, status, None);
    }

    /// Add a stack output
    pub fn add_stack_output(&self, stack: &str, key: &str, value: &str) {
        if let Some(state) = self.lock().live_stack_mut(stack) {
            state
                .outputs
                .push(json!({"OutputKey": key, "OutputValue": value}));
        }
    }

    /// Add a resource to a stack
    pub fn add_stack_resource(&self, stack: &str, logical_id: &str, physical_id: &str, kind: &str) {
        if let Some(state) = self.lock().live_stack_mut(stack) {
            state.resources.push(json!({
                "LogicalResourceId": logical_id,
                "PhysicalResourceId": physical_id,
                "ResourceType": kind,
                "ResourceStatus": "CREATE_COMPLETE",
            }));
        }
    }

    /// Script the event stream of the next operation on `stack`
    pub fn script_stack_events(&self, stack: &str, events: &[(&str, &str)]) {
        self.lock()
            .scripts
            .entry(stack.to_string())
            .or_default()
            .push_back(
                events
                    .iter()
                    .map(|(l, s)| (l.to_string(), s.to_string()))
                    .collect(),
            );
    }

    /// Create a scaling group whose members are running instances
    pub fn add_scaling_group(&self, name: &str, min: i64, max: i64, instances: &[&str]) {
        let mut world = self.lock();
        for id in instances {
            world.instances.insert(id.to_string(), "running".to_string());
        }
        world.groups.insert(
            name.to_string(),
            GroupState {
                min,
                max,
                desired: instances.len() as i64,
                suspended: Vec::new(),
                instances: instances.iter().map(|s| s.to_string()).collect(),
            },
        );
    }

    /// Create a standalone machine
    pub fn add_instance(&self, id: &str, state: &str) {
        self.lock()
            .instances
            .insert(id.to_string(), state.to_string());
    }

    /// Create a container service
    pub fn add_ecs_service(&self, cluster: &str, service: &str, desired: i64) {
        self.lock()
            .services
            .insert((cluster.to_string(), service.to_string()), desired);
    }

    /// Create a database instance
    pub fn add_database(&self, id: &str, status: &str) {
        self.lock()
            .databases
            .insert(id.to_string(), status.to_string());
    }

    /// Fail the next call of `service.operation` with `error`
    pub fn fail_next(&self, service: &str, operation: &str, error: CloudError) {
        self.lock()
            .failures
            .entry((service.to_string(), operation.to_string()))
            .or_default()
            .push_back(error);
    }

    /// Cancel `cancel` once the next call of `service.operation` was served
    pub fn cancel_after(&self, service: &str, operation: &str, cancel: Cancellation) {
        self.lock()
            .cancel_after
            .insert((service.to_string(), operation.to_string()), cancel);
    }

    /// Serve list results of `service.operation` in pages of `size`
    pub fn page_size(&self, service: &str, operation: &str, size: usize) {
        self.lock()
            .page_sizes
            .insert((service.to_string(), operation.to_string()), size.max(1));
    }

    // ------------------------------------------------------------------
    // Inspection
    // ------------------------------------------------------------------

    /// Every call issued so far
    pub fn calls(&self) -> Vec<RecordedCall> {
        self.lock().calls.clone()
    }

    /// Number of calls to `service.operation`
    pub fn calls_to(&self, service: &str, operation: &str) -> usize {
        self.lock()
            .calls
            .iter()
            .filter(|c| c.service == service && c.operation == operation)
            .count()
    }

    /// Number of service clients built
    pub fn connections(&self) -> usize {
        self.lock().connections
    }

    /// Bucket notification configuration
    pub fn bucket_notifications(&self, bucket: &str) -> Value {
        self.lock().buckets.get(bucket).cloned().unwrap_or(Value::Null)
    }

    /// Statements on a function's policy for `qualifier`
    pub fn policy_statements(&self, function: &str, qualifier: &str) -> Vec<Value> {
        self.lock()
            .functions
            .get(function)
            .and_then(|f| f.policies.get(qualifier).cloned())
            .unwrap_or_default()
    }

    /// Whether a function exists
    pub fn function_exists(&self, function: &str) -> bool {
        self.lock().functions.contains_key(function)
    }

    /// Whether a rule exists
    pub fn rule_exists(&self, name: &str) -> bool {
        self.lock().rules.contains_key(name)
    }

    /// State of a rule (`ENABLED`/`DISABLED`)
    pub fn rule_state(&self, name: &str) -> Option<String> {
        self.lock().rules.get(name).map(|r| r.state.clone())
    }

    /// Target ARNs of a rule
    pub fn rule_targets(&self, name: &str) -> Vec<String> {
        self.lock()
            .rules
            .get(name)
            .map(|r| r.targets.iter().map(|(_, arn)| arn.clone()).collect())
            .unwrap_or_default()
    }

    /// Subscriptions of a topic
    pub fn subscriptions(&self, topic: &str) -> Vec<Value> {
        self.lock().topics.get(topic).cloned().unwrap_or_default()
    }

    /// Subscription filters of a log group
    pub fn subscription_filters(&self, group: &str) -> Vec<Value> {
        self.lock().log_groups.get(group).cloned().unwrap_or_default()
    }

    /// Whether a log group exists
    pub fn log_group_exists(&self, group: &str) -> bool {
        self.lock().log_groups.contains_key(group)
    }

    /// Stream mappings
    pub fn event_source_mappings(&self) -> Vec<Value> {
        self.lock().mappings.clone()
    }

    /// Distribution configuration
    pub fn distribution_config(&self, id: &str) -> Value {
        self.lock()
            .distributions
            .get(id)
            .map(|(_, c)| c.clone())
            .unwrap_or(Value::Null)
    }

    /// Current status of a live stack
    pub fn stack_status(&self, name: &str) -> Option<String> {
        self.lock()
            .stacks
            .iter()
            .find(|s| s.name == name && !s.deleted)
            .map(|s| s.status.clone())
    }

    /// Whether an object was uploaded
    pub fn object(&self, bucket: &str, key: &str) -> Option<String> {
        self.lock()
            .objects
            .get(&(bucket.to_string(), key.to_string()))
            .cloned()
    }

    /// (min, max, desired, suspended processes) of a scaling group
    pub fn scaling_group(&self, name: &str) -> Option<(i64, i64, i64, Vec<String>)> {
        self.lock()
            .groups
            .get(name)
            .map(|g| (g.min, g.max, g.desired, g.suspended.clone()))
    }

    /// State of a machine
    pub fn instance_state(&self, id: &str) -> Option<String> {
        self.lock().instances.get(id).cloned()
    }

    /// Desired count of a container service
    pub fn ecs_desired_count(&self, cluster: &str, service: &str) -> Option<i64> {
        self.lock()
            .services
            .get(&(cluster.to_string(), service.to_string()))
            .copied()
    }

    /// Status of a database instance
    pub fn database_status(&self, id: &str) -> Option<String> {
        self.lock().databases.get(id).cloned()
    }
}

struct MemoryService {
    service: String,
    world: Arc<Mutex<World>>,
}

#[async_trait]
impl ServiceClient for MemoryService {
    async fn call(&self, operation: &str, params: Value) -> Result<Value, CloudError> {
        let mut world = self.world.lock().unwrap_or_else(|p| p.into_inner());
        world.calls.push(RecordedCall {
            service: self.service.clone(),
            operation: operation.to_string(),
            params: params.clone(),
        });
        let key = (self.service.clone(), operation.to_string());
        if let Some(error) = world.failures.get_mut(&key).and_then(VecDeque::pop_front) {
            return Err(error);
        }
        let req = Request {
            service: &self.service,
            operation,
            params: &params,
        };
        let result = match self.service.as_str() {
            "lambda" => world.lambda(&req),
            "s3" => world.s3(&req),
            "events" => world.events(&req),
            "sns" => world.sns(&req),
            "logs" => world.logs(&req),
            "cloudfront" => world.cloudfront(&req),
            "cloudformation" => world.cloudformation(&req),
            "autoscaling" => world.autoscaling(&req),
            "ec2" => world.ec2(&req),
            "ecs" => world.ecs(&req),
            "rds" => world.rds(&req),
            _ => Err(req.error("UnknownService", "service not simulated")),
        };
        if let Some(cancel) = world.cancel_after.remove(&key) {
            cancel.cancel();
        }
        result
    }
}

struct Request<'a> {
    service: &'a str,
    operation: &'a str,
    params: &'a Value,
}

impl Request<'_> {
    fn error(&self, code: &str, message: impl Into<String>) -> CloudError {
        CloudError::new(self.service, self.operation, code, message)
    }

    fn unsupported(&self) -> CloudError {
        self.error("InvalidAction", "operation not simulated")
    }

    fn str(&self, key: &str) -> Result<String, CloudError> {
        self.opt_str(key)
            .ok_or_else(|| self.error("ValidationException", format!("missing {key}")))
    }

    fn opt_str(&self, key: &str) -> Option<String> {
        self.params.get(key).and_then(Value::as_str).map(str::to_string)
    }

    fn i64(&self, key: &str) -> Option<i64> {
        self.params.get(key).and_then(Value::as_i64)
    }

    fn strings(&self, key: &str) -> Vec<String> {
        self.params
            .get(key)
            .and_then(Value::as_array)
            .map(|a| a.iter().filter_map(Value::as_str).map(str::to_string).collect())
            .unwrap_or_default()
    }

    /// Values of the `instance-state-name` filter, if any
    fn state_filter(&self) -> Option<Vec<String>> {
        self.params
            .get("Filters")?
            .as_array()?
            .iter()
            .find(|f| f["Name"] == "instance-state-name")
            .and_then(|f| f["Values"].as_array())
            .map(|v| v.iter().filter_map(Value::as_str).map(str::to_string).collect())
    }
}

fn function_name(raw: &str) -> String {
    match raw.split_once(":function:") {
        Some((_, rest)) => rest.split(':').next().unwrap_or(rest).to_string(),
        None => raw.to_string(),
    }
}

impl World {
    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    fn now(&mut self) -> DateTime<Utc> {
        self.clock += 1;
        let base = Utc
            .with_ymd_and_hms(2026, 1, 19, 12, 0, 0)
            .single()
            .unwrap_or_default();
        base + ChronoDuration::seconds(self.clock)
    }

    fn stack_id(&mut self, name: &str) -> String {
        let n = self.next_id();
        format!(
            "arn:aws:cloudformation:{}:{}:stack/{}/{:08x}",
            self.region, ACCOUNT_ID, name, n
        )
    }

    fn live_stack_mut(&mut self, name: &str) -> Option<&mut StackState> {
        self.stacks
            .iter_mut()
            .find(|s| (s.name == name || s.id == name) && !s.deleted)
    }

    fn stack_index(&self, name_or_id: &str) -> Option<usize> {
        // ids address deleted stacks too; names only live ones
        self.stacks
            .iter()
            .position(|s| s.id == name_or_id)
            .or_else(|| {
                self.stacks
                    .iter()
                    .position(|s| s.name == name_or_id && !s.deleted)
            })
    }

    fn emit_event(&mut self, stack: usize, logical_id: &str, status: &str, reason: Option<&str>) {
        let timestamp = self.now();
        let n = self.next_id();
        let state = &mut self.stacks[stack];
        let mut event = json!({
            "EventId": format!("{}-{:06}", logical_id, n),
            "StackName": state.name,
            "StackId": state.id,
            "LogicalResourceId": logical_id,
            "ResourceStatus": status,
            "Timestamp": timestamp.to_rfc3339(),
        });
        if let Some(reason) = reason {
            event["ResourceStatusReason"] = json!(reason);
        }
        state.events.push(event);
        if logical_id == state.name {
            state.status = status.to_string();
            if status == "DELETE_COMPLETE" {
                state.deleted = true;
            }
        }
    }

    fn queue_operation(&mut self, stack: usize, default: &[&str]) {
        let name = self.stacks[stack].name.clone();
        let script = self
            .scripts
            .get_mut(&name)
            .and_then(VecDeque::pop_front)
            .unwrap_or_else(|| {
                default
                    .iter()
                    .map(|s| (name.clone(), s.to_string()))
                    .collect()
            });
        self.stacks[stack].pending = script.into();
    }

    fn policy_document(statements: &[Value]) -> String {
        json!({"Version": "2012-10-17", "Id": "default", "Statement": statements}).to_string()
    }

    // ------------------------------------------------------------------
    // lambda + logs
    // ------------------------------------------------------------------

    fn lambda(&mut self, req: &Request<'_>) -> Result<Value, CloudError> {
        match req.operation {
            "get_function" => {
                let name = function_name(&req.str("FunctionName")?);
                let f = self.function(req, &name)?;
                Ok(json!({"Configuration": {"FunctionName": name, "FunctionArn": f.arn}}))
            }
            "get_alias" => {
                let name = function_name(&req.str("FunctionName")?);
                let alias = req.str("Name")?;
                let f = self.function(req, &name)?;
                if !f.aliases.contains(&alias) {
                    return Err(req.error(
                        "ResourceNotFoundException",
                        format!("Alias not found: {}:{}", f.arn, alias),
                    ));
                }
                Ok(json!({
                    "AliasArn": format!("{}:{}", f.arn, alias),
                    "Name": alias,
                    "FunctionVersion": "1",
                }))
            }
            "get_policy" => {
                let name = function_name(&req.str("FunctionName")?);
                let qualifier = req.opt_str("Qualifier").unwrap_or_default();
                let f = self.function(req, &name)?;
                match f.policies.get(&qualifier) {
                    Some(statements) if !statements.is_empty() => {
                        Ok(json!({"Policy": Self::policy_document(statements)}))
                    }
                    _ => Err(req.error(
                        "ResourceNotFoundException",
                        "The resource you requested does not exist.",
                    )),
                }
            }
            "add_permission" => {
                let name = function_name(&req.str("FunctionName")?);
                let qualifier = req.opt_str("Qualifier").unwrap_or_default();
                let sid = req.str("StatementId")?;
                let principal = req.str("Principal")?;
                let action = req.str("Action")?;
                let source_arn = req.opt_str("SourceArn");
                let f = self.function_mut(req, &name)?;
                let resource = if qualifier.is_empty() {
                    f.arn.clone()
                } else {
                    format!("{}:{}", f.arn, qualifier)
                };
                let statements = f.policies.entry(qualifier).or_default();
                if statements.iter().any(|s| s["Sid"] == sid.as_str()) {
                    return Err(req.error(
                        "ResourceConflictException",
                        format!("The statement id ({sid}) provided already exists."),
                    ));
                }
                let mut statement = json!({
                    "Sid": sid,
                    "Effect": "Allow",
                    "Principal": {"Service": principal},
                    "Action": action,
                    "Resource": resource,
                });
                if let Some(source_arn) = source_arn {
                    statement["Condition"] = json!({"ArnLike": {"AWS:SourceArn": source_arn}});
                }
                statements.push(statement.clone());
                Ok(json!({"Statement": statement.to_string()}))
            }
            "remove_permission" => {
                let name = function_name(&req.str("FunctionName")?);
                let qualifier = req.opt_str("Qualifier").unwrap_or_default();
                let sid = req.str("StatementId")?;
                let f = self.function_mut(req, &name)?;
                let statements = f.policies.entry(qualifier).or_default();
                let before = statements.len();
                statements.retain(|s| s["Sid"] != sid.as_str());
                if statements.len() == before {
                    return Err(req.error(
                        "ResourceNotFoundException",
                        format!("Statement {sid} is not found in resource policy."),
                    ));
                }
                Ok(json!({}))
            }
            "delete_function" => {
                let name = function_name(&req.str("FunctionName")?);
                self.function(req, &name)?;
                self.functions.remove(&name);
                Ok(json!({}))
            }
            "list_event_source_mappings" => {
                let source = req.opt_str("EventSourceArn");
                let function = req.opt_str("FunctionName");
                let mappings = self
                    .mappings
                    .iter()
                    .filter(|m| source.as_deref().map_or(true, |s| m["EventSourceArn"] == s))
                    .filter(|m| {
                        function.as_deref().map_or(true, |f| {
                            m["FunctionArn"] == f
                                || function_name(m["FunctionArn"].as_str().unwrap_or_default()) == f
                        })
                    })
                    .cloned()
                    .collect::<Vec<_>>();
                Ok(json!({"EventSourceMappings": mappings}))
            }
            "create_event_source_mapping" => {
                let function = req.str("FunctionName")?;
                let source = req.str("EventSourceArn")?;
                if self
                    .mappings
                    .iter()
                    .any(|m| m["FunctionArn"] == function.as_str() && m["EventSourceArn"] == source.as_str())
                {
                    return Err(req.error(
                        "ResourceConflictException",
                        "The event source arn and function provided mapping already exists.",
                    ));
                }
                let enabled = req.params.get("Enabled").and_then(Value::as_bool).unwrap_or(true);
                let id = format!("00000000-0000-4000-8000-{:012}", self.next_id());
                let mapping = json!({
                    "UUID": id,
                    "EventSourceArn": source,
                    "FunctionArn": function,
                    "BatchSize": req.i64("BatchSize").unwrap_or(100),
                    "State": if enabled { "Enabled" } else { "Disabled" },
                });
                self.mappings.push(mapping.clone());
                Ok(mapping)
            }
            "update_event_source_mapping" => {
                let id = req.str("UUID")?;
                let mapping = self
                    .mappings
                    .iter_mut()
                    .find(|m| m["UUID"] == id.as_str())
                    .ok_or_else(|| req.error("ResourceNotFoundException", "mapping not found"))?;
                if let Some(enabled) = req.params.get("Enabled").and_then(Value::as_bool) {
                    mapping["State"] = json!(if enabled { "Enabled" } else { "Disabled" });
                }
                if let Some(batch) = req.i64("BatchSize") {
                    mapping["BatchSize"] = json!(batch);
                }
                Ok(mapping.clone())
            }
            "delete_event_source_mapping" => {
                let id = req.str("UUID")?;
                let before = self.mappings.len();
                self.mappings.retain(|m| m["UUID"] != id.as_str());
                if self.mappings.len() == before {
                    return Err(req.error("ResourceNotFoundException", "mapping not found"));
                }
                Ok(json!({"UUID": id}))
            }
            _ => Err(req.unsupported()),
        }
    }

    fn function(&self, req: &Request<'_>, name: &str) -> Result<&FunctionState, CloudError> {
        self.functions.get(name).ok_or_else(|| {
            req.error(
                "ResourceNotFoundException",
                format!("Function not found: {name}"),
            )
        })
    }

    fn function_mut(
        &mut self,
        req: &Request<'_>,
        name: &str,
    ) -> Result<&mut FunctionState, CloudError> {
        self.functions.get_mut(name).ok_or_else(|| {
            req.error(
                "ResourceNotFoundException",
                format!("Function not found: {name}"),
            )
        })
    }

    /// One page of `items`; the token is the offset of the next page
    fn page(&self, req: &Request<'_>, items: Vec<Value>, items_key: &str, token_key: &str) -> Value {
        let key = (req.service.to_string(), req.operation.to_string());
        let Some(&size) = self.page_sizes.get(&key) else {
            return json!({ items_key: items });
        };
        let start = req
            .opt_str(token_key)
            .and_then(|t| t.parse::<usize>().ok())
            .unwrap_or(0)
            .min(items.len());
        let end = (start + size).min(items.len());
        let mut page = json!({ items_key: items[start..end].to_vec() });
        if end < items.len() {
            page[token_key] = json!(end.to_string());
        }
        page
    }

    fn logs(&mut self, req: &Request<'_>) -> Result<Value, CloudError> {
        let missing = || req.error("ResourceNotFoundException", "The specified log group does not exist.");
        match req.operation {
            "describe_log_groups" => {
                let prefix = req.opt_str("logGroupNamePrefix").unwrap_or_default();
                let region = self.region.clone();
                let groups: Vec<Value> = self
                    .log_groups
                    .keys()
                    .filter(|g| g.starts_with(&prefix))
                    .map(|g| {
                        json!({
                            "logGroupName": g,
                            "arn": format!("arn:aws:logs:{region}:{ACCOUNT_ID}:log-group:{g}:*"),
                        })
                    })
                    .collect();
                Ok(self.page(req, groups, "logGroups", "nextToken"))
            }
            "describe_subscription_filters" => {
                let group = req.str("logGroupName")?;
                let filters = self.log_groups.get(&group).ok_or_else(missing)?.clone();
                Ok(self.page(req, filters, "subscriptionFilters", "nextToken"))
            }
            "put_subscription_filter" => {
                let group = req.str("logGroupName")?;
                let name = req.str("filterName")?;
                let filter = json!({
                    "filterName": name,
                    "logGroupName": group,
                    "filterPattern": req.opt_str("filterPattern").unwrap_or_default(),
                    "destinationArn": req.str("destinationArn")?,
                });
                let filters = self.log_groups.get_mut(&group).ok_or_else(missing)?;
                filters.retain(|f| f["filterName"] != name.as_str());
                filters.push(filter);
                Ok(json!({}))
            }
            "delete_subscription_filter" => {
                let group = req.str("logGroupName")?;
                let name = req.str("filterName")?;
                let filters = self.log_groups.get_mut(&group).ok_or_else(missing)?;
                let before = filters.len();
                filters.retain(|f| f["filterName"] != name.as_str());
                if filters.len() == before {
                    return Err(req.error(
                        "ResourceNotFoundException",
                        "The specified subscription filter does not exist.",
                    ));
                }
                Ok(json!({}))
            }
            "delete_log_group" => {
                let group = req.str("logGroupName")?;
                self.log_groups.remove(&group).ok_or_else(missing)?;
                Ok(json!({}))
            }
            _ => Err(req.unsupported()),
        }
    }

    // ------------------------------------------------------------------
    // s3 / events / sns / cloudfront
    // ------------------------------------------------------------------

    fn s3(&mut self, req: &Request<'_>) -> Result<Value, CloudError> {
        let bucket = req.str("Bucket")?;
        if !self.buckets.contains_key(&bucket) {
            return Err(req.error("NoSuchBucket", "The specified bucket does not exist"));
        }
        match req.operation {
            "head_bucket" => Ok(json!({})),
            "get_bucket_notification_configuration" => {
                let mut config = self.buckets[&bucket].clone();
                config["ResponseMetadata"] = json!({"HTTPStatusCode": 200});
                Ok(config)
            }
            "put_bucket_notification_configuration" => {
                let config = req
                    .params
                    .get("NotificationConfiguration")
                    .cloned()
                    .ok_or_else(|| req.error("MalformedXML", "missing NotificationConfiguration"))?;
                self.buckets.insert(bucket, config);
                Ok(json!({}))
            }
            "put_object" => {
                let key = req.str("Key")?;
                let body = req.opt_str("Body").unwrap_or_default();
                self.objects.insert((bucket, key), body);
                Ok(json!({"ETag": "\"etag\""}))
            }
            _ => Err(req.unsupported()),
        }
    }

    fn events(&mut self, req: &Request<'_>) -> Result<Value, CloudError> {
        let missing = |name: &str| {
            req.error(
                "ResourceNotFoundException",
                format!("Rule {name} does not exist."),
            )
        };
        match req.operation {
            "put_rule" => {
                let name = req.str("Name")?;
                let arn = format!("arn:aws:events:{}:{}:rule/{}", self.region, ACCOUNT_ID, name);
                let rule = self.rules.entry(name).or_default();
                rule.arn = arn.clone();
                rule.state = req.opt_str("State").unwrap_or_else(|| "ENABLED".to_string());
                rule.schedule = req.opt_str("ScheduleExpression");
                rule.pattern = req.opt_str("EventPattern");
                rule.description = req.opt_str("Description");
                Ok(json!({"RuleArn": arn}))
            }
            "describe_rule" => {
                let name = req.str("Name")?;
                let rule = self.rules.get(&name).ok_or_else(|| missing(&name))?;
                let mut out = json!({"Name": name, "Arn": rule.arn, "State": rule.state});
                if let Some(s) = &rule.schedule {
                    out["ScheduleExpression"] = json!(s);
                }
                if let Some(p) = &rule.pattern {
                    out["EventPattern"] = json!(p);
                }
                if let Some(d) = &rule.description {
                    out["Description"] = json!(d);
                }
                Ok(out)
            }
            "list_targets_by_rule" => {
                let name = req.str("Rule")?;
                let rule = self.rules.get(&name).ok_or_else(|| missing(&name))?;
                let targets: Vec<Value> = rule
                    .targets
                    .iter()
                    .map(|(id, arn)| json!({"Id": id, "Arn": arn}))
                    .collect();
                Ok(json!({"Targets": targets}))
            }
            "put_targets" => {
                let name = req.str("Rule")?;
                let rule = self.rules.get_mut(&name).ok_or_else(|| missing(&name))?;
                for target in req.params["Targets"].as_array().into_iter().flatten() {
                    let id = target["Id"].as_str().unwrap_or_default().to_string();
                    let arn = target["Arn"].as_str().unwrap_or_default().to_string();
                    rule.targets.retain(|(existing, _)| existing != &id);
                    rule.targets.push((id, arn));
                }
                Ok(json!({"FailedEntryCount": 0, "FailedEntries": []}))
            }
            "remove_targets" => {
                let name = req.str("Rule")?;
                let ids = req.strings("Ids");
                let rule = self.rules.get_mut(&name).ok_or_else(|| missing(&name))?;
                rule.targets.retain(|(id, _)| !ids.contains(id));
                Ok(json!({"FailedEntryCount": 0, "FailedEntries": []}))
            }
            "delete_rule" => {
                let name = req.str("Name")?;
                if let Some(rule) = self.rules.get(&name) {
                    if !rule.targets.is_empty() {
                        return Err(req.error(
                            "ValidationException",
                            "Rule can't be deleted since it has targets.",
                        ));
                    }
                }
                self.rules.remove(&name);
                Ok(json!({}))
            }
            "enable_rule" | "disable_rule" => {
                let name = req.str("Name")?;
                let rule = self.rules.get_mut(&name).ok_or_else(|| missing(&name))?;
                rule.state = if req.operation == "enable_rule" {
                    "ENABLED".to_string()
                } else {
                    "DISABLED".to_string()
                };
                Ok(json!({}))
            }
            _ => Err(req.unsupported()),
        }
    }

    fn sns(&mut self, req: &Request<'_>) -> Result<Value, CloudError> {
        match req.operation {
            "list_subscriptions_by_topic" => {
                let topic = req.str("TopicArn")?;
                let subs = self
                    .topics
                    .get(&topic)
                    .ok_or_else(|| req.error("NotFound", "Topic does not exist"))?;
                Ok(json!({"Subscriptions": subs}))
            }
            "subscribe" => {
                let topic = req.str("TopicArn")?;
                let protocol = req.str("Protocol")?;
                let endpoint = req.str("Endpoint")?;
                let n = self.next_id();
                let subs = self
                    .topics
                    .get_mut(&topic)
                    .ok_or_else(|| req.error("NotFound", "Topic does not exist"))?;
                if let Some(existing) = subs.iter().find(|s| s["Endpoint"] == endpoint.as_str()) {
                    return Ok(json!({"SubscriptionArn": existing["SubscriptionArn"]}));
                }
                let arn = format!("{topic}:{n:08x}");
                subs.push(json!({
                    "SubscriptionArn": arn,
                    "TopicArn": topic,
                    "Protocol": protocol,
                    "Endpoint": endpoint,
                }));
                Ok(json!({"SubscriptionArn": arn}))
            }
            "unsubscribe" => {
                let arn = req.str("SubscriptionArn")?;
                for subs in self.topics.values_mut() {
                    subs.retain(|s| s["SubscriptionArn"] != arn.as_str());
                }
                Ok(json!({}))
            }
            _ => Err(req.unsupported()),
        }
    }

    fn cloudfront(&mut self, req: &Request<'_>) -> Result<Value, CloudError> {
        let id = req.str("Id")?;
        let (etag, config) = self
            .distributions
            .get_mut(&id)
            .ok_or_else(|| req.error("NoSuchDistribution", "The specified distribution does not exist."))?;
        match req.operation {
            "get_distribution_config" => Ok(json!({
                "ETag": format!("E{etag}"),
                "DistributionConfig": config.clone(),
            })),
            "update_distribution" => {
                if req.opt_str("IfMatch").as_deref() != Some(format!("E{etag}").as_str()) {
                    return Err(req.error("PreconditionFailed", "The ETag does not match"));
                }
                *config = req.params["DistributionConfig"].clone();
                *etag += 1;
                Ok(json!({"ETag": format!("E{etag}")}))
            }
            _ => Err(req.unsupported()),
        }
    }

    // ------------------------------------------------------------------
    // cloudformation
    // ------------------------------------------------------------------

    fn cloudformation(&mut self, req: &Request<'_>) -> Result<Value, CloudError> {
        let missing = |name: &str| {
            req.error(
                "ValidationError",
                format!("Stack with id {name} does not exist"),
            )
        };
        match req.operation {
            "describe_stacks" => {
                let name = req.str("StackName")?;
                let idx = self.stack_index(&name).ok_or_else(|| missing(&name))?;
                let s = &self.stacks[idx];
                Ok(json!({"Stacks": [{
                    "StackName": s.name,
                    "StackId": s.id,
                    "StackStatus": s.status,
                    "Parameters": s.parameters,
                    "Outputs": s.outputs,
                }]}))
            }
            "describe_stack_events" => {
                let name = req.str("StackName")?;
                let idx = self.stack_index(&name).ok_or_else(|| missing(&name))?;
                if let Some((logical, status)) = self.stacks[idx].pending.pop_front() {
                    let reason = status.contains("FAILED").then_some("Resource handler returned failure");
                    self.emit_event(idx, &logical, &status, reason);
                }
                let events: Vec<Value> = self.stacks[idx].events.iter().rev().cloned().collect();
                Ok(json!({"StackEvents": events}))
            }
            "create_stack" => {
                let name = req.str("StackName")?;
                if self.stack_index(&name).is_some() {
                    return Err(req.error("AlreadyExistsException", format!("Stack [{name}] already exists")));
                }
                let template = self.template_from(req)?;
                let id = self.stack_id(&name);
                self.stacks.push(StackState {
                    name,
                    id: id.clone(),
                    status: "CREATE_IN_PROGRESS".to_string(),
                    deleted: false,
                    parameters: req.params["Parameters"].as_array().cloned().unwrap_or_default(),
                    template,
                    outputs: Vec::new(),
                    resources: Vec::new(),
                    events: Vec::new(),
                    pending: VecDeque::new(),
                });
                let idx = self.stacks.len() - 1;
                self.queue_operation(idx, &["CREATE_IN_PROGRESS", "CREATE_COMPLETE"]);
                Ok(json!({"StackId": id}))
            }
            "update_stack" => {
                let name = req.str("StackName")?;
                let idx = self.stack_index(&name).ok_or_else(|| missing(&name))?;
                let template = self.template_from(req)?;
                let parameters = req.params["Parameters"].as_array().cloned().unwrap_or_default();
                let scripted = self
                    .scripts
                    .get(&self.stacks[idx].name)
                    .is_some_and(|q| !q.is_empty());
                let unchanged = self.stacks[idx].template == template
                    && strip_flags(&self.stacks[idx].parameters) == strip_flags(&parameters);
                if unchanged && !scripted {
                    return Err(req.error("ValidationError", "No updates are to be performed."));
                }
                self.stacks[idx].template = template;
                self.stacks[idx].parameters = parameters;
                self.stacks[idx].status = "UPDATE_IN_PROGRESS".to_string();
                self.queue_operation(idx, &["UPDATE_IN_PROGRESS", "UPDATE_COMPLETE"]);
                Ok(json!({"StackId": self.stacks[idx].id}))
            }
            "delete_stack" => {
                let name = req.str("StackName")?;
                if let Some(idx) = self.stack_index(&name).filter(|i| !self.stacks[*i].deleted) {
                    if self.stacks[idx].status == "REVIEW_IN_PROGRESS" {
                        self.stacks[idx].deleted = true;
                        self.stacks[idx].status = "DELETE_COMPLETE".to_string();
                    } else {
                        self.stacks[idx].status = "DELETE_IN_PROGRESS".to_string();
                        self.queue_operation(idx, &["DELETE_IN_PROGRESS", "DELETE_COMPLETE"]);
                    }
                }
                Ok(json!({}))
            }
            "cancel_update_stack" => {
                let name = req.str("StackName")?;
                let idx = self.stack_index(&name).ok_or_else(|| missing(&name))?;
                if self.stacks[idx].status != "UPDATE_IN_PROGRESS" {
                    return Err(req.error(
                        "ValidationError",
                        "CancelUpdateStack cannot be called from current stack status",
                    ));
                }
                let stack = self.stacks[idx].name.clone();
                self.stacks[idx].pending = VecDeque::from(vec![
                    (stack.clone(), "UPDATE_ROLLBACK_IN_PROGRESS".to_string()),
                    (stack, "UPDATE_ROLLBACK_COMPLETE".to_string()),
                ]);
                Ok(json!({}))
            }
            "create_change_set" => self.create_change_set(req),
            "describe_change_set" => {
                let stack = req.str("StackName")?;
                let name = req.str("ChangeSetName")?;
                let cs = self
                    .change_sets
                    .get_mut(&(stack, name.clone()))
                    .ok_or_else(|| req.error("ChangeSetNotFound", format!("ChangeSet [{name}] does not exist")))?;
                if !cs.polled {
                    cs.polled = true;
                    return Ok(json!({"Status": "CREATE_IN_PROGRESS", "Changes": []}));
                }
                let mut out = json!({"Status": cs.status, "Changes": cs.changes});
                if let Some(reason) = &cs.reason {
                    out["StatusReason"] = json!(reason);
                }
                Ok(out)
            }
            "delete_change_set" => {
                let stack = req.str("StackName")?;
                let name = req.str("ChangeSetName")?;
                self.change_sets.remove(&(stack, name));
                Ok(json!({}))
            }
            "list_stack_resources" => {
                let name = req.str("StackName")?;
                let idx = self.stack_index(&name).ok_or_else(|| missing(&name))?;
                Ok(json!({"StackResourceSummaries": self.stacks[idx].resources}))
            }
            "get_template" => {
                let name = req.str("StackName")?;
                let idx = self.stack_index(&name).ok_or_else(|| missing(&name))?;
                Ok(json!({"TemplateBody": self.stacks[idx].template}))
            }
            _ => Err(req.unsupported()),
        }
    }

    fn template_from(&self, req: &Request<'_>) -> Result<Value, CloudError> {
        if let Some(body) = req.opt_str("TemplateBody") {
            return Ok(serde_json::from_str(&body).unwrap_or(Value::String(body)));
        }
        let url = req
            .opt_str("TemplateURL")
            .ok_or_else(|| req.error("ValidationError", "Either TemplateBody or TemplateURL must be specified"))?;
        let body = self
            .objects
            .iter()
            .find(|((bucket, key), _)| url.contains(bucket.as_str()) && url.ends_with(key.as_str()))
            .map(|(_, body)| body.clone())
            .ok_or_else(|| req.error("ValidationError", format!("TemplateURL must reference a valid object: {url}")))?;
        Ok(serde_json::from_str(&body).unwrap_or(Value::String(body)))
    }

    fn create_change_set(&mut self, req: &Request<'_>) -> Result<Value, CloudError> {
        let stack = req.str("StackName")?;
        let name = req.str("ChangeSetName")?;
        let kind = req.opt_str("ChangeSetType").unwrap_or_else(|| "UPDATE".to_string());
        let template = self.template_from(req)?;

        let previous = match kind.as_str() {
            "CREATE" => {
                if self.stack_index(&stack).is_some() {
                    return Err(req.error("AlreadyExistsException", format!("Stack [{stack}] already exists")));
                }
                let id = self.stack_id(&stack);
                self.stacks.push(StackState {
                    name: stack.clone(),
                    id,
                    status: "REVIEW_IN_PROGRESS".to_string(),
                    deleted: false,
                    parameters: Vec::new(),
                    template: Value::Null,
                    outputs: Vec::new(),
                    resources: Vec::new(),
                    events: Vec::new(),
                    pending: VecDeque::new(),
                });
                Map::new()
            }
            _ => {
                let idx = self.stack_index(&stack).ok_or_else(|| {
                    req.error("ValidationError", format!("Stack with id {stack} does not exist"))
                })?;
                resources_of(&self.stacks[idx].template)
            }
        };

        let changes = diff_resources(&previous, &resources_of(&template));
        let (status, reason) = if changes.is_empty() {
            (
                "FAILED".to_string(),
                Some("The submitted information didn't contain changes. Submit different information to create a change set.".to_string()),
            )
        } else {
            ("CREATE_COMPLETE".to_string(), None)
        };
        self.change_sets.insert(
            (stack.clone(), name.clone()),
            ChangeSetState {
                status,
                reason,
                changes,
                polled: false,
            },
        );
        Ok(json!({"Id": format!("arn:aws:cloudformation:{}:{}:changeSet/{}", self.region, ACCOUNT_ID, name), "StackId": stack}))
    }

    // ------------------------------------------------------------------
    // capacity-bearing resources
    // ------------------------------------------------------------------

    fn autoscaling(&mut self, req: &Request<'_>) -> Result<Value, CloudError> {
        match req.operation {
            "describe_scaling_process_types" => {
                let processes: Vec<Value> = SCALING_PROCESSES
                    .iter()
                    .map(|p| json!({"ProcessName": p}))
                    .collect();
                Ok(json!({"Processes": processes}))
            }
            "describe_auto_scaling_groups" => {
                let names = req.strings("AutoScalingGroupNames");
                let groups: Vec<Value> = self
                    .groups
                    .iter()
                    .filter(|(name, _)| names.is_empty() || names.contains(name))
                    .map(|(name, g)| {
                        json!({
                            "AutoScalingGroupName": name,
                            "MinSize": g.min,
                            "MaxSize": g.max,
                            "DesiredCapacity": g.desired,
                            "Instances": g.instances.iter().map(|id| json!({"InstanceId": id})).collect::<Vec<_>>(),
                            "SuspendedProcesses": g.suspended.iter().map(|p| json!({"ProcessName": p})).collect::<Vec<_>>(),
                        })
                    })
                    .collect();
                Ok(json!({"AutoScalingGroups": groups}))
            }
            "describe_auto_scaling_instances" => {
                let instances: Vec<Value> = self
                    .groups
                    .iter()
                    .flat_map(|(name, g)| {
                        g.instances.iter().map(move |id| {
                            json!({"InstanceId": id, "AutoScalingGroupName": name, "LifecycleState": "InService"})
                        })
                    })
                    .collect();
                Ok(json!({"AutoScalingInstances": instances}))
            }
            "update_auto_scaling_group" => {
                let name = req.str("AutoScalingGroupName")?;
                let min = req.i64("MinSize");
                let max = req.i64("MaxSize");
                let launched = {
                    let group = self
                        .groups
                        .get_mut(&name)
                        .ok_or_else(|| req.error("ValidationError", format!("AutoScalingGroup name not found - {name}")))?;
                    if let Some(min) = min {
                        group.min = min;
                    }
                    if let Some(max) = max {
                        group.max = max;
                    }
                    group.desired = req
                        .i64("DesiredCapacity")
                        .unwrap_or(group.desired)
                        .clamp(group.min, group.max.max(group.min));
                    let surplus = group.instances.len() as i64 - group.desired;
                    let terminated: Vec<String> = if surplus > 0 {
                        group.instances.drain(..surplus as usize).collect()
                    } else {
                        Vec::new()
                    };
                    (terminated, (-surplus).max(0))
                };
                let (terminated, to_launch) = launched;
                for id in terminated {
                    self.instances.insert(id, "terminated".to_string());
                }
                for _ in 0..to_launch {
                    let id = format!("i-{:017x}", self.next_id());
                    self.instances.insert(id.clone(), "running".to_string());
                    if let Some(group) = self.groups.get_mut(&name) {
                        group.instances.push(id);
                    }
                }
                Ok(json!({}))
            }
            "suspend_processes" | "resume_processes" => {
                let name = req.str("AutoScalingGroupName")?;
                let processes = req.strings("ScalingProcesses");
                let group = self
                    .groups
                    .get_mut(&name)
                    .ok_or_else(|| req.error("ValidationError", format!("AutoScalingGroup name not found - {name}")))?;
                if req.operation == "suspend_processes" {
                    for p in processes {
                        if !group.suspended.contains(&p) {
                            group.suspended.push(p);
                        }
                    }
                } else {
                    group.suspended.retain(|p| !processes.contains(p));
                }
                Ok(json!({}))
            }
            _ => Err(req.unsupported()),
        }
    }

    fn ec2(&mut self, req: &Request<'_>) -> Result<Value, CloudError> {
        let ids = req.strings("InstanceIds");
        for id in &ids {
            if !self.instances.contains_key(id) {
                return Err(req.error(
                    "InvalidInstanceID.NotFound",
                    format!("The instance ID '{id}' does not exist"),
                ));
            }
        }
        match req.operation {
            "describe_instance_status" => {
                let states = req.state_filter();
                let statuses: Vec<Value> = ids
                    .iter()
                    .filter_map(|id| self.instances.get(id).map(|s| (id, s)))
                    .filter(|(_, s)| states.as_ref().map_or(true, |f| f.contains(s)))
                    .map(|(id, s)| json!({"InstanceId": id, "InstanceState": {"Name": s}}))
                    .collect();
                Ok(json!({"InstanceStatuses": statuses}))
            }
            "stop_instances" | "start_instances" => {
                let target = if req.operation == "stop_instances" { "stopped" } else { "running" };
                for id in ids {
                    self.instances.insert(id, target.to_string());
                }
                Ok(json!({}))
            }
            _ => Err(req.unsupported()),
        }
    }

    fn ecs(&mut self, req: &Request<'_>) -> Result<Value, CloudError> {
        match req.operation {
            "describe_services" => {
                let cluster = req.str("cluster")?;
                let services: Vec<Value> = req
                    .strings("services")
                    .into_iter()
                    .filter_map(|name| {
                        self.services
                            .get(&(cluster.clone(), name.clone()))
                            .map(|desired| json!({"serviceName": name, "desiredCount": desired}))
                    })
                    .collect();
                Ok(json!({"services": services}))
            }
            "update_service" => {
                let cluster = req.str("cluster")?;
                let service = req.str("service")?;
                let desired = req
                    .i64("desiredCount")
                    .ok_or_else(|| req.error("InvalidParameterException", "missing desiredCount"))?;
                let entry = self
                    .services
                    .get_mut(&(cluster, service.clone()))
                    .ok_or_else(|| req.error("ServiceNotFoundException", "Service not found."))?;
                *entry = desired;
                Ok(json!({"service": {"serviceName": service, "desiredCount": desired}}))
            }
            _ => Err(req.unsupported()),
        }
    }

    fn rds(&mut self, req: &Request<'_>) -> Result<Value, CloudError> {
        let id = req.str("DBInstanceIdentifier")?;
        let status = self
            .databases
            .get_mut(&id)
            .ok_or_else(|| req.error("DBInstanceNotFound", format!("DBInstance {id} not found.")))?;
        match req.operation {
            "describe_db_instances" => Ok(json!({"DBInstances": [{
                "DBInstanceIdentifier": id,
                "DBInstanceStatus": status.clone(),
            }]})),
            "stop_db_instance" => {
                *status = "stopped".to_string();
                Ok(json!({}))
            }
            "start_db_instance" => {
                *status = "available".to_string();
                Ok(json!({}))
            }
            _ => Err(req.unsupported()),
        }
    }
}

fn strip_flags(parameters: &[Value]) -> Vec<(Value, Value)> {
    parameters
        .iter()
        .map(|p| (p["ParameterKey"].clone(), p["ParameterValue"].clone()))
        .collect()
}

fn resources_of(template: &Value) -> Map<String, Value> {
    template
        .get("Resources")
        .and_then(Value::as_object)
        .cloned()
        .unwrap_or_default()
}

fn diff_resources(previous: &Map<String, Value>, next: &Map<String, Value>) -> Vec<Value> {
    let change = |action: &str, id: &str, resource: &Value| {
        json!({"Type": "Resource", "ResourceChange": {
            "Action": action,
            "LogicalResourceId": id,
            "ResourceType": resource["Type"],
        }})
    };
    let mut changes = Vec::new();
    for (id, resource) in next {
        match previous.get(id) {
            None => changes.push(change("Add", id, resource)),
            Some(old) if old != resource => changes.push(change("Modify", id, resource)),
            Some(_) => {}
        }
    }
    for (id, resource) in previous {
        if !next.contains_key(id) {
            changes.push(change("Remove", id, resource));
        }
    }
    changes
}
