// Copyright (c) 2025 - Cowboy AI, Inc.
//! Event Source Adapters
//!
//! One adapter per trigger kind. Every adapter detects, creates, updates and
//! removes exactly one binding between its trigger and a function, and owns
//! the invoke permission the trigger needs (see [`permission`]).
//!
//! # Trigger Kinds
//!
//! | Declared fields                          | Kind              | Binding                         |
//! |------------------------------------------|-------------------|---------------------------------|
//! | `schedule` or `pattern`                  | [`RuleEventSource`]     | rule target                |
//! | `log_group_name_prefix` + `filter_name`  | [`LogSubscriptionSource`] | subscription filter      |
//! | `arn` of `s3`                            | [`ObjectEventSource`]   | bucket notification entry  |
//! | `arn` of `sns`                           | [`TopicEventSource`]    | topic subscription         |
//! | `arn` of `kinesis` / `dynamodb`          | [`StreamEventSource`]   | event source mapping       |
//! | `arn` of `cloudfront`                    | [`EdgeEventSource`]     | function association       |
//!
//! Selection happens once, in [`EventSource::from_config`]. The match over
//! [`EventSourceKind`] is exhaustive, so a new kind does not compile until it
//! has an adapter.

pub mod cloudfront;
pub mod logs;
pub mod permission;
pub mod rule;
pub mod s3;
pub mod sns;
pub mod stream;

pub use cloudfront::EdgeEventSource;
pub use logs::LogSubscriptionSource;
pub use permission::{PermissionGuard, PermissionStatement};
pub use rule::RuleEventSource;
pub use s3::ObjectEventSource;
pub use sns::TopicEventSource;
pub use stream::StreamEventSource;

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::arn::Arn;
use crate::cloud::CloudClient;
use crate::errors::{DeployError, DeployResult};

/// Whether a declared binding should exist or be removed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Ensure {
    #[default]
    Exists,
    Absent,
}

fn default_enabled() -> bool {
    true
}

/// One declared trigger binding
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EventSourceConfig {
    /// Trigger resource (bucket, topic, stream, distribution)
    #[serde(default)]
    pub arn: Option<String>,

    /// Rule name; derived from the function and expression when absent
    #[serde(default)]
    pub name: Option<String>,

    #[serde(default)]
    pub description: Option<String>,

    /// `rate(...)` or `cron(...)` expression
    #[serde(default)]
    pub schedule: Option<String>,

    /// Event pattern object
    #[serde(default)]
    pub pattern: Option<Value>,

    #[serde(default)]
    pub log_group_name_prefix: Option<String>,

    #[serde(default)]
    pub filter_name: Option<String>,

    #[serde(default)]
    pub filter_pattern: Option<String>,

    /// Object key prefix filter
    #[serde(default)]
    pub prefix: Option<String>,

    /// Object key suffix filter
    #[serde(default)]
    pub suffix: Option<String>,

    /// Bucket event names
    #[serde(default)]
    pub events: Vec<String>,

    #[serde(default)]
    pub batch_size: Option<u32>,

    #[serde(default)]
    pub starting_position: Option<String>,

    /// Edge event type (`viewer-request`, `origin-response`, ...)
    #[serde(default)]
    pub cloudfront_event: Option<String>,

    /// Edge cache behavior path; the default behavior when absent
    #[serde(default)]
    pub path_pattern: Option<String>,

    #[serde(default = "default_enabled")]
    pub enabled: bool,

    #[serde(default)]
    pub ensure: Ensure,
}

impl EventSourceConfig {
    /// Human-readable trigger identity for logs and reports
    pub fn label(&self) -> String {
        if let Some(arn) = &self.arn {
            return arn.clone();
        }
        if let Some(prefix) = &self.log_group_name_prefix {
            return format!("log groups {prefix}*");
        }
        match (&self.name, &self.schedule) {
            (Some(name), _) => format!("rule {name}"),
            (None, Some(schedule)) => format!("schedule {schedule}"),
            (None, None) => "event pattern".to_string(),
        }
    }
}

/// Parse a declared list; entries may be bare or wrapped in `event_source`
pub fn parse_event_sources(declared: &Value) -> DeployResult<Vec<EventSourceConfig>> {
    let entries = match declared {
        Value::Null => return Ok(Vec::new()),
        Value::Array(entries) => entries,
        other => {
            return Err(DeployError::Configuration(format!(
                "event sources must be a list, got {other}"
            )))
        }
    };

    entries
        .iter()
        .enumerate()
        .map(|(i, entry)| {
            let inner = entry.get("event_source").unwrap_or(entry);
            serde_json::from_value::<EventSourceConfig>(inner.clone())
                .map_err(|e| DeployError::Configuration(format!("event source #{i}: {e}")))
        })
        .collect()
}

/// Trigger kind, decided by which identifying fields are present
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventSourceKind {
    Object,
    Topic,
    Rule,
    LogSubscription,
    Stream,
    Edge,
}

impl EventSourceKind {
    /// Classify a declared entry
    pub fn classify(config: &EventSourceConfig) -> DeployResult<Self> {
        if config.schedule.is_some() || config.pattern.is_some() {
            return Ok(EventSourceKind::Rule);
        }
        if config.log_group_name_prefix.is_some() {
            if config.filter_name.is_none() {
                return Err(DeployError::Configuration(
                    "log subscription needs a filter_name".to_string(),
                ));
            }
            return Ok(EventSourceKind::LogSubscription);
        }
        let raw = config.arn.as_deref().ok_or_else(|| {
            DeployError::Configuration(
                "event source needs one of schedule, pattern, log_group_name_prefix or arn"
                    .to_string(),
            )
        })?;
        match Arn::parse(raw)?.service.as_str() {
            "s3" => Ok(EventSourceKind::Object),
            "sns" => Ok(EventSourceKind::Topic),
            "kinesis" | "dynamodb" => Ok(EventSourceKind::Stream),
            "cloudfront" => Ok(EventSourceKind::Edge),
            other => Err(DeployError::Configuration(format!(
                "unknown event source service '{other}' in {raw}"
            ))),
        }
    }
}

impl fmt::Display for EventSourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EventSourceKind::Object => "s3",
            EventSourceKind::Topic => "sns",
            EventSourceKind::Rule => "events",
            EventSourceKind::LogSubscription => "cloudwatch_logs",
            EventSourceKind::Stream => "stream",
            EventSourceKind::Edge => "cloudfront",
        };
        write!(f, "{name}")
    }
}

/// The function being wired, resolved once per call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FunctionRef {
    pub name: String,
    pub alias: String,
    /// Unqualified function ARN
    pub arn: String,
    /// Alias ARN; every binding targets this
    pub qualified_arn: String,
    pub region: String,
    pub account: String,
}

impl FunctionRef {
    /// Build from the function ARN and the alias ARN
    pub fn new(
        name: impl Into<String>,
        alias: impl Into<String>,
        arn: impl Into<String>,
        qualified_arn: impl Into<String>,
    ) -> DeployResult<Self> {
        let arn = arn.into();
        let parsed = Arn::parse(&arn)?;
        Ok(Self {
            name: name.into(),
            alias: alias.into(),
            qualified_arn: qualified_arn.into(),
            region: parsed.region,
            account: parsed.account,
            arn,
        })
    }
}

/// Observed remote state of one trigger/function pair
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BindingState {
    pub exists: bool,
    /// The live binding already has the declared parameters
    pub matches_declared: bool,
    /// Subscription arn, rule name, notification id or mapping uuid
    pub handle: Option<String>,
}

impl BindingState {
    pub fn absent() -> Self {
        Self::default()
    }

    pub fn found(handle: impl Into<String>, matches_declared: bool) -> Self {
        Self {
            exists: true,
            matches_declared,
            handle: Some(handle.into()),
        }
    }
}

/// Read-only projection of a live binding
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SourceStatus {
    pub kind: EventSourceKind,
    /// Trigger identity (arn or rule name)
    pub source: String,
    pub handle: Option<String>,
    pub enabled: bool,
}

/// Contract shared by every trigger kind
#[async_trait]
pub trait EventSourceAdapter: Send + Sync {
    /// Kind this adapter handles
    fn kind(&self) -> EventSourceKind;

    /// Trigger identity for reports
    fn source(&self) -> String;

    /// Look for a binding targeting `function`; never mutates
    async fn exists(&self, function: &FunctionRef) -> DeployResult<BindingState>;

    /// Create the binding, replacing any stale one for the same function
    async fn add(&self, function: &FunctionRef) -> DeployResult<()>;

    /// Add is an idempotent overwrite
    async fn update(&self, function: &FunctionRef) -> DeployResult<()> {
        self.add(function).await
    }

    /// Delete the binding and its permission
    async fn remove(&self, function: &FunctionRef) -> DeployResult<()>;

    /// Live binding details, `None` when absent
    async fn status(&self, function: &FunctionRef) -> DeployResult<Option<SourceStatus>>;

    async fn enable(&self, function: &FunctionRef) -> DeployResult<()> {
        self.add(function).await
    }

    async fn disable(&self, function: &FunctionRef) -> DeployResult<()> {
        self.remove(function).await
    }
}

/// Closed set of adapters, one variant per kind
#[derive(Debug)]
pub enum EventSource {
    Object(ObjectEventSource),
    Topic(TopicEventSource),
    Rule(RuleEventSource),
    LogSubscription(LogSubscriptionSource),
    Stream(StreamEventSource),
    Edge(EdgeEventSource),
}

impl EventSource {
    /// Pick and build the adapter for a declared entry
    pub fn from_config(client: &CloudClient, config: &EventSourceConfig) -> DeployResult<Self> {
        Ok(match EventSourceKind::classify(config)? {
            EventSourceKind::Object => EventSource::Object(ObjectEventSource::new(client, config)?),
            EventSourceKind::Topic => EventSource::Topic(TopicEventSource::new(client, config)?),
            EventSourceKind::Rule => EventSource::Rule(RuleEventSource::new(client, config)?),
            EventSourceKind::LogSubscription => {
                EventSource::LogSubscription(LogSubscriptionSource::new(client, config)?)
            }
            EventSourceKind::Stream => EventSource::Stream(StreamEventSource::new(client, config)?),
            EventSourceKind::Edge => EventSource::Edge(EdgeEventSource::new(client, config)?),
        })
    }

    fn adapter(&self) -> &dyn EventSourceAdapter {
        match self {
            EventSource::Object(a) => a,
            EventSource::Topic(a) => a,
            EventSource::Rule(a) => a,
            EventSource::LogSubscription(a) => a,
            EventSource::Stream(a) => a,
            EventSource::Edge(a) => a,
        }
    }
}

#[async_trait]
impl EventSourceAdapter for EventSource {
    fn kind(&self) -> EventSourceKind {
        self.adapter().kind()
    }

    fn source(&self) -> String {
        self.adapter().source()
    }

    async fn exists(&self, function: &FunctionRef) -> DeployResult<BindingState> {
        self.adapter().exists(function).await
    }

    async fn add(&self, function: &FunctionRef) -> DeployResult<()> {
        self.adapter().add(function).await
    }

    async fn update(&self, function: &FunctionRef) -> DeployResult<()> {
        self.adapter().update(function).await
    }

    async fn remove(&self, function: &FunctionRef) -> DeployResult<()> {
        self.adapter().remove(function).await
    }

    async fn status(&self, function: &FunctionRef) -> DeployResult<Option<SourceStatus>> {
        self.adapter().status(function).await
    }

    async fn enable(&self, function: &FunctionRef) -> DeployResult<()> {
        self.adapter().enable(function).await
    }

    async fn disable(&self, function: &FunctionRef) -> DeployResult<()> {
        self.adapter().disable(function).await
    }
}

/// Map not-found to `None`, keep every other outcome
pub(crate) fn absent_if_not_found<T>(result: DeployResult<T>) -> DeployResult<Option<T>> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(e) if e.is_not_found() => {
            tracing::debug!("Treating as absent: {}", e);
            Ok(None)
        }
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use test_case::test_case;

    fn config(value: Value) -> EventSourceConfig {
        serde_json::from_value(value).unwrap()
    }

    #[test_case(json!({"schedule": "rate(1 minute)"}), EventSourceKind::Rule ; "schedule")]
    #[test_case(json!({"pattern": {"source": ["aws.ec2"]}}), EventSourceKind::Rule ; "pattern")]
    #[test_case(json!({"log_group_name_prefix": "/app", "filter_name": "f"}), EventSourceKind::LogSubscription ; "logs")]
    #[test_case(json!({"arn": "arn:aws:s3:::b"}), EventSourceKind::Object ; "bucket")]
    #[test_case(json!({"arn": "arn:aws:sns:eu-west-1:1:t"}), EventSourceKind::Topic ; "topic")]
    #[test_case(json!({"arn": "arn:aws:kinesis:eu-west-1:1:stream/s"}), EventSourceKind::Stream ; "kinesis")]
    #[test_case(json!({"arn": "arn:aws:dynamodb:eu-west-1:1:table/t/stream/x"}), EventSourceKind::Stream ; "dynamodb")]
    #[test_case(json!({"arn": "arn:aws:cloudfront::1:distribution/E1"}), EventSourceKind::Edge ; "edge")]
    fn test_classify(value: Value, expected: EventSourceKind) {
        assert_eq!(EventSourceKind::classify(&config(value)).unwrap(), expected);
    }

    #[test_case(json!({}) ; "no discriminator")]
    #[test_case(json!({"arn": "arn:aws:sqs:eu-west-1:1:q"}) ; "unknown service")]
    #[test_case(json!({"log_group_name_prefix": "/app"}) ; "log without filter")]
    #[test_case(json!({"arn": "not-an-arn"}) ; "malformed arn")]
    fn test_classify_rejects(value: Value) {
        let err = EventSourceKind::classify(&config(value)).unwrap_err();
        assert!(matches!(err, DeployError::Configuration(_)));
    }

    #[test]
    fn test_parse_accepts_bare_and_wrapped_entries() {
        let declared = json!([
            {"event_source": {"arn": "arn:aws:s3:::b", "events": ["s3:ObjectCreated:*"]}},
            {"schedule": "rate(5 minutes)", "ensure": "absent"},
        ]);
        let parsed = parse_event_sources(&declared).unwrap();
        assert_eq!(parsed.len(), 2);
        assert_eq!(parsed[0].arn.as_deref(), Some("arn:aws:s3:::b"));
        assert!(parsed[0].enabled);
        assert_eq!(parsed[1].ensure, Ensure::Absent);
    }

    #[test]
    fn test_parse_rejects_unknown_ensure() {
        let declared = json!([{"schedule": "rate(5 minutes)", "ensure": "maybe"}]);
        assert!(matches!(
            parse_event_sources(&declared),
            Err(DeployError::Configuration(_))
        ));
    }

    #[test]
    fn test_parse_null_is_empty() {
        assert!(parse_event_sources(&Value::Null).unwrap().is_empty());
    }
}
