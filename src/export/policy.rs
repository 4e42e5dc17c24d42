//! Export policy: signals, batching settings and resource attributes

use opentelemetry::{KeyValue, Value};
use opentelemetry_sdk::{logs, trace, Resource};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use crate::config::ObservabilityOptions;

/// Telemetry signal handled by an exporter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Signal {
    Logs,
    Traces,
    Metrics,
}

impl Signal {
    pub const ALL: [Signal; 3] = [Signal::Logs, Signal::Traces, Signal::Metrics];

    pub fn as_str(&self) -> &'static str {
        match self {
            Signal::Logs => "logs",
            Signal::Traces => "traces",
            Signal::Metrics => "metrics",
        }
    }

    /// OTLP/HTTP path appended to the collector URL; gRPC uses the bare URL
    pub fn path(&self) -> &'static str {
        match self {
            Signal::Logs => "/v1/logs",
            Signal::Traces => "/v1/traces",
            Signal::Metrics => "/v1/metrics",
        }
    }
}

impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How appended items are grouped before export
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportMode {
    /// Flush on batch size or scheduled delay
    #[default]
    Batch,
    /// Flush after every appended item
    Immediate,
}

/// Wire protocol toward the collector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OtlpProtocol {
    #[default]
    HttpJson,
    Grpc,
}

impl fmt::Display for OtlpProtocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OtlpProtocol::HttpJson => f.write_str("http_json"),
            OtlpProtocol::Grpc => f.write_str("grpc"),
        }
    }
}

/// Value of a resource attribute
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttributeValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
}

impl fmt::Display for AttributeValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttributeValue::Bool(v) => write!(f, "{}", v),
            AttributeValue::Int(v) => write!(f, "{}", v),
            AttributeValue::Float(v) => write!(f, "{}", v),
            AttributeValue::String(v) => write!(f, "{}", v),
        }
    }
}

impl From<&str> for AttributeValue {
    fn from(value: &str) -> Self {
        AttributeValue::String(value.to_string())
    }
}

impl From<i64> for AttributeValue {
    fn from(value: i64) -> Self {
        AttributeValue::Int(value)
    }
}

impl From<bool> for AttributeValue {
    fn from(value: bool) -> Self {
        AttributeValue::Bool(value)
    }
}

impl From<f64> for AttributeValue {
    fn from(value: f64) -> Self {
        AttributeValue::Float(value)
    }
}

impl From<&AttributeValue> for Value {
    fn from(value: &AttributeValue) -> Self {
        match value {
            AttributeValue::Bool(v) => Value::Bool(*v),
            AttributeValue::Int(v) => Value::I64(*v),
            AttributeValue::Float(v) => Value::F64(*v),
            AttributeValue::String(v) => Value::from(v.clone()),
        }
    }
}

/// Resource attribute key that is always present
pub const SERVICE_NAME_ATTRIBUTE: &str = "service.name";

/// Static metadata attached to every exported batch
///
/// `service.name` always comes first and cannot be overridden by the extra
/// attributes.
#[derive(Debug, Clone, PartialEq)]
pub struct ResourceAttributes(Vec<(String, AttributeValue)>);

impl ResourceAttributes {
    pub fn new(service_name: &str, extra: &BTreeMap<String, AttributeValue>) -> Self {
        let mut attributes = vec![(
            SERVICE_NAME_ATTRIBUTE.to_string(),
            AttributeValue::from(service_name),
        )];
        attributes.extend(
            extra
                .iter()
                .filter(|(key, _)| key.as_str() != SERVICE_NAME_ATTRIBUTE)
                .map(|(key, value)| (key.clone(), value.clone())),
        );
        Self(attributes)
    }

    pub fn get(&self, key: &str) -> Option<&AttributeValue> {
        self.0.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    pub fn iter(&self) -> impl Iterator<Item = &(String, AttributeValue)> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// SDK resource shared by the providers of every signal
    pub fn to_resource(&self) -> Resource {
        self.iter()
            .fold(Resource::builder(), |builder, (key, value)| {
                if key == SERVICE_NAME_ATTRIBUTE {
                    builder.with_service_name(Value::from(value))
                } else {
                    builder.with_attribute(KeyValue::new(key.clone(), Value::from(value)))
                }
            })
            .build()
    }
}

/// Batching and delivery settings of one exporter
#[derive(Debug, Clone, PartialEq)]
pub struct ExportBatchPolicy {
    pub signal: Signal,
    pub mode: ExportMode,
    pub endpoint: String,
    pub protocol: OtlpProtocol,
    pub resource: ResourceAttributes,
    pub max_batch_size: usize,
    pub max_queue_size: usize,
    pub scheduled_delay: Duration,
    pub export_timeout: Duration,
}

impl ExportBatchPolicy {
    pub fn from_options(signal: Signal, options: &ObservabilityOptions) -> Self {
        let export = &options.export;
        let endpoint = match export.protocol {
            OtlpProtocol::HttpJson => options.endpoint_for(signal),
            OtlpProtocol::Grpc => options.collector_url.trim_end_matches('/').to_string(),
        };
        Self {
            signal,
            mode: export.mode,
            endpoint,
            protocol: export.protocol,
            resource: ResourceAttributes::new(&options.service_name, &options.resource_attributes),
            max_batch_size: export.max_batch_size,
            max_queue_size: export.max_queue_size,
            scheduled_delay: Duration::from_millis(export.scheduled_delay_ms),
            export_timeout: Duration::from_millis(export.export_timeout_ms),
        }
    }

    /// Items that trigger a flush
    ///
    /// Immediate mode still queues; each record is exported on its own as
    /// soon as the processor's worker picks it up.
    pub fn effective_batch_size(&self) -> usize {
        match self.mode {
            ExportMode::Batch => self.max_batch_size.max(1),
            ExportMode::Immediate => 1,
        }
    }

    pub fn span_batch_config(&self) -> trace::BatchConfig {
        trace::BatchConfigBuilder::default()
            .with_max_queue_size(self.max_queue_size)
            .with_max_export_batch_size(self.effective_batch_size())
            .with_scheduled_delay(self.scheduled_delay)
            .build()
    }

    pub fn log_batch_config(&self) -> logs::BatchConfig {
        logs::BatchConfigBuilder::default()
            .with_max_queue_size(self.max_queue_size)
            .with_max_export_batch_size(self.effective_batch_size())
            .with_scheduled_delay(self.scheduled_delay)
            .build()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_service_name_first_and_not_overridable() {
        let mut extra = BTreeMap::new();
        extra.insert("service.name".to_string(), AttributeValue::from("spoofed"));
        extra.insert("index".to_string(), AttributeValue::Int(10));
        extra.insert("flag".to_string(), AttributeValue::Bool(true));
        extra.insert("value".to_string(), AttributeValue::Float(2.5));

        let resource = ResourceAttributes::new("users-api", &extra);

        assert_eq!(resource.len(), 4);
        assert_eq!(
            resource.iter().next().map(|(k, _)| k.as_str()),
            Some(SERVICE_NAME_ATTRIBUTE)
        );
        assert_eq!(
            resource.get(SERVICE_NAME_ATTRIBUTE),
            Some(&AttributeValue::from("users-api"))
        );
        assert_eq!(resource.get("index"), Some(&AttributeValue::Int(10)));
    }

    #[test]
    fn test_attribute_values_deserialize_untagged() {
        let parsed: BTreeMap<String, AttributeValue> =
            serde_json::from_str(r#"{"a": true, "b": 10, "c": 2.5, "d": "x"}"#).unwrap();

        assert_eq!(parsed["a"], AttributeValue::Bool(true));
        assert_eq!(parsed["b"], AttributeValue::Int(10));
        assert_eq!(parsed["c"], AttributeValue::Float(2.5));
        assert_eq!(parsed["d"], AttributeValue::from("x"));
    }

    #[test]
    fn test_policy_from_options() {
        let options = ObservabilityOptions {
            service_name: "svc".to_string(),
            collector_url: "http://collector:4318/".to_string(),
            ..ObservabilityOptions::default()
        };

        let policy = ExportBatchPolicy::from_options(Signal::Logs, &options);
        assert_eq!(policy.endpoint, "http://collector:4318/v1/logs");
        assert_eq!(policy.max_batch_size, 512);
        assert_eq!(policy.effective_batch_size(), 512);
        assert_eq!(policy.scheduled_delay, Duration::from_millis(5000));

        let immediate = ExportBatchPolicy {
            mode: ExportMode::Immediate,
            ..policy
        };
        assert_eq!(immediate.effective_batch_size(), 1);
    }

    #[test]
    fn test_grpc_policy_targets_bare_collector_url() {
        let mut options = ObservabilityOptions {
            collector_url: "http://collector:4317/".to_string(),
            ..ObservabilityOptions::default()
        };
        options.export.protocol = OtlpProtocol::Grpc;

        let policy = ExportBatchPolicy::from_options(Signal::Traces, &options);
        assert_eq!(policy.protocol, OtlpProtocol::Grpc);
        assert_eq!(policy.endpoint, "http://collector:4317");
    }

    #[test]
    fn test_resource_carries_service_name_and_extras() {
        let mut extra = BTreeMap::new();
        extra.insert("deployment.environment".to_string(), AttributeValue::from("test"));
        extra.insert("index".to_string(), AttributeValue::Int(10));

        let resource = ResourceAttributes::new("users-api", &extra).to_resource();

        assert_eq!(
            resource.get(&opentelemetry::Key::from_static_str(SERVICE_NAME_ATTRIBUTE)),
            Some(Value::from("users-api"))
        );
        assert_eq!(
            resource.get(&opentelemetry::Key::from_static_str("index")),
            Some(Value::I64(10))
        );
    }
}
