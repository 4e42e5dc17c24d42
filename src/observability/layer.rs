//! Tracing layer bridging application `tracing` events into the log pipeline

use std::sync::Arc;
use tracing::{Event, Subscriber};
use tracing_subscriber::{layer::Context, registry::LookupSpan, Layer};

use super::event::{Severity, SOURCE_CONTEXT_PROPERTY};
use super::pipeline::LogPipeline;
use crate::redaction::RedactedValue;

/// Targets whose events stay in the diagnostic output and are never bridged
const INTERNAL_TARGETS: &[&str] = &[
    "pii_telemetry::export",
    "pii_telemetry::observability",
    "pii_telemetry::server",
    "pii_telemetry::signals",
    "hyper",
    "h2",
    "reqwest",
    "tonic",
    "tower_http",
    "opentelemetry",
    "opentelemetry_sdk",
    "opentelemetry-otlp",
    "opentelemetry_otlp",
];

/// True for events emitted by the telemetry machinery itself
pub fn is_internal_target(target: &str) -> bool {
    INTERNAL_TARGETS.iter().any(|prefix| {
        target == *prefix
            || target
                .strip_prefix(prefix)
                .is_some_and(|rest| rest.starts_with("::"))
    })
}

/// Forwards `tracing` events to [`LogPipeline::emit`]
///
/// The event message becomes the template and every other field a
/// call-site property. The event target is recorded as `SourceContext`.
pub struct PipelineLayer {
    pipeline: Arc<LogPipeline>,
}

impl PipelineLayer {
    pub fn new(pipeline: Arc<LogPipeline>) -> Self {
        Self { pipeline }
    }
}

impl<S> Layer<S> for PipelineLayer
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let metadata = event.metadata();
        if is_internal_target(metadata.target()) {
            return;
        }

        let severity = Severity::from(*metadata.level());
        if !self.pipeline.is_enabled(severity) {
            return;
        }

        struct FieldVisitor {
            message: Option<String>,
            fields: Vec<(String, RedactedValue)>,
        }

        impl tracing::field::Visit for FieldVisitor {
            fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn std::fmt::Debug) {
                let value_str = format!("{:?}", value);
                match field.name() {
                    "message" => self.message = Some(value_str.trim_matches('"').to_string()),
                    name => self
                        .fields
                        .push((name.to_string(), RedactedValue::from(value_str))),
                }
            }

            fn record_str(&mut self, field: &tracing::field::Field, value: &str) {
                match field.name() {
                    "message" => self.message = Some(value.to_string()),
                    name => self.fields.push((name.to_string(), RedactedValue::from(value))),
                }
            }

            fn record_i64(&mut self, field: &tracing::field::Field, value: i64) {
                self.fields
                    .push((field.name().to_string(), RedactedValue::from(value)));
            }

            fn record_u64(&mut self, field: &tracing::field::Field, value: u64) {
                self.fields
                    .push((field.name().to_string(), RedactedValue::from(value)));
            }

            fn record_f64(&mut self, field: &tracing::field::Field, value: f64) {
                self.fields
                    .push((field.name().to_string(), RedactedValue::from(value)));
            }

            fn record_bool(&mut self, field: &tracing::field::Field, value: bool) {
                self.fields
                    .push((field.name().to_string(), RedactedValue::from(value)));
            }
        }

        let mut visitor = FieldVisitor {
            message: None,
            fields: vec![(
                SOURCE_CONTEXT_PROPERTY.to_string(),
                RedactedValue::from(metadata.target()),
            )],
        };
        event.record(&mut visitor);

        // Events without a payload cannot fail redaction.
        let _ = self.pipeline.emit(
            severity,
            &visitor.message.unwrap_or_default(),
            visitor.fields,
            None,
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ObservabilityOptions;
    use crate::observability::sinks::MemorySink;
    use crate::redaction::PolicyResolver;
    use tracing_subscriber::layer::SubscriberExt;

    #[test]
    fn test_internal_targets() {
        assert!(is_internal_target("pii_telemetry::export::metrics_snapshot"));
        assert!(is_internal_target("opentelemetry_sdk"));
        assert!(is_internal_target("opentelemetry-otlp"));
        assert!(is_internal_target("hyper"));
        assert!(is_internal_target("hyper::proto::h1"));
        assert!(!is_internal_target("hyperion"));
        assert!(!is_internal_target("pii_telemetry::handlers::users"));
    }

    #[test]
    fn test_bridges_application_events() {
        let sink = Arc::new(MemorySink::new("memory"));
        let options = ObservabilityOptions {
            service_name: "bridge".to_string(),
            ..ObservabilityOptions::default()
        };
        let pipeline = Arc::new(
            LogPipeline::new(&options, Arc::new(PolicyResolver::new())).with_sink(sink.clone()),
        );
        let subscriber = tracing_subscriber::registry().with(PipelineLayer::new(pipeline));

        tracing::subscriber::with_default(subscriber, || {
            tracing::info!(target: "app::orders", order_id = 42u64, "Order {{order_id}} placed");
            tracing::warn!(target: "pii_telemetry::export::exporter", "internal");
        });

        let events = sink.events();
        assert_eq!(events.len(), 1);
        let event = &events[0];
        assert_eq!(event.severity, Severity::Information);
        assert_eq!(event.message(), "Order 42 placed");
        assert_eq!(
            event.property(SOURCE_CONTEXT_PROPERTY).and_then(|v| v.as_str()),
            Some("app::orders")
        );
    }
}
