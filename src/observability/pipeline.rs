//! Log event pipeline
//!
//! Builds enriched events from call-site data and the ambient request
//! context, then fans them out to every configured sink.

use chrono::Utc;
use std::collections::BTreeMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use super::context::AmbientContext;
use super::correlation::SPAN_ID_PROPERTY;
use super::span::current_span;
use super::event::{LogEvent, Severity, APPLICATION_NAME_PROPERTY, PAYLOAD_PROPERTY};
use crate::config::ObservabilityOptions;
use crate::error::TelemetryError;
use crate::redaction::{destructure_raw, redact, PolicyResolver, RedactedValue, ToValue};

/// Destination for finished log events
///
/// `emit` is called on the request path and must not wait on the network;
/// remote delivery goes through a batching exporter.
pub trait LogSink: Send + Sync {
    fn name(&self) -> &str;

    fn emit(&self, event: &LogEvent) -> Result<(), TelemetryError>;
}

pub struct LogPipeline {
    service_name: String,
    pii_filtering: bool,
    minimum_level: Severity,
    resolver: Arc<PolicyResolver>,
    sinks: Vec<Arc<dyn LogSink>>,
    sink_failures: AtomicU64,
}

impl LogPipeline {
    pub fn new(options: &ObservabilityOptions, resolver: Arc<PolicyResolver>) -> Self {
        Self {
            service_name: options.service_name.clone(),
            pii_filtering: options.enable_pii_filtering,
            minimum_level: options.logging.level,
            resolver,
            sinks: Vec::new(),
            sink_failures: AtomicU64::new(0),
        }
    }

    pub fn with_sink(mut self, sink: Arc<dyn LogSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    pub fn is_enabled(&self, severity: Severity) -> bool {
        severity >= self.minimum_level
    }

    pub fn pii_filtering(&self) -> bool {
        self.pii_filtering
    }

    pub fn sink_names(&self) -> Vec<&str> {
        self.sinks.iter().map(|sink| sink.name()).collect()
    }

    /// Number of sink deliveries that failed since startup
    pub fn sink_failures(&self) -> u64 {
        self.sink_failures.load(Ordering::Relaxed)
    }

    /// Start building an event
    pub fn event<'p, 'v>(&'p self, severity: Severity, template: impl Into<String>) -> EventBuilder<'p, 'v> {
        EventBuilder {
            pipeline: self,
            severity,
            template: template.into(),
            properties: Vec::new(),
            payload: None,
        }
    }

    /// Assemble and dispatch one event
    ///
    /// Properties are merged in increasing precedence: service name, ambient
    /// properties (innermost last), call-site properties, then the payload
    /// under [`PAYLOAD_PROPERTY`]. A correlated `SpanId` always names the
    /// task's active span at emit time. Only a redaction policy error is returned;
    /// sink failures are counted and logged, never raised.
    pub fn emit(
        &self,
        severity: Severity,
        template: &str,
        properties: Vec<(String, RedactedValue)>,
        payload: Option<&dyn ToValue>,
    ) -> Result<(), TelemetryError> {
        if !self.is_enabled(severity) {
            return Ok(());
        }

        let mut merged = BTreeMap::new();
        merged.insert(
            APPLICATION_NAME_PROPERTY.to_string(),
            RedactedValue::from(self.service_name.as_str()),
        );
        merged.extend(AmbientContext::snapshot());
        // A child span started after correlation replaces the request's span id.
        if merged.contains_key(SPAN_ID_PROPERTY) {
            if let Some(span) = current_span() {
                merged.insert(SPAN_ID_PROPERTY.to_string(), RedactedValue::from(span.span_id()));
            }
        }
        merged.extend(properties);

        if let Some(payload) = payload {
            let value = if self.pii_filtering {
                redact(payload, &self.resolver)?
            } else {
                destructure_raw(payload)
            };
            merged.insert(PAYLOAD_PROPERTY.to_string(), value);
        }

        let event = LogEvent {
            timestamp: Utc::now(),
            severity,
            template: template.to_string(),
            properties: merged,
        };

        self.dispatch(&event);
        Ok(())
    }

    fn dispatch(&self, event: &LogEvent) {
        for sink in &self.sinks {
            let outcome = catch_unwind(AssertUnwindSafe(|| sink.emit(event)));
            let error = match outcome {
                Ok(Ok(())) => continue,
                Ok(Err(e)) => e,
                Err(_) => TelemetryError::SinkDeliveryFailure {
                    sink: sink.name().to_string(),
                    reason: "sink panicked".to_string(),
                },
            };

            self.sink_failures.fetch_add(1, Ordering::Relaxed);
            crate::metrics::record_sink_failure(sink.name());
            tracing::warn!(
                sink = %sink.name(),
                error = %error,
                "Log sink failed to accept event"
            );
        }
    }
}

/// Fluent construction of a single event
pub struct EventBuilder<'p, 'v> {
    pipeline: &'p LogPipeline,
    severity: Severity,
    template: String,
    properties: Vec<(String, RedactedValue)>,
    payload: Option<&'v dyn ToValue>,
}

impl<'p, 'v> EventBuilder<'p, 'v> {
    pub fn property(mut self, name: impl Into<String>, value: impl Into<RedactedValue>) -> Self {
        self.properties.push((name.into(), value.into()));
        self
    }

    pub fn payload(mut self, payload: &'v dyn ToValue) -> Self {
        self.payload = Some(payload);
        self
    }

    pub fn emit(self) -> Result<(), TelemetryError> {
        self.pipeline
            .emit(self.severity, &self.template, self.properties, self.payload)
    }
}
