#![allow(dead_code)]

use opentelemetry_sdk::logs::InMemoryLogExporter;
use opentelemetry_sdk::metrics::InMemoryMetricExporter;
use opentelemetry_sdk::trace::{InMemorySpanExporter, Sampler, SdkTracerProvider};
use pii_telemetry::config::ObservabilityOptions;
use pii_telemetry::destructure;
use pii_telemetry::error::TelemetryError;
use pii_telemetry::export::{ExportBatchPolicy, TelemetryExporters};
use pii_telemetry::handlers::AppState;
use pii_telemetry::observability::{
    LogEvent, LogPipeline, LogSink, MemorySink, TraceCorrelator, Tracer,
};
use pii_telemetry::redaction::PolicyResolver;
use std::sync::Arc;

pub struct Customer {
    pub id: String,
    pub name: String,
    pub ssn: String,
}

destructure!(Customer {
    id,
    #[not_logged]
    name,
    #[log_masked(preserve_length)]
    ssn,
});

pub fn alice() -> Customer {
    Customer {
        id: "u1".to_string(),
        name: "Alice".to_string(),
        ssn: "123-45-6789".to_string(),
    }
}

pub fn options(pii_filtering: bool) -> ObservabilityOptions {
    ObservabilityOptions {
        service_name: "users-api".to_string(),
        enable_tracing: true,
        enable_pii_filtering: pii_filtering,
        ..ObservabilityOptions::default()
    }
}

pub fn pipeline_with(options: &ObservabilityOptions, sinks: Vec<Arc<dyn LogSink>>) -> LogPipeline {
    sinks
        .into_iter()
        .fold(LogPipeline::new(options, Arc::new(PolicyResolver::new())), |pipeline, sink| {
            pipeline.with_sink(sink)
        })
}

/// Always-on tracer whose finished spans land in `exporter`
pub fn tracer(exporter: &InMemorySpanExporter) -> Tracer {
    let provider = SdkTracerProvider::builder()
        .with_sampler(Sampler::AlwaysOn)
        .with_simple_exporter(exporter.clone())
        .build();
    Tracer::new(&provider)
}

/// Service state with an in-memory sink and no exporters
pub fn app_state(tracing_enabled: bool, sink: Arc<MemorySink>) -> AppState {
    let tracer = if tracing_enabled {
        tracer(&InMemorySpanExporter::default())
    } else {
        Tracer::disabled()
    };
    app_state_with_tracer(tracer, sink)
}

pub fn app_state_with_tracer(tracer: Tracer, sink: Arc<MemorySink>) -> AppState {
    let pipeline = pipeline_with(&options(true), vec![sink as Arc<dyn LogSink>]);
    let recorder = metrics_exporter_prometheus::PrometheusBuilder::new().build_recorder();

    AppState {
        pipeline: Arc::new(pipeline),
        tracer,
        correlator: TraceCorrelator::default(),
        metrics_handle: Arc::new(recorder.handle()),
    }
}

/// Collector stand-in keeping every exported record in memory
#[derive(Clone, Default)]
pub struct InMemoryExporters {
    pub logs: InMemoryLogExporter,
    pub spans: InMemorySpanExporter,
    pub metrics: InMemoryMetricExporter,
}

impl TelemetryExporters for InMemoryExporters {
    type Logs = InMemoryLogExporter;
    type Spans = InMemorySpanExporter;
    type Metrics = InMemoryMetricExporter;

    fn logs(&self, _policy: &ExportBatchPolicy) -> Result<InMemoryLogExporter, TelemetryError> {
        Ok(self.logs.clone())
    }

    fn spans(&self, _policy: &ExportBatchPolicy) -> Result<InMemorySpanExporter, TelemetryError> {
        Ok(self.spans.clone())
    }

    fn metrics(&self, _policy: &ExportBatchPolicy) -> Result<InMemoryMetricExporter, TelemetryError> {
        Ok(self.metrics.clone())
    }
}

/// Sink that refuses every event
pub struct FailingSink;

impl LogSink for FailingSink {
    fn name(&self) -> &str {
        "failing"
    }

    fn emit(&self, _event: &LogEvent) -> Result<(), TelemetryError> {
        Err(TelemetryError::SinkDeliveryFailure {
            sink: "failing".to_string(),
            reason: "disk full".to_string(),
        })
    }
}

/// Sink that panics on every event
pub struct PanickingSink;

impl LogSink for PanickingSink {
    fn name(&self) -> &str {
        "panicking"
    }

    fn emit(&self, _event: &LogEvent) -> Result<(), TelemetryError> {
        panic!("sink bug")
    }
}
