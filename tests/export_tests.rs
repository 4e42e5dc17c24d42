/// Integration tests for OTLP export routing, batching and transport
mod common;

use axum::http::HeaderMap;
use common::{alice, InMemoryExporters};
use httpmock::prelude::*;
use opentelemetry::trace::{SpanKind, Status};
use opentelemetry::{Key, Value};
use opentelemetry_sdk::logs::InMemoryLogExporterBuilder;
use pii_telemetry::config::{ObservabilityOptions, SinkKind};
use pii_telemetry::export::{AttributeValue, ExportMode, ExportRouter, OtlpExporters, OtlpProtocol};
use pii_telemetry::observability::{in_span, AmbientContext, Severity, TraceCorrelator};
use pii_telemetry::redaction::PolicyResolver;
use pii_telemetry::server::build_pipeline;
use std::sync::Arc;
use std::time::{Duration, Instant};

fn export_options() -> ObservabilityOptions {
    let mut options = common::options(true);
    options.logging.sinks = vec![SinkKind::Otlp];
    options.collector_url = "http://collector:4318".to_string();
    options
        .resource_attributes
        .insert("deployment.environment".to_string(), AttributeValue::from("test"));
    options.export.max_batch_size = 10;
    options.export.scheduled_delay_ms = 60_000;
    options
}

#[tokio::test(flavor = "multi_thread")]
async fn test_logs_and_spans_reach_the_collector_correlated() {
    let options = export_options();
    let exporters = InMemoryExporters::default();
    let router = ExportRouter::start(&options, &exporters, None).unwrap();

    let pipeline = build_pipeline(&options, Arc::new(PolicyResolver::new()), router.logger());
    let span = router
        .tracer()
        .start_server_span("GET /users", &HeaderMap::new())
        .unwrap();
    let trace_id = span.trace_id();

    AmbientContext::scope(in_span(span.clone(), async {
        let handle = TraceCorrelator::default().begin().unwrap();
        pipeline
            .event(Severity::Information, "Creating {@User}")
            .payload(&alice())
            .emit()
            .unwrap();
        handle.end();
    }))
    .await;
    span.end(Status::Ok);

    router.force_flush().unwrap();

    let logs = exporters.logs.get_emitted_logs().unwrap();
    assert_eq!(logs.len(), 1);
    assert_eq!(
        logs[0].resource.get(&Key::new("service.name")),
        Some(Value::from("users-api"))
    );
    assert_eq!(
        logs[0].resource.get(&Key::new("deployment.environment")),
        Some(Value::from("test"))
    );

    let record = &logs[0].record;
    assert_eq!(
        record.trace_context().map(|tc| tc.trace_id.to_string()),
        Some(trace_id.clone())
    );
    assert_eq!(record.severity_text(), Some("Information"));
    let exported = format!("{:?}", record);
    assert!(exported.contains("***********"));
    assert!(!exported.contains("Alice"));
    assert!(!exported.contains("123-45-6789"));

    let spans = exporters.spans.get_finished_spans().unwrap();
    assert_eq!(spans.len(), 1);
    assert_eq!(spans[0].span_context.trace_id().to_string(), trace_id);
    assert_eq!(spans[0].span_kind, SpanKind::Server);

    assert!(router.shutdown().await.is_clean());
}

#[tokio::test(flavor = "multi_thread")]
async fn test_shutdown_delivers_events_below_batch_threshold() {
    let options = export_options();
    let exporters = InMemoryExporters {
        logs: InMemoryLogExporterBuilder::default()
            .keep_records_on_shutdown()
            .build(),
        ..InMemoryExporters::default()
    };
    let router = ExportRouter::start(&options, &exporters, None).unwrap();
    let pipeline = build_pipeline(&options, Arc::new(PolicyResolver::new()), router.logger());

    for i in 0..3u64 {
        pipeline
            .event(Severity::Information, "Event {Index}")
            .property("Index", i)
            .emit()
            .unwrap();
    }
    assert!(exporters.logs.get_emitted_logs().unwrap().is_empty());

    let report = router.shutdown().await;

    assert!(report.logs.unwrap().is_ok());
    assert_eq!(exporters.logs.get_emitted_logs().unwrap().len(), 3);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_immediate_mode_exports_without_waiting_for_the_schedule() {
    let mut options = export_options();
    options.export.mode = ExportMode::Immediate;
    let exporters = InMemoryExporters::default();
    let router = ExportRouter::start(&options, &exporters, None).unwrap();
    let pipeline = build_pipeline(&options, Arc::new(PolicyResolver::new()), router.logger());

    pipeline.event(Severity::Information, "first").emit().unwrap();
    pipeline.event(Severity::Information, "second").emit().unwrap();

    let deadline = Instant::now() + Duration::from_secs(5);
    while exporters.logs.get_emitted_logs().unwrap().len() < 2 && Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(exporters.logs.get_emitted_logs().unwrap().len(), 2);

    router.shutdown().await;
}

#[tokio::test]
async fn test_feature_flags_gate_logs_and_traces_only() {
    let mut options = export_options();
    options.enable_tracing = false;
    options.enable_metrics = false;
    options.logging.sinks = vec![SinkKind::Console];

    let router = ExportRouter::start(&options, &InMemoryExporters::default(), None).unwrap();
    assert!(router.logger().is_none());
    assert!(!router.tracer().is_enabled());
    assert!(router.meter_provider().is_some());

    let report = router.shutdown().await;
    assert!(report.logs.is_none());
    assert!(report.traces.is_none());
    assert!(report.metrics.is_some());
}

#[tokio::test(flavor = "multi_thread")]
async fn test_prometheus_counters_are_exported_as_otlp_metrics() {
    let recorder = metrics_exporter_prometheus::PrometheusBuilder::new().build_recorder();
    let handle = Arc::new(recorder.handle());
    metrics::with_local_recorder(&recorder, || {
        metrics::counter!("http_server_requests_total", "route" => "/users").increment(4);
    });

    let mut options = export_options();
    options.export.metrics_interval_ms = 60_000;
    let exporters = InMemoryExporters::default();
    let router = ExportRouter::start(&options, &exporters, Some(handle)).unwrap();

    router.force_flush().unwrap();

    let exported = format!("{:?}", exporters.metrics.get_finished_metrics().unwrap());
    assert!(exported.contains("http_server_requests_total"));

    router.shutdown().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn test_grpc_protocol_starts_every_exporter() {
    let mut options = export_options();
    options.collector_url = "http://localhost:4317".to_string();
    options.export.protocol = OtlpProtocol::Grpc;
    options.export.export_timeout_ms = 100;

    let router = ExportRouter::start(&options, &OtlpExporters, None).unwrap();
    assert!(router.logger().is_some());
    assert!(router.tracer().is_enabled());

    router.shutdown().await;
}

#[test]
fn test_http_json_logs_are_posted_to_the_signal_endpoint() {
    let server = MockServer::start();
    let logs = server.mock(|when, then| {
        when.method(POST)
            .path("/v1/logs")
            .header("content-type", "application/json");
        then.status(200)
            .header("content-type", "application/json")
            .body("{}");
    });

    let mut options = export_options();
    options.enable_tracing = false;
    options.collector_url = server.base_url();

    let router = ExportRouter::start(&options, &OtlpExporters, None).unwrap();
    let pipeline = build_pipeline(&options, Arc::new(PolicyResolver::new()), router.logger());
    pipeline
        .event(Severity::Information, "Creating {@User}")
        .payload(&alice())
        .emit()
        .unwrap();

    let report = router.shutdown_blocking();

    assert!(matches!(report.logs, Some(Ok(()))));
    logs.assert();
}

#[test]
fn test_stalled_collector_never_blocks_emit() {
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(POST);
        then.status(200).delay(Duration::from_secs(5));
    });

    let mut options = export_options();
    options.enable_tracing = false;
    options.collector_url = server.base_url();
    options.export.export_timeout_ms = 100;

    let router = ExportRouter::start(&options, &OtlpExporters, None).unwrap();
    let pipeline = build_pipeline(&options, Arc::new(PolicyResolver::new()), router.logger());

    let started = Instant::now();
    for _ in 0..25 {
        pipeline
            .event(Severity::Information, "Creating {@User}")
            .payload(&alice())
            .emit()
            .unwrap();
    }
    assert!(started.elapsed() < Duration::from_secs(1));

    let report = router.shutdown_blocking();
    assert!(report.logs.is_some());
}
