//! Exporter construction
//!
//! [`TelemetryExporters`] is the seam between the export router and the
//! transport. Production builds OTLP exporters with `opentelemetry-otlp`;
//! tests plug in the SDK's in-memory exporters.

use opentelemetry_otlp::{
    ExporterBuildError, LogExporter, MetricExporter, Protocol, SpanExporter, WithExportConfig,
};
use opentelemetry_sdk::logs::LogExporter as SdkLogExporter;
use opentelemetry_sdk::metrics::exporter::PushMetricExporter;
use opentelemetry_sdk::trace::SpanExporter as SdkSpanExporter;

use super::policy::{ExportBatchPolicy, OtlpProtocol, Signal};
use crate::error::TelemetryError;

/// Builds one exporter per signal from its batch policy
pub trait TelemetryExporters {
    type Logs: SdkLogExporter + 'static;
    type Spans: SdkSpanExporter + 'static;
    type Metrics: PushMetricExporter;

    fn logs(&self, policy: &ExportBatchPolicy) -> Result<Self::Logs, TelemetryError>;

    fn spans(&self, policy: &ExportBatchPolicy) -> Result<Self::Spans, TelemetryError>;

    fn metrics(&self, policy: &ExportBatchPolicy) -> Result<Self::Metrics, TelemetryError>;
}

/// OTLP exporters speaking http-json or gRPC, as the policy selects
///
/// gRPC exporters must be built inside the tokio runtime.
#[derive(Debug, Default, Clone, Copy)]
pub struct OtlpExporters;

fn build_error(signal: Signal, err: ExporterBuildError) -> TelemetryError {
    TelemetryError::Config(format!("failed to build OTLP {} exporter: {}", signal, err))
}

impl TelemetryExporters for OtlpExporters {
    type Logs = LogExporter;
    type Spans = SpanExporter;
    type Metrics = MetricExporter;

    fn logs(&self, policy: &ExportBatchPolicy) -> Result<LogExporter, TelemetryError> {
        match policy.protocol {
            OtlpProtocol::HttpJson => LogExporter::builder()
                .with_http()
                .with_protocol(Protocol::HttpJson)
                .with_endpoint(policy.endpoint.clone())
                .with_timeout(policy.export_timeout)
                .build(),
            OtlpProtocol::Grpc => LogExporter::builder()
                .with_tonic()
                .with_endpoint(policy.endpoint.clone())
                .with_timeout(policy.export_timeout)
                .build(),
        }
        .map_err(|e| build_error(policy.signal, e))
    }

    fn spans(&self, policy: &ExportBatchPolicy) -> Result<SpanExporter, TelemetryError> {
        match policy.protocol {
            OtlpProtocol::HttpJson => SpanExporter::builder()
                .with_http()
                .with_protocol(Protocol::HttpJson)
                .with_endpoint(policy.endpoint.clone())
                .with_timeout(policy.export_timeout)
                .build(),
            OtlpProtocol::Grpc => SpanExporter::builder()
                .with_tonic()
                .with_endpoint(policy.endpoint.clone())
                .with_timeout(policy.export_timeout)
                .build(),
        }
        .map_err(|e| build_error(policy.signal, e))
    }

    fn metrics(&self, policy: &ExportBatchPolicy) -> Result<MetricExporter, TelemetryError> {
        match policy.protocol {
            OtlpProtocol::HttpJson => MetricExporter::builder()
                .with_http()
                .with_protocol(Protocol::HttpJson)
                .with_endpoint(policy.endpoint.clone())
                .with_timeout(policy.export_timeout)
                .build(),
            OtlpProtocol::Grpc => MetricExporter::builder()
                .with_tonic()
                .with_endpoint(policy.endpoint.clone())
                .with_timeout(policy.export_timeout)
                .build(),
        }
        .map_err(|e| build_error(policy.signal, e))
    }
}
