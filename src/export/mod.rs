//! Export router
//!
//! Decides at startup which signals get an OTLP exporter, builds their batch
//! policies and owns the OpenTelemetry SDK providers until shutdown.
//!
//! | Signal  | Attached when                      |
//! |---------|------------------------------------|
//! | logs    | `otlp` is listed in logging sinks  |
//! | traces  | `enable_tracing`                   |
//! | metrics | always                             |

pub mod metrics_snapshot;
pub mod otlp;
pub mod policy;

pub use metrics_snapshot::{MetricKind, MetricPoint, PrometheusBridge};
pub use otlp::{OtlpExporters, TelemetryExporters};
pub use policy::{
    AttributeValue, ExportBatchPolicy, ExportMode, OtlpProtocol, ResourceAttributes, Signal,
};

use metrics_exporter_prometheus::PrometheusHandle;
use opentelemetry::logs::LoggerProvider as _;
use opentelemetry::metrics::MeterProvider as _;
use opentelemetry_sdk::error::{OTelSdkError, OTelSdkResult};
use opentelemetry_sdk::logs::{BatchLogProcessor, SdkLogger, SdkLoggerProvider};
use opentelemetry_sdk::metrics::{PeriodicReader, SdkMeterProvider};
use opentelemetry_sdk::trace::{BatchSpanProcessor, RandomIdGenerator, Sampler, SdkTracerProvider};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

use crate::config::{ObservabilityOptions, SinkKind};
use crate::error::TelemetryError;
use crate::observability::instrumentation::INSTRUMENTATION_SCOPE;
use crate::observability::Tracer;

/// Batch policies chosen for each signal; `None` means not exported
#[derive(Debug, Clone, PartialEq)]
pub struct ExportPlan {
    pub logs: Option<ExportBatchPolicy>,
    pub traces: Option<ExportBatchPolicy>,
    pub metrics: Option<ExportBatchPolicy>,
}

impl ExportPlan {
    pub fn signals(&self) -> Vec<Signal> {
        let mut signals = Vec::new();
        if self.logs.is_some() {
            signals.push(Signal::Logs);
        }
        if self.traces.is_some() {
            signals.push(Signal::Traces);
        }
        if self.metrics.is_some() {
            signals.push(Signal::Metrics);
        }
        signals
    }
}

/// Outcome of draining each provider that was running
///
/// `Ok` means the buffered tail was exported. Records lost earlier to a
/// full queue or a failed export are reported by the SDK's own diagnostics.
#[derive(Debug, Default)]
pub struct ShutdownReport {
    pub logs: Option<Result<(), TelemetryError>>,
    pub traces: Option<Result<(), TelemetryError>>,
    pub metrics: Option<Result<(), TelemetryError>>,
}

impl ShutdownReport {
    /// True when every running provider drained cleanly
    pub fn is_clean(&self) -> bool {
        [&self.logs, &self.traces, &self.metrics]
            .into_iter()
            .flatten()
            .all(|outcome| outcome.is_ok())
    }
}

fn sdk_outcome(signal: Signal, timeout: Duration, result: OTelSdkResult) -> Result<(), TelemetryError> {
    result.map_err(|e| match e {
        OTelSdkError::Timeout(_) => TelemetryError::ExportTimeout { signal, timeout },
        other => TelemetryError::Export {
            signal,
            message: other.to_string(),
        },
    })
}

pub struct ExportRouter {
    plan: ExportPlan,
    logs: Option<SdkLoggerProvider>,
    traces: Option<SdkTracerProvider>,
    metrics: Option<SdkMeterProvider>,
    bridge: Option<Arc<PrometheusBridge>>,
    snapshot_task: Option<JoinHandle<()>>,
}

impl ExportRouter {
    /// Decide which exporters to attach
    ///
    /// `enable_metrics` is not consulted: metrics export is always on.
    pub fn plan(options: &ObservabilityOptions) -> ExportPlan {
        let logs = options
            .logging
            .sinks
            .contains(&SinkKind::Otlp)
            .then(|| ExportBatchPolicy::from_options(Signal::Logs, options));
        let traces = options
            .enable_tracing
            .then(|| ExportBatchPolicy::from_options(Signal::Traces, options));
        let metrics = Some(ExportBatchPolicy::from_options(Signal::Metrics, options));

        ExportPlan {
            logs,
            traces,
            metrics,
        }
    }

    /// Build a provider for every planned signal
    ///
    /// Must be called from within a tokio runtime. The metrics snapshot task
    /// only runs when a Prometheus handle is given.
    pub fn start<E: TelemetryExporters>(
        options: &ObservabilityOptions,
        exporters: &E,
        metrics_handle: Option<Arc<PrometheusHandle>>,
    ) -> Result<Self, TelemetryError> {
        let plan = Self::plan(options);

        let logs = match &plan.logs {
            Some(policy) => {
                let processor = BatchLogProcessor::builder(exporters.logs(policy)?)
                    .with_batch_config(policy.log_batch_config())
                    .build();
                Some(
                    SdkLoggerProvider::builder()
                        .with_resource(policy.resource.to_resource())
                        .with_log_processor(processor)
                        .build(),
                )
            }
            None => None,
        };

        let traces = match &plan.traces {
            Some(policy) => {
                let processor = BatchSpanProcessor::builder(exporters.spans(policy)?)
                    .with_batch_config(policy.span_batch_config())
                    .build();
                Some(
                    SdkTracerProvider::builder()
                        .with_resource(policy.resource.to_resource())
                        .with_sampler(Sampler::AlwaysOn)
                        .with_id_generator(RandomIdGenerator::default())
                        .with_span_processor(processor)
                        .build(),
                )
            }
            None => None,
        };

        let metrics = match &plan.metrics {
            Some(policy) => {
                let reader = PeriodicReader::builder(exporters.metrics(policy)?)
                    .with_interval(Duration::from_millis(options.export.metrics_interval_ms))
                    .build();
                Some(
                    SdkMeterProvider::builder()
                        .with_resource(policy.resource.to_resource())
                        .with_reader(reader)
                        .build(),
                )
            }
            None => None,
        };

        let bridge = match (&metrics, metrics_handle) {
            (Some(provider), Some(handle)) => Some(Arc::new(PrometheusBridge::new(
                handle,
                provider.meter(INSTRUMENTATION_SCOPE),
            ))),
            _ => None,
        };
        let snapshot_task = bridge.as_ref().map(|bridge| {
            metrics_snapshot::spawn_snapshot_task(
                Arc::clone(bridge),
                Duration::from_millis(options.export.metrics_interval_ms),
            )
        });

        tracing::info!(
            logs = logs.is_some(),
            traces = traces.is_some(),
            metrics = metrics.is_some(),
            protocol = %options.export.protocol,
            endpoint = %options.collector_url,
            "Export router started"
        );

        Ok(Self {
            plan,
            logs,
            traces,
            metrics,
            bridge,
            snapshot_task,
        })
    }

    /// Logger feeding the logs exporter, if logs are exported
    pub fn logger(&self) -> Option<SdkLogger> {
        self.logs
            .as_ref()
            .map(|provider| provider.logger(INSTRUMENTATION_SCOPE))
    }

    /// Tracer on the traces provider; disabled when tracing is off
    pub fn tracer(&self) -> Tracer {
        self.traces
            .as_ref()
            .map(Tracer::new)
            .unwrap_or_else(Tracer::disabled)
    }

    pub fn logger_provider(&self) -> Option<&SdkLoggerProvider> {
        self.logs.as_ref()
    }

    pub fn tracer_provider(&self) -> Option<&SdkTracerProvider> {
        self.traces.as_ref()
    }

    pub fn meter_provider(&self) -> Option<&SdkMeterProvider> {
        self.metrics.as_ref()
    }

    /// Export everything buffered so far, keeping the providers running
    ///
    /// Blocks until each exporter answered or timed out; the first failure
    /// is returned.
    pub fn force_flush(&self) -> Result<(), TelemetryError> {
        if let Some(bridge) = &self.bridge {
            bridge.capture().map_err(|e| TelemetryError::Export {
                signal: Signal::Metrics,
                message: e.to_string(),
            })?;
        }

        let mut outcome = Ok(());
        if let Some(provider) = &self.logs {
            let timeout = policy_timeout(&self.plan.logs);
            outcome = outcome.and(sdk_outcome(Signal::Logs, timeout, provider.force_flush()));
        }
        if let Some(provider) = &self.traces {
            let timeout = policy_timeout(&self.plan.traces);
            outcome = outcome.and(sdk_outcome(Signal::Traces, timeout, provider.force_flush()));
        }
        if let Some(provider) = &self.metrics {
            let timeout = policy_timeout(&self.plan.metrics);
            outcome = outcome.and(sdk_outcome(Signal::Metrics, timeout, provider.force_flush()));
        }
        outcome
    }

    /// Drain every provider, then stop them
    ///
    /// A last metrics snapshot is taken so counters of the final requests
    /// are exported too. Provider shutdown blocks on the processors' worker
    /// threads, so it runs on the blocking pool.
    pub async fn shutdown(mut self) -> ShutdownReport {
        if let Some(task) = self.snapshot_task.take() {
            task.abort();
        }

        match tokio::task::spawn_blocking(move || self.shutdown_blocking()).await {
            Ok(report) => report,
            Err(e) => {
                tracing::error!(error = %e, "Export shutdown task failed");
                ShutdownReport::default()
            }
        }
    }

    /// Blocking variant of [`ExportRouter::shutdown`] for non-async callers
    pub fn shutdown_blocking(mut self) -> ShutdownReport {
        if let Some(task) = self.snapshot_task.take() {
            task.abort();
        }
        if let Some(bridge) = &self.bridge {
            if let Err(e) = bridge.capture() {
                tracing::warn!(error = %e, "Final metrics snapshot failed");
            }
        }

        let logs_timeout = policy_timeout(&self.plan.logs);
        let traces_timeout = policy_timeout(&self.plan.traces);
        let metrics_timeout = policy_timeout(&self.plan.metrics);

        let report = ShutdownReport {
            logs: self
                .logs
                .take()
                .map(|provider| sdk_outcome(Signal::Logs, logs_timeout, provider.shutdown())),
            traces: self
                .traces
                .take()
                .map(|provider| sdk_outcome(Signal::Traces, traces_timeout, provider.shutdown())),
            metrics: self
                .metrics
                .take()
                .map(|provider| sdk_outcome(Signal::Metrics, metrics_timeout, provider.shutdown())),
        };

        tracing::info!(
            logs = ?report.logs,
            traces = ?report.traces,
            metrics = ?report.metrics,
            "Export router drained"
        );

        report
    }
}

fn policy_timeout(policy: &Option<ExportBatchPolicy>) -> Duration {
    policy
        .as_ref()
        .map(|policy| policy.export_timeout)
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn options(enable_tracing: bool, sinks: Vec<SinkKind>) -> ObservabilityOptions {
        let mut options = ObservabilityOptions {
            service_name: "svc".to_string(),
            enable_tracing,
            ..ObservabilityOptions::default()
        };
        options.logging.sinks = sinks;
        options
    }

    #[test]
    fn test_plan_gating() {
        let plan = ExportRouter::plan(&options(false, vec![SinkKind::Console]));
        assert_eq!(plan.signals(), vec![Signal::Metrics]);

        let plan = ExportRouter::plan(&options(true, vec![SinkKind::Console, SinkKind::Otlp]));
        assert_eq!(
            plan.signals(),
            vec![Signal::Logs, Signal::Traces, Signal::Metrics]
        );
        assert_eq!(
            plan.traces.map(|p| p.endpoint),
            Some("http://localhost:4318/v1/traces".to_string())
        );
    }

    #[test]
    fn test_metrics_ignore_enable_metrics_flag() {
        let mut disabled = options(false, Vec::new());
        disabled.enable_metrics = false;
        assert!(ExportRouter::plan(&disabled).metrics.is_some());
    }

    #[test]
    fn test_shutdown_errors_map_to_telemetry_errors() {
        use crate::error::ErrorKind;

        let timeout = Duration::from_millis(250);
        let err = sdk_outcome(Signal::Logs, timeout, Err(OTelSdkError::Timeout(timeout)))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ExportTimeout);

        let err = sdk_outcome(
            Signal::Traces,
            timeout,
            Err(OTelSdkError::InternalFailure("collector refused".to_string())),
        )
        .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Export);
        assert!(err.to_string().contains("collector refused"));

        let report = ShutdownReport {
            logs: Some(Ok(())),
            traces: None,
            metrics: Some(sdk_outcome(Signal::Metrics, timeout, Ok(()))),
        };
        assert!(report.is_clean());
    }
}
