use anyhow::Result;
use axum::{middleware, routing::get, Router};
use opentelemetry_sdk::logs::SdkLogger;
use std::{net::SocketAddr, sync::Arc};
use tower_http::{catch_panic::CatchPanicLayer, trace::TraceLayer};
use tracing::{info, warn};

use crate::{
    config::{self, Config, ObservabilityOptions, SinkKind},
    export::{ExportRouter, OtlpExporters},
    handlers::{self, AppState},
    metrics,
    observability::{
        trace_id_response_header, trace_requests, ConsoleSink, LogPipeline, OtlpLogSink,
        TraceCorrelator,
    },
    redaction::PolicyResolver,
    signals::setup_signal_handlers,
};

/// Start the instrumented service
///
/// This function:
/// 1. Validates the configuration and installs the metrics recorder
/// 2. Starts the export router and the log pipeline
/// 3. Sets up signal handlers for graceful shutdown
/// 4. Serves requests until a shutdown signal arrives
/// 5. Drains every exporter before returning
pub async fn start_server(config: Config) -> Result<()> {
    config::validate_config(&config)?;
    let options = &config.observability;

    let metrics_handle = Arc::new(metrics::init_metrics()?);

    let exports = ExportRouter::start(options, &OtlpExporters, Some(Arc::clone(&metrics_handle)))?;

    let resolver = Arc::new(PolicyResolver::new());
    let pipeline = Arc::new(build_pipeline(options, resolver, exports.logger()));
    crate::init_tracing_with_pipeline(&options.logging, Arc::clone(&pipeline))?;

    if !options.enable_tracing {
        warn!("Tracing is disabled; correlated endpoints will fail with no active trace");
    }

    let state = AppState {
        pipeline: Arc::clone(&pipeline),
        tracer: exports.tracer(),
        correlator: TraceCorrelator::default(),
        metrics_handle,
    };

    let (shutdown_tx, signal_handle) = setup_signal_handlers();
    let mut shutdown_rx = shutdown_tx.subscribe();

    let app = create_router(state);

    let addr = SocketAddr::from((
        config.server.host.parse::<std::net::IpAddr>()?,
        config.server.port,
    ));

    info!("Starting {} on {}", options.service_name, addr);
    info!(
        "Observability: tracing={}, pii_filtering={}, sinks={:?}, collector={}",
        options.enable_tracing,
        options.enable_pii_filtering,
        pipeline.sink_names(),
        options.collector_url
    );

    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = shutdown_rx.recv().await;
            info!("Shutdown signal received, draining connections...");
        })
        .await?;

    signal_handle.await?;

    let report = exports.shutdown().await;
    if report.is_clean() {
        info!("Server stopped gracefully, every exporter drained");
    } else {
        warn!(
            "Server stopped, some exporters failed to drain (logs: {:?}, traces: {:?}, metrics: {:?})",
            report.logs, report.traces, report.metrics
        );
    }

    Ok(())
}

/// Build the log pipeline with the sinks named in the logging configuration
///
/// The OTLP sink is only attached when the export router started a logs
/// provider.
pub fn build_pipeline(
    options: &ObservabilityOptions,
    resolver: Arc<PolicyResolver>,
    logger: Option<SdkLogger>,
) -> LogPipeline {
    let mut pipeline = LogPipeline::new(options, resolver);

    if options.logging.sinks.contains(&SinkKind::Console) {
        pipeline = pipeline.with_sink(Arc::new(ConsoleSink::stdout(options.logging.format)));
    }
    if let Some(logger) = logger {
        pipeline = pipeline.with_sink(Arc::new(OtlpLogSink::new(logger)));
    }

    pipeline
}

/// Wrap routes in the tracing and correlation middleware
///
/// From the outside in: `trace_requests` (server span), then
/// `trace_id_response_header`, then a panic catcher, so the server span is
/// active when the correlator looks for it and a panicking handler still
/// produces a 500 carrying the `traceid` header.
pub fn instrument_correlated(routes: Router<AppState>, state: &AppState) -> Router<AppState> {
    routes
        .layer(CatchPanicLayer::new())
        .layer(middleware::from_fn_with_state(
            state.correlator.clone(),
            trace_id_response_header,
        ))
        .layer(middleware::from_fn_with_state(
            state.tracer.clone(),
            trace_requests,
        ))
}

/// Create the Axum router with all routes and middleware
pub fn create_router(state: AppState) -> Router {
    let correlated = instrument_correlated(
        Router::new()
            .route("/users", get(handlers::users::list_users))
            .route("/exception", get(handlers::exception::throw_exception)),
        &state,
    );

    Router::new()
        .route("/health", get(handlers::health::health_check))
        .route("/metrics", get(handlers::metrics_handler::metrics))
        .merge(correlated)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
