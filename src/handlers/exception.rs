use axum::extract::State;

use super::AppState;
use crate::error::AppError;
use crate::observability::Severity;

/// Handle /exception endpoint
///
/// Logs an error and always fails with a 500.
pub async fn throw_exception(State(state): State<AppState>) -> Result<(), AppError> {
    state
        .pipeline
        .event(Severity::Error, "Going to throw exception here")
        .emit()?;

    Err(AppError::InternalError("Test".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ObservabilityOptions;
    use crate::observability::{AmbientContext, LogPipeline, MemorySink, TraceCorrelator, Tracer};
    use crate::redaction::PolicyResolver;
    use axum::http::StatusCode;
    use axum::response::IntoResponse;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_exception_logs_and_fails() {
        let sink = Arc::new(MemorySink::new("memory"));
        let pipeline = LogPipeline::new(&ObservabilityOptions::default(), Arc::new(PolicyResolver::new()))
            .with_sink(sink.clone());
        let recorder = metrics_exporter_prometheus::PrometheusBuilder::new().build_recorder();
        let state = AppState {
            pipeline: Arc::new(pipeline),
            tracer: Tracer::disabled(),
            correlator: TraceCorrelator::default(),
            metrics_handle: Arc::new(recorder.handle()),
        };

        let response = AmbientContext::scope(throw_exception(State(state)))
            .await
            .into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let events = sink.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].severity, Severity::Error);
        assert_eq!(events[0].message(), "Going to throw exception here");
    }
}
