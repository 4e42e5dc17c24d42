//! HTTP handlers
//!
//! `/users` and `/exception` run behind the tracing and correlation
//! middleware; `/health` and `/metrics` are plain.

pub mod exception;
pub mod health;
pub mod metrics_handler;
pub mod users;

use axum::extract::FromRef;
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::Arc;

use crate::observability::{LogPipeline, TraceCorrelator, Tracer};

/// Shared state handed to every handler and middleware
#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<LogPipeline>,
    pub tracer: Tracer,
    pub correlator: TraceCorrelator,
    pub metrics_handle: Arc<PrometheusHandle>,
}

impl FromRef<AppState> for Tracer {
    fn from_ref(state: &AppState) -> Self {
        state.tracer.clone()
    }
}

impl FromRef<AppState> for TraceCorrelator {
    fn from_ref(state: &AppState) -> Self {
        state.correlator.clone()
    }
}

impl FromRef<AppState> for Arc<PrometheusHandle> {
    fn from_ref(state: &AppState) -> Self {
        Arc::clone(&state.metrics_handle)
    }
}
