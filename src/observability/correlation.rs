//! Trace correlation for inbound requests
//!
//! The correlator copies the active trace identity into the ambient log
//! properties for the lifetime of a request and stamps the trace id on the
//! HTTP response.

use axum::{
    extract::{Request, State},
    http::{HeaderName, HeaderValue},
    middleware::Next,
    response::Response,
};
use std::sync::Arc;

use super::context::{AmbientContext, PropertyGuard};
use super::span::current_span;
use crate::error::{AppError, TelemetryError};

/// Response header carrying the trace id
pub const TRACE_ID_HEADER: HeaderName = HeaderName::from_static("traceid");

/// Ambient property holding the trace id
pub const TRACE_ID_PROPERTY: &str = "TraceId";

/// Ambient property holding the span id
pub const SPAN_ID_PROPERTY: &str = "SpanId";

/// Identifiers of the trace active for a request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceIdentity {
    pub trace_id: String,
    pub span_id: String,
}

/// Where the correlator looks up the active trace
pub trait TraceSource: Send + Sync {
    fn active_trace(&self) -> Option<TraceIdentity>;
}

/// Reads the span installed by the server-span middleware
#[derive(Debug, Default, Clone, Copy)]
pub struct TaskLocalTraceSource;

impl TraceSource for TaskLocalTraceSource {
    fn active_trace(&self) -> Option<TraceIdentity> {
        current_span().map(|span| TraceIdentity {
            trace_id: span.trace_id(),
            span_id: span.span_id(),
        })
    }
}

#[derive(Clone)]
pub struct TraceCorrelator {
    source: Arc<dyn TraceSource>,
}

impl Default for TraceCorrelator {
    fn default() -> Self {
        Self::new(Arc::new(TaskLocalTraceSource))
    }
}

impl TraceCorrelator {
    pub fn new(source: Arc<dyn TraceSource>) -> Self {
        Self { source }
    }

    /// Push the active trace identity onto the ambient context
    ///
    /// Fails with `NoActiveTrace` when no span is active for this request and
    /// with `MissingAmbientScope` when the caller runs outside
    /// [`AmbientContext::scope`], where nothing could be pushed.
    pub fn begin(&self) -> Result<CorrelationHandle, TelemetryError> {
        let identity = self
            .source
            .active_trace()
            .ok_or(TelemetryError::NoActiveTrace)?;

        let trace_guard = AmbientContext::push(TRACE_ID_PROPERTY, identity.trace_id.clone())
            .ok_or(TelemetryError::MissingAmbientScope)?;
        let span_guard = AmbientContext::push(SPAN_ID_PROPERTY, identity.span_id.clone())
            .ok_or(TelemetryError::MissingAmbientScope)?;

        Ok(CorrelationHandle {
            identity,
            guards: [trace_guard, span_guard],
        })
    }
}

/// Scope of one correlated request; pops its properties when ended or dropped
#[derive(Debug)]
pub struct CorrelationHandle {
    identity: TraceIdentity,
    guards: [PropertyGuard; 2],
}

impl CorrelationHandle {
    pub fn trace_id(&self) -> &str {
        &self.identity.trace_id
    }

    pub fn span_id(&self) -> &str {
        &self.identity.span_id
    }

    pub fn end(self) {
        drop(self.guards);
    }
}

/// Middleware: correlate the request and write the `traceid` response header
///
/// The header value is built before the inner stack runs and attached to
/// whatever response it produces, error responses included. Install a
/// panic-catching layer inside this one (see [`crate::server::instrument_correlated`])
/// so a panicking handler still yields a response carrying the header.
pub async fn trace_id_response_header(
    State(correlator): State<TraceCorrelator>,
    req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let handle = correlator.begin()?;
    let header = HeaderValue::from_str(handle.trace_id())
        .map_err(|e| AppError::InternalError(format!("invalid trace id header: {}", e)))?;

    let mut response = next.run(req).await;
    response.headers_mut().insert(TRACE_ID_HEADER, header);

    handle.end();
    Ok(response)
}
