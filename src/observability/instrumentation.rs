//! Server spans and request metrics for the HTTP layer

use axum::{
    extract::{MatchedPath, Request, State},
    http::HeaderMap,
    middleware::Next,
    response::Response,
};
use opentelemetry::trace::{SpanKind, Status, TraceContextExt, Tracer as _, TracerProvider as _};
use opentelemetry::KeyValue;
use opentelemetry_sdk::trace::{SdkTracer, SdkTracerProvider};
use std::time::Instant;

use super::context::AmbientContext;
use super::span::{current_span, extract_parent, in_span, SpanHandle};

/// Instrumentation scope of every span and log record the service produces
pub const INSTRUMENTATION_SCOPE: &str = env!("CARGO_PKG_NAME");

/// Starts spans on the SDK tracer; a disabled tracer starts none
#[derive(Clone, Debug)]
pub struct Tracer {
    inner: Option<SdkTracer>,
}

impl Tracer {
    pub fn new(provider: &SdkTracerProvider) -> Self {
        Self {
            inner: Some(provider.tracer(INSTRUMENTATION_SCOPE)),
        }
    }

    pub fn disabled() -> Self {
        Self { inner: None }
    }

    pub fn is_enabled(&self) -> bool {
        self.inner.is_some()
    }

    /// Start a server span, continuing an inbound `traceparent` if present
    pub fn start_server_span(&self, name: impl Into<String>, headers: &HeaderMap) -> Option<SpanHandle> {
        let tracer = self.inner.as_ref()?;
        let parent = extract_parent(headers);
        let span = tracer
            .span_builder(name.into())
            .with_kind(SpanKind::Server)
            .start_with_context(tracer, &parent);

        Some(SpanHandle::new(parent.with_span(span)))
    }

    /// Start a child of the task's active span
    pub fn start_child(&self, name: impl Into<String>) -> Option<SpanHandle> {
        let tracer = self.inner.as_ref()?;
        let parent = current_span()?;
        let span = tracer
            .span_builder(name.into())
            .with_kind(SpanKind::Internal)
            .start_with_context(tracer, parent.context());

        Some(SpanHandle::new(parent.context().with_span(span)))
    }
}

/// Middleware: server span, ambient scope and request metrics
///
/// Must wrap the correlation middleware so the span is active when the
/// correlator looks for it.
pub async fn trace_requests(State(tracer): State<Tracer>, req: Request, next: Next) -> Response {
    let method = req.method().to_string();
    let route = req
        .extensions()
        .get::<MatchedPath>()
        .map(|path| path.as_str().to_string())
        .unwrap_or_else(|| req.uri().path().to_string());

    let start = Instant::now();
    let span = tracer.start_server_span(format!("{} {}", method, route), req.headers());

    let response = match span.clone() {
        Some(span) => AmbientContext::scope(in_span(span, next.run(req))).await,
        None => AmbientContext::scope(next.run(req)).await,
    };

    let status = response.status();
    crate::metrics::record_http_request(&method, &route, status.as_u16(), start.elapsed());

    if let Some(span) = span {
        span.set_attribute(KeyValue::new("http.request.method", method));
        span.set_attribute(KeyValue::new("http.route", route));
        span.set_attribute(KeyValue::new(
            "http.response.status_code",
            i64::from(status.as_u16()),
        ));
        let span_status = if status.is_server_error() {
            Status::error(status.to_string())
        } else {
            Status::Unset
        };
        span.end(span_status);
    }

    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;
    use opentelemetry_sdk::trace::{InMemorySpanExporter, Sampler};

    fn provider() -> (SdkTracerProvider, InMemorySpanExporter) {
        let exporter = InMemorySpanExporter::default();
        let provider = SdkTracerProvider::builder()
            .with_sampler(Sampler::AlwaysOn)
            .with_simple_exporter(exporter.clone())
            .build();
        (provider, exporter)
    }

    #[test]
    fn test_disabled_tracer_starts_nothing() {
        let tracer = Tracer::disabled();
        assert!(!tracer.is_enabled());
        assert!(tracer.start_server_span("GET /", &HeaderMap::new()).is_none());
        assert!(tracer.start_child("child").is_none());
    }

    #[test]
    fn test_server_span_continues_traceparent() {
        let (provider, exporter) = provider();
        let tracer = Tracer::new(&provider);
        let mut headers = HeaderMap::new();
        headers.insert(
            "traceparent",
            HeaderValue::from_static("00-4bf92f3577b34da6a3ce929d0e0e4736-00f067aa0ba902b7-00"),
        );

        let span = tracer.start_server_span("GET /users", &headers).unwrap();
        assert_eq!(span.trace_id(), "4bf92f3577b34da6a3ce929d0e0e4736");
        assert!(span.is_sampled());
        span.end(Status::Unset);

        let finished = exporter.get_finished_spans().unwrap();
        assert_eq!(finished.len(), 1);
        assert_eq!(finished[0].span_kind, SpanKind::Server);
        assert_eq!(finished[0].parent_span_id.to_string(), "00f067aa0ba902b7");
    }

    #[tokio::test]
    async fn test_child_of_active_span() {
        let (provider, exporter) = provider();
        let tracer = Tracer::new(&provider);
        let root = tracer.start_server_span("GET /users", &HeaderMap::new()).unwrap();
        let root_id = root.span_id();

        let child = in_span(root.clone(), async { tracer.start_child("Generating new user") })
            .await
            .unwrap();
        assert_eq!(child.trace_id(), root.trace_id());
        assert_ne!(child.span_id(), root_id);

        child.end(Status::error("failed"));
        let finished = exporter.get_finished_spans().unwrap();
        assert_eq!(finished[0].parent_span_id.to_string(), root_id);
        assert_eq!(finished[0].span_kind, SpanKind::Internal);
        assert!(matches!(finished[0].status, Status::Error { .. }));
    }
}
