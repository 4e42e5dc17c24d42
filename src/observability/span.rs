//! Active span handles for request tracing
//!
//! Spans are created by the OpenTelemetry SDK tracer, which owns id
//! generation and always-on sampling. A [`SpanHandle`] wraps the
//! `opentelemetry::Context` carrying the span so it can be installed as the
//! task's active span and read back by the correlator and the log pipeline.

use opentelemetry::propagation::{Extractor, TextMapPropagator};
use opentelemetry::trace::{Status, TraceContextExt};
use opentelemetry::{Context, KeyValue};
use opentelemetry_sdk::propagation::TraceContextPropagator;
use std::collections::HashMap;
use std::future::Future;

/// W3C header carrying the inbound trace context
pub const TRACEPARENT_HEADER: &str = "traceparent";

/// A started span and the context it lives in
#[derive(Clone, Debug)]
pub struct SpanHandle {
    cx: Context,
}

impl SpanHandle {
    pub fn new(cx: Context) -> Self {
        Self { cx }
    }

    pub fn context(&self) -> &Context {
        &self.cx
    }

    /// Trace id as 32 lowercase hex chars
    pub fn trace_id(&self) -> String {
        self.cx.span().span_context().trace_id().to_string()
    }

    /// Span id as 16 lowercase hex chars
    pub fn span_id(&self) -> String {
        self.cx.span().span_context().span_id().to_string()
    }

    pub fn is_sampled(&self) -> bool {
        self.cx.span().span_context().is_sampled()
    }

    pub fn set_attribute(&self, attribute: KeyValue) {
        self.cx.span().set_attribute(attribute);
    }

    /// Set the final status and end the span
    pub fn end(&self, status: Status) {
        let span = self.cx.span();
        span.set_status(status);
        span.end();
    }

    /// `traceparent` value for propagating this span downstream
    pub fn traceparent(&self) -> Option<String> {
        let mut carrier: HashMap<String, String> = HashMap::new();
        TraceContextPropagator::new().inject_context(&self.cx, &mut carrier);
        carrier.remove(TRACEPARENT_HEADER)
    }
}

/// Read-only view of request headers for trace-context extraction
pub struct HeaderExtractor<'a>(pub &'a axum::http::HeaderMap);

impl Extractor for HeaderExtractor<'_> {
    fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(|value| value.to_str().ok())
    }

    fn keys(&self) -> Vec<&str> {
        self.0.keys().map(|name| name.as_str()).collect()
    }
}

/// Context holding the remote parent found in `headers`
///
/// Malformed or missing `traceparent` headers yield an empty context, so the
/// next span starts a new trace.
pub fn extract_parent(headers: &axum::http::HeaderMap) -> Context {
    TraceContextPropagator::new().extract_with_context(&Context::new(), &HeaderExtractor(headers))
}

tokio::task_local! {
    static ACTIVE_SPAN: SpanHandle;
}

/// Span active for the current task, if any
pub fn current_span() -> Option<SpanHandle> {
    ACTIVE_SPAN.try_with(|span| span.clone()).ok()
}

/// Run a future with `span` as the active span
pub fn in_span<F: Future>(span: SpanHandle, fut: F) -> impl Future<Output = F::Output> {
    ACTIVE_SPAN.scope(span, fut)
}

/// Run a closure with `span` as the active span
pub fn sync_in_span<R>(span: SpanHandle, f: impl FnOnce() -> R) -> R {
    ACTIVE_SPAN.sync_scope(span, f)
}
