//! Observability subsystem for pii-telemetry
//!
//! - **Logs**: structured events with redacted payloads, fanned out to sinks
//! - **Traces**: server and child spans from the OpenTelemetry SDK tracer,
//!   always sampled, continuing inbound W3C `traceparent` headers
//! - **Correlation**: the active trace id flows into every log event of a
//!   request and into the `traceid` response header
//!
//! ## Request flow
//!
//! ```text
//! trace_requests (server span + ambient scope)
//!     ↓
//! trace_id_response_header (TraceId/SpanId pushed)
//!     ↓
//! handler → LogPipeline::emit → sinks → SDK batch log processor
//! ```

pub mod context;
pub mod correlation;
pub mod event;
pub mod instrumentation;
pub mod layer;
pub mod pipeline;
pub mod sinks;
pub mod span;

// Re-export public types
pub use context::{AmbientContext, PropertyGuard};
pub use correlation::{
    trace_id_response_header, CorrelationHandle, TaskLocalTraceSource, TraceCorrelator,
    TraceIdentity, TraceSource, SPAN_ID_PROPERTY, TRACE_ID_HEADER, TRACE_ID_PROPERTY,
};
pub use event::{
    render_message, LogEvent, Severity, APPLICATION_NAME_PROPERTY, PAYLOAD_PROPERTY,
    SOURCE_CONTEXT_PROPERTY,
};
pub use instrumentation::{trace_requests, Tracer, INSTRUMENTATION_SCOPE};
pub use layer::{is_internal_target, PipelineLayer};
pub use pipeline::{EventBuilder, LogPipeline, LogSink};
pub use sinks::{any_value, ConsoleSink, MemorySink, OtlpLogSink, MESSAGE_TEMPLATE_ATTRIBUTE};
pub use span::{
    current_span, extract_parent, in_span, sync_in_span, HeaderExtractor, SpanHandle,
    TRACEPARENT_HEADER,
};
