//! Built-in log sinks: console, OTLP logs exporter and an in-memory capture

use opentelemetry::logs::{AnyValue, LogRecord as _, Logger as _};
use opentelemetry::trace::{SpanId, TraceFlags, TraceId};
use opentelemetry::Key;
use opentelemetry_sdk::logs::SdkLogger;
use serde_json::json;
use std::collections::HashMap;
use std::io::Write;
use std::sync::Mutex;
use std::time::SystemTime;

use super::correlation::{SPAN_ID_PROPERTY, TRACE_ID_PROPERTY};
use super::event::LogEvent;
use super::pipeline::LogSink;
use crate::config::LogFormat;
use crate::error::TelemetryError;
use crate::redaction::{RedactedValue, Scalar};

/// Log record attribute carrying the unrendered template
pub const MESSAGE_TEMPLATE_ATTRIBUTE: &str = "MessageTemplate";

/// Writes one line per event to stdout (or any writer)
pub struct ConsoleSink {
    format: LogFormat,
    writer: Mutex<Box<dyn Write + Send>>,
}

impl ConsoleSink {
    pub fn stdout(format: LogFormat) -> Self {
        Self::new(format, Box::new(std::io::stdout()))
    }

    pub fn new(format: LogFormat, writer: Box<dyn Write + Send>) -> Self {
        Self {
            format,
            writer: Mutex::new(writer),
        }
    }

    fn render(&self, event: &LogEvent) -> String {
        match self.format {
            LogFormat::Text => format!(
                "[{} {}] {}",
                event.timestamp.format("%H:%M:%S"),
                event.severity.short_code(),
                event.message()
            ),
            LogFormat::Json => {
                let mut line = json!({
                    "@t": event.timestamp.to_rfc3339(),
                    "@l": event.severity.as_str(),
                    "@mt": event.template,
                    "@m": event.message(),
                });
                if let serde_json::Value::Object(ref mut map) = line {
                    for (name, value) in &event.properties {
                        map.insert(name.clone(), value.to_json());
                    }
                }
                line.to_string()
            }
        }
    }

    fn failure(&self, reason: impl ToString) -> TelemetryError {
        TelemetryError::SinkDeliveryFailure {
            sink: self.name().to_string(),
            reason: reason.to_string(),
        }
    }
}

impl LogSink for ConsoleSink {
    fn name(&self) -> &str {
        "console"
    }

    fn emit(&self, event: &LogEvent) -> Result<(), TelemetryError> {
        let line = self.render(event);
        let mut writer = self
            .writer
            .lock()
            .map_err(|_| self.failure("console writer lock poisoned"))?;
        writeln!(writer, "{}", line).map_err(|e| self.failure(e))?;
        writer.flush().map_err(|e| self.failure(e))
    }
}

/// Hands events to the SDK logger; never touches the network itself
///
/// The batch log processor behind the logger queues the record and exports
/// it from its own worker, so `emit` returns as soon as the record is queued.
pub struct OtlpLogSink {
    logger: SdkLogger,
}

impl OtlpLogSink {
    pub fn new(logger: SdkLogger) -> Self {
        Self { logger }
    }
}

impl LogSink for OtlpLogSink {
    fn name(&self) -> &str {
        "otlp"
    }

    fn emit(&self, event: &LogEvent) -> Result<(), TelemetryError> {
        let mut record = self.logger.create_log_record();
        record.set_timestamp(SystemTime::from(event.timestamp));
        record.set_observed_timestamp(SystemTime::now());
        record.set_severity_number(event.severity.otel_severity());
        record.set_severity_text(event.severity.as_str());
        record.set_body(AnyValue::from(event.message()));
        record.add_attribute(MESSAGE_TEMPLATE_ATTRIBUTE, event.template.clone());

        for (name, value) in &event.properties {
            if name == TRACE_ID_PROPERTY || name == SPAN_ID_PROPERTY {
                continue;
            }
            if let Some(value) = any_value(value) {
                record.add_attribute(name.clone(), value);
            }
        }

        let trace_id = event.trace_id().and_then(|id| TraceId::from_hex(id).ok());
        let span_id = event.span_id().and_then(|id| SpanId::from_hex(id).ok());
        if let (Some(trace_id), Some(span_id)) = (trace_id, span_id) {
            record.set_trace_context(trace_id, span_id, Some(TraceFlags::SAMPLED));
        }

        self.logger.emit(record);
        Ok(())
    }
}

/// Map a redacted tree onto an OTLP `AnyValue`; nulls are omitted
pub fn any_value(value: &RedactedValue) -> Option<AnyValue> {
    let value = match value {
        RedactedValue::Scalar(Scalar::Null) => return None,
        RedactedValue::Scalar(Scalar::Bool(v)) => AnyValue::Boolean(*v),
        RedactedValue::Scalar(Scalar::I64(v)) => AnyValue::Int(*v),
        RedactedValue::Scalar(Scalar::U64(v)) => match i64::try_from(*v) {
            Ok(v) => AnyValue::Int(v),
            Err(_) => AnyValue::Double(*v as f64),
        },
        RedactedValue::Scalar(Scalar::F64(v)) => AnyValue::Double(*v),
        RedactedValue::Scalar(Scalar::Str(v)) => AnyValue::from(v.clone()),
        RedactedValue::Sequence(items) => {
            AnyValue::ListAny(Box::new(items.iter().filter_map(any_value).collect()))
        }
        RedactedValue::Record(fields) => {
            let map: HashMap<Key, AnyValue> = fields
                .iter()
                .filter_map(|(name, value)| any_value(value).map(|v| (Key::from(name.clone()), v)))
                .collect();
            AnyValue::Map(Box::new(map))
        }
    };
    Some(value)
}

/// Keeps every event in memory
pub struct MemorySink {
    name: String,
    events: Mutex<Vec<LogEvent>>,
}

impl MemorySink {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            events: Mutex::new(Vec::new()),
        }
    }

    pub fn events(&self) -> Vec<LogEvent> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }

    pub fn clear(&self) {
        if let Ok(mut events) = self.events.lock() {
            events.clear();
        }
    }
}

impl LogSink for MemorySink {
    fn name(&self) -> &str {
        &self.name
    }

    fn emit(&self, event: &LogEvent) -> Result<(), TelemetryError> {
        let mut events = self.events.lock().map_err(|_| TelemetryError::SinkDeliveryFailure {
            sink: self.name.clone(),
            reason: "memory sink lock poisoned".to_string(),
        })?;
        events.push(event.clone());
        Ok(())
    }
}
