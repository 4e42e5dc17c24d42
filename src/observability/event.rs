//! Log events, severities and message-template rendering

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::redaction::RedactedValue;

/// Reserved property holding the destructured payload of an event
pub const PAYLOAD_PROPERTY: &str = "Payload";

/// Static enrichment carrying the service name
pub const APPLICATION_NAME_PROPERTY: &str = "ApplicationName";

/// Property naming the component that produced the event
pub const SOURCE_CONTEXT_PROPERTY: &str = "SourceContext";

/// Log event severity, lowest first
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    #[serde(alias = "trace")]
    Verbose,
    Debug,
    #[serde(alias = "info")]
    Information,
    #[serde(alias = "warn")]
    Warning,
    Error,
    Fatal,
}

impl Severity {
    /// OpenTelemetry severity number for exported log records
    pub fn otel_severity(&self) -> opentelemetry::logs::Severity {
        use opentelemetry::logs::Severity as Otel;
        match self {
            Severity::Verbose => Otel::Trace,
            Severity::Debug => Otel::Debug,
            Severity::Information => Otel::Info,
            Severity::Warning => Otel::Warn,
            Severity::Error => Otel::Error,
            Severity::Fatal => Otel::Fatal,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Verbose => "Verbose",
            Severity::Debug => "Debug",
            Severity::Information => "Information",
            Severity::Warning => "Warning",
            Severity::Error => "Error",
            Severity::Fatal => "Fatal",
        }
    }

    /// Three-letter code used by the text console format
    pub fn short_code(&self) -> &'static str {
        match self {
            Severity::Verbose => "VRB",
            Severity::Debug => "DBG",
            Severity::Information => "INF",
            Severity::Warning => "WRN",
            Severity::Error => "ERR",
            Severity::Fatal => "FTL",
        }
    }

    /// `EnvFilter` directive letting this severity and above through
    pub fn filter_directive(&self) -> &'static str {
        match self {
            Severity::Verbose => "trace",
            Severity::Debug => "debug",
            Severity::Information => "info",
            Severity::Warning => "warn",
            Severity::Error | Severity::Fatal => "error",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Severity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "verbose" | "trace" => Ok(Severity::Verbose),
            "debug" => Ok(Severity::Debug),
            "information" | "info" => Ok(Severity::Information),
            "warning" | "warn" => Ok(Severity::Warning),
            "error" => Ok(Severity::Error),
            "fatal" => Ok(Severity::Fatal),
            other => Err(format!("unknown severity '{}'", other)),
        }
    }
}

impl From<tracing::Level> for Severity {
    fn from(level: tracing::Level) -> Self {
        match level {
            tracing::Level::TRACE => Severity::Verbose,
            tracing::Level::DEBUG => Severity::Debug,
            tracing::Level::INFO => Severity::Information,
            tracing::Level::WARN => Severity::Warning,
            tracing::Level::ERROR => Severity::Error,
        }
    }
}

/// A structured log event, shared read-only by every sink
#[derive(Debug, Clone, PartialEq)]
pub struct LogEvent {
    pub timestamp: DateTime<Utc>,
    pub severity: Severity,
    pub template: String,
    pub properties: BTreeMap<String, RedactedValue>,
}

impl LogEvent {
    pub fn property(&self, name: &str) -> Option<&RedactedValue> {
        self.properties.get(name)
    }

    pub fn payload(&self) -> Option<&RedactedValue> {
        self.properties.get(PAYLOAD_PROPERTY)
    }

    pub fn trace_id(&self) -> Option<&str> {
        self.property(super::correlation::TRACE_ID_PROPERTY)
            .and_then(RedactedValue::as_str)
    }

    pub fn span_id(&self) -> Option<&str> {
        self.property(super::correlation::SPAN_ID_PROPERTY)
            .and_then(RedactedValue::as_str)
    }

    /// Message with template holes filled from the properties
    pub fn message(&self) -> String {
        render_message(&self.template, &self.properties)
    }
}

/// Render a message template
///
/// `{Name}` and `{@Name}` are replaced with the property of that name; an
/// `{@Name}` hole with no matching property renders the payload. `{{` and
/// `}}` are literal braces and unknown holes are left as written.
pub fn render_message(template: &str, properties: &BTreeMap<String, RedactedValue>) -> String {
    let mut out = String::with_capacity(template.len());
    let mut chars = template.char_indices().peekable();

    while let Some((start, c)) = chars.next() {
        match c {
            '{' if matches!(chars.peek(), Some((_, '{'))) => {
                chars.next();
                out.push('{');
            }
            '}' if matches!(chars.peek(), Some((_, '}'))) => {
                chars.next();
                out.push('}');
            }
            '{' => {
                let rest = &template[start + 1..];
                match rest.find('}') {
                    Some(end) => {
                        let hole = &rest[..end];
                        out.push_str(&render_hole(hole, properties));
                        // Skip past the hole body and its closing brace.
                        for _ in 0..hole.chars().count() + 1 {
                            chars.next();
                        }
                    }
                    None => out.push('{'),
                }
            }
            other => out.push(other),
        }
    }

    out
}

fn render_hole(hole: &str, properties: &BTreeMap<String, RedactedValue>) -> String {
    let (destructured, name) = match hole.strip_prefix('@') {
        Some(name) => (true, name),
        None => (false, hole.strip_prefix('$').unwrap_or(hole)),
    };
    // Alignment and format specifiers are accepted but not applied.
    let name = name
        .split(|c| c == ',' || c == ':')
        .next()
        .unwrap_or(name)
        .trim();

    match properties.get(name) {
        Some(value) => value.to_string(),
        None if destructured => match properties.get(PAYLOAD_PROPERTY) {
            Some(payload) => payload.to_string(),
            None => format!("{{{}}}", hole),
        },
        None => format!("{{{}}}", hole),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn props(entries: &[(&str, RedactedValue)]) -> BTreeMap<String, RedactedValue> {
        entries
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn test_render_named_holes() {
        let properties = props(&[("Count", RedactedValue::from(5i64))]);
        assert_eq!(
            render_message("Generated {Count} users", &properties),
            "Generated 5 users"
        );
    }

    #[test]
    fn test_render_payload_hole() {
        let payload = RedactedValue::Record(vec![("Id".to_string(), RedactedValue::from("u1"))]);
        let properties = props(&[(PAYLOAD_PROPERTY, payload)]);
        assert_eq!(
            render_message("Creating {@User}", &properties),
            r#"Creating { Id: "u1" }"#
        );
    }

    #[test]
    fn test_render_escapes_and_missing() {
        let properties = props(&[]);
        assert_eq!(render_message("{{literal}} {Missing}", &properties), "{literal} {Missing}");
        assert_eq!(render_message("unclosed {brace", &properties), "unclosed {brace");
    }

    #[test]
    fn test_render_unicode_template() {
        let properties = props(&[("Name", RedactedValue::from("x"))]);
        assert_eq!(render_message("héllo {Name} ✓", &properties), "héllo \"x\" ✓");
    }

    #[test]
    fn test_severity_parsing_and_order() {
        assert_eq!("info".parse::<Severity>().unwrap(), Severity::Information);
        assert_eq!("WARN".parse::<Severity>().unwrap(), Severity::Warning);
        assert!("loud".parse::<Severity>().is_err());
        assert!(Severity::Error > Severity::Information);
        assert_eq!(Severity::from(tracing::Level::WARN), Severity::Warning);
        assert_eq!(Severity::Error.otel_severity() as i32, 17);
        assert_eq!(Severity::Verbose.otel_severity(), opentelemetry::logs::Severity::Trace);
    }
}
