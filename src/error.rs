use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

use crate::export::Signal;

/// Stable classification of telemetry failures
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Conflicting or malformed redaction annotations on a payload type
    InvalidPolicy,
    /// No distributed-tracing context is active for the current request
    NoActiveTrace,
    /// Correlation was attempted outside a request's ambient scope
    MissingAmbientScope,
    /// A single sink refused or failed to write an event
    SinkDeliveryFailure,
    /// The collector did not answer within the export window
    ExportTimeout,
    /// The collector rejected a batch or the transport failed
    Export,
    /// Invalid observability configuration
    Config,
}

impl ErrorKind {
    pub fn code(&self) -> &'static str {
        match self {
            ErrorKind::InvalidPolicy => "ERR_INVALID_POLICY",
            ErrorKind::NoActiveTrace => "ERR_NO_ACTIVE_TRACE",
            ErrorKind::MissingAmbientScope => "ERR_MISSING_AMBIENT_SCOPE",
            ErrorKind::SinkDeliveryFailure => "ERR_SINK_DELIVERY_FAILURE",
            ErrorKind::ExportTimeout => "ERR_EXPORT_TIMEOUT",
            ErrorKind::Export => "ERR_EXPORT",
            ErrorKind::Config => "ERR_CONFIG",
        }
    }
}

/// Errors raised by the observability core
#[derive(Debug, Clone, Error)]
pub enum TelemetryError {
    #[error("invalid redaction policy on {type_name}.{field}: {reason}")]
    InvalidPolicy {
        type_name: String,
        field: String,
        reason: String,
    },

    #[error("no active trace for the current request")]
    NoActiveTrace,

    #[error("no ambient context scope is active for the current task")]
    MissingAmbientScope,

    #[error("sink '{sink}' failed to accept event: {reason}")]
    SinkDeliveryFailure { sink: String, reason: String },

    #[error("{signal} export timed out after {timeout:?}")]
    ExportTimeout { signal: Signal, timeout: Duration },

    #[error("{signal} export failed: {message}")]
    Export { signal: Signal, message: String },

    #[error("configuration error: {0}")]
    Config(String),
}

impl TelemetryError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidPolicy { .. } => ErrorKind::InvalidPolicy,
            Self::NoActiveTrace => ErrorKind::NoActiveTrace,
            Self::MissingAmbientScope => ErrorKind::MissingAmbientScope,
            Self::SinkDeliveryFailure { .. } => ErrorKind::SinkDeliveryFailure,
            Self::ExportTimeout { .. } => ErrorKind::ExportTimeout,
            Self::Export { .. } => ErrorKind::Export,
            Self::Config(_) => ErrorKind::Config,
        }
    }

    pub fn code(&self) -> &'static str {
        self.kind().code()
    }
}

/// HTTP-facing error for the instrumented request path
#[derive(Debug)]
pub enum AppError {
    /// Failure raised by the observability core on the request path
    Telemetry(TelemetryError),
    /// Internal server error
    InternalError(String),
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Telemetry(err) => write!(f, "Telemetry error: {}", err),
            Self::InternalError(msg) => write!(f, "Internal error: {}", msg),
        }
    }
}

impl std::error::Error for AppError {}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_message) = match &self {
            Self::Telemetry(err) => (StatusCode::INTERNAL_SERVER_ERROR, err.to_string()),
            Self::InternalError(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg.clone()),
        };

        let body = Json(json!({
            "error": {
                "message": error_message,
                "type": error_type_name(&self),
            }
        }));

        (status, body).into_response()
    }
}

fn error_type_name(error: &AppError) -> &'static str {
    match error {
        AppError::Telemetry(err) => match err.kind() {
            ErrorKind::InvalidPolicy => "invalid_policy",
            ErrorKind::NoActiveTrace => "no_active_trace",
            ErrorKind::MissingAmbientScope => "missing_ambient_scope",
            ErrorKind::SinkDeliveryFailure => "sink_delivery_failure",
            ErrorKind::ExportTimeout => "export_timeout",
            ErrorKind::Export => "export_error",
            ErrorKind::Config => "config_error",
        },
        AppError::InternalError(_) => "internal_error",
    }
}

impl From<TelemetryError> for AppError {
    fn from(err: TelemetryError) -> Self {
        Self::Telemetry(err)
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        Self::InternalError(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let error = TelemetryError::InvalidPolicy {
            type_name: "User".to_string(),
            field: "ssn".to_string(),
            reason: "conflicting annotations".to_string(),
        };
        assert_eq!(
            error.to_string(),
            "invalid redaction policy on User.ssn: conflicting annotations"
        );
        assert_eq!(error.code(), "ERR_INVALID_POLICY");
    }

    #[test]
    fn test_export_timeout_display() {
        let error = TelemetryError::ExportTimeout {
            signal: Signal::Logs,
            timeout: Duration::from_millis(250),
        };
        assert_eq!(error.to_string(), "logs export timed out after 250ms");
        assert_eq!(error.kind(), ErrorKind::ExportTimeout);
    }

    #[test]
    fn test_error_type_name() {
        assert_eq!(
            error_type_name(&AppError::Telemetry(TelemetryError::NoActiveTrace)),
            "no_active_trace"
        );
        assert_eq!(
            error_type_name(&AppError::InternalError("boom".to_string())),
            "internal_error"
        );
    }

    #[tokio::test]
    async fn test_error_response() {
        let error = AppError::from(TelemetryError::NoActiveTrace);
        let response = error.into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
