use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

use crate::export::{AttributeValue, ExportMode, OtlpProtocol, Signal};
use crate::observability::Severity;

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub observability: ObservabilityOptions,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

/// Observability settings, resolved once at startup and never mutated
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ObservabilityOptions {
    #[serde(default = "default_service_name")]
    pub service_name: String,
    #[serde(default = "default_collector_url")]
    pub collector_url: String,
    #[serde(default)]
    pub enable_tracing: bool,
    /// Accepted for completeness; metrics export does not depend on it
    #[serde(default)]
    pub enable_metrics: bool,
    #[serde(default)]
    pub enable_pii_filtering: bool,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub resource_attributes: BTreeMap<String, AttributeValue>,
    #[serde(default)]
    pub export: ExportConfig,
}

fn default_service_name() -> String {
    env!("CARGO_PKG_NAME").to_string()
}

fn default_collector_url() -> String {
    "http://localhost:4318".to_string()
}

impl Default for ObservabilityOptions {
    fn default() -> Self {
        Self {
            service_name: default_service_name(),
            collector_url: default_collector_url(),
            enable_tracing: false,
            enable_metrics: false,
            enable_pii_filtering: false,
            logging: LoggingConfig::default(),
            resource_attributes: BTreeMap::new(),
            export: ExportConfig::default(),
        }
    }
}

impl ObservabilityOptions {
    /// OTLP/HTTP endpoint for a signal: collector URL plus the signal path
    pub fn endpoint_for(&self, signal: Signal) -> String {
        format!("{}{}", self.collector_url.trim_end_matches('/'), signal.path())
    }

    pub fn otlp_logs_endpoint(&self) -> String {
        self.endpoint_for(Signal::Logs)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SinkKind {
    Console,
    Otlp,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    #[serde(default = "default_level")]
    pub level: Severity,
    #[serde(default)]
    pub format: LogFormat,
    #[serde(default = "default_sinks")]
    pub sinks: Vec<SinkKind>,
}

fn default_level() -> Severity {
    Severity::Information
}

fn default_sinks() -> Vec<SinkKind> {
    vec![SinkKind::Console, SinkKind::Otlp]
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_level(),
            format: LogFormat::default(),
            sinks: default_sinks(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ExportConfig {
    #[serde(default)]
    pub mode: ExportMode,
    #[serde(default)]
    pub protocol: OtlpProtocol,
    #[serde(default = "default_max_batch_size")]
    pub max_batch_size: usize,
    #[serde(default = "default_scheduled_delay_ms")]
    pub scheduled_delay_ms: u64,
    #[serde(default = "default_export_timeout_ms")]
    pub export_timeout_ms: u64,
    #[serde(default = "default_max_queue_size")]
    pub max_queue_size: usize,
    #[serde(default = "default_metrics_interval_ms")]
    pub metrics_interval_ms: u64,
}

fn default_max_batch_size() -> usize {
    512
}

fn default_scheduled_delay_ms() -> u64 {
    5000
}

fn default_export_timeout_ms() -> u64 {
    10000
}

fn default_max_queue_size() -> usize {
    2048
}

fn default_metrics_interval_ms() -> u64 {
    60000
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            mode: ExportMode::default(),
            protocol: OtlpProtocol::default(),
            max_batch_size: default_max_batch_size(),
            scheduled_delay_ms: default_scheduled_delay_ms(),
            export_timeout_ms: default_export_timeout_ms(),
            max_queue_size: default_max_queue_size(),
            metrics_interval_ms: default_metrics_interval_ms(),
        }
    }
}

/// Load `config.toml` (if present) layered with `PII_TELEMETRY__*` variables
pub fn load_config() -> anyhow::Result<Config> {
    load_config_from("config")
}

pub fn load_config_from(path: impl AsRef<Path>) -> anyhow::Result<Config> {
    let path = path.as_ref();
    let config = config::Config::builder()
        .add_source(config::File::with_name(&path.to_string_lossy()).required(false))
        .add_source(config::Environment::with_prefix("PII_TELEMETRY").separator("__"))
        .build()?;

    let cfg: Config = config.try_deserialize()?;
    validate_config(&cfg)?;

    Ok(cfg)
}

pub fn validate_config(cfg: &Config) -> anyhow::Result<()> {
    let options = &cfg.observability;

    if options.service_name.trim().is_empty() {
        anyhow::bail!("observability.service_name cannot be empty");
    }

    let url = url::Url::parse(&options.collector_url).map_err(|e| {
        anyhow::anyhow!(
            "observability.collector_url '{}' is not a valid URL: {}",
            options.collector_url,
            e
        )
    })?;
    if url.scheme() != "http" && url.scheme() != "https" {
        anyhow::bail!(
            "observability.collector_url must use http or https, got '{}'",
            url.scheme()
        );
    }

    let export = &options.export;
    if export.max_batch_size == 0 || export.max_queue_size == 0 {
        anyhow::bail!("export batch and queue sizes must be greater than zero");
    }
    if export.max_batch_size > export.max_queue_size {
        anyhow::bail!(
            "export.max_batch_size ({}) cannot exceed export.max_queue_size ({})",
            export.max_batch_size,
            export.max_queue_size
        );
    }
    if export.scheduled_delay_ms == 0 || export.export_timeout_ms == 0 || export.metrics_interval_ms == 0 {
        anyhow::bail!("export delays and timeouts must be greater than zero");
    }

    if options.logging.sinks.is_empty() {
        anyhow::bail!("observability.logging.sinks must list at least one sink");
    }

    Ok(())
}
