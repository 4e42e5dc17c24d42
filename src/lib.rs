pub mod config;
pub mod error;
pub mod export;
pub mod handlers;
pub mod metrics;
pub mod observability;
pub mod redaction;
pub mod server;
pub mod signals;

use std::sync::Arc;
use tracing_subscriber::{filter::filter_fn, fmt, prelude::*, EnvFilter};

use crate::config::{LogFormat, LoggingConfig};
use crate::observability::{is_internal_target, LogPipeline, PipelineLayer};

/// Initialize tracing/logging for the CLI commands
///
/// Fails if a global subscriber is already installed.
pub fn init_tracing() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(true))
        .try_init()?;

    Ok(())
}

/// Initialize tracing for the server, bridging application events into the pipeline
///
/// Diagnostics of the telemetry machinery go to the `fmt` layer only; every
/// other event is handed to [`PipelineLayer`], whose console sink prints it.
/// `RUST_LOG` overrides `logging.level` when set.
pub fn init_tracing_with_pipeline(
    logging: &LoggingConfig,
    pipeline: Arc<LogPipeline>,
) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(logging.level.filter_directive()));

    let (json_layer, text_layer) = match logging.format {
        LogFormat::Json => (Some(fmt::layer().json().with_target(true)), None),
        LogFormat::Text => (None, Some(fmt::layer().with_target(true))),
    };
    let internal_only = filter_fn(|metadata| is_internal_target(metadata.target()));

    tracing_subscriber::registry()
        .with(filter)
        .with(json_layer.with_filter(internal_only.clone()))
        .with(text_layer.with_filter(internal_only))
        .with(PipelineLayer::new(pipeline))
        .try_init()?;

    Ok(())
}
