//! Command implementations for the CLI
//!
//! - serve: Start the instrumented HTTP service
//! - config: Configuration display and validation

pub mod config;
pub mod serve;
