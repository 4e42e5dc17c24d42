use anyhow::Result;
use clap::Parser;

mod cli;
mod commands;

use pii_telemetry::init_tracing;

#[tokio::main]
async fn main() -> Result<()> {
    let args = cli::Cli::parse();

    // The server installs its own subscriber once the log pipeline exists
    let command = args.get_command();
    if !matches!(command, cli::Commands::Serve) {
        init_tracing()?;
    }

    match command {
        cli::Commands::Serve => {
            commands::serve::execute(&args.config).await?;
        }
        cli::Commands::Config { action } => match action {
            cli::ConfigCommands::Show => commands::config::show(&args.config)?,
            cli::ConfigCommands::Validate => commands::config::validate(&args.config)?,
        },
        cli::Commands::Version => {
            println!("pii-telemetry v{}", env!("CARGO_PKG_VERSION"));
        }
    }

    Ok(())
}
