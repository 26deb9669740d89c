//! Sluice CLI - Main entry point

use clap::Parser;
use sluice_cli::{commands, Cli, Commands};
use sluice_common::logging::{init_logging, LogConfig, LogLevel, LogOutput};
use sluice_runtime::LauncherConfig;
use std::process;
use tracing::error;

#[tokio::main]
async fn main() {
    // Parse command-line arguments
    let cli = Cli::parse();

    // Handle markdown help generation
    if cli.markdown_help {
        println!("{}", clap_markdown::help_markdown::<Cli>());
        return;
    }

    let Some(command) = cli.command else {
        eprintln!("Error: A subcommand is required");
        eprintln!();
        eprintln!("For more information, try '--help'.");
        process::exit(2);
    };

    let log_config = LogConfig::builder()
        .level(if cli.verbose { LogLevel::Debug } else { LogLevel::Info })
        .output(LogOutput::Console)
        .log_file_prefix("sluice".to_string())
        .build();

    // Environment variables take precedence
    let log_config = log_config.clone().merge_env().unwrap_or(log_config);

    // Keep the guard alive so file logs are flushed on exit
    let _guard = match init_logging(&log_config) {
        Ok(guard) => Some(guard),
        Err(e) => {
            eprintln!("Warning: logging disabled: {}", e);
            None
        }
    };

    if let Err(e) = execute_command(&command).await {
        error!(error = %e, "Command failed");
        eprintln!("Error: {:#}", e);
        process::exit(1);
    }
}

/// Execute the CLI command
async fn execute_command(command: &Commands) -> anyhow::Result<()> {
    let config = LauncherConfig::load()?;

    match command {
        Commands::Run { job_file } => commands::run::run(job_file, &config).await,
        Commands::Plan { job_file } => commands::plan::run(job_file, &config).await,
    }
}
