mod cli;
mod commands;
mod config;
mod error;
mod host;
mod output;

use crate::{
    cli::{Args, Commands},
    commands::CommandExecutor,
    config::AppConfig,
    error::{AppError, Result},
};
use clap::Parser;
use std::process;
use tracing::{Level, debug, error};
use tracing_subscriber::{filter::EnvFilter, fmt, prelude::*};

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        error!(error = ?e, "Application failed");
        eprintln!("Error: {e}");
        process::exit(1);
    }
}

async fn run() -> Result<()> {
    let args = Args::parse();

    init_logging(args.verbose, args.quiet)?;

    if let Commands::Config { show, reset } = args.command {
        if reset {
            let path = AppConfig::reset(args.config.as_deref())?;
            println!("✓ Configuration reset to defaults ({})", path.display());
        } else if show {
            let config = AppConfig::load(args.config.as_deref())?;
            println!("{}", config.show()?);
        } else {
            println!(
                "Use --show to display current configuration or --reset to reset to defaults"
            );
        }
        return Ok(());
    }

    let config = AppConfig::load(args.config.as_deref())?;
    debug!(?config, "Loaded configuration");

    let executor = CommandExecutor::new(&config, &args)?;

    match args.command {
        Commands::Check => executor.check().await?,
        Commands::Warm { version, refresh } => executor.warm(version, refresh).await?,
        Commands::Status { role } => executor.status(role).await?,
        Commands::Clear => executor.clear().await?,
        Commands::Fetch {
            path,
            offline,
            body,
        } => executor.fetch(&path, offline, body).await?,
        Commands::Watch { auto_accept } => executor.watch(auto_accept).await?,
        Commands::Config { .. } => {}
    }

    Ok(())
}

/// Logs go to stderr so `--output json` stays machine readable
fn init_logging(verbose: bool, quiet: bool) -> Result<()> {
    let filter = if quiet {
        EnvFilter::new("error")
    } else if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::from_default_env().add_directive(Level::INFO.into())
    };

    tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(verbose)
                .with_level(verbose),
        )
        .with(filter)
        .try_init()
        .map_err(|e| AppError::Initialization(e.to_string()))
}
