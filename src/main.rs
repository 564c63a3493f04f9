//! Gridbots - Main Entry Point
//!
//! Validates and describes strategy configurations for the reconciliation engine.

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use gridbots::config::load_config;
use gridbots::strategy::check_parameters;

/// CLI arguments for the application
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.toml", env = "GRIDBOTS_CONFIG")]
    config: String,

    /// Log level (trace, debug, info, warn, error); overrides the config file
    #[arg(long)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Validate strategy parameters and print the verdict
    Check,
    /// Print the parsed strategy configuration
    Describe,
}

fn parse_level(level: &str) -> Level {
    match level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    }
}

fn main() -> Result<()> {
    // Parse command line arguments
    let args = Args::parse();

    let config = load_config(Some(&args.config))?;

    // Initialize logging
    let level = parse_level(args.log_level.as_deref().unwrap_or(&config.settings.log_level));
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(true)
        .with_file(true)
        .with_line_number(true)
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;

    info!(
        config = %args.config,
        strategy = config.strategy.kind(),
        "configuration loaded"
    );

    match args.command {
        Command::Check => {
            let check = check_parameters(&config.strategy);
            if check.valid {
                println!("{}: parameters valid", config.strategy.kind());
            } else {
                let reason = check.reason.unwrap_or_default();
                warn!(reason = %reason, "parameters rejected");
                bail!("{}: {}", config.strategy.kind(), reason);
            }
        }
        Command::Describe => {
            println!("{}", serde_json::to_string_pretty(&config.strategy)?);
            println!("{}", serde_json::to_string_pretty(&config.settings)?);
        }
    }

    Ok(())
}
