//! Shardwriter CLI - inspect write router configuration and key routing.

use anyhow::Result;
use clap::{Parser, Subcommand};
use shardwriter_core::config::LogFormat;
use shardwriter_core::Config;
use std::path::PathBuf;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Exit codes for CLI operations.
///
/// Following Unix conventions:
/// - 0: Success
/// - 1-127: Application errors
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitCode {
    /// Successful execution
    Success = 0,
    /// Configuration error (invalid config file, missing required fields)
    ConfigError = 1,
    /// Key error (missing or unencodable key column)
    KeyError = 2,
    /// Ring lookup error (no range owns the key)
    RingError = 3,
    /// Connection or shard failure
    TransportError = 4,
    /// General runtime error
    RuntimeError = 10,
}

impl ExitCode {
    /// Convert an error to an exit code.
    fn from_error(error: &anyhow::Error) -> Self {
        use shardwriter_core::Error;

        match error.downcast_ref::<Error>() {
            Some(Error::Config(_)) | Some(Error::Serialization(_)) => ExitCode::ConfigError,
            Some(Error::MissingKeyColumn(_)) | Some(Error::InvalidKey(_)) => ExitCode::KeyError,
            Some(Error::Ring(_)) => ExitCode::RingError,
            Some(Error::Transport(_)) | Some(Error::Shard(_)) | Some(Error::Close(_)) => {
                ExitCode::TransportError
            }
            Some(_) => ExitCode::RuntimeError,
            None => {
                let error_str = error.to_string().to_lowercase();
                if error_str.contains("config") || error_str.contains("toml") {
                    ExitCode::ConfigError
                } else {
                    ExitCode::RuntimeError
                }
            }
        }
    }
}

mod commands;

#[derive(Parser)]
#[command(name = "shardwriter")]
#[command(about = "Token-range write router tools", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging (-v for debug, -vv for trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate configuration file
    Validate,

    /// Show the row key, owning range and candidates for a record's key
    Route {
        /// Key columns as `name=value`; `name:i32=7` and `name:i64=7` encode
        /// big-endian integers
        #[arg(required = true)]
        keys: Vec<String>,
    },
}

#[tokio::main]
async fn main() {
    let exit_code = run_cli().await;
    std::process::exit(exit_code as i32);
}

/// Main CLI execution logic with proper error handling.
async fn run_cli() -> ExitCode {
    let cli = Cli::parse();

    // Config is optional here; it only picks the log format
    let monitoring = cli
        .config
        .as_ref()
        .and_then(|path| std::fs::read_to_string(path).ok())
        .and_then(|content| toml::from_str::<Config>(&content).ok())
        .map(|config| config.monitoring);

    let filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        match cli.verbose {
            0 => EnvFilter::new(
                monitoring
                    .as_ref()
                    .map(|m| m.log_level.as_filter())
                    .unwrap_or("info"),
            ),
            1 => EnvFilter::new("debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    let log_format = monitoring.map(|m| m.log_format).unwrap_or(LogFormat::Json);
    match log_format {
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(fmt::layer().json())
                .with(filter)
                .init();
        }
        LogFormat::Text => {
            tracing_subscriber::registry()
                .with(fmt::layer())
                .with(filter)
                .init();
        }
    }

    match execute_command(cli).await {
        Ok(()) => ExitCode::Success,
        Err(e) => {
            tracing::error!(error = %e, "Command failed");
            ExitCode::from_error(&e)
        }
    }
}

/// Execute the CLI command.
async fn execute_command(cli: Cli) -> Result<()> {
    let config = load_config(&cli.config)?;

    match cli.command {
        Commands::Validate => commands::validate::run(&config)?,
        Commands::Route { keys } => commands::route::run(&config, &keys)?,
    }

    Ok(())
}

fn load_config(path: &Option<PathBuf>) -> Result<Config> {
    let path = path.clone().unwrap_or_else(|| PathBuf::from("config.toml"));
    Ok(Config::from_file(&path)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_code_mapping() {
        use shardwriter_core::Error;

        let err = anyhow::Error::from(Error::Config("bad".into()));
        assert_eq!(ExitCode::from_error(&err), ExitCode::ConfigError);

        let err = anyhow::Error::from(Error::MissingKeyColumn("id".into()));
        assert_eq!(ExitCode::from_error(&err), ExitCode::KeyError);

        let err = anyhow::Error::from(Error::Ring("gap".into()));
        assert_eq!(ExitCode::from_error(&err), ExitCode::RingError);

        let err = anyhow::anyhow!("something else");
        assert_eq!(ExitCode::from_error(&err), ExitCode::RuntimeError);
    }

    #[test]
    fn test_cli_parses_route() {
        let cli = Cli::parse_from(["shardwriter", "-c", "x.toml", "route", "id=7", "region=eu"]);
        match cli.command {
            Commands::Route { keys } => assert_eq!(keys, vec!["id=7", "region=eu"]),
            Commands::Validate => panic!("expected route"),
        }
        assert_eq!(cli.config, Some(PathBuf::from("x.toml")));
    }
}
