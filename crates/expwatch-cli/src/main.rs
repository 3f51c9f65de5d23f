//! expwatch CLI - expiring-record tracker for remote dynamic-field tables.

use anyhow::Result;
use clap::{Parser, Subcommand};
use expwatch_core::config::LogFormat;
use expwatch_core::Config;
use std::path::PathBuf;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Exit codes for CLI operations.
///
/// Following Unix conventions:
/// - 0: Success
/// - 1-127: Application errors
/// - 128+N: Signal N received (e.g., 130 = SIGINT)
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitCode {
    /// Successful execution
    Success = 0,
    /// Configuration error (invalid config file, missing required fields)
    ConfigError = 1,
    /// Remote table error (transport, HTTP status, GraphQL errors)
    RemoteError = 2,
    /// Persistent store error
    StoreError = 3,
    /// Another invocation holds the lease
    LeaseHeld = 4,
    /// Health check failure
    HealthCheckError = 6,
    /// General runtime error
    RuntimeError = 10,
    /// Signal interrupt (SIGINT = 2, so 128 + 2 = 130)
    SignalInterrupt = 130,
}

impl ExitCode {
    /// Map an error to an exit code, preferring the typed core error.
    fn from_error(error: &anyhow::Error) -> Self {
        if let Some(core) = error.downcast_ref::<expwatch_core::Error>() {
            return match core {
                expwatch_core::Error::Config(_) => ExitCode::ConfigError,
                expwatch_core::Error::Remote(_) => ExitCode::RemoteError,
                expwatch_core::Error::Store(_) | expwatch_core::Error::Io(_) => {
                    ExitCode::StoreError
                }
                expwatch_core::Error::Lease(_) => ExitCode::LeaseHeld,
                _ => ExitCode::RuntimeError,
            };
        }

        let error_str = error.to_string().to_lowercase();
        if error_str.contains("config") || error_str.contains("toml") || error_str.contains("parse")
        {
            ExitCode::ConfigError
        } else if error_str.contains("health") {
            ExitCode::HealthCheckError
        } else {
            ExitCode::RuntimeError
        }
    }
}

mod commands;
mod server;

#[derive(Parser)]
#[command(name = "expwatch")]
#[command(about = "Track records whose grace period is about to end", long_about = None)]
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
    /// Run one scheduled invocation (scan batch or maintenance pass)
    Tick {
        /// Pretend the current time is this unix timestamp in milliseconds
        #[arg(long)]
        at_ms: Option<i64>,

        /// Print the invocation report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Serve the query, health and metrics endpoints
    Serve {
        /// Override the HTTP port
        #[arg(long)]
        port: Option<u16>,

        /// Run an invocation every N seconds from the server
        #[arg(long)]
        tick_interval: Option<u64>,
    },

    /// List records whose grace period ends soon
    Query {
        /// Print the view as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show persisted scan state, snapshot layout and lease
    State {
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show health and metrics of a running server
    Status {
        /// Server URL
        #[arg(long, default_value = "http://localhost:8080")]
        url: String,
    },

    /// Validate configuration file
    Validate,
}

#[tokio::main]
async fn main() {
    let exit_code = run_cli().await;
    std::process::exit(exit_code as i32);
}

/// Main CLI execution logic with proper error handling.
async fn run_cli() -> ExitCode {
    let cli = Cli::parse();

    // Log settings come from the config file when it parses; otherwise JSON at info
    let monitoring = cli
        .config
        .as_ref()
        .and_then(|path| std::fs::read_to_string(path).ok())
        .and_then(|content| toml::from_str::<Config>(&content).ok())
        .map(|config| config.monitoring);
    let log_format = monitoring
        .as_ref()
        .map(|m| m.log_format.clone())
        .unwrap_or(LogFormat::Json);
    let default_level = monitoring
        .as_ref()
        .map(|m| m.log_level.as_directive())
        .unwrap_or("info");

    let filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        match cli.verbose {
            0 => EnvFilter::new(default_level),
            1 => EnvFilter::new("debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    match log_format {
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(fmt::layer().json().with_writer(std::io::stderr))
                .with(filter)
                .init();
        }
        LogFormat::Text => {
            tracing_subscriber::registry()
                .with(fmt::layer().with_writer(std::io::stderr))
                .with(filter)
                .init();
        }
    }

    match execute_command(cli).await {
        Ok(code) => code,
        Err(e) => {
            tracing::error!(error = %e, "Command failed");
            ExitCode::from_error(&e)
        }
    }
}

/// Execute the CLI command.
async fn execute_command(cli: Cli) -> Result<ExitCode> {
    match cli.command {
        Commands::Tick { at_ms, json } => {
            let config = load_config(&cli.config)?;
            commands::tick::run(config, at_ms, json).await?;
        }

        Commands::Serve {
            port,
            tick_interval,
        } => {
            let config = load_config(&cli.config)?;
            return commands::serve::run(config, port, tick_interval).await;
        }

        Commands::Query { json } => {
            let config = load_config(&cli.config)?;
            commands::query::run(config, json).await?;
        }

        Commands::State { json } => {
            let config = load_config(&cli.config)?;
            commands::query::state(config, json).await?;
        }

        Commands::Status { url } => {
            return commands::status::run(&url).await;
        }

        Commands::Validate => {
            let config = load_config(&cli.config)?;
            config.validate()?;
            println!("Configuration is valid");
        }
    }

    Ok(ExitCode::Success)
}

fn load_config(path: &Option<PathBuf>) -> Result<Config> {
    let path = path.clone().unwrap_or_else(|| PathBuf::from("config.toml"));

    let content = std::fs::read_to_string(&path).map_err(|e| {
        expwatch_core::Error::Config(format!("Cannot read {}: {}", path.display(), e))
    })?;
    let config: Config = toml::from_str(&content).map_err(expwatch_core::Error::from)?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use expwatch_core::error::{LeaseError, RemoteError, StoreError};

    #[test]
    fn test_exit_code_from_core_errors() {
        let err = anyhow::Error::from(expwatch_core::Error::from(LeaseError::Contended));
        assert_eq!(ExitCode::from_error(&err), ExitCode::LeaseHeld);

        let err = anyhow::Error::from(expwatch_core::Error::from(
            RemoteError::MissingCursor,
        ));
        assert_eq!(ExitCode::from_error(&err), ExitCode::RemoteError);

        let err = anyhow::Error::from(expwatch_core::Error::from(StoreError::Truncated(
            "k".into(),
        )));
        assert_eq!(ExitCode::from_error(&err), ExitCode::StoreError);

        let err = anyhow::Error::from(expwatch_core::Error::Config("bad".into()));
        assert_eq!(ExitCode::from_error(&err), ExitCode::ConfigError);
    }

    #[test]
    fn test_exit_code_from_message() {
        let err = anyhow::anyhow!("failed to parse something");
        assert_eq!(ExitCode::from_error(&err), ExitCode::ConfigError);

        let err = anyhow::anyhow!("unexpected");
        assert_eq!(ExitCode::from_error(&err), ExitCode::RuntimeError);
    }

    #[test]
    fn test_cli_parses_tick() {
        let cli = Cli::parse_from(["expwatch", "-c", "x.toml", "tick", "--at-ms", "5", "--json"]);
        assert_eq!(cli.config, Some(PathBuf::from("x.toml")));
        assert!(matches!(
            cli.command,
            Commands::Tick {
                at_ms: Some(5),
                json: true
            }
        ));
    }
}
