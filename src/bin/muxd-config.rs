use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use serde_json::json;

use muxd::config::{load_config, ConfigError, ServerConfig};

#[derive(Parser)]
#[command(name = "muxd-config")]
#[command(about = "Validate and inspect muxd configuration files", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate a config file and print a summary
    Check {
        /// Path to the TOML config file
        path: PathBuf,
    },
    /// Print the default configuration
    Defaults,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    match cli.command {
        Commands::Check { path } => match load_config(&path) {
            Ok(config) => {
                println!("{}", summary(&config));
                ExitCode::SUCCESS
            }
            Err(ConfigError::Validation(errors)) => {
                eprintln!("Error: {} validation error(s) in {}", errors.len(), path.display());
                for error in errors {
                    eprintln!("  - {}", error);
                }
                ExitCode::FAILURE
            }
            Err(e) => {
                eprintln!("Error: {}", e);
                ExitCode::FAILURE
            }
        },
        Commands::Defaults => match toml::to_string_pretty(&ServerConfig::default()) {
            Ok(text) => {
                print!("{}", text);
                ExitCode::SUCCESS
            }
            Err(e) => {
                eprintln!("Error: {}", e);
                ExitCode::FAILURE
            }
        },
    }
}

fn summary(config: &ServerConfig) -> String {
    let listens: Vec<_> = config
        .listens
        .iter()
        .map(|l| {
            json!({
                "name": l.name,
                "addresses": l.addresses,
                "tls": l.tls.is_some(),
                "send_buffer_size": l.network.send_buffer_size,
                "send_timeout_ms": l.network.send_timeout_ms,
                "recv_timeout_ms": l.network.recv_timeout_ms,
                "max_connections": l.network.max_connections,
                "max_concurrent_streams": l.http2.max_concurrent_streams,
            })
        })
        .collect();

    let value = json!({
        "workers": config.runtime.worker_count(),
        "log_level": config.observability.log_level,
        "listens": listens,
    });
    serde_json::to_string_pretty(&value).unwrap_or_else(|_| value.to_string())
}
