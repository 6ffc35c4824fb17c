//! Orthochip CLI - Command-line interface
//!
//! Runs chip extraction batches, generates query grids and inspects batch logs.

mod cli;
mod commands;
mod errors;
mod output;
mod progress;

use clap::Parser;
use cli::Cli;
use std::process::ExitCode;

fn main() -> ExitCode {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let json = cli.json;

    match commands::execute(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            errors::report(&err, json);
            ExitCode::FAILURE
        }
    }
}
