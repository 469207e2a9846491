//! Recordar CLI
//!
//! Class-incremental training entry point for the recordar library.
//!
//! # Usage
//!
//! ```bash
//! # Run every stage of a config
//! recordar train config.yaml
//!
//! # Train with overrides
//! recordar train config.yaml --epochs 10 --bias-rect bic --memory-budget 2000
//!
//! # Validate config
//! recordar validate config.yaml --detailed
//!
//! # Show the stage plan
//! recordar info config.yaml
//! ```

use clap::Parser;
use recordar::cli::{init_tracing, run_command, Cli, LogLevel};
use std::process::ExitCode;

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(LogLevel::from_flags(cli.quiet, cli.verbose));

    match run_command(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}
