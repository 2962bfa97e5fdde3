//! Entry point for the `aegish` binary.
//!
//! Exit codes: 0 on normal exit, 1 on misconfiguration (unreadable config,
//! missing credentials, invalid mode), 130 when the session ends on an
//! operator interrupt.

mod cli;
mod repl;

use clap::Parser;
use tracing_subscriber::EnvFilter;

fn main() {
    let cli = cli::Cli::parse();

    let default_level = "warn";
    let _ = tracing_subscriber::fmt()
        // Fall back to the default filter if the environment variable is
        // not set or contains an invalid value.
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .or_else(|_| EnvFilter::try_new(default_level))
                .unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .try_init();

    let mut config = match aegish_core::Config::load() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("ERROR: {e}");
            std::process::exit(1);
        }
    };
    if cli.model.is_some() {
        config.model = cli.model;
    }

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("ERROR: failed to start runtime: {e}");
            std::process::exit(1);
        }
    };

    match repl::run(&runtime, config) {
        Ok(exit_code) => std::process::exit(exit_code),
        Err(e) => {
            eprintln!("ERROR: {e}");
            std::process::exit(1);
        }
    }
}
