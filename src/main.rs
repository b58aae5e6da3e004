//! reverse-relay: a TCP service that reverses what it receives
//!
//! One thread owns every socket; a second thread does the work:
//! - Each chunk read from a client is handed to the worker thread
//! - The worker reverses it and hands it back
//! - The network thread writes it to the client it came from
//!
//! Configuration via CLI arguments or TOML file.

mod config;
mod runtime;

use config::{Config, ConfigError};
use tracing::info;
use tracing_subscriber::EnvFilter;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration
    let config = match Config::load() {
        Ok(config) => config,
        Err(ConfigError::Cli(e)) if !e.use_stderr() => e.exit(),
        Err(e) => {
            eprintln!("{e}");
            std::process::exit(1);
        }
    };

    // Initialize logging
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    info!(
        host = %config.host,
        port = config.port,
        chunk_size = config.chunk_size,
        backlog = config.backlog,
        "Starting reverse-relay"
    );

    runtime::run(config)?;
    Ok(())
}
