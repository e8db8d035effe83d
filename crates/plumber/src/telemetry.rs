//! Logging setup for the binary.
//!
//! Logs go to stderr so `ports --json` output stays machine-readable.

use anyhow::{anyhow, Result};
use tracing_subscriber::EnvFilter;

/// `log_level` is an `EnvFilter` directive string (config or `RUST_LOG`);
/// each `-v` raises the floor past it.
pub fn init(log_level: &str, verbose: u8) -> Result<()> {
    let directive = match verbose {
        0 => log_level,
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_new(directive)
        .map_err(|e| anyhow!("Invalid log level {:?}: {}", directive, e))?;

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init()
        .map_err(|e| anyhow!("Failed to initialize logging: {}", e))
}
