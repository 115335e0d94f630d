//! Logger setup.
//!
//! Logs always go to stderr or a file: stdout carries the LSP stream
//! when serving over stdio.

use anyhow::{Context, Result};
use std::fs::OpenOptions;
use std::path::Path;

/// Initialize `env_logger` with an `info` default, overridable via `RUST_LOG`.
pub fn init_logger(log_file: Option<&Path>) -> Result<()> {
    let mut builder =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"));
    builder
        .format_timestamp(None)
        .target(env_logger::Target::Stderr);

    if let Some(path) = log_file {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("Failed to open log file: {}", path.display()))?;
        builder.target(env_logger::Target::Pipe(Box::new(file)));
    }

    builder.try_init().context("Logger already initialized")?;
    Ok(())
}
