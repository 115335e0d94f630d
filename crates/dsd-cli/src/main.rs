//! DSD CLI - The `dsd` command.
//!
//! # Architecture
//!
//! The CLI binary orchestrates the following crates:
//!
//! - **dsd-lsp**: the DSD language server (`dsd serve`)
//! - **dsd-supervisor**: keeps a language server process running and
//!   restarts it on host events (`dsd supervise`)

mod commands;
mod console;
mod logging;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use dsd_supervisor::{
    EventBus, Extension, HostEvent, ProcessLauncher, PythonEnvironmentProvider, Supervisor,
    SupervisorConfig,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};

use crate::commands::{parse_line, HostCommand};
use crate::console::ConsolePrompt;

/// DSD - language tooling for the Dynamic Stack Decider
#[derive(Parser, Debug)]
#[command(name = "dsd")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Language tooling for DSD behavior files", long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the DSD language server
    Serve {
        /// Listen on TCP instead of stdio
        #[arg(long)]
        tcp: bool,

        /// TCP host
        #[arg(long, default_value = dsd_lsp::DEFAULT_HOST)]
        host: String,

        /// TCP port
        #[arg(long, default_value_t = dsd_lsp::DEFAULT_PORT)]
        port: u16,

        /// Write logs to this file instead of stderr
        #[arg(long, value_name = "FILE")]
        log_file: Option<PathBuf>,
    },

    /// Supervise a language server, reading host events from stdin
    Supervise {
        /// Configuration file (defaults to the user config directory)
        #[arg(short, long, value_name = "FILE")]
        config: Option<PathBuf>,

        /// Python interpreter or virtual environment to use
        #[arg(long, value_name = "PATH")]
        python: Option<PathBuf>,

        /// Write logs to this file instead of stderr
        #[arg(long, value_name = "FILE")]
        log_file: Option<PathBuf>,
    },

    /// Write a commented default configuration file
    InitConfig {
        /// Where to write it (defaults to the user config directory)
        #[arg(short, long, value_name = "FILE")]
        config: Option<PathBuf>,

        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },

    /// Show version information
    Version,
}

fn main() -> Result<()> {
    let args = Args::parse();

    match args.command {
        Commands::Serve {
            tcp,
            host,
            port,
            log_file,
        } => {
            logging::init_logger(log_file.as_deref())?;
            let runtime = tokio::runtime::Builder::new_multi_thread()
                .enable_all()
                .build()
                .context("Failed to start async runtime")?;
            runtime.block_on(async {
                if tcp {
                    dsd_lsp::run_tcp_server(&host, port).await
                } else {
                    dsd_lsp::run_lsp_server().await
                }
            })
        }
        Commands::Supervise {
            config,
            python,
            log_file,
        } => {
            logging::init_logger(log_file.as_deref())?;
            // One cooperative task at a time
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .context("Failed to start async runtime")?;
            let result = runtime.block_on(supervise(config, python));
            // The stdin reader may still be blocked on a read
            runtime.shutdown_background();
            result
        }
        Commands::InitConfig { config, force } => init_config(config, force),
        Commands::Version => {
            println!("dsd {}", env!("CARGO_PKG_VERSION"));
            println!();
            println!("Language tooling for the Dynamic Stack Decider");
            println!();
            println!("Crates:");
            println!("  - dsd-lsp:        DSD language server");
            println!("  - dsd-supervisor: language server lifecycle supervisor");
            println!(
                "  - default config: {}",
                SupervisorConfig::config_path()
                    .map(|p| p.display().to_string())
                    .unwrap_or_else(|_| "unavailable".to_string())
            );
            Ok(())
        }
    }
}

fn config_file(config: Option<PathBuf>) -> Result<PathBuf> {
    match config {
        Some(path) => Ok(path),
        None => SupervisorConfig::config_path().context("No configuration directory"),
    }
}

fn init_config(config: Option<PathBuf>, force: bool) -> Result<()> {
    let path = config_file(config)?;
    if path.exists() && !force {
        anyhow::bail!(
            "Config file already exists: {} (use --force to overwrite)",
            path.display()
        );
    }
    SupervisorConfig::create_default_config_file(&path)
        .with_context(|| format!("Failed to write {}", path.display()))?;
    println!("Wrote {}", path.display());
    Ok(())
}

fn load_config(path: &Path, python: Option<&PathBuf>) -> SupervisorConfig {
    let mut config = SupervisorConfig::load_or_default(Some(path));
    if let Some(python) = python {
        config.environment.python = Some(python.clone());
    }
    config
}

async fn supervise(config: Option<PathBuf>, python: Option<PathBuf>) -> Result<()> {
    let config_path = config_file(config)?;
    let config = load_config(&config_path, python.as_ref());
    log::info!("Configuration: {}", config_path.display());

    let provider = Arc::new(PythonEnvironmentProvider::new(
        config.environment.python.clone(),
    ));
    let console = Arc::new(ConsolePrompt::default());
    let supervisor = Arc::new(Supervisor::new(
        config,
        provider.clone(),
        Arc::new(ProcessLauncher),
        console.clone(),
    ));
    let bus = EventBus::default();

    // Lines answering a prompt never reach the event loop
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel::<String>();
    let reader_console = console.clone();
    tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    if !reader_console.answer(&line) && tx.send(line).is_err() {
                        break;
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    log::error!("Failed to read stdin: {}", e);
                    break;
                }
            }
        }
    });

    let extension = Extension::activate(supervisor.clone(), &bus, console).await;

    while let Some(line) = rx.recv().await {
        let event = match parse_line(&line) {
            Ok(Some(HostCommand::Event(event))) => event,
            Ok(Some(HostCommand::Quit)) => break,
            Ok(None) => continue,
            Err(message) => {
                log::warn!("{}", message);
                continue;
            }
        };

        match &event {
            HostEvent::EnvironmentChanged { path } => provider.set_active(path.clone()),
            HostEvent::ConfigurationChanged { .. } => {
                let config = load_config(&config_path, python.as_ref());
                if python.is_none() {
                    provider.set_active(config.environment.python.clone());
                }
                supervisor.update_config(config);
            }
            _ => {}
        }
        bus.publish(event);
    }

    log::info!("Shutting down");
    extension.deactivate().await;
    Ok(())
}
