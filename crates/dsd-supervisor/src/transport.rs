//! Capability traits for talking to a language server.
//!
//! The supervisor only sees these traits, so tests drive it with an
//! in-memory server instead of a real process.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::TransportError;

/// Everything needed to start one server process.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LaunchSpec {
    pub program: PathBuf,
    pub args: Vec<String>,
    /// Working directory
    pub cwd: Option<PathBuf>,
    /// Variables added to the inherited environment
    pub env: BTreeMap<String, String>,
}

impl LaunchSpec {
    /// Render as a shell-like command line for logs.
    pub fn command_line(&self) -> String {
        std::iter::once(self.program.display().to_string())
            .chain(self.args.iter().cloned())
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// A started server that exchanges JSON-RPC messages.
#[async_trait]
pub trait ServerTransport: Send {
    /// Send one message.
    async fn send(&mut self, message: Value) -> Result<(), TransportError>;

    /// Receive the next message, `None` once the server closed its output.
    async fn receive(&mut self) -> Result<Option<Value>, TransportError>;

    /// Release the server, killing it if it has not exited within `timeout`.
    async fn stop(&mut self, timeout: Option<Duration>) -> Result<(), TransportError>;
}

/// Starts server transports.
#[async_trait]
pub trait TransportLauncher: Send + Sync {
    async fn start(&self, spec: &LaunchSpec) -> Result<Box<dyn ServerTransport>, TransportError>;
}
