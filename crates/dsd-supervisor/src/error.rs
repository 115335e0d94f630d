//! Error types for the language server supervisor

use std::path::PathBuf;

use thiserror::Error;

use crate::version::Version;

/// Result type alias for supervisor operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised while moving bytes to and from the server process
#[derive(Debug, Error)]
pub enum TransportError {
    /// IO error on the process pipes
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A message arrived without a `Content-Length` header
    #[error("message is missing the Content-Length header")]
    MissingContentLength,

    /// The `Content-Length` header could not be parsed
    #[error("invalid message header: {0}")]
    InvalidHeader(String),

    /// The message body is not valid JSON
    #[error("invalid JSON payload: {0}")]
    Json(#[from] serde_json::Error),

    /// The transport was already stopped
    #[error("transport is closed")]
    Closed,
}

/// Errors that can occur while supervising the language server
#[derive(Debug, Error)]
pub enum Error {
    /// No environment is active, or the active one could not be resolved
    #[error("Python environment could not be resolved{}", .0.as_ref().map(|p| format!(": {}", p.display())).unwrap_or_default())]
    EnvironmentUnresolved(Option<PathBuf>),

    /// The environment did not report its version
    #[error("Python version could not be determined for {0}")]
    VersionUnavailable(PathBuf),

    /// The reported version is not a semantic version
    #[error("Python version '{0}' could not be parsed")]
    VersionUnparsable(String),

    /// The environment is older than the supported minimum
    #[error("Python {found} is not supported, version {required} or newer is required")]
    VersionTooLow {
        /// Version of the resolved environment
        found: Version,
        /// Minimum supported version
        required: Version,
    },

    /// The environment has no executable path
    #[error("Python executable could not be determined for {0}")]
    ExecutableUnresolved(PathBuf),

    /// The server process could not be launched or did not complete the handshake
    #[error("Failed to launch the language server: {0}")]
    ProcessLaunchFailure(String),

    /// Transport error on an established connection
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// The server closed the connection while a response was pending
    #[error("The language server closed the connection")]
    ConnectionClosed,

    /// The server answered a request with an error
    #[error("Server error {code}: {message}")]
    Server {
        /// JSON-RPC error code
        code: i64,
        /// Error message
        message: String,
    },

    /// The operation needs a running connection
    #[error("The language server is not running")]
    NotRunning,

    /// A response did not arrive in time
    #[error("Timed out waiting for '{0}'")]
    Timeout(String),

    /// Configuration file error
    #[error("Configuration error: {0}")]
    Config(String),

    /// TOML parsing error
    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    /// TOML serialization error
    #[error("TOML serialization error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Whether this error should be brought to the user's attention.
    pub fn is_user_facing(&self) -> bool {
        matches!(self, Error::VersionTooLow { .. })
    }
}
