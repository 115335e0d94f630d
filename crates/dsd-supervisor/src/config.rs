//! Configuration file support for the DSD supervisor
//!
//! Configuration is stored in TOML format at:
//! - Linux: `~/.config/dsd/config.toml`
//! - macOS: `~/Library/Application Support/dsd/config.toml`
//! - Windows: `%APPDATA%\dsd\config.toml`

use crate::error::{Error, Result};
use crate::version::{Version, DEFAULT_MINIMUM_VERSION};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Configuration namespace watched for restarts.
pub const SETTINGS_NAMESPACE: &str = "dsd";

/// Main configuration structure
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SupervisorConfig {
    /// How the language server is launched
    pub server: ServerSettings,
    /// Python environment selection
    pub environment: EnvironmentSettings,
    /// Client-side settings forwarded to the server
    pub client: ClientSettings,
}

impl SupervisorConfig {
    /// Load configuration from `path`
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(Error::Config(format!("Config file not found at {:?}", path)));
        }
        let content = fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Parse configuration from TOML text
    pub fn from_toml(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Load configuration from `path` (or the default location) or fall back to defaults
    pub fn load_or_default(path: Option<&Path>) -> Self {
        let path = match path {
            Some(path) => path.to_path_buf(),
            None => match Self::config_path() {
                Ok(path) => path,
                Err(_) => return Self::default(),
            },
        };
        match Self::load(&path) {
            Ok(config) => config,
            Err(e) => {
                log::debug!("Using default configuration: {}", e);
                Self::default()
            }
        }
    }

    /// Save configuration to `path`
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        fs::write(path, content)?;
        Ok(())
    }

    /// Get the default configuration file path
    pub fn config_path() -> Result<PathBuf> {
        if let Some(proj_dirs) = ProjectDirs::from("", "", SETTINGS_NAMESPACE) {
            Ok(proj_dirs.config_dir().join("config.toml"))
        } else {
            Err(Error::Config("Could not determine config directory".to_string()))
        }
    }

    /// Create a commented default config file at `path`
    pub fn create_default_config_file(path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let content = r#"# DSD language server supervisor configuration

[server]
# "command": run `command` found next to the interpreter or on PATH
# "interpreter": run the interpreter against install_root/entry_point
mode = "interpreter"
command = "dsd-language-server"
entry_point = "bundled/tool/lsp_server.py"
# install_root = "/opt/dsd-extension"
args = []

# Milliseconds to wait for a graceful shutdown before killing the server.
# 0 waits forever.
shutdown_timeout_ms = 5000

# Milliseconds to wait for the answer to an executed server command.
# 0 waits forever.
request_timeout_ms = 30000

[environment]
# Interpreter or virtual environment to use instead of python3 on PATH
# python = "/home/me/venvs/robot"
minimum_version = "3.10.0"

[client]
document_selector = ["*.dsd"]
# "off", "messages" or "verbose"
trace = "off"
import_strategy = "useBundled"
# "off", "onError", "onWarning" or "always"
show_notifications = "off"
# workspace = "/home/me/robot_ws"
"#;

        fs::write(path, content)?;
        Ok(())
    }

    /// Entry point of the server, resolved against the install root
    pub fn entry_point_path(&self) -> PathBuf {
        self.server.install_root().join(&self.server.entry_point)
    }

    /// Workspace the server runs in
    pub fn workspace(&self) -> PathBuf {
        self.client
            .workspace
            .clone()
            .or_else(|| std::env::current_dir().ok())
            .unwrap_or_else(|| PathBuf::from("."))
    }
}

/// Launch mode of the language server
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServerMode {
    /// Run a console script found on the environment's search path
    Command,
    /// Run the interpreter against the bundled entry point
    #[default]
    Interpreter,
}

/// Server launch settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    pub mode: ServerMode,
    /// Console script name used in `command` mode
    pub command: String,
    /// Entry point relative to the install root, used in `interpreter` mode
    pub entry_point: PathBuf,
    /// Install location of the server sources (defaults to the current directory)
    pub install_root: Option<PathBuf>,
    /// Extra arguments passed to the server
    pub args: Vec<String>,
    /// Bound on each wait while stopping, 0 disables it
    pub shutdown_timeout_ms: u64,
    /// Bound on a `workspace/executeCommand` answer, 0 disables it
    pub request_timeout_ms: u64,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            mode: ServerMode::default(),
            command: "dsd-language-server".to_string(),
            entry_point: PathBuf::from("bundled/tool/lsp_server.py"),
            install_root: None,
            args: Vec::new(),
            shutdown_timeout_ms: 5000,
            request_timeout_ms: 30000,
        }
    }
}

impl ServerSettings {
    /// Shutdown bound, `None` when waiting forever
    pub fn shutdown_timeout(&self) -> Option<Duration> {
        (self.shutdown_timeout_ms > 0).then(|| Duration::from_millis(self.shutdown_timeout_ms))
    }

    /// Command answer bound, `None` when waiting forever
    pub fn request_timeout(&self) -> Option<Duration> {
        (self.request_timeout_ms > 0).then(|| Duration::from_millis(self.request_timeout_ms))
    }

    pub fn install_root(&self) -> PathBuf {
        self.install_root
            .clone()
            .or_else(|| std::env::current_dir().ok())
            .unwrap_or_else(|| PathBuf::from("."))
    }
}

/// Python environment settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EnvironmentSettings {
    /// Interpreter or environment directory overriding discovery
    pub python: Option<PathBuf>,
    /// Oldest accepted interpreter version
    pub minimum_version: Version,
}

impl Default for EnvironmentSettings {
    fn default() -> Self {
        Self {
            python: None,
            minimum_version: DEFAULT_MINIMUM_VERSION,
        }
    }
}

/// Protocol message tracing level
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Trace {
    #[default]
    Off,
    /// Log each method name
    Messages,
    /// Log method names and payloads
    Verbose,
}

/// Settings describing the client side of the connection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientSettings {
    /// File patterns routed to the server
    pub document_selector: Vec<String>,
    pub trace: Trace,
    /// `useBundled` or `fromEnvironment`
    pub import_strategy: String,
    /// `off`, `onError`, `onWarning` or `always`
    pub show_notifications: String,
    /// Workspace folder (defaults to the current directory)
    pub workspace: Option<PathBuf>,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            document_selector: vec!["*.dsd".to_string()],
            trace: Trace::Off,
            import_strategy: "useBundled".to_string(),
            show_notifications: "off".to_string(),
            workspace: None,
        }
    }
}

impl ClientSettings {
    /// Whether `path` is routed to the server by the document selector
    pub fn selects(&self, path: &Path) -> bool {
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            return false;
        };
        self.document_selector.iter().any(|pattern| match pattern.strip_prefix('*') {
            Some(suffix) => name.ends_with(suffix),
            None => name == pattern,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = SupervisorConfig::default();
        assert_eq!(config.server.mode, ServerMode::Interpreter);
        assert_eq!(config.server.shutdown_timeout(), Some(Duration::from_millis(5000)));
        assert_eq!(config.server.request_timeout(), Some(Duration::from_secs(30)));
        assert_eq!(config.environment.minimum_version, Version::new(3, 10, 0));
        assert_eq!(config.client.trace, Trace::Off);
        assert_eq!(config.client.document_selector, vec!["*.dsd"]);
    }

    #[test]
    fn test_parse_partial_toml() {
        let config = SupervisorConfig::from_toml(
            r#"
[server]
mode = "command"
shutdown_timeout_ms = 0
request_timeout_ms = 0

[environment]
python = "/opt/venv"
minimum_version = "3.11.1"

[client]
trace = "verbose"
"#,
        )
        .unwrap();
        assert_eq!(config.server.mode, ServerMode::Command);
        assert_eq!(config.server.command, "dsd-language-server");
        assert_eq!(config.server.shutdown_timeout(), None);
        assert_eq!(config.server.request_timeout(), None);
        assert_eq!(config.environment.python, Some(PathBuf::from("/opt/venv")));
        assert_eq!(config.environment.minimum_version, Version::new(3, 11, 1));
        assert_eq!(config.client.trace, Trace::Verbose);
        assert_eq!(config.client.import_strategy, "useBundled");
    }

    #[test]
    fn test_bad_version_is_an_error() {
        let result = SupervisorConfig::from_toml("[environment]\nminimum_version = \"three\"\n");
        assert!(matches!(result, Err(Error::TomlParse(_))));
    }

    #[test]
    fn test_default_config_file_parses() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");
        SupervisorConfig::create_default_config_file(&path).unwrap();
        let config = SupervisorConfig::load(&path).unwrap();
        assert_eq!(config.server.entry_point, PathBuf::from("bundled/tool/lsp_server.py"));
        assert_eq!(config.environment.minimum_version, DEFAULT_MINIMUM_VERSION);
        assert_eq!(config.server, ServerSettings::default());
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        let mut config = SupervisorConfig::default();
        config.server.args = vec!["--verbose".to_string()];
        config.client.workspace = Some(PathBuf::from("/ws"));
        config.save(&path).unwrap();
        assert_eq!(SupervisorConfig::load(&path).unwrap(), config);
    }

    #[test]
    fn test_missing_file_falls_back_to_default() {
        let dir = tempfile::tempdir().unwrap();
        let config = SupervisorConfig::load_or_default(Some(&dir.path().join("absent.toml")));
        assert_eq!(config, SupervisorConfig::default());
    }

    #[test]
    fn test_entry_point_path() {
        let mut config = SupervisorConfig::default();
        config.server.install_root = Some(PathBuf::from("/ext"));
        assert_eq!(
            config.entry_point_path(),
            PathBuf::from("/ext/bundled/tool/lsp_server.py")
        );
    }

    #[test]
    fn test_document_selector() {
        let client = ClientSettings::default();
        assert!(client.selects(Path::new("/ws/behavior/main.dsd")));
        assert!(!client.selects(Path::new("/ws/actions/kick.py")));
    }
}
