//! Language server lifecycle supervision.
//!
//! The [`Supervisor`] owns at most one [`Connection`]. Starting always
//! stops the previous connection first, and a start that arrives while
//! another one is still in progress is dropped rather than queued.
//!
//! ```text
//! Stopped --start--> Starting --success--> Running
//!                    Starting --failure--> Stopped
//! Running --stop---> Stopped
//! ```

use std::future::Future;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use url::Url;

use crate::config::{SupervisorConfig, Trace};
use crate::environment::{resolve_environment, EnvironmentDescriptor, EnvironmentProvider};
use crate::error::{Error, Result};
use crate::process::build_launch_spec;
use crate::transport::{ServerTransport, TransportLauncher};

/// Observable state of the supervised connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Stopped,
    Starting,
    Running,
}

/// Result of a call to [`Supervisor::start`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    /// A new connection is running
    Started,
    /// Another start was in progress, nothing was done
    AlreadyStarting,
}

/// Asks the user to confirm a remediation.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Show `message` with a single `action`; true when the user accepts.
    async fn confirm(&self, message: &str, action: &str) -> bool;
}

/// Asks the user to pick one of the server's commands.
#[async_trait]
pub trait CommandPicker: Send + Sync {
    async fn pick(&self, commands: &[String]) -> Option<String>;
}

/// Clears the start-in-progress flag on every exit path.
struct StartGuard<'a>(&'a AtomicBool);

impl Drop for StartGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

async fn bounded<T>(
    timeout: Option<Duration>,
    what: &str,
    fut: impl Future<Output = Result<T>>,
) -> Result<T> {
    match timeout {
        Some(timeout) => tokio::time::timeout(timeout, fut)
            .await
            .map_err(|_| Error::Timeout(what.to_string()))?,
        None => fut.await,
    }
}

/// One running language server and its JSON-RPC state.
pub struct Connection {
    transport: Box<dyn ServerTransport>,
    next_id: i64,
    capabilities: Value,
    trace: Trace,
}

impl Connection {
    fn new(transport: Box<dyn ServerTransport>, trace: Trace) -> Self {
        Self {
            transport,
            next_id: 1,
            capabilities: Value::Null,
            trace,
        }
    }

    /// Capabilities the server returned from `initialize`.
    pub fn capabilities(&self) -> &Value {
        &self.capabilities
    }

    /// Commands advertised by the server.
    pub fn commands(&self) -> Vec<String> {
        self.capabilities
            .pointer("/executeCommandProvider/commands")
            .and_then(Value::as_array)
            .map(|commands| {
                commands
                    .iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default()
    }

    fn trace_message(&self, direction: &str, message: &Value) {
        if self.trace == Trace::Off {
            return;
        }
        let label = match (message.get("method"), message.get("id")) {
            (Some(method), _) => method.as_str().unwrap_or("?").to_string(),
            (None, Some(id)) => format!("response {}", id),
            (None, None) => "message".to_string(),
        };
        log::info!("{} {}", direction, label);
        if self.trace == Trace::Verbose {
            log::debug!("{}", message);
        }
    }

    async fn send(&mut self, message: Value) -> Result<()> {
        self.trace_message("-->", &message);
        self.transport.send(message).await?;
        Ok(())
    }

    /// Send a notification.
    pub async fn notify(&mut self, method: &str, params: Value) -> Result<()> {
        let mut message = json!({ "jsonrpc": "2.0", "method": method });
        if !params.is_null() {
            message["params"] = params;
        }
        self.send(message).await
    }

    /// Send a request and wait for its response.
    ///
    /// Server notifications received meanwhile are logged, and server
    /// requests are answered with a `null` result.
    pub async fn request(&mut self, method: &str, params: Value) -> Result<Value> {
        let id = self.next_id;
        self.next_id += 1;
        let mut message = json!({ "jsonrpc": "2.0", "id": id, "method": method });
        if !params.is_null() {
            message["params"] = params;
        }
        self.send(message).await?;

        loop {
            let Some(message) = self.transport.receive().await? else {
                return Err(Error::ConnectionClosed);
            };
            self.trace_message("<--", &message);

            match (message.get("id").cloned(), message.get("method").and_then(Value::as_str)) {
                (Some(server_id), Some(method)) => {
                    log::debug!("Answering server request '{}' with null", method);
                    self.send(json!({ "jsonrpc": "2.0", "id": server_id, "result": null }))
                        .await?;
                }
                (None, Some(method)) => log_notification(method, message.get("params")),
                (Some(response_id), None) if response_id == json!(id) => {
                    if let Some(error) = message.get("error") {
                        return Err(Error::Server {
                            code: error.get("code").and_then(Value::as_i64).unwrap_or(0),
                            message: error
                                .get("message")
                                .and_then(Value::as_str)
                                .unwrap_or_default()
                                .to_string(),
                        });
                    }
                    return Ok(message.get("result").cloned().unwrap_or(Value::Null));
                }
                _ => log::debug!("Ignoring unexpected message: {}", message),
            }
        }
    }

    /// `initialize` / `initialized` handshake.
    async fn initialize(&mut self, config: &SupervisorConfig, env: &EnvironmentDescriptor) -> Result<()> {
        let result = self
            .request("initialize", initialize_params(config, env))
            .await?;
        self.capabilities = result.get("capabilities").cloned().unwrap_or(Value::Null);
        if let Some(info) = result.get("serverInfo") {
            log::info!(
                "Connected to {} {}",
                info.get("name").and_then(Value::as_str).unwrap_or("language server"),
                info.get("version").and_then(Value::as_str).unwrap_or("")
            );
        }
        self.notify("initialized", json!({})).await
    }

    /// `shutdown` / `exit`, then release the transport.
    ///
    /// The transport is stopped even when the server does not answer.
    async fn shutdown(mut self, timeout: Option<Duration>) -> Result<()> {
        let graceful = bounded(timeout, "shutdown", async {
            self.request("shutdown", Value::Null).await?;
            self.notify("exit", Value::Null).await
        })
        .await;
        let released = self.transport.stop(timeout).await.map_err(Error::from);
        graceful.and(released)
    }
}

fn log_notification(method: &str, params: Option<&Value>) {
    let message = params
        .and_then(|p| p.get("message"))
        .and_then(Value::as_str);
    match (method, message) {
        ("window/logMessage" | "window/showMessage", Some(message)) => {
            match params.and_then(|p| p.get("type")).and_then(Value::as_i64) {
                Some(1) => log::error!("[server] {}", message),
                Some(2) => log::warn!("[server] {}", message),
                Some(3) => log::info!("[server] {}", message),
                _ => log::debug!("[server] {}", message),
            }
        }
        _ => log::debug!("Server notification '{}'", method),
    }
}

fn file_uri(path: &Path) -> Value {
    Url::from_directory_path(path)
        .map(|u| Value::String(u.to_string()))
        .unwrap_or(Value::Null)
}

fn initialize_params(config: &SupervisorConfig, env: &EnvironmentDescriptor) -> Value {
    let workspace = config.workspace();
    let workspace_uri = file_uri(&workspace);
    let name = workspace
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| workspace.display().to_string());
    let interpreter = vec![env.executable.display().to_string()];
    let trace = match config.client.trace {
        Trace::Off => "off",
        Trace::Messages => "messages",
        Trace::Verbose => "verbose",
    };

    json!({
        "processId": std::process::id(),
        "clientInfo": { "name": "dsd-supervisor", "version": env!("CARGO_PKG_VERSION") },
        "rootUri": workspace_uri,
        "workspaceFolders": [{ "uri": workspace_uri, "name": name }],
        "capabilities": {},
        "trace": trace,
        "initializationOptions": {
            "settings": [{
                "workspace": workspace_uri,
                "interpreter": interpreter,
                "args": config.server.args,
                "path": [],
                "importStrategy": config.client.import_strategy,
                "showNotifications": config.client.show_notifications,
            }],
            "globalSettings": {
                "interpreter": interpreter,
                "args": [],
                "path": [],
                "importStrategy": config.client.import_strategy,
                "showNotifications": config.client.show_notifications,
            },
        },
    })
}

/// Keeps a single language server running.
pub struct Supervisor {
    config: RwLock<SupervisorConfig>,
    provider: Arc<dyn EnvironmentProvider>,
    launcher: Arc<dyn TransportLauncher>,
    notifier: Arc<dyn Notifier>,
    connection: tokio::sync::Mutex<Option<Connection>>,
    starting: AtomicBool,
    running: AtomicBool,
}

impl Supervisor {
    pub fn new(
        config: SupervisorConfig,
        provider: Arc<dyn EnvironmentProvider>,
        launcher: Arc<dyn TransportLauncher>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            config: RwLock::new(config),
            provider,
            launcher,
            notifier,
            connection: tokio::sync::Mutex::new(None),
            starting: AtomicBool::new(false),
            running: AtomicBool::new(false),
        }
    }

    /// Snapshot of the current configuration.
    pub fn config(&self) -> SupervisorConfig {
        self.config.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Replace the configuration used by the next start.
    pub fn update_config(&self, config: SupervisorConfig) {
        *self.config.write().unwrap_or_else(|e| e.into_inner()) = config;
    }

    pub fn state(&self) -> ConnectionState {
        if self.starting.load(Ordering::SeqCst) {
            ConnectionState::Starting
        } else if self.running.load(Ordering::SeqCst) {
            ConnectionState::Running
        } else {
            ConnectionState::Stopped
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Whether a start is in progress.
    pub fn is_starting(&self) -> bool {
        self.starting.load(Ordering::SeqCst)
    }

    /// Stop any running server, then start a new one.
    ///
    /// Returns [`StartOutcome::AlreadyStarting`] without doing anything if
    /// another start is still in progress.
    pub async fn start(&self) -> Result<StartOutcome> {
        if self.starting.swap(true, Ordering::SeqCst) {
            log::debug!("Language server start already in progress, ignoring");
            return Ok(StartOutcome::AlreadyStarting);
        }
        let _guard = StartGuard(&self.starting);

        if let Err(e) = self.stop().await {
            log::warn!("Previous language server did not stop cleanly: {}", e);
        }

        match self.launch().await {
            Ok(connection) => {
                *self.connection.lock().await = Some(connection);
                self.running.store(true, Ordering::SeqCst);
                log::info!("Language server is running");
                Ok(StartOutcome::Started)
            }
            Err(e) => {
                self.report_start_failure(&e).await;
                Err(e)
            }
        }
    }

    async fn launch(&self) -> Result<Connection> {
        let config = self.config();
        let env =
            resolve_environment(self.provider.as_ref(), &config.environment.minimum_version).await?;
        let spec = build_launch_spec(&config, &env)?;
        let transport = self
            .launcher
            .start(&spec)
            .await
            .map_err(|e| Error::ProcessLaunchFailure(e.to_string()))?;

        let mut connection = Connection::new(transport, config.client.trace);
        if let Err(e) = connection.initialize(&config, &env).await {
            if let Err(stop_err) = connection.transport.stop(config.server.shutdown_timeout()).await {
                log::debug!("Releasing failed server: {}", stop_err);
            }
            return Err(Error::ProcessLaunchFailure(format!("handshake failed: {}", e)));
        }
        Ok(connection)
    }

    async fn report_start_failure(&self, error: &Error) {
        log::error!("Language server not started: {}", error);
        if let Error::VersionTooLow { found, required } = error {
            let message = format!(
                "The DSD language server requires Python {} or newer, but the selected \
                 environment is Python {}.",
                required, found
            );
            if self.notifier.confirm(&message, "Select Python environment").await {
                self.provider.request_environment_change().await;
            }
        }
    }

    /// Shut down the running server, if any.
    ///
    /// The connection is released even when the server does not answer.
    pub async fn stop(&self) -> Result<()> {
        let mut slot = self.connection.lock().await;
        let Some(connection) = slot.take() else {
            return Ok(());
        };
        self.running.store(false, Ordering::SeqCst);
        log::info!("Stopping language server");
        let timeout = self.config().server.shutdown_timeout();
        connection.shutdown(timeout).await
    }

    /// Same as [`Supervisor::start`], which always stops first.
    pub async fn restart(&self) -> Result<StartOutcome> {
        log::info!("Restarting language server");
        self.start().await
    }

    /// Commands advertised by the running server.
    pub async fn server_commands(&self) -> Vec<String> {
        self.connection
            .lock()
            .await
            .as_ref()
            .map(Connection::commands)
            .unwrap_or_default()
    }

    /// Let the user pick one of the server's commands and run it.
    ///
    /// Returns `None` when the server has no commands or nothing was picked.
    /// An answer slower than `server.request_timeout_ms` is an
    /// [`Error::Timeout`]; the connection stays up.
    pub async fn execute_server_command(&self, picker: &dyn CommandPicker) -> Result<Option<Value>> {
        let commands = match self.connection.lock().await.as_ref() {
            Some(connection) => connection.commands(),
            None => return Err(Error::NotRunning),
        };
        if commands.is_empty() {
            log::info!("The language server does not advertise any commands");
            return Ok(None);
        }
        let Some(command) = picker.pick(&commands).await else {
            return Ok(None);
        };

        // The lock is held for the whole request, so stop() waits at most this long
        let timeout = self.config().server.request_timeout();
        let mut slot = self.connection.lock().await;
        let connection = slot.as_mut().ok_or(Error::NotRunning)?;
        let result = bounded(
            timeout,
            "workspace/executeCommand",
            connection.request(
                "workspace/executeCommand",
                json!({ "command": command, "arguments": [] }),
            ),
        )
        .await?;
        Ok(Some(result))
    }
}
