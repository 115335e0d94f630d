//! Language server process management.
//!
//! Spawns the server with piped stdio and speaks framed JSON-RPC over
//! it. Stderr is forwarded to the log. When dropped, the child is killed.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};

use crate::codec::{read_message, write_message};
use crate::config::{ServerMode, SupervisorConfig};
use crate::environment::EnvironmentDescriptor;
use crate::error::{Error, Result, TransportError};
use crate::transport::{LaunchSpec, ServerTransport, TransportLauncher};

/// Tells the bundled server where to import its libraries from.
pub const IMPORT_STRATEGY_ENV: &str = "LS_IMPORT_STRATEGY";
/// Tells the server which messages to show to the user.
pub const SHOW_NOTIFICATION_ENV: &str = "LS_SHOW_NOTIFICATION";

/// Build the launch description for the configured mode.
pub fn build_launch_spec(
    config: &SupervisorConfig,
    env: &EnvironmentDescriptor,
) -> Result<LaunchSpec> {
    let mut args = Vec::new();
    let program = match config.server.mode {
        ServerMode::Command => find_command(&config.server.command, env)?,
        ServerMode::Interpreter => {
            let entry_point = config.entry_point_path();
            log::debug!("Server entry point: {}", entry_point.display());
            args.push(entry_point.display().to_string());
            env.executable.clone()
        }
    };
    args.extend(config.server.args.iter().cloned());

    let env_vars = [
        (IMPORT_STRATEGY_ENV, config.client.import_strategy.as_str()),
        (SHOW_NOTIFICATION_ENV, config.client.show_notifications.as_str()),
        ("PYTHONUTF8", "1"),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .collect();

    Ok(LaunchSpec {
        program,
        args,
        cwd: Some(config.workspace()),
        env: env_vars,
    })
}

/// Look up `command` next to the interpreter, then on `PATH`.
fn find_command(command: &str, env: &EnvironmentDescriptor) -> Result<PathBuf> {
    let mut search_path: Vec<PathBuf> = env.executable.parent().map(PathBuf::from).into_iter().collect();
    if let Some(path) = std::env::var_os("PATH") {
        search_path.extend(std::env::split_paths(&path));
    }
    let joined = std::env::join_paths(&search_path)
        .map_err(|e| Error::ProcessLaunchFailure(format!("invalid search path: {}", e)))?;
    let cwd = std::env::current_dir()?;
    which::which_in(command, Some(joined), cwd).map_err(|e| {
        Error::ProcessLaunchFailure(format!("could not find '{}': {}", command, e))
    })
}

/// Starts the server as a child process.
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcessLauncher;

#[async_trait]
impl TransportLauncher for ProcessLauncher {
    async fn start(&self, spec: &LaunchSpec) -> std::result::Result<Box<dyn ServerTransport>, TransportError> {
        Ok(Box::new(ProcessTransport::spawn(spec)?))
    }
}

/// Framed JSON-RPC over a child's stdin and stdout.
pub struct ProcessTransport {
    child: Child,
    stdin: Option<ChildStdin>,
    stdout: BufReader<ChildStdout>,
}

fn missing_pipe(name: &str) -> TransportError {
    TransportError::Io(std::io::Error::new(
        std::io::ErrorKind::BrokenPipe,
        format!("server {} is not piped", name),
    ))
}

impl ProcessTransport {
    /// Spawn the process described by `spec`.
    pub fn spawn(spec: &LaunchSpec) -> std::result::Result<Self, TransportError> {
        log::info!("Starting language server: {}", spec.command_line());

        let mut command = Command::new(&spec.program);
        command
            .args(&spec.args)
            .envs(&spec.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(cwd) = &spec.cwd {
            command.current_dir(cwd);
        }

        let mut child = command.spawn()?;
        let stdin = child.stdin.take().ok_or_else(|| missing_pipe("stdin"))?;
        let stdout = child.stdout.take().ok_or_else(|| missing_pipe("stdout"))?;
        let stderr = child.stderr.take().ok_or_else(|| missing_pipe("stderr"))?;

        tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                log::warn!("[server] {}", line);
            }
        });

        if let Some(pid) = child.id() {
            log::debug!("Language server running with pid {}", pid);
        }

        Ok(Self {
            child,
            stdin: Some(stdin),
            stdout: BufReader::new(stdout),
        })
    }
}

#[async_trait]
impl ServerTransport for ProcessTransport {
    async fn send(&mut self, message: Value) -> std::result::Result<(), TransportError> {
        let stdin = self.stdin.as_mut().ok_or(TransportError::Closed)?;
        write_message(stdin, &message).await
    }

    async fn receive(&mut self) -> std::result::Result<Option<Value>, TransportError> {
        read_message(&mut self.stdout).await
    }

    async fn stop(&mut self, timeout: Option<Duration>) -> std::result::Result<(), TransportError> {
        // Closing stdin tells a well-behaved server to exit
        drop(self.stdin.take());

        let status = match timeout {
            Some(timeout) => match tokio::time::timeout(timeout, self.child.wait()).await {
                Ok(status) => status?,
                Err(_) => {
                    log::warn!(
                        "Language server did not exit within {}ms, killing it",
                        timeout.as_millis()
                    );
                    self.child.kill().await?;
                    return Ok(());
                }
            },
            None => self.child.wait().await?,
        };
        log::debug!("Language server exited with {}", status);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::version::Version;
    use serde_json::json;

    fn descriptor(executable: &str) -> EnvironmentDescriptor {
        EnvironmentDescriptor {
            path: PathBuf::from("/envs/robot"),
            version: Version::new(3, 12, 0),
            executable: PathBuf::from(executable),
        }
    }

    #[test]
    fn test_interpreter_mode_spec() {
        let mut config = SupervisorConfig::default();
        config.server.install_root = Some(PathBuf::from("/ext"));
        config.server.args = vec!["--log".to_string()];
        config.client.workspace = Some(PathBuf::from("/ws"));

        let spec = build_launch_spec(&config, &descriptor("/envs/robot/bin/python")).unwrap();
        assert_eq!(spec.program, PathBuf::from("/envs/robot/bin/python"));
        assert_eq!(spec.args, vec!["/ext/bundled/tool/lsp_server.py", "--log"]);
        assert_eq!(spec.cwd, Some(PathBuf::from("/ws")));
        assert_eq!(spec.env.get(IMPORT_STRATEGY_ENV).map(String::as_str), Some("useBundled"));
        assert_eq!(spec.env.get(SHOW_NOTIFICATION_ENV).map(String::as_str), Some("off"));
        assert_eq!(spec.env.get("PYTHONUTF8").map(String::as_str), Some("1"));
    }

    #[cfg(unix)]
    #[test]
    fn test_command_mode_prefers_interpreter_directory() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let bin = dir.path().join("bin");
        std::fs::create_dir_all(&bin).unwrap();
        let script = bin.join("dsd-language-server");
        std::fs::write(&script, "#!/bin/sh\n").unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();

        let mut config = SupervisorConfig::default();
        config.server.mode = ServerMode::Command;
        let python = bin.join("python");
        let spec = build_launch_spec(&config, &descriptor(&python.display().to_string())).unwrap();
        assert_eq!(spec.program, script);
        assert!(spec.args.is_empty());
    }

    #[test]
    fn test_command_mode_missing_command() {
        let mut config = SupervisorConfig::default();
        config.server.mode = ServerMode::Command;
        config.server.command = "dsd-no-such-server-binary".to_string();
        let err = build_launch_spec(&config, &descriptor("/nonexistent/bin/python")).unwrap_err();
        assert!(matches!(err, Error::ProcessLaunchFailure(_)));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_process_transport_round_trip() {
        // cat echoes every frame back
        let spec = LaunchSpec {
            program: PathBuf::from("cat"),
            ..Default::default()
        };
        let mut transport = ProcessLauncher.start(&spec).await.unwrap();
        let message = json!({"jsonrpc": "2.0", "id": 1, "method": "initialize"});
        transport.send(message.clone()).await.unwrap();
        assert_eq!(transport.receive().await.unwrap(), Some(message));

        transport.stop(Some(Duration::from_secs(5))).await.unwrap();
        assert!(matches!(
            transport.send(json!({})).await,
            Err(TransportError::Closed)
        ));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_stop_kills_after_timeout() {
        let spec = LaunchSpec {
            program: PathBuf::from("sleep"),
            args: vec!["30".to_string()],
            ..Default::default()
        };
        let mut transport = ProcessTransport::spawn(&spec).unwrap();
        let started = std::time::Instant::now();
        transport.stop(Some(Duration::from_millis(100))).await.unwrap();
        assert!(started.elapsed() < Duration::from_secs(10));
        assert!(transport.child.try_wait().unwrap().is_some());
    }
}
