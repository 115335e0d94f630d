//! Python environment discovery.
//!
//! The [`EnvironmentProvider`] trait is the observable contract the
//! supervisor needs: which environment is active, what it resolves to,
//! and a hook to ask the user for another one. [`resolve_environment`]
//! holds the acceptance policy.

use std::path::{Path, PathBuf};
use std::sync::RwLock;

use async_trait::async_trait;
use tokio::process::Command;

use crate::error::{Error, Result};
use crate::version::Version;

/// Prints the interpreter version and executable, one per line.
const VERSION_SCRIPT: &str =
    "import sys; print('.'.join(str(v) for v in sys.version_info[:3])); print(sys.executable)";

/// What a provider knows about an environment.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolvedEnvironment {
    /// `major.minor.patch`, if the environment reported one
    pub version: Option<String>,
    /// Interpreter executable, if known
    pub executable: Option<PathBuf>,
}

/// An environment accepted for launching the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvironmentDescriptor {
    pub path: PathBuf,
    pub version: Version,
    /// Absolute path of the interpreter
    pub executable: PathBuf,
}

/// Source of Python environments.
#[async_trait]
pub trait EnvironmentProvider: Send + Sync {
    /// Path of the currently selected environment.
    async fn active_environment_path(&self) -> Option<PathBuf>;

    /// Resolve an environment path to its version and executable.
    async fn resolve(&self, path: &Path) -> Option<ResolvedEnvironment>;

    /// Called after the user agreed to pick another environment.
    ///
    /// What happens is up to the host: an editor would open its
    /// interpreter picker, a console host can only explain how to switch.
    async fn request_environment_change(&self);
}

/// Resolve the active environment and check it against `minimum`.
///
/// Nothing is cached; every call queries the provider again.
pub async fn resolve_environment(
    provider: &dyn EnvironmentProvider,
    minimum: &Version,
) -> Result<EnvironmentDescriptor> {
    let path = provider
        .active_environment_path()
        .await
        .ok_or(Error::EnvironmentUnresolved(None))?;

    let resolved = provider
        .resolve(&path)
        .await
        .ok_or_else(|| Error::EnvironmentUnresolved(Some(path.clone())))?;

    let raw_version = resolved
        .version
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| Error::VersionUnavailable(path.clone()))?;

    let version: Version = raw_version
        .parse()
        .map_err(|_| Error::VersionUnparsable(raw_version.clone()))?;

    if !version.satisfies(minimum) {
        return Err(Error::VersionTooLow {
            found: version,
            required: *minimum,
        });
    }

    let executable = resolved
        .executable
        .ok_or_else(|| Error::ExecutableUnresolved(path.clone()))?;
    let executable = absolute(executable)?;

    log::info!(
        "Using Python {} at {}",
        version,
        executable.display()
    );

    Ok(EnvironmentDescriptor {
        path,
        version,
        executable,
    })
}

fn absolute(path: PathBuf) -> Result<PathBuf> {
    if path.is_absolute() {
        Ok(path)
    } else {
        Ok(std::env::current_dir()?.join(path))
    }
}

/// Discovers Python interpreters on this machine.
///
/// The active environment is the explicit selection if there is one,
/// otherwise `python3` or `python` on `PATH`.
#[derive(Debug, Default)]
pub struct PythonEnvironmentProvider {
    selected: RwLock<Option<PathBuf>>,
}

impl PythonEnvironmentProvider {
    pub fn new(selected: Option<PathBuf>) -> Self {
        Self {
            selected: RwLock::new(selected),
        }
    }

    /// Select an environment, or go back to discovery with `None`.
    pub fn set_active(&self, path: Option<PathBuf>) {
        *self.selected.write().unwrap_or_else(|e| e.into_inner()) = path;
    }

    fn selected(&self) -> Option<PathBuf> {
        self.selected.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Interpreter inside a virtual environment directory, or the path itself.
    pub fn interpreter_for(path: &Path) -> PathBuf {
        if !path.is_dir() {
            return path.to_path_buf();
        }
        ["bin/python3", "bin/python", "Scripts/python.exe"]
            .iter()
            .map(|candidate| path.join(candidate))
            .find(|candidate| candidate.is_file())
            .unwrap_or_else(|| path.join("bin/python"))
    }
}

#[async_trait]
impl EnvironmentProvider for PythonEnvironmentProvider {
    async fn active_environment_path(&self) -> Option<PathBuf> {
        if let Some(path) = self.selected() {
            return Some(path);
        }
        which::which("python3").or_else(|_| which::which("python")).ok()
    }

    async fn resolve(&self, path: &Path) -> Option<ResolvedEnvironment> {
        let interpreter = Self::interpreter_for(path);
        let output = match Command::new(&interpreter)
            .arg("-c")
            .arg(VERSION_SCRIPT)
            .kill_on_drop(true)
            .output()
            .await
        {
            Ok(output) => output,
            Err(e) => {
                log::warn!("Could not run {}: {}", interpreter.display(), e);
                return None;
            }
        };
        if !output.status.success() {
            log::warn!(
                "{} exited with {} while reporting its version",
                interpreter.display(),
                output.status
            );
            return None;
        }
        Some(parse_version_output(&String::from_utf8_lossy(&output.stdout)))
    }

    /// Logs how to select another interpreter. The current selection is
    /// left unchanged; it only moves with [`PythonEnvironmentProvider::set_active`].
    async fn request_environment_change(&self) {
        log::warn!(
            "Select a different Python environment with `env <path>` or set \
             `environment.python` in the configuration file"
        );
    }
}

fn parse_version_output(stdout: &str) -> ResolvedEnvironment {
    let mut lines = stdout.lines().map(str::trim);
    let version = lines.next().filter(|l| !l.is_empty()).map(str::to_string);
    let executable = lines.next().filter(|l| !l.is_empty()).map(PathBuf::from);
    ResolvedEnvironment {
        version,
        executable,
    }
}
