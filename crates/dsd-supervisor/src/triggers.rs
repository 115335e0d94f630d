//! Which host events restart the language server.

use std::fmt;
use std::path::{Path, PathBuf};

use crate::config::SETTINGS_NAMESPACE;

/// Something that happened in the host editor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostEvent {
    /// The user asked for a restart
    RestartCommand,
    /// The active Python environment changed
    EnvironmentChanged { path: Option<PathBuf> },
    /// Configuration sections changed
    ConfigurationChanged { sections: Vec<String> },
    DocumentOpened { path: PathBuf },
    DocumentSaved { path: PathBuf },
    /// The user wants to run one of the server's commands
    ExecuteCommand { command: Option<String> },
}

/// Why a restart was triggered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RestartReason {
    UserCommand,
    EnvironmentChanged,
    ConfigurationChanged(String),
    DocumentOpened,
    ServerSourceSaved,
}

impl fmt::Display for RestartReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RestartReason::UserCommand => write!(f, "restart requested"),
            RestartReason::EnvironmentChanged => write!(f, "Python environment changed"),
            RestartReason::ConfigurationChanged(section) => {
                write!(f, "configuration '{}' changed", section)
            }
            RestartReason::DocumentOpened => write!(f, "document opened without a server"),
            RestartReason::ServerSourceSaved => write!(f, "server source saved"),
        }
    }
}

/// Supervisor state the routing depends on.
#[derive(Debug, Clone, Copy)]
pub struct TriggerContext<'a> {
    pub has_connection: bool,
    /// Entry point of the language server sources
    pub entry_point: &'a Path,
}

/// Decide whether `event` should restart the server.
pub fn restart_reason(event: &HostEvent, ctx: &TriggerContext<'_>) -> Option<RestartReason> {
    match event {
        HostEvent::RestartCommand => Some(RestartReason::UserCommand),
        HostEvent::EnvironmentChanged { .. } => Some(RestartReason::EnvironmentChanged),
        HostEvent::ConfigurationChanged { sections } => sections
            .iter()
            .find(|s| affects_namespace(s))
            .map(|s| RestartReason::ConfigurationChanged(s.clone())),
        HostEvent::DocumentOpened { .. } => {
            (!ctx.has_connection).then_some(RestartReason::DocumentOpened)
        }
        HostEvent::DocumentSaved { path } => {
            same_file(path, ctx.entry_point).then_some(RestartReason::ServerSourceSaved)
        }
        HostEvent::ExecuteCommand { .. } => None,
    }
}

fn affects_namespace(section: &str) -> bool {
    section == SETTINGS_NAMESPACE
        || section
            .strip_prefix(SETTINGS_NAMESPACE)
            .is_some_and(|rest| rest.starts_with('.'))
}

/// Compare resolved paths, falling back to the paths as given.
fn same_file(a: &Path, b: &Path) -> bool {
    match (a.canonicalize(), b.canonicalize()) {
        (Ok(a), Ok(b)) => a == b,
        _ => a == b,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx(has_connection: bool, entry_point: &Path) -> TriggerContext<'_> {
        TriggerContext {
            has_connection,
            entry_point,
        }
    }

    #[test]
    fn test_commands_and_environment_always_restart() {
        let entry = Path::new("/ext/lsp_server.py");
        for has_connection in [true, false] {
            let c = ctx(has_connection, entry);
            assert_eq!(
                restart_reason(&HostEvent::RestartCommand, &c),
                Some(RestartReason::UserCommand)
            );
            assert_eq!(
                restart_reason(&HostEvent::EnvironmentChanged { path: None }, &c),
                Some(RestartReason::EnvironmentChanged)
            );
        }
    }

    #[test]
    fn test_configuration_sections() {
        let entry = Path::new("/ext/lsp_server.py");
        let c = ctx(true, entry);
        let changed = |sections: &[&str]| {
            restart_reason(
                &HostEvent::ConfigurationChanged {
                    sections: sections.iter().map(|s| s.to_string()).collect(),
                },
                &c,
            )
        };
        assert_eq!(
            changed(&["dsd"]),
            Some(RestartReason::ConfigurationChanged("dsd".to_string()))
        );
        assert_eq!(
            changed(&["editor.fontSize", "dsd.trace.server"]),
            Some(RestartReason::ConfigurationChanged("dsd.trace.server".to_string()))
        );
        assert_eq!(changed(&["dsdx"]), None);
        assert_eq!(changed(&["python.defaultInterpreterPath"]), None);
        assert_eq!(changed(&[]), None);
    }

    #[test]
    fn test_document_open_only_without_connection() {
        let entry = Path::new("/ext/lsp_server.py");
        let event = HostEvent::DocumentOpened {
            path: PathBuf::from("/ws/main.dsd"),
        };
        assert_eq!(
            restart_reason(&event, &ctx(false, entry)),
            Some(RestartReason::DocumentOpened)
        );
        assert_eq!(restart_reason(&event, &ctx(true, entry)), None);
    }

    #[test]
    fn test_saving_server_source() {
        let dir = tempfile::tempdir().unwrap();
        let tool = dir.path().join("bundled").join("tool");
        std::fs::create_dir_all(&tool).unwrap();
        let entry = tool.join("lsp_server.py");
        std::fs::write(&entry, "").unwrap();
        let other = tool.join("helpers.py");
        std::fs::write(&other, "").unwrap();

        // A non-normalized spelling of the same file still matches
        let spelled = dir.path().join("bundled/tool/../tool/lsp_server.py");
        let c = ctx(true, &entry);
        assert_eq!(
            restart_reason(&HostEvent::DocumentSaved { path: spelled }, &c),
            Some(RestartReason::ServerSourceSaved)
        );
        assert_eq!(restart_reason(&HostEvent::DocumentSaved { path: other }, &c), None);
    }

    #[test]
    fn test_saving_unresolvable_paths_compares_lexically() {
        let entry = Path::new("/nonexistent/ext/lsp_server.py");
        let c = ctx(true, entry);
        let save = |path: &str| HostEvent::DocumentSaved {
            path: PathBuf::from(path),
        };
        assert_eq!(
            restart_reason(&save("/nonexistent/ext/lsp_server.py"), &c),
            Some(RestartReason::ServerSourceSaved)
        );
        assert_eq!(restart_reason(&save("/nonexistent/ext/other.py"), &c), None);
    }

    #[test]
    fn test_execute_command_never_restarts() {
        let entry = Path::new("/ext/lsp_server.py");
        let event = HostEvent::ExecuteCommand { command: None };
        assert_eq!(restart_reason(&event, &ctx(false, entry)), None);
    }
}
