//! Host event lines read by `dsd supervise`.
//!
//! ```text
//! restart                 restart the server
//! env [PATH]              select an interpreter (none: discover again)
//! config [SECTION ...]    reload the configuration file
//! open PATH               a document was opened
//! save PATH               a document was saved
//! exec [COMMAND]          run a server command
//! quit                    stop the server and exit
//! ```

use std::path::PathBuf;

use dsd_supervisor::{HostEvent, SETTINGS_NAMESPACE};

/// One parsed input line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostCommand {
    Event(HostEvent),
    Quit,
}

/// Parse one input line. Blank lines and `#` comments yield `Ok(None)`.
pub fn parse_line(line: &str) -> Result<Option<HostCommand>, String> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return Ok(None);
    }
    let (word, rest) = match line.split_once(char::is_whitespace) {
        Some((word, rest)) => (word, rest.trim()),
        None => (line, ""),
    };
    let path_arg = |what: &str| {
        if rest.is_empty() {
            Err(format!("'{}' needs a path", what))
        } else {
            Ok(PathBuf::from(rest))
        }
    };

    let event = match word {
        "restart" => HostEvent::RestartCommand,
        "env" => HostEvent::EnvironmentChanged {
            path: (!rest.is_empty()).then(|| PathBuf::from(rest)),
        },
        "config" => {
            let mut sections: Vec<String> = rest.split_whitespace().map(str::to_string).collect();
            if sections.is_empty() {
                sections.push(SETTINGS_NAMESPACE.to_string());
            }
            HostEvent::ConfigurationChanged { sections }
        }
        "open" => HostEvent::DocumentOpened {
            path: path_arg("open")?,
        },
        "save" => HostEvent::DocumentSaved {
            path: path_arg("save")?,
        },
        "exec" => HostEvent::ExecuteCommand {
            command: (!rest.is_empty()).then(|| rest.to_string()),
        },
        "quit" | "exit" => return Ok(Some(HostCommand::Quit)),
        other => return Err(format!("unknown command '{}'", other)),
    };
    Ok(Some(HostCommand::Event(event)))
}
