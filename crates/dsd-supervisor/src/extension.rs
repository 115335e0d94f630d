//! Activation and deactivation of the supervisor.
//!
//! [`Extension::activate`] wires host events to the supervisor and
//! starts the server. [`Extension::deactivate`] releases all
//! subscriptions, cancels restarts still in flight, then stops the server.

use std::future::Future;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::task::JoinSet;

use crate::events::{Disposables, EventBus};
use crate::supervisor::{CommandPicker, Supervisor};
use crate::triggers::{restart_reason, HostEvent, TriggerContext};

/// Picks a command given by name, if the server advertises it.
struct NamedCommand(String);

#[async_trait]
impl CommandPicker for NamedCommand {
    async fn pick(&self, commands: &[String]) -> Option<String> {
        if commands.contains(&self.0) {
            Some(self.0.clone())
        } else {
            log::warn!(
                "The language server does not provide '{}' (available: {})",
                self.0,
                commands.join(", ")
            );
            None
        }
    }
}

/// Restart and command tasks started by [`dispatch`].
#[derive(Default)]
struct Tasks {
    closed: bool,
    set: JoinSet<()>,
}

impl Tasks {
    fn spawn(&mut self, task: impl Future<Output = ()> + Send + 'static) {
        if self.closed {
            log::debug!("Deactivated, not starting another task");
            return;
        }
        // Reap finished tasks
        while self.set.try_join_next().is_some() {}
        self.set.spawn(task);
    }
}

type SharedTasks = Arc<Mutex<Tasks>>;

/// The activated supervisor with its event subscriptions.
pub struct Extension {
    supervisor: Arc<Supervisor>,
    disposables: Disposables,
    tasks: SharedTasks,
}

impl Extension {
    /// Subscribe to `bus` and start the server.
    ///
    /// A failed initial start is logged; later triggers may still start it.
    pub async fn activate(
        supervisor: Arc<Supervisor>,
        bus: &EventBus,
        picker: Arc<dyn CommandPicker>,
    ) -> Self {
        let mut disposables = Disposables::new();
        let tasks = SharedTasks::default();
        let handler_supervisor = supervisor.clone();
        let handler_tasks = tasks.clone();
        disposables.push(bus.subscribe(move |event| {
            let supervisor = handler_supervisor.clone();
            let picker = picker.clone();
            let tasks = handler_tasks.clone();
            async move { dispatch(supervisor, picker, &tasks, event) }
        }));

        if let Err(e) = supervisor.start().await {
            log::error!("Initial language server start failed: {}", e);
        }

        Self {
            supervisor,
            disposables,
            tasks,
        }
    }

    pub fn supervisor(&self) -> &Arc<Supervisor> {
        &self.supervisor
    }

    /// Release all subscriptions, cancel pending restarts and commands,
    /// then stop the server.
    pub async fn deactivate(mut self) {
        self.disposables.dispose_all();
        let mut pending = {
            let mut tasks = self.tasks.lock().unwrap_or_else(|e| e.into_inner());
            tasks.closed = true;
            std::mem::take(&mut tasks.set)
        };
        pending.abort_all();
        while pending.join_next().await.is_some() {}

        if let Err(e) = self.supervisor.stop().await {
            log::warn!("Language server did not stop cleanly: {}", e);
        }
    }
}

/// Route one event. Restarts and commands run as their own tasks.
fn dispatch(
    supervisor: Arc<Supervisor>,
    picker: Arc<dyn CommandPicker>,
    tasks: &Mutex<Tasks>,
    event: HostEvent,
) {
    let mut tasks = tasks.lock().unwrap_or_else(|e| e.into_inner());
    if let HostEvent::ExecuteCommand { command } = event {
        tasks.spawn(async move {
            let result = match command {
                Some(name) => supervisor.execute_server_command(&NamedCommand(name)).await,
                None => supervisor.execute_server_command(picker.as_ref()).await,
            };
            match result {
                Ok(Some(value)) => log::info!("Command result: {}", value),
                Ok(None) => log::debug!("No command executed"),
                Err(e) => log::error!("Command failed: {}", e),
            }
        });
        return;
    }

    let config = supervisor.config();
    if let HostEvent::DocumentOpened { path } = &event {
        if !config.client.selects(path) {
            log::debug!("{} is not a DSD document", path.display());
            return;
        }
    }
    let entry_point = config.entry_point_path();
    let ctx = TriggerContext {
        has_connection: supervisor.is_running(),
        entry_point: &entry_point,
    };
    let Some(reason) = restart_reason(&event, &ctx) else {
        log::debug!("Ignoring {:?}", event);
        return;
    };

    log::info!("Restarting language server: {}", reason);
    tasks.spawn(async move {
        if let Err(e) = supervisor.restart().await {
            log::error!("Restart failed: {}", e);
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::supervisor::tests::{fixture, Behavior, Fixture};
    use crate::supervisor::ConnectionState;
    use crate::version::Version;
    use std::path::PathBuf;
    use std::sync::atomic::Ordering;
    use std::time::Duration;

    struct NoPick;

    #[async_trait]
    impl CommandPicker for NoPick {
        async fn pick(&self, _commands: &[String]) -> Option<String> {
            None
        }
    }

    const MINIMUM: Version = Version::new(3, 10, 0);

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    fn launches(f: &Fixture) -> usize {
        f.launcher.recorder.launches.load(Ordering::SeqCst)
    }

    #[tokio::test]
    async fn test_activate_starts_server() {
        let f = fixture("3.12.0", Behavior::Normal, MINIMUM);
        let bus = EventBus::default();
        let extension = Extension::activate(f.supervisor.clone(), &bus, Arc::new(NoPick)).await;
        assert_eq!(extension.supervisor().state(), ConnectionState::Running);
        assert_eq!(launches(&f), 1);
    }

    #[tokio::test]
    async fn test_saving_entry_point_restarts_once() {
        let f = fixture("3.12.0", Behavior::Normal, MINIMUM);
        let bus = EventBus::default();
        let _extension = Extension::activate(f.supervisor.clone(), &bus, Arc::new(NoPick)).await;

        bus.publish(HostEvent::DocumentSaved {
            path: PathBuf::from("/ws/behavior/main.dsd"),
        });
        settle().await;
        assert_eq!(launches(&f), 1);

        bus.publish(HostEvent::DocumentSaved {
            path: f.supervisor.config().entry_point_path(),
        });
        settle().await;
        assert_eq!(launches(&f), 2);
        assert_eq!(f.launcher.recorder.active.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_burst_of_triggers_never_overlaps() {
        let f = fixture("3.12.0", Behavior::Normal, MINIMUM);
        let bus = EventBus::default();
        let _extension = Extension::activate(f.supervisor.clone(), &bus, Arc::new(NoPick)).await;

        for _ in 0..5 {
            bus.publish(HostEvent::RestartCommand);
        }
        settle().await;
        assert!(launches(&f) >= 2);
        assert_eq!(f.launcher.recorder.active.load(Ordering::SeqCst), 1);
        assert_eq!(f.supervisor.state(), ConnectionState::Running);
    }

    #[tokio::test]
    async fn test_document_open_starts_stopped_server() {
        let f = fixture("3.12.0", Behavior::Normal, MINIMUM);
        let bus = EventBus::default();
        let _extension = Extension::activate(f.supervisor.clone(), &bus, Arc::new(NoPick)).await;
        f.supervisor.stop().await.unwrap();

        bus.publish(HostEvent::DocumentOpened {
            path: PathBuf::from("/ws/actions/kick.py"),
        });
        settle().await;
        assert_eq!(launches(&f), 1);

        bus.publish(HostEvent::DocumentOpened {
            path: PathBuf::from("/ws/main.dsd"),
        });
        settle().await;
        assert_eq!(launches(&f), 2);

        // Already running, so a second open does nothing
        bus.publish(HostEvent::DocumentOpened {
            path: PathBuf::from("/ws/other.dsd"),
        });
        settle().await;
        assert_eq!(launches(&f), 2);
    }

    #[tokio::test]
    async fn test_execute_named_command() {
        let f = fixture("3.12.0", Behavior::Normal, MINIMUM);
        let bus = EventBus::default();
        let _extension = Extension::activate(f.supervisor.clone(), &bus, Arc::new(NoPick)).await;

        bus.publish(HostEvent::ExecuteCommand {
            command: Some("dsd.listActions".to_string()),
        });
        settle().await;
        let sent = f.launcher.recorder.sent.lock().unwrap().clone();
        let last = sent.last().unwrap();
        assert_eq!(last["method"], "workspace/executeCommand");
        assert_eq!(last["params"]["command"], "dsd.listActions");
        assert_eq!(launches(&f), 1);
    }

    #[tokio::test]
    async fn test_deactivate_stops_and_unsubscribes() {
        let f = fixture("3.12.0", Behavior::Normal, MINIMUM);
        let bus = EventBus::default();
        let extension = Extension::activate(f.supervisor.clone(), &bus, Arc::new(NoPick)).await;
        extension.deactivate().await;
        assert_eq!(f.supervisor.state(), ConnectionState::Stopped);

        bus.publish(HostEvent::RestartCommand);
        settle().await;
        assert_eq!(launches(&f), 1);
        assert_eq!(f.launcher.recorder.active.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_deactivate_cancels_restart_in_flight() {
        let f = fixture("3.12.0", Behavior::Normal, MINIMUM);
        let bus = EventBus::default();
        let extension = Extension::activate(f.supervisor.clone(), &bus, Arc::new(NoPick)).await;

        bus.publish(HostEvent::RestartCommand);
        for _ in 0..3 {
            tokio::task::yield_now().await;
        }
        extension.deactivate().await;
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert_eq!(f.supervisor.state(), ConnectionState::Stopped);
        assert_eq!(f.launcher.recorder.active.load(Ordering::SeqCst), 0);
        assert!(!f.supervisor.is_starting());
    }
}
