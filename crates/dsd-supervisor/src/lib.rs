//! Lifecycle supervisor for the DSD language server.
//!
//! The supervisor keeps exactly one language server process alive and
//! restarts it when its operating conditions change:
//!
//! - [`environment`] finds a Python interpreter and checks its version
//! - [`process`] launches the server and speaks framed JSON-RPC with it
//! - [`supervisor`] owns the connection and guards against overlapping starts
//! - [`triggers`] decides which host events cause a restart
//! - [`events`] and [`extension`] wire host events to the supervisor
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use dsd_supervisor::{EventBus, Extension, ProcessLauncher, PythonEnvironmentProvider, Supervisor};
//!
//! let supervisor = Arc::new(Supervisor::new(config, provider, Arc::new(ProcessLauncher), notifier));
//! let bus = EventBus::default();
//! let extension = Extension::activate(supervisor, &bus, picker).await;
//! bus.publish(HostEvent::RestartCommand);
//! extension.deactivate().await;
//! ```

pub mod codec;
pub mod config;
pub mod environment;
pub mod error;
pub mod events;
pub mod extension;
pub mod process;
pub mod supervisor;
pub mod transport;
pub mod triggers;
pub mod version;

pub use config::{ServerMode, SupervisorConfig, Trace, SETTINGS_NAMESPACE};
pub use environment::{
    resolve_environment, EnvironmentDescriptor, EnvironmentProvider, PythonEnvironmentProvider,
    ResolvedEnvironment,
};
pub use error::{Error, Result, TransportError};
pub use events::{Disposables, EventBus, Subscription};
pub use extension::Extension;
pub use process::{build_launch_spec, ProcessLauncher, ProcessTransport};
pub use supervisor::{
    CommandPicker, Connection, ConnectionState, Notifier, StartOutcome, Supervisor,
};
pub use transport::{LaunchSpec, ServerTransport, TransportLauncher};
pub use triggers::{restart_reason, HostEvent, RestartReason, TriggerContext};
pub use version::{Version, DEFAULT_MINIMUM_VERSION};
