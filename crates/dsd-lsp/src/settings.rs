//! Client settings passed through `initializationOptions`.
//!
//! The editor sends one settings block per workspace folder plus a set of
//! global defaults:
//!
//! ```json
//! {
//!   "settings": [{ "workspace": "file:///ws", "showNotifications": "onError" }],
//!   "globalSettings": { "importStrategy": "useBundled" }
//! }
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tower_lsp::lsp_types::Url;

/// Environment variable that overrides the notification policy.
pub const SHOW_NOTIFICATION_ENV: &str = "LS_SHOW_NOTIFICATION";

/// When log messages are also shown to the user as notifications.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ShowNotifications {
    #[default]
    Off,
    OnError,
    OnWarning,
    Always,
}

impl ShowNotifications {
    /// Parse the `LS_SHOW_NOTIFICATION` spelling of the policy.
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "off" => Some(Self::Off),
            "onError" => Some(Self::OnError),
            "onWarning" => Some(Self::OnWarning),
            "always" => Some(Self::Always),
            _ => None,
        }
    }

    /// Read the policy from the environment, defaulting to `Off`.
    pub fn from_env() -> Self {
        std::env::var(SHOW_NOTIFICATION_ENV)
            .ok()
            .and_then(|v| Self::parse(&v))
            .unwrap_or_default()
    }

    /// Should errors be shown?
    pub fn shows_errors(self) -> bool {
        self != Self::Off
    }

    /// Should warnings be shown?
    pub fn shows_warnings(self) -> bool {
        matches!(self, Self::OnWarning | Self::Always)
    }

    /// Should informational messages be shown?
    pub fn shows_info(self) -> bool {
        self == Self::Always
    }
}

/// Settings shared by all workspaces unless overridden.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GlobalSettings {
    pub path: Vec<String>,
    pub interpreter: Vec<String>,
    pub args: Vec<String>,
    pub import_strategy: Option<String>,
    pub show_notifications: Option<ShowNotifications>,
}

/// Settings for one workspace folder.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct WorkspaceSettings {
    /// Workspace folder URI.
    pub workspace: Option<Url>,
    pub path: Vec<String>,
    pub interpreter: Vec<String>,
    pub args: Vec<String>,
    pub import_strategy: Option<String>,
    pub show_notifications: Option<ShowNotifications>,
}

/// The `initializationOptions` payload.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct InitializationOptions {
    pub settings: Vec<WorkspaceSettings>,
    pub global_settings: GlobalSettings,
}

impl InitializationOptions {
    /// Parse the options, treating anything malformed as empty.
    pub fn from_value(value: Option<serde_json::Value>) -> Self {
        match value {
            Some(value) => serde_json::from_value(value).unwrap_or_else(|e| {
                log::warn!("Ignoring malformed initializationOptions: {}", e);
                Self::default()
            }),
            None => Self::default(),
        }
    }
}

/// Resolved settings for every workspace folder, keyed by folder path.
#[derive(Debug, Clone, Default)]
pub struct SettingsRegistry {
    workspaces: BTreeMap<PathBuf, WorkspaceSettings>,
    global: GlobalSettings,
}

impl SettingsRegistry {
    /// Build the registry.
    ///
    /// Without any workspace settings a single entry for `fallback_root`
    /// (the server's working directory) is created from the global defaults.
    pub fn new(options: InitializationOptions, fallback_root: &Path) -> Self {
        let mut workspaces = BTreeMap::new();
        for settings in options.settings {
            let Some(path) = settings.workspace.as_ref().and_then(|u| u.to_file_path().ok()) else {
                log::warn!("Ignoring settings without a file workspace: {:?}", settings.workspace);
                continue;
            };
            workspaces.insert(path, settings);
        }
        if workspaces.is_empty() {
            let global = &options.global_settings;
            workspaces.insert(
                fallback_root.to_path_buf(),
                WorkspaceSettings {
                    workspace: Url::from_file_path(fallback_root).ok(),
                    path: global.path.clone(),
                    interpreter: global.interpreter.clone(),
                    args: global.args.clone(),
                    import_strategy: global.import_strategy.clone(),
                    show_notifications: global.show_notifications,
                },
            );
        }
        Self {
            workspaces,
            global: options.global_settings,
        }
    }

    /// All workspace folder paths.
    pub fn roots(&self) -> Vec<PathBuf> {
        self.workspaces.keys().cloned().collect()
    }

    /// Global settings.
    pub fn global(&self) -> &GlobalSettings {
        &self.global
    }

    /// Settings for the workspace containing `path`.
    ///
    /// Walks up the ancestors of `path`; files outside every workspace get
    /// the first workspace's settings.
    pub fn for_path(&self, path: &Path) -> Option<&WorkspaceSettings> {
        path.ancestors()
            .find_map(|ancestor| self.workspaces.get(ancestor))
            .or_else(|| self.workspaces.values().next())
    }

    /// The notification policy, preferring explicit settings over the
    /// `LS_SHOW_NOTIFICATION` environment variable.
    pub fn show_notifications(&self) -> ShowNotifications {
        self.global
            .show_notifications
            .unwrap_or_else(ShowNotifications::from_env)
    }
}
