use std::path::PathBuf;

use wallet_plugins_sdk::{ManifestError, Permission};

pub type Result<T, E = PluginError> = std::result::Result<T, E>;

/// Failures the host reports to plugins and to its own callers.
#[derive(Debug, thiserror::Error)]
pub enum PluginError {
    #[error("plugin `{plugin}` is missing the {permission} permission")]
    PermissionDenied {
        plugin: String,
        permission: Permission,
    },

    #[error("the user cancelled the dialog")]
    Cancelled,

    #[error("plugin `{0}` is disabled for this profile")]
    PluginDisabled(String),

    #[error("plugin `{0}` asked for an interval with a zero period")]
    ZeroInterval(String),

    #[error("`{}` is not inside the plugins root `{}`", path.display(), root.display())]
    PathOutsideRoot { path: PathBuf, root: PathBuf },

    #[error(transparent)]
    Manifest(#[from] ManifestError),

    #[error("a service for the {0} permission is already registered")]
    DuplicateService(Permission),

    #[error("plugin `{0}` is already registered")]
    DuplicatePlugin(String),

    #[error("plugin services have already been booted")]
    ServicesAlreadyBooted,

    #[error("plugin services must be booted before plugins run")]
    ServicesNotBooted,

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Plugin(#[from] anyhow::Error),
}

impl PluginError {
    pub fn is_permission_denied(&self) -> bool {
        matches!(self, PluginError::PermissionDenied { .. })
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, PluginError::Cancelled)
    }
}
