use std::collections::BTreeSet;

use wallet_plugins_sdk::{Permission, PluginManifest};

use crate::error::{PluginError, Result};

/// Permissions one plugin was granted through its manifest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PermissionGate {
    plugin: String,
    granted: BTreeSet<Permission>,
}

impl PermissionGate {
    pub fn new(plugin: impl Into<String>, granted: impl IntoIterator<Item = Permission>) -> Self {
        Self {
            plugin: plugin.into(),
            granted: granted.into_iter().collect(),
        }
    }

    pub fn for_manifest(manifest: &PluginManifest) -> Self {
        Self::new(manifest.id(), manifest.permissions().iter().copied())
    }

    pub fn plugin(&self) -> &str {
        &self.plugin
    }

    pub fn allows(&self, permission: Permission) -> bool {
        self.granted.contains(&permission)
    }

    pub fn authorize(&self, permission: Permission) -> Result<()> {
        if self.allows(permission) {
            return Ok(());
        }
        tracing::warn!(plugin = %self.plugin, %permission, "capability denied");
        metrics::counter!(
            "wallet_plugins_permission_denied_total",
            "permission" => permission.as_str()
        )
        .increment(1);
        Err(PluginError::PermissionDenied {
            plugin: self.plugin.clone(),
            permission,
        })
    }

    pub fn granted(&self) -> impl Iterator<Item = Permission> + '_ {
        self.granted.iter().copied()
    }
}
