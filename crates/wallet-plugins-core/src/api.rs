//! The capability object handed to a plugin's entry function.

use wallet_plugins_sdk::Permission;

use crate::{
    controller::TaskScope,
    error::{PluginError, Result},
    gate::PermissionGate,
    profile::Profile,
    services::{
        filesystem::FileSystemApi, profile::ProfileApi, store::StoreApi, timers::TimersApi,
        ServiceApi,
    },
};

/// What a service needs to know to build its part of a [`PluginApi`].
#[derive(Debug, Clone)]
pub struct ApiContext {
    pub plugin_id: String,
    pub profile: Profile,
    pub scope: TaskScope,
}

/// Capability object scoped to one plugin and one profile.
///
/// Each accessor returns `PermissionDenied` unless the plugin's manifest
/// declared the matching permission and a service for it was registered.
#[derive(Debug, Clone)]
pub struct PluginApi {
    gate: PermissionGate,
    filesystem: Option<FileSystemApi>,
    store: Option<StoreApi>,
    profile: Option<ProfileApi>,
    timers: Option<TimersApi>,
}

impl PluginApi {
    /// An API with no capabilities at all.
    pub fn empty(plugin_id: impl Into<String>) -> Self {
        PluginApiBuilder::new(PermissionGate::new(plugin_id, [])).build()
    }

    pub fn plugin_id(&self) -> &str {
        self.gate.plugin()
    }

    pub fn filesystem(&self) -> Result<&FileSystemApi> {
        self.slot(Permission::Filesystem, self.filesystem.as_ref())
    }

    pub fn store(&self) -> Result<&StoreApi> {
        self.slot(Permission::Store, self.store.as_ref())
    }

    pub fn profile(&self) -> Result<&ProfileApi> {
        self.slot(Permission::Profile, self.profile.as_ref())
    }

    pub fn timers(&self) -> Result<&TimersApi> {
        self.slot(Permission::Timers, self.timers.as_ref())
    }

    /// Permissions that are both declared and backed by a service.
    pub fn available(&self) -> Vec<Permission> {
        [
            (Permission::Filesystem, self.filesystem.is_some()),
            (Permission::Store, self.store.is_some()),
            (Permission::Profile, self.profile.is_some()),
            (Permission::Timers, self.timers.is_some()),
        ]
        .into_iter()
        .filter_map(|(permission, present)| present.then_some(permission))
        .collect()
    }

    fn slot<'a, T>(&self, permission: Permission, slot: Option<&'a T>) -> Result<&'a T> {
        self.gate.authorize(permission)?;
        // Declared but no service registered for it: still closed.
        slot.ok_or_else(|| PluginError::PermissionDenied {
            plugin: self.gate.plugin().to_string(),
            permission,
        })
    }
}

/// Assembles a [`PluginApi`], accepting only capabilities the gate allows.
#[derive(Debug)]
pub struct PluginApiBuilder {
    api: PluginApi,
}

impl PluginApiBuilder {
    pub fn new(gate: PermissionGate) -> Self {
        Self {
            api: PluginApi {
                gate,
                filesystem: None,
                store: None,
                profile: None,
                timers: None,
            },
        }
    }

    pub fn gate(&self) -> &PermissionGate {
        &self.api.gate
    }

    pub fn with(mut self, capability: ServiceApi) -> Self {
        let permission = capability.permission();
        if !self.api.gate.allows(permission) {
            tracing::warn!(
                plugin = %self.api.gate.plugin(),
                %permission,
                "dropping capability the plugin did not declare"
            );
            return self;
        }
        match capability {
            ServiceApi::Filesystem(api) => self.api.filesystem = Some(api),
            ServiceApi::Store(api) => self.api.store = Some(api),
            ServiceApi::Profile(api) => self.api.profile = Some(api),
            ServiceApi::Timers(api) => self.api.timers = Some(api),
        }
        self
    }

    pub fn build(self) -> PluginApi {
        self.api
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_drops_undeclared_capabilities() {
        let profile = Profile::new("main", "Main");
        let api = PluginApiBuilder::new(PermissionGate::new("demo", [Permission::Store]))
            .with(ServiceApi::Profile(ProfileApi::new(&profile)))
            .build();

        assert!(api.profile().unwrap_err().is_permission_denied());
        assert!(api.available().is_empty());
    }

    #[test]
    fn declared_but_unregistered_capability_stays_closed() {
        let api = PluginApiBuilder::new(PermissionGate::new("demo", [Permission::Timers])).build();
        assert!(api.timers().unwrap_err().is_permission_denied());
    }

    #[test]
    fn declared_and_registered_capability_is_reachable() {
        let profile = Profile::new("main", "Main");
        let api = PluginApiBuilder::new(PermissionGate::new("demo", [Permission::Profile]))
            .with(ServiceApi::Profile(ProfileApi::new(&profile)))
            .build();

        assert_eq!(api.profile().unwrap().id(), "main");
        assert_eq!(api.available(), vec![Permission::Profile]);
        assert_eq!(api.plugin_id(), "demo");
    }
}
