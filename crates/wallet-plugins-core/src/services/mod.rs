//! Host capabilities, one service per permission tag.

pub mod filesystem;
pub mod profile;
pub mod store;
pub mod timers;

use std::sync::Arc;

use async_trait::async_trait;
use wallet_plugins_sdk::Permission;

use crate::{api::ApiContext, error::Result, profile::Environment};

pub use filesystem::{DialogRequest, FileDialog, FileSystemApi, FileSystemService, NoDialog};
pub use profile::{ProfileApi, ProfileService};
pub use store::{StoreApi, StoreData, StoreService};
pub use timers::{TimerId, TimersApi, TimersService};

/// Capability handed to one plugin, tagged by the permission guarding it.
#[derive(Debug, Clone)]
pub enum ServiceApi {
    Filesystem(FileSystemApi),
    Store(StoreApi),
    Profile(ProfileApi),
    Timers(TimersApi),
}

impl ServiceApi {
    pub fn permission(&self) -> Permission {
        match self {
            ServiceApi::Filesystem(_) => Permission::Filesystem,
            ServiceApi::Store(_) => Permission::Store,
            ServiceApi::Profile(_) => Permission::Profile,
            ServiceApi::Timers(_) => Permission::Timers,
        }
    }
}

/// A host capability registered into the plugin manager.
#[async_trait]
pub trait PluginService: Send + Sync + 'static {
    /// Permission a plugin must declare to reach this service.
    fn permission(&self) -> Permission;

    /// Accessor name on the capability object, e.g. `filesystem`.
    fn accessor(&self) -> &'static str;

    /// Called once by `ServiceRepository::boot` before any plugin runs.
    fn boot(&self) -> anyhow::Result<()> {
        Ok(())
    }

    /// Builds the per-plugin capability.
    async fn api(&self, ctx: &ApiContext) -> Result<ServiceApi>;
}

/// The stock service set backed by `env` and `dialog`.
pub fn defaults(
    env: Arc<dyn Environment>,
    dialog: Arc<dyn FileDialog>,
) -> Vec<Arc<dyn PluginService>> {
    vec![
        Arc::new(FileSystemService::new(dialog)),
        Arc::new(StoreService::new(env)),
        Arc::new(ProfileService),
        Arc::new(TimersService),
    ]
}
