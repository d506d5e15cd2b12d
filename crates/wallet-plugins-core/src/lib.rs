pub mod api;
pub mod config;
pub mod controller;
pub mod error;
pub mod gate;
pub mod loader;
pub mod manager;
pub mod profile;
pub mod services;

pub use api::{PluginApi, PluginApiBuilder};
pub use controller::{
    entry, EntryOutcome, EntryResolver, NativeEntries, PluginController, PluginEntry, PluginState,
};
pub use error::{PluginError, Result};
pub use loader::{LoaderOptions, PluginLoader, PluginSource};
pub use manager::{PluginManager, SweepReport};
pub use profile::{Environment, FileEnvironment, MemoryEnvironment, Profile};
