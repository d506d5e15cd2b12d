//! Per-plugin runtime wrapper.
//!
//! A controller owns one manifest and one entry function and tracks, per
//! profile, whether the plugin is enabled. Enabling only flips state; the
//! entry runs later during the manager's sweep.

use std::{
    collections::HashMap,
    fmt,
    future::Future,
    panic::{catch_unwind, AssertUnwindSafe},
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex, MutexGuard, PoisonError,
    },
};

use anyhow::anyhow;
use futures::future::BoxFuture;
use tokio::task::{AbortHandle, JoinHandle};
use wallet_plugins_sdk::PluginManifest;

use crate::{api::PluginApi, loader::PluginSource, profile::Profile};

pub type EntryTask = BoxFuture<'static, anyhow::Result<()>>;

/// What an entry function hands back to the host.
pub enum EntryOutcome {
    /// The plugin finished its work synchronously.
    Done,
    /// The plugin continues asynchronously; the host spawns and can cancel it.
    Task(EntryTask),
}

impl EntryOutcome {
    pub fn task<F>(future: F) -> Self
    where
        F: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        Self::Task(Box::pin(future))
    }
}

impl fmt::Debug for EntryOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntryOutcome::Done => f.write_str("Done"),
            EntryOutcome::Task(_) => f.write_str("Task(..)"),
        }
    }
}

pub type PluginEntry = Arc<dyn Fn(PluginApi) -> anyhow::Result<EntryOutcome> + Send + Sync>;

pub fn entry<F>(f: F) -> PluginEntry
where
    F: Fn(PluginApi) -> anyhow::Result<EntryOutcome> + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Turns loaded plugin packages into callable entry functions.
pub trait EntryResolver: Send + Sync {
    fn resolve(&self, source: &PluginSource) -> anyhow::Result<PluginEntry>;
}

/// Entry functions compiled into the host, keyed by plugin id.
#[derive(Default, Clone)]
pub struct NativeEntries {
    entries: HashMap<String, PluginEntry>,
}

impl NativeEntries {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, plugin_id: impl Into<String>, entry: PluginEntry) -> &mut Self {
        self.entries.insert(plugin_id.into(), entry);
        self
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl EntryResolver for NativeEntries {
    fn resolve(&self, source: &PluginSource) -> anyhow::Result<PluginEntry> {
        self.entries
            .get(source.manifest.id())
            .cloned()
            .ok_or_else(|| anyhow!("no native entry registered for `{}`", source.manifest.id()))
    }
}

/// Async work a plugin started for one profile. Closing the scope aborts it.
#[derive(Debug, Clone, Default)]
pub struct TaskScope {
    handles: Arc<Mutex<Vec<AbortHandle>>>,
    closed: Arc<AtomicBool>,
}

impl TaskScope {
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawns `future` unless the scope is closed. Needs a tokio runtime.
    pub fn spawn<F>(&self, future: F) -> Option<JoinHandle<F::Output>>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        // `close` flips the flag under this lock, so no task can slip in after it.
        let mut handles = lock(&self.handles);
        if self.is_closed() {
            return None;
        }
        let handle = tokio::spawn(future);
        handles.retain(|handle| !handle.is_finished());
        handles.push(handle.abort_handle());
        Some(handle)
    }

    pub fn close(&self) {
        let mut handles = lock(&self.handles);
        self.closed.store(true, Ordering::SeqCst);
        for handle in handles.drain(..) {
            handle.abort();
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn active(&self) -> usize {
        lock(&self.handles)
            .iter()
            .filter(|handle| !handle.is_finished())
            .count()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PluginState {
    Registered,
    Enabled,
    Disabled,
}

impl fmt::Display for PluginState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Registered => write!(f, "registered"),
            Self::Enabled => write!(f, "enabled"),
            Self::Disabled => write!(f, "disabled"),
        }
    }
}

#[derive(Debug)]
struct ProfileSlot {
    state: PluginState,
    scope: TaskScope,
}

pub struct PluginController {
    manifest: PluginManifest,
    entry: PluginEntry,
    dir: Option<PathBuf>,
    profiles: Mutex<HashMap<String, ProfileSlot>>,
}

impl PluginController {
    pub fn new(manifest: PluginManifest, entry: PluginEntry) -> Self {
        Self {
            manifest,
            entry,
            dir: None,
            profiles: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.dir = Some(dir.into());
        self
    }

    pub fn id(&self) -> &str {
        self.manifest.id()
    }

    pub fn manifest(&self) -> &PluginManifest {
        &self.manifest
    }

    pub fn dir(&self) -> Option<&Path> {
        self.dir.as_deref()
    }

    pub fn state(&self, profile_id: &str) -> PluginState {
        lock(&self.profiles)
            .get(profile_id)
            .map_or(PluginState::Registered, |slot| slot.state)
    }

    pub fn is_enabled(&self, profile_id: &str) -> bool {
        self.state(profile_id) == PluginState::Enabled
    }

    /// Marks the plugin enabled for `profile`. Does not run the entry.
    pub fn enable(&self, profile: &Profile) {
        let mut profiles = lock(&self.profiles);
        let slot = profiles
            .entry(profile.id().to_string())
            .or_insert_with(|| ProfileSlot {
                state: PluginState::Registered,
                scope: TaskScope::new(),
            });
        if slot.state == PluginState::Enabled {
            return;
        }
        if slot.scope.is_closed() {
            slot.scope = TaskScope::new();
        }
        slot.state = PluginState::Enabled;
        tracing::info!(plugin = %self.id(), profile = %profile.id(), "plugin enabled");
    }

    /// Suppresses future invocation and aborts outstanding tasks for `profile`.
    pub fn disable(&self, profile: &Profile) {
        self.disable_for(profile.id());
    }

    pub(crate) fn disable_for(&self, profile_id: &str) {
        let mut profiles = lock(&self.profiles);
        let Some(slot) = profiles.get_mut(profile_id) else {
            return;
        };
        if slot.state != PluginState::Enabled {
            return;
        }
        slot.state = PluginState::Disabled;
        slot.scope.close();
        tracing::info!(plugin = %self.id(), profile = %profile_id, "plugin disabled");
    }

    pub(crate) fn disable_all(&self) {
        let profile_ids: Vec<String> = lock(&self.profiles).keys().cloned().collect();
        for profile_id in profile_ids {
            self.disable_for(&profile_id);
        }
    }

    /// Task scope of an enabled plugin for `profile_id`.
    pub fn scope(&self, profile_id: &str) -> Option<TaskScope> {
        lock(&self.profiles)
            .get(profile_id)
            .filter(|slot| slot.state == PluginState::Enabled)
            .map(|slot| slot.scope.clone())
    }

    /// Calls the entry function, turning panics into errors.
    pub fn invoke(&self, api: PluginApi) -> anyhow::Result<EntryOutcome> {
        let entry = Arc::clone(&self.entry);
        catch_unwind(AssertUnwindSafe(move || entry(api))).unwrap_or_else(|panic| {
            let message = panic
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            Err(anyhow!("plugin `{}` panicked: {message}", self.id()))
        })
    }
}

impl fmt::Debug for PluginController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginController")
            .field("id", &self.id())
            .field("version", &self.manifest.version().to_string())
            .field("dir", &self.dir)
            .finish_non_exhaustive()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
