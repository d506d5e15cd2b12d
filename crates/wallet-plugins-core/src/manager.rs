//! Plugin registry for one profile session.
//!
//! The manager owns the registered capability services and the pushed
//! controllers. It is created when a profile is loaded and disposed when the
//! session ends; nothing here is process-global.

use std::{
    collections::BTreeSet,
    fmt,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard,
    },
};

use anyhow::anyhow;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use wallet_plugins_sdk::Permission;

use crate::{
    api::{ApiContext, PluginApi, PluginApiBuilder},
    controller::{EntryOutcome, EntryResolver, PluginController, TaskScope},
    error::{PluginError, Result},
    gate::PermissionGate,
    loader::PluginLoader,
    profile::Profile,
    services::PluginService,
};

pub struct PluginManager {
    services: Arc<ServiceRepository>,
    plugins: PluginRepository,
}

impl PluginManager {
    pub fn new() -> Self {
        let services = Arc::new(ServiceRepository::default());
        Self {
            plugins: PluginRepository::new(Arc::clone(&services)),
            services,
        }
    }

    pub fn services(&self) -> &ServiceRepository {
        &self.services
    }

    pub fn plugins(&self) -> &PluginRepository {
        &self.plugins
    }

    /// Ends the profile session: every controller is disabled for `profile`.
    pub fn dispose(&self, profile: &Profile) {
        for controller in self.plugins.all() {
            controller.disable(profile);
        }
        info!(profile = %profile.id(), "plugin session disposed");
    }
}

impl Default for PluginManager {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for PluginManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginManager")
            .field("services", &self.services.permissions())
            .field("booted", &self.services.is_booted())
            .field("plugins", &self.plugins.len())
            .finish()
    }
}

/// Registered capability services, at most one per permission.
#[derive(Default)]
pub struct ServiceRepository {
    services: RwLock<Vec<RegisteredService>>,
    booted: AtomicBool,
}

struct RegisteredService {
    service: Arc<dyn PluginService>,
    booted: bool,
}

impl ServiceRepository {
    pub fn register(&self, services: Vec<Arc<dyn PluginService>>) -> Result<()> {
        let mut registered = write(&self.services);
        if self.is_booted() {
            return Err(PluginError::ServicesAlreadyBooted);
        }
        let mut incoming = BTreeSet::new();
        for service in &services {
            let permission = service.permission();
            let taken = registered.iter().any(|r| r.service.permission() == permission);
            if taken || !incoming.insert(permission) {
                error!(%permission, "duplicate plugin service registration");
                return Err(PluginError::DuplicateService(permission));
            }
        }
        for service in services {
            debug!(permission = %service.permission(), accessor = service.accessor(), "service registered");
            registered.push(RegisteredService {
                service,
                booted: false,
            });
        }
        Ok(())
    }

    /// Runs every service's boot hook once.
    ///
    /// A failing hook leaves the repository unbooted; calling `boot` again
    /// only runs the hooks that have not succeeded yet.
    pub fn boot(&self) -> Result<()> {
        let mut services = write(&self.services);
        if self.is_booted() {
            return Err(PluginError::ServicesAlreadyBooted);
        }
        for registered in services.iter_mut().filter(|r| !r.booted) {
            let permission = registered.service.permission();
            if let Err(err) = registered.service.boot() {
                error!(%permission, error = %format!("{err:#}"), "service failed to boot");
                return Err(err.into());
            }
            registered.booted = true;
        }
        self.booted.store(true, Ordering::SeqCst);
        info!(services = services.len(), "plugin services booted");
        Ok(())
    }

    pub fn is_booted(&self) -> bool {
        self.booted.load(Ordering::SeqCst)
    }

    pub fn has(&self, permission: Permission) -> bool {
        read(&self.services)
            .iter()
            .any(|r| r.service.permission() == permission)
    }

    pub fn permissions(&self) -> Vec<Permission> {
        read(&self.services)
            .iter()
            .map(|r| r.service.permission())
            .collect()
    }

    pub fn len(&self) -> usize {
        read(&self.services).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Builds the capability object for `controller` bound to `profile`.
    pub async fn build_api(
        &self,
        controller: &PluginController,
        profile: &Profile,
        scope: TaskScope,
    ) -> Result<PluginApi> {
        let gate = PermissionGate::for_manifest(controller.manifest());
        let ctx = ApiContext {
            plugin_id: controller.id().to_string(),
            profile: profile.clone(),
            scope,
        };
        let services: Vec<_> = read(&self.services)
            .iter()
            .map(|r| Arc::clone(&r.service))
            .collect();

        let mut builder = PluginApiBuilder::new(gate);
        for service in services {
            if !builder.gate().allows(service.permission()) {
                continue;
            }
            builder = builder.with(service.api(&ctx).await?);
        }
        Ok(builder.build())
    }
}

/// Controllers in registration order.
pub struct PluginRepository {
    controllers: RwLock<Vec<Arc<PluginController>>>,
    services: Arc<ServiceRepository>,
}

impl PluginRepository {
    fn new(services: Arc<ServiceRepository>) -> Self {
        Self {
            controllers: RwLock::new(Vec::new()),
            services,
        }
    }

    pub fn push(&self, controller: PluginController) -> Result<Arc<PluginController>> {
        let mut controllers = write(&self.controllers);
        if controllers.iter().any(|c| c.id() == controller.id()) {
            warn!(plugin = %controller.id(), "plugin is already registered");
            return Err(PluginError::DuplicatePlugin(controller.id().to_string()));
        }
        let controller = Arc::new(controller);
        controllers.push(Arc::clone(&controller));
        info!(plugin = %controller.id(), version = %controller.manifest().version(), "plugin registered");
        Ok(controller)
    }

    pub fn all(&self) -> Vec<Arc<PluginController>> {
        read(&self.controllers).clone()
    }

    pub fn find_by_id(&self, id: &str) -> Option<Arc<PluginController>> {
        read(&self.controllers).iter().find(|c| c.id() == id).cloned()
    }

    /// Removes a controller, disabling it everywhere first.
    pub fn remove_by_id(&self, id: &str) -> Option<Arc<PluginController>> {
        let mut controllers = write(&self.controllers);
        let index = controllers.iter().position(|c| c.id() == id)?;
        let controller = controllers.remove(index);
        drop(controllers);
        controller.disable_all();
        info!(plugin = %id, "plugin unregistered");
        Some(controller)
    }

    pub fn enabled(&self, profile_id: &str) -> Vec<Arc<PluginController>> {
        read(&self.controllers)
            .iter()
            .filter(|c| c.is_enabled(profile_id))
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        read(&self.controllers).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Discovers packages for `profile` and registers one controller each.
    /// Returns the ids that were pushed.
    pub async fn load(
        &self,
        loader: &PluginLoader,
        resolver: &dyn EntryResolver,
        profile: &Profile,
    ) -> Vec<String> {
        let mut pushed = Vec::new();
        for source in loader.search(profile.id()).await {
            let id = source.manifest.id().to_string();
            let entry = match resolver.resolve(&source) {
                Ok(entry) => entry,
                Err(err) => {
                    warn!(plugin = %id, error = %format!("{err:#}"), "skipping plugin without a runnable entry");
                    continue;
                }
            };
            let controller = PluginController::new(source.manifest, entry).with_dir(source.dir);
            if self.push(controller).is_ok() {
                pushed.push(id);
            }
        }
        pushed
    }

    /// Invokes every controller enabled for `profile`, in push order.
    ///
    /// Each gets a fresh capability object. A failing entry is recorded and
    /// the sweep moves on. Async entries are spawned into the plugin's task
    /// scope; await them through [`SweepReport::join`].
    pub async fn run_all_enabled(&self, profile: &Profile) -> Result<SweepReport> {
        if !self.services.is_booted() {
            return Err(PluginError::ServicesNotBooted);
        }

        let mut report = SweepReport::default();
        for controller in self.enabled(profile.id()) {
            let id = controller.id().to_string();
            let Some(scope) = controller.scope(profile.id()) else {
                continue;
            };
            report.invoked.push(id.clone());

            let api = match self.services.build_api(&controller, profile, scope.clone()).await {
                Ok(api) => api,
                Err(err) => {
                    report.fail(id, err.into());
                    continue;
                }
            };

            match controller.invoke(api) {
                Ok(EntryOutcome::Done) => {
                    metrics::counter!("wallet_plugins_sweep_total", "outcome" => "done").increment(1);
                    debug!(plugin = %id, "plugin entry completed");
                }
                Ok(EntryOutcome::Task(task)) => match scope.spawn(task) {
                    Some(handle) => {
                        metrics::counter!("wallet_plugins_sweep_total", "outcome" => "spawned")
                            .increment(1);
                        report.pending.push(PendingTask { plugin: id, handle });
                    }
                    None => report.fail(id, anyhow!("plugin was disabled before its task started")),
                },
                Err(err) => report.fail(id, err),
            }
        }

        info!(
            profile = %profile.id(),
            invoked = report.invoked.len(),
            failed = report.failures.len(),
            pending = report.pending.len(),
            "plugin sweep finished"
        );
        Ok(report)
    }
}

#[derive(Debug)]
pub struct PluginFailure {
    pub plugin: String,
    pub error: anyhow::Error,
}

#[derive(Debug)]
pub struct PendingTask {
    pub plugin: String,
    pub handle: JoinHandle<anyhow::Result<()>>,
}

/// Outcome of one sweep.
#[derive(Debug, Default)]
pub struct SweepReport {
    pub invoked: Vec<String>,
    pub failures: Vec<PluginFailure>,
    pub pending: Vec<PendingTask>,
}

impl SweepReport {
    fn fail(&mut self, plugin: String, error: anyhow::Error) {
        metrics::counter!("wallet_plugins_sweep_total", "outcome" => "error").increment(1);
        error!(plugin = %plugin, error = %format!("{error:#}"), "plugin entry failed");
        self.failures.push(PluginFailure { plugin, error });
    }

    /// Waits for every spawned task and returns all failures of the sweep.
    pub async fn join(mut self) -> Vec<PluginFailure> {
        for PendingTask { plugin, handle } in std::mem::take(&mut self.pending) {
            let error = match handle.await {
                Ok(Ok(())) => continue,
                Ok(Err(err)) => err,
                Err(err) if err.is_cancelled() => anyhow!("plugin task was cancelled"),
                Err(err) => anyhow!("plugin task panicked: {err}"),
            };
            self.fail(plugin, error);
        }
        self.failures
    }
}

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}
