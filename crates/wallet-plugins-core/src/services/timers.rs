//! Plugin timers. They live in the plugin's task scope, so disabling the
//! plugin stops them.

use std::{
    collections::HashMap,
    future::Future,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex, PoisonError,
    },
    time::Duration,
};

use async_trait::async_trait;
use tokio::task::AbortHandle;
use wallet_plugins_sdk::Permission;

use crate::{
    api::ApiContext,
    controller::TaskScope,
    error::{PluginError, Result},
};

use super::{PluginService, ServiceApi};

pub struct TimersService;

#[async_trait]
impl PluginService for TimersService {
    fn permission(&self) -> Permission {
        Permission::Timers
    }

    fn accessor(&self) -> &'static str {
        "timers"
    }

    async fn api(&self, ctx: &ApiContext) -> Result<ServiceApi> {
        Ok(ServiceApi::Timers(TimersApi {
            plugin_id: ctx.plugin_id.clone(),
            scope: ctx.scope.clone(),
            next_id: Arc::new(AtomicU64::new(1)),
            timers: Arc::default(),
        }))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerId(u64);

#[derive(Debug, Clone)]
pub struct TimersApi {
    plugin_id: String,
    scope: TaskScope,
    next_id: Arc<AtomicU64>,
    timers: Arc<Mutex<HashMap<TimerId, AbortHandle>>>,
}

impl TimersApi {
    /// Runs `callback` once after `delay`.
    pub fn set_timeout<F, Fut>(&self, delay: Duration, callback: F) -> Result<TimerId>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.schedule(async move {
            tokio::time::sleep(delay).await;
            callback().await;
        })
    }

    /// Runs `callback` every `period`, first after one full period.
    /// A zero `period` is rejected.
    pub fn set_interval<F, Fut>(&self, period: Duration, mut callback: F) -> Result<TimerId>
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        if period.is_zero() {
            return Err(PluginError::ZeroInterval(self.plugin_id.clone()));
        }
        self.schedule(async move {
            let start = tokio::time::Instant::now() + period;
            let mut ticker = tokio::time::interval_at(start, period);
            loop {
                ticker.tick().await;
                callback().await;
            }
        })
    }

    /// Cancels a timer. Returns false when it already fired or was cleared.
    pub fn clear(&self, id: TimerId) -> bool {
        let handle = self
            .timers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id);
        match handle {
            Some(handle) if !handle.is_finished() => {
                handle.abort();
                true
            }
            _ => false,
        }
    }

    fn schedule<F>(&self, task: F) -> Result<TimerId>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let handle = self
            .scope
            .spawn(task)
            .ok_or_else(|| PluginError::PluginDisabled(self.plugin_id.clone()))?;
        let id = TimerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let mut timers = self.timers.lock().unwrap_or_else(PoisonError::into_inner);
        timers.retain(|_, handle| !handle.is_finished());
        timers.insert(id, handle.abort_handle());
        Ok(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::profile::Profile;
    use std::sync::atomic::AtomicUsize;

    async fn timers(scope: &TaskScope) -> TimersApi {
        let ctx = ApiContext {
            plugin_id: "ticker".into(),
            profile: Profile::new("main", "Main"),
            scope: scope.clone(),
        };
        match TimersService.api(&ctx).await.unwrap() {
            ServiceApi::Timers(api) => api,
            other => panic!("unexpected capability {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_fires_once() {
        let scope = TaskScope::new();
        let api = timers(&scope).await;
        let hits = Arc::new(AtomicUsize::new(0));

        let counter = hits.clone();
        api.set_timeout(Duration::from_secs(5), move || async move {
            counter.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();

        tokio::time::sleep(Duration::from_secs(4)).await;
        assert_eq!(hits.load(Ordering::SeqCst), 0);
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn interval_stops_when_cleared() {
        let scope = TaskScope::new();
        let api = timers(&scope).await;
        let hits = Arc::new(AtomicUsize::new(0));

        let counter = hits.clone();
        let id = api
            .set_interval(Duration::from_secs(1), move || {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                }
            })
            .unwrap();

        tokio::time::sleep(Duration::from_millis(3500)).await;
        assert_eq!(hits.load(Ordering::SeqCst), 3);

        assert!(api.clear(id));
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(hits.load(Ordering::SeqCst), 3);
        assert!(!api.clear(id));
    }

    #[tokio::test(start_paused = true)]
    async fn zero_period_interval_is_rejected() {
        let scope = TaskScope::new();
        let api = timers(&scope).await;

        let result = api.set_interval(Duration::ZERO, || async {});
        assert!(matches!(result, Err(PluginError::ZeroInterval(ref plugin)) if plugin == "ticker"));
        assert_eq!(scope.active(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn closed_scope_rejects_and_stops_timers() {
        let scope = TaskScope::new();
        let api = timers(&scope).await;
        let hits = Arc::new(AtomicUsize::new(0));

        let counter = hits.clone();
        api.set_timeout(Duration::from_secs(1), move || async move {
            counter.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();
        scope.close();

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(hits.load(Ordering::SeqCst), 0);
        assert!(matches!(
            api.set_timeout(Duration::from_secs(1), || async {}),
            Err(PluginError::PluginDisabled(_))
        ));
    }
}
