//! Key/value persistence namespaced per plugin under `plugins.<id>.store`.

use std::{fmt, sync::Arc};

use async_trait::async_trait;
use serde_json::{Map, Value};
use tokio::sync::RwLock;
use wallet_plugins_sdk::Permission;

use crate::{
    api::ApiContext,
    error::Result,
    profile::{Environment, Profile},
};

use super::{PluginService, ServiceApi};

/// Profile settings key holding a plugin's persisted store.
pub fn store_key(plugin_id: &str) -> String {
    format!("plugins.{plugin_id}.store")
}

pub struct StoreService {
    env: Arc<dyn Environment>,
}

impl StoreService {
    pub fn new(env: Arc<dyn Environment>) -> Self {
        Self { env }
    }
}

#[async_trait]
impl PluginService for StoreService {
    fn permission(&self) -> Permission {
        Permission::Store
    }

    fn accessor(&self) -> &'static str {
        "store"
    }

    async fn api(&self, ctx: &ApiContext) -> Result<ServiceApi> {
        let key = store_key(&ctx.plugin_id);
        let entries = match ctx.profile.data().get(&key).await {
            Some(Value::Object(entries)) => entries,
            Some(other) => {
                tracing::warn!(plugin = %ctx.plugin_id, value = %other, "ignoring malformed plugin store");
                Map::new()
            }
            None => Map::new(),
        };
        Ok(ServiceApi::Store(StoreApi {
            key,
            data: StoreData {
                entries: Arc::new(RwLock::new(entries)),
            },
            profile: ctx.profile.clone(),
            env: Arc::clone(&self.env),
        }))
    }
}

/// In-memory view of one plugin's store. Changes stay local until `persist`.
#[derive(Debug, Clone, Default)]
pub struct StoreData {
    entries: Arc<RwLock<Map<String, Value>>>,
}

impl StoreData {
    pub async fn get(&self, key: &str) -> Option<Value> {
        self.entries.read().await.get(key).cloned()
    }

    pub async fn set(&self, key: impl Into<String>, value: Value) {
        self.entries.write().await.insert(key.into(), value);
    }

    pub async fn has(&self, key: &str) -> bool {
        self.entries.read().await.contains_key(key)
    }

    pub async fn forget(&self, key: &str) -> Option<Value> {
        self.entries.write().await.remove(key)
    }

    pub async fn all(&self) -> Map<String, Value> {
        self.entries.read().await.clone()
    }
}

#[derive(Clone)]
pub struct StoreApi {
    key: String,
    data: StoreData,
    profile: Profile,
    env: Arc<dyn Environment>,
}

impl StoreApi {
    pub fn data(&self) -> &StoreData {
        &self.data
    }

    /// Writes the whole in-memory map to the profile and persists the profile.
    pub async fn persist(&self) -> Result<()> {
        let snapshot = self.data.all().await;
        let count = snapshot.len();
        self.profile
            .data()
            .set(self.key.clone(), Value::Object(snapshot))
            .await;
        self.env.persist(&self.profile).await?;
        tracing::debug!(key = %self.key, entries = count, "plugin store persisted");
        Ok(())
    }
}

impl fmt::Debug for StoreApi {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoreApi")
            .field("key", &self.key)
            .field("profile", &self.profile.id())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{controller::TaskScope, profile::MemoryEnvironment};
    use serde_json::json;

    fn ctx(plugin: &str, profile: &Profile) -> ApiContext {
        ApiContext {
            plugin_id: plugin.into(),
            profile: profile.clone(),
            scope: TaskScope::new(),
        }
    }

    async fn store(service: &StoreService, ctx: &ApiContext) -> StoreApi {
        match service.api(ctx).await.unwrap() {
            ServiceApi::Store(api) => api,
            other => panic!("unexpected capability {other:?}"),
        }
    }

    #[tokio::test]
    async fn set_does_not_touch_the_profile_until_persist() {
        let env = Arc::new(MemoryEnvironment::new());
        let service = StoreService::new(env.clone());
        let profile = Profile::new("main", "Main");
        let api = store(&service, &ctx("theme", &profile)).await;

        api.data().set("theme", json!("dark")).await;
        api.data().set("accent", json!("blue")).await;
        assert!(profile.data().get("plugins.theme.store").await.is_none());
        assert!(env.snapshot("main").await.is_none());

        api.persist().await.unwrap();
        assert_eq!(
            profile.data().get("plugins.theme.store").await,
            Some(json!({"theme": "dark", "accent": "blue"}))
        );
        assert!(env.snapshot("main").await.is_some());
    }

    #[tokio::test]
    async fn persisted_values_survive_a_reload() {
        let env = Arc::new(MemoryEnvironment::new());
        let service = StoreService::new(env.clone());
        let profile = Profile::new("main", "Main");

        let api = store(&service, &ctx("theme", &profile)).await;
        api.data().set("theme", json!("dark")).await;
        api.persist().await.unwrap();

        let reloaded = env.load("main").await.unwrap().unwrap();
        let api = store(&service, &ctx("theme", &reloaded)).await;
        assert_eq!(api.data().get("theme").await, Some(json!("dark")));
    }

    #[tokio::test]
    async fn plugins_do_not_share_namespaces() {
        let env = Arc::new(MemoryEnvironment::new());
        let service = StoreService::new(env);
        let profile = Profile::new("main", "Main");

        let first = store(&service, &ctx("first", &profile)).await;
        first.data().set("token", json!("secret")).await;
        first.persist().await.unwrap();

        let second = store(&service, &ctx("second", &profile)).await;
        assert!(!second.data().has("token").await);
        second.persist().await.unwrap();

        assert_eq!(
            profile.data().get("plugins.first.store").await,
            Some(json!({"token": "secret"}))
        );
        assert_eq!(profile.data().get("plugins.second.store").await, Some(json!({})));
    }

    #[tokio::test]
    async fn forget_removes_keys_on_next_persist() {
        let env = Arc::new(MemoryEnvironment::new());
        let service = StoreService::new(env);
        let profile = Profile::new("main", "Main");
        profile
            .data()
            .set("plugins.theme.store", json!({"theme": "dark", "stale": true}))
            .await;

        let api = store(&service, &ctx("theme", &profile)).await;
        assert_eq!(api.data().forget("stale").await, Some(json!(true)));
        api.persist().await.unwrap();

        assert_eq!(
            profile.data().get("plugins.theme.store").await,
            Some(json!({"theme": "dark"}))
        );
    }
}
