//! Host profile model and the persistence seam plugins write through.
//!
//! A [`Profile`] carries a flat key/value settings blob. Every durable write
//! goes through an [`Environment`], which is the single mutation path for
//! persisted settings and is responsible for serializing concurrent writers.

use std::{
    collections::{BTreeMap, HashMap},
    path::{Path, PathBuf},
    sync::Arc,
};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::{Mutex, RwLock};

use crate::error::{PluginError, Result};

/// Shared handle to a profile's settings blob.
#[derive(Debug, Clone, Default)]
pub struct ProfileData {
    entries: Arc<RwLock<BTreeMap<String, Value>>>,
}

impl ProfileData {
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

    pub async fn all(&self) -> BTreeMap<String, Value> {
        self.entries.read().await.clone()
    }

    async fn replace(&self, entries: BTreeMap<String, Value>) {
        *self.entries.write().await = entries;
    }
}

/// A wallet profile as seen by the plugin host.
#[derive(Debug, Clone)]
pub struct Profile {
    id: String,
    name: String,
    data: ProfileData,
}

impl Profile {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            data: ProfileData::default(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn data(&self) -> &ProfileData {
        &self.data
    }

    pub async fn snapshot(&self) -> ProfileSnapshot {
        ProfileSnapshot {
            id: self.id.clone(),
            name: self.name.clone(),
            data: self.data.all().await,
        }
    }

    pub async fn restore(snapshot: ProfileSnapshot) -> Self {
        let profile = Self::new(snapshot.id, snapshot.name);
        profile.data.replace(snapshot.data).await;
        profile
    }
}

/// Serialized form of a profile.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProfileSnapshot {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub data: BTreeMap<String, Value>,
}

/// Durable storage for profiles.
#[async_trait]
pub trait Environment: Send + Sync {
    async fn load(&self, id: &str) -> Result<Option<Profile>>;
    async fn persist(&self, profile: &Profile) -> Result<()>;
}

/// Keeps snapshots in memory. Used by tests and by embedders without disk state.
#[derive(Debug, Default)]
pub struct MemoryEnvironment {
    profiles: Mutex<HashMap<String, ProfileSnapshot>>,
}

impl MemoryEnvironment {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn snapshot(&self, id: &str) -> Option<ProfileSnapshot> {
        self.profiles.lock().await.get(id).cloned()
    }
}

#[async_trait]
impl Environment for MemoryEnvironment {
    async fn load(&self, id: &str) -> Result<Option<Profile>> {
        let snapshot = self.profiles.lock().await.get(id).cloned();
        match snapshot {
            Some(snapshot) => Ok(Some(Profile::restore(snapshot).await)),
            None => Ok(None),
        }
    }

    async fn persist(&self, profile: &Profile) -> Result<()> {
        let mut profiles = self.profiles.lock().await;
        let snapshot = profile.snapshot().await;
        profiles.insert(snapshot.id.clone(), snapshot);
        Ok(())
    }
}

/// Stores each profile as `<data_dir>/<id>.json`.
#[derive(Debug)]
pub struct FileEnvironment {
    data_dir: PathBuf,
    write_lock: Mutex<()>,
}

impl FileEnvironment {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    fn profile_path(&self, id: &str) -> Result<PathBuf> {
        if id.is_empty() || id.starts_with('.') || id.contains(['/', '\\']) {
            return Err(PluginError::PathOutsideRoot {
                path: PathBuf::from(id),
                root: self.data_dir.clone(),
            });
        }
        Ok(self.data_dir.join(format!("{id}.json")))
    }
}

#[async_trait]
impl Environment for FileEnvironment {
    async fn load(&self, id: &str) -> Result<Option<Profile>> {
        let path = self.profile_path(id)?;
        let raw = match tokio::fs::read_to_string(&path).await {
            Ok(raw) => raw,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err.into()),
        };
        let snapshot: ProfileSnapshot = serde_json::from_str(&raw)?;
        Ok(Some(Profile::restore(snapshot).await))
    }

    async fn persist(&self, profile: &Profile) -> Result<()> {
        let path = self.profile_path(profile.id())?;

        // Snapshot under the lock: the last writer carries every earlier change.
        let _guard = self.write_lock.lock().await;
        let json = serde_json::to_vec_pretty(&profile.snapshot().await)?;
        tokio::fs::create_dir_all(&self.data_dir).await?;
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, json).await?;
        tokio::fs::rename(&tmp, &path).await?;
        tracing::debug!(profile = %profile.id(), path = %path.display(), "profile persisted");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn memory_environment_returns_fresh_copies() {
        let env = MemoryEnvironment::new();
        let profile = Profile::new("p1", "Main");
        profile.data().set("plugins.demo.store", json!({"a": 1})).await;
        env.persist(&profile).await.unwrap();

        profile.data().set("plugins.demo.store", json!({"a": 2})).await;

        let loaded = env.load("p1").await.unwrap().unwrap();
        assert_eq!(
            loaded.data().get("plugins.demo.store").await,
            Some(json!({"a": 1}))
        );
        assert!(env.load("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn file_environment_round_trips_profiles() {
        let dir = tempfile::tempdir().unwrap();
        let env = FileEnvironment::new(dir.path().join("profiles"));

        let profile = Profile::new("p1", "Main");
        profile.data().set("settings.locale", json!("en-US")).await;
        env.persist(&profile).await.unwrap();

        let loaded = env.load("p1").await.unwrap().unwrap();
        assert_eq!(loaded.name(), "Main");
        assert_eq!(loaded.data().get("settings.locale").await, Some(json!("en-US")));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_persists_keep_every_write() {
        let dir = tempfile::tempdir().unwrap();
        let env = Arc::new(FileEnvironment::new(dir.path()));

        for round in 0..50 {
            let id = format!("p{round}");
            let profile = Profile::new(id.clone(), "Main");
            for i in 0..500 {
                profile.data().set(format!("settings.k{i}"), json!(i)).await;
            }

            let writers: Vec<_> = ["a", "b"]
                .into_iter()
                .map(|plugin| {
                    let env = Arc::clone(&env);
                    let profile = profile.clone();
                    tokio::spawn(async move {
                        profile
                            .data()
                            .set(format!("plugins.{plugin}.store"), json!({"round": round}))
                            .await;
                        env.persist(&profile).await.unwrap();
                    })
                })
                .collect();
            for writer in writers {
                writer.await.unwrap();
            }

            let loaded = env.load(&id).await.unwrap().unwrap();
            assert!(loaded.data().has("plugins.a.store").await, "round {round} lost a");
            assert!(loaded.data().has("plugins.b.store").await, "round {round} lost b");
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn memory_environment_keeps_the_latest_snapshot() {
        let env = Arc::new(MemoryEnvironment::new());
        let profile = Profile::new("p1", "Main");

        let writers: Vec<_> = (0..8)
            .map(|i| {
                let env = Arc::clone(&env);
                let profile = profile.clone();
                tokio::spawn(async move {
                    profile.data().set(format!("plugins.p{i}.store"), json!({})).await;
                    env.persist(&profile).await.unwrap();
                })
            })
            .collect();
        for writer in writers {
            writer.await.unwrap();
        }

        let stored = env.snapshot("p1").await.unwrap();
        assert_eq!(stored.data.len(), 8);
    }

    #[tokio::test]
    async fn file_environment_rejects_escaping_ids() {
        let dir = tempfile::tempdir().unwrap();
        let env = FileEnvironment::new(dir.path());
        let err = env.load("../etc").await.unwrap_err();
        assert!(matches!(err, PluginError::PathOutsideRoot { .. }));
    }
}
