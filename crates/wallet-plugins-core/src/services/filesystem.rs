use std::{fmt, path::PathBuf, sync::Arc};

use async_trait::async_trait;
use wallet_plugins_sdk::Permission;

use crate::{
    api::ApiContext,
    error::{PluginError, Result},
};

use super::{PluginService, ServiceApi};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DialogRequest {
    pub plugin_id: String,
    pub title: String,
    pub suggested_name: Option<String>,
}

/// Native open/save dialog. `Ok(None)` means the user cancelled.
#[async_trait]
pub trait FileDialog: Send + Sync {
    async fn pick_open(&self, request: &DialogRequest) -> anyhow::Result<Option<PathBuf>>;
    async fn pick_save(&self, request: &DialogRequest) -> anyhow::Result<Option<PathBuf>>;
}

/// Dialog for headless hosts: every request is cancelled.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoDialog;

#[async_trait]
impl FileDialog for NoDialog {
    async fn pick_open(&self, _request: &DialogRequest) -> anyhow::Result<Option<PathBuf>> {
        Ok(None)
    }

    async fn pick_save(&self, _request: &DialogRequest) -> anyhow::Result<Option<PathBuf>> {
        Ok(None)
    }
}

pub struct FileSystemService {
    dialog: Arc<dyn FileDialog>,
}

impl FileSystemService {
    pub fn new(dialog: Arc<dyn FileDialog>) -> Self {
        Self { dialog }
    }
}

#[async_trait]
impl PluginService for FileSystemService {
    fn permission(&self) -> Permission {
        Permission::Filesystem
    }

    fn accessor(&self) -> &'static str {
        "filesystem"
    }

    async fn api(&self, ctx: &ApiContext) -> Result<ServiceApi> {
        Ok(ServiceApi::Filesystem(FileSystemApi {
            plugin_id: ctx.plugin_id.clone(),
            dialog: Arc::clone(&self.dialog),
        }))
    }
}

/// User-mediated file access. The plugin never chooses paths itself.
#[derive(Clone)]
pub struct FileSystemApi {
    plugin_id: String,
    dialog: Arc<dyn FileDialog>,
}

impl FileSystemApi {
    /// Asks the user for a file and returns its contents as text.
    pub async fn ask_user_to_open_file(&self) -> Result<String> {
        let request = DialogRequest {
            plugin_id: self.plugin_id.clone(),
            title: "Open File".to_string(),
            suggested_name: None,
        };
        let path = self
            .dialog
            .pick_open(&request)
            .await?
            .ok_or(PluginError::Cancelled)?;
        let contents = tokio::fs::read_to_string(&path).await?;
        tracing::debug!(plugin = %self.plugin_id, path = %path.display(), "plugin opened file");
        Ok(contents)
    }

    /// Asks the user where to save `content` and writes it there.
    pub async fn ask_user_to_save_file(
        &self,
        content: impl AsRef<[u8]>,
        suggested_name: Option<&str>,
    ) -> Result<PathBuf> {
        let request = DialogRequest {
            plugin_id: self.plugin_id.clone(),
            title: "Save File".to_string(),
            suggested_name: suggested_name.map(str::to_string),
        };
        let path = self
            .dialog
            .pick_save(&request)
            .await?
            .ok_or(PluginError::Cancelled)?;
        tokio::fs::write(&path, content.as_ref()).await?;
        tracing::debug!(plugin = %self.plugin_id, path = %path.display(), "plugin saved file");
        Ok(path)
    }
}

impl fmt::Debug for FileSystemApi {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileSystemApi")
            .field("plugin_id", &self.plugin_id)
            .finish_non_exhaustive()
    }
}
