//! Plugin discovery on disk.
//!
//! Packages live under `<root>/**/<profileId>/**/package.json`. A candidate
//! whose manifest or entry file cannot be loaded is skipped with a warning;
//! it never fails the whole search.

use std::{
    collections::HashSet,
    path::{Component, Path, PathBuf},
};

use anyhow::{bail, Context};
use globset::{Glob, GlobMatcher};
use semver::Version;
use tracing::{debug, info, warn};
use walkdir::{DirEntry, WalkDir};
use wallet_plugins_sdk::{PluginManifest, DEFAULT_ENTRY, MANIFEST_FILE};

use crate::{
    config::PluginsConfig,
    error::{PluginError, Result},
};

#[derive(Debug, Clone)]
pub struct LoaderOptions {
    pub root: PathBuf,
    pub fixtures_dir: Option<PathBuf>,
    pub development: bool,
    pub scan_all: bool,
    pub host_version: Option<Version>,
}

impl LoaderOptions {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            fixtures_dir: None,
            development: false,
            scan_all: false,
            host_version: None,
        }
    }

    pub fn from_config(config: &PluginsConfig) -> Self {
        Self {
            root: config.root.clone(),
            fixtures_dir: config.fixtures_dir.clone(),
            development: config.development,
            scan_all: config.scan_all,
            host_version: None,
        }
    }

    /// Also scan `dir`, as development and test builds do.
    pub fn with_fixtures(mut self, dir: impl Into<PathBuf>) -> Self {
        self.fixtures_dir = Some(dir.into());
        self.development = true;
        self
    }

    pub fn scan_all(mut self) -> Self {
        self.scan_all = true;
        self
    }

    /// Skip plugins whose `minimumVersion` is newer than `version`.
    pub fn with_host_version(mut self, version: Version) -> Self {
        self.host_version = Some(version);
        self
    }
}

/// A discovered package: manifest plus the text of its entry file.
#[derive(Debug, Clone)]
pub struct PluginSource {
    pub dir: PathBuf,
    pub manifest: PluginManifest,
    pub entry_path: PathBuf,
    pub source: String,
}

#[derive(Debug, Clone)]
pub struct PluginLoader {
    options: LoaderOptions,
}

impl PluginLoader {
    pub fn new(options: LoaderOptions) -> Self {
        Self { options }
    }

    pub fn root(&self) -> &Path {
        &self.options.root
    }

    pub fn options(&self) -> &LoaderOptions {
        &self.options
    }

    /// Finds every loadable plugin for `profile_id`, sorted by directory.
    pub async fn search(&self, profile_id: &str) -> Vec<PluginSource> {
        let pattern = if self.options.scan_all {
            format!("**/{MANIFEST_FILE}")
        } else if profile_id.trim().is_empty() {
            warn!("plugin search requested without a profile id");
            return Vec::new();
        } else {
            format!("**/{}/**/{MANIFEST_FILE}", globset::escape(profile_id))
        };

        let mut candidates = match candidates(&self.options.root, &pattern).await {
            Ok(found) => found,
            Err(err) => {
                warn!(root = %self.options.root.display(), error = %format!("{err:#}"), "plugin root scan failed");
                Vec::new()
            }
        };

        if self.options.development {
            if let Some(fixtures) = &self.options.fixtures_dir {
                match candidates_under(fixtures).await {
                    Ok(found) => candidates.extend(found),
                    Err(err) => {
                        warn!(fixtures = %fixtures.display(), error = %format!("{err:#}"), "fixture scan failed")
                    }
                }
            }
        }
        candidates.sort();
        candidates.dedup();

        let mut seen = HashSet::new();
        let mut sources = Vec::new();
        for dir in candidates {
            match self.load_dir(&dir).await {
                Ok(source) => {
                    if !seen.insert(source.manifest.id().to_string()) {
                        warn!(plugin = %source.manifest.id(), dir = %dir.display(), "duplicate plugin id; keeping the first");
                        continue;
                    }
                    debug!(plugin = %source.manifest.id(), dir = %dir.display(), "found plugin");
                    sources.push(source);
                }
                Err(err) => {
                    warn!(dir = %dir.display(), error = %format!("{err:#}"), "skipping plugin candidate");
                }
            }
        }

        info!(profile = %profile_id, count = sources.len(), "plugin search complete");
        sources
    }

    /// Loads a single package directory.
    pub async fn load_dir(&self, dir: &Path) -> anyhow::Result<PluginSource> {
        let manifest_path = dir.join(MANIFEST_FILE);
        let raw = tokio::fs::read_to_string(&manifest_path)
            .await
            .with_context(|| format!("failed to read {}", manifest_path.display()))?;
        let manifest = PluginManifest::from_json(&raw)
            .with_context(|| format!("invalid manifest {}", manifest_path.display()))?;

        if let Some(host) = &self.options.host_version {
            if !manifest.is_compatible_with(host) {
                bail!(
                    "plugin `{}` requires host {} or newer (running {host})",
                    manifest.id(),
                    manifest
                        .minimum_version()
                        .map(ToString::to_string)
                        .unwrap_or_default()
                );
            }
        }

        let entry_path = resolve_entry(dir, manifest.main().unwrap_or(DEFAULT_ENTRY))?;
        let source = tokio::fs::read_to_string(&entry_path)
            .await
            .with_context(|| format!("failed to read entry {}", entry_path.display()))?;

        Ok(PluginSource {
            dir: dir.to_path_buf(),
            manifest,
            entry_path,
            source,
        })
    }

    /// Deletes a plugin directory. Only paths strictly below the root qualify.
    pub async fn remove(&self, dir: &Path) -> Result<()> {
        let root = tokio::fs::canonicalize(&self.options.root).await?;
        let outside = || PluginError::PathOutsideRoot {
            path: dir.to_path_buf(),
            root: root.clone(),
        };

        let target = match tokio::fs::canonicalize(dir).await {
            Ok(target) => target,
            Err(err) => {
                let absolute = if dir.is_absolute() {
                    dir.to_path_buf()
                } else {
                    std::env::current_dir()?.join(dir)
                };
                if !is_strictly_inside(&normalize_lexically(&absolute), &root) {
                    return Err(outside());
                }
                return Err(err.into());
            }
        };

        if !is_strictly_inside(&target, &root) {
            warn!(path = %dir.display(), root = %root.display(), "refusing to remove path outside plugins root");
            return Err(outside());
        }

        tokio::fs::remove_dir_all(&target).await?;
        info!(path = %target.display(), "plugin removed");
        Ok(())
    }
}

async fn candidates(root: &Path, pattern: &str) -> anyhow::Result<Vec<PathBuf>> {
    let matcher = Glob::new(pattern)
        .with_context(|| format!("invalid discovery pattern `{pattern}`"))?
        .compile_matcher();
    let root = root.to_path_buf();
    tokio::task::spawn_blocking(move || scan(&root, &matcher))
        .await
        .context("plugin scan task failed")
}

async fn candidates_under(root: &Path) -> anyhow::Result<Vec<PathBuf>> {
    candidates(root, &format!("**/{MANIFEST_FILE}")).await
}

fn scan(root: &Path, matcher: &GlobMatcher) -> Vec<PathBuf> {
    if !root.is_dir() {
        return Vec::new();
    }

    let mut dirs = Vec::new();
    let walker = WalkDir::new(root)
        .follow_links(false)
        .into_iter()
        .filter_entry(|entry| entry.depth() == 0 || !is_skipped(entry));
    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) => {
                warn!(error = %err, "error walking plugins directory");
                continue;
            }
        };
        if !entry.file_type().is_file() || entry.file_name() != MANIFEST_FILE {
            continue;
        }
        let Ok(relative) = entry.path().strip_prefix(root) else {
            continue;
        };
        if matcher.is_match(relative) {
            if let Some(parent) = entry.path().parent() {
                dirs.push(parent.to_path_buf());
            }
        }
    }
    dirs.sort();
    dirs
}

fn is_skipped(entry: &DirEntry) -> bool {
    let name = entry.file_name().to_string_lossy();
    name.starts_with('.') || name == "node_modules"
}

/// Entry file under `dir`, trying `dir/<main>` then `dir/src/<main>`.
fn resolve_entry(dir: &Path, main: &str) -> anyhow::Result<PathBuf> {
    let dir = dir
        .canonicalize()
        .with_context(|| format!("failed to resolve plugin directory {}", dir.display()))?;
    for candidate in [dir.join(main), dir.join("src").join(main)] {
        let Ok(resolved) = candidate.canonicalize() else {
            continue;
        };
        if !resolved.starts_with(&dir) {
            bail!("entry `{main}` resolves outside {}", dir.display());
        }
        if resolved.is_file() {
            return Ok(resolved);
        }
    }
    bail!("no entry file `{main}` in {} or its src directory", dir.display())
}

fn is_strictly_inside(path: &Path, root: &Path) -> bool {
    path != root && path.starts_with(root)
}

fn normalize_lexically(path: &Path) -> PathBuf {
    let mut normalized = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                normalized.pop();
            }
            other => normalized.push(other),
        }
    }
    normalized
}
