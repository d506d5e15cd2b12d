use std::path::PathBuf;

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};

/// Environment variable that points discovery at a different plugins root
/// and makes it scan every package under it.
pub const PLUGINS_DIR_ENV: &str = "PLUGINS_DIR";

/// Root configuration structure deserialized from TOML.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct HostConfig {
    pub plugins: PluginsConfig,
    pub profiles: ProfilesConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PluginsConfig {
    pub root: PathBuf,
    pub fixtures_dir: Option<PathBuf>,
    pub development: bool,
    pub scan_all: bool,
}

impl Default for PluginsConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("plugins"),
            fixtures_dir: None,
            development: false,
            scan_all: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProfilesConfig {
    pub data_dir: PathBuf,
}

impl Default for ProfilesConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("profiles"),
        }
    }
}

impl HostConfig {
    /// Validates structural invariants and provides actionable error messages.
    pub fn validate(&self) -> Result<()> {
        self.plugins.validate()?;
        if self.profiles.data_dir.as_os_str().is_empty() {
            bail!("profiles.data_dir must not be empty");
        }
        Ok(())
    }

    /// Applies `PLUGINS_DIR` when it is set to a non-empty value.
    pub fn with_env_overrides(mut self) -> Self {
        if let Some(dir) = std::env::var_os(PLUGINS_DIR_ENV).filter(|dir| !dir.is_empty()) {
            self.plugins.apply_root_override(PathBuf::from(dir));
        }
        self
    }
}

impl PluginsConfig {
    pub fn validate(&self) -> Result<()> {
        if self.root.as_os_str().is_empty() {
            bail!("plugins.root must not be empty");
        }
        if self.development && self.fixtures_dir.is_none() {
            bail!("plugins.development requires plugins.fixtures_dir");
        }
        if let Some(fixtures) = &self.fixtures_dir {
            if fixtures.as_os_str().is_empty() {
                bail!("plugins.fixtures_dir must not be empty when set");
            }
        }
        Ok(())
    }

    pub fn apply_root_override(&mut self, root: PathBuf) {
        self.root = root;
        self.scan_all = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        HostConfig::default().validate().unwrap();
    }

    #[test]
    fn parses_toml_sections() {
        let cfg: HostConfig = toml::from_str(
            r#"
            [plugins]
            root = "/var/lib/wallet/plugins"
            fixtures_dir = "tests/fixtures/plugins"
            development = true

            [profiles]
            data_dir = "/var/lib/wallet/profiles"
            "#,
        )
        .unwrap();
        cfg.validate().unwrap();
        assert_eq!(cfg.plugins.root, PathBuf::from("/var/lib/wallet/plugins"));
        assert!(cfg.plugins.development);
        assert!(!cfg.plugins.scan_all);
    }

    #[test]
    fn development_requires_fixtures() {
        let mut cfg = HostConfig::default();
        cfg.plugins.development = true;
        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().contains("fixtures_dir"));
    }

    #[test]
    fn root_override_switches_to_scan_all() {
        let mut plugins = PluginsConfig::default();
        plugins.apply_root_override(PathBuf::from("/tmp/override"));
        assert_eq!(plugins.root, PathBuf::from("/tmp/override"));
        assert!(plugins.scan_all);
    }
}
