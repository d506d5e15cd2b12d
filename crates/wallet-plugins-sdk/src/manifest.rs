use std::{fmt, str::FromStr, sync::OnceLock};

use regex::Regex;
use semver::Version;
use serde::{Deserialize, Serialize};

/// Key of the host-specific block inside a plugin's `package.json`.
pub const HOST_BLOCK_KEY: &str = "desktop-wallet";

/// Capability classes a plugin can ask the host for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Permission {
    Filesystem,
    Store,
    Profile,
    Timers,
}

impl Permission {
    pub const ALL: [Permission; 4] = [
        Permission::Filesystem,
        Permission::Store,
        Permission::Profile,
        Permission::Timers,
    ];

    pub const fn as_str(&self) -> &'static str {
        match self {
            Permission::Filesystem => "FILESYSTEM",
            Permission::Store => "STORE",
            Permission::Profile => "PROFILE",
            Permission::Timers => "TIMERS",
        }
    }
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Permission {
    type Err = ManifestError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Permission::ALL
            .into_iter()
            .find(|permission| permission.as_str() == value)
            .ok_or_else(|| ManifestError::UnknownPermission(value.to_string()))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ManifestError {
    #[error("manifest is not valid JSON: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("manifest `name` must not be empty")]
    MissingName,
    #[error("`{0}` is not a valid package name")]
    InvalidName(String),
    #[error("plugin `{name}` has an invalid version `{version}`: {source}")]
    InvalidVersion {
        name: String,
        version: String,
        source: semver::Error,
    },
    #[error("plugin `{name}` has an invalid minimumVersion `{version}`: {source}")]
    InvalidMinimumVersion {
        name: String,
        version: String,
        source: semver::Error,
    },
    #[error("unknown permission `{0}`")]
    UnknownPermission(String),
}

/// `package.json` as written by plugin authors, before validation.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawManifest {
    name: String,
    version: String,
    description: Option<String>,
    main: Option<String>,
    keywords: Vec<String>,
    #[serde(rename = "desktop-wallet")]
    host: RawHostBlock,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default, rename_all = "camelCase")]
struct RawHostBlock {
    title: Option<String>,
    permissions: Vec<String>,
    categories: Vec<String>,
    minimum_version: Option<String>,
}

/// Validated plugin identity and the permissions it declares.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PluginManifest {
    name: String,
    version: Version,
    description: Option<String>,
    main: Option<String>,
    keywords: Vec<String>,
    title: Option<String>,
    categories: Vec<String>,
    permissions: Vec<Permission>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    unknown_permissions: Vec<String>,
    minimum_version: Option<Version>,
}

impl PluginManifest {
    pub fn from_json(raw: &str) -> Result<Self, ManifestError> {
        let raw: RawManifest = serde_json::from_str(raw)?;
        Self::validate(raw)
    }

    fn validate(raw: RawManifest) -> Result<Self, ManifestError> {
        let name = raw.name.trim().to_string();
        if name.is_empty() {
            return Err(ManifestError::MissingName);
        }
        if !is_valid_package_name(&name) {
            return Err(ManifestError::InvalidName(name));
        }

        let version =
            Version::parse(raw.version.trim()).map_err(|source| ManifestError::InvalidVersion {
                name: name.clone(),
                version: raw.version.clone(),
                source,
            })?;

        let minimum_version = raw
            .host
            .minimum_version
            .as_deref()
            .map(|min| {
                Version::parse(min.trim()).map_err(|source| ManifestError::InvalidMinimumVersion {
                    name: name.clone(),
                    version: min.to_string(),
                    source,
                })
            })
            .transpose()?;

        let mut permissions = Vec::new();
        let mut unknown_permissions = Vec::new();
        for tag in raw.host.permissions {
            match tag.trim().parse::<Permission>() {
                Ok(permission) if !permissions.contains(&permission) => permissions.push(permission),
                Ok(_) => {}
                Err(_) => unknown_permissions.push(tag),
            }
        }

        Ok(Self {
            name,
            version,
            description: raw.description,
            main: raw.main.filter(|main| !main.trim().is_empty()),
            keywords: raw.keywords,
            title: raw.host.title,
            categories: raw.host.categories,
            permissions,
            unknown_permissions,
            minimum_version,
        })
    }

    /// Package name; unique per installed plugin.
    pub fn id(&self) -> &str {
        &self.name
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn version(&self) -> &Version {
        &self.version
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    /// Entry file declared by the package, if any.
    pub fn main(&self) -> Option<&str> {
        self.main.as_deref()
    }

    pub fn keywords(&self) -> &[String] {
        &self.keywords
    }

    /// Human title, falling back to the package name.
    pub fn title(&self) -> &str {
        self.title.as_deref().unwrap_or(&self.name)
    }

    pub fn categories(&self) -> &[String] {
        &self.categories
    }

    pub fn permissions(&self) -> &[Permission] {
        &self.permissions
    }

    /// Tags the host does not recognize. They grant nothing.
    pub fn unknown_permissions(&self) -> &[String] {
        &self.unknown_permissions
    }

    pub fn requires_permission(&self, permission: Permission) -> bool {
        self.permissions.contains(&permission)
    }

    pub fn minimum_version(&self) -> Option<&Version> {
        self.minimum_version.as_ref()
    }

    pub fn is_compatible_with(&self, host_version: &Version) -> bool {
        self.minimum_version
            .as_ref()
            .map_or(true, |min| host_version >= min)
    }
}

fn is_valid_package_name(name: &str) -> bool {
    static RE: OnceLock<Regex> = OnceLock::new();
    let regex = RE.get_or_init(|| {
        Regex::new(r"^(?:@[a-z0-9][a-z0-9._~-]*/)?[a-z0-9][a-z0-9._~-]*$").unwrap()
    });
    name.len() <= 214 && regex.is_match(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_host_block_permissions() {
        let manifest = PluginManifest::from_json(
            r#"{
                "name": "@payvo/theme-switcher",
                "version": "1.2.0",
                "main": "dist/index.js",
                "desktop-wallet": {
                    "title": "Theme Switcher",
                    "permissions": ["STORE", "FILESYSTEM", "STORE"],
                    "minimumVersion": "3.0.0"
                }
            }"#,
        )
        .unwrap();

        assert_eq!(manifest.id(), "@payvo/theme-switcher");
        assert_eq!(manifest.title(), "Theme Switcher");
        assert_eq!(manifest.main(), Some("dist/index.js"));
        assert_eq!(
            manifest.permissions(),
            &[Permission::Store, Permission::Filesystem]
        );
        assert!(manifest.requires_permission(Permission::Store));
        assert!(!manifest.requires_permission(Permission::Timers));
    }

    #[test]
    fn unknown_permissions_are_ignored() {
        let manifest = PluginManifest::from_json(
            r#"{"name": "probe", "version": "0.1.0", "desktop-wallet": {"permissions": ["LEDGER", "STORE"]}}"#,
        )
        .unwrap();

        assert_eq!(manifest.permissions(), &[Permission::Store]);
        assert_eq!(manifest.unknown_permissions(), &["LEDGER".to_string()]);
    }

    #[test]
    fn missing_host_block_grants_nothing() {
        let manifest =
            PluginManifest::from_json(r#"{"name": "bare", "version": "1.0.0"}"#).unwrap();
        assert!(manifest.permissions().is_empty());
        assert_eq!(manifest.title(), "bare");
    }

    #[test]
    fn rejects_invalid_identity() {
        assert!(matches!(
            PluginManifest::from_json(r#"{"version": "1.0.0"}"#),
            Err(ManifestError::MissingName)
        ));
        assert!(matches!(
            PluginManifest::from_json(r#"{"name": "Has Spaces", "version": "1.0.0"}"#),
            Err(ManifestError::InvalidName(_))
        ));
        assert!(matches!(
            PluginManifest::from_json(r#"{"name": "ok", "version": "one"}"#),
            Err(ManifestError::InvalidVersion { .. })
        ));
        assert!(matches!(
            PluginManifest::from_json(r#"{"name": "ok", "version": "1.0.0", "desktop-wallet": {"permissions": "STORE"}}"#),
            Err(ManifestError::Parse(_))
        ));
    }

    #[test]
    fn minimum_version_gates_compatibility() {
        let manifest = PluginManifest::from_json(
            r#"{"name": "gated", "version": "1.0.0", "desktop-wallet": {"minimumVersion": "3.1.0"}}"#,
        )
        .unwrap();

        assert!(manifest.is_compatible_with(&Version::new(3, 1, 0)));
        assert!(manifest.is_compatible_with(&Version::new(4, 0, 0)));
        assert!(!manifest.is_compatible_with(&Version::new(3, 0, 9)));
    }

    #[test]
    fn permission_tags_round_trip_through_strings() {
        for permission in Permission::ALL {
            assert_eq!(permission.as_str().parse::<Permission>().unwrap(), permission);
        }
        assert!("HTTP".parse::<Permission>().is_err());
    }
}
