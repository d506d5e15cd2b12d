pub mod manifest;

pub use manifest::{ManifestError, Permission, PluginManifest, HOST_BLOCK_KEY};
pub use semver::Version;

/// File name every plugin package ships its manifest under.
pub const MANIFEST_FILE: &str = "package.json";

/// Entry file assumed when a manifest does not declare `main`.
pub const DEFAULT_ENTRY: &str = "index.js";
