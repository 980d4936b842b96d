use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;

use crate::plugin::error::AppStoreError;

/// File name of the manifest at the root of every plugin package.
pub const MANIFEST_FILE: &str = "mine.json";

/// Marker whose presence means the plugin is installed.
pub const INSTALL_MARKER: &str = "install.lock";

static SEGMENT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9][A-Za-z0-9._-]*$").expect("valid segment regex"));

/// `(space, identifier)`: the vendor namespace and the package name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PluginKey {
    pub space: String,
    pub identifier: String,
}

impl PluginKey {
    pub fn new(space: impl Into<String>, identifier: impl Into<String>) -> Self {
        Self {
            space: space.into(),
            identifier: identifier.into(),
        }
    }

    /// Parse a manifest name of the form `space/identifier`.
    pub fn parse(name: &str) -> Option<Self> {
        let (space, identifier) = name.split_once('/')?;
        if !is_path_segment(space) || !is_path_segment(identifier) {
            return None;
        }
        Some(Self::new(space, identifier))
    }

    /// Directory of this plugin below the plugin root.
    pub fn dir_in(&self, plugin_root: &Path) -> PathBuf {
        plugin_root.join(&self.space).join(&self.identifier)
    }

    pub fn marker_in(&self, plugin_root: &Path) -> PathBuf {
        self.dir_in(plugin_root).join(INSTALL_MARKER)
    }
}

impl fmt::Display for PluginKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.space, self.identifier)
    }
}

fn is_path_segment(value: &str) -> bool {
    SEGMENT_RE.is_match(value) && value != "." && value != ".."
}

/// Inbound request as posted by the admin panel. Every field is optional at
/// the boundary so that absence and emptiness fail the same way.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct PluginRequest {
    #[serde(default)]
    pub space: Option<String>,
    #[serde(default)]
    pub identifier: Option<String>,
    #[serde(default)]
    pub version: Option<String>,
}

impl PluginRequest {
    pub fn new(
        space: impl Into<String>,
        identifier: impl Into<String>,
        version: impl Into<String>,
    ) -> Self {
        Self {
            space: Some(space.into()),
            identifier: Some(identifier.into()),
            version: Some(version.into()),
        }
    }

    /// Require all three fields and return the key plus the advisory version.
    pub fn validate(&self) -> Result<(PluginKey, String), AppStoreError> {
        let field = |value: &Option<String>| {
            value
                .as_deref()
                .filter(|v| !v.is_empty())
                .map(str::to_string)
                .ok_or(AppStoreError::InvalidParameters)
        };

        let space = field(&self.space)?;
        let identifier = field(&self.identifier)?;
        let version = field(&self.version)?;

        // Segments become directory names.
        if !is_path_segment(&space) || !is_path_segment(&identifier) {
            return Err(AppStoreError::InvalidParameters);
        }

        Ok((PluginKey { space, identifier }, version))
    }
}

/// Contents of `mine.json`.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct PluginManifest {
    pub name: String,
    #[serde(default)]
    pub version: String,
    #[serde(default, deserialize_with = "status_flag")]
    pub status: i64,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default, rename = "type")]
    pub kind: Option<String>,
}

impl PluginManifest {
    pub fn from_slice(raw: &[u8]) -> serde_json::Result<Self> {
        serde_json::from_slice(raw)
    }

    pub fn key(&self) -> Option<PluginKey> {
        PluginKey::parse(&self.name)
    }

    pub fn summary(&self) -> ManifestSummary {
        ManifestSummary {
            status: self.status,
            version: self.version.clone(),
        }
    }
}

/// One row of the installed-plugin listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestSummary {
    pub status: i64,
    pub version: String,
}

// Hosts write `status` as either 0/1 or false/true.
fn status_flag<'de, D>(deserializer: D) -> Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Flag {
        Int(i64),
        Bool(bool),
    }

    Ok(match Flag::deserialize(deserializer)? {
        Flag::Int(value) => value,
        Flag::Bool(value) => i64::from(value),
    })
}
