use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use ignore::WalkBuilder;

use crate::plugin::archive;
use crate::plugin::error::RegistryError;
use crate::plugin::manifest::{MANIFEST_FILE, PluginKey, PluginManifest};

/// Collaborator that owns plugin packages: fetching them, marking them
/// installed and indexing their manifests.
pub trait PluginRegistry {
    /// Fetch `space/identifier@version` into the plugin root. `Ok(false)`
    /// means the package is not available.
    fn fetch(
        &mut self,
        space: &str,
        identifier: &str,
        version: &str,
    ) -> Result<bool, RegistryError>;

    /// Drop any cached manifest index so the next lookup rescans.
    fn refresh_index(&mut self);

    fn install(&mut self, key: &PluginKey) -> Result<(), RegistryError>;

    fn uninstall(&mut self, key: &PluginKey) -> Result<(), RegistryError>;

    /// Paths of every discoverable manifest file.
    fn manifest_paths(&mut self) -> Vec<PathBuf>;

    /// Read a manifest; `None` when it is missing or unreadable.
    fn read_manifest(&self, path: &Path) -> Option<PluginManifest>;
}

/// Registry backed by the plugin directory and a local package mirror laid
/// out as `<mirror>/<space>/<identifier>/<version>.zip`.
#[derive(Debug)]
pub struct FsRegistry {
    root: PathBuf,
    mirror: PathBuf,
    index: Option<Vec<PathBuf>>,
}

impl FsRegistry {
    pub fn new(root: impl Into<PathBuf>, mirror: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            mirror: mirror.into(),
            index: None,
        }
    }

    fn mirror_archive(&self, space: &str, identifier: &str, version: &str) -> PathBuf {
        self.mirror
            .join(space)
            .join(identifier)
            .join(format!("{version}.zip"))
    }

    fn scan(&self) -> Vec<PathBuf> {
        if !self.root.is_dir() {
            return Vec::new();
        }

        let mut paths: Vec<PathBuf> = WalkBuilder::new(&self.root)
            .hidden(false)
            .git_ignore(false)
            .git_global(false)
            .git_exclude(false)
            .ignore(false)
            .parents(false)
            .build()
            .flatten()
            .filter(|entry| entry.file_name() == MANIFEST_FILE)
            .filter(|entry| entry.file_type().is_some_and(|ft| ft.is_file()))
            .map(|entry| entry.into_path())
            .collect();

        paths.sort();
        paths
    }

    fn installed_manifest(&self, key: &PluginKey) -> Result<PluginManifest, RegistryError> {
        let dir = key.dir_in(&self.root);
        if !dir.is_dir() {
            return Err(RegistryError::MissingPlugin(key.clone()));
        }

        let manifest_path = dir.join(MANIFEST_FILE);
        let raw = fs::read(&manifest_path)
            .map_err(|err| RegistryError::Manifest(format!("{}: {err}", manifest_path.display())))?;
        let manifest = PluginManifest::from_slice(&raw)
            .map_err(|err| RegistryError::Manifest(format!("{}: {err}", manifest_path.display())))?;

        if manifest.key().as_ref() != Some(key) {
            return Err(RegistryError::NameMismatch {
                key: key.clone(),
                declared: manifest.name,
            });
        }

        Ok(manifest)
    }
}

impl PluginRegistry for FsRegistry {
    fn fetch(
        &mut self,
        space: &str,
        identifier: &str,
        version: &str,
    ) -> Result<bool, RegistryError> {
        let source = self.mirror_archive(space, identifier, version);
        if !source.is_file() {
            tracing::warn!("package {} not found in mirror", source.display());
            return Ok(false);
        }

        let dest = PluginKey::new(space, identifier).dir_in(&self.root);
        let mut package = archive::open(&source)?;
        let written = archive::extract_fresh(&mut package, &dest)?;
        tracing::info!(
            "fetched {space}/{identifier}@{version} ({written} files) into {}",
            dest.display()
        );

        self.index = None;
        Ok(true)
    }

    fn refresh_index(&mut self) {
        self.index = None;
    }

    fn install(&mut self, key: &PluginKey) -> Result<(), RegistryError> {
        let manifest = self.installed_manifest(key)?;
        let marker = key.marker_in(&self.root);

        let mut file = match OpenOptions::new().write(true).create_new(true).open(&marker) {
            Ok(file) => file,
            Err(err) if err.kind() == ErrorKind::AlreadyExists => {
                return Err(RegistryError::AlreadyInstalled(key.clone()));
            }
            Err(err) => return Err(err.into()),
        };

        writeln!(file, "version={}", manifest.version)?;
        writeln!(file, "installed_at={}", chrono::Utc::now().to_rfc3339())?;

        tracing::info!("installed plugin {key} {}", manifest.version);
        Ok(())
    }

    fn uninstall(&mut self, key: &PluginKey) -> Result<(), RegistryError> {
        let marker = key.marker_in(&self.root);
        match fs::remove_file(&marker) {
            Ok(()) => {
                tracing::info!("uninstalled plugin {key}");
                Ok(())
            }
            Err(err) if err.kind() == ErrorKind::NotFound => {
                Err(RegistryError::NotInstalled(key.clone()))
            }
            Err(err) => Err(err.into()),
        }
    }

    fn manifest_paths(&mut self) -> Vec<PathBuf> {
        if let Some(paths) = self.index.as_ref() {
            return paths.clone();
        }

        let paths = self.scan();
        self.index = Some(paths.clone());
        paths
    }

    fn read_manifest(&self, path: &Path) -> Option<PluginManifest> {
        let raw = match fs::read(path) {
            Ok(raw) => raw,
            Err(err) => {
                tracing::debug!("cannot read manifest {}: {err}", path.display());
                return None;
            }
        };

        match PluginManifest::from_slice(&raw) {
            Ok(manifest) => Some(manifest),
            Err(err) => {
                tracing::debug!("cannot parse manifest {}: {err}", path.display());
                None
            }
        }
    }
}
