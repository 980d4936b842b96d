use std::collections::BTreeMap;
use std::fs;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

use crate::model::config::AppConfig;
use crate::plugin::archive;
use crate::plugin::error::{AppStoreError, UploadError};
use crate::plugin::manifest::{ManifestSummary, PluginKey, PluginRequest};
use crate::plugin::registry::PluginRegistry;

/// Admin-facing plugin lifecycle: download, install, uninstall, list and
/// upload. Package handling is delegated to the injected registry; this type
/// validates requests, reads the install marker and maps failures to
/// user-facing errors.
#[derive(Debug)]
pub struct AppStoreService<R: PluginRegistry> {
    registry: R,
    plugin_root: PathBuf,
    runtime_dir: PathBuf,
}

impl<R: PluginRegistry> AppStoreService<R> {
    pub fn new(registry: R, plugin_root: impl Into<PathBuf>, runtime_dir: impl Into<PathBuf>) -> Self {
        Self {
            registry,
            plugin_root: plugin_root.into(),
            runtime_dir: runtime_dir.into(),
        }
    }

    pub fn from_config(registry: R, config: &AppConfig) -> Self {
        Self::new(registry, config.plugin_root(), config.runtime_path())
    }

    pub fn registry(&self) -> &R {
        &self.registry
    }

    pub fn plugin_root(&self) -> &Path {
        &self.plugin_root
    }

    pub fn is_installed(&self, key: &PluginKey) -> bool {
        key.marker_in(&self.plugin_root).exists()
    }

    // ── Registry-backed operations ───────────────────────────────

    /// Fetch the package unless its directory already exists. An existing
    /// directory is trusted as-is; its contents are not verified.
    pub fn download(&mut self, request: &PluginRequest) -> Result<(), AppStoreError> {
        let (key, version) = request.validate()?;

        if key.dir_in(&self.plugin_root).is_dir() {
            tracing::info!("plugin {key} already present, skipping download");
            return Ok(());
        }

        match self.registry.fetch(&key.space, &key.identifier, &version) {
            Ok(true) => {
                tracing::info!("downloaded plugin {key}@{version}");
                Ok(())
            }
            Ok(false) => {
                tracing::warn!("registry could not provide plugin {key}@{version}");
                Err(AppStoreError::DownloadFailed)
            }
            Err(err) => {
                tracing::warn!("download of plugin {key}@{version} failed: {err}");
                Err(AppStoreError::DownloadFailed)
            }
        }
    }

    pub fn install(&mut self, request: &PluginRequest) -> Result<(), AppStoreError> {
        let (key, _version) = request.validate()?;

        if self.is_installed(&key) {
            return Err(AppStoreError::AlreadyInstalled);
        }

        self.registry.refresh_index();
        self.registry.install(&key).map_err(|err| {
            tracing::warn!("install of plugin {key} failed: {err}");
            AppStoreError::InstallFailed(err.to_string())
        })
    }

    pub fn uninstall(&mut self, request: &PluginRequest) -> Result<(), AppStoreError> {
        let (key, _version) = request.validate()?;

        if !self.is_installed(&key) {
            return Err(AppStoreError::NotInstalled);
        }

        self.registry.refresh_index();
        self.registry.uninstall(&key).map_err(|err| {
            tracing::warn!("uninstall of plugin {key} failed: {err}");
            AppStoreError::UninstallFailed(err.to_string())
        })
    }

    /// Manifest name → `{status, version}` for every readable manifest.
    /// Later manifests with the same name replace earlier ones.
    pub fn list_installed(&mut self) -> BTreeMap<String, ManifestSummary> {
        let mut items = BTreeMap::new();
        for path in self.registry.manifest_paths() {
            if let Some(manifest) = self.registry.read_manifest(&path) {
                items.insert(manifest.name.clone(), manifest.summary());
            }
        }
        items
    }

    // ── Local upload ─────────────────────────────────────────────

    /// Stage an uploaded archive, unpack it under the name its manifest
    /// declares and install it.
    pub fn upload_and_install(&mut self, upload: impl Read) -> Result<PluginKey, AppStoreError> {
        self.run_upload(upload).map_err(|err| {
            tracing::warn!(step = ?err.step(), "plugin upload failed: {err}");
            AppStoreError::from(err)
        })
    }

    fn run_upload(&mut self, mut upload: impl Read) -> Result<PluginKey, UploadError> {
        fs::create_dir_all(&self.runtime_dir).map_err(UploadError::Persist)?;
        let mut staged = tempfile::Builder::new()
            .prefix("plugin-upload")
            .suffix(".zip")
            .tempfile_in(&self.runtime_dir)
            .map_err(UploadError::Persist)?;
        io::copy(&mut upload, staged.as_file_mut()).map_err(UploadError::Persist)?;
        staged.as_file_mut().flush().map_err(UploadError::Persist)?;

        let mut package = archive::open(staged.path()).map_err(UploadError::CorruptArchive)?;
        let manifest = archive::read_manifest(&mut package).map_err(UploadError::InvalidManifest)?;
        let key = manifest.key().ok_or_else(|| {
            UploadError::InvalidManifest(format!(
                "name {:?} is not of the form space/identifier",
                manifest.name
            ))
        })?;

        let dest = key.dir_in(&self.plugin_root);
        let written = archive::extract_fresh(&mut package, &dest)
            .map_err(|err| UploadError::Extract(err.to_string()))?;
        tracing::info!("extracted {written} files into {}", dest.display());
        drop(package);

        self.registry.refresh_index();
        self.registry.install(&key).map_err(UploadError::Install)?;

        if let Err(err) = staged.close() {
            tracing::debug!("could not remove staged upload: {err}");
        }

        tracing::info!("uploaded and installed plugin {key} {}", manifest.version);
        Ok(key)
    }
}
