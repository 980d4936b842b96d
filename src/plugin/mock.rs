//! Mock plugin registry for unit testing.
//!
//! Records every call and returns pre-configured responses. With a root
//! directory attached it also mirrors the on-disk effects of fetch, install
//! and uninstall so lifecycle sequences can be exercised.

use std::fs;
use std::path::{Path, PathBuf};

use crate::plugin::error::RegistryError;
use crate::plugin::manifest::{PluginKey, PluginManifest};
use crate::plugin::registry::PluginRegistry;

/// A recorded call to the mock registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockCall {
    Fetch {
        space: String,
        identifier: String,
        version: String,
    },
    RefreshIndex,
    Install(PluginKey),
    Uninstall(PluginKey),
    ManifestPaths,
}

#[derive(Debug)]
pub struct MockRegistry {
    calls: Vec<MockCall>,
    root: Option<PathBuf>,
    fetch_result: bool,
    install_error: Option<String>,
    uninstall_error: Option<String>,
    manifests: Vec<(PathBuf, Option<PluginManifest>)>,
}

impl Default for MockRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl MockRegistry {
    pub fn new() -> Self {
        Self {
            calls: Vec::new(),
            root: None,
            fetch_result: true,
            install_error: None,
            uninstall_error: None,
            manifests: Vec::new(),
        }
    }

    /// Apply fetch/install/uninstall effects below `root`.
    pub fn with_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.root = Some(root.into());
        self
    }

    pub fn with_fetch_result(mut self, ok: bool) -> Self {
        self.fetch_result = ok;
        self
    }

    pub fn with_install_error(mut self, message: impl Into<String>) -> Self {
        self.install_error = Some(message.into());
        self
    }

    pub fn with_uninstall_error(mut self, message: impl Into<String>) -> Self {
        self.uninstall_error = Some(message.into());
        self
    }

    /// Serve `manifest` (or an unreadable entry for `None`) at `path`.
    pub fn with_manifest(
        mut self,
        path: impl Into<PathBuf>,
        manifest: Option<PluginManifest>,
    ) -> Self {
        self.manifests.push((path.into(), manifest));
        self
    }

    pub fn calls(&self) -> &[MockCall] {
        &self.calls
    }

    pub fn call_count(&self) -> usize {
        self.calls.len()
    }

    pub fn installs(&self) -> usize {
        self.calls
            .iter()
            .filter(|call| matches!(call, MockCall::Install(_)))
            .count()
    }

    pub fn uninstalls(&self) -> usize {
        self.calls
            .iter()
            .filter(|call| matches!(call, MockCall::Uninstall(_)))
            .count()
    }

    pub fn fetches(&self) -> usize {
        self.calls
            .iter()
            .filter(|call| matches!(call, MockCall::Fetch { .. }))
            .count()
    }
}

impl PluginRegistry for MockRegistry {
    fn fetch(
        &mut self,
        space: &str,
        identifier: &str,
        version: &str,
    ) -> Result<bool, RegistryError> {
        self.calls.push(MockCall::Fetch {
            space: space.to_string(),
            identifier: identifier.to_string(),
            version: version.to_string(),
        });

        if self.fetch_result {
            if let Some(root) = self.root.as_ref() {
                fs::create_dir_all(PluginKey::new(space, identifier).dir_in(root))?;
            }
        }
        Ok(self.fetch_result)
    }

    fn refresh_index(&mut self) {
        self.calls.push(MockCall::RefreshIndex);
    }

    fn install(&mut self, key: &PluginKey) -> Result<(), RegistryError> {
        self.calls.push(MockCall::Install(key.clone()));

        if let Some(message) = self.install_error.as_ref() {
            return Err(RegistryError::Other(message.clone()));
        }
        if let Some(root) = self.root.as_ref() {
            fs::create_dir_all(key.dir_in(root))?;
            fs::write(key.marker_in(root), b"")?;
        }
        Ok(())
    }

    fn uninstall(&mut self, key: &PluginKey) -> Result<(), RegistryError> {
        self.calls.push(MockCall::Uninstall(key.clone()));

        if let Some(message) = self.uninstall_error.as_ref() {
            return Err(RegistryError::Other(message.clone()));
        }
        if let Some(root) = self.root.as_ref() {
            fs::remove_file(key.marker_in(root))?;
        }
        Ok(())
    }

    fn manifest_paths(&mut self) -> Vec<PathBuf> {
        self.calls.push(MockCall::ManifestPaths);
        self.manifests.iter().map(|(path, _)| path.clone()).collect()
    }

    fn read_manifest(&self, path: &Path) -> Option<PluginManifest> {
        self.manifests
            .iter()
            .find(|(candidate, _)| candidate == path)
            .and_then(|(_, manifest)| manifest.clone())
    }
}
