//! Error types for the plugin store.
//!
//! `AppStoreError` is what the admin panel sees. Precondition failures map to
//! fixed codes; collaborator failures are folded into a coarse variant that
//! keeps the original message. Upload failures additionally keep the pipeline
//! step that failed.

use thiserror::Error;

use crate::plugin::manifest::PluginKey;

#[derive(Debug, Error)]
pub enum AppStoreError {
    #[error("space, identifier and version are required")]
    InvalidParameters,

    #[error("plugin download failed")]
    DownloadFailed,

    #[error("plugin is already installed")]
    AlreadyInstalled,

    #[error("plugin is not installed")]
    NotInstalled,

    #[error("{0}")]
    InstallFailed(String),

    #[error("{0}")]
    UninstallFailed(String),

    #[error(transparent)]
    UploadInstallFailed(#[from] UploadError),
}

impl AppStoreError {
    /// Stable message key for the panel's translation table.
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidParameters => "params_fail",
            Self::DownloadFailed => "download_fail",
            Self::AlreadyInstalled => "app_installed",
            Self::NotInstalled => "app_not_installed",
            Self::InstallFailed(_) => "install_fail",
            Self::UninstallFailed(_) => "uninstall_fail",
            Self::UploadInstallFailed(_) => "upload_fail",
        }
    }
}

/// Step of the upload pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadStep {
    Persist,
    OpenArchive,
    ReadManifest,
    Extract,
    Install,
}

#[derive(Debug, Error)]
pub enum UploadError {
    #[error("failed to stage upload: {0}")]
    Persist(#[source] std::io::Error),

    #[error("failed to open the zip file: {0}")]
    CorruptArchive(#[source] zip::result::ZipError),

    #[error("invalid manifest: {0}")]
    InvalidManifest(String),

    #[error("failed to extract archive: {0}")]
    Extract(String),

    #[error("{0}")]
    Install(#[source] RegistryError),
}

impl UploadError {
    pub fn step(&self) -> UploadStep {
        match self {
            Self::Persist(_) => UploadStep::Persist,
            Self::CorruptArchive(_) => UploadStep::OpenArchive,
            Self::InvalidManifest(_) => UploadStep::ReadManifest,
            Self::Extract(_) => UploadStep::Extract,
            Self::Install(_) => UploadStep::Install,
        }
    }
}

/// Failures reported by a plugin registry.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("archive error: {0}")]
    Archive(#[from] zip::result::ZipError),

    #[error("manifest error: {0}")]
    Manifest(String),

    #[error("plugin {0} does not exist")]
    MissingPlugin(PluginKey),

    #[error("manifest at {key} declares name {declared:?}")]
    NameMismatch { key: PluginKey, declared: String },

    #[error("plugin {0} is already installed")]
    AlreadyInstalled(PluginKey),

    #[error("plugin {0} is not installed")]
    NotInstalled(PluginKey),

    #[error("{0}")]
    Other(String),
}
