pub mod archive;
pub mod error;
pub mod manifest;
#[cfg(any(test, feature = "mock"))]
pub mod mock;
pub mod registry;
pub mod service;

pub use error::{AppStoreError, RegistryError, UploadError, UploadStep};
pub use manifest::{ManifestSummary, PluginKey, PluginManifest, PluginRequest};
pub use registry::{FsRegistry, PluginRegistry};
pub use service::AppStoreService;
