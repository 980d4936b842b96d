pub mod model;
pub mod plugin;

pub use model::config::AppConfig;
pub use plugin::{AppStoreError, AppStoreService, FsRegistry, PluginRegistry, PluginRequest};
