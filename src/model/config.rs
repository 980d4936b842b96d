use anyhow::{Context, Result, anyhow};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

const DEFAULTS: &str = include_str!("../../config/default.toml");

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub general: GeneralConfig,
    pub registry: RegistryConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GeneralConfig {
    pub base_path: String,
    pub runtime_dir: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RegistryConfig {
    pub mirror_path: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    pub filter: String,
    pub directory: String,
}

impl AppConfig {
    /// Load configuration with layering: defaults → user config → explicit file.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let mut layered: toml::Value = toml::from_str(DEFAULTS)?;

        if let Some(proj_dirs) = directories::ProjectDirs::from("", "", "plugin-store") {
            let config_path = proj_dirs.config_dir().join("config.toml");
            if config_path.exists() {
                merge(&mut layered, read_layer(&config_path)?);
            }
        }

        if let Some(path) = explicit {
            merge(&mut layered, read_layer(path)?);
        }

        let mut config: AppConfig = layered.try_into()?;
        config.expand_home()?;
        Ok(config)
    }

    pub fn defaults() -> Result<Self> {
        Ok(toml::from_str(DEFAULTS)?)
    }

    pub fn with_base_path(mut self, base_path: &Path) -> Self {
        self.general.base_path = base_path.to_string_lossy().into_owned();
        self
    }

    pub fn base_path(&self) -> PathBuf {
        PathBuf::from(&self.general.base_path)
    }

    /// Root directory holding `<space>/<identifier>` plugin folders.
    pub fn plugin_root(&self) -> PathBuf {
        self.base_path().join("plugin")
    }

    pub fn runtime_path(&self) -> PathBuf {
        self.base_path().join(&self.general.runtime_dir)
    }

    pub fn mirror_path(&self) -> PathBuf {
        PathBuf::from(&self.registry.mirror_path)
    }

    pub fn log_dir(&self) -> PathBuf {
        if !self.logging.directory.is_empty() {
            return PathBuf::from(&self.logging.directory);
        }

        directories::ProjectDirs::from("", "", "plugin-store")
            .map(|d| d.data_dir().to_path_buf())
            .unwrap_or_else(|| PathBuf::from("/tmp"))
    }

    fn expand_home(&mut self) -> Result<()> {
        for value in [
            &mut self.general.base_path,
            &mut self.registry.mirror_path,
            &mut self.logging.directory,
        ] {
            if value.starts_with('~') {
                let home = dirs_home().ok_or_else(|| anyhow!("cannot determine home directory"))?;
                *value = value.replacen('~', &home.to_string_lossy(), 1);
            }
        }
        Ok(())
    }
}

fn read_layer(path: &Path) -> Result<toml::Value> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("reading config {}", path.display()))?;
    toml::from_str(&raw).with_context(|| format!("parsing config {}", path.display()))
}

/// Overlay `layer` onto `base`, recursing into tables so partial files only
/// replace the keys they name.
fn merge(base: &mut toml::Value, layer: toml::Value) {
    match (base, layer) {
        (toml::Value::Table(base), toml::Value::Table(layer)) => {
            for (key, value) in layer {
                match base.get_mut(&key) {
                    Some(existing) => merge(existing, value),
                    None => {
                        base.insert(key, value);
                    }
                }
            }
        }
        (base, layer) => *base = layer,
    }
}

fn dirs_home() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|d| d.home_dir().to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_parse() {
        let config = AppConfig::defaults().unwrap();
        assert_eq!(config.general.runtime_dir, "runtime");
        assert_eq!(config.logging.filter, "plugin_store=info");
    }

    #[test]
    fn explicit_file_overrides_only_named_keys() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(
            &path,
            "[general]\nbase_path = \"/srv/host\"\n\n[logging]\nfilter = \"debug\"\n",
        )
        .unwrap();

        let config = AppConfig::load(Some(&path)).unwrap();
        assert_eq!(config.general.base_path, "/srv/host");
        assert_eq!(config.general.runtime_dir, "runtime");
        assert_eq!(config.logging.filter, "debug");
        assert_eq!(config.plugin_root(), PathBuf::from("/srv/host/plugin"));
        assert_eq!(config.runtime_path(), PathBuf::from("/srv/host/runtime"));
    }

    #[test]
    fn tilde_is_expanded() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "[registry]\nmirror_path = \"~/mirror\"\n").unwrap();

        let config = AppConfig::load(Some(&path)).unwrap();
        assert!(!config.registry.mirror_path.starts_with('~'));
        assert!(config.registry.mirror_path.ends_with("mirror"));
    }

    #[test]
    fn missing_explicit_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(AppConfig::load(Some(&dir.path().join("absent.toml"))).is_err());
    }
}
