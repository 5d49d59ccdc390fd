use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

use super::AppConfig;
use crate::error::{AppError, Result};

/// Configuration loaded from a TOML file
///
/// The config is validated once and shared read-only afterwards.
#[derive(Clone)]
pub struct ConfigStore {
    path: Option<PathBuf>,
    config: Arc<AppConfig>,
}

impl ConfigStore {
    /// Load `path`; a missing file yields the defaults
    pub async fn load(path: &Path) -> Result<Self> {
        let config = Self::read_file(path).await?;
        Ok(Self {
            path: Some(path.to_path_buf()),
            config: Arc::new(config),
        })
    }

    /// Store without a backing file
    pub fn in_memory(config: AppConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            path: None,
            config: Arc::new(config),
        })
    }

    async fn read_file(path: &Path) -> Result<AppConfig> {
        let text = match tokio::fs::read_to_string(path).await {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!("Config file {} not found, using defaults", path.display());
                return Ok(AppConfig::default());
            }
            Err(e) => return Err(e.into()),
        };

        let config: AppConfig = toml::from_str(&text)
            .map_err(|e| AppError::Config(format!("{}: {}", path.display(), e)))?;
        config.validate()?;
        info!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    pub fn get(&self) -> Arc<AppConfig> {
        self.config.clone()
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Effective configuration rendered as TOML, defaults included
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(&*self.config)
            .map_err(|e| AppError::Config(format!("serialize: {}", e)))
    }

    /// Write the effective configuration to the backing file
    pub async fn save(&self) -> Result<PathBuf> {
        let Some(path) = &self.path else {
            return Err(AppError::Config("no config file to save to".into()));
        };
        let text = self.to_toml()?;
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        tokio::fs::write(path, text).await?;
        info!("Wrote configuration to {}", path.display());
        Ok(path.clone())
    }
}
