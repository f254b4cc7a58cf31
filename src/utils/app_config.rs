/// Application configuration management
/// Stores operator settings in ~/.config/docker-volume-backup/config.toml

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::utils::{
    BACKUP_LOG_SUBDIR, DEFAULT_ARCHIVER_IMAGE, DEFAULT_BACKUP_ROOT, DEFAULT_EXCLUDED_VOLUMES,
    DEFAULT_MAX_DIFFERENTIALS, DEFAULT_REMOTE_STORAGE, DEFAULT_SYNC_IMAGE, RCLONE_CONFIG_SUBDIR,
    RESTORE_LOG_SUBDIR,
};

/// Which manifest a new differential is seeded from
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Lineage {
    /// The most recently produced manifest (highest differential, else the full one)
    #[default]
    Latest,
    /// Always the full baseline manifest
    Full,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UploadConfig {
    pub enabled: bool,
    /// rclone remote root, e.g. `docker-backup-vol:`
    pub remote: String,
    pub image: String,
    pub rclone_config: PathBuf,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            remote: DEFAULT_REMOTE_STORAGE.to_string(),
            image: DEFAULT_SYNC_IMAGE.to_string(),
            rclone_config: home_path(RCLONE_CONFIG_SUBDIR),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub backup_root: PathBuf,
    pub backup_log_dir: PathBuf,
    pub restore_log_dir: PathBuf,
    pub exclude_volumes: Vec<String>,
    pub max_differentials: u32,
    pub lineage: Lineage,
    pub archiver_image: String,
    pub upload: UploadConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            backup_root: PathBuf::from(DEFAULT_BACKUP_ROOT),
            backup_log_dir: home_path(BACKUP_LOG_SUBDIR),
            restore_log_dir: home_path(RESTORE_LOG_SUBDIR),
            exclude_volumes: DEFAULT_EXCLUDED_VOLUMES.iter().map(|s| s.to_string()).collect(),
            max_differentials: DEFAULT_MAX_DIFFERENTIALS,
            lineage: Lineage::default(),
            archiver_image: DEFAULT_ARCHIVER_IMAGE.to_string(),
            upload: UploadConfig::default(),
        }
    }
}

fn home_path(relative: &str) -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("/root"))
        .join(relative)
}

impl AppConfig {
    /// Get default config file path
    pub fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .context("Failed to get config directory")?
            .join("docker-volume-backup");

        Ok(config_dir.join("config.toml"))
    }

    /// Load configuration from the default location, falling back to defaults
    pub fn load() -> Result<Self> {
        let path = Self::config_path()?;
        if !path.exists() {
            return Ok(Self::default());
        }
        Self::load_from(&path)
    }

    /// Load configuration from an explicit file, which must exist
    pub fn load_from(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;

        let config: Self = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_differentials == 0 {
            return Err(anyhow!("max_differentials must be at least 1"));
        }
        if !self.backup_root.is_absolute() {
            return Err(anyhow!(
                "backup_root must be an absolute path, got {}",
                self.backup_root.display()
            ));
        }
        if self.archiver_image.trim().is_empty() {
            return Err(anyhow!("archiver_image cannot be empty"));
        }
        if self.upload.enabled && self.upload.remote.trim().is_empty() {
            return Err(anyhow!("upload.remote cannot be empty while upload is enabled"));
        }
        Ok(())
    }

    /// Whether a volume name is on the exclusion list (exact match)
    pub fn is_excluded(&self, volume: &str) -> bool {
        self.exclude_volumes.iter().any(|v| v == volume)
    }

    /// Backup endpoint for one (container, volume) pair
    pub fn endpoint_dir(&self, container: &str, volume: &str) -> PathBuf {
        self.backup_root.join(container).join(volume)
    }
}
