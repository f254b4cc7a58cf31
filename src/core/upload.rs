/// Upload of a backup endpoint to remote storage with rclone

use std::path::{Path, PathBuf};

use crate::core::error::Result;
use crate::core::runtime::{BindMode, BindMount, TaskRunner, TaskSpec};
use crate::utils::{is_file_readable, UploadConfig, RCLONE_CONFIG_MOUNT, TASK_DEST_PATH};

#[derive(Debug, Clone)]
pub struct Uploader {
    image: String,
    remote: String,
    rclone_config: PathBuf,
}

impl Uploader {
    pub fn new(image: impl Into<String>, remote: impl Into<String>, rclone_config: impl Into<PathBuf>) -> Self {
        Self {
            image: image.into(),
            remote: remote.into(),
            rclone_config: rclone_config.into(),
        }
    }

    pub fn from_config(config: &UploadConfig) -> Self {
        Self::new(config.image.clone(), config.remote.clone(), config.rclone_config.clone())
    }

    /// The rclone config must exist on the host; binding a missing path would
    /// make the engine create a directory in its place.
    pub fn has_rclone_config(&self) -> bool {
        is_file_readable(&self.rclone_config)
    }

    pub fn rclone_config(&self) -> &Path {
        &self.rclone_config
    }

    /// `<remote root><container>/<volume>`
    pub fn remote_destination(&self, container: &str, volume: &str) -> String {
        let root = self.remote.trim_end_matches('/');
        if root.ends_with(':') {
            format!("{}{}/{}", root, container, volume)
        } else {
            format!("{}/{}/{}", root, container, volume)
        }
    }

    pub fn sync_task(&self, endpoint: &Path, destination: &str) -> TaskSpec {
        TaskSpec {
            tool: "rclone".to_string(),
            image: self.image.clone(),
            command: vec![
                "sync".to_string(),
                "--progress".to_string(),
                TASK_DEST_PATH.to_string(),
                destination.to_string(),
            ],
            binds: vec![
                BindMount::new(self.rclone_config.to_string_lossy(), RCLONE_CONFIG_MOUNT, BindMode::ReadWrite),
                BindMount::new(endpoint.to_string_lossy(), TASK_DEST_PATH, BindMode::ReadWrite),
            ],
            env: Vec::new(),
        }
    }

    /// Mirror `endpoint` to `destination`. Local archives are kept whatever happens.
    pub async fn upload<T: TaskRunner>(&self, runner: &T, endpoint: &Path, destination: &str) -> Result<()> {
        tracing::info!("Uploading {} to {}", endpoint.display(), destination);
        runner.run_task(&self.sync_task(endpoint, destination)).await
    }
}
