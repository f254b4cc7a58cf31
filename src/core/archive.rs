/// Archive task runner: tar invocations for capture and restore
///
/// tar runs inside a throwaway container built from `archiver_image`. The
/// command is an argument vector handed straight to the engine, never a shell.

use std::path::{Path, PathBuf};

use crate::core::error::{BackupError, Result};
use crate::core::runtime::{BindMode, BindMount, TaskRunner, TaskSpec};
use crate::core::snapshot::CapturePlan;
use crate::utils::{
    format_bytes, AppConfig, TASK_ARCHIVE_PATH, TASK_DEST_PATH, TASK_ENVIRONMENT, TASK_SOURCE_PATH,
};

#[derive(Debug, Clone)]
pub struct ArchiveTasks {
    image: String,
}

impl ArchiveTasks {
    pub fn new(image: impl Into<String>) -> Self {
        Self { image: image.into() }
    }

    pub fn from_config(config: &AppConfig) -> Self {
        Self::new(config.archiver_image.clone())
    }

    /// tar --create for `volume` into the plan's endpoint, using the staged manifest and archive names
    pub fn capture_task(&self, plan: &CapturePlan, volume: &str) -> TaskSpec {
        let command = vec![
            "tar".to_string(),
            "--totals".to_string(),
            "--verbose".to_string(),
            "--verbose".to_string(),
            format!("--listed-incremental={}/{}", TASK_DEST_PATH, plan.staged_manifest_name()),
            "--create".to_string(),
            "--gzip".to_string(),
            format!("--file={}/{}", TASK_DEST_PATH, plan.staged_archive_name()),
            format!("--directory={}", TASK_SOURCE_PATH),
            "./".to_string(),
        ];

        TaskSpec {
            tool: "tar".to_string(),
            image: self.image.clone(),
            command,
            binds: vec![
                BindMount::new(volume, TASK_SOURCE_PATH, BindMode::ReadWrite),
                BindMount::new(plan.endpoint.to_string_lossy(), TASK_DEST_PATH, BindMode::ReadWrite),
            ],
            env: task_env(),
        }
    }

    /// tar --extract of `archive` into `target_volume`; no incremental tracking on restore
    pub fn restore_task(&self, archive: &Path, target_volume: &str) -> Result<TaskSpec> {
        let archive_name = archive
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| BackupError::ArchiveNotFound(archive.to_path_buf()))?;
        let in_task = format!("{}/{}", TASK_ARCHIVE_PATH, archive_name);

        let command = vec![
            "tar".to_string(),
            "--listed-incremental=/dev/null".to_string(),
            "--verbose".to_string(),
            "--totals".to_string(),
            "--gzip".to_string(),
            "--extract".to_string(),
            format!("--file={}", in_task),
            format!("--directory={}", TASK_SOURCE_PATH),
        ];

        Ok(TaskSpec {
            tool: "tar".to_string(),
            image: self.image.clone(),
            command,
            binds: vec![
                BindMount::new(target_volume, TASK_SOURCE_PATH, BindMode::ReadWrite),
                BindMount::new(archive.to_string_lossy(), in_task, BindMode::ReadOnly),
            ],
            env: task_env(),
        })
    }

    /// Run the capture and commit the plan on success; a failed capture leaves no partial files
    pub async fn run_capture<T: TaskRunner>(
        &self,
        runner: &T,
        plan: &CapturePlan,
        volume: &str,
    ) -> Result<PathBuf> {
        let task = self.capture_task(plan, volume);
        tracing::info!(
            "Creating {} archive {} of volume {}",
            plan.kind,
            plan.archive_name,
            volume
        );

        if let Err(e) = runner.run_task(&task).await {
            plan.abandon();
            return Err(e);
        }

        let archive = match plan.commit() {
            Ok(archive) => archive,
            Err(e) => {
                plan.abandon();
                return Err(e);
            }
        };

        match std::fs::metadata(&archive) {
            Ok(meta) => tracing::info!("Archive {} written ({})", archive.display(), format_bytes(meta.len())),
            Err(_) => tracing::info!("Archive {} written", archive.display()),
        }

        Ok(archive)
    }

    pub async fn run_restore<T: TaskRunner>(
        &self,
        runner: &T,
        archive: &Path,
        target_volume: &str,
    ) -> Result<()> {
        let task = self.restore_task(archive, target_volume)?;
        tracing::info!("Restoring {} into volume {}", archive.display(), target_volume);
        runner.run_task(&task).await
    }
}

fn task_env() -> Vec<String> {
    TASK_ENVIRONMENT.iter().map(|s| s.to_string()).collect()
}
