/// Restore of one archive into one volume
///
/// Containers bound to the target volume are stopped and left stopped; the
/// operator restarts them once the restored data has been checked.

use std::path::{Path, PathBuf};

use crate::core::archive::ArchiveTasks;
use crate::core::error::{BackupError, Result};
use crate::core::runtime::{ContainerRuntime, TaskRunner};
use crate::utils::{has_archive_extension, is_file_readable, AppConfig};

/// Check the archive exists and is a `.tar.gz`; returns its absolute path
pub fn validate_archive(path: &Path) -> Result<PathBuf> {
    if !has_archive_extension(path) || !is_file_readable(path) {
        return Err(BackupError::ArchiveNotFound(path.to_path_buf()));
    }
    path.canonicalize().map_err(|e| BackupError::io(path, e))
}

#[derive(Debug, Clone, Default)]
pub struct RestoreReport {
    pub archive: PathBuf,
    pub volume: String,
    /// Containers this restore stopped
    pub stopped: Vec<String>,
}

pub struct RestoreManager<'a, R, T> {
    runtime: &'a R,
    tasks: &'a T,
    archiver: ArchiveTasks,
}

impl<'a, R: ContainerRuntime, T: TaskRunner> RestoreManager<'a, R, T> {
    pub fn new(runtime: &'a R, tasks: &'a T, config: &AppConfig) -> Self {
        Self {
            runtime,
            tasks,
            archiver: ArchiveTasks::from_config(config),
        }
    }

    pub async fn restore(&self, archive: &Path, volume: &str) -> Result<RestoreReport> {
        let archive = validate_archive(archive)?;
        let mut report = RestoreReport {
            archive: archive.clone(),
            volume: volume.to_string(),
            ..Default::default()
        };

        let containers = self.runtime.containers_using_volume(volume).await?;
        if containers.is_empty() {
            tracing::warn!("The volume {} is not bound to any containers on the host", volume);
        } else {
            tracing::info!("The volume {} is bound to:", volume);
            for container in &containers {
                tracing::info!(
                    "Container ID: {}, Name: {}, Status: {}",
                    container.id,
                    container.name,
                    container.state
                );

                if container.state.is_running() {
                    self.runtime.stop_container(&container.name).await?;
                    let state = self.runtime.container_state(&container.name).await?;
                    tracing::info!("Current state of {} is {}", container.name, state);
                    report.stopped.push(container.name.clone());
                }
            }
        }

        self.archiver.run_restore(self.tasks, &archive, volume).await?;
        tracing::info!("Volume {} restored from {}", volume, archive.display());
        if !report.stopped.is_empty() {
            tracing::info!("Containers left stopped: {}", report.stopped.join(", "));
        }

        Ok(report)
    }
}
