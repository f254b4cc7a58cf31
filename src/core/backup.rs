/// Backup orchestration, one container at a time
///
/// For a container: find its eligible volumes, stop it if it is running,
/// capture and upload each volume in turn, then start it again. A failing
/// volume is logged and skipped; the restart happens regardless.

use std::path::PathBuf;

use crate::core::archive::ArchiveTasks;
use crate::core::error::Result;
use crate::core::runtime::{ContainerInfo, ContainerRuntime, TaskRunner};
use crate::core::snapshot::{CaptureKind, SnapshotTracker};
use crate::core::upload::Uploader;
use crate::core::volumes::{eligible_volumes, VolumeRef};
use crate::utils::AppConfig;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadStatus {
    Disabled,
    /// Upload enabled but the rclone config is missing on the host
    Skipped,
    Uploaded,
    Failed,
}

#[derive(Debug, Clone)]
pub enum VolumeOutcome {
    Captured {
        kind: CaptureKind,
        archive: PathBuf,
        upload: UploadStatus,
    },
    Skipped {
        reason: String,
    },
}

#[derive(Debug, Clone)]
pub struct VolumeReport {
    pub volume: String,
    pub outcome: VolumeOutcome,
}

#[derive(Debug, Clone, Default)]
pub struct ContainerReport {
    pub container: String,
    pub was_running: bool,
    pub restarted: bool,
    pub volumes: Vec<VolumeReport>,
}

impl ContainerReport {
    pub fn captured(&self) -> usize {
        self.volumes
            .iter()
            .filter(|v| matches!(v.outcome, VolumeOutcome::Captured { .. }))
            .count()
    }

    pub fn skipped(&self) -> usize {
        self.volumes.len() - self.captured()
    }
}

pub struct BackupManager<'a, R, T> {
    runtime: &'a R,
    tasks: &'a T,
    config: &'a AppConfig,
    tracker: SnapshotTracker,
    archiver: ArchiveTasks,
    uploader: Option<Uploader>,
}

impl<'a, R: ContainerRuntime, T: TaskRunner> BackupManager<'a, R, T> {
    pub fn new(runtime: &'a R, tasks: &'a T, config: &'a AppConfig) -> Self {
        let uploader = config
            .upload
            .enabled
            .then(|| Uploader::from_config(&config.upload));

        Self {
            runtime,
            tasks,
            config,
            tracker: SnapshotTracker::from_config(config),
            archiver: ArchiveTasks::from_config(config),
            uploader,
        }
    }

    /// Keep archives local for this run
    pub fn without_upload(mut self) -> Self {
        self.uploader = None;
        self
    }

    /// Back up every container in order. A container whose mounts cannot be
    /// read is logged and left alone; the run moves on.
    pub async fn backup_all(&self, containers: &[ContainerInfo]) -> Vec<ContainerReport> {
        let mut reports = Vec::new();
        for container in containers {
            match self.backup_container(container).await {
                Ok(report) => reports.push(report),
                Err(e) => tracing::error!("Skipping container {}: {}", container.name, e),
            }
        }
        reports
    }

    pub async fn backup_container(&self, container: &ContainerInfo) -> Result<ContainerReport> {
        let name = container.name.as_str();
        let volumes = eligible_volumes(self.runtime, name, self.config).await?;

        let mut report = ContainerReport {
            container: name.to_string(),
            ..Default::default()
        };

        if volumes.is_empty() {
            tracing::warn!("The {} container has no volumes to back up", name);
            return Ok(report);
        }

        tracing::info!("Creating a backup of {} container volumes", name);

        let state = self.runtime.container_state(name).await?;
        if state.is_running() {
            tracing::info!("Stopping {}", name);
            match self.runtime.stop_container(name).await {
                Ok(()) => report.was_running = true,
                Err(e) => {
                    // Capturing a live volume is not safe; leave the container as it is
                    tracing::error!("Failed to stop {}: {}. Skipping its volumes", name, e);
                    return Ok(report);
                }
            }
        }

        for volume in &volumes {
            let outcome = match self.backup_volume(name, volume).await {
                Ok(outcome) => outcome,
                Err(e) => {
                    if e.is_recoverable() {
                        tracing::warn!("Skipping volume {} of {}: {}", volume.name, name, e);
                    } else {
                        tracing::error!("Backup of volume {} of {} failed: {}", volume.name, name, e);
                    }
                    VolumeOutcome::Skipped { reason: e.to_string() }
                }
            };
            report.volumes.push(VolumeReport {
                volume: volume.name.clone(),
                outcome,
            });
        }

        if report.was_running {
            tracing::info!("Container {} starting", name);
            match self.runtime.start_container(name).await {
                Ok(()) => report.restarted = true,
                Err(e) => tracing::error!("Failed to restart {}: {}", name, e),
            }
        }

        tracing::info!(
            "Finished {}: {} volume(s) captured, {} skipped",
            name,
            report.captured(),
            report.skipped()
        );

        Ok(report)
    }

    async fn backup_volume(&self, container: &str, volume: &VolumeRef) -> Result<VolumeOutcome> {
        let endpoint = self.config.endpoint_dir(container, &volume.name);
        tracing::info!(
            "Creating a backup of the {} volume (mounted at {})",
            volume.name,
            volume.destination
        );

        let plan = self.tracker.plan_capture(&endpoint, &volume.name)?;
        let archive = self.archiver.run_capture(self.tasks, &plan, &volume.name).await?;

        let upload = match &self.uploader {
            None => UploadStatus::Disabled,
            Some(uploader) if !uploader.has_rclone_config() => {
                tracing::warn!(
                    "rclone config {} not found, skipping upload of volume {} of {}",
                    uploader.rclone_config().display(),
                    volume.name,
                    container
                );
                UploadStatus::Skipped
            }
            Some(uploader) => {
                let destination = uploader.remote_destination(container, &volume.name);
                match uploader.upload(self.tasks, &endpoint, &destination).await {
                    Ok(()) => UploadStatus::Uploaded,
                    Err(e) => {
                        tracing::error!(
                            "Upload of volume {} of {} failed, keeping local archive {}: {}",
                            volume.name,
                            container,
                            archive.display(),
                            e
                        );
                        UploadStatus::Failed
                    }
                }
            }
        };

        Ok(VolumeOutcome::Captured {
            kind: plan.kind,
            archive,
            upload,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::runtime::{MountInfo, MountKind};
    use crate::core::testing::{FakeRuntime, FakeTasks};
    use crate::utils::ContainerState;
    use std::fs;
    use std::path::Path;

    fn config(root: &Path) -> AppConfig {
        AppConfig {
            backup_root: root.to_path_buf(),
            ..Default::default()
        }
    }

    /// Config with upload enabled and an rclone config present under `root`
    fn upload_config(root: &Path) -> AppConfig {
        let mut config = config(root);
        let rclone_config = root.join("rclone.conf");
        fs::write(&rclone_config, b"[docker-backup-vol]\ntype = local\n").unwrap();
        config.upload.enabled = true;
        config.upload.rclone_config = rclone_config;
        config
    }

    fn info(runtime: &FakeRuntime, name: &str) -> ContainerInfo {
        ContainerInfo {
            id: format!("{}-id", name),
            name: name.to_string(),
            image: "busybox".to_string(),
            state: runtime.state_of(name),
        }
    }

    fn names_in(dir: &Path) -> Vec<String> {
        let mut names: Vec<String> = fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
            .collect();
        names.sort();
        names
    }

    #[tokio::test]
    async fn test_web_scenario_skips_excluded_volume() {
        let root = tempfile::tempdir().unwrap();
        let config = config(root.path());
        let runtime = FakeRuntime::new();
        runtime.add_container(
            "web",
            ContainerState::Running,
            vec![
                FakeRuntime::volume("web_data", "/var/www"),
                FakeRuntime::volume("npm-letsencrypt", "/etc/letsencrypt"),
            ],
        );
        let tasks = FakeTasks::new();

        let manager = BackupManager::new(&runtime, &tasks, &config);
        let report = manager.backup_container(&info(&runtime, "web")).await.unwrap();

        assert_eq!(report.captured(), 1);
        assert_eq!(report.volumes[0].volume, "web_data");
        assert_eq!(names_in(root.path()), vec!["web"]);
        assert_eq!(names_in(&root.path().join("web")), vec!["web_data"]);
        assert!(tasks
            .tasks()
            .iter()
            .all(|t| t.binds.iter().all(|b| !b.source.contains("npm-letsencrypt"))));
        assert_eq!(runtime.calls(), vec!["stop web", "start web"]);
        assert_eq!(runtime.state_of("web"), ContainerState::Running);
    }

    #[tokio::test]
    async fn test_db_chain_until_retention() {
        let root = tempfile::tempdir().unwrap();
        let config = config(root.path());
        let runtime = FakeRuntime::new();
        runtime.add_container("db", ContainerState::Running, vec![FakeRuntime::volume("db", "/var/lib/db")]);
        let tasks = FakeTasks::new();
        let manager = BackupManager::new(&runtime, &tasks, &config).without_upload();
        let endpoint = root.path().join("db").join("db");

        let mut kinds = Vec::new();
        for _ in 0..3 {
            let report = manager.backup_container(&info(&runtime, "db")).await.unwrap();
            match &report.volumes[0].outcome {
                VolumeOutcome::Captured { kind, upload, .. } => {
                    assert_eq!(upload, &UploadStatus::Disabled);
                    kinds.push(*kind);
                }
                other => panic!("unexpected outcome {:?}", other),
            }
        }
        assert_eq!(
            kinds,
            vec![CaptureKind::Full, CaptureKind::Differential(1), CaptureKind::Differential(2)]
        );

        let manifests: Vec<String> = names_in(&endpoint).into_iter().filter(|n| n.ends_with(".snar")).collect();
        assert_eq!(manifests, vec!["db_diff1.snar", "db_diff2.snar", "db_full.snar"]);
        // Each manifest carries the lineage it was seeded from plus its own capture
        assert_eq!(fs::read_to_string(endpoint.join("db_full.snar")).unwrap(), "captured\n");
        assert_eq!(fs::read_to_string(endpoint.join("db_diff1.snar")).unwrap(), "captured\ncaptured\n");
        assert_eq!(fs::read_to_string(endpoint.join("db_diff2.snar")).unwrap(), "captured\ncaptured\ncaptured\n");

        let before = names_in(&endpoint);
        let report = manager.backup_container(&info(&runtime, "db")).await.unwrap();
        assert!(matches!(report.volumes[0].outcome, VolumeOutcome::Skipped { .. }));
        assert_eq!(names_in(&endpoint), before);
        assert!(report.restarted);
        assert_eq!(runtime.state_of("db"), ContainerState::Running);
    }

    #[tokio::test]
    async fn test_restart_even_when_every_volume_fails() {
        let root = tempfile::tempdir().unwrap();
        let config = config(root.path());
        let runtime = FakeRuntime::new();
        runtime.add_container(
            "app",
            ContainerState::Running,
            vec![FakeRuntime::volume("app_a", "/a"), FakeRuntime::volume("app_b", "/b")],
        );
        let tasks = FakeTasks::new();
        tasks.fail_when("--create");

        let report = BackupManager::new(&runtime, &tasks, &config)
            .backup_container(&info(&runtime, "app"))
            .await
            .unwrap();

        assert_eq!(report.captured(), 0);
        assert_eq!(report.skipped(), 2);
        assert!(report.restarted);
        assert_eq!(runtime.state_of("app"), ContainerState::Running);
        // Both volumes were attempted, no upload followed a failed capture
        assert_eq!(tasks.tasks().len(), 2);
        assert!(tasks.tasks().iter().all(|t| t.tool == "tar"));
    }

    #[tokio::test]
    async fn test_upload_failure_keeps_archive() {
        let root = tempfile::tempdir().unwrap();
        let config = upload_config(root.path());
        let runtime = FakeRuntime::new();
        runtime.add_container("web", ContainerState::Stopped, vec![FakeRuntime::volume("web_data", "/srv")]);
        let tasks = FakeTasks::new();
        tasks.fail_when("docker-backup-vol:");

        let report = BackupManager::new(&runtime, &tasks, &config)
            .backup_container(&info(&runtime, "web"))
            .await
            .unwrap();

        match &report.volumes[0].outcome {
            VolumeOutcome::Captured { archive, upload, .. } => {
                assert_eq!(upload, &UploadStatus::Failed);
                assert!(archive.is_file());
            }
            other => panic!("unexpected outcome {:?}", other),
        }
        let sync = &tasks.tasks()[1];
        assert_eq!(sync.command[3], "docker-backup-vol:web/web_data");
    }

    #[tokio::test]
    async fn test_missing_rclone_config_skips_upload() {
        let root = tempfile::tempdir().unwrap();
        let mut config = config(root.path());
        config.upload.enabled = true;
        config.upload.rclone_config = root.path().join("missing").join("rclone.conf");
        let runtime = FakeRuntime::new();
        runtime.add_container("web", ContainerState::Stopped, vec![FakeRuntime::volume("web_data", "/srv")]);
        let tasks = FakeTasks::new();

        let report = BackupManager::new(&runtime, &tasks, &config)
            .backup_container(&info(&runtime, "web"))
            .await
            .unwrap();

        match &report.volumes[0].outcome {
            VolumeOutcome::Captured { archive, upload, .. } => {
                assert_eq!(upload, &UploadStatus::Skipped);
                assert!(archive.is_file());
            }
            other => panic!("unexpected outcome {:?}", other),
        }
        assert!(tasks.tasks().iter().all(|t| t.tool == "tar"));
        assert!(!root.path().join("missing").exists());
    }

    #[tokio::test]
    async fn test_stopped_container_is_not_started() {
        let root = tempfile::tempdir().unwrap();
        let config = config(root.path());
        let runtime = FakeRuntime::new();
        runtime.add_container("job", ContainerState::Stopped, vec![FakeRuntime::volume("job_data", "/data")]);
        let tasks = FakeTasks::new();

        let report = BackupManager::new(&runtime, &tasks, &config)
            .without_upload()
            .backup_container(&info(&runtime, "job"))
            .await
            .unwrap();

        assert_eq!(report.captured(), 1);
        assert!(!report.was_running);
        assert!(runtime.calls().is_empty());
        assert_eq!(runtime.state_of("job"), ContainerState::Stopped);
    }

    #[tokio::test]
    async fn test_no_eligible_volumes_is_a_noop() {
        let root = tempfile::tempdir().unwrap();
        let config = config(root.path());
        let runtime = FakeRuntime::new();
        runtime.add_container(
            "proxy",
            ContainerState::Running,
            vec![
                MountInfo {
                    kind: MountKind::Bind,
                    name: None,
                    source: Some("/etc/proxy".to_string()),
                    destination: "/etc/proxy".to_string(),
                },
                FakeRuntime::volume("npm-letsencrypt", "/etc/letsencrypt"),
            ],
        );
        let tasks = FakeTasks::new();

        let report = BackupManager::new(&runtime, &tasks, &config)
            .backup_container(&info(&runtime, "proxy"))
            .await
            .unwrap();

        assert!(report.volumes.is_empty());
        assert!(runtime.calls().is_empty());
        assert!(tasks.tasks().is_empty());
        assert!(names_in(root.path()).is_empty());
    }

    #[tokio::test]
    async fn test_backup_all_continues_after_inspection_failure() {
        let root = tempfile::tempdir().unwrap();
        let config = config(root.path());
        let runtime = FakeRuntime::new();
        runtime.add_container("broken", ContainerState::Running, vec![FakeRuntime::volume("b", "/b")]);
        runtime.add_container("web", ContainerState::Running, vec![FakeRuntime::volume("web_data", "/srv")]);
        runtime.fail_inspect("broken");
        let tasks = FakeTasks::new();

        let containers = vec![info(&runtime, "broken"), info(&runtime, "web")];
        let reports = BackupManager::new(&runtime, &tasks, &config)
            .without_upload()
            .backup_all(&containers)
            .await;

        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].container, "web");
        assert_eq!(runtime.state_of("broken"), ContainerState::Running);
        assert_eq!(runtime.calls(), vec!["stop web", "start web"]);
    }
}
