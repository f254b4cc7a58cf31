/// Docker integration
///
/// Container and volume lookups, lifecycle, and throwaway task containers
/// for tar and rclone, all through the Docker Engine API.

use anyhow::Context;
use bollard::container::{
    Config, CreateContainerOptions, InspectContainerOptions, ListContainersOptions, LogsOptions,
    RemoveContainerOptions, StartContainerOptions, StopContainerOptions, WaitContainerOptions,
};
use bollard::errors::Error as DockerError;
use bollard::image::CreateImageOptions;
use bollard::models::{ContainerSummary, HostConfig, MountPointTypeEnum};
use bollard::volume::ListVolumesOptions;
use bollard::Docker;
use futures::StreamExt;
use std::collections::{HashMap, VecDeque};

use crate::core::error::{BackupError, Result};
use crate::core::runtime::{ContainerInfo, ContainerRuntime, MountInfo, MountKind, TaskRunner, TaskSpec};
use crate::utils::ContainerState;

/// Lines of task output kept for error reports
const OUTPUT_TAIL_LINES: usize = 20;

#[derive(Clone)]
pub struct DockerManager {
    docker: Docker,
}

impl DockerManager {
    /// Connect to the local Docker daemon (unix socket or DOCKER_HOST)
    pub fn new() -> anyhow::Result<Self> {
        let docker = Docker::connect_with_local_defaults()
            .context("Failed to connect to Docker daemon. Is Docker running?")?;

        Ok(Self { docker })
    }

    /// Check the daemon answers
    pub async fn check_docker(&self) -> anyhow::Result<()> {
        self.docker
            .ping()
            .await
            .context("Docker daemon is not responding")?;
        Ok(())
    }

    fn container_summary_to_info(summary: ContainerSummary) -> ContainerInfo {
        let name = summary
            .names
            .as_ref()
            .and_then(|names| names.first())
            .map(|n| n.trim_start_matches('/').to_string())
            .unwrap_or_default();

        let state = summary
            .state
            .as_deref()
            .map(ContainerState::from)
            .unwrap_or(ContainerState::Unknown);

        ContainerInfo {
            id: summary.id.unwrap_or_default(),
            name,
            image: summary.image.unwrap_or_default(),
            state,
        }
    }

    async fn list_filtered(&self, all: bool, filters: HashMap<String, Vec<String>>) -> Result<Vec<ContainerInfo>> {
        let options = Some(ListContainersOptions {
            all,
            filters,
            ..Default::default()
        });

        let containers = self.docker.list_containers(options).await?;

        Ok(containers
            .into_iter()
            .map(Self::container_summary_to_info)
            .collect())
    }

    /// Pull the image unless it is already present
    async fn ensure_image(&self, image: &str) -> Result<()> {
        if self.docker.inspect_image(image).await.is_ok() {
            return Ok(());
        }

        tracing::info!("Pulling image {}", image);
        let options = Some(CreateImageOptions {
            from_image: image.to_string(),
            ..Default::default()
        });

        let mut progress = self.docker.create_image(options, None, None);
        while let Some(info) = progress.next().await {
            let info = info?;
            if let Some(status) = info.status {
                tracing::debug!("{}: {}", image, status);
            }
        }

        Ok(())
    }

    /// Start the created task, stream its logs, and return its exit code and output tail
    async fn drive_task(&self, id: &str, task: &TaskSpec) -> Result<(i64, Vec<String>)> {
        self.docker
            .start_container(id, None::<StartContainerOptions<String>>)
            .await?;

        let mut tail: VecDeque<String> = VecDeque::with_capacity(OUTPUT_TAIL_LINES);
        let mut record = |line: String| {
            tracing::info!("[{}] {}", task.tool, line);
            if tail.len() == OUTPUT_TAIL_LINES {
                tail.pop_front();
            }
            tail.push_back(line);
        };

        let mut lines = LineBuffer::default();
        let mut logs = self.docker.logs(
            id,
            Some(LogsOptions::<String> {
                follow: true,
                stdout: true,
                stderr: true,
                ..Default::default()
            }),
        );
        while let Some(chunk) = logs.next().await {
            let chunk = chunk?;
            for line in lines.push(&String::from_utf8_lossy(&chunk.into_bytes())) {
                record(line);
            }
        }
        if let Some(line) = lines.finish() {
            record(line);
        }

        let mut wait = self
            .docker
            .wait_container(id, None::<WaitContainerOptions<String>>);
        let code = match wait.next().await {
            Some(Ok(response)) => response.status_code,
            Some(Err(DockerError::DockerContainerWaitError { code, .. })) => code,
            Some(Err(e)) => return Err(e.into()),
            None => 0,
        };

        Ok((code, tail.into_iter().collect()))
    }
}

impl ContainerRuntime for DockerManager {
    async fn list_containers(&self, all: bool) -> Result<Vec<ContainerInfo>> {
        self.list_filtered(all, HashMap::new()).await
    }

    async fn inspect_mounts(&self, container: &str) -> Result<Vec<MountInfo>> {
        let inspect = self
            .docker
            .inspect_container(container, None::<InspectContainerOptions>)
            .await
            .map_err(|e| BackupError::Inspection(format!("container {}", container), e.to_string()))?;

        let mounts = inspect
            .mounts
            .unwrap_or_default()
            .into_iter()
            .map(|mount| {
                let kind = match mount.typ {
                    Some(MountPointTypeEnum::VOLUME) => MountKind::Volume,
                    Some(MountPointTypeEnum::BIND) => MountKind::Bind,
                    Some(other) => MountKind::Other(other.to_string()),
                    None => MountKind::Other(String::new()),
                };
                MountInfo {
                    kind,
                    name: mount.name,
                    source: mount.source,
                    destination: mount.destination.unwrap_or_default(),
                }
            })
            .collect();

        Ok(mounts)
    }

    async fn container_state(&self, container: &str) -> Result<ContainerState> {
        let inspect = self
            .docker
            .inspect_container(container, None::<InspectContainerOptions>)
            .await
            .map_err(|e| BackupError::Inspection(format!("container {}", container), e.to_string()))?;

        Ok(inspect
            .state
            .and_then(|s| s.status)
            .map(|status| ContainerState::from(status.to_string().as_str()))
            .unwrap_or(ContainerState::Unknown))
    }

    async fn stop_container(&self, container: &str) -> Result<()> {
        self.docker
            .stop_container(container, None::<StopContainerOptions>)
            .await?;
        Ok(())
    }

    async fn start_container(&self, container: &str) -> Result<()> {
        self.docker
            .start_container(container, None::<StartContainerOptions<String>>)
            .await?;
        Ok(())
    }

    async fn containers_using_volume(&self, volume: &str) -> Result<Vec<ContainerInfo>> {
        let mut filters = HashMap::new();
        filters.insert("volume".to_string(), vec![volume.to_string()]);
        self.list_filtered(true, filters)
            .await
            .map_err(|e| BackupError::Inspection(format!("volume {}", volume), e.to_string()))
    }

    async fn list_volumes(&self) -> Result<Vec<String>> {
        let response = self
            .docker
            .list_volumes(None::<ListVolumesOptions<String>>)
            .await?;

        Ok(response
            .volumes
            .unwrap_or_default()
            .into_iter()
            .map(|v| v.name)
            .collect())
    }
}

impl TaskRunner for DockerManager {
    async fn run_task(&self, task: &TaskSpec) -> Result<()> {
        self.ensure_image(&task.image).await?;

        let config = Config {
            image: Some(task.image.clone()),
            cmd: Some(task.command.clone()),
            env: Some(task.env.clone()),
            tty: Some(false),
            host_config: Some(HostConfig {
                binds: Some(task.binds.iter().map(|b| b.to_bind_spec()).collect()),
                ..Default::default()
            }),
            ..Default::default()
        };

        let created = self
            .docker
            .create_container(None::<CreateContainerOptions<String>>, config)
            .await?;
        tracing::debug!("Created {} task container {}", task.tool, created.id);

        let outcome = self.drive_task(&created.id, task).await;

        // The task container is removed whatever happened to it
        if let Err(e) = self
            .docker
            .remove_container(
                &created.id,
                Some(RemoveContainerOptions {
                    force: true,
                    ..Default::default()
                }),
            )
            .await
        {
            tracing::warn!("Failed to remove task container {}: {}", created.id, e);
        }

        let (code, output) = outcome?;
        if code != 0 {
            return Err(BackupError::ExternalTool {
                tool: task.tool.clone(),
                code,
                output,
            });
        }

        Ok(())
    }
}

/// Splits streamed log chunks into lines, carrying partial lines between chunks
#[derive(Debug, Default)]
struct LineBuffer {
    pending: String,
}

impl LineBuffer {
    fn push(&mut self, chunk: &str) -> Vec<String> {
        self.pending.push_str(chunk);

        let mut lines = Vec::new();
        while let Some(pos) = self.pending.find(['\n', '\r']) {
            let line: String = self.pending.drain(..=pos).collect();
            let line = line.trim();
            if !line.is_empty() {
                lines.push(line.to_string());
            }
        }
        lines
    }

    fn finish(&mut self) -> Option<String> {
        let rest = std::mem::take(&mut self.pending);
        let rest = rest.trim();
        if rest.is_empty() {
            None
        } else {
            Some(rest.to_string())
        }
    }
}
