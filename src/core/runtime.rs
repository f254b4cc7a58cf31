/// Seams to the container engine
///
/// `ContainerRuntime` covers container and volume lookups plus lifecycle;
/// `TaskRunner` runs a throwaway container to completion. `DockerManager`
/// implements both against the Docker daemon.

use crate::core::error::Result;
use crate::utils::ContainerState;

#[derive(Debug, Clone)]
pub struct ContainerInfo {
    pub id: String,
    pub name: String,
    pub image: String,
    pub state: ContainerState,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MountKind {
    Volume,
    Bind,
    Other(String),
}

/// One entry of a container's mount list
#[derive(Debug, Clone)]
pub struct MountInfo {
    pub kind: MountKind,
    /// Volume name, only set for `Volume` mounts
    pub name: Option<String>,
    pub source: Option<String>,
    pub destination: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindMode {
    ReadWrite,
    ReadOnly,
}

impl BindMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            BindMode::ReadWrite => "rw",
            BindMode::ReadOnly => "ro",
        }
    }
}

/// Host path or volume name made available inside a task
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BindMount {
    pub source: String,
    pub target: String,
    pub mode: BindMode,
}

impl BindMount {
    pub fn new(source: impl Into<String>, target: impl Into<String>, mode: BindMode) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
            mode,
        }
    }

    /// Docker `HostConfig.Binds` entry: `source:target:mode`
    pub fn to_bind_spec(&self) -> String {
        format!("{}:{}:{}", self.source, self.target, self.mode.as_str())
    }
}

/// A sandboxed task: image, argument vector, binds and environment
#[derive(Debug, Clone)]
pub struct TaskSpec {
    /// Short name used in logs and errors (`tar`, `rclone`)
    pub tool: String,
    pub image: String,
    pub command: Vec<String>,
    pub binds: Vec<BindMount>,
    pub env: Vec<String>,
}

impl TaskSpec {
    /// Host source bound at `target`, if any
    pub fn bind_source(&self, target: &str) -> Option<&str> {
        self.binds
            .iter()
            .find(|b| b.target == target)
            .map(|b| b.source.as_str())
    }
}

#[allow(async_fn_in_trait)]
pub trait ContainerRuntime {
    /// List containers, including stopped ones when `all` is set
    async fn list_containers(&self, all: bool) -> Result<Vec<ContainerInfo>>;

    /// Mounts in the order the engine reports them
    async fn inspect_mounts(&self, container: &str) -> Result<Vec<MountInfo>>;

    /// Re-read the current state of a container
    async fn container_state(&self, container: &str) -> Result<ContainerState>;

    async fn stop_container(&self, container: &str) -> Result<()>;

    async fn start_container(&self, container: &str) -> Result<()>;

    /// Containers (running or not) that mount the given volume
    async fn containers_using_volume(&self, volume: &str) -> Result<Vec<ContainerInfo>>;

    async fn list_volumes(&self) -> Result<Vec<String>>;
}

#[allow(async_fn_in_trait)]
pub trait TaskRunner {
    /// Run the task to completion, streaming its output to the log.
    /// A non-zero exit is an `ExternalTool` error.
    async fn run_task(&self, task: &TaskSpec) -> Result<()>;
}
