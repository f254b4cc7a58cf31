/// In-memory container engine for orchestrator tests

use std::collections::BTreeSet;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Mutex;

use crate::core::error::{BackupError, Result};
use crate::core::runtime::{ContainerInfo, ContainerRuntime, MountInfo, MountKind, TaskRunner, TaskSpec};
use crate::utils::{ContainerState, TASK_DEST_PATH};

struct FakeContainer {
    name: String,
    state: ContainerState,
    mounts: Vec<MountInfo>,
}

#[derive(Default)]
pub struct FakeRuntime {
    containers: Mutex<Vec<FakeContainer>>,
    calls: Mutex<Vec<String>>,
    fail_inspect: Mutex<Option<String>>,
}

impl FakeRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn volume(name: &str, destination: &str) -> MountInfo {
        MountInfo {
            kind: MountKind::Volume,
            name: Some(name.to_string()),
            source: Some(format!("/var/lib/docker/volumes/{}/_data", name)),
            destination: destination.to_string(),
        }
    }

    pub fn add_container(&self, name: &str, state: ContainerState, mounts: Vec<MountInfo>) {
        self.containers.lock().unwrap().push(FakeContainer {
            name: name.to_string(),
            state,
            mounts,
        });
    }

    pub fn fail_inspect(&self, name: &str) {
        *self.fail_inspect.lock().unwrap() = Some(name.to_string());
    }

    pub fn state_of(&self, name: &str) -> ContainerState {
        self.containers
            .lock()
            .unwrap()
            .iter()
            .find(|c| c.name == name)
            .map(|c| c.state)
            .unwrap_or(ContainerState::Unknown)
    }

    /// Lifecycle calls in order, e.g. `stop web`
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn info(c: &FakeContainer) -> ContainerInfo {
        ContainerInfo {
            id: format!("{}-id", c.name),
            name: c.name.clone(),
            image: "busybox".to_string(),
            state: c.state,
        }
    }

    fn set_state(&self, name: &str, state: ContainerState) -> Result<()> {
        let mut containers = self.containers.lock().unwrap();
        let container = containers
            .iter_mut()
            .find(|c| c.name == name)
            .ok_or_else(|| BackupError::Inspection(format!("container {}", name), "no such container".to_string()))?;
        container.state = state;
        Ok(())
    }
}

impl ContainerRuntime for FakeRuntime {
    async fn list_containers(&self, all: bool) -> Result<Vec<ContainerInfo>> {
        Ok(self
            .containers
            .lock()
            .unwrap()
            .iter()
            .filter(|c| all || c.state.is_running())
            .map(Self::info)
            .collect())
    }

    async fn inspect_mounts(&self, container: &str) -> Result<Vec<MountInfo>> {
        if self.fail_inspect.lock().unwrap().as_deref() == Some(container) {
            return Err(BackupError::Inspection(format!("container {}", container), "engine unavailable".to_string()));
        }
        self.containers
            .lock()
            .unwrap()
            .iter()
            .find(|c| c.name == container)
            .map(|c| c.mounts.clone())
            .ok_or_else(|| BackupError::Inspection(format!("container {}", container), "no such container".to_string()))
    }

    async fn container_state(&self, container: &str) -> Result<ContainerState> {
        Ok(self.state_of(container))
    }

    async fn stop_container(&self, container: &str) -> Result<()> {
        self.calls.lock().unwrap().push(format!("stop {}", container));
        self.set_state(container, ContainerState::Stopped)
    }

    async fn start_container(&self, container: &str) -> Result<()> {
        self.calls.lock().unwrap().push(format!("start {}", container));
        self.set_state(container, ContainerState::Running)
    }

    async fn containers_using_volume(&self, volume: &str) -> Result<Vec<ContainerInfo>> {
        Ok(self
            .containers
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.mounts.iter().any(|m| m.name.as_deref() == Some(volume)))
            .map(Self::info)
            .collect())
    }

    async fn list_volumes(&self) -> Result<Vec<String>> {
        let names: BTreeSet<String> = self
            .containers
            .lock()
            .unwrap()
            .iter()
            .flat_map(|c| c.mounts.iter().filter_map(|m| m.name.clone()))
            .collect();
        Ok(names.into_iter().collect())
    }
}

/// Records tasks. Capture tasks behave like tar: the manifest gets a line
/// appended and the archive file is created inside the bound endpoint.
#[derive(Default)]
pub struct FakeTasks {
    tasks: Mutex<Vec<TaskSpec>>,
    fail_when: Mutex<Vec<String>>,
}

impl FakeTasks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail every task with an argument containing `pattern`
    pub fn fail_when(&self, pattern: &str) {
        self.fail_when.lock().unwrap().push(pattern.to_string());
    }

    pub fn tasks(&self) -> Vec<TaskSpec> {
        self.tasks.lock().unwrap().clone()
    }

    fn host_path(task: &TaskSpec, in_task: &str) -> Option<PathBuf> {
        let relative = in_task.strip_prefix(TASK_DEST_PATH)?.trim_start_matches('/');
        Some(PathBuf::from(task.bind_source(TASK_DEST_PATH)?).join(relative))
    }

    fn arg_value<'a>(task: &'a TaskSpec, flag: &str) -> Option<&'a str> {
        task.command.iter().find_map(|a| a.strip_prefix(flag))
    }
}

impl TaskRunner for FakeTasks {
    async fn run_task(&self, task: &TaskSpec) -> Result<()> {
        self.tasks.lock().unwrap().push(task.clone());

        let failing = self
            .fail_when
            .lock()
            .unwrap()
            .iter()
            .any(|p| task.command.iter().any(|a| a.contains(p.as_str())));
        if failing {
            return Err(BackupError::ExternalTool {
                tool: task.tool.clone(),
                code: 2,
                output: vec!["simulated failure".to_string()],
            });
        }

        if task.command.iter().any(|a| a == "--create") {
            let manifest = Self::arg_value(task, "--listed-incremental=").and_then(|p| Self::host_path(task, p));
            let archive = Self::arg_value(task, "--file=").and_then(|p| Self::host_path(task, p));
            if let (Some(manifest), Some(archive)) = (manifest, archive) {
                let mut file = OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(&manifest)
                    .map_err(|e| BackupError::io(&manifest, e))?;
                writeln!(file, "captured").map_err(|e| BackupError::io(&manifest, e))?;
                std::fs::write(&archive, b"tarball").map_err(|e| BackupError::io(&archive, e))?;
            }
        }

        Ok(())
    }
}
