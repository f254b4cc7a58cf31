/// Volume discovery: which of a container's mounts get archived

use crate::core::error::{BackupError, Result};
use crate::core::runtime::{ContainerRuntime, MountKind};
use crate::utils::AppConfig;

/// A named volume mounted by a container
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VolumeRef {
    pub name: String,
    /// Mount point inside the owning container
    pub destination: String,
}

/// Named volumes of `container`, in the engine's mount order, minus bind mounts and excluded names
pub async fn eligible_volumes<R: ContainerRuntime>(
    runtime: &R,
    container: &str,
    config: &AppConfig,
) -> Result<Vec<VolumeRef>> {
    let mounts = runtime
        .inspect_mounts(container)
        .await
        .map_err(|e| match e {
            BackupError::Inspection(..) => e,
            other => BackupError::Inspection(format!("container {}", container), other.to_string()),
        })?;

    let mut volumes = Vec::new();
    for mount in mounts {
        if mount.kind != MountKind::Volume {
            continue;
        }
        let Some(name) = mount.name else {
            continue;
        };
        if config.is_excluded(&name) {
            tracing::warn!("Volume {} of {} is in the exclusion list. Skipping", name, container);
            continue;
        }
        volumes.push(VolumeRef {
            name,
            destination: mount.destination,
        });
    }

    Ok(volumes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::testing::FakeRuntime;
    use crate::core::runtime::MountInfo;
    use crate::utils::ContainerState;

    fn config() -> AppConfig {
        AppConfig {
            exclude_volumes: vec!["npm-letsencrypt".to_string()],
            ..Default::default()
        }
    }

    fn web() -> FakeRuntime {
        let runtime = FakeRuntime::new();
        runtime.add_container(
            "web",
            ContainerState::Running,
            vec![
                MountInfo {
                    kind: MountKind::Bind,
                    name: None,
                    source: Some("/etc/nginx".to_string()),
                    destination: "/etc/nginx".to_string(),
                },
                FakeRuntime::volume("web_data", "/var/www"),
                FakeRuntime::volume("npm-letsencrypt", "/etc/letsencrypt"),
                FakeRuntime::volume("web_cache", "/cache"),
            ],
        );
        runtime
    }

    #[tokio::test]
    async fn test_keeps_only_named_volumes_in_order() {
        let runtime = web();
        let volumes = eligible_volumes(&runtime, "web", &config()).await.unwrap();
        let names: Vec<&str> = volumes.iter().map(|v| v.name.as_str()).collect();
        assert_eq!(names, vec!["web_data", "web_cache"]);
        assert_eq!(volumes[0].destination, "/var/www");
    }

    #[tokio::test]
    async fn test_is_idempotent() {
        let runtime = web();
        let first = eligible_volumes(&runtime, "web", &config()).await.unwrap();
        let second = eligible_volumes(&runtime, "web", &config()).await.unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_exclusion_is_exact_match() {
        let runtime = FakeRuntime::new();
        runtime.add_container(
            "app",
            ContainerState::Stopped,
            vec![FakeRuntime::volume("npm-letsencrypt-old", "/old")],
        );
        let volumes = eligible_volumes(&runtime, "app", &config()).await.unwrap();
        assert_eq!(volumes.len(), 1);
    }

    #[tokio::test]
    async fn test_unknown_container_is_an_inspection_error() {
        let runtime = FakeRuntime::new();
        let err = eligible_volumes(&runtime, "ghost", &config()).await.unwrap_err();
        assert!(matches!(err, BackupError::Inspection(..)));
    }
}
