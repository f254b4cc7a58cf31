pub mod error;
pub mod runtime;
pub mod docker;
pub mod volumes;
pub mod snapshot;
pub mod archive;
pub mod upload;
pub mod backup;
pub mod restore;

#[cfg(test)]
pub(crate) mod testing;

pub use error::{BackupError, Result};
pub use docker::DockerManager;
pub use backup::BackupManager;
pub use restore::RestoreManager;
pub use snapshot::SnapshotTracker;
