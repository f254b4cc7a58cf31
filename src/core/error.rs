/// Error kinds surfaced by the backup and restore flows

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum BackupError {
    #[error("Invalid argument: {0}")]
    Argument(String),

    #[error("Archive {} does not exist or is not a .tar.gz file", .0.display())]
    ArchiveNotFound(PathBuf),

    #[error(
        "Volume {volume} already has {count} differential snapshots (limit {limit}). \
         Delete old snapshots in {} to start a new full backup", .dir.display()
    )]
    RetentionExceeded {
        volume: String,
        count: u32,
        limit: u32,
        dir: PathBuf,
    },

    #[error("{tool} exited with code {code}{}", format_output(.output))]
    ExternalTool {
        tool: String,
        code: i64,
        output: Vec<String>,
    },

    #[error("Failed to inspect {0}: {1}")]
    Inspection(String, String),

    #[error("Docker error: {0}")]
    Docker(#[from] bollard::errors::Error),

    #[error("I/O error on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl BackupError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        BackupError::Io {
            path: path.into(),
            source,
        }
    }

    /// Failures that skip a single volume or upload rather than the whole run
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            BackupError::RetentionExceeded { .. } | BackupError::ExternalTool { .. } | BackupError::Io { .. }
        )
    }
}

fn format_output(output: &[String]) -> String {
    if output.is_empty() {
        String::new()
    } else {
        format!("; last output:\n{}", output.join("\n"))
    }
}

pub type Result<T> = std::result::Result<T, BackupError>;
