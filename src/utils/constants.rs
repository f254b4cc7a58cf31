/// Fixed names, paths and defaults shared by the backup and restore flows

/// Extension of tar's incremental state files
pub const SNAPSHOT_EXTENSION: &str = ".snar";

/// Extension every archive produced or accepted by this tool carries
pub const ARCHIVE_EXTENSION: &str = ".tar.gz";

/// Suffix for manifests and archives that are still being written
pub const PARTIAL_SUFFIX: &str = ".partial";

/// Archive timestamp format (local time)
pub const ARCHIVE_TIMESTAMP_FORMAT: &str = "%Y-%m-%d_%H-%M-%S";

/// Log file timestamp format (local time)
pub const LOG_TIMESTAMP_FORMAT: &str = "%Y-%m-%d_%H-%M-%S";

/// Where the volume data is mounted inside a task container
pub const TASK_SOURCE_PATH: &str = "/data";

/// Where the backup endpoint is mounted inside a task container
pub const TASK_DEST_PATH: &str = "/backup";

/// Directory holding the read-only archive during a restore
pub const TASK_ARCHIVE_PATH: &str = "/archive";

/// Where the rclone image looks for its configuration
pub const RCLONE_CONFIG_MOUNT: &str = "/config/rclone/rclone.conf";

pub const DEFAULT_BACKUP_ROOT: &str = "/mnt/backup_docker_volume";
pub const DEFAULT_ARCHIVER_IMAGE: &str = "ubuntu:24.04";
pub const DEFAULT_SYNC_IMAGE: &str = "rclone/rclone:1.67";
pub const DEFAULT_REMOTE_STORAGE: &str = "docker-backup-vol:";
pub const DEFAULT_MAX_DIFFERENTIALS: u32 = 2;

/// Log directories, relative to the home directory
pub const BACKUP_LOG_SUBDIR: &str = ".logs/backup-docker-volumes";
pub const RESTORE_LOG_SUBDIR: &str = ".logs/restore-docker-volumes";

/// rclone configuration, relative to the home directory
pub const RCLONE_CONFIG_SUBDIR: &str = ".config/rclone/rclone.conf";

/// Volumes never archived unless the config file says otherwise
pub const DEFAULT_EXCLUDED_VOLUMES: &[&str] = &[
    "vscode",
    "jenkins_agent_data",
    "mysql_data",
    "npm-letsencrypt",
    "serial_poll_logs",
    "thingsboard-data",
    "thingsboard-logs",
];

/// Locale for tar so non-ASCII file names are logged correctly
pub const TASK_ENVIRONMENT: &[&str] = &["LANG=C.UTF-8"];
