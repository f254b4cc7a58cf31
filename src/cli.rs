/// CLI argument parsing

use clap::{ArgGroup, Args, Parser, Subcommand};
use std::path::PathBuf;

use crate::core::BackupError;

// Build timestamp injected at compile time
pub const VERSION_WITH_BUILD: &str = concat!(env!("CARGO_PKG_VERSION"), " (built: ", env!("BUILD_TIMESTAMP"), ")");

#[derive(Parser, Debug)]
#[command(name = "docker-volume-backup")]
#[command(author, version = VERSION_WITH_BUILD, about, long_about = None)]
#[command(arg_required_else_help = true)]
pub struct Cli {
    /// Configuration file (default: ~/.config/docker-volume-backup/config.toml)
    #[arg(long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Back up Docker volumes
    #[command(arg_required_else_help = true)]
    Backup(BackupArgs),

    /// Restore a Docker volume from a backup archive
    #[command(arg_required_else_help = true)]
    Restore(RestoreArgs),
}

#[derive(Args, Debug)]
#[command(group(ArgGroup::new("target").required(true).args(["all", "container"])))]
pub struct BackupArgs {
    /// Create a backup of the volumes of every container on the host
    #[arg(short, long)]
    pub all: bool,

    /// Create a backup of the volumes of the given container
    #[arg(short = 'c', value_name = "CONTAINER")]
    pub container: Option<String>,

    /// Keep the archives local for this run
    #[arg(long)]
    pub no_upload: bool,
}

#[derive(Args, Debug)]
pub struct RestoreArgs {
    /// Path to the volume backup archive (.tar.gz)
    #[arg(short, long, value_name = "PATH")]
    pub archive: PathBuf,

    /// Volume name for restoration
    #[arg(short = 'v', value_name = "VOLUME")]
    pub volume: String,
}

/// Check a name against the live list, the way clap checks `choices`
pub fn validate_choice(value: &str, choices: &[String], what: &str) -> Result<(), BackupError> {
    if choices.iter().any(|c| c == value) {
        return Ok(());
    }
    let mut sorted: Vec<&str> = choices.iter().map(String::as_str).collect();
    sorted.sort_unstable();
    Err(BackupError::Argument(format!(
        "invalid {} '{}' (choose from: {})",
        what,
        value,
        sorted.join(", ")
    )))
}
