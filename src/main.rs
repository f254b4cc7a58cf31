use anyhow::{Context, Result};
use clap::error::ErrorKind;
use clap::{CommandFactory, Parser};

use docker_volume_backup::cli::{validate_choice, BackupArgs, Cli, Commands, RestoreArgs};
use docker_volume_backup::core::restore::validate_archive;
use docker_volume_backup::core::runtime::ContainerRuntime;
use docker_volume_backup::core::{BackupManager, DockerManager, RestoreManager};
use docker_volume_backup::utils::{AppConfig, RunLog};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => AppConfig::load_from(path)?,
        None => AppConfig::load()?,
    };

    match cli.command {
        Commands::Backup(args) => handle_backup(&config, args).await,
        Commands::Restore(args) => handle_restore(&config, args).await,
    }
}

/// Report an invalid argument the way clap does and exit
fn argument_error(message: impl std::fmt::Display) -> ! {
    Cli::command().error(ErrorKind::InvalidValue, message).exit()
}

async fn handle_backup(config: &AppConfig, args: BackupArgs) -> Result<()> {
    let docker = DockerManager::new()?;
    docker.check_docker().await?;

    let containers = docker
        .list_containers(true)
        .await
        .context("Failed to list containers")?;

    let selected: Vec<_> = match &args.container {
        Some(name) if !args.all => {
            let names: Vec<String> = containers.iter().map(|c| c.name.clone()).collect();
            if let Err(e) = validate_choice(name, &names, "container") {
                argument_error(e);
            }
            containers.into_iter().filter(|c| &c.name == name).collect()
        }
        _ => containers,
    };

    let log = RunLog::create(&config.backup_log_dir, args.container.as_deref())?;

    let mut manager = BackupManager::new(&docker, &docker, config);
    if args.no_upload {
        manager = manager.without_upload();
    }

    log.scope(async {
        tracing::info!(
            "Backup of {} container(s) into {}, log file {}",
            selected.len(),
            config.backup_root.display(),
            log.path().display()
        );

        let reports = manager.backup_all(&selected).await;

        let captured: usize = reports.iter().map(|r| r.captured()).sum();
        let skipped: usize = reports.iter().map(|r| r.skipped()).sum();
        let failed_containers = selected.len() - reports.len();
        if skipped > 0 || failed_containers > 0 {
            tracing::warn!(
                "Backup finished with problems: {} volume(s) captured, {} volume(s) skipped, {} container(s) not processed",
                captured,
                skipped,
                failed_containers
            );
        } else {
            tracing::info!("Backup finished: {} volume(s) captured", captured);
        }
    })
    .await;

    Ok(())
}

async fn handle_restore(config: &AppConfig, args: RestoreArgs) -> Result<()> {
    // Checked before anything touches the engine
    let archive = validate_archive(&args.archive)?;

    let docker = DockerManager::new()?;
    docker.check_docker().await?;

    let volumes = docker.list_volumes().await.context("Failed to list volumes")?;
    if let Err(e) = validate_choice(&args.volume, &volumes, "volume") {
        argument_error(e);
    }

    let log = RunLog::create(&config.restore_log_dir, None)?;
    let manager = RestoreManager::new(&docker, &docker, config);

    log.scope(async {
        tracing::info!("Restore run, log file {}", log.path().display());
        manager.restore(&archive, &args.volume).await
    })
    .await
    .with_context(|| format!("Restore of volume {} failed", args.volume))?;

    Ok(())
}
