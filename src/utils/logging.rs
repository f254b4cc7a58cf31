/// Per-run logging: stdout plus a timestamped file under the mode's log directory
///
/// The subscriber is never installed globally. `RunLog::scope` attaches it to
/// the future that drives one backup or restore run.

use anyhow::{Context, Result};
use chrono::Local;
use std::fs::{self, File};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::instrument::WithSubscriber;
use tracing::Dispatch;
use tracing_subscriber::{fmt, layer::SubscriberExt, EnvFilter};

use crate::utils::LOG_TIMESTAMP_FORMAT;

pub struct RunLog {
    path: PathBuf,
    dispatch: Dispatch,
}

impl RunLog {
    /// Create the log file `<log_dir>/<timestamp>[_<label>].log` and the dispatcher writing to it
    pub fn create(log_dir: &Path, label: Option<&str>) -> Result<Self> {
        fs::create_dir_all(log_dir)
            .with_context(|| format!("Failed to create log directory {}", log_dir.display()))?;

        let path = log_dir.join(log_file_name(&Local::now().format(LOG_TIMESTAMP_FORMAT).to_string(), label));
        let file = File::create(&path)
            .with_context(|| format!("Failed to create log file {}", path.display()))?;

        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

        let subscriber = tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_writer(std::io::stdout).with_target(false))
            .with(
                fmt::layer()
                    .with_writer(Mutex::new(file))
                    .with_ansi(false)
                    .with_target(false),
            );

        Ok(Self {
            path,
            dispatch: Dispatch::new(subscriber),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn dispatch(&self) -> &Dispatch {
        &self.dispatch
    }

    /// Run a future with this log as its subscriber
    pub async fn scope<F: Future>(&self, fut: F) -> F::Output {
        fut.with_subscriber(self.dispatch.clone()).await
    }
}

fn log_file_name(stamp: &str, label: Option<&str>) -> String {
    match label {
        Some(label) if !label.is_empty() => format!("{}_{}.log", stamp, label),
        _ => format!("{}.log", stamp),
    }
}
