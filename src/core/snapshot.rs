/// Snapshot state tracking for one volume's backup endpoint
///
/// The chain state is never stored on its own. Every plan rescans the endpoint:
/// `<volume>_full.snar` is the baseline manifest and `<volume>_diff<N>.snar` the
/// manifest of differential N. The decision itself (`decide`) is a pure function
/// of the scanned `SnapshotInventory`.
///
/// New manifests and archives are written under a `.partial` name and only get
/// their final name through `CapturePlan::commit` once tar succeeded, so a failed
/// or interrupted capture never advances the generation counter.

use chrono::{DateTime, Local};
use regex::Regex;
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use crate::core::error::{BackupError, Result};
use crate::utils::{archive_timestamp, AppConfig, Lineage, ARCHIVE_EXTENSION, PARTIAL_SUFFIX, SNAPSHOT_EXTENSION};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureKind {
    Full,
    Differential(u32),
}

impl CaptureKind {
    /// Name fragment used in manifest and archive names
    pub fn label(&self) -> String {
        match self {
            CaptureKind::Full => "full".to_string(),
            CaptureKind::Differential(n) => format!("diff{}", n),
        }
    }
}

impl fmt::Display for CaptureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CaptureKind::Full => f.write_str("full"),
            CaptureKind::Differential(n) => write!(f, "differential #{}", n),
        }
    }
}

pub fn full_manifest_name(volume: &str) -> String {
    format!("{}_full{}", volume, SNAPSHOT_EXTENSION)
}

pub fn diff_manifest_name(volume: &str, generation: u32) -> String {
    format!("{}_diff{}{}", volume, generation, SNAPSHOT_EXTENSION)
}

pub fn archive_name(volume: &str, kind: CaptureKind, now: DateTime<Local>) -> String {
    format!("{}_{}-{}{}", volume, kind.label(), archive_timestamp(now), ARCHIVE_EXTENSION)
}

/// What a scan of the endpoint found
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SnapshotInventory {
    /// Every `*.snar` file name in the directory
    pub manifests: Vec<String>,
    /// `<volume>_full.snar` is present
    pub has_full: bool,
    /// Number of this volume's `<volume>_diff<N>.snar` manifests
    pub differential_count: u32,
    /// Generations parsed from `<volume>_diff<N>.snar`, ascending
    pub generations: Vec<u32>,
}

impl SnapshotInventory {
    /// List the endpoint and classify its manifests
    pub fn scan(endpoint: &Path, volume: &str) -> io::Result<Self> {
        let mut names = Vec::new();
        for entry in fs::read_dir(endpoint)? {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            if let Some(name) = entry.file_name().to_str() {
                names.push(name.to_string());
            }
        }
        names.sort();
        Ok(Self::from_names(volume, names))
    }

    pub fn from_names<I, S>(volume: &str, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let full = full_manifest_name(volume);

        let mut inventory = SnapshotInventory::default();
        for name in names {
            let name = name.into();
            if !name.ends_with(SNAPSHOT_EXTENSION) {
                continue;
            }
            if name == full {
                inventory.has_full = true;
            }
            if let Some(generation) = parse_generation(volume, &name) {
                inventory.differential_count += 1;
                inventory.generations.push(generation);
            }
            inventory.manifests.push(name);
        }
        inventory.generations.sort_unstable();
        inventory
    }

    /// Highest generation in use. Matches the count for a well-formed chain;
    /// a gap (e.g. only diff2 present) still reserves the higher number.
    pub fn generation_in_use(&self) -> u32 {
        let highest = self.generations.last().copied().unwrap_or(0);
        highest.max(self.differential_count)
    }
}

/// Generation of `<volume>_diff<N>.snar`, if `name` is one of this volume's manifests
fn parse_generation(volume: &str, name: &str) -> Option<u32> {
    static DIFF_RE: OnceLock<Regex> = OnceLock::new();

    let diff_re = DIFF_RE.get_or_init(|| {
        Regex::new(r"^(.+)_diff(\d+)\.snar$").unwrap()
    });

    let caps = diff_re.captures(name)?;
    if caps.get(1)?.as_str() != volume {
        return None;
    }
    caps.get(2)?.as_str().parse().ok()
}

/// Outcome of the planning policy, before anything touches the disk
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decision {
    pub kind: CaptureKind,
    /// Manifest copied forward for a differential
    pub seed: Option<String>,
    /// Manifests exist but none is this volume's full manifest
    pub rebaseline: bool,
}

/// Decide the next capture for a volume from its inventory
pub fn decide(
    inventory: &SnapshotInventory,
    volume: &str,
    max_differentials: u32,
    lineage: Lineage,
) -> std::result::Result<Decision, u32> {
    if inventory.manifests.is_empty() || !inventory.has_full {
        return Ok(Decision {
            kind: CaptureKind::Full,
            seed: None,
            rebaseline: !inventory.manifests.is_empty(),
        });
    }

    let in_use = inventory.generation_in_use();
    if in_use >= max_differentials {
        return Err(in_use);
    }

    let seed = match (lineage, inventory.generations.last()) {
        (Lineage::Latest, Some(&latest)) => diff_manifest_name(volume, latest),
        _ => full_manifest_name(volume),
    };

    Ok(Decision {
        kind: CaptureKind::Differential(in_use + 1),
        seed: Some(seed),
        rebaseline: false,
    })
}

/// Everything the archiver needs for one capture
#[derive(Debug, Clone)]
pub struct CapturePlan {
    pub kind: CaptureKind,
    pub volume: String,
    pub endpoint: PathBuf,
    /// Final manifest name, e.g. `db_diff1.snar`
    pub manifest_name: String,
    /// Final archive name, e.g. `db_diff1-2024-05-01_03-00-00.tar.gz`
    pub archive_name: String,
}

impl CapturePlan {
    /// Manifest name handed to tar while the capture is in flight
    pub fn staged_manifest_name(&self) -> String {
        format!("{}{}", self.manifest_name, PARTIAL_SUFFIX)
    }

    /// Archive name tar writes to while the capture is in flight
    pub fn staged_archive_name(&self) -> String {
        format!("{}{}", self.archive_name, PARTIAL_SUFFIX)
    }

    /// Host path of the manifest tar reads and mutates
    pub fn manifest_path(&self) -> PathBuf {
        self.endpoint.join(self.staged_manifest_name())
    }

    /// Host path of the finished archive
    pub fn archive_path(&self) -> PathBuf {
        self.endpoint.join(&self.archive_name)
    }

    /// Give the manifest and archive their final names.
    /// The manifest is renamed last: it is what advances the generation counter.
    pub fn commit(&self) -> Result<PathBuf> {
        let archive = self.archive_path();
        let staged_archive = self.endpoint.join(self.staged_archive_name());
        fs::rename(&staged_archive, &archive).map_err(|e| BackupError::io(&staged_archive, e))?;

        let manifest = self.endpoint.join(&self.manifest_name);
        let staged_manifest = self.manifest_path();
        if let Err(e) = fs::rename(&staged_manifest, &manifest) {
            // An archive without its manifest would not belong to any chain
            if let Err(back) = fs::rename(&archive, &staged_archive) {
                tracing::error!(
                    "Archive {} has no manifest and could not be moved back: {}",
                    archive.display(),
                    back
                );
            }
            return Err(BackupError::io(&staged_manifest, e));
        }

        Ok(archive)
    }

    /// Drop whatever a failed capture left behind
    pub fn abandon(&self) {
        for name in [self.staged_archive_name(), self.staged_manifest_name()] {
            let path = self.endpoint.join(name);
            match fs::remove_file(&path) {
                Ok(()) => tracing::info!("Removed partial file {}", path.display()),
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => tracing::warn!("Could not remove partial file {}: {}", path.display(), e),
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct SnapshotTracker {
    max_differentials: u32,
    lineage: Lineage,
}

impl SnapshotTracker {
    pub fn new(max_differentials: u32, lineage: Lineage) -> Self {
        Self {
            max_differentials,
            lineage,
        }
    }

    pub fn from_config(config: &AppConfig) -> Self {
        Self::new(config.max_differentials, config.lineage)
    }

    /// Plan the next capture of `volume` into `endpoint`
    pub fn plan_capture(&self, endpoint: &Path, volume: &str) -> Result<CapturePlan> {
        self.plan_capture_at(endpoint, volume, Local::now())
    }

    pub fn plan_capture_at(&self, endpoint: &Path, volume: &str, now: DateTime<Local>) -> Result<CapturePlan> {
        if volume.is_empty() {
            return Err(BackupError::Argument("volume name cannot be empty".to_string()));
        }

        fs::create_dir_all(endpoint).map_err(|e| BackupError::io(endpoint, e))?;
        sweep_partials(endpoint)?;

        let inventory = SnapshotInventory::scan(endpoint, volume).map_err(|e| BackupError::io(endpoint, e))?;

        let decision = decide(&inventory, volume, self.max_differentials, self.lineage).map_err(|count| {
            BackupError::RetentionExceeded {
                volume: volume.to_string(),
                count,
                limit: self.max_differentials,
                dir: endpoint.to_path_buf(),
            }
        })?;

        if decision.rebaseline {
            tracing::warn!(
                "No {} in {} next to {} other manifest(s), starting a new full backup",
                full_manifest_name(volume),
                endpoint.display(),
                inventory.manifests.len()
            );
        }

        let manifest_name = match decision.kind {
            CaptureKind::Full => full_manifest_name(volume),
            CaptureKind::Differential(n) => diff_manifest_name(volume, n),
        };

        let plan = CapturePlan {
            kind: decision.kind,
            volume: volume.to_string(),
            endpoint: endpoint.to_path_buf(),
            manifest_name,
            archive_name: archive_name(volume, decision.kind, now),
        };

        if let Some(seed) = decision.seed {
            let from = endpoint.join(&seed);
            let to = plan.manifest_path();
            fs::copy(&from, &to).map_err(|e| BackupError::io(&from, e))?;
            tracing::info!("Seeded {} from {}", plan.manifest_name, seed);
        }

        Ok(plan)
    }
}

/// Remove `.partial` leftovers of an interrupted run
fn sweep_partials(endpoint: &Path) -> Result<()> {
    let entries = fs::read_dir(endpoint).map_err(|e| BackupError::io(endpoint, e))?;
    for entry in entries {
        let entry = entry.map_err(|e| BackupError::io(endpoint, e))?;
        let path = entry.path();
        let is_partial = path
            .file_name()
            .and_then(|n| n.to_str())
            .map(|n| n.ends_with(PARTIAL_SUFFIX))
            .unwrap_or(false);
        if is_partial && path.is_file() {
            tracing::warn!("Removing leftover partial file {}", path.display());
            fs::remove_file(&path).map_err(|e| BackupError::io(&path, e))?;
        }
    }
    Ok(())
}
