//! Snapshot discovery
//!
//! A [`SnapshotCatalog`] is rebuilt from the backup directory on every pass;
//! nothing about a snapshot is persisted apart from the file itself. The
//! catalog owns its snapshots in a flat arena and hands out [`SnapshotId`]
//! indices, so the retention engine and the prune executor mark and read the
//! very same entries.

use crate::compression::SNAPSHOT_SUFFIX;
use crate::error::{HfbrError, Result};
use chrono::{DateTime, Local, Utc};
use std::cmp::Reverse;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{instrument, trace};

/// Index of a snapshot inside its [`SnapshotCatalog`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SnapshotId(usize);

impl SnapshotId {
    /// Position in the catalog
    pub fn index(self) -> usize {
        self.0
    }
}

/// One compressed snapshot file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    /// Full path of the snapshot file
    pub path: PathBuf,
    /// Base name, as matched against the pin list
    pub name: String,
    /// Capture time, taken from the file's modification time
    pub modified: DateTime<Utc>,
    /// Whether the snapshot survives this pass
    pub pinned: bool,
}

impl Snapshot {
    /// Capture time in the local timezone, used for calendar buckets
    pub fn local_time(&self) -> DateTime<Local> {
        self.modified.with_timezone(&Local)
    }
}

impl std::fmt::Display for Snapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.local_time().format("%Y%m%d%H%M%S"), self.name)
    }
}

/// Arena of the snapshots found in one backup directory
#[derive(Debug, Clone, Default)]
pub struct SnapshotCatalog {
    dir: PathBuf,
    snapshots: Vec<Snapshot>,
}

fn access(path: &Path) -> impl FnOnce(std::io::Error) -> HfbrError {
    let path = path.to_path_buf();
    move |source| HfbrError::CatalogAccess { path, source }
}

/// Whether a file name looks like a snapshot
pub fn is_snapshot_name(name: &str) -> bool {
    name.strip_suffix(SNAPSHOT_SUFFIX)
        .is_some_and(|stem| stem.ends_with('.') && stem.len() > 1)
}

impl SnapshotCatalog {
    /// Scan `dir` for snapshot files.
    ///
    /// Entries whose base name appears in `pins` start out pinned. Any failure
    /// to list the directory or stat a snapshot aborts the scan.
    #[instrument(skip(pins), fields(pin_count = pins.len()))]
    pub fn scan(dir: &Path, pins: &[String]) -> Result<Self> {
        let mut snapshots = Vec::new();
        for entry in fs::read_dir(dir).map_err(access(dir))? {
            let entry = entry.map_err(access(dir))?;
            let name = entry.file_name().to_string_lossy().into_owned();
            if !is_snapshot_name(&name) {
                continue;
            }

            let path = entry.path();
            let metadata = entry.metadata().map_err(access(&path))?;
            if !metadata.is_file() {
                continue;
            }
            let modified = metadata.modified().map_err(access(&path))?;

            let pinned = pins.iter().any(|p| *p == name);
            trace!("Found snapshot {} (pinned: {})", name, pinned);
            snapshots.push(Snapshot {
                path,
                name,
                modified: DateTime::<Utc>::from(modified),
                pinned,
            });
        }

        Ok(Self {
            dir: dir.to_path_buf(),
            snapshots,
        })
    }

    /// Build a catalog from already known snapshots
    pub fn from_snapshots(dir: impl Into<PathBuf>, snapshots: Vec<Snapshot>) -> Self {
        Self {
            dir: dir.into(),
            snapshots,
        }
    }

    /// Directory this catalog was scanned from
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Number of snapshots
    pub fn len(&self) -> usize {
        self.snapshots.len()
    }

    /// True when the directory held no snapshots
    pub fn is_empty(&self) -> bool {
        self.snapshots.is_empty()
    }

    /// Snapshot at `id`
    pub fn get(&self, id: SnapshotId) -> &Snapshot {
        &self.snapshots[id.0]
    }

    /// Mark a snapshot pinned. Pins are never removed.
    pub fn pin(&mut self, id: SnapshotId) {
        self.snapshots[id.0].pinned = true;
    }

    /// Pin every snapshot
    pub fn pin_all(&mut self) {
        for snapshot in &mut self.snapshots {
            snapshot.pinned = true;
        }
    }

    /// All ids, in catalog order
    pub fn ids(&self) -> impl Iterator<Item = SnapshotId> {
        (0..self.snapshots.len()).map(SnapshotId)
    }

    /// Iterate `(id, snapshot)` pairs in catalog order
    pub fn iter(&self) -> impl Iterator<Item = (SnapshotId, &Snapshot)> {
        self.snapshots
            .iter()
            .enumerate()
            .map(|(i, s)| (SnapshotId(i), s))
    }

    /// Reorder newest first; equal times are ordered by name.
    ///
    /// Ids handed out before sorting are invalidated.
    pub fn sort_newest_first(&mut self) {
        self.snapshots
            .sort_by(|a, b| (Reverse(a.modified), &a.name).cmp(&(Reverse(b.modified), &b.name)));
    }

    /// Snapshots that survive the pass
    pub fn pinned(&self) -> impl Iterator<Item = &Snapshot> {
        self.snapshots.iter().filter(|s| s.pinned)
    }

    /// Snapshots that are up for deletion
    pub fn unpinned(&self) -> impl Iterator<Item = &Snapshot> {
        self.snapshots.iter().filter(|s| !s.pinned)
    }
}
