//! Hash-gated snapshot capture
//!
//! [`ChangeGuard`] digests the target with SHA-512, compares the result with
//! the digest stored in the backup directory and writes a new compressed
//! snapshot only when the content changed. One run writes at most one
//! snapshot and one digest.
//!
//! # Examples
//!
//! ```rust,no_run
//! use hfbr::guard::{ChangeGuard, GuardOutcome};
//! use hfbr::events::TracingSink;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let guard = ChangeGuard::new("db.sqlite", "/var/backup/db");
//! match guard.run(&TracingSink)? {
//!     GuardOutcome::Captured { snapshot, .. } => println!("saved {}", snapshot.display()),
//!     GuardOutcome::Unchanged { .. } => println!("nothing to do"),
//! }
//! # Ok(())
//! # }
//! ```

use crate::compression::{compress_file, SNAPSHOT_SUFFIX};
use crate::error::{HfbrError, Result};
use crate::events::{EventSink, RetentionEvent};
use crate::utils::{atomic_write, digest_reader, read_digest, short_hex};
use chrono::{DateTime, Local};
use std::fs::File;
use std::io::{self, BufReader, ErrorKind, Read};
use std::path::{Path, PathBuf};
use tracing::{debug, instrument};

/// Name of the digest file kept in every backup directory
pub const DIGEST_FILE: &str = "last_hash";

/// Timestamp layout of snapshot names (minute precision)
pub const SNAPSHOT_TIME_FORMAT: &str = "%Y%m%d-%H%M";

/// What a guard run did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GuardOutcome {
    /// Content changed and a snapshot was written
    Captured {
        /// The new snapshot file
        snapshot: PathBuf,
        /// Digest now stored
        digest: Vec<u8>,
    },
    /// Content matched the stored digest
    Unchanged {
        /// Digest of the current content
        digest: Vec<u8>,
    },
}

impl GuardOutcome {
    /// The new snapshot, if any
    pub fn snapshot(&self) -> Option<&Path> {
        match self {
            GuardOutcome::Captured { snapshot, .. } => Some(snapshot),
            GuardOutcome::Unchanged { .. } => None,
        }
    }
}

/// Snapshot file name for a target captured at `when`.
///
/// `YYYYMMDD-HHMM` + the target's extension (with its dot) + `.lz4`.
pub fn snapshot_name(target: &Path, when: DateTime<Local>) -> String {
    let extension = target
        .extension()
        .map(|ext| format!(".{}", ext.to_string_lossy()))
        .unwrap_or_default();
    format!(
        "{}{}.{}",
        when.format(SNAPSHOT_TIME_FORMAT),
        extension,
        SNAPSHOT_SUFFIX
    )
}

/// Reader that remembers the first error its source returned
struct TargetReader<R> {
    inner: R,
    failure: Option<io::Error>,
}

impl<R: Read> Read for TargetReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self.inner.read(buf) {
            Err(e) if e.kind() != ErrorKind::Interrupted => {
                let kind = e.kind();
                self.failure.get_or_insert(e);
                Err(io::Error::from(kind))
            }
            other => other,
        }
    }
}

/// Change detector for one target and its backup directory
#[derive(Debug, Clone)]
pub struct ChangeGuard {
    target: PathBuf,
    backup_dir: PathBuf,
}

impl ChangeGuard {
    /// Create a guard
    pub fn new(target: impl Into<PathBuf>, backup_dir: impl Into<PathBuf>) -> Self {
        Self {
            target: target.into(),
            backup_dir: backup_dir.into(),
        }
    }

    /// The guarded file
    pub fn target(&self) -> &Path {
        &self.target
    }

    /// Location of the stored digest
    pub fn digest_path(&self) -> PathBuf {
        self.backup_dir.join(DIGEST_FILE)
    }

    /// Capture a snapshot named after the current local time, if needed
    pub fn run(&self, sink: &dyn EventSink) -> Result<GuardOutcome> {
        self.capture_at(Local::now(), sink)
    }

    /// Capture a snapshot named after `when`, if needed.
    ///
    /// An unreadable target fails with [`HfbrError::TargetUnreadable`]. A
    /// missing digest file counts as "changed".
    #[instrument(skip(self, sink), fields(target = ?self.target))]
    pub fn capture_at(&self, when: DateTime<Local>, sink: &dyn EventSink) -> Result<GuardOutcome> {
        let digest = {
            let mut target = self.open_target()?;
            digest_reader(&mut BufReader::new(&mut target)).map_err(|source| {
                HfbrError::TargetUnreadable {
                    path: self.target.clone(),
                    source,
                }
            })?
        };

        let digest_path = self.digest_path();
        let stored = read_digest(&digest_path)?;
        if stored == digest {
            debug!("Digest {} unchanged", short_hex(&digest));
            sink.emit(&RetentionEvent::TargetUnchanged {
                target: self.target.clone(),
            });
            return Ok(GuardOutcome::Unchanged { digest });
        }

        let snapshot = self.backup_dir.join(snapshot_name(&self.target, when));
        debug!("Change detected! Saving to {:?}", snapshot);

        self.write_snapshot(self.open_target()?, &snapshot)?;
        atomic_write(&digest_path, &digest)?;

        sink.emit(&RetentionEvent::SnapshotCaptured {
            target: self.target.clone(),
            snapshot: snapshot.clone(),
            digest: hex::encode(&digest),
        });
        Ok(GuardOutcome::Captured { snapshot, digest })
    }

    /// Compress `source` into `snapshot`; read failures blame the target
    fn write_snapshot<R: Read>(&self, source: R, snapshot: &Path) -> Result<()> {
        let mut reader = TargetReader {
            inner: source,
            failure: None,
        };
        match compress_file(&mut reader, snapshot) {
            Ok(_) => Ok(()),
            Err(e) => match reader.failure.take() {
                Some(source) => Err(HfbrError::TargetUnreadable {
                    path: self.target.clone(),
                    source,
                }),
                None => Err(e),
            },
        }
    }

    fn open_target(&self) -> Result<File> {
        File::open(&self.target).map_err(|source| HfbrError::TargetUnreadable {
            path: self.target.clone(),
            source,
        })
    }
}
