//! Structured events emitted by the backup and retention pipeline
//!
//! The core never decides where its output goes. Every keep, prune, capture
//! and failure is handed to an [`EventSink`] supplied by the caller; the
//! binary plugs in [`TracingSink`], tests and embedders can use
//! [`MemorySink`] or their own implementation.
//!
//! # Examples
//!
//! ```rust
//! use hfbr::events::{EventSink, MemorySink, RetentionEvent};
//! use std::path::PathBuf;
//!
//! let sink = MemorySink::new();
//! sink.emit(&RetentionEvent::PolicyVacuous { dir: PathBuf::from("/var/backup") });
//! assert_eq!(sink.events().len(), 1);
//! ```

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::path::PathBuf;
use tracing::{debug, error, info, warn};

/// One observable step of a backup/retention pass
#[derive(Debug, Clone, PartialEq)]
pub enum RetentionEvent {
    /// The target changed and a new snapshot was written
    SnapshotCaptured {
        /// Target file
        target: PathBuf,
        /// Snapshot file written
        snapshot: PathBuf,
        /// Hex digest of the captured content
        digest: String,
    },
    /// The target matched the stored digest; nothing was written
    TargetUnchanged {
        /// Target file
        target: PathBuf,
    },
    /// Every rule is unbounded, so everything is kept
    PolicyVacuous {
        /// Backup directory
        dir: PathBuf,
    },
    /// A bounded policy is being applied
    PolicyApplied {
        /// Backup directory
        dir: PathBuf,
        /// Number of snapshots found
        snapshots: usize,
        /// Number of rules in the policy
        rules: usize,
    },
    /// A snapshot survives the pass
    Keep {
        /// Snapshot file
        path: PathBuf,
        /// Modification time
        modified: DateTime<Utc>,
    },
    /// A snapshot is selected for deletion
    Prune {
        /// Snapshot file
        path: PathBuf,
        /// Modification time
        modified: DateTime<Utc>,
        /// True when nothing is actually deleted
        dry_run: bool,
    },
    /// Deleting a snapshot failed; the pass continues
    DeletionFailed {
        /// Snapshot file
        path: PathBuf,
        /// Failure description
        error: String,
    },
    /// A whole target failed; other targets continue
    TargetFailed {
        /// Target label (path or backup directory)
        target: PathBuf,
        /// Failure description
        error: String,
    },
}

/// Receiver of [`RetentionEvent`]s
pub trait EventSink {
    /// Record one event
    fn emit(&self, event: &RetentionEvent);
}

impl<S: EventSink + ?Sized> EventSink for &S {
    fn emit(&self, event: &RetentionEvent) {
        (**self).emit(event)
    }
}

/// Sink forwarding every event to `tracing`
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn emit(&self, event: &RetentionEvent) {
        match event {
            RetentionEvent::SnapshotCaptured { target, snapshot, digest } => {
                info!("Change detected in {:?}, saved {:?} ({})", target, snapshot, digest);
            }
            RetentionEvent::TargetUnchanged { target } => {
                debug!("No change in {:?}", target);
            }
            RetentionEvent::PolicyVacuous { dir } => {
                info!("No retention plan on {:?}. Keeping all files.", dir);
            }
            RetentionEvent::PolicyApplied { dir, snapshots, rules } => {
                info!(
                    "Applying retention plan to {:?}: {} snapshots, {} rules",
                    dir, snapshots, rules
                );
            }
            RetentionEvent::Keep { path, modified } => {
                debug!("Keep file {} {:?}", modified.format("%Y%m%d%H%M%S"), path);
            }
            RetentionEvent::Prune { path, modified, dry_run } => {
                if *dry_run {
                    info!("Prune file {} {:?} (dry run)", modified.format("%Y%m%d%H%M%S"), path);
                } else {
                    info!("Prune file {} {:?}", modified.format("%Y%m%d%H%M%S"), path);
                }
            }
            RetentionEvent::DeletionFailed { path, error } => {
                warn!("Failed to delete {:?}: {}", path, error);
            }
            RetentionEvent::TargetFailed { target, error } => {
                error!("Target {:?} failed: {}", target, error);
            }
        }
    }
}

/// Sink keeping every event in memory
#[derive(Debug, Default)]
pub struct MemorySink {
    events: Mutex<Vec<RetentionEvent>>,
}

impl MemorySink {
    /// Create an empty sink
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the events recorded so far
    pub fn events(&self) -> Vec<RetentionEvent> {
        self.events.lock().clone()
    }

    /// Paths reported as pruned, in emission order
    pub fn pruned(&self) -> Vec<PathBuf> {
        self.events
            .lock()
            .iter()
            .filter_map(|e| match e {
                RetentionEvent::Prune { path, .. } => Some(path.clone()),
                _ => None,
            })
            .collect()
    }

    /// Paths reported as kept, in emission order
    pub fn kept(&self) -> Vec<PathBuf> {
        self.events
            .lock()
            .iter()
            .filter_map(|e| match e {
                RetentionEvent::Keep { path, .. } => Some(path.clone()),
                _ => None,
            })
            .collect()
    }
}

impl EventSink for MemorySink {
    fn emit(&self, event: &RetentionEvent) {
        self.events.lock().push(event.clone());
    }
}
