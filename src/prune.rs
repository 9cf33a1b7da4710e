//! Deletion of everything the retention pass did not pin

use crate::catalog::SnapshotCatalog;
use crate::events::{EventSink, RetentionEvent};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use tracing::instrument;

/// Whether pruning really deletes files
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PruneMode {
    /// Delete unpinned snapshots
    #[default]
    Commit,
    /// Only report what would be deleted
    DryRun,
}

impl PruneMode {
    /// `true` maps to [`PruneMode::Commit`], as in the `prune` setting
    pub fn from_flag(prune: bool) -> Self {
        if prune {
            PruneMode::Commit
        } else {
            PruneMode::DryRun
        }
    }

    /// Whether this mode leaves the filesystem untouched
    pub fn is_dry_run(&self) -> bool {
        matches!(self, PruneMode::DryRun)
    }
}

/// Outcome of one prune
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PruneReport {
    /// Snapshots kept
    pub kept: Vec<PathBuf>,
    /// Snapshots deleted, or that would be deleted in dry-run mode
    pub pruned: Vec<PathBuf>,
    /// Snapshots whose deletion failed, with the error
    pub failed: Vec<(PathBuf, String)>,
    /// Whether the run was a dry run
    pub dry_run: bool,
}

/// Deletes (or reports) every unpinned snapshot of a catalog
#[derive(Debug, Clone, Copy, Default)]
pub struct PruneExecutor {
    mode: PruneMode,
}

impl PruneExecutor {
    /// Create an executor
    pub fn new(mode: PruneMode) -> Self {
        Self { mode }
    }

    /// Walk the catalog in its current order.
    ///
    /// A failed deletion is reported and skipped; it never stops the walk.
    #[instrument(skip_all, fields(dir = ?catalog.dir(), mode = ?self.mode))]
    pub fn execute(&self, catalog: &SnapshotCatalog, sink: &dyn EventSink) -> PruneReport {
        let dry_run = self.mode.is_dry_run();
        let mut report = PruneReport {
            dry_run,
            ..Default::default()
        };

        for (_, snapshot) in catalog.iter() {
            if snapshot.pinned {
                sink.emit(&RetentionEvent::Keep {
                    path: snapshot.path.clone(),
                    modified: snapshot.modified,
                });
                report.kept.push(snapshot.path.clone());
                continue;
            }

            sink.emit(&RetentionEvent::Prune {
                path: snapshot.path.clone(),
                modified: snapshot.modified,
                dry_run,
            });
            if dry_run {
                report.pruned.push(snapshot.path.clone());
                continue;
            }

            match fs::remove_file(&snapshot.path) {
                Ok(()) => report.pruned.push(snapshot.path.clone()),
                Err(e) => {
                    sink.emit(&RetentionEvent::DeletionFailed {
                        path: snapshot.path.clone(),
                        error: e.to_string(),
                    });
                    report.failed.push((snapshot.path.clone(), e.to_string()));
                }
            }
        }

        report
    }
}
