//! Backup targets and the per-target pipeline
//!
//! A [`BackupTarget`] ties a target file to its backup directory, retention
//! policy, pin list and prune mode. [`BackupTarget::run`] performs one full
//! pass: capture (if the file changed), rescan, evaluate, prune.
//! [`run_targets`] processes many targets strictly one after another and
//! keeps one target's failure from affecting the next.
//!
//! # Examples
//!
//! ```rust,no_run
//! use hfbr::{run_targets, BackupTarget, PruneMode, RetentionPolicy, Rule, TracingSink};
//!
//! let target = BackupTarget::new("db.sqlite")
//!     .backup_dir("/var/backup/db")
//!     .policy(RetentionPolicy::new(vec![Rule::latest(10)]))
//!     .pin("20150717-1155.sqlite.lz4")
//!     .mode(PruneMode::DryRun);
//!
//! let summary = run_targets(&[target], &TracingSink);
//! assert!(summary.all_succeeded());
//! ```

use crate::catalog::SnapshotCatalog;
use crate::error::{HfbrError, Result};
use crate::events::{EventSink, RetentionEvent};
use crate::guard::{ChangeGuard, GuardOutcome};
use crate::prune::{PruneExecutor, PruneMode, PruneReport};
use crate::retention::{Evaluation, RetentionEngine, RetentionPolicy};
use chrono::{DateTime, Local};
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{info, info_span};

/// One configured backup target
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BackupTarget {
    target_path: Option<PathBuf>,
    backup_dir: Option<PathBuf>,
    policy: RetentionPolicy,
    pins: Vec<String>,
    mode: PruneMode,
}

/// What one target's pass did
#[derive(Debug, Clone, PartialEq)]
pub struct TargetReport {
    /// Backup directory that was processed
    pub backup_dir: PathBuf,
    /// Guard outcome, `None` for retention-only targets
    pub guard: Option<GuardOutcome>,
    /// Retention evaluation
    pub evaluation: Evaluation,
    /// Prune outcome
    pub prune: PruneReport,
    /// Wall time in milliseconds
    pub duration_ms: u64,
}

impl BackupTarget {
    /// Target that snapshots `target_path`
    pub fn new(target_path: impl Into<PathBuf>) -> Self {
        Self {
            target_path: Some(target_path.into()),
            ..Default::default()
        }
    }

    /// Target that only applies retention to an existing backup directory
    pub fn retention_only(backup_dir: impl Into<PathBuf>) -> Self {
        Self {
            backup_dir: Some(backup_dir.into()),
            ..Default::default()
        }
    }

    /// Build from optional parts, as read from settings
    pub fn from_parts(target_path: Option<PathBuf>, backup_dir: Option<PathBuf>) -> Self {
        Self {
            target_path,
            backup_dir,
            ..Default::default()
        }
    }

    /// Set the backup directory
    pub fn backup_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.backup_dir = Some(dir.into());
        self
    }

    /// Set the retention policy
    pub fn policy(mut self, policy: RetentionPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Add one base name to the pin list
    pub fn pin(mut self, name: impl Into<String>) -> Self {
        self.pins.push(name.into());
        self
    }

    /// Replace the pin list
    pub fn pins(mut self, names: Vec<String>) -> Self {
        self.pins = names;
        self
    }

    /// Set the prune mode
    pub fn mode(mut self, mode: PruneMode) -> Self {
        self.mode = mode;
        self
    }

    /// The target file, if any
    pub fn target_path(&self) -> Option<&Path> {
        self.target_path.as_deref()
    }

    /// Current prune mode
    pub fn prune_mode(&self) -> PruneMode {
        self.mode
    }

    /// Current retention policy
    pub fn retention_policy(&self) -> &RetentionPolicy {
        &self.policy
    }

    /// Path used to name this target in logs and reports
    pub fn label(&self) -> PathBuf {
        self.target_path
            .clone()
            .or_else(|| self.backup_dir.clone())
            .unwrap_or_default()
    }

    /// Backup directory, defaulting to the absolute target's parent
    pub fn resolve_backup_dir(&self) -> Result<PathBuf> {
        if let Some(dir) = &self.backup_dir {
            return Ok(dir.clone());
        }
        let target = self.target_path.as_ref().ok_or_else(|| {
            HfbrError::InvalidTarget(
                "no target_path or backup_dir. Check your settings!".to_string(),
            )
        })?;
        let absolute = std::path::absolute(target)?;
        Ok(absolute
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("/")))
    }

    /// One full pass, naming a new snapshot after the current time
    pub fn run(&self, sink: &dyn EventSink) -> Result<TargetReport> {
        self.run_at(Local::now(), sink)
    }

    /// One full pass, naming a new snapshot after `when`
    pub fn run_at(&self, when: DateTime<Local>, sink: &dyn EventSink) -> Result<TargetReport> {
        let start = Instant::now();
        let backup_dir = self.resolve_backup_dir()?;

        let guard = match &self.target_path {
            Some(target) => {
                info!("Applying backup plan: {:?}", target);
                Some(ChangeGuard::new(target, &backup_dir).capture_at(when, sink)?)
            }
            None => None,
        };

        let mut catalog = SnapshotCatalog::scan(&backup_dir, &self.pins)?;
        let evaluation = RetentionEngine::new(self.policy.clone()).evaluate(&mut catalog, sink);
        let prune = PruneExecutor::new(self.mode).execute(&catalog, sink);

        Ok(TargetReport {
            backup_dir,
            guard,
            evaluation,
            prune,
            duration_ms: start.elapsed().as_millis() as u64,
        })
    }
}

/// Outcome of [`run_targets`]
#[derive(Debug, Default)]
pub struct RunSummary {
    /// Reports of the targets that completed
    pub completed: Vec<TargetReport>,
    /// Targets that failed, with their error
    pub failed: Vec<(PathBuf, HfbrError)>,
}

impl RunSummary {
    /// Whether every target completed
    pub fn all_succeeded(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Run every target in order.
///
/// A failing target is reported through the sink and recorded in the
/// summary; the remaining targets still run.
pub fn run_targets(targets: &[BackupTarget], sink: &dyn EventSink) -> RunSummary {
    let mut summary = RunSummary::default();

    for target in targets {
        let label = target.label();
        let _span = info_span!("target", path = ?label).entered();

        match target.run(sink) {
            Ok(report) => {
                info!(
                    "Done in {}ms: {} kept, {} pruned",
                    report.duration_ms,
                    report.prune.kept.len(),
                    report.prune.pruned.len()
                );
                summary.completed.push(report);
            }
            Err(e) => {
                sink.emit(&RetentionEvent::TargetFailed {
                    target: label.clone(),
                    error: e.to_string(),
                });
                summary.failed.push((label, e));
            }
        }
    }

    summary
}
