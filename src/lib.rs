//! # hfbr - High frequency backup and retention
//!
//! Snapshot a single file as often as you like and keep a bounded,
//! well-spread history of it.
//!
//! ## Overview
//!
//! Every pass over a target does four things, in order:
//!
//! 1. **Guard**: the target is hashed (SHA-512, streamed) and compared with
//!    the digest stored in the backup directory. Only if it changed is a new
//!    LZ4-compressed snapshot named `YYYYMMDD-HHMM<ext>.lz4` written.
//! 2. **Catalog**: the backup directory is rescanned; each snapshot's time
//!    comes from its modification time.
//! 3. **Retention**: each rule of the policy buckets the snapshots by time
//!    (latest, fixed duration, month, year), keeps the newest N buckets and
//!    pins one snapshot per bucket.
//! 4. **Prune**: everything left unpinned is deleted, or just reported in
//!    dry-run mode.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use hfbr::{BackupTarget, Granularity, Quantity, RetentionPolicy, Rule, TracingSink};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let policy = RetentionPolicy::new(vec![
//!     Rule::latest(10),
//!     Rule::new("1 day".parse()?, Quantity::Limited(5)),
//!     Rule::new(Granularity::Month, Quantity::Limited(9)),
//!     Rule::new(Granularity::Year, Quantity::Unbounded),
//! ]);
//!
//! let report = BackupTarget::new("db.sqlite")
//!     .backup_dir("/var/backup/db")
//!     .policy(policy)
//!     .run(&TracingSink)?;
//! println!("kept {}, pruned {}", report.prune.kept.len(), report.prune.pruned.len());
//! # Ok(())
//! # }
//! ```
//!
//! ## Key Concepts
//!
//! ### Pins
//!
//! A pinned snapshot survives the pass. Pins come from two places: the
//! target's explicit pin list (base names) and the representatives chosen by
//! the rules. Pins only ever accumulate during a pass.
//!
//! ### Vacuous policies
//!
//! A policy in which no rule has a bounded quantity (including an empty
//! policy) keeps every snapshot.
//!
//! ## Error Handling
//!
//! All operations return `Result<T, HfbrError>`. Configuration mistakes are
//! reported before anything runs; failures of one target never stop the
//! others (see [`run_targets`]); failed deletions are reported through the
//! [`EventSink`] and skipped.
//!
//! ## Module Organization
//!
//! - [`guard`]: change detection and snapshot capture
//! - [`catalog`]: snapshot discovery
//! - [`retention`]: rules, policies and the retention engine
//! - [`prune`]: deletion of unpinned snapshots
//! - [`backup`]: per-target pipeline and sequential runs
//! - [`settings`]: JSON settings file
//! - [`events`]: structured event sink
//! - [`compression`]: LZ4 frame streaming
//! - [`error`]: error types

pub mod backup;
pub mod catalog;
pub mod compression;
pub mod error;
pub mod events;
pub mod guard;
pub mod prune;
pub mod retention;
pub mod settings;
pub mod utils;

pub use backup::{run_targets, BackupTarget, RunSummary, TargetReport};
pub use catalog::{Snapshot, SnapshotCatalog, SnapshotId};
pub use error::{HfbrError, Result};
pub use events::{EventSink, MemorySink, RetentionEvent, TracingSink};
pub use guard::{ChangeGuard, GuardOutcome};
pub use prune::{PruneExecutor, PruneMode, PruneReport};
pub use retention::{Evaluation, Granularity, Quantity, RetentionEngine, RetentionPolicy, Rule};
pub use settings::Settings;
