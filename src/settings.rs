//! Settings file
//!
//! Targets and named retention plans are read from a JSON document:
//!
//! ```json
//! {
//!   "log_level": "info",
//!   "plans": {
//!     "default": [["year", null], ["month", 9], ["1 week", 6],
//!                 ["1 day", 5], ["1 hour", 18], [null, 10]]
//!   },
//!   "targets": [
//!     {
//!       "target_path": "db.sqlite",
//!       "backup_dir": "/var/backup/sqlite-db",
//!       "retention_plan": "default",
//!       "pin": ["20150717-1155.sqlite.lz4"],
//!       "prune": false
//!     }
//!   ]
//! }
//! ```
//!
//! A rule is `[granularity, quantity]`: granularity is `null` (latest),
//! `"month"`, `"year"` or a duration such as `"1 week"`; quantity is `null`
//! (unbounded) or a count. Every plan is validated while loading, so a bad
//! rule stops the process before any target runs.

use crate::backup::BackupTarget;
use crate::error::{HfbrError, Result};
use crate::prune::PruneMode;
use crate::retention::{Granularity, Quantity, RetentionPolicy, Rule};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Default settings file, looked up in the working directory
pub const DEFAULT_SETTINGS_FILE: &str = "settings.json";

/// A rule as written in the settings: `[granularity, quantity]`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleSpec(pub Option<String>, pub Option<usize>);

impl RuleSpec {
    /// Validate into a [`Rule`]
    pub fn to_rule(&self) -> Result<Rule> {
        Ok(Rule::new(
            Granularity::from_token(self.0.as_deref())?,
            Quantity::from(self.1),
        ))
    }
}

/// A target's plan: a name from `plans` or an inline rule list
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PlanRef {
    /// Reference into `plans`
    Named(String),
    /// Rules given in place
    Inline(Vec<RuleSpec>),
}

/// One target entry of the settings file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetSpec {
    /// File to snapshot
    #[serde(default)]
    pub target_path: Option<PathBuf>,
    /// Where snapshots live; defaults to the target's directory
    #[serde(default)]
    pub backup_dir: Option<PathBuf>,
    /// Plan to apply; none keeps everything
    #[serde(default)]
    pub retention_plan: Option<PlanRef>,
    /// Snapshot base names that are never deleted
    #[serde(default)]
    pub pin: Vec<String>,
    /// `false` for a dry run
    #[serde(default = "default_prune")]
    pub prune: bool,
}

fn default_prune() -> bool {
    true
}

/// Parsed settings file
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settings {
    /// Log filter directive, e.g. `info` or `hfbr=debug`
    #[serde(default)]
    pub log_level: Option<String>,
    /// Named plans
    #[serde(default)]
    pub plans: BTreeMap<String, Vec<RuleSpec>>,
    /// Targets, processed in order
    #[serde(default)]
    pub targets: Vec<TargetSpec>,
}

fn compile(rules: &[RuleSpec]) -> Result<RetentionPolicy> {
    rules
        .iter()
        .map(RuleSpec::to_rule)
        .collect::<Result<Vec<_>>>()
        .map(RetentionPolicy::new)
}

impl Settings {
    /// Parse settings from JSON text
    pub fn from_json(text: &str) -> Result<Self> {
        // An empty file behaves like no file
        if text.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_json::from_str(text)?)
    }

    /// Load settings from `path`; a missing file yields `None`
    pub fn load(path: &Path) -> Result<Option<Self>> {
        match fs::read_to_string(path) {
            Ok(text) => {
                debug!("Loaded settings from {:?}", path);
                Self::from_json(&text).map(Some)
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Validate every named plan
    pub fn compile_plans(&self) -> Result<BTreeMap<String, RetentionPolicy>> {
        self.plans
            .iter()
            .map(|(name, rules)| Ok((name.clone(), compile(rules)?)))
            .collect()
    }

    /// Turn the target entries into runnable targets.
    ///
    /// Fails on the first invalid rule or unknown plan name.
    pub fn targets(&self) -> Result<Vec<BackupTarget>> {
        let plans = self.compile_plans()?;

        self.targets
            .iter()
            .map(|spec| {
                let policy = match &spec.retention_plan {
                    None => RetentionPolicy::default(),
                    Some(PlanRef::Named(name)) => plans
                        .get(name)
                        .cloned()
                        .ok_or_else(|| HfbrError::UnknownPlan(name.clone()))?,
                    Some(PlanRef::Inline(rules)) => compile(rules)?,
                };

                Ok(BackupTarget::from_parts(spec.target_path.clone(), spec.backup_dir.clone())
                    .policy(policy)
                    .pins(spec.pin.clone())
                    .mode(PruneMode::from_flag(spec.prune)))
            })
            .collect()
    }
}

/// Pick the targets to run: configured ones first, else the command line.
///
/// No target at all is [`HfbrError::NoUsableTargets`].
pub fn resolve_targets(
    settings: Option<&Settings>,
    target_path: Option<PathBuf>,
    backup_dir: Option<PathBuf>,
) -> Result<Vec<BackupTarget>> {
    if let Some(settings) = settings {
        let targets = settings.targets()?;
        if !targets.is_empty() {
            return Ok(targets);
        }
    }

    match target_path {
        Some(path) => Ok(vec![BackupTarget::from_parts(Some(path), backup_dir)]),
        None => Err(HfbrError::NoUsableTargets),
    }
}
